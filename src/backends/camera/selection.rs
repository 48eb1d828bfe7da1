// SPDX-License-Identifier: GPL-3.0-only

//! Camera, output size and autofocus selection
//!
//! Pure functions over device-reported capabilities. The session manager
//! calls these when a session starts; none of them touch the platform.

use super::types::{AutoFocusMode, CameraFacing, OutputSize};
use crate::constants::DEFAULT_SCREEN_PROPORTION;
use crate::frame_processor::types::BarcodeFormat;
use std::collections::BTreeMap;
use tracing::debug;

/// Pick a camera id for the requested facing
///
/// Ids are scanned in platform order and the first one with a matching facing
/// wins. When nothing matches, the first id is used anyway so that a device
/// without the requested facing still gets a usable camera. Returns `None`
/// only for an empty id list.
pub fn select_camera_id<'a, S, F>(ids: &'a [S], requested: CameraFacing, facing_of: F) -> Option<&'a str>
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<CameraFacing>,
{
    let first = ids.first()?.as_ref();

    let matched = ids
        .iter()
        .map(AsRef::as_ref)
        .find(|id| facing_of(id) == Some(requested));

    match matched {
        Some(id) => Some(id),
        None => {
            debug!(requested = %requested, fallback = first, "No camera with requested facing");
            Some(first)
        }
    }
}

/// Choose the capture resolution for a minimum subject width
///
/// Among sizes strictly wider than `min_width` the narrowest wins (first in
/// candidate order on ties). If none is wide enough the largest size is used.
/// An empty candidate list yields `None`.
pub fn choose_output_size(candidates: &[OutputSize], min_width: u32) -> Option<OutputSize> {
    let tightest = candidates
        .iter()
        .filter(|size| size.width > min_width)
        .min_by_key(|size| size.width);

    if let Some(size) = tightest {
        return Some(*size);
    }

    // Best effort: nothing is wide enough
    candidates
        .iter()
        .max_by_key(|size| (size.width, size.height))
        .copied()
}

/// Select the autofocus mode: continuous-picture, then auto, then off
///
/// `Off` is assumed to be supported everywhere.
pub fn select_autofocus_mode(available: &[AutoFocusMode]) -> AutoFocusMode {
    [AutoFocusMode::ContinuousPicture, AutoFocusMode::Auto]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(AutoFocusMode::Off)
}

/// Minimum capture width needed to decode the enabled barcode formats
///
/// A custom width always wins. Otherwise the format needing the widest subject
/// drives the requirement, scaled by the fraction of the frame the barcode is
/// expected to cover and floored to whole pixels.
pub fn min_width_for_barcodes(
    format_min_widths: &BTreeMap<BarcodeFormat, u32>,
    enabled_formats: &[BarcodeFormat],
    screen_proportion: f64,
    custom_min_width: Option<u32>,
) -> u32 {
    if let Some(width) = custom_min_width {
        return width;
    }

    let proportion = if screen_proportion.is_finite() && screen_proportion > 0.0 {
        screen_proportion
    } else {
        DEFAULT_SCREEN_PROPORTION
    };

    let widest = enabled_formats
        .iter()
        .map(|format| format_min_widths.get(format).copied().unwrap_or(0))
        .max()
        .unwrap_or(0);

    (f64::from(widest) / proportion).floor() as u32
}
