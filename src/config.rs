// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{CameraBackendType, CameraFacing};
use crate::constants::{
    DEFAULT_FORMATS, DEFAULT_MAX_IMAGES, DEFAULT_QR_MAX_DIMENSION, DEFAULT_SCREEN_PROPORTION,
    default_format_min_widths,
};
use crate::errors::ConfigError;
use crate::frame_processor::types::BarcodeFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name under the user config dir
const CONFIG_DIR_NAME: &str = "barcode-camera";
const CONFIG_FILE_NAME: &str = "config.json";

/// Scanner configuration
///
/// Read once at startup; nothing is ever written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use (V4L2 or virtual)
    pub backend: CameraBackendType,
    /// Preferred camera facing
    pub camera_facing: CameraFacing,
    /// Fixed minimum capture width, overriding the per-format computation
    pub custom_min_width: Option<u32>,
    /// Fraction of the frame width a barcode is expected to cover
    pub screen_proportion: f64,
    /// Formats the detector is expected to find
    pub formats: Vec<BarcodeFormat>,
    /// Minimum decodable width per format, in pixels
    pub format_min_widths: BTreeMap<BarcodeFormat, u32>,
    /// Frame queue depth
    pub max_images: usize,
    /// Frames larger than this are decimated before QR decoding
    pub qr_max_dimension: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            camera_facing: CameraFacing::default(),
            custom_min_width: None,
            screen_proportion: DEFAULT_SCREEN_PROPORTION,
            formats: DEFAULT_FORMATS.to_vec(),
            format_min_widths: default_format_min_widths(),
            max_images: DEFAULT_MAX_IMAGES,
            qr_max_dimension: DEFAULT_QR_MAX_DIMENSION,
        }
    }
}

impl Config {
    /// Default config file location (`~/.config/barcode-camera/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing file yields the defaults; a present but broken file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => {
                debug!("No config directory, using defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.formats.is_empty() {
            return Err(ConfigError::Invalid("at least one barcode format is required".into()));
        }
        if self.max_images == 0 {
            return Err(ConfigError::Invalid("max_images must be at least 1".into()));
        }
        if !(self.screen_proportion > 0.0 && self.screen_proportion <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "screen_proportion must be in (0, 1], got {}",
                self.screen_proportion
            )));
        }
        if self.qr_max_dimension == 0 {
            return Err(ConfigError::Invalid("qr_max_dimension must be positive".into()));
        }
        Ok(())
    }
}
