// SPDX-License-Identifier: GPL-3.0-only

//! Image file frame source for the virtual camera
//!
//! Loads still images once, converts them to 8-bit luma and hands them out
//! round-robin so a virtual camera can stream them like a live feed.

use crate::backends::camera::types::RawImage;
use crate::constants::file_formats;
use crate::errors::PlatformError;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Load an image file and convert it to a Gray8 frame
///
/// Supports common image formats: PNG, JPEG, GIF, BMP, WebP
pub fn load_image_as_frame(path: &Path) -> Result<RawImage, PlatformError> {
    info!(path = %path.display(), "Loading image file");

    let gray = image::open(path)?.to_luma8();
    let (width, height) = gray.dimensions();

    debug!(width, height, "Image loaded successfully");
    Ok(RawImage::gray8(width, height, gray.into_raw()))
}

/// Expand directories into the image files they contain, sorted by name
pub fn collect_image_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, PlatformError> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .flatten()
                .map(|entry| entry.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(file_formats::is_image_extension)
                })
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    Ok(files)
}

/// Round-robin source over pre-decoded frames
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    frames: Vec<RawImage>,
    next: usize,
}

impl FileFrameSource {
    /// Decode every image up front; fails on the first unreadable file
    pub fn open(paths: &[PathBuf]) -> Result<Self, PlatformError> {
        let frames = collect_image_paths(paths)?
            .iter()
            .map(|path| load_image_as_frame(path))
            .collect::<Result<Vec<_>, _>>()?;

        info!(frames = frames.len(), "File frame source ready");
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<RawImage>) -> Self {
        Self { frames, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Next frame in order, wrapping at the end; stamps a fresh capture time
    pub fn next_frame(&mut self) -> Option<RawImage> {
        if self.frames.is_empty() {
            return None;
        }

        let mut frame = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        frame.captured_at = Instant::now();
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let mut source = FileFrameSource::from_frames(vec![
            RawImage::gray8(1, 1, vec![1]),
            RawImage::gray8(1, 1, vec![2]),
        ]);
        let values: Vec<u8> = (0..5).filter_map(|_| source.next_frame()).map(|f| f.data[0]).collect();
        assert_eq!(values, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_empty_source() {
        let mut source = FileFrameSource::from_frames(Vec::new());
        assert!(source.is_empty());
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_image_as_frame(Path::new("/nonexistent/frame.png")).is_err());
    }

    #[test]
    fn test_loads_written_png() {
        let dir = std::env::temp_dir().join(format!("barcode-camera-src-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame.png");
        image::GrayImage::from_pixel(3, 2, image::Luma([200])).save(&path).unwrap();

        let frame = load_image_as_frame(&path).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert!(frame.data.iter().all(|&v| v == 200));

        let listed = collect_image_paths(std::slice::from_ref(&dir)).unwrap();
        assert_eq!(listed, vec![path]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
