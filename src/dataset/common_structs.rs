//! Frequently used structs of the capture and assembly stages

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DatasetError, DatasetResult};

pub const LABEL_EXTENSION: &str = "txt";

/// One renderer output: an image and its annotation file, sharing a base name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    image: PathBuf,
    label: PathBuf,
}

impl Sample {
    /// The annotation lives next to the image with the label extension.
    pub fn from_image<P: Into<PathBuf>>(image: P) -> Sample {
        let image = image.into();
        let label = image.with_extension(LABEL_EXTENSION);
        Sample { image, label }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn label(&self) -> &Path {
        &self.label
    }

    /// File name without extension, shared by the image and the label.
    pub fn base_name(&self) -> String {
        self.image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Both halves of the pair must exist before the sample can be moved.
    pub fn check_pair(&self) -> DatasetResult<()> {
        if !self.image.is_file() {
            return Err(DatasetError::Io {
                path: self.image.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "image missing"),
            });
        }
        if !self.label.is_file() {
            return Err(DatasetError::MissingPair {
                image: self.image.clone(),
                label: self.label.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn relocated(&self, image_dir: &Path, label_dir: &Path) -> Sample {
        let image = match self.image.file_name() {
            Some(name) => image_dir.join(name),
            None => image_dir.to_path_buf(),
        };
        let label = match self.label.file_name() {
            Some(name) => label_dir.join(name),
            None => label_dir.to_path_buf(),
        };
        Sample { image, label }
    }
}

/// A Bounding Box in frame pixels: top left corner and size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBbox {
    pub top: f64,
    pub left: f64,
    pub height: f64,
    pub width: f64,
}

/// A Bounding Box relative to the frame: center and size, all within [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBbox {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelBbox {
    /// Intersect with the frame. None if nothing of the box is visible.
    pub fn clip_to_frame(&self, frame_width: u32, frame_height: u32) -> Option<PixelBbox> {
        let left = self.left.max(0.);
        let top = self.top.max(0.);
        let right = (self.left + self.width).min(frame_width as f64);
        let bottom = (self.top + self.height).min(frame_height as f64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(PixelBbox {
            top,
            left,
            height: bottom - top,
            width: right - left,
        })
    }

    pub fn normalize(&self, frame_width: u32, frame_height: u32) -> NormalizedBbox {
        let fw = frame_width as f64;
        let fh = frame_height as f64;
        NormalizedBbox {
            center_x: (self.left + self.width / 2.) / fw,
            center_y: (self.top + self.height / 2.) / fh,
            width: self.width / fw,
            height: self.height / fh,
        }
    }
}

impl NormalizedBbox {
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelBbox {
        let fw = frame_width as f64;
        let fh = frame_height as f64;
        PixelBbox {
            top: (self.center_y - self.height / 2.) * fh,
            left: (self.center_x - self.width / 2.) * fw,
            height: self.height * fh,
            width: self.width * fw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_path_swaps_extension() {
        let sample = Sample::from_image("/out/ui_button_3.jpg");
        assert_eq!(sample.label(), Path::new("/out/ui_button_3.txt"));
        assert_eq!(sample.base_name(), "ui_button_3");
    }

    #[test]
    fn clip_keeps_visible_part() {
        let bb = PixelBbox {
            top: -10.,
            left: 240.,
            height: 30.,
            width: 20.,
        };
        let clipped = bb.clip_to_frame(250, 250).unwrap();
        assert_eq!(clipped.top, 0.);
        assert_eq!(clipped.left, 240.);
        assert_eq!(clipped.height, 20.);
        assert_eq!(clipped.width, 10.);
    }

    #[test]
    fn clip_drops_offscreen_box() {
        let bb = PixelBbox {
            top: 10.,
            left: 300.,
            height: 10.,
            width: 10.,
        };
        assert!(bb.clip_to_frame(250, 250).is_none());
    }

    #[test]
    fn normalize_is_center_based() {
        let bb = PixelBbox {
            top: 50.,
            left: 100.,
            height: 50.,
            width: 50.,
        };
        let n = bb.normalize(200, 200);
        assert_eq!(n.center_x, 0.625);
        assert_eq!(n.center_y, 0.375);
        assert_eq!(n.width, 0.25);
        assert_eq!(n.height, 0.25);
        assert_eq!(n.to_pixels(200, 200), bb);
    }
}
