//! Draws the boxes of a split onto copies of its images, to eyeball labels.

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, Blend};
use imageproc::rect::Rect;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::dataset::annotation::{read_bboxes, LabeledBbox};
use crate::dataset::common_structs::{PixelBbox, LABEL_EXTENSION};
use crate::dataset::manifest::DatasetManifest;
use crate::dataset::split::Split;
use crate::error::{DatasetError, DatasetResult};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const PALETTE: [[u8; 4]; 6] = [
    [255, 0, 0, 200],
    [0, 200, 0, 200],
    [0, 0, 255, 200],
    [255, 160, 0, 200],
    [200, 0, 200, 200],
    [0, 200, 200, 200],
];

pub fn class_color(class: usize) -> Rgba<u8> {
    Rgba(PALETTE[class % PALETTE.len()])
}

/// Draw every box as a hollow rectangle. Normalized boxes are scaled to the
/// image; boxes thinner than a pixel after clipping are skipped.
pub fn draw_bboxes(img: &mut RgbaImage, boxes: &[LabeledBbox]) -> usize {
    let (width, height) = img.dimensions();
    let mut blend = Blend(img.clone());
    let mut drawn = 0;
    for labeled in boxes {
        let (class, bbox) = match labeled {
            LabeledBbox::Pixel { class, bbox } => (*class, *bbox),
            LabeledBbox::Normalized { class, bbox } => (*class, bbox.to_pixels(width, height)),
        };
        let bbox: PixelBbox = match bbox.clip_to_frame(width, height) {
            Some(clipped) if clipped.width >= 1. && clipped.height >= 1. => clipped,
            _ => continue,
        };
        let rect = Rect::at(bbox.left as i32, bbox.top as i32)
            .of_size(bbox.width as u32, bbox.height as u32);
        draw_hollow_rect_mut(&mut blend, rect, class_color(class));
        drawn += 1;
    }
    *img = blend.0;
    drawn
}

/// Write `<out_dir>/<base name>.png` for the labels of `split`, at most
/// `limit` of them, in file name order. Returns the written paths.
pub fn render_split_previews(
    manifest: &DatasetManifest,
    split: Split,
    out_dir: &Path,
    limit: Option<usize>,
) -> DatasetResult<Vec<PathBuf>> {
    let images_dir = manifest.images_dir(split);
    let labels_dir = manifest.labels_dir(split);
    let mut labels = vec![];
    for entry in fs::read_dir(&labels_dir).map_err(DatasetError::io_at(&labels_dir))? {
        let path = entry.map_err(DatasetError::io_at(&labels_dir))?.path();
        if path.extension().map_or(false, |ext| ext == LABEL_EXTENSION) {
            labels.push(path);
        }
    }
    labels.sort();
    if let Some(limit) = limit {
        labels.truncate(limit);
    }
    fs::create_dir_all(out_dir).map_err(DatasetError::io_at(out_dir))?;

    let written = labels
        .par_iter()
        .map(|label| preview_one(label, &images_dir, out_dir))
        .collect::<DatasetResult<Vec<PathBuf>>>()?;
    info!(
        "{} previews of split {} written to {}",
        written.len(),
        split,
        out_dir.display()
    );
    Ok(written)
}

fn preview_one(label: &Path, images_dir: &Path, out_dir: &Path) -> DatasetResult<PathBuf> {
    let stem = label.file_stem().unwrap_or_default().to_string_lossy();
    let image_path = IMAGE_EXTENSIONS
        .iter()
        .map(|ext| images_dir.join(format!("{}.{}", stem, ext)))
        .find(|p| p.is_file())
        .ok_or_else(|| DatasetError::MissingPair {
            image: images_dir.join(format!("{}.{}", stem, IMAGE_EXTENSIONS[0])),
            label: label.to_path_buf(),
        })?;

    let boxes = read_bboxes(label)?;
    let mut img = image::open(&image_path)
        .map_err(|source| DatasetError::Image {
            path: image_path.clone(),
            source,
        })?
        .to_rgba8();
    let drawn = draw_bboxes(&mut img, &boxes);

    let out = out_dir.join(format!("{}.png", stem));
    img.save(&out).map_err(|source| DatasetError::Image {
        path: out.clone(),
        source,
    })?;
    debug!("{}: {} boxes drawn", out.display(), drawn);
    Ok(out)
}
