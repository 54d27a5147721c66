//! In-place rewriting of renderer annotation files.
//!
//! Each non blank line is `<class> <f1> <f2> <f3> <f4>`. The renderer writes the
//! class as a name and the geometry as integer pixels (`left top width height`).
//! The trainer wants a class index and decimal, center based geometry in [0, 1].
//! Both transforms can be applied to a file any number of times:
//! numeric class tokens are left alone and a file whose geometry is already
//! decimal and within [0, 1] is never scaled again.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::dataset::atomic::write_atomic;
use crate::dataset::class_table::ClassTable;
use crate::dataset::common_structs::{NormalizedBbox, PixelBbox};
use crate::error::{DatasetError, DatasetResult};

const FIELDS_PER_LINE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSpace {
    Pixel,
    Normalized,
}

/// A box as read back from an annotation file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LabeledBbox {
    Pixel { class: usize, bbox: PixelBbox },
    Normalized { class: usize, bbox: NormalizedBbox },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Pixel geometry was scaled. `dropped` boxes had no area inside the frame.
    Normalized { boxes: usize, dropped: usize },
    /// Geometry was already normalized; the file was not touched.
    AlreadyNormalized { boxes: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteSummary {
    pub classes_replaced: usize,
    pub normalize: Option<NormalizeOutcome>,
}

struct BoxLine<'a> {
    number: usize,
    class: &'a str,
    geometry: [f64; 4],
    space: CoordinateSpace,
}

/// Replace every class name in `path` with its index in `table`.
///
/// Returns the number of tokens replaced. On `UnknownClass` the file is left
/// exactly as it was.
pub fn rewrite_class_tokens(path: &Path, table: &ClassTable) -> DatasetResult<usize> {
    let text = read(path)?;
    let (rewritten, replaced) = rewrite_class_text(&text, table, path)?;
    if replaced > 0 {
        write_atomic(path, rewritten.as_bytes())?;
    }
    debug!("{}: {} class tokens replaced", path.display(), replaced);
    Ok(replaced)
}

/// Scale pixel boxes of `path` into the [0, 1] center format.
pub fn normalize_bboxes(
    path: &Path,
    frame_width: u32,
    frame_height: u32,
) -> DatasetResult<NormalizeOutcome> {
    check_frame(frame_width, frame_height)?;
    let text = read(path)?;
    let (normalized, outcome) = normalize_text(&text, frame_width, frame_height, path)?;
    if let Some(normalized) = normalized {
        write_atomic(path, normalized.as_bytes())?;
    }
    debug!("{}: {:?}", path.display(), outcome);
    Ok(outcome)
}

/// Class rewrite followed by optional normalization, with a single write.
pub fn rewrite_annotation(
    path: &Path,
    table: &ClassTable,
    frame: Option<(u32, u32)>,
) -> DatasetResult<RewriteSummary> {
    if let Some((w, h)) = frame {
        check_frame(w, h)?;
    }
    let text = read(path)?;
    let (mut current, classes_replaced) = rewrite_class_text(&text, table, path)?;
    let mut changed = classes_replaced > 0;
    let mut normalize = None;
    if let Some((w, h)) = frame {
        let (normalized, outcome) = normalize_text(&current, w, h, path)?;
        if let Some(normalized) = normalized {
            current = normalized;
            changed = true;
        }
        normalize = Some(outcome);
    }
    if changed {
        write_atomic(path, current.as_bytes())?;
    }
    Ok(RewriteSummary {
        classes_replaced,
        normalize,
    })
}

/// Parse the boxes of a rewritten annotation file.
pub fn read_bboxes(path: &Path) -> DatasetResult<Vec<LabeledBbox>> {
    let text = read(path)?;
    let lines = parse_lines(&text, path)?;
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let class = line.class.parse::<usize>().map_err(|_| DatasetError::UnknownClass {
            path: path.to_path_buf(),
            line: line.number,
            token: line.class.to_string(),
        })?;
        let [a, b, c, d] = line.geometry;
        out.push(match line.space {
            CoordinateSpace::Pixel => LabeledBbox::Pixel {
                class,
                bbox: PixelBbox {
                    left: a,
                    top: b,
                    width: c,
                    height: d,
                },
            },
            CoordinateSpace::Normalized => LabeledBbox::Normalized {
                class,
                bbox: NormalizedBbox {
                    center_x: a,
                    center_y: b,
                    width: c,
                    height: d,
                },
            },
        });
    }
    Ok(out)
}

fn read(path: &Path) -> DatasetResult<String> {
    fs::read_to_string(path).map_err(DatasetError::io_at(path))
}

fn check_frame(frame_width: u32, frame_height: u32) -> DatasetResult<()> {
    if frame_width == 0 || frame_height == 0 {
        return Err(DatasetError::InvalidConfig(format!(
            "frame size {}x{} cannot be used to normalize boxes",
            frame_width, frame_height
        )));
    }
    Ok(())
}

/// Text level class rewrite. Everything after the class token is kept byte for byte.
fn rewrite_class_text(
    text: &str,
    table: &ClassTable,
    path: &Path,
) -> DatasetResult<(String, usize)> {
    let mut out = String::with_capacity(text.len());
    let mut replaced = 0;
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let body = line.trim_start();
        let indent = &line[..line.len() - body.len()];
        let token_len = body
            .find(char::is_whitespace)
            .unwrap_or(body.len());
        let token = &body[..token_len];
        if token.is_empty() {
            out.push_str(line);
            continue;
        }
        let index = match token.parse::<usize>() {
            Ok(index) if index < table.len() => None,
            Ok(_) => {
                return Err(DatasetError::UnknownClass {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    token: token.to_string(),
                })
            }
            Err(_) => match table.index_of(token) {
                Some(index) => Some(index),
                None => {
                    return Err(DatasetError::UnknownClass {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        token: token.to_string(),
                    })
                }
            },
        };
        match index {
            Some(index) => {
                out.push_str(indent);
                out.push_str(&index.to_string());
                out.push_str(&body[token_len..]);
                replaced += 1;
            }
            None => out.push_str(line),
        }
    }
    Ok((out, replaced))
}

/// Returns the new text, or None when the geometry is already normalized.
fn normalize_text(
    text: &str,
    frame_width: u32,
    frame_height: u32,
    path: &Path,
) -> DatasetResult<(Option<String>, NormalizeOutcome)> {
    let lines = parse_lines(text, path)?;
    let space = file_space(&lines, path)?;
    if space == CoordinateSpace::Normalized {
        return Ok((
            None,
            NormalizeOutcome::AlreadyNormalized { boxes: lines.len() },
        ));
    }
    let mut out = String::with_capacity(text.len());
    let mut dropped = 0;
    for line in &lines {
        let [left, top, width, height] = line.geometry;
        let bbox = PixelBbox {
            top,
            left,
            height,
            width,
        };
        let clipped = match bbox.clip_to_frame(frame_width, frame_height) {
            Some(clipped) => clipped,
            None => {
                warn!(
                    "{}:{}: box {:?} lies outside the {}x{} frame, dropping it",
                    path.display(),
                    line.number,
                    bbox,
                    frame_width,
                    frame_height
                );
                dropped += 1;
                continue;
            }
        };
        if clipped != bbox {
            warn!(
                "{}:{}: box clipped to the {}x{} frame",
                path.display(),
                line.number,
                frame_width,
                frame_height
            );
        }
        let n = clipped.normalize(frame_width, frame_height);
        out.push_str(&format!(
            "{} {:.6} {:.6} {:.6} {:.6}\n",
            line.class, n.center_x, n.center_y, n.width, n.height
        ));
    }
    Ok((
        Some(out),
        NormalizeOutcome::Normalized {
            boxes: lines.len() - dropped,
            dropped,
        },
    ))
}

fn parse_lines<'a>(text: &'a str, path: &Path) -> DatasetResult<Vec<BoxLine<'a>>> {
    let mut lines = vec![];
    for (idx, raw) in text.lines().enumerate() {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        let malformed = |msg: String| DatasetError::MalformedAnnotation {
            path: path.to_path_buf(),
            line: idx + 1,
            msg,
        };
        if tokens.len() != FIELDS_PER_LINE {
            return Err(malformed(format!(
                "expected {} fields, found {}",
                FIELDS_PER_LINE,
                tokens.len()
            )));
        }
        let mut geometry = [0f64; 4];
        for (slot, token) in geometry.iter_mut().zip(&tokens[1..]) {
            let value = token
                .parse::<f64>()
                .map_err(|_| malformed(format!("{:?} is not a number", token)))?;
            if !value.is_finite() {
                return Err(malformed(format!("{:?} is not finite", token)));
            }
            *slot = value;
        }
        if geometry[2] < 0. || geometry[3] < 0. {
            return Err(malformed("negative box size".to_string()));
        }
        lines.push(BoxLine {
            number: idx + 1,
            class: tokens[0],
            geometry,
            space: line_space(&tokens[1..], &geometry),
        });
    }
    Ok(lines)
}

/// Integers are renderer pixels. Normalized geometry is always written as
/// decimals, so a line is normalized only if every field is a decimal in [0, 1].
fn line_space(tokens: &[&str], geometry: &[f64; 4]) -> CoordinateSpace {
    let all_decimal_unit = tokens
        .iter()
        .zip(geometry.iter())
        .all(|(token, value)| token.parse::<i64>().is_err() && (0. ..=1.).contains(value));
    if all_decimal_unit {
        CoordinateSpace::Normalized
    } else {
        CoordinateSpace::Pixel
    }
}

fn file_space(lines: &[BoxLine], path: &Path) -> DatasetResult<CoordinateSpace> {
    let first = match lines.first() {
        Some(first) => first.space,
        // nothing to scale
        None => return Ok(CoordinateSpace::Normalized),
    };
    if let Some(other) = lines.iter().find(|l| l.space != first) {
        return Err(DatasetError::MalformedAnnotation {
            path: path.to_path_buf(),
            line: other.number,
            msg: format!(
                "{:?} geometry in a file whose first box is {:?}",
                other.space, first
            ),
        });
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn table() -> ClassTable {
        ClassTable::new(vec!["lv_btn", "lv_label"]).unwrap()
    }

    fn write_tmp(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ui_0.txt");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn class_names_become_indices() {
        let (_dir, path) = write_tmp("lv_label 10 20 30 40\nlv_btn 1 2  3 4\n");
        let replaced = rewrite_class_tokens(&path, &table()).unwrap();
        assert_eq!(replaced, 2);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1 10 20 30 40\n0 1 2  3 4\n"
        );
    }

    #[test]
    fn class_rewrite_twice_is_a_noop() {
        let (_dir, path) = write_tmp("lv_label 10 20 30 40\n");
        rewrite_class_tokens(&path, &table()).unwrap();
        let once = fs::read_to_string(&path).unwrap();
        assert_eq!(rewrite_class_tokens(&path, &table()).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), once);
    }

    #[test]
    fn unknown_class_leaves_file_untouched() {
        let before = "lv_btn 1 2 3 4\nlv_slider 5 6 7 8\n";
        let (_dir, path) = write_tmp(before);
        let err = rewrite_class_tokens(&path, &table()).unwrap_err();
        match err {
            DatasetError::UnknownClass { line, token, .. } => {
                assert_eq!(line, 2);
                assert_eq!(token, "lv_slider");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn out_of_range_index_is_unknown() {
        let (_dir, path) = write_tmp("7 1 2 3 4\n");
        let err = rewrite_class_tokens(&path, &table()).unwrap_err();
        assert!(matches!(err, DatasetError::UnknownClass { .. }));
    }

    #[test]
    fn blank_lines_survive_class_rewrite() {
        let (_dir, path) = write_tmp("\n  lv_btn 1 2 3 4");
        rewrite_class_tokens(&path, &table()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "\n  0 1 2 3 4");
    }

    #[test]
    fn normalize_scales_to_center_format() {
        let (_dir, path) = write_tmp("0 100 50 50 50\n");
        let outcome = normalize_bboxes(&path, 200, 200).unwrap();
        assert_eq!(
            outcome,
            NormalizeOutcome::Normalized {
                boxes: 1,
                dropped: 0
            }
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "0 0.625000 0.375000 0.250000 0.250000\n"
        );
    }

    // The legacy tool scaled unconditionally, so a second pass shrank every box
    // again. Here the second pass is recognised and skipped.
    #[test]
    fn normalize_twice_is_a_noop() {
        let (_dir, path) = write_tmp("1 0 0 250 250\n");
        normalize_bboxes(&path, 250, 250).unwrap();
        let once = fs::read_to_string(&path).unwrap();
        assert_eq!(once, "1 0.500000 0.500000 1.000000 1.000000\n");
        let outcome = normalize_bboxes(&path, 250, 250).unwrap();
        assert_eq!(outcome, NormalizeOutcome::AlreadyNormalized { boxes: 1 });
        assert_eq!(fs::read_to_string(&path).unwrap(), once);
    }

    #[test]
    fn normalize_drops_boxes_outside_frame() {
        let (_dir, path) = write_tmp("0 10 10 20 20\n0 400 10 20 20\n");
        let outcome = normalize_bboxes(&path, 100, 100).unwrap();
        assert_eq!(
            outcome,
            NormalizeOutcome::Normalized {
                boxes: 1,
                dropped: 1
            }
        );
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn mixed_spaces_are_malformed() {
        let (_dir, path) = write_tmp("0 10 10 20 20\n0 0.5 0.5 0.1 0.1\n");
        let err = normalize_bboxes(&path, 100, 100).unwrap_err();
        assert!(matches!(err, DatasetError::MalformedAnnotation { line: 2, .. }));
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let (_dir, path) = write_tmp("0 10 10 20\n");
        let err = normalize_bboxes(&path, 100, 100).unwrap_err();
        assert!(matches!(err, DatasetError::MalformedAnnotation { line: 1, .. }));
    }

    #[test]
    fn combined_rewrite_writes_once_and_reads_back() {
        let (_dir, path) = write_tmp("lv_label 0 0 50 100\n");
        let summary = rewrite_annotation(&path, &table(), Some((100, 100))).unwrap();
        assert_eq!(summary.classes_replaced, 1);
        let boxes = read_bboxes(&path).unwrap();
        assert_eq!(
            boxes,
            vec![LabeledBbox::Normalized {
                class: 1,
                bbox: NormalizedBbox {
                    center_x: 0.25,
                    center_y: 0.5,
                    width: 0.5,
                    height: 1.0,
                },
            }]
        );
    }

    #[test]
    fn zero_frame_is_rejected() {
        let (_dir, path) = write_tmp("0 1 1 1 1\n");
        assert!(matches!(
            normalize_bboxes(&path, 0, 10),
            Err(DatasetError::InvalidConfig(_))
        ));
    }
}
