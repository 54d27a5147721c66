//! Moves the samples of a run into `<root>/<split>/{images,labels}`.
//!
//! Samples are first renamed into a hidden staging tree next to the dataset
//! root. Every rename is journaled; if anything fails before the commit the
//! journal is replayed backwards, so each sample is back where the renderer
//! left it and no dataset root exists. The commit is a single directory rename.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::dataset::common_structs::Sample;
use crate::dataset::split::{partition, Partition, Split, SplitRatio};
use crate::error::{DatasetError, DatasetResult};

const STAGING_PREFIX: &str = ".staging-";

/// Directory layout of an assembled dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> DatasetLayout {
        DatasetLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<split>/images`, relative to the root.
    pub fn relative_images_dir(split: Split) -> PathBuf {
        Path::new(split.name()).join("images")
    }

    pub fn relative_labels_dir(split: Split) -> PathBuf {
        Path::new(split.name()).join("labels")
    }

    pub fn images_dir(&self, split: Split) -> PathBuf {
        self.root.join(DatasetLayout::relative_images_dir(split))
    }

    pub fn labels_dir(&self, split: Split) -> PathBuf {
        self.root.join(DatasetLayout::relative_labels_dir(split))
    }

    fn create_dirs(&self) -> DatasetResult<()> {
        for split in Split::ALL.iter() {
            for dir in [self.images_dir(*split), self.labels_dir(*split)] {
                fs::create_dir_all(&dir).map_err(DatasetError::io_at(&dir))?;
            }
        }
        Ok(())
    }
}

/// The staged tree handed to the manifest step before the commit.
pub struct StagedDataset<'a> {
    /// Where the files are right now.
    pub staging: &'a DatasetLayout,
    /// Where they will be once committed.
    pub target: &'a DatasetLayout,
    /// Samples with their post-commit paths.
    pub partition: &'a Partition<Sample>,
    pub seed: u64,
}

#[derive(Debug)]
pub struct AssembledDataset {
    pub layout: DatasetLayout,
    pub partition: Partition<Sample>,
    pub seed: u64,
}

pub struct SplitAssembler {
    ratio: SplitRatio,
    seed: u64,
}

impl SplitAssembler {
    pub fn new(ratio: SplitRatio, seed: u64) -> SplitAssembler {
        SplitAssembler { ratio, seed }
    }

    /// Partition `samples` and move them under `dataset_root`.
    ///
    /// `finish` runs against the staged tree and may write extra files into it
    /// (manifests). An error from `finish` undoes the whole assembly.
    pub fn assemble<F, T>(
        &self,
        samples: Vec<Sample>,
        dataset_root: &Path,
        finish: F,
    ) -> DatasetResult<(AssembledDataset, T)>
    where
        F: FnOnce(&StagedDataset) -> DatasetResult<T>,
    {
        if dataset_root.exists() {
            return Err(DatasetError::InvalidConfig(format!(
                "dataset root {} already exists, refusing to overwrite it",
                dataset_root.display()
            )));
        }
        check_samples(&samples)?;

        let parent = match dataset_root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(DatasetError::io_at(&parent))?;
        let staging_dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(DatasetError::io_at(&parent))?;
        let staging = DatasetLayout::new(staging_dir.path());
        staging.create_dirs()?;
        let target = DatasetLayout::new(dataset_root);

        let total = samples.len();
        let staged_partition = partition(samples, &self.ratio, self.seed);
        info!(
            "assembling {} samples (train {}, val {}, test {}) in {}",
            total,
            staged_partition.train.len(),
            staged_partition.val.len(),
            staged_partition.test.len(),
            staging.root().display()
        );

        let mut journal = MoveJournal::default();
        let result = move_into(&staged_partition, &staging, &mut journal)
            .and_then(|_| {
                let final_partition = relocate_partition(&staged_partition, &target);
                let staged = StagedDataset {
                    staging: &staging,
                    target: &target,
                    partition: &final_partition,
                    seed: self.seed,
                };
                let extra = finish(&staged)?;
                Ok((final_partition, extra))
            })
            .and_then(|out| {
                fs::rename(staging.root(), target.root())
                    .map_err(DatasetError::io_at(target.root()))?;
                Ok(out)
            });

        match result {
            Ok((final_partition, extra)) => {
                // the staging path is gone, nothing left for the guard to remove
                let _ = staging_dir.keep();
                info!("dataset committed to {}", target.root().display());
                Ok((
                    AssembledDataset {
                        layout: target,
                        partition: final_partition,
                        seed: self.seed,
                    },
                    extra,
                ))
            }
            Err(err) => {
                error!("assembly failed, restoring samples: {}", err);
                if !journal.rollback() {
                    let kept = staging_dir.keep();
                    error!(
                        "some samples could not be restored, staging tree kept at {}",
                        kept.display()
                    );
                }
                Err(err)
            }
        }
    }
}

fn check_samples(samples: &[Sample]) -> DatasetResult<()> {
    let mut names = HashSet::new();
    for sample in samples {
        sample.check_pair()?;
        if !names.insert(sample.base_name()) {
            return Err(DatasetError::InvalidConfig(format!(
                "two samples share the base name {:?}",
                sample.base_name()
            )));
        }
    }
    Ok(())
}

fn move_into(
    staged: &Partition<Sample>,
    staging: &DatasetLayout,
    journal: &mut MoveJournal,
) -> DatasetResult<()> {
    for (split, samples) in staged.iter() {
        let image_dir = staging.images_dir(split);
        let label_dir = staging.labels_dir(split);
        for sample in samples {
            let dest = sample.relocated(&image_dir, &label_dir);
            journal
                .rename(sample.image(), dest.image())
                .map_err(DatasetError::io_at(sample.image()))?;
            journal.rename(sample.label(), dest.label()).map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    DatasetError::MissingPair {
                        image: sample.image().to_path_buf(),
                        label: sample.label().to_path_buf(),
                    }
                } else {
                    DatasetError::Io {
                        path: sample.label().to_path_buf(),
                        source,
                    }
                }
            })?;
            debug!("{} -> {}", sample.base_name(), split);
        }
    }
    Ok(())
}

fn relocate_partition(staged: &Partition<Sample>, target: &DatasetLayout) -> Partition<Sample> {
    let relocate = |split: Split| -> Vec<Sample> {
        staged
            .get(split)
            .iter()
            .map(|s| s.relocated(&target.images_dir(split), &target.labels_dir(split)))
            .collect()
    };
    Partition {
        train: relocate(Split::Train),
        val: relocate(Split::Val),
        test: relocate(Split::Test),
    }
}

/// Renames performed so far, so they can be undone in reverse order.
#[derive(Default)]
struct MoveJournal {
    moves: Vec<(PathBuf, PathBuf)>,
}

impl MoveJournal {
    fn rename(&mut self, from: &Path, to: &Path) -> std::io::Result<()> {
        fs::rename(from, to)?;
        self.moves.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    /// True if every move was undone.
    fn rollback(self) -> bool {
        let mut clean = true;
        for (from, to) in self.moves.into_iter().rev() {
            if let Err(err) = fs::rename(&to, &from) {
                error!(
                    "could not move {} back to {}: {}",
                    to.display(),
                    from.display(),
                    err
                );
                clean = false;
            }
        }
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_samples(dir: &Path, n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let image = dir.join(format!("ui_button_{}.jpg", i));
                fs::write(&image, b"jpg").unwrap();
                fs::write(image.with_extension("txt"), format!("0 {} 1 1 1\n", i)).unwrap();
                Sample::from_image(image)
            })
            .collect()
    }

    #[test]
    fn pairs_land_in_the_same_split() {
        let dir = tempfile::tempdir().unwrap();
        let samples = make_samples(dir.path(), 10);
        let root = dir.path().join("custom");
        let assembler = SplitAssembler::new(SplitRatio::default(), 7);
        let (dataset, ()) = assembler.assemble(samples, &root, |_| Ok(())).unwrap();

        assert_eq!(dataset.partition.train.len(), 7);
        assert_eq!(dataset.partition.val.len(), 1);
        assert_eq!(dataset.partition.test.len(), 2);
        for (split, samples) in dataset.partition.iter() {
            for sample in samples {
                assert!(sample.image().starts_with(root.join(split.name()).join("images")));
                assert!(sample.image().is_file());
                assert!(sample.label().starts_with(root.join(split.name()).join("labels")));
                assert!(sample.label().is_file());
            }
        }
        // nothing left behind in the output folder besides the dataset root
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn missing_label_aborts_before_anything_moves() {
        let dir = tempfile::tempdir().unwrap();
        let samples = make_samples(dir.path(), 5);
        fs::remove_file(samples[3].label()).unwrap();
        let root = dir.path().join("custom");
        let err = SplitAssembler::new(SplitRatio::default(), 1)
            .assemble(samples.clone(), &root, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DatasetError::MissingPair { .. }));
        assert!(!root.exists());
        for sample in samples.iter().filter(|s| s.base_name() != "ui_button_3") {
            assert!(sample.image().is_file());
            assert!(sample.label().is_file());
        }
    }

    #[test]
    fn failing_finish_restores_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let samples = make_samples(dir.path(), 6);
        let root = dir.path().join("custom");
        let err = SplitAssembler::new(SplitRatio::default(), 3)
            .assemble(samples.clone(), &root, |_| -> DatasetResult<()> {
                Err(DatasetError::InvalidConfig("boom".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidConfig(_)));
        assert!(!root.exists());
        for sample in &samples {
            assert!(sample.image().is_file());
            assert!(sample.label().is_file());
        }
        // staging tree discarded
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(STAGING_PREFIX)));
    }

    #[test]
    fn existing_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let samples = make_samples(dir.path(), 2);
        let root = dir.path().join("custom");
        fs::create_dir(&root).unwrap();
        let err = SplitAssembler::new(SplitRatio::default(), 3)
            .assemble(samples, &root, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidConfig(_)));
    }

    #[test]
    fn finish_sees_staged_files_and_final_paths() {
        let dir = tempfile::tempdir().unwrap();
        let samples = make_samples(dir.path(), 4);
        let root = dir.path().join("custom");
        SplitAssembler::new(SplitRatio::new(0.5, 0.5, 0.0).unwrap(), 9)
            .assemble(samples, &root, |staged| {
                assert_eq!(staged.target.root(), root.as_path());
                for (split, samples) in staged.partition.iter() {
                    for sample in samples {
                        assert!(sample.image().starts_with(&root));
                        let file_name = sample.image().file_name().unwrap();
                        assert!(staged.staging.images_dir(split).join(file_name).is_file());
                    }
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn empty_run_still_builds_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("custom");
        let (dataset, ()) = SplitAssembler::new(SplitRatio::default(), 0)
            .assemble(vec![], &root, |_| Ok(()))
            .unwrap();
        assert!(dataset.partition.is_empty());
        assert!(root.join("test").join("labels").is_dir());
    }
}
