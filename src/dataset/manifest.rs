use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::atomic::write_atomic;
use crate::dataset::class_table::ClassTable;
use crate::dataset::common_structs::Sample;
use crate::dataset::path_rewriter::PrefixPair;
use crate::dataset::split::{Split, SplitRatio};
use crate::dataset::split_assembler::{DatasetLayout, StagedDataset};
use crate::error::{DatasetError, DatasetResult};

pub const CLASSES_FILE: &str = "classes.names";
pub const REPORT_FILE: &str = "run.json";

/// The structured descriptor a trainer is pointed at (`<name>.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Dataset root, the split directories are relative to it.
    pub path: PathBuf,
    pub train: PathBuf,
    pub val: PathBuf,
    pub test: PathBuf,
    pub names: BTreeMap<usize, String>,
}

impl DatasetManifest {
    pub fn new(target: &DatasetLayout, classes: &ClassTable) -> DatasetManifest {
        DatasetManifest {
            path: target.root().to_path_buf(),
            train: DatasetLayout::relative_images_dir(Split::Train),
            val: DatasetLayout::relative_images_dir(Split::Val),
            test: DatasetLayout::relative_images_dir(Split::Test),
            names: classes.to_index_map(),
        }
    }

    pub fn load(path: &Path) -> DatasetResult<DatasetManifest> {
        let raw = fs::read_to_string(path).map_err(DatasetError::io_at(path))?;
        serde_yaml::from_str(&raw).map_err(|source| DatasetError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn images_dir(&self, split: Split) -> PathBuf {
        let rel = match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        };
        self.path.join(rel)
    }

    /// Labels sit beside the images directory.
    pub fn labels_dir(&self, split: Split) -> PathBuf {
        let images = self.images_dir(split);
        match images.parent() {
            Some(parent) => parent.join("labels"),
            None => PathBuf::from("labels"),
        }
    }
}

/// Summary of one run, written next to the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub dataset: PathBuf,
    pub seed: u64,
    pub ratio: SplitRatio,
    pub renderer_invocations: usize,
    pub classes: Vec<String>,
    /// Keyed by split name.
    pub counts: BTreeMap<String, usize>,
    pub samples: BTreeMap<String, Vec<String>>,
}

impl RunReport {
    pub fn new(
        staged: &StagedDataset,
        classes: &ClassTable,
        ratio: SplitRatio,
        renderer_invocations: usize,
    ) -> RunReport {
        let mut counts = BTreeMap::new();
        let mut samples = BTreeMap::new();
        for (split, split_samples) in staged.partition.iter() {
            counts.insert(split.name().to_string(), split_samples.len());
            let mut names: Vec<String> = split_samples.iter().map(Sample::base_name).collect();
            names.sort();
            samples.insert(split.name().to_string(), names);
        }
        RunReport {
            dataset: staged.target.root().to_path_buf(),
            seed: staged.seed,
            ratio,
            renderer_invocations,
            classes: classes.names().to_vec(),
            counts,
            samples,
        }
    }
}

/// Final locations of everything the writer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFiles {
    pub classes: PathBuf,
    pub yaml: PathBuf,
    pub data: PathBuf,
    pub lists: Vec<PathBuf>,
    pub report: PathBuf,
}

pub struct ManifestWriter<'a> {
    name: &'a str,
    classes: &'a ClassTable,
    list_prefix: Option<&'a PrefixPair>,
}

impl<'a> ManifestWriter<'a> {
    pub fn new(name: &'a str, classes: &'a ClassTable) -> ManifestWriter<'a> {
        ManifestWriter {
            name,
            classes,
            list_prefix: None,
        }
    }

    /// Rewrite the image paths of the list files and the yaml dataset root
    /// for another filesystem root.
    pub fn with_list_prefix(mut self, prefix: Option<&'a PrefixPair>) -> ManifestWriter<'a> {
        self.list_prefix = prefix;
        self
    }

    /// Check the staged tree against the partition, then write every
    /// descriptor into it. Paths inside the files point at the target root.
    pub fn write(&self, staged: &StagedDataset, report: &RunReport) -> DatasetResult<ManifestFiles> {
        check_counts(staged)?;

        let staging = staged.staging.root();
        let target = staged.target.root();

        let names = self
            .classes
            .names()
            .iter()
            .map(|n| format!("{}\n", n))
            .collect::<String>();
        write_atomic(&staging.join(CLASSES_FILE), names.as_bytes())?;

        let mut manifest = DatasetManifest::new(staged.target, self.classes);
        if let Some(prefix) = self.list_prefix {
            manifest.path = prefix.apply_to_path(&manifest.path);
        }
        let yaml_name = format!("{}.yaml", self.name);
        let yaml = serde_yaml::to_string(&manifest).map_err(|source| DatasetError::Yaml {
            path: target.join(&yaml_name),
            source,
        })?;
        write_atomic(&staging.join(&yaml_name), yaml.as_bytes())?;

        let mut lists = vec![];
        for (split, samples) in staged.partition.iter() {
            let list_name = format!("{}.txt", split.name());
            write_atomic(
                &staging.join(&list_name),
                self.list_contents(samples).as_bytes(),
            )?;
            lists.push(target.join(list_name));
        }

        let data_name = format!("{}.data", self.name);
        let data = format!(
            "classes={}\ntrain={}\nvalid={}\ntest={}\nnames={}\n",
            self.classes.len(),
            target.join("train.txt").display(),
            target.join("val.txt").display(),
            target.join("test.txt").display(),
            target.join(CLASSES_FILE).display(),
        );
        write_atomic(&staging.join(&data_name), data.as_bytes())?;

        let report_json =
            serde_json::to_vec_pretty(report).map_err(|source| DatasetError::Json {
                path: target.join(REPORT_FILE),
                source,
            })?;
        write_atomic(&staging.join(REPORT_FILE), &report_json)?;

        info!(
            "manifest {} written for {} classes",
            target.join(&yaml_name).display(),
            self.classes.len()
        );
        Ok(ManifestFiles {
            classes: target.join(CLASSES_FILE),
            yaml: target.join(yaml_name),
            data: target.join(data_name),
            lists,
            report: target.join(REPORT_FILE),
        })
    }

    fn list_contents(&self, samples: &[Sample]) -> String {
        let mut paths: Vec<PathBuf> = samples
            .iter()
            .map(|s| match self.list_prefix {
                Some(prefix) => prefix.apply_to_path(s.image()),
                None => s.image().to_path_buf(),
            })
            .collect();
        paths.sort();
        paths
            .iter()
            .map(|p| format!("{}\n", p.display()))
            .collect()
    }
}

/// Every split directory must hold exactly the samples assigned to it.
fn check_counts(staged: &StagedDataset) -> DatasetResult<()> {
    for (split, samples) in staged.partition.iter() {
        for (kind, dir) in [
            ("image", staged.staging.images_dir(split)),
            ("label", staged.staging.labels_dir(split)),
        ] {
            let found = count_files(&dir)?;
            if found != samples.len() {
                return Err(DatasetError::Consistency {
                    split,
                    kind,
                    expected: samples.len(),
                    found,
                });
            }
        }
        for sample in samples {
            let image = staged.staging.images_dir(split).join(file_name(sample.image()));
            let label = staged.staging.labels_dir(split).join(file_name(sample.label()));
            if !image.is_file() || !label.is_file() {
                return Err(DatasetError::MissingPair { image, label });
            }
        }
    }
    Ok(())
}

fn count_files(dir: &Path) -> DatasetResult<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir).map_err(DatasetError::io_at(dir))? {
        let entry = entry.map_err(DatasetError::io_at(dir))?;
        if entry.path().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

fn file_name(path: &Path) -> &std::ffi::OsStr {
    path.file_name().unwrap_or_default()
}
