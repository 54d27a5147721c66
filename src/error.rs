use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::dataset::split::Split;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Everything that can abort a dataset run. None of these are retried.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid split ratio {ratio}: {msg}")]
    InvalidRatio { ratio: String, msg: String },
    #[error("renderer {program} failed on {sample}: {failure}")]
    ExternalProcess {
        program: PathBuf,
        sample: String,
        #[source]
        failure: ProcessFailure,
    },
    #[error("image {image} has no annotation file at {label}")]
    MissingPair { image: PathBuf, label: PathBuf },
    #[error("unknown class {token:?} at {path}:{line}")]
    UnknownClass {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("malformed annotation at {path}:{line}: {msg}")]
    MalformedAnnotation {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("split {split} holds {found} {kind} files but {expected} samples were assigned")]
    Consistency {
        split: Split,
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("yaml error at {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("directory walk failed under {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Why a single renderer invocation did not yield a sample.
#[derive(Debug, Error)]
pub enum ProcessFailure {
    #[error("could not be spawned: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("could not be awaited: {0}")]
    Wait(#[source] std::io::Error),
    #[error("exited with {0}")]
    Exit(ExitStatus),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("expected output {0} was not produced")]
    MissingOutput(PathBuf),
}

impl DatasetError {
    /// Adapter for `map_err` that attaches the path an io call was made on.
    pub fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
        move |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
