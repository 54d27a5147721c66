//! Run configuration: built-in defaults, then an optional TOML file, then
//! command line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::dataset::class_table::{ClassTable, WidgetKind};
use crate::dataset::manifest::CLASSES_FILE;
use crate::dataset::path_rewriter::{
    PathRewriter, PrefixPair, DEFAULT_EXTENSIONS, DEFAULT_SKIP_DIRS,
};
use crate::dataset::split::SplitRatio;
use crate::error::{DatasetError, DatasetResult};

pub const DEFAULT_CONFIG_FILE: &str = "uicapture.toml";
pub const CONFIG_ENV: &str = "UICAPTURE_CONFIG";

pub const DEFAULT_WIDTH: u32 = 250;
pub const DEFAULT_HEIGHT: u32 = 250;
pub const DEFAULT_ITERATIONS: usize = 10;
pub const DEFAULT_DELAY_COUNT: u32 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_DATASET_NAME: &str = "custom";

/// How many widgets the renderer places on each screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetCount {
    Single,
    Multi(u32),
}

impl WidgetCount {
    pub fn count(self) -> u32 {
        match self {
            WidgetCount::Single => 1,
            WidgetCount::Multi(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteSettings {
    pub skip_dirs: Vec<String>,
    pub skip_files: Vec<String>,
    pub extensions: Vec<String>,
}

impl Default for RewriteSettings {
    fn default() -> Self {
        RewriteSettings {
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
            skip_files: vec![CLASSES_FILE.to_string()],
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RewriteSettings {
    pub fn rewriter(&self, pair: PrefixPair) -> PathRewriter {
        PathRewriter::new(pair)
            .skip_dirs(self.skip_dirs.clone())
            .skip_files(self.skip_files.clone())
            .extensions(self.extensions.clone())
    }
}

/// Everything a capture run needs, validated.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub app_path: PathBuf,
    pub output_folder: PathBuf,
    pub width: u32,
    pub height: u32,
    pub iterations: usize,
    pub widgets: Vec<WidgetKind>,
    pub widget_count: WidgetCount,
    pub delay_count: u32,
    pub split_widgets: bool,
    pub layout: Option<String>,
    pub split_ratio: SplitRatio,
    pub seed: Option<u64>,
    pub dataset_name: String,
    pub timeout: Duration,
    pub list_prefix: Option<PrefixPair>,
    pub rewrite: RewriteSettings,
}

impl CaptureConfig {
    pub fn dataset_root(&self) -> PathBuf {
        self.output_folder.join(&self.dataset_name)
    }

    pub fn class_table(&self) -> DatasetResult<ClassTable> {
        ClassTable::from_widgets(&self.widgets)
    }

    /// Apply `overrides` on top of `file` on top of the defaults.
    pub fn resolve(
        overrides: CaptureOverrides,
        file: Option<ConfigFile>,
    ) -> DatasetResult<CaptureConfig> {
        let file = file.unwrap_or_default();
        let invalid = |msg: &str| DatasetError::InvalidConfig(msg.to_string());

        let app_path = overrides
            .app_path
            .or(file.app_path)
            .ok_or_else(|| invalid("the renderer path is required (--app-path)"))?;
        let output_folder = overrides
            .output_folder
            .or(file.output_folder)
            .ok_or_else(|| invalid("the output folder is required (--output-folder)"))?;

        if overrides.widgets.is_empty() {
            return Err(invalid("at least one widget type is required"));
        }
        let widget_count = overrides
            .widget_count
            .ok_or_else(|| invalid("one of --single or --multi is required"))?;
        if widget_count.count() == 0 {
            return Err(invalid("--multi needs at least one widget per screen"));
        }

        let width = overrides.width.or(file.width).unwrap_or(DEFAULT_WIDTH);
        let height = overrides.height.or(file.height).unwrap_or(DEFAULT_HEIGHT);
        if width == 0 || height == 0 {
            return Err(invalid("width and height must be positive"));
        }

        let split_ratio = match (overrides.split_ratio, file.split_ratio) {
            (Some(ratio), _) => ratio,
            (None, Some(raw)) => raw.parse()?,
            (None, None) => SplitRatio::default(),
        };

        let dataset_name = overrides
            .dataset_name
            .or(file.dataset_name)
            .unwrap_or_else(|| DEFAULT_DATASET_NAME.to_string());
        if dataset_name.is_empty()
            || dataset_name.starts_with('.')
            || dataset_name.contains(['/', '\\'])
        {
            return Err(DatasetError::InvalidConfig(format!(
                "dataset name {:?} must be a plain directory name",
                dataset_name
            )));
        }

        let timeout_secs = overrides
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT.as_secs());
        if timeout_secs == 0 {
            return Err(invalid("the renderer timeout must be at least one second"));
        }

        let list_prefix = match overrides.replace {
            Some((old, new)) => Some(PrefixPair::new(old, new)?),
            None => None,
        };

        let mut rewrite = RewriteSettings::default();
        if let Some(section) = file.path_rewrite {
            if let Some(dirs) = section.skip_dirs {
                rewrite.skip_dirs = dirs;
            }
            if let Some(files) = section.skip_files {
                rewrite.skip_files = files;
            }
            if let Some(extensions) = section.extensions {
                rewrite.extensions = extensions;
            }
        }

        let config = CaptureConfig {
            app_path,
            output_folder,
            width,
            height,
            iterations: overrides
                .iterations
                .or(file.iterations)
                .unwrap_or(DEFAULT_ITERATIONS),
            widgets: overrides.widgets,
            widget_count,
            delay_count: overrides
                .delay_count
                .or(file.delay_count)
                .unwrap_or(DEFAULT_DELAY_COUNT),
            split_widgets: overrides.split_widgets,
            layout: overrides.layout.or(file.layout),
            split_ratio,
            seed: overrides.seed.or(file.seed),
            dataset_name,
            timeout: Duration::from_secs(timeout_secs),
            list_prefix,
            rewrite,
        };
        // duplicate widget types
        config.class_table()?;
        Ok(config)
    }
}

/// Values given on the command line. `None` falls through to the file.
#[derive(Debug, Clone, Default)]
pub struct CaptureOverrides {
    pub app_path: Option<PathBuf>,
    pub output_folder: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub iterations: Option<usize>,
    pub widgets: Vec<WidgetKind>,
    pub widget_count: Option<WidgetCount>,
    pub delay_count: Option<u32>,
    pub split_widgets: bool,
    pub layout: Option<String>,
    pub split_ratio: Option<SplitRatio>,
    pub seed: Option<u64>,
    pub dataset_name: Option<String>,
    pub timeout_secs: Option<u64>,
    pub replace: Option<(String, String)>,
}

/// `uicapture.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub app_path: Option<PathBuf>,
    pub output_folder: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub iterations: Option<usize>,
    pub delay_count: Option<u32>,
    pub layout: Option<String>,
    pub timeout_secs: Option<u64>,
    /// `"train,val,test"`
    pub split_ratio: Option<String>,
    pub seed: Option<u64>,
    pub dataset_name: Option<String>,
    pub path_rewrite: Option<PathRewriteSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathRewriteSection {
    pub skip_dirs: Option<Vec<String>>,
    pub skip_files: Option<Vec<String>>,
    pub extensions: Option<Vec<String>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> DatasetResult<ConfigFile> {
        let raw = fs::read_to_string(path).map_err(DatasetError::io_at(path))?;
        ConfigFile::parse(&raw).map_err(|msg| {
            DatasetError::InvalidConfig(format!("{}: {}", path.display(), msg))
        })
    }

    pub fn parse(raw: &str) -> Result<ConfigFile, String> {
        toml::from_str(raw).map_err(|err| err.to_string())
    }

    /// An explicit path must exist, then `$UICAPTURE_CONFIG` must exist,
    /// then `uicapture.toml` in the working directory is used if present.
    pub fn discover(explicit: Option<&Path>) -> DatasetResult<Option<ConfigFile>> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => path,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(None);
                }
                default
            }
        };
        debug!("loading config from {}", path.display());
        ConfigFile::load(&path).map(Some)
    }
}
