use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::info;

use uicapture::capture::renderer::ProcessRenderer;
use uicapture::capture::CaptureDriver;
use uicapture::config::{CaptureConfig, CaptureOverrides, ConfigFile, WidgetCount};
use uicapture::dataset::class_table::WidgetKind;
use uicapture::dataset::split::SplitRatio;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Render random UI screens and assemble them into a YOLO dataset"
)]
#[command(group(ArgGroup::new("count").required(true).args(["single", "multi"])))]
struct Args {
    /// Path to the UI generator binary.
    #[arg(short = 'p', long)]
    app_path: Option<PathBuf>,
    /// Screens to render (per widget type with --split-widgets).
    #[arg(short, long)]
    iterations: Option<usize>,
    /// Widget types to place on the screens.
    #[arg(short = 't', long, num_args = 1.., required = true, value_enum)]
    widget_types: Vec<WidgetKind>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Folder the renderer writes into; the dataset is created inside it.
    #[arg(short, long)]
    output_folder: Option<PathBuf>,
    /// Timer ticks before the screen is captured.
    #[arg(short, long)]
    delay_count: Option<u32>,
    /// One widget per screen.
    #[arg(short, long)]
    single: bool,
    /// N widgets per screen.
    #[arg(short, long, value_name = "N")]
    multi: Option<u32>,
    /// Render each widget type on its own screens.
    #[arg(long)]
    split_widgets: bool,
    /// Renderer layout (none, grid, flex).
    #[arg(short, long)]
    layout: Option<String>,
    /// Train, val and test shares, e.g. "0.7,0.1,0.2".
    #[arg(short = 'r', long)]
    split_ratio: Option<SplitRatio>,
    /// Seed for the split shuffle; random and logged when absent.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(short = 'n', long)]
    dataset_name: Option<String>,
    /// Kill the renderer after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Rewrite the OLD path prefix to NEW in list and .data files.
    #[arg(long, num_args = 2, value_names = ["OLD", "NEW"])]
    replace: Option<Vec<String>>,
    /// TOML config file, defaults to $UICAPTURE_CONFIG or ./uicapture.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn overrides(self) -> CaptureOverrides {
        let widget_count = match (self.single, self.multi) {
            (_, Some(n)) => Some(WidgetCount::Multi(n)),
            (true, None) => Some(WidgetCount::Single),
            (false, None) => None,
        };
        let replace = self.replace.and_then(|pair| match pair.as_slice() {
            [old, new] => Some((old.clone(), new.clone())),
            _ => None,
        });
        CaptureOverrides {
            app_path: self.app_path,
            output_folder: self.output_folder,
            width: self.width,
            height: self.height,
            iterations: self.iterations,
            widgets: self.widget_types,
            widget_count,
            delay_count: self.delay_count,
            split_widgets: self.split_widgets,
            layout: self.layout,
            split_ratio: self.split_ratio,
            seed: self.seed,
            dataset_name: self.dataset_name,
            timeout_secs: self.timeout_secs,
            replace,
        }
    }
}

fn main() -> Result<()> {
    uicapture::logging::init();
    let args = Args::parse();
    let file = ConfigFile::discover(args.config.as_deref()).context("loading config file")?;
    let mut config =
        CaptureConfig::resolve(args.overrides(), file).context("invalid capture settings")?;
    config.app_path = std::fs::canonicalize(&config.app_path)
        .with_context(|| format!("renderer {} not found", config.app_path.display()))?;
    config.output_folder = absolute(&config.output_folder)?;

    let renderer = ProcessRenderer::new(&config.app_path, config.timeout);
    let mut driver = CaptureDriver::new(config, renderer);
    let outcome = driver
        .run()
        .with_context(|| format!("capture run failed in state {:?}", driver.state()))?;

    info!(
        "{} samples (train {}, val {}, test {}), seed {}",
        outcome.dataset.partition.len(),
        outcome.dataset.partition.train.len(),
        outcome.dataset.partition.val.len(),
        outcome.dataset.partition.test.len(),
        outcome.dataset.seed
    );
    info!("manifest: {}", outcome.manifest.yaml.display());
    Ok(())
}

fn absolute(path: &std::path::Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("reading the working directory")?;
    Ok(cwd.join(path))
}
