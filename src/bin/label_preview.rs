use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use uicapture::dataset::manifest::DatasetManifest;
use uicapture::dataset::split::Split;
use uicapture::preview::render_split_previews;

#[derive(Parser, Debug)]
#[command(author, version, about = "Draw dataset labels onto their images")]
struct Args {
    /// The dataset `<name>.yaml`.
    #[arg(long)]
    dataset: PathBuf,
    #[arg(long, default_value_t = Split::Train)]
    split: Split,
    /// Where the previews are written.
    #[arg(long)]
    out: PathBuf,
    /// At most this many images.
    #[arg(long)]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    uicapture::logging::init();
    let args = Args::parse();
    let manifest = DatasetManifest::load(&args.dataset)
        .with_context(|| format!("reading {}", args.dataset.display()))?;
    render_split_previews(&manifest, args.split, &args.out, args.limit)
        .with_context(|| format!("previewing split {}", args.split))?;
    Ok(())
}
