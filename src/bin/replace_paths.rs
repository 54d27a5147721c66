use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use uicapture::config::{ConfigFile, RewriteSettings};
use uicapture::dataset::path_rewriter::{PrefixPair, SubstitutionMode};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Rewrite an absolute path prefix in dataset descriptor files"
)]
struct Args {
    /// Directory to search recursively.
    #[arg(long)]
    root: PathBuf,
    /// Prefix to replace.
    #[arg(long)]
    old: String,
    /// Replacement prefix.
    #[arg(long)]
    new: String,
    /// Directory names not descended into (repeatable). Replaces the defaults.
    #[arg(long = "skip-dir")]
    skip_dirs: Vec<String>,
    /// File names left untouched (repeatable). Replaces the defaults.
    #[arg(long = "skip-file")]
    skip_files: Vec<String>,
    /// Extensions of the files to rewrite (repeatable). Replaces the defaults.
    #[arg(long = "extension")]
    extensions: Vec<String>,
    /// Plain substring replacement, also inside longer path components.
    #[arg(long)]
    literal: bool,
    /// TOML config file with a [path_rewrite] section.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    uicapture::logging::init();
    let args = Args::parse();

    let mut settings = RewriteSettings::default();
    if let Some(section) = ConfigFile::discover(args.config.as_deref())
        .context("loading config file")?
        .and_then(|file| file.path_rewrite)
    {
        settings.skip_dirs = section.skip_dirs.unwrap_or(settings.skip_dirs);
        settings.skip_files = section.skip_files.unwrap_or(settings.skip_files);
        settings.extensions = section.extensions.unwrap_or(settings.extensions);
    }
    if !args.skip_dirs.is_empty() {
        settings.skip_dirs = args.skip_dirs;
    }
    if !args.skip_files.is_empty() {
        settings.skip_files = args.skip_files;
    }
    if !args.extensions.is_empty() {
        settings.extensions = args.extensions;
    }

    let pair = PrefixPair::new(args.old, args.new).context("invalid prefix pair")?;
    let mode = if args.literal {
        SubstitutionMode::Literal
    } else {
        SubstitutionMode::Token
    };
    let rewritten = settings
        .rewriter(pair)
        .mode(mode)
        .rewrite_tree(&args.root)
        .with_context(|| format!("rewriting paths under {}", args.root.display()))?;
    for file in &rewritten {
        info!("{}: {} replacements", file.path.display(), file.replacements);
    }
    Ok(())
}
