use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use facefind::{config, index, server, MatchOptions, MatchService, VisionCapability};
use log::info;

#[derive(Parser)]
#[command(name = "facefind")]
#[command(
    version,
    about = "Identify faces against a directory of labelled reference photos",
    disable_help_flag = true
)]
struct Cli {
    /// Address to bind
    #[arg(short = 'h', long)]
    host: String,
    /// Port to bind
    #[arg(short, long)]
    port: u16,
    /// Directory of reference photos named `<label>-<n>.jpg`
    #[arg(short, long, value_parser = existing_dir)]
    dir: PathBuf,
    /// Config file (defaults to the installed location)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

fn existing_dir(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("directory {} does not exist", raw))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    let capability = VisionCapability::load(&cfg)?;
    let index = index::train(&cli.dir, &capability, cfg.dimension, cfg.multi_face)
        .context("Training failed")?;

    let service = Arc::new(MatchService::new(
        index,
        Arc::new(capability),
        MatchOptions::from(&cfg),
    ));
    info!(
        "Serving {} identities (threshold {:.3})",
        service.index().labels().len(),
        cfg.threshold
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(server::serve(
        &cli.host,
        cli.port,
        service,
        cfg.max_body_bytes,
    ))
}
