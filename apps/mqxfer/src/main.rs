//! mqxfer entry point.
//!
//! Usage: `mqxfer <file> [config.toml]`

mod app;
mod config;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args_os().skip(1);
    let Some(file) = args.next().map(PathBuf::from) else {
        anyhow::bail!("usage: mqxfer <file> [config.toml]");
    };
    let config = match args.next() {
        Some(path) => config::Config::load(&PathBuf::from(path))?,
        None => config::Config::default(),
    };
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        topic = %config.topic,
        output_dir = %config.output_dir.display(),
        "starting mqxfer"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(app::run(config, file))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
