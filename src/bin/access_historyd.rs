use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::env;
use std::path::PathBuf;

use access_history::config::{ConfigFile, DEFAULT_CONFIG_PATH};
use access_history::{signal, Daemon, JsonlChangelog, StopToken, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "access-historyd")]
#[command(about = "Keeps an epoch-aged access history of filesystem objects")]
struct Cli {
    /// YAML configuration file
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Root of the history tree (overrides base_dir)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Device whose change log is consumed (overrides device)
    #[arg(long)]
    device: Option<String>,

    /// Registered change-log consumer (overrides consumer)
    #[arg(long)]
    consumer: Option<String>,

    /// Window length in seconds (overrides interval_secs)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Advance and reclaim once, then exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let file = ConfigFile::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    let overrides = ConfigFile {
        base_dir: cli.base_dir,
        device: cli.device,
        consumer: cli.consumer,
        interval_secs: cli.interval_secs,
        ..ConfigFile::default()
    };
    let cwd = env::current_dir().context("failed to read working directory")?;
    let config = file.merge(overrides).resolve(&cwd)?;

    info!(
        "base_dir={} device={} consumer={} interval={}s",
        config.base_dir.display(),
        config.device,
        config.consumer,
        config.interval.as_secs()
    );

    let source = JsonlChangelog::new(&config.changelog_dir);
    let daemon = Daemon::new(config, source, SystemClock).context("failed to prepare base_dir")?;

    if cli.once {
        let (report, stats) = daemon.run_once()?;
        info!(
            "window {:?}: {} to secondary, {} to inactive; reclaim: {}",
            report.opened,
            report.to_secondary.len(),
            report.to_inactive.len(),
            stats.summary()
        );
        return Ok(());
    }

    signal::install_stop_handlers().context("failed to install signal handlers")?;
    let stop = StopToken::new();
    daemon.run(&stop, signal::stop_requested)?;
    if let Some(signum) = signal::last_signal() {
        info!("exited on signal {signum}");
    }
    Ok(())
}
