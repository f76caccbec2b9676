//! # encpoolctl
//!
//! Operator tool for the encpool dispatcher: prints the effective
//! configuration, drives the session manager with simulated encoders, and
//! runs one-off transcodes through ffmpeg on the configured device pool.

mod cli;
mod simulate;
mod transcode;

use anyhow::Context;
use clap::Parser;
use encpool_core::{BalancerConfig, ConfigSource};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, GlobalArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Quiet by default. Override via RUST_LOG, e.g. encpool::session=debug.
                "warn,encpoolctl=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = env_file {
        info!(path = %path.display(), "loaded .env file");
    }

    let (config, source) = load_config(&cli.global)?;
    info!(%source, "configuration loaded");

    match cli.command {
        Command::Config(args) => print_config(&config, &source, args.json),
        Command::Simulate(args) => simulate::run(&config, args).await,
        Command::Transcode(args) => transcode::run(&config, args).await,
    }
}

fn load_config(global: &GlobalArgs) -> anyhow::Result<(BalancerConfig, ConfigSource)> {
    let (mut config, source) = match &global.config {
        Some(path) => {
            let config = BalancerConfig::load_from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            (config, ConfigSource::File(path.clone()))
        }
        None => BalancerConfig::load_from_env().context("failed to load configuration")?,
    };

    if let Some(devices) = &global.devices {
        config.devices = vec![devices.clone()];
    }
    if let Some(chooser) = global.chooser {
        config.chooser = chooser;
    }
    if let Some(idle) = global.idle_timeout {
        config.idle_timeout_ms = u64::try_from(idle.as_millis())
            .context("idle timeout does not fit in milliseconds")?;
    }
    if let Some(penalty) = global.affinity_penalty {
        config.affinity_penalty = penalty;
    }

    config.validate().context("invalid configuration")?;
    Ok((config, source))
}

fn print_config(config: &BalancerConfig, source: &ConfigSource, json: bool) -> anyhow::Result<()> {
    if json {
        let rendered = serde_json::json!({
            "source": source.to_string(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    let pool = config.validate()?;
    println!("# source: {source}");
    for device in pool.iter() {
        println!("# device {}: {}", device.id, device.target);
    }
    print!("{}", toml::to_string_pretty(config).context("failed to render config")?);
    Ok(())
}
