use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use encpool_core::ChooserKind;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "encpoolctl", version)]
#[command(about = "Inspect and exercise a session-affine transcoding device pool")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (TOML or JSON). Defaults to $ENCPOOL_CONFIG_PATH, then
    /// $ENCPOOL_CONFIG_JSON, then ./encpool.toml and friends.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Comma separated device pool, e.g. "sw,nvenc:0,vaapi:/dev/dri/renderD128"
    #[arg(long, global = true, env = "ENCPOOL_DEVICES")]
    pub devices: Option<String>,

    /// Device chooser: least_loaded or round_robin
    #[arg(long, global = true, env = "ENCPOOL_CHOOSER")]
    pub chooser: Option<ChooserKind>,

    /// Idle window before a session is reclaimed (e.g. 30s, 2m)
    #[arg(long, global = true, env = "ENCPOOL_IDLE_TIMEOUT")]
    pub idle_timeout: Option<humantime::Duration>,

    /// Cost multiplier for placing a job on a device it has no session on
    #[arg(long, global = true)]
    pub affinity_penalty: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective configuration and where it came from
    Config(ConfigArgs),
    /// Drive the session manager with simulated encoders
    Simulate(SimulateArgs),
    /// Transcode one input through ffmpeg on the configured pool
    Transcode(TranscodeArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Emit JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Segment file every simulated encode reads
    #[arg(long)]
    pub input: PathBuf,

    /// Number of concurrent jobs
    #[arg(long, default_value_t = 4)]
    pub jobs: usize,

    /// Segments submitted per job
    #[arg(long, default_value_t = 10)]
    pub segments: usize,

    /// Simultaneous submissions per segment; all but one are expected to be
    /// rejected as busy
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Output renditions, comma separated preset names
    #[arg(long, default_value = "P720p30fps16x9,P360p30fps16x9")]
    pub profiles: String,

    /// Base encode time per segment in milliseconds
    #[arg(long, default_value_t = 200)]
    pub delay_ms: u64,

    /// Extra random encode time, up to this many milliseconds
    #[arg(long, default_value_t = 100)]
    pub jitter_ms: u64,

    /// Probability that a simulated encode fails
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TranscodeArgs {
    /// Job the input belongs to; repeated calls for a job reuse its device
    #[arg(long)]
    pub job: String,

    /// Input media file
    #[arg(long)]
    pub input: PathBuf,

    /// Output renditions, comma separated preset names
    #[arg(long, default_value = "P720p30fps16x9")]
    pub profiles: String,

    /// Directory the renditions are written to
    #[arg(long)]
    pub out_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_overrides_parse_after_the_subcommand() {
        let cli = Cli::parse_from([
            "encpoolctl",
            "config",
            "--devices",
            "0,1",
            "--chooser",
            "rr",
            "--idle-timeout",
            "90s",
        ]);
        assert_eq!(cli.global.devices.as_deref(), Some("0,1"));
        assert_eq!(cli.global.chooser, Some(ChooserKind::RoundRobin));
        assert_eq!(
            cli.global.idle_timeout.map(std::time::Duration::from),
            Some(std::time::Duration::from_secs(90))
        );
    }
}
