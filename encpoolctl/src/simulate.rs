use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use encpool_core::worker::SimulatedWorkerFactory;
use encpool_core::worker::simulated::SimulationProfile;
use encpool_core::{BalancerConfig, SessionManager, SessionStats, VideoProfile};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::SimulateArgs;

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct Tally {
    succeeded: u64,
    busy: u64,
    failed: u64,
}

impl Tally {
    fn record(&mut self, result: &encpool_core::Result<encpool_core::TranscodeData>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(err) if err.is_busy() => self.busy += 1,
            Err(_) => self.failed += 1,
        }
    }

    fn merge(&mut self, other: Tally) {
        self.succeeded += other.succeeded;
        self.busy += other.busy;
        self.failed += other.failed;
    }
}

#[derive(Debug, Serialize)]
struct Report {
    jobs: usize,
    segments: usize,
    elapsed_ms: u128,
    #[serde(flatten)]
    tally: Tally,
    /// Manager state right before shutdown.
    stats: SessionStats,
}

pub async fn run(config: &BalancerConfig, args: SimulateArgs) -> anyhow::Result<()> {
    if !args.input.is_file() {
        bail!("input {} is not a readable file", args.input.display());
    }
    if !(0.0..=1.0).contains(&args.failure_rate) {
        bail!("--failure-rate must be between 0 and 1");
    }
    let profiles = VideoProfile::parse_list(&args.profiles).context("invalid --profiles")?;

    let factory = SimulatedWorkerFactory::new(SimulationProfile {
        base_delay: Duration::from_millis(args.delay_ms),
        jitter: Duration::from_millis(args.jitter_ms),
        failure_rate: args.failure_rate,
    });
    let manager = Arc::new(SessionManager::from_config(config, Arc::new(factory))?);
    let input = args.input.to_string_lossy().to_string();

    info!(
        jobs = args.jobs,
        segments = args.segments,
        devices = manager.pool().len(),
        chooser = config.chooser.as_str(),
        "starting simulation"
    );
    let started = Instant::now();

    let mut handles = Vec::with_capacity(args.jobs);
    for job in 0..args.jobs {
        let manager = Arc::clone(&manager);
        let profiles = profiles.clone();
        let input = input.clone();
        let segments = args.segments;
        let concurrency = args.concurrency.max(1);
        handles.push(tokio::spawn(async move {
            let job = format!("job-{job}");
            let mut tally = Tally::default();
            for _ in 0..segments {
                let calls = (0..concurrency).map(|_| manager.transcode(&job, &input, &profiles));
                for result in join_all(calls).await {
                    if let Err(err) = &result
                        && !err.is_busy()
                    {
                        warn!(job = %job, error = %err, "simulated transcode failed");
                    }
                    tally.record(&result);
                }
            }
            tally
        }));
    }

    let mut tally = Tally::default();
    for handle in handles {
        tally.merge(handle.await.context("simulation task panicked")?);
    }

    let report = Report {
        jobs: args.jobs,
        segments: args.segments,
        elapsed_ms: started.elapsed().as_millis(),
        tally,
        stats: manager.stats(),
    };
    manager.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.tally.succeeded == 0 && report.tally.failed > 0 {
        bail!("every simulated transcode failed");
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!(
        "{} jobs x {} segments in {} ms",
        report.jobs, report.segments, report.elapsed_ms
    );
    println!(
        "succeeded: {}  busy: {}  failed: {}",
        report.tally.succeeded, report.tally.busy, report.tally.failed
    );
    println!(
        "sessions created: {}  failed: {}  reclaimed while idle: {}",
        report.stats.created, report.stats.failed, report.stats.reclaimed
    );
    for (device, load) in report.stats.loads.iter().enumerate() {
        let jobs: Vec<&str> = report
            .stats
            .sessions
            .iter()
            .filter(|session| session.device == device)
            .map(|session| session.job.as_str())
            .collect();
        println!("device #{device}: load {load}  jobs [{}]", jobs.join(", "));
    }
}
