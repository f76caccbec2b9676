use std::sync::Arc;

use anyhow::Context;
use encpool_core::worker::FfmpegWorkerFactory;
use encpool_core::{BalancerConfig, SessionManager, VideoProfile};
use tracing::info;

use crate::cli::TranscodeArgs;

pub async fn run(config: &BalancerConfig, args: TranscodeArgs) -> anyhow::Result<()> {
    let profiles = VideoProfile::parse_list(&args.profiles).context("invalid --profiles")?;
    let input = args
        .input
        .canonicalize()
        .with_context(|| format!("input {} not found", args.input.display()))?;

    let factory = FfmpegWorkerFactory::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
        config.work_dir.clone(),
    );
    let manager = SessionManager::from_config(config, Arc::new(factory))?;

    let result = manager
        .transcode(&args.job, &input.to_string_lossy(), &profiles)
        .await;
    let placement = manager.stats().sessions.into_iter().next();
    manager.shutdown().await;
    let output = result.with_context(|| format!("transcode of {} failed", input.display()))?;

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    if let Some(session) = &placement {
        println!(
            "job {} ran on device #{} (charged {})",
            session.job, session.device, session.charged
        );
    }
    println!("decoded pixels: {}", output.decoded_pixels);

    for (profile, segment) in profiles.iter().zip(&output.segments) {
        let path = args.out_dir.join(format!("{}-{}.ts", args.job, profile.name));
        tokio::fs::write(&path, &segment.data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), bytes = segment.data.len(), "rendition written");
        println!(
            "{}: {} bytes, {} pixels -> {}",
            profile.name,
            segment.data.len(),
            segment.pixels,
            path.display()
        );
    }
    Ok(())
}
