//! # encpool core
//!
//! Dispatches transcoding jobs from many concurrent callers onto a fixed pool
//! of encoders (software or individual accelerator devices) while keeping each
//! job on the device it started on.
//!
//! ## Overview
//!
//! - **Cost estimation**: [`cost::estimate_cost`] turns requested renditions
//!   into an integer workload.
//! - **Device choosers**: [`chooser::LeastLoadedChooser`] spreads load while
//!   penalizing moves to a new device; [`chooser::RoundRobinChooser`] rotates
//!   new jobs through the pool.
//! - **Sessions**: [`session::SessionManager`] binds a job to a device and a
//!   dedicated worker, runs one transcode at a time per job (rejecting the
//!   rest with [`BalancerError::Busy`]) and reclaims idle sessions.
//! - **Workers**: [`worker::FfmpegWorker`] drives ffmpeg on the bound device;
//!   [`worker::SimulatedWorker`] stands in for load testing.
//! - **Configuration**: [`config::BalancerConfig`] loads from TOML/JSON files
//!   or the environment.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use encpool_core::{BalancerConfig, SessionManager, VideoProfile};
//! use encpool_core::worker::SimulatedWorkerFactory;
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BalancerConfig {
//!         devices: vec!["0,1".to_string()],
//!         ..BalancerConfig::default()
//!     };
//!     let manager =
//!         SessionManager::from_config(&config, Arc::new(SimulatedWorkerFactory::default()))?;
//!
//!     let profiles = VideoProfile::parse_list("P720p30fps16x9,P360p30fps16x9")?;
//!     let output = manager.transcode("stream-1", "segment0.ts", &profiles).await?;
//!     println!("{} renditions", output.segments.len());
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod chooser;
pub mod config;
pub mod cost;
pub mod device;
pub mod error;
pub mod profiles;
pub mod session;
pub mod worker;

pub use chooser::{Assignment, ChooserKind, DeviceChooser};
pub use config::{BalancerConfig, ConfigError, ConfigSource};
pub use device::{Device, DeviceId, DevicePool, DeviceTarget, HardwareEncoderType};
pub use error::{BalancerError, Result};
pub use profiles::VideoProfile;
pub use session::{SessionManager, SessionStats};
pub use worker::{EncodingWorker, TranscodeData, TranscodedSegment, WorkerError, WorkerFactory};
