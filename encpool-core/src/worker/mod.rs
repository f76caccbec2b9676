//! The encoding worker boundary.
//!
//! A worker is bound to one device for its whole life and is driven by exactly
//! one session task, so implementations never see concurrent calls.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::device::Device;
use crate::profiles::{ProfileError, VideoProfile};

pub mod ffmpeg;
pub mod simulated;

pub use ffmpeg::{FfmpegWorker, FfmpegWorkerFactory};
pub use simulated::{SimulatedWorker, SimulatedWorkerFactory};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Process {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("invalid output profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("expected {expected} outputs but produced {actual}")]
    OutputMismatch { expected: usize, actual: usize },

    #[error("could not parse probe output '{0}'")]
    Probe(String),

    #[error("{0}")]
    Failed(String),
}

/// One encoded rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedSegment {
    pub data: Vec<u8>,
    /// Pixels encoded into this rendition.
    pub pixels: u64,
}

/// Everything a worker produces for a single input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodeData {
    /// One entry per requested profile, in request order.
    pub segments: Vec<TranscodedSegment>,
    /// Pixels decoded from the input.
    pub decoded_pixels: u64,
}

#[async_trait]
pub trait EncodingWorker: Send {
    async fn transcode(
        &mut self,
        input: &str,
        profiles: &[VideoProfile],
    ) -> Result<TranscodeData, WorkerError>;

    /// Release everything the worker holds. May be slow; called once, after
    /// the session has already been removed from the table.
    async fn stop(&mut self);
}

/// Builds workers bound to a specific device.
pub trait WorkerFactory: Send + Sync + std::fmt::Debug {
    fn spawn(&self, device: &Device, job: &str) -> Result<Box<dyn EncodingWorker>, WorkerError>;
}
