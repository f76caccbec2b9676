use thiserror::Error;

use crate::device::DeviceId;
use crate::worker::WorkerError;

#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("no devices available in the pool")]
    NoDevices,

    /// The session for this job already has a transcode in flight.
    #[error("transcoder busy: session for job '{job}' is already processing a request")]
    Busy { job: String },

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("failed to start encoding worker on device {device}: {source}")]
    WorkerSpawn {
        device: DeviceId,
        #[source]
        source: WorkerError,
    },

    #[error("session for job '{job}' closed before the request was accepted")]
    SessionClosed { job: String },

    #[error("session manager is shutting down")]
    ShuttingDown,
}

impl BalancerError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

pub type Result<T> = std::result::Result<T, BalancerError>;
