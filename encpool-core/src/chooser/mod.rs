//! Device selection strategies.
//!
//! A chooser owns all load and affinity bookkeeping for the pool. The session
//! manager only talks to it through [`DeviceChooser::choose`],
//! [`DeviceChooser::complete`] and [`DeviceChooser::terminate`]; every call is
//! linearized by the chooser's own lock and never suspends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::error::Result;

pub mod least_loaded;
pub mod round_robin;

pub use least_loaded::LeastLoadedChooser;
pub use round_robin::RoundRobinChooser;

/// Outcome of a successful [`DeviceChooser::choose`].
///
/// `charged` is exactly what must later be handed back through
/// [`DeviceChooser::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub device: DeviceId,
    pub charged: u64,
}

/// Point-in-time view of chooser state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChooserSnapshot {
    pub loads: Vec<u64>,
    pub tracked_jobs: usize,
}

pub trait DeviceChooser: Send + Sync + std::fmt::Debug {
    /// Pick a device for `job` and account `cost` against it.
    fn choose(&self, job: &str, cost: u64) -> Result<Assignment>;

    /// Release a charge previously returned by [`choose`](Self::choose).
    fn complete(&self, device: DeviceId, charged: u64);

    /// Forget that `job` is bound to `device`.
    fn terminate(&self, job: &str, device: DeviceId);

    fn snapshot(&self) -> ChooserSnapshot;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChooserKind {
    #[default]
    LeastLoaded,
    RoundRobin,
}

impl ChooserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeastLoaded => "least_loaded",
            Self::RoundRobin => "round_robin",
        }
    }

    pub fn build(self, device_count: usize, affinity_penalty: f64) -> Arc<dyn DeviceChooser> {
        match self {
            Self::LeastLoaded => Arc::new(LeastLoadedChooser::new(device_count, affinity_penalty)),
            Self::RoundRobin => Arc::new(RoundRobinChooser::new(device_count)),
        }
    }
}

impl std::str::FromStr for ChooserKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "least_loaded" | "lb" | "affinity" => Ok(Self::LeastLoaded),
            "round_robin" | "rr" => Ok(Self::RoundRobin),
            other => Err(format!(
                "unknown chooser '{other}', expected least_loaded or round_robin"
            )),
        }
    }
}
