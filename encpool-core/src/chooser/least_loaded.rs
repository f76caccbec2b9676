use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Assignment, ChooserSnapshot, DeviceChooser};
use crate::device::DeviceId;
use crate::error::{BalancerError, Result};

/// Default surcharge for starting a job on a device it has no session on.
pub const DEFAULT_AFFINITY_PENALTY: f64 = 1.3;

/// Largest pool whose affinity can be tracked in a per-job bitmap.
pub const MAX_AFFINITY_DEVICES: usize = u64::BITS as usize;

fn device_bit(index: usize) -> u64 {
    u32::try_from(index)
        .ok()
        .and_then(|shift| 1u64.checked_shl(shift))
        .unwrap_or(0)
}

struct ChooserState {
    loads: Vec<u64>,
    /// Bitmap of devices each job currently holds a session on.
    affinity: HashMap<String, u64>,
    /// Where the next scan starts, so ties rotate instead of piling onto device 0.
    next: usize,
}

/// Picks the device with the lowest `load + charge`, where the charge for a
/// device the job has no session on is inflated by the affinity penalty.
pub struct LeastLoadedChooser {
    penalty: f64,
    state: Mutex<ChooserState>,
}

impl fmt::Debug for LeastLoadedChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("LeastLoadedChooser");
        debug.field("penalty", &self.penalty);

        match self.state.try_lock() {
            Some(state) => {
                debug
                    .field("loads", &state.loads)
                    .field("tracked_jobs", &state.affinity.len())
                    .field("next", &state.next);
            }
            None => {
                debug.field("state", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl LeastLoadedChooser {
    pub fn new(device_count: usize, penalty: f64) -> Self {
        if device_count > MAX_AFFINITY_DEVICES {
            warn!(
                target: "encpool::chooser",
                device_count,
                "affinity is only tracked for the first {MAX_AFFINITY_DEVICES} devices"
            );
        }
        Self {
            penalty,
            state: Mutex::new(ChooserState {
                loads: vec![0; device_count],
                affinity: HashMap::new(),
                next: 0,
            }),
        }
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    /// Cost charged when `cost` lands on a device without existing affinity.
    pub fn penalize(&self, cost: u64) -> u64 {
        // Float to int `as` casts saturate.
        (cost as f64 * self.penalty).round() as u64
    }

    /// Devices `job` currently has affinity with, as a bitmap.
    pub fn affinity(&self, job: &str) -> u64 {
        self.state.lock().affinity.get(job).copied().unwrap_or(0)
    }
}

impl DeviceChooser for LeastLoadedChooser {
    fn choose(&self, job: &str, cost: u64) -> Result<Assignment> {
        let mut state = self.state.lock();
        let count = state.loads.len();
        if count == 0 {
            return Err(BalancerError::NoDevices);
        }

        let bitmap = state.affinity.get(job).copied().unwrap_or(0);
        let penalized = self.penalize(cost);

        // (index, load + charge, charge)
        let mut best: Option<(usize, u64, u64)> = None;
        for offset in 0..count {
            let index = (state.next + offset) % count;
            let charge = if bitmap & device_bit(index) != 0 {
                cost
            } else {
                penalized
            };
            let total = state.loads[index].saturating_add(charge);
            if best.is_none_or(|(_, best_total, _)| total < best_total) {
                best = Some((index, total, charge));
            }
        }
        let Some((index, _, charged)) = best else {
            return Err(BalancerError::NoDevices);
        };

        let bit = device_bit(index);
        if bitmap & bit == 0 && bit != 0 {
            state.affinity.insert(job.to_string(), bitmap | bit);
        }
        state.loads[index] = state.loads[index].saturating_add(charged);
        state.next = (state.next + 1) % count;

        debug!(
            target: "encpool::chooser",
            job,
            device = index,
            cost,
            charged,
            load = state.loads[index],
            "device chosen"
        );

        Ok(Assignment {
            device: DeviceId(index),
            charged,
        })
    }

    fn complete(&self, device: DeviceId, charged: u64) {
        let mut state = self.state.lock();
        let Some(load) = state.loads.get_mut(device.index()) else {
            warn!(target: "encpool::chooser", %device, "complete for unknown device");
            return;
        };
        if *load < charged {
            warn!(
                target: "encpool::chooser",
                %device,
                load = *load,
                charged,
                "released more load than was charged"
            );
        }
        *load = load.saturating_sub(charged);
    }

    fn terminate(&self, job: &str, device: DeviceId) {
        let mut state = self.state.lock();
        if let Some(bitmap) = state.affinity.get_mut(job) {
            *bitmap &= !device_bit(device.index());
            if *bitmap == 0 {
                state.affinity.remove(job);
            }
        }
    }

    fn snapshot(&self) -> ChooserSnapshot {
        let state = self.state.lock();
        ChooserSnapshot {
            loads: state.loads.clone(),
            tracked_jobs: state.affinity.len(),
        }
    }
}
