use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use super::{Assignment, ChooserSnapshot, DeviceChooser};
use crate::device::DeviceId;
use crate::error::{BalancerError, Result};

struct RotationState {
    assigned: HashMap<String, usize>,
    next: usize,
}

/// Hands each newly seen job the next device in rotation and keeps it there
/// until the job is terminated. Cost is passed through untouched and no load
/// is tracked.
pub struct RoundRobinChooser {
    device_count: usize,
    state: Mutex<RotationState>,
}

impl fmt::Debug for RoundRobinChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RoundRobinChooser");
        debug.field("device_count", &self.device_count);

        match self.state.try_lock() {
            Some(state) => {
                debug
                    .field("assigned", &state.assigned.len())
                    .field("next", &state.next);
            }
            None => {
                debug.field("state", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl RoundRobinChooser {
    pub fn new(device_count: usize) -> Self {
        Self {
            device_count,
            state: Mutex::new(RotationState {
                assigned: HashMap::new(),
                next: 0,
            }),
        }
    }

    pub fn assigned(&self, job: &str) -> Option<DeviceId> {
        self.state.lock().assigned.get(job).copied().map(DeviceId)
    }
}

impl DeviceChooser for RoundRobinChooser {
    fn choose(&self, job: &str, cost: u64) -> Result<Assignment> {
        if self.device_count == 0 {
            return Err(BalancerError::NoDevices);
        }

        let mut state = self.state.lock();
        let index = match state.assigned.get(job) {
            Some(index) => *index,
            None => {
                let index = state.next;
                state.next = (state.next + 1) % self.device_count;
                state.assigned.insert(job.to_string(), index);
                debug!(target: "encpool::chooser", job, device = index, "job assigned");
                index
            }
        };

        Ok(Assignment {
            device: DeviceId(index),
            charged: cost,
        })
    }

    fn complete(&self, _device: DeviceId, _charged: u64) {}

    fn terminate(&self, job: &str, _device: DeviceId) {
        self.state.lock().assigned.remove(job);
    }

    fn snapshot(&self) -> ChooserSnapshot {
        ChooserSnapshot {
            loads: vec![0; self.device_count],
            tracked_jobs: self.state.lock().assigned.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_jobs_rotate_across_devices() {
        let rr = RoundRobinChooser::new(4);
        let devices: Vec<usize> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|job| rr.choose(job, 1).unwrap().device.index())
            .collect();
        assert_eq!(devices, vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn known_jobs_keep_their_device_and_cost() {
        let rr = RoundRobinChooser::new(2);
        rr.choose("a", 1).unwrap();
        rr.choose("b", 1).unwrap();
        assert_eq!(
            rr.choose("a", 77).unwrap(),
            Assignment {
                device: DeviceId(0),
                charged: 77
            }
        );
    }

    #[test]
    fn terminate_forgets_the_job() {
        let rr = RoundRobinChooser::new(3);
        rr.choose("a", 1).unwrap();
        rr.terminate("a", DeviceId(0));
        assert_eq!(rr.assigned("a"), None);
        // The counter keeps rotating, so the job lands somewhere new.
        assert_eq!(rr.choose("a", 1).unwrap().device, DeviceId(1));
    }

    #[test]
    fn empty_pool_has_no_devices() {
        let rr = RoundRobinChooser::new(0);
        assert!(matches!(rr.choose("a", 1), Err(BalancerError::NoDevices)));
    }
}
