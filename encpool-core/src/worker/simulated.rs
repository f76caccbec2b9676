use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::{EncodingWorker, TranscodeData, TranscodedSegment, WorkerError, WorkerFactory};
use crate::device::{Device, DeviceId};
use crate::profiles::VideoProfile;

/// Knobs for [`SimulatedWorker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationProfile {
    pub base_delay: Duration,
    /// Upper bound of the uniformly random extra delay.
    pub jitter: Duration,
    /// Probability in `[0, 1]` that a transcode fails.
    pub failure_rate: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            jitter: Duration::from_millis(200),
            failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedWorkerFactory {
    profile: SimulationProfile,
}

impl SimulatedWorkerFactory {
    pub fn new(profile: SimulationProfile) -> Self {
        Self { profile }
    }
}

impl WorkerFactory for SimulatedWorkerFactory {
    fn spawn(&self, device: &Device, job: &str) -> Result<Box<dyn EncodingWorker>, WorkerError> {
        debug!(target: "encpool::worker", job, device = %device.id, "simulated worker started");
        Ok(Box::new(SimulatedWorker {
            device: device.id,
            profile: self.profile,
            transcodes: 0,
        }))
    }
}

/// Stand-in encoder: reads the input, waits a while and returns truncated
/// copies of it, one per rendition.
#[derive(Debug)]
pub struct SimulatedWorker {
    device: DeviceId,
    profile: SimulationProfile,
    transcodes: u64,
}

impl SimulatedWorker {
    fn next_delay_and_outcome(&self) -> (Duration, bool) {
        let mut rng = rand::rng();
        let jitter_ms = u64::try_from(self.profile.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rng.random_range(0..=jitter_ms)
        };
        let fail = rng.random_bool(self.profile.failure_rate.clamp(0.0, 1.0));
        (self.profile.base_delay + Duration::from_millis(extra), fail)
    }
}

#[async_trait]
impl EncodingWorker for SimulatedWorker {
    async fn transcode(
        &mut self,
        input: &str,
        profiles: &[VideoProfile],
    ) -> Result<TranscodeData, WorkerError> {
        let data = tokio::fs::read(input)
            .await
            .map_err(|source| WorkerError::Io {
                path: PathBuf::from(input),
                source,
            })?;

        let (delay, fail) = self.next_delay_and_outcome();
        tokio::time::sleep(delay).await;
        self.transcodes += 1;
        if fail {
            return Err(WorkerError::Failed(format!(
                "simulated encoder failure on device {}",
                self.device
            )));
        }

        let segments = profiles
            .iter()
            .enumerate()
            .map(|(index, profile)| {
                let len = data.len() / ((index + 1) * 2);
                let pixels = profile
                    .resolution()
                    .map(|(w, h)| u64::from(w) * u64::from(h))
                    .unwrap_or(0);
                TranscodedSegment {
                    data: data[..len].to_vec(),
                    pixels,
                }
            })
            .collect();

        Ok(TranscodeData {
            segments,
            decoded_pixels: data.len() as u64,
        })
    }

    async fn stop(&mut self) {
        debug!(
            target: "encpool::worker",
            device = %self.device,
            transcodes = self.transcodes,
            "simulated worker stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceTarget;
    use std::io::Write;

    fn device() -> Device {
        Device {
            id: DeviceId(3),
            target: DeviceTarget::Software,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn renditions_are_truncated_copies_of_the_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 120]).unwrap();
        let input = file.path().to_string_lossy().to_string();

        let factory = SimulatedWorkerFactory::default();
        let mut worker = factory.spawn(&device(), "job").unwrap();
        let profiles = vec![
            VideoProfile::preset("P360p30fps16x9").unwrap(),
            VideoProfile::preset("P240p30fps16x9").unwrap(),
        ];
        let out = worker.transcode(&input, &profiles).await.unwrap();

        assert_eq!(out.decoded_pixels, 120);
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.segments[0].data.len(), 60);
        assert_eq!(out.segments[1].data.len(), 30);
        assert_eq!(out.segments[0].pixels, 640 * 360);
        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn certain_failure_rate_always_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"segment").unwrap();
        let input = file.path().to_string_lossy().to_string();

        let factory = SimulatedWorkerFactory::new(SimulationProfile {
            failure_rate: 1.0,
            ..SimulationProfile::default()
        });
        let mut worker = factory.spawn(&device(), "job").unwrap();
        let err = worker.transcode(&input, &[]).await.unwrap_err();
        assert!(matches!(err, WorkerError::Failed(_)));
    }

    #[tokio::test]
    async fn missing_input_is_an_io_error() {
        let mut worker = SimulatedWorkerFactory::default()
            .spawn(&device(), "job")
            .unwrap();
        let err = worker
            .transcode("/nonexistent/encpool/input.ts", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Io { .. }));
    }
}
