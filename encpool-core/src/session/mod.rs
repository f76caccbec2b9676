//! Job sessions.
//!
//! A session binds one job to one device and owns a dedicated worker driven by
//! a background task. Calls for a job are serialized through a
//! single slot: while one transcode is in flight every other call for the
//! same job fails fast with [`BalancerError::Busy`].
//!
//! Lock order is always session table, then chooser.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use crate::chooser::DeviceChooser;
use crate::config::{BalancerConfig, ConfigError};
use crate::cost::estimate_cost;
use crate::device::{DeviceId, DevicePool};
use crate::error::{BalancerError, Result};
use crate::profiles::VideoProfile;
use crate::worker::{TranscodeData, WorkerError, WorkerFactory};

mod task;

pub(crate) struct Request {
    input: String,
    profiles: Vec<VideoProfile>,
    reply: oneshot::Sender<std::result::Result<TranscodeData, WorkerError>>,
    /// The session's single slot. Travels with the request so it stays taken
    /// until the worker is done, even if the caller stops waiting.
    slot: OwnedSemaphorePermit,
}

/// What a session holds on shared state: its table key, its device and the
/// charge it owes the chooser. The nonce tells this session apart from any
/// later one for the same job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    job: Arc<str>,
    device: DeviceId,
    charged: u64,
    nonce: Uuid,
}

/// Table entry for a live session. Cloned out of the table so callers never
/// hold the lock while waiting on the worker.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    binding: Binding,
    slot: Arc<Semaphore>,
    requests: mpsc::Sender<Request>,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reclaimed: AtomicU64,
    failed: AtomicU64,
    busy: AtomicU64,
}

pub(crate) struct Shared {
    pool: DevicePool,
    chooser: Arc<dyn DeviceChooser>,
    factory: Arc<dyn WorkerFactory>,
    idle_timeout: Duration,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    counters: Counters,
}

impl Shared {
    /// Remove `session` from the table and hand back its device charge and
    /// affinity. Does nothing unless the table still holds this exact
    /// session (same nonce).
    pub(crate) fn release(&self, session: &Binding) -> bool {
        let mut sessions = self.sessions.write();
        let current = sessions
            .get(&*session.job)
            .is_some_and(|entry| entry.binding.nonce == session.nonce);
        if !current {
            debug!(
                target: "encpool::session",
                job = %session.job,
                nonce = %session.nonce,
                "stale session cleanup skipped"
            );
            return false;
        }

        sessions.remove(&*session.job);
        self.chooser.complete(session.device, session.charged);
        self.chooser.terminate(&session.job, session.device);
        debug!(
            target: "encpool::session",
            job = %session.job,
            device = %session.device,
            nonce = %session.nonce,
            charged = session.charged,
            "session released"
        );
        true
    }
}

/// Public view of one live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub job: String,
    pub device: usize,
    pub charged: u64,
    pub nonce: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub sessions: Vec<SessionInfo>,
    /// Per-device load as reported by the chooser.
    pub loads: Vec<u64>,
    pub tracked_jobs: usize,
    pub created: u64,
    /// Sessions torn down by the idle timeout.
    pub reclaimed: u64,
    /// Sessions torn down by a worker error.
    pub failed: u64,
    pub busy: u64,
}

enum Dispatch {
    Done(std::result::Result<TranscodeData, WorkerError>),
    Busy,
    Closed,
}

/// Routes transcode calls onto per-job sessions.
pub struct SessionManager {
    inner: Arc<Shared>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SessionManager");
        debug
            .field("devices", &self.inner.pool.len())
            .field("chooser", &self.inner.chooser)
            .field("idle_timeout", &self.inner.idle_timeout)
            .field("shutting_down", &self.inner.shutdown.is_cancelled());

        match self.inner.sessions.try_read() {
            Some(sessions) => {
                debug.field("sessions", &sessions.len());
            }
            None => {
                debug.field("sessions", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl SessionManager {
    pub fn new(
        pool: DevicePool,
        chooser: Arc<dyn DeviceChooser>,
        factory: Arc<dyn WorkerFactory>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                pool,
                chooser,
                factory,
                idle_timeout,
                sessions: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Validate `config` and build a manager with the chooser it names.
    pub fn from_config(
        config: &BalancerConfig,
        factory: Arc<dyn WorkerFactory>,
    ) -> std::result::Result<Self, ConfigError> {
        let pool = config.validate()?;
        let chooser = config.chooser.build(pool.len(), config.affinity_penalty);
        Ok(Self::new(pool, chooser, factory, config.idle_timeout()))
    }

    pub fn pool(&self) -> &DevicePool {
        &self.inner.pool
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Run one transcode for `job` on its session, creating the session if
    /// the job has none.
    ///
    /// Fails with [`BalancerError::Busy`] if the session already has a
    /// request in flight. A worker error tears the session down and is
    /// returned as [`BalancerError::Worker`]; the next call for the job gets a
    /// fresh session.
    pub async fn transcode(
        &self,
        job: &str,
        input: &str,
        profiles: &[VideoProfile],
    ) -> Result<TranscodeData> {
        let mut retried = false;
        loop {
            if self.inner.shutdown.is_cancelled() {
                return Err(BalancerError::ShuttingDown);
            }

            let session = self.session_for(job, profiles)?;
            match Self::dispatch(&session, input, profiles).await {
                Dispatch::Done(result) => return result.map_err(BalancerError::from),
                Dispatch::Busy => {
                    self.inner.counters.busy.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target: "encpool::session",
                        job,
                        nonce = %session.binding.nonce,
                        "session busy"
                    );
                    return Err(BalancerError::Busy {
                        job: job.to_string(),
                    });
                }
                // The session was torn down between lookup and submit, so the
                // request never reached a worker.
                Dispatch::Closed if !retried => {
                    debug!(
                        target: "encpool::session",
                        job,
                        nonce = %session.binding.nonce,
                        "session closed before dispatch, retrying"
                    );
                    retried = true;
                }
                Dispatch::Closed => {
                    return Err(BalancerError::SessionClosed {
                        job: job.to_string(),
                    });
                }
            }
        }
    }

    fn session_for(&self, job: &str, profiles: &[VideoProfile]) -> Result<SessionHandle> {
        if let Some(session) = self.inner.sessions.read().get(job).cloned() {
            debug!(
                target: "encpool::session",
                job,
                device = %session.binding.device,
                nonce = %session.binding.nonce,
                "session reused"
            );
            return Ok(session);
        }

        let mut sessions = self.inner.sessions.write();
        if let Some(session) = sessions.get(job) {
            return Ok(session.clone());
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(BalancerError::ShuttingDown);
        }

        let cost = estimate_cost(profiles);
        let assignment = self.inner.chooser.choose(job, cost)?;
        let chooser = &self.inner.chooser;
        let release = || {
            chooser.complete(assignment.device, assignment.charged);
            chooser.terminate(job, assignment.device);
        };

        let Some(device) = self.inner.pool.get(assignment.device) else {
            release();
            return Err(BalancerError::NoDevices);
        };
        let worker = match self.inner.factory.spawn(device, job) {
            Ok(worker) => worker,
            Err(source) => {
                release();
                return Err(BalancerError::WorkerSpawn {
                    device: assignment.device,
                    source,
                });
            }
        };

        let binding = Binding {
            job: Arc::from(job),
            device: assignment.device,
            charged: assignment.charged,
            nonce: Uuid::new_v4(),
        };
        debug!(
            target: "encpool::session",
            job,
            device = %binding.device,
            target_device = %device.target,
            nonce = %binding.nonce,
            cost,
            charged = binding.charged,
            "session created"
        );

        let (requests, receiver) = mpsc::channel(1);
        let session = SessionHandle {
            binding: binding.clone(),
            slot: Arc::new(Semaphore::new(1)),
            requests,
        };
        sessions.insert(job.to_string(), session.clone());
        self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
        self.inner
            .tasks
            .spawn(task::run(Arc::clone(&self.inner), binding, worker, receiver));

        Ok(session)
    }

    async fn dispatch(
        session: &SessionHandle,
        input: &str,
        profiles: &[VideoProfile],
    ) -> Dispatch {
        let Ok(slot) = Arc::clone(&session.slot).try_acquire_owned() else {
            return Dispatch::Busy;
        };

        let (reply, response) = oneshot::channel();
        let request = Request {
            input: input.to_string(),
            profiles: profiles.to_vec(),
            reply,
            slot,
        };
        if session.requests.try_send(request).is_err() {
            return Dispatch::Closed;
        }

        match response.await {
            Ok(result) => Dispatch::Done(result),
            Err(_) => Dispatch::Closed,
        }
    }

    pub fn stats(&self) -> SessionStats {
        let mut sessions: Vec<SessionInfo> = self
            .inner
            .sessions
            .read()
            .values()
            .map(|session| &session.binding)
            .map(|binding| SessionInfo {
                job: binding.job.to_string(),
                device: binding.device.index(),
                charged: binding.charged,
                nonce: binding.nonce,
            })
            .collect();
        sessions.sort_by(|a, b| a.job.cmp(&b.job));

        let snapshot = self.inner.chooser.snapshot();
        let counters = &self.inner.counters;
        SessionStats {
            sessions,
            loads: snapshot.loads,
            tracked_jobs: snapshot.tracked_jobs,
            created: counters.created.load(Ordering::Relaxed),
            reclaimed: counters.reclaimed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            busy: counters.busy.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, tear down every session and wait for their tasks.
    ///
    /// In-flight transcodes finish first; idle sessions are released right
    /// away.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        // Any creation that raced the cancel has spawned its task by the time
        // the write lock is free.
        drop(self.inner.sessions.write());
        self.inner.tasks.close();

        let pending = self.inner.tasks.len();
        info!(target: "encpool::session", pending, "shutting down sessions");
        self.inner.tasks.wait().await;
        info!(target: "encpool::session", "session manager stopped");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
