//! Per-session background task: the only code that ever touches a session's
//! worker.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Binding, Request, Shared};
use crate::worker::EncodingWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    IdleTimeout,
    Shutdown,
    /// Every sender is gone: the table entry was dropped by someone else.
    Orphaned,
}

enum State {
    Idle,
    Active(Request),
    Terminating(Teardown),
    /// Shared state already released; only the worker is left.
    Stopping,
}

pub(super) async fn run(
    shared: Arc<Shared>,
    session: Binding,
    mut worker: Box<dyn EncodingWorker>,
    mut requests: mpsc::Receiver<Request>,
) {
    let mut state = State::Idle;

    loop {
        state = match state {
            State::Idle => {
                tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => State::Terminating(Teardown::Shutdown),
                    request = requests.recv() => match request {
                        Some(request) => State::Active(request),
                        None => State::Terminating(Teardown::Orphaned),
                    },
                    _ = tokio::time::sleep(shared.idle_timeout) => {
                        State::Terminating(Teardown::IdleTimeout)
                    }
                }
            }
            State::Active(Request {
                input,
                profiles,
                reply,
                slot,
            }) => {
                match worker.transcode(&input, &profiles).await {
                    Ok(output) => {
                        drop(slot);
                        // The caller may have gone away; nothing to do then.
                        let _ = reply.send(Ok(output));
                        State::Idle
                    }
                    Err(err) => {
                        warn!(
                            target: "encpool::session",
                            job = %session.job,
                            device = %session.device,
                            nonce = %session.nonce,
                            error = %err,
                            "worker failed, tearing session down"
                        );
                        shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                        // Released before the reply goes out, so a retry by
                        // the caller always lands on a fresh session.
                        shared.release(&session);
                        drop(slot);
                        let _ = reply.send(Err(err));
                        State::Stopping
                    }
                }
            }
            State::Terminating(reason) => {
                debug!(
                    target: "encpool::session",
                    job = %session.job,
                    device = %session.device,
                    nonce = %session.nonce,
                    ?reason,
                    "session terminating"
                );
                if shared.release(&session) && reason == Teardown::IdleTimeout {
                    shared.counters.reclaimed.fetch_add(1, Ordering::Relaxed);
                }
                State::Stopping
            }
            State::Stopping => {
                // Requests that slipped in after the release never reached the
                // worker; dropping them tells their callers to retry.
                requests.close();
                while requests.try_recv().is_ok() {}

                worker.stop().await;
                debug!(
                    target: "encpool::session",
                    job = %session.job,
                    nonce = %session.nonce,
                    "session stopped"
                );
                return;
            }
        };
    }
}
