//! One-time wait for the engine to start answering
//!
//! States are not-ready and ready; the transition happens once. The first
//! request starts a background poller and every request waits on a watch
//! channel until it flips. Once ready, callers only pay an atomic load.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::EngineTransport;

/// Shared readiness state of the query engine
#[derive(Clone)]
pub struct EngineReadiness {
    inner: Arc<ReadinessInner>,
}

struct ReadinessInner {
    ready: AtomicBool,
    polling: AtomicBool,
    ready_tx: watch::Sender<bool>,
    transport: Arc<dyn EngineTransport>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl EngineReadiness {
    #[must_use]
    pub fn new(
        transport: Arc<dyn EngineTransport>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ReadinessInner {
                ready: AtomicBool::new(false),
                polling: AtomicBool::new(false),
                ready_tx,
                transport,
                poll_interval,
                shutdown,
            }),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Wait until the engine has answered a probe with 200 once.
    ///
    /// Returns `false` if shutdown started before the engine became ready.
    pub async fn wait(&self) -> bool {
        if self.is_ready() {
            return true;
        }

        let mut ready_rx = self.inner.ready_tx.subscribe();
        if !self.inner.polling.swap(true, Ordering::AcqRel) {
            tokio::spawn(poll_until_ready(Arc::clone(&self.inner)));
        }

        tokio::select! {
            ready = ready_rx.wait_for(|ready| *ready) => ready.is_ok(),
            () = self.inner.shutdown.cancelled() => self.is_ready(),
        }
    }
}

async fn poll_until_ready(inner: Arc<ReadinessInner>) {
    debug!("Waiting for query engine to become reachable");
    let mut polls: u64 = 0;
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => {
                debug!(polls, "Stopped waiting for query engine, shutting down");
                return;
            }
            reachable = inner.transport.probe() => {
                if reachable {
                    break;
                }
            }
        }
        polls += 1;
        tokio::time::sleep(inner.poll_interval).await;
    }

    inner.ready.store(true, Ordering::Release);
    inner.ready_tx.send_replace(true);
    info!(polls, "Query engine is ready");
}

impl std::fmt::Debug for EngineReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineReadiness")
            .field("ready", &self.is_ready())
            .finish()
    }
}
