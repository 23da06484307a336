//! Idle shutdown
//!
//! A forwarded request counts as in flight from the moment its guard is
//! taken until its response has been written. The countdown never runs
//! while anything is in flight and restarts with the full quiet period when
//! the last request finishes. Once the quiet period elapses the controller
//! cancels the shared shutdown token, exactly once.

use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Started,
    Finished,
    Touched,
}

/// Cheap handle used by request handlers to report activity
#[derive(Debug, Clone)]
pub struct ActivityHandle {
    tx: UnboundedSender<Activity>,
}

impl ActivityHandle {
    /// Report activity now
    pub fn touch(&self) {
        self.send(Activity::Touched);
    }

    /// Mark a request as in flight until the returned guard is dropped
    #[must_use]
    pub fn guard(&self) -> ActivityGuard {
        self.send(Activity::Started);
        ActivityGuard {
            handle: self.clone(),
        }
    }

    fn send(&self, activity: Activity) {
        // The controller is gone once it fired; nothing left to reset.
        let _ = self.tx.send(activity);
    }
}

/// Keeps a request in flight; finishes it on drop.
///
/// Attached to a response body so the idle countdown restarts only after
/// the body has been fully written.
#[derive(Debug)]
pub struct ActivityGuard {
    handle: ActivityHandle,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.handle.send(Activity::Finished);
    }
}

/// How the controller finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The quiet period elapsed and shutdown was triggered
    Fired,
    /// Shutdown was triggered elsewhere first
    Cancelled,
}

/// Idle shutdown controller
#[derive(Debug)]
pub struct IdleShutdownController {
    activity: UnboundedReceiver<Activity>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl IdleShutdownController {
    /// Create a controller and the handle feeding it
    #[must_use]
    pub fn new(timeout: Duration, shutdown: CancellationToken) -> (Self, ActivityHandle) {
        let (tx, rx) = unbounded_channel();
        let controller = Self {
            activity: rx,
            timeout,
            shutdown,
        };
        (controller, ActivityHandle { tx })
    }

    /// Run until the quiet period elapses or shutdown happens elsewhere
    pub async fn run(mut self) -> IdleOutcome {
        let deadline = sleep(self.timeout);
        tokio::pin!(deadline);
        let mut in_flight: usize = 0;
        let mut senders_alive = true;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!("Idle shutdown controller stopped by shutdown signal");
                    return IdleOutcome::Cancelled;
                }
                () = &mut deadline, if in_flight == 0 => {
                    info!(
                        "No requests for {} seconds, shutting down",
                        self.timeout.as_secs()
                    );
                    self.shutdown.cancel();
                    return IdleOutcome::Fired;
                }
                activity = self.activity.recv(), if senders_alive => {
                    match activity {
                        Some(Activity::Started) => in_flight += 1,
                        Some(Activity::Finished) => {
                            in_flight = in_flight.saturating_sub(1);
                            deadline.as_mut().reset(Instant::now() + self.timeout);
                        }
                        Some(Activity::Touched) => {
                            deadline.as_mut().reset(Instant::now() + self.timeout);
                        }
                        None => senders_alive = false,
                    }
                }
            }
        }
    }
}
