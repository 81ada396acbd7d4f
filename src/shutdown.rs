//! Shutdown coordination.
//!
//! A single [`CancellationToken`] is the "stop admitting work" signal the
//! scheduler watches.  Once it fires, [`ShutdownCoordinator::drain`] waits
//! for outstanding fetches, bounded by the shutdown deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pool::WorkerPool;

/// External requests the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Process-level termination (SIGTERM / SIGINT / host cancellation).
    Terminate,
    /// Explicit [`DiscoveryService::stop`](crate::service::DiscoveryService::stop).
    Stop,
    /// Accepted but currently does nothing.
    Reload,
}

/// How the drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    /// The deadline passed with fetches still running; they were abandoned.
    DeadlineElapsed,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    stop_requested: AtomicBool,
    deadline: Duration,
}

impl ShutdownCoordinator {
    pub fn new(deadline: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            stop_requested: AtomicBool::new(false),
            deadline,
        }
    }

    /// The token the scheduler stops on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// React to `trigger`.  Returns `true` if this call began shutdown.
    ///
    /// Repeated stop requests are harmless.
    pub fn trigger(&self, trigger: ShutdownTrigger) -> bool {
        match trigger {
            ShutdownTrigger::Reload => {
                debug!("reload requested; nothing to reload");
                false
            }
            ShutdownTrigger::Terminate | ShutdownTrigger::Stop => {
                let first = !self.stop_requested.swap(true, Ordering::AcqRel);
                if first {
                    info!(?trigger, "graceful shutdown requested");
                }
                self.token.cancel();
                first
            }
        }
    }

    /// Stop admissions on `pool` and wait for it to empty, up to the deadline.
    pub async fn drain(&self, pool: &WorkerPool) -> DrainOutcome {
        if pool.drain(self.deadline).await {
            DrainOutcome::Drained
        } else {
            DrainOutcome::DeadlineElapsed
        }
    }
}
