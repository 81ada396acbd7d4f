//! Per-source failure tracking and auto-disable.
//!
//! A source is **Active** while `consecutive_failures < threshold` and
//! **Disabled** once it reaches the threshold.  Success resets the count to
//! zero.  Disabled is terminal for automatic transitions: only
//! [`SourceRegistry::reenable`] brings a source back.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{FetchFailure, RegistryError};
use crate::registry::SourceRegistry;
use crate::source::{Source, SourceId};

/// Terminal result of one fetch-executor invocation.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Items were fetched and handed to the feed store.
    Success { fetched: usize, stored: usize },
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

/// What applying an outcome did to a source's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Success on a source with no prior failures.
    Healthy,
    /// Success after `previous_failures` consecutive failures.
    Recovered { previous_failures: u32 },
    /// Failure that left the source active.
    Degraded { failures: u32 },
    /// Failure that crossed the threshold.
    Disabled { failures: u32 },
    /// Outcome arrived for a source that was already disabled; not applied.
    Ignored,
}

/// Counts consecutive failures and disables a source at the threshold.
#[derive(Debug, Clone, Copy)]
pub struct FailureTracker {
    threshold: u32,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Apply `outcome` to one source record in place.
    pub fn apply(&self, source: &mut Source, outcome: &FetchOutcome, now: DateTime<Utc>) -> Transition {
        if source.disabled {
            return Transition::Ignored;
        }

        if outcome.is_success() {
            let previous_failures = std::mem::take(&mut source.consecutive_failures);
            source.last_success_at = Some(now);
            return match previous_failures {
                0 => Transition::Healthy,
                n => Transition::Recovered { previous_failures: n },
            };
        }

        source.consecutive_failures = source.consecutive_failures.saturating_add(1);
        let failures = source.consecutive_failures;
        if failures >= self.threshold {
            source.disabled = true;
            Transition::Disabled { failures }
        } else {
            Transition::Degraded { failures }
        }
    }

    /// Apply `outcome` to the registry's record for `id` and persist it.
    pub async fn report(
        &self,
        registry: &SourceRegistry,
        id: &SourceId,
        outcome: &FetchOutcome,
        now: DateTime<Utc>,
    ) -> Result<Transition, RegistryError> {
        let transition = registry
            .update(id, |source| self.apply(source, outcome, now))
            .await?;

        match transition {
            Transition::Recovered { previous_failures } => {
                info!(source = %id, previous_failures, "source recovered");
            }
            Transition::Degraded { failures } => {
                warn!(source = %id, failures, threshold = self.threshold, "source poll failed");
            }
            Transition::Disabled { failures } => {
                warn!(source = %id, failures, "source disabled after consecutive failures");
            }
            Transition::Healthy | Transition::Ignored => {}
        }
        Ok(transition)
    }
}
