//! Periodic escalation cycle and schedule seeding.

use chrono::Utc;
use tracing::{debug, instrument};

use super::JobError;
use crate::scheduler::{CycleReport, EscalationScheduler};

/// Default interval between escalation cycles (15 minutes).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 900;

/// Default interval between seed sweeps (1 hour).
pub const DEFAULT_SEED_INTERVAL_SECS: u64 = 3600;

/// Runs [`EscalationScheduler`] on behalf of the worker loops.
pub struct EscalationJob {
    scheduler: EscalationScheduler,
}

impl EscalationJob {
    pub fn new(scheduler: EscalationScheduler) -> Self {
        Self { scheduler }
    }

    /// Run one escalation cycle at the current time.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<CycleReport, JobError> {
        let report = self.scheduler.run_cycle(Utc::now()).await?;
        if report.processed == 0 {
            debug!("No due tickets to escalate");
        }
        Ok(report)
    }

    /// Give unscheduled tickets their first deadline.
    #[instrument(skip(self))]
    pub async fn seed(&self) -> Result<usize, JobError> {
        Ok(self.scheduler.seed_missing_schedules(Utc::now()).await?)
    }

    #[must_use]
    pub const fn poll_interval_secs(&self) -> u64 {
        DEFAULT_POLL_INTERVAL_SECS
    }
}
