//! Audit trail writer.

use leasehold_core::Result;
use leasehold_core::activity::NewActivityLog;
use leasehold_core::clock::Clock;
use leasehold_core::ports::ActivityLogRepository;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AuditTrail {
    repo: Arc<dyn ActivityLogRepository>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    pub fn new(repo: Arc<dyn ActivityLogRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Persist an entry. Security events are also logged at `warn`.
    pub async fn record(&self, entry: NewActivityLog) -> Result<()> {
        if entry.action.is_security_event() {
            warn!(action = entry.action.as_str(), details = %entry.details, "Security event");
        } else {
            debug!(action = entry.action.as_str(), details = %entry.details, "Audit");
        }
        self.repo.append(&entry.at(self.clock.now_utc())).await
    }

    /// Persist an entry, logging instead of failing.
    pub async fn record_quietly(&self, entry: NewActivityLog) {
        let action = entry.action;
        if let Err(e) = self.record(entry).await {
            warn!(action = action.as_str(), error = %e, "Failed to write audit entry");
        }
    }
}
