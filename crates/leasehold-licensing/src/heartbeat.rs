//! Suspends active licenses whose agents have stopped verifying.

use crate::audit::AuditTrail;
use chrono::Duration as ChronoDuration;
use leasehold_core::Result;
use leasehold_core::activity::{AuditAction, NewActivityLog};
use leasehold_core::clock::Clock;
use leasehold_core::ids::LicenseRecordId;
use leasehold_core::license::{License, LicenseStatus, Trigger};
use leasehold_core::ports::LicenseRepository;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// How often the sweep runs.
    pub period: Duration,
    /// Silence after which an active license is suspended.
    pub threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30 * 60),
            threshold: Duration::from_secs(12 * 3600),
        }
    }
}

pub struct HeartbeatMonitor {
    licenses: Arc<dyn LicenseRepository>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    pub fn new(
        licenses: Arc<dyn LicenseRepository>,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            licenses,
            audit,
            clock,
            config,
        }
    }

    fn silence(&self, license: &License) -> Option<ChronoDuration> {
        let threshold = ChronoDuration::from_std(self.config.threshold).ok()?;
        let silence = self.clock.now_utc() - license.last_verified_at?;
        (silence > threshold).then_some(silence)
    }

    /// One pass. Returns the ids that were suspended.
    pub async fn sweep(&self) -> Result<Vec<LicenseRecordId>> {
        let Ok(threshold) = ChronoDuration::from_std(self.config.threshold) else {
            return Ok(Vec::new());
        };
        let candidates = self.licenses.list_by_status(LicenseStatus::Active).await?;
        let mut suspended = Vec::new();

        for license in candidates {
            let Some(silence) = self.silence(&license) else {
                continue;
            };
            if !license
                .status
                .can_transition(LicenseStatus::Suspended, Trigger::Heartbeat)
            {
                continue;
            }
            // Conditional on the stored row, so a verify landing since the listing wins.
            let now = self.clock.now_utc();
            if !self
                .licenses
                .suspend_if_silent(license.id, now - threshold, now)
                .await?
            {
                continue;
            }

            let hours = silence.num_hours();
            warn!(license_id = %license.license_id, hours, "License silent, suspending");
            self.audit
                .record_quietly(
                    NewActivityLog::new(
                        AuditAction::AutoSuspend,
                        format!("No verification for {hours} hours"),
                    )
                    .license(license.id)
                    .server(license.server_id),
                )
                .await;
            suspended.push(license.id);
        }

        Ok(suspended)
    }

    /// Sweep every period until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.period);

        info!(
            period_secs = self.config.period.as_secs(),
            threshold_secs = self.config.threshold.as_secs(),
            "Starting heartbeat monitor"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(ids) if !ids.is_empty() => info!(count = ids.len(), "Heartbeat sweep suspended licenses"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Heartbeat sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Heartbeat monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use leasehold_core::activity::AuditAction;

    #[tokio::test]
    async fn test_sweep_suspends_only_stale_active_licenses() {
        let h = Harness::new();
        let a = "a".repeat(64);
        h.create_license("LIC-STALE", None).await;
        h.licenses.provision("LIC-STALE", &a).await.unwrap();
        h.create_license("LIC-NEVER", None).await;
        let manual = h.create_license("LIC-MANUAL", None).await;
        h.licenses
            .set_status(manual.id, LicenseStatus::Active)
            .await
            .unwrap();

        h.clock.advance(ChronoDuration::hours(11));
        h.create_license("LIC-FRESH", None).await;
        h.licenses.provision("LIC-FRESH", &"f".repeat(64)).await.unwrap();
        assert!(h.heartbeat.sweep().await.unwrap().is_empty());

        h.clock.advance(ChronoDuration::hours(2));
        let suspended = h.heartbeat.sweep().await.unwrap();
        let stale = h.licenses.get_by_name("LIC-STALE").await.unwrap();
        assert_eq!(suspended, vec![stale.id]);
        assert_eq!(stale.status, LicenseStatus::Suspended);

        // never verified, so never suspended
        assert_eq!(
            h.licenses.get_by_name("LIC-MANUAL").await.unwrap().status,
            LicenseStatus::Active
        );
        assert_eq!(
            h.licenses.get_by_name("LIC-FRESH").await.unwrap().status,
            LicenseStatus::Active
        );
        assert!(h.has_audit(AuditAction::AutoSuspend).await);

        // idempotent
        assert!(h.heartbeat.sweep().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_license_verified_mid_sweep() {
        let h = Harness::interleaved();
        let hwid = "d".repeat(64);
        h.create_license("LIC-1", None).await;
        h.licenses.provision("LIC-1", &hwid).await.unwrap();
        h.clock.advance(ChronoDuration::hours(13));

        let (verified, suspended) =
            tokio::join!(h.licenses.verify("LIC-1", &hwid), h.heartbeat.sweep());
        assert!(verified.unwrap().valid);
        assert!(suspended.unwrap().is_empty());

        let license = h.licenses.get_by_name("LIC-1").await.unwrap();
        assert_eq!(license.status, LicenseStatus::Active);
        assert_eq!(license.last_verified_at, Some(h.clock.now_utc()));
        assert!(!h.has_audit(AuditAction::AutoSuspend).await);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new();
        let (tx, rx) = watch::channel(false);
        let monitor = h.heartbeat.clone();
        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
