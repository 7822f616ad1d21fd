use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::error::LedgerError;
use crate::models::{PlanType, Program};

use super::RecordStore;

const SNAPSHOT_PREFIX: &str = "ledger_backup_";
const FLUSH_TICK: Duration = Duration::from_secs(5);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(24 * 3600);
const STALE_PROOF_DAYS: i64 = 7;

/// Operational counters for the `stats` admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_users: usize,
    pub total_affiliates: usize,
    pub total_commissions: usize,
    pub total_payouts: usize,
    pub pending_payouts: usize,
    pub active_subscriptions: usize,
    pub file_size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expiries_cleared: usize,
    pub proofs_cleared: usize,
}

impl RecordStore {
    /// Copies the last successfully saved file into the backup directory and
    /// prunes snapshots past the retention window. Reads disk, not the
    /// in-memory document, so it never contends with mutators.
    pub async fn snapshot(&self) -> Result<PathBuf, LedgerError> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|err| {
                LedgerError::persistence(format!(
                    "creating {}: {err}",
                    self.backup_dir.display()
                ))
            })?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let dest = self.backup_dir.join(format!("{SNAPSHOT_PREFIX}{stamp}.json"));
        tokio::fs::copy(&self.path, &dest).await.map_err(|err| {
            LedgerError::persistence(format!("snapshot {}: {err}", dest.display()))
        })?;

        let pruned = self.prune_snapshots().await;
        info!(snapshot = %dest.display(), pruned, "ledger snapshot taken");
        Ok(dest)
    }

    async fn prune_snapshots(&self) -> usize {
        let horizon = Duration::from_secs(self.backup_retention_days.max(0) as u64 * 86_400);
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "could not scan the backup directory");
                return 0;
            }
        };

        let mut pruned = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if modified.elapsed().unwrap_or_default() > horizon {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => pruned += 1,
                    Err(err) => {
                        warn!(error = %err, file = %entry.path().display(), "could not prune snapshot")
                    }
                }
            }
        }
        pruned
    }

    pub async fn stats(&self) -> StoreStats {
        let today = Utc::now().date_naive();
        let mut stats = self
            .with(|doc| StoreStats {
                total_users: doc.users.len(),
                total_affiliates: doc.users.values().filter(|u| u.is_affiliate).count(),
                total_commissions: doc.commissions.len(),
                total_payouts: doc.payouts.len(),
                pending_payouts: doc.pending_payouts(),
                active_subscriptions: doc
                    .users
                    .values()
                    .filter(|u| u.has_active_subscription(today))
                    .count(),
                file_size_bytes: 0,
                created_at: doc.metadata.created_at,
                updated_at: doc.metadata.updated_at,
            })
            .await;
        if let Ok(meta) = tokio::fs::metadata(&self.path).await {
            stats.file_size_bytes = meta.len();
        }
        stats
    }

    /// Clears expiry dates that lapsed more than `retention_days` ago and
    /// payment proofs that sat unreviewed for over a week. Keeps the user
    /// records themselves; only the stale fields are nulled.
    pub async fn cleanup_old_data(
        &self,
        retention_days: i64,
    ) -> Result<CleanupReport, LedgerError> {
        let today = Utc::now().date_naive();
        let proof_cutoff = Utc::now() - chrono::Duration::days(STALE_PROOF_DAYS);

        let report = self
            .mutate(|doc| {
                let mut report = CleanupReport::default();
                for user in doc.users.values_mut() {
                    for program in Program::ALL {
                        for plan in PlanType::ALL {
                            let slot = user.access_mut(program).plan_mut(plan);
                            if let Some(expiry) = slot.expires_on {
                                if (today - expiry).num_days() > retention_days {
                                    slot.expires_on = None;
                                    slot.reminders_sent.clear();
                                    report.expiries_cleared += 1;
                                }
                            }
                        }
                    }
                    if let Some(proof) = &user.pending_proof {
                        if proof.uploaded_at < proof_cutoff {
                            user.pending_proof = None;
                            report.proofs_cleared += 1;
                        }
                    }
                }
                Ok(report)
            })
            .await?;

        if report == CleanupReport::default() {
            debug!("cleanup found nothing stale");
        } else {
            info!(?report, retention_days, "cleared stale ledger data");
        }
        Ok(report)
    }

    /// Periodic autosave tick. Catches the age branch of the autosave policy
    /// when no further mutations arrive to trigger it.
    pub async fn run_flush_loop(&self) {
        let mut ticker = interval(FLUSH_TICK);
        loop {
            ticker.tick().await;
            self.autosave_if_due().await;
        }
    }

    pub async fn run_snapshot_loop(&self) {
        info!("starting ledger snapshot job");
        let mut ticker = interval(SNAPSHOT_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = self.snapshot().await {
                error!(error = %err, "ledger snapshot failed");
            }
        }
    }
}
