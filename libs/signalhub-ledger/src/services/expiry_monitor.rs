use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::events::{AccessRevoker, LedgerEvent, Notifier};
use crate::models::{PlanType, Program, User};
use crate::services::UserService;

/// Outcome of one full pass over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub reminders_sent: usize,
    pub removals: usize,
    pub failures: usize,
}

/// Walks every (user, program, plan) slot, sends expiry reminders at the
/// configured thresholds and revokes access once the grace period runs
/// out.
///
/// One slot failing never stops the pass; failed work is retried on the
/// next scan because the reminder marker is only written after a
/// successful delivery and access is only cleared after a successful
/// revocation.
#[derive(Clone)]
pub struct ExpiryMonitor {
    users: UserService,
    notifier: Arc<dyn Notifier>,
    revoker: Arc<dyn AccessRevoker>,
    reminder_days: Vec<i64>,
    grace_period_days: i64,
    daily_scan_hour: u32,
    scan_interval: Duration,
    collaborator_timeout: Duration,
}

impl ExpiryMonitor {
    pub fn new(
        users: UserService,
        notifier: Arc<dyn Notifier>,
        revoker: Arc<dyn AccessRevoker>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            users,
            notifier,
            revoker,
            reminder_days: config.reminder_days.clone(),
            grace_period_days: config.grace_period_days,
            daily_scan_hour: config.daily_scan_hour,
            scan_interval: config.scan_interval,
            collaborator_timeout: config.collaborator_timeout,
        }
    }

    pub async fn scan(&self) -> ScanReport {
        self.scan_as_of(Utc::now().date_naive()).await
    }

    /// Runs one pass evaluating every subscription against `today`.
    pub async fn scan_as_of(&self, today: NaiveDate) -> ScanReport {
        let users = self.users.all().await;
        let mut report = ScanReport {
            scanned: users.len(),
            ..ScanReport::default()
        };
        for user in &users {
            if let Err(e) = self.scan_user(user, today, &mut report).await {
                warn!(user = user.id, "expiry scan for user failed: {e:#}");
                report.failures += 1;
            }
        }
        report
    }

    async fn scan_user(
        &self,
        user: &User,
        today: NaiveDate,
        report: &mut ScanReport,
    ) -> anyhow::Result<()> {
        for program in Program::ALL {
            for plan in PlanType::ALL {
                let slot = user.access(program).plan(plan);
                let Some(days_left) = slot.days_left(today) else {
                    continue;
                };
                if self.reminder_days.contains(&days_left) {
                    if slot.reminders_sent.get(&days_left) == Some(&today) {
                        continue;
                    }
                    self.send_reminder(user, program, plan, days_left, today, report)
                        .await?;
                } else if days_left < -self.grace_period_days {
                    self.remove_access(user, program, plan, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_reminder(
        &self,
        user: &User,
        program: Program,
        plan: PlanType,
        days_left: i64,
        today: NaiveDate,
        report: &mut ScanReport,
    ) -> anyhow::Result<()> {
        let event = LedgerEvent::ReminderDue {
            user_id: user.id,
            program,
            plan,
            days_left,
            expires_on: today + chrono::Duration::days(days_left),
        };
        match timeout(self.collaborator_timeout, self.notifier.notify(event)).await {
            Ok(Ok(())) => {
                self.users
                    .mark_reminder_sent(user.id, program, plan, days_left, today)
                    .await?;
                report.reminders_sent += 1;
                debug!(user = user.id, %program, %plan, days_left, "reminder sent");
            }
            Ok(Err(e)) => {
                warn!(user = user.id, %program, %plan, days_left, "reminder delivery failed: {e:#}");
                report.failures += 1;
            }
            Err(_) => {
                warn!(user = user.id, %program, %plan, days_left, "reminder delivery timed out");
                report.failures += 1;
            }
        }
        Ok(())
    }

    async fn remove_access(
        &self,
        user: &User,
        program: Program,
        plan: PlanType,
        report: &mut ScanReport,
    ) -> anyhow::Result<()> {
        match timeout(
            self.collaborator_timeout,
            self.revoker.revoke(user.id, program, plan),
        )
        .await
        {
            Ok(Ok(())) => {
                self.users.set_subscription(user.id, program, plan, 0).await?;
                report.removals += 1;
                info!(user = user.id, %program, %plan, "access removed after grace period");
                let event = LedgerEvent::AccessRevoked {
                    user_id: user.id,
                    program,
                    plan,
                };
                match timeout(self.collaborator_timeout, self.notifier.notify(event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(user = user.id, "removal notice failed: {e:#}");
                    }
                    Err(_) => {
                        warn!(user = user.id, "removal notice timed out");
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(user = user.id, %program, %plan, "revocation failed, keeping record: {e:#}");
                report.failures += 1;
            }
            Err(_) => {
                warn!(user = user.id, %program, %plan, "revocation timed out, keeping record");
                report.failures += 1;
            }
        }
        Ok(())
    }

    /// Scans every `scan_interval`, forever.
    pub async fn run_interval_loop(&self) {
        let mut ticker = interval(self.scan_interval);
        loop {
            ticker.tick().await;
            let report = self.scan().await;
            self.log_report("interval scan", &report);
        }
    }

    /// Scans once a day at `daily_scan_hour` UTC, forever.
    pub async fn run_daily_loop(&self) {
        loop {
            sleep(self.until_next_daily_run()).await;
            let report = self.scan().await;
            self.log_report("daily scan", &report);
        }
    }

    fn until_next_daily_run(&self) -> Duration {
        let now = Utc::now();
        let at = NaiveTime::from_hms_opt(self.daily_scan_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let mut target = now.date_naive().and_time(at).and_utc();
        if target <= now {
            target += chrono::Duration::days(1);
        }
        (target - now).to_std().unwrap_or(Duration::from_secs(60))
    }

    fn log_report(&self, label: &str, report: &ScanReport) {
        if report.reminders_sent > 0 || report.removals > 0 || report.failures > 0 {
            info!(
                scanned = report.scanned,
                reminders = report.reminders_sent,
                removals = report.removals,
                failures = report.failures,
                "{label} complete"
            );
        } else {
            debug!(scanned = report.scanned, "{label} complete, nothing due");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordStore;
    use crate::testutil::{scratch_config, RecordingNotifier, RecordingRevoker};
    use std::sync::atomic::Ordering;

    struct Fixture {
        users: UserService,
        monitor: ExpiryMonitor,
        notifier: Arc<RecordingNotifier>,
        revoker: Arc<RecordingRevoker>,
    }

    async fn fixture(tag: &str) -> Fixture {
        let config = scratch_config(tag);
        let store = RecordStore::open(&config).await.unwrap();
        let users = UserService::new(store);
        let notifier = Arc::new(RecordingNotifier::default());
        let revoker = Arc::new(RecordingRevoker::default());
        let monitor = ExpiryMonitor::new(
            users.clone(),
            notifier.clone(),
            revoker.clone(),
            &config,
        );
        Fixture {
            users,
            monitor,
            notifier,
            revoker,
        }
    }

    async fn subscriber(fx: &Fixture, id: i64, expires_on: NaiveDate) {
        fx.users.insert(id, "Sub", None, Program::Crypto).await.unwrap();
        fx.users
            .update(id, |u| u.crypto.vip.expires_on = Some(expires_on))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reminder_fires_once_per_threshold_per_day() {
        let fx = fixture("mon-dedupe").await;
        let today = Utc::now().date_naive();
        subscriber(&fx, 1, today + chrono::Duration::days(7)).await;

        let first = fx.monitor.scan_as_of(today).await;
        let second = fx.monitor.scan_as_of(today).await;

        assert_eq!(first.reminders_sent, 1);
        assert_eq!(second.reminders_sent, 0);
        let events = fx.notifier.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            LedgerEvent::ReminderDue { user_id: 1, days_left: 7, .. }
        ));
        let user = fx.users.get(1).await.unwrap();
        assert_eq!(user.crypto.vip.reminders_sent.get(&7), Some(&today));
    }

    #[tokio::test]
    async fn each_threshold_gets_its_own_reminder() {
        let fx = fixture("mon-thresholds").await;
        let today = Utc::now().date_naive();
        subscriber(&fx, 1, today + chrono::Duration::days(7)).await;

        fx.monitor.scan_as_of(today).await;
        // Four days later the same expiry crosses the 3-day threshold.
        let later = fx.monitor.scan_as_of(today + chrono::Duration::days(4)).await;

        assert_eq!(later.reminders_sent, 1);
        let events = fx.notifier.events();
        assert!(matches!(
            events[1],
            LedgerEvent::ReminderDue { days_left: 3, .. }
        ));
    }

    #[tokio::test]
    async fn expiry_day_sends_the_zero_day_reminder() {
        let fx = fixture("mon-zero").await;
        let today = Utc::now().date_naive();
        subscriber(&fx, 1, today).await;

        let report = fx.monitor.scan_as_of(today).await;

        assert_eq!(report.reminders_sent, 1);
        assert_eq!(report.removals, 0);
        assert!(matches!(
            fx.notifier.events()[0],
            LedgerEvent::ReminderDue { days_left: 0, .. }
        ));
    }

    #[tokio::test]
    async fn grace_period_delays_removal() {
        let fx = fixture("mon-grace").await;
        let today = Utc::now().date_naive();
        // Default grace period is three days; removal requires strictly
        // more than three days past expiry.
        subscriber(&fx, 1, today - chrono::Duration::days(2)).await;
        subscriber(&fx, 2, today - chrono::Duration::days(3)).await;
        subscriber(&fx, 3, today - chrono::Duration::days(4)).await;

        let report = fx.monitor.scan_as_of(today).await;

        assert_eq!(report.removals, 1);
        assert_eq!(fx.revoker.calls(), vec![(3, Program::Crypto, PlanType::Vip)]);
        for still_grace in [1, 2] {
            let user = fx.users.get(still_grace).await.unwrap();
            assert!(user.crypto.vip.expires_on.is_some());
        }
        let removed = fx.users.get(3).await.unwrap();
        assert!(removed.crypto.vip.expires_on.is_none());
        assert!(fx
            .notifier
            .events()
            .iter()
            .any(|e| matches!(e, LedgerEvent::AccessRevoked { user_id: 3, .. })));
    }

    #[tokio::test]
    async fn failed_revocation_keeps_access_for_retry() {
        let fx = fixture("mon-retry").await;
        let today = Utc::now().date_naive();
        subscriber(&fx, 1, today - chrono::Duration::days(10)).await;
        fx.revoker.fail.store(true, Ordering::SeqCst);

        let failed = fx.monitor.scan_as_of(today).await;
        assert_eq!(failed.removals, 0);
        assert_eq!(failed.failures, 1);
        assert!(fx.users.get(1).await.unwrap().crypto.vip.expires_on.is_some());

        fx.revoker.fail.store(false, Ordering::SeqCst);
        let retried = fx.monitor.scan_as_of(today).await;
        assert_eq!(retried.removals, 1);
        assert!(fx.users.get(1).await.unwrap().crypto.vip.expires_on.is_none());
    }

    #[tokio::test]
    async fn failed_reminder_is_retried_within_the_day() {
        let fx = fixture("mon-resend").await;
        let today = Utc::now().date_naive();
        subscriber(&fx, 1, today + chrono::Duration::days(1)).await;
        fx.notifier.fail.store(true, Ordering::SeqCst);

        let failed = fx.monitor.scan_as_of(today).await;
        assert_eq!(failed.reminders_sent, 0);
        assert_eq!(failed.failures, 1);
        let user = fx.users.get(1).await.unwrap();
        assert!(user.crypto.vip.reminders_sent.is_empty());

        fx.notifier.fail.store(false, Ordering::SeqCst);
        let retried = fx.monitor.scan_as_of(today).await;
        assert_eq!(retried.reminders_sent, 1);
    }

    #[tokio::test]
    async fn one_bad_slot_does_not_stop_the_pass() {
        let fx = fixture("mon-isolation").await;
        let today = Utc::now().date_naive();
        subscriber(&fx, 1, today - chrono::Duration::days(10)).await;
        subscriber(&fx, 2, today + chrono::Duration::days(3)).await;
        fx.revoker.fail.store(true, Ordering::SeqCst);

        let report = fx.monitor.scan_as_of(today).await;

        assert_eq!(report.scanned, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.reminders_sent, 1);
    }

    #[tokio::test]
    async fn slots_without_expiry_are_ignored() {
        let fx = fixture("mon-idle").await;
        fx.users.insert(1, "NoSub", None, Program::Crypto).await.unwrap();

        let report = fx.monitor.scan().await;

        assert_eq!(report.scanned, 1);
        assert_eq!(report.reminders_sent, 0);
        assert_eq!(report.removals, 0);
        assert!(fx.notifier.events().is_empty());
    }
}
