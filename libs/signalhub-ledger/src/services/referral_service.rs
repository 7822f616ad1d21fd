use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::events::{LedgerEvent, Notifier};
use crate::models::{Commission, CommissionSummary, PlanType, Program, Referral};
use crate::store::RecordStore;
use crate::util::id_suffix;

/// Per-affiliate rollup used by the earnings dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct AffiliateStats {
    pub user_id: i64,
    pub earnings: i64,
    pub paid: i64,
    pub pending: i64,
    pub available: i64,
    pub referral_count: usize,
    pub subscribed_referrals: usize,
    pub commission_count: usize,
}

/// Ledger-wide commission totals plus the top-earner breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct CommissionReport {
    pub total_commissions: usize,
    pub total_amount: i64,
    pub by_affiliate: Vec<AffiliateRollup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AffiliateRollup {
    pub affiliate_id: i64,
    pub affiliate_name: String,
    pub commission_count: usize,
    pub total_amount: i64,
}

/// Referral attribution and commission crediting.
///
/// Attribution links a referred user to exactly one affiliate for life;
/// crediting moves money onto the affiliate's balances and marks the
/// referral converted.
#[derive(Clone)]
pub struct ReferralService {
    store: RecordStore,
    notifier: Arc<dyn Notifier>,
}

impl ReferralService {
    pub fn new(store: RecordStore, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Links `user_id` to `affiliate_id`. Returns `Ok(false)` when the link
    /// cannot be made (self-referral, unknown party); repeating an existing
    /// link is a no-op that still reports success.
    pub async fn attribute_referral(
        &self,
        affiliate_id: i64,
        user_id: i64,
    ) -> Result<bool, LedgerError> {
        if affiliate_id == user_id {
            debug!(user = user_id, "self-referral ignored");
            return Ok(false);
        }
        self.store
            .mutate(|doc| {
                if doc.user(affiliate_id).is_none() || doc.user(user_id).is_none() {
                    debug!(affiliate = affiliate_id, user = user_id, "referral with unknown party ignored");
                    return Ok(false);
                }
                let key = Referral::key(affiliate_id, user_id);
                if doc.referrals.contains_key(&key) {
                    return Ok(true);
                }
                doc.referrals.insert(key, Referral::new(affiliate_id, user_id));

                if let Some(affiliate) = doc.user_mut(affiliate_id) {
                    if !affiliate.referrals.contains(&user_id) {
                        affiliate.referrals.push(user_id);
                    }
                    affiliate.referral_count = affiliate.referrals.len();
                }
                if let Some(user) = doc.user_mut(user_id) {
                    if user.referred_by.is_none() {
                        user.referred_by = Some(affiliate_id);
                    }
                }
                info!(affiliate = affiliate_id, user = user_id, "referral attributed");
                Ok(true)
            })
            .await
    }

    /// Credits a commission to `affiliate_id` for a purchase made by
    /// `user_id`. Creates the referral link if attribution never happened,
    /// marks it converted, and lifts every affiliate balance except `paid`.
    pub async fn record_commission(
        &self,
        affiliate_id: i64,
        user_id: i64,
        amount: i64,
        program: Program,
        plan: PlanType,
        vip_duration_days: Option<i64>,
    ) -> Result<Commission, LedgerError> {
        let commission = self
            .store
            .mutate(|doc| {
                if doc.user(user_id).is_none() {
                    return Err(LedgerError::UserNotFound(user_id));
                }
                if doc.user(affiliate_id).is_none() {
                    return Err(LedgerError::UserNotFound(affiliate_id));
                }

                let now = Utc::now();
                let commission = Commission {
                    id: format!(
                        "COMM_{}_{}_{}",
                        now.format("%Y%m%d_%H%M%S"),
                        affiliate_id,
                        id_suffix(4)
                    ),
                    affiliate_id,
                    user_id,
                    amount,
                    program,
                    plan,
                    vip_duration_days,
                    date: now,
                };
                doc.commissions.insert(commission.id.clone(), commission.clone());

                let referral = doc
                    .referrals
                    .entry(Referral::key(affiliate_id, user_id))
                    .or_insert_with(|| Referral::new(affiliate_id, user_id));
                referral.has_subscribed = true;
                referral.commission_earned += amount;

                if let Some(affiliate) = doc.user_mut(affiliate_id) {
                    affiliate.affiliate_earnings += amount;
                    affiliate.affiliate_pending += amount;
                    affiliate.affiliate_available += amount;
                    if !affiliate.referrals.contains(&user_id) {
                        affiliate.referrals.push(user_id);
                    }
                    affiliate.referral_count = affiliate.referrals.len();
                    affiliate.commission_history.push(CommissionSummary {
                        commission_id: commission.id.clone(),
                        referred_id: user_id,
                        amount,
                        program,
                        plan,
                        date: now,
                    });
                }
                if let Some(user) = doc.user_mut(user_id) {
                    if user.referred_by.is_none() {
                        user.referred_by = Some(affiliate_id);
                    }
                }
                info!(
                    affiliate = affiliate_id,
                    user = user_id,
                    amount,
                    id = %commission.id,
                    "commission credited"
                );
                Ok(commission)
            })
            .await?;

        let event = LedgerEvent::CommissionCredited {
            affiliate_id,
            user_id,
            amount,
            program,
            plan,
        };
        if let Err(e) = self.notifier.notify(event).await {
            warn!(affiliate = affiliate_id, "commission notification failed: {e:#}");
        }
        Ok(commission)
    }

    pub async fn affiliate_stats(&self, affiliate_id: i64) -> Result<AffiliateStats, LedgerError> {
        self.store
            .with(|doc| {
                let user = doc
                    .user(affiliate_id)
                    .ok_or(LedgerError::UserNotFound(affiliate_id))?;
                let subscribed = doc
                    .referrals
                    .values()
                    .filter(|r| r.affiliate_id == affiliate_id && r.has_subscribed)
                    .count();
                let commissions = doc
                    .commissions
                    .values()
                    .filter(|c| c.affiliate_id == affiliate_id)
                    .count();
                Ok(AffiliateStats {
                    user_id: affiliate_id,
                    earnings: user.affiliate_earnings,
                    paid: user.affiliate_paid,
                    pending: user.affiliate_pending,
                    available: user.affiliate_available,
                    referral_count: user.referral_count,
                    subscribed_referrals: subscribed,
                    commission_count: commissions,
                })
            })
            .await
    }

    /// Newest-first commission feed for one affiliate.
    pub async fn recent_commissions(&self, affiliate_id: i64, limit: usize) -> Vec<Commission> {
        self.store
            .with(|doc| {
                let mut list: Vec<Commission> = doc
                    .commissions
                    .values()
                    .filter(|c| c.affiliate_id == affiliate_id)
                    .cloned()
                    .collect();
                list.sort_by(|a, b| b.date.cmp(&a.date));
                list.truncate(limit);
                list
            })
            .await
    }

    pub async fn commission_report(&self) -> CommissionReport {
        self.store
            .with(|doc| {
                let mut by_affiliate: BTreeMap<i64, AffiliateRollup> = BTreeMap::new();
                let mut total_amount = 0i64;
                for commission in doc.commissions.values() {
                    total_amount += commission.amount;
                    let entry = by_affiliate
                        .entry(commission.affiliate_id)
                        .or_insert_with(|| AffiliateRollup {
                            affiliate_id: commission.affiliate_id,
                            affiliate_name: doc
                                .user(commission.affiliate_id)
                                .map(|u| u.name.clone())
                                .unwrap_or_else(|| commission.affiliate_id.to_string()),
                            commission_count: 0,
                            total_amount: 0,
                        });
                    entry.commission_count += 1;
                    entry.total_amount += commission.amount;
                }
                let mut by_affiliate: Vec<AffiliateRollup> = by_affiliate.into_values().collect();
                by_affiliate.sort_by(|a, b| b.total_amount.cmp(&a.total_amount));
                CommissionReport {
                    total_commissions: doc.commissions.len(),
                    total_amount,
                    by_affiliate,
                }
            })
            .await
    }

    /// Newest-first referral links created by one affiliate.
    pub async fn referrals_of(&self, affiliate_id: i64) -> Vec<Referral> {
        self.store
            .with(|doc| {
                let mut list: Vec<Referral> = doc
                    .referrals
                    .values()
                    .filter(|r| r.affiliate_id == affiliate_id)
                    .cloned()
                    .collect();
                list.sort_by(|a, b| b.referral_date.cmp(&a.referral_date));
                list
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::UserService;
    use crate::testutil::{scratch_config, RecordingNotifier};

    async fn fixture(tag: &str) -> (UserService, ReferralService, Arc<RecordingNotifier>) {
        let store = RecordStore::open(&scratch_config(tag)).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        (
            UserService::new(store.clone()),
            ReferralService::new(store, notifier.clone()),
            notifier,
        )
    }

    #[tokio::test]
    async fn duplicate_attribution_is_a_noop() {
        let (users, referrals, _) = fixture("ref-dup").await;
        users.insert(1, "Aff", None, Program::Crypto).await.unwrap();
        users.insert(2, "Ref", None, Program::Crypto).await.unwrap();

        assert!(referrals.attribute_referral(1, 2).await.unwrap());
        assert!(referrals.attribute_referral(1, 2).await.unwrap());

        let affiliate = users.get(1).await.unwrap();
        assert_eq!(affiliate.referrals, vec![2]);
        assert_eq!(affiliate.referral_count, 1);
        assert_eq!(referrals.referrals_of(1).await.len(), 1);
    }

    #[tokio::test]
    async fn self_and_unknown_referrals_are_refused() {
        let (users, referrals, _) = fixture("ref-refuse").await;
        users.insert(1, "Aff", None, Program::Crypto).await.unwrap();

        assert!(!referrals.attribute_referral(1, 1).await.unwrap());
        assert!(!referrals.attribute_referral(1, 999).await.unwrap());
        assert!(!referrals.attribute_referral(999, 1).await.unwrap());
        assert!(referrals.referrals_of(1).await.is_empty());
    }

    #[tokio::test]
    async fn first_attribution_wins() {
        let (users, referrals, _) = fixture("ref-first").await;
        users.insert(1, "AffA", None, Program::Crypto).await.unwrap();
        users.insert(2, "AffB", None, Program::Crypto).await.unwrap();
        users.insert(3, "Shared", None, Program::Crypto).await.unwrap();

        referrals.attribute_referral(1, 3).await.unwrap();
        referrals.attribute_referral(2, 3).await.unwrap();

        let user = users.get(3).await.unwrap();
        assert_eq!(user.referred_by, Some(1));
        // Both affiliates still carry the link for their own lists.
        assert_eq!(referrals.referrals_of(2).await.len(), 1);
    }

    #[tokio::test]
    async fn commission_updates_every_balance_except_paid() {
        let (users, referrals, notifier) = fixture("ref-comm").await;
        users.insert(1, "Aff", None, Program::Crypto).await.unwrap();
        users.insert(2, "Buyer", None, Program::Crypto).await.unwrap();
        referrals.attribute_referral(1, 2).await.unwrap();

        let commission = referrals
            .record_commission(1, 2, 50_000, Program::Crypto, PlanType::Vip, Some(90))
            .await
            .unwrap();

        assert!(commission.id.starts_with("COMM_"));
        let affiliate = users.get(1).await.unwrap();
        assert_eq!(affiliate.affiliate_earnings, 50_000);
        assert_eq!(affiliate.affiliate_pending, 50_000);
        assert_eq!(affiliate.affiliate_available, 50_000);
        assert_eq!(affiliate.affiliate_paid, 0);
        assert_eq!(affiliate.commission_history.len(), 1);

        let stats = referrals.affiliate_stats(1).await.unwrap();
        assert_eq!(stats.subscribed_referrals, 1);
        assert_eq!(stats.commission_count, 1);

        let events = notifier.events();
        assert!(matches!(
            events.as_slice(),
            [LedgerEvent::CommissionCredited { amount: 50_000, .. }]
        ));
    }

    #[tokio::test]
    async fn commission_without_prior_attribution_creates_the_link() {
        let (users, referrals, _) = fixture("ref-late").await;
        users.insert(1, "Aff", None, Program::Crypto).await.unwrap();
        users.insert(2, "Buyer", None, Program::Crypto).await.unwrap();

        referrals
            .record_commission(1, 2, 10_000, Program::Crypto, PlanType::Academy, None)
            .await
            .unwrap();

        let links = referrals.referrals_of(1).await;
        assert_eq!(links.len(), 1);
        assert!(links[0].has_subscribed);
        assert_eq!(links[0].commission_earned, 10_000);
        assert_eq!(users.get(2).await.unwrap().referred_by, Some(1));
    }

    #[tokio::test]
    async fn earnings_equal_the_sum_of_commissions() {
        let (users, referrals, _) = fixture("ref-sum").await;
        users.insert(1, "Aff", None, Program::Crypto).await.unwrap();
        users.insert(2, "BuyerA", None, Program::Crypto).await.unwrap();
        users.insert(3, "BuyerB", None, Program::Forex).await.unwrap();

        referrals
            .record_commission(1, 2, 30_000, Program::Crypto, PlanType::Vip, Some(30))
            .await
            .unwrap();
        referrals
            .record_commission(1, 3, 45_000, Program::Forex, PlanType::Academy, None)
            .await
            .unwrap();
        referrals
            .record_commission(1, 2, 25_000, Program::Crypto, PlanType::Vip, Some(90))
            .await
            .unwrap();

        let stats = referrals.affiliate_stats(1).await.unwrap();
        assert_eq!(stats.earnings, 100_000);
        assert_eq!(stats.commission_count, 3);
        assert_eq!(stats.referral_count, 2);

        let report = referrals.commission_report().await;
        assert_eq!(report.total_commissions, 3);
        assert_eq!(report.total_amount, 100_000);
        assert_eq!(report.by_affiliate[0].affiliate_id, 1);
        assert_eq!(report.by_affiliate[0].total_amount, 100_000);
    }

    #[tokio::test]
    async fn commission_survives_notifier_failure() {
        let (users, referrals, notifier) = fixture("ref-notify-fail").await;
        users.insert(1, "Aff", None, Program::Crypto).await.unwrap();
        users.insert(2, "Buyer", None, Program::Crypto).await.unwrap();
        notifier.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        referrals
            .record_commission(1, 2, 5_000, Program::Crypto, PlanType::Vip, Some(30))
            .await
            .unwrap();

        let affiliate = users.get(1).await.unwrap();
        assert_eq!(affiliate.affiliate_earnings, 5_000);
    }

    #[tokio::test]
    async fn recent_commissions_are_newest_first_and_bounded() {
        let (users, referrals, _) = fixture("ref-recent").await;
        users.insert(1, "Aff", None, Program::Crypto).await.unwrap();
        users.insert(2, "Buyer", None, Program::Crypto).await.unwrap();
        for amount in [1_000, 2_000, 3_000] {
            referrals
                .record_commission(1, 2, amount, Program::Crypto, PlanType::Vip, Some(30))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let recent = referrals.recent_commissions(1, 2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].amount, 3_000);
        assert_eq!(recent[1].amount, 2_000);
    }
}
