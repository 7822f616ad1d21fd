use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::events::{LedgerEvent, Notifier};
use crate::models::{Payout, PayoutStatus};
use crate::store::RecordStore;
use crate::util::id_suffix;

/// Payout requests and their pending -> paid/rejected lifecycle.
///
/// Requesting reserves the money by decrementing both `pending` and
/// `available`; settling either books it as paid or returns the
/// reservation. Terminal payouts never change again.
#[derive(Clone)]
pub struct PayoutService {
    store: RecordStore,
    notifier: Arc<dyn Notifier>,
    minimum_payout: i64,
}

impl PayoutService {
    pub fn new(store: RecordStore, notifier: Arc<dyn Notifier>, minimum_payout: i64) -> Self {
        Self {
            store,
            notifier,
            minimum_payout,
        }
    }

    /// Opens a payout request against the user's available balance.
    pub async fn request_payout(
        &self,
        user_id: i64,
        amount: i64,
        method: &str,
        details: &str,
    ) -> Result<Payout, LedgerError> {
        let minimum = self.minimum_payout;
        self.store
            .mutate(|doc| {
                let user = doc.user_mut(user_id).ok_or(LedgerError::UserNotFound(user_id))?;
                if amount < minimum {
                    return Err(LedgerError::BelowMinimumPayout {
                        minimum,
                        requested: amount,
                    });
                }
                if amount > user.affiliate_available {
                    return Err(LedgerError::InsufficientBalance {
                        available: user.affiliate_available,
                        requested: amount,
                    });
                }
                user.affiliate_pending -= amount;
                user.affiliate_available -= amount;

                let now = Utc::now();
                let payout = Payout {
                    id: format!(
                        "PAYOUT_{}_{}_{}",
                        now.format("%Y%m%d_%H%M%S"),
                        user_id,
                        id_suffix(4)
                    ),
                    user_id,
                    affiliate_name: user.name.clone(),
                    amount,
                    method: method.to_string(),
                    details: details.to_string(),
                    status: PayoutStatus::Pending,
                    request_date: now,
                    processed_date: None,
                    proof_ref: None,
                };
                doc.payouts.insert(payout.id.clone(), payout.clone());
                info!(user = user_id, amount, id = %payout.id, "payout requested");
                Ok(payout)
            })
            .await
    }

    /// Settles a pending payout as paid.
    pub async fn mark_paid(&self, payout_id: &str) -> Result<Payout, LedgerError> {
        self.settle_paid(payout_id, None).await
    }

    /// Settles a pending payout as paid and attaches the transfer proof.
    /// Attaching proof also reconciles the balances: nothing stays
    /// pending, and `available` is recomputed from lifetime figures.
    pub async fn mark_paid_with_proof(
        &self,
        payout_id: &str,
        proof_ref: &str,
    ) -> Result<Payout, LedgerError> {
        self.settle_paid(payout_id, Some(proof_ref)).await
    }

    async fn settle_paid(
        &self,
        payout_id: &str,
        proof_ref: Option<&str>,
    ) -> Result<Payout, LedgerError> {
        let proof_ref = proof_ref.map(str::to_string);
        let settled = self
            .store
            .mutate(|doc| {
                let payout = doc
                    .payouts
                    .get_mut(payout_id)
                    .ok_or_else(|| LedgerError::PayoutNotFound(payout_id.to_string()))?;
                if payout.status.is_terminal() {
                    return Err(LedgerError::invalid_transition(format!(
                        "payout {payout_id} is already {}",
                        payout.status
                    )));
                }
                payout.status = PayoutStatus::Paid;
                payout.processed_date = Some(Utc::now());
                payout.proof_ref = proof_ref.clone();
                let payout = payout.clone();

                if let Some(user) = doc.user_mut(payout.user_id) {
                    user.affiliate_paid += payout.amount;
                    if proof_ref.is_some() {
                        user.affiliate_pending = 0;
                        user.affiliate_available =
                            (user.affiliate_earnings - user.affiliate_paid).max(0);
                    }
                }
                info!(id = %payout.id, user = payout.user_id, amount = payout.amount, "payout paid");
                Ok(payout)
            })
            .await?;
        self.announce(&settled).await;
        Ok(settled)
    }

    /// Rejects a pending payout and returns the reserved money to the
    /// affiliate's balances.
    pub async fn reject(&self, payout_id: &str) -> Result<Payout, LedgerError> {
        let settled = self
            .store
            .mutate(|doc| {
                let payout = doc
                    .payouts
                    .get_mut(payout_id)
                    .ok_or_else(|| LedgerError::PayoutNotFound(payout_id.to_string()))?;
                if payout.status.is_terminal() {
                    return Err(LedgerError::invalid_transition(format!(
                        "payout {payout_id} is already {}",
                        payout.status
                    )));
                }
                payout.status = PayoutStatus::Rejected;
                payout.processed_date = Some(Utc::now());
                let payout = payout.clone();

                if let Some(user) = doc.user_mut(payout.user_id) {
                    user.affiliate_pending += payout.amount;
                    user.affiliate_available += payout.amount;
                }
                info!(id = %payout.id, user = payout.user_id, amount = payout.amount, "payout rejected");
                Ok(payout)
            })
            .await?;
        self.announce(&settled).await;
        Ok(settled)
    }

    async fn announce(&self, payout: &Payout) {
        let event = LedgerEvent::PayoutSettled {
            payout: payout.clone(),
        };
        if let Err(e) = self.notifier.notify(event).await {
            warn!(id = %payout.id, "payout notification failed: {e:#}");
        }
    }

    pub async fn get(&self, payout_id: &str) -> Option<Payout> {
        self.store
            .with(|doc| doc.payouts.get(payout_id).cloned())
            .await
    }

    /// Open requests, oldest first, the order an operator should work
    /// through them.
    pub async fn pending(&self) -> Vec<Payout> {
        self.store
            .with(|doc| {
                let mut list: Vec<Payout> = doc
                    .payouts
                    .values()
                    .filter(|p| p.status == PayoutStatus::Pending)
                    .cloned()
                    .collect();
                list.sort_by(|a, b| a.request_date.cmp(&b.request_date));
                list
            })
            .await
    }

    /// Every payout one user ever requested, newest first.
    pub async fn for_user(&self, user_id: i64) -> Vec<Payout> {
        self.store
            .with(|doc| {
                let mut list: Vec<Payout> = doc
                    .payouts
                    .values()
                    .filter(|p| p.user_id == user_id)
                    .cloned()
                    .collect();
                list.sort_by(|a, b| b.request_date.cmp(&a.request_date));
                list
            })
            .await
    }

    /// Recently settled payouts, newest settlement first.
    pub async fn processed(&self, limit: usize) -> Vec<Payout> {
        self.store
            .with(|doc| {
                let mut list: Vec<Payout> = doc
                    .payouts
                    .values()
                    .filter(|p| p.status.is_terminal())
                    .cloned()
                    .collect();
                list.sort_by(|a, b| b.processed_date.cmp(&a.processed_date));
                list.truncate(limit);
                list
            })
            .await
    }
}
