use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::models::{AffiliateStatus, PendingProof, PlanType, Program, User};
use crate::store::RecordStore;

/// CRUD and balance-adjacent operations over user records.
///
/// Reads are pure; recency tracking is the explicit [`UserService::touch_last_active`]
/// call so callers (and tests) can fetch without mutating.
#[derive(Debug, Clone)]
pub struct UserService {
    store: RecordStore,
}

impl UserService {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Registers a user. Idempotent: an existing id returns the stored
    /// record unchanged.
    pub async fn insert(
        &self,
        id: i64,
        name: &str,
        handle: Option<&str>,
        program: Program,
    ) -> Result<User, LedgerError> {
        self.store
            .mutate(|doc| {
                if let Some(existing) = doc.user(id) {
                    debug!(user = id, "insert ignored, id already registered");
                    return Ok(existing.clone());
                }
                let user = User::new(id, name, handle, program);
                doc.users.insert(id.to_string(), user.clone());
                info!(user = id, %program, "registered new user");
                Ok(user)
            })
            .await
    }

    pub async fn get(&self, id: i64) -> Option<User> {
        self.store.with(|doc| doc.user(id).cloned()).await
    }

    pub async fn touch_last_active(&self, id: i64) -> Result<(), LedgerError> {
        self.store
            .mutate(|doc| {
                let user = doc.user_mut(id).ok_or(LedgerError::UserNotFound(id))?;
                user.last_active = Utc::now();
                Ok(())
            })
            .await
    }

    /// Applies an arbitrary patch to an existing record and returns the
    /// updated copy.
    pub async fn update(
        &self,
        id: i64,
        patch: impl FnOnce(&mut User),
    ) -> Result<User, LedgerError> {
        self.store
            .mutate(|doc| {
                let user = doc.user_mut(id).ok_or(LedgerError::UserNotFound(id))?;
                patch(user);
                Ok(user.clone())
            })
            .await
    }

    /// Sets or clears one (program, plan) expiry. `duration_days <= 0`
    /// clears the slot; this is the removal primitive the scheduler and
    /// admin cancellation both use. A VIP grant consumes the program's
    /// one-time trial. Changing the expiry re-arms the reminder thresholds.
    pub async fn set_subscription(
        &self,
        id: i64,
        program: Program,
        plan: PlanType,
        duration_days: i64,
    ) -> Result<Option<NaiveDate>, LedgerError> {
        self.store
            .mutate(|doc| {
                let user = doc.user_mut(id).ok_or(LedgerError::UserNotFound(id))?;
                let access = user.access_mut(program);
                let slot = access.plan_mut(plan);
                slot.reminders_sent.clear();
                if duration_days <= 0 {
                    slot.expires_on = None;
                    info!(user = id, %program, %plan, "subscription cleared");
                    Ok(None)
                } else {
                    let expires = Utc::now().date_naive() + chrono::Duration::days(duration_days);
                    slot.expires_on = Some(expires);
                    if plan == PlanType::Vip {
                        access.trial_used = true;
                    }
                    info!(user = id, %program, %plan, days = duration_days, until = %expires, "subscription set");
                    Ok(Some(expires))
                }
            })
            .await
    }

    pub async fn mark_trial_used(&self, id: i64, program: Program) -> Result<(), LedgerError> {
        self.update(id, |user| user.access_mut(program).trial_used = true)
            .await
            .map(|_| ())
    }

    pub async fn set_program(&self, id: i64, program: Program) -> Result<(), LedgerError> {
        self.update(id, |user| user.program = program).await.map(|_| ())
    }

    /// Stashes an in-flight payment proof, replacing any previous one.
    pub async fn set_pending_proof(
        &self,
        id: i64,
        proof: PendingProof,
    ) -> Result<(), LedgerError> {
        self.update(id, |user| user.pending_proof = Some(proof))
            .await
            .map(|_| ())
    }

    /// Removes and returns the stashed proof, if any. The approval flow
    /// consumes it exactly once.
    pub async fn take_pending_proof(
        &self,
        id: i64,
    ) -> Result<Option<PendingProof>, LedgerError> {
        self.store
            .mutate(|doc| {
                let user = doc.user_mut(id).ok_or(LedgerError::UserNotFound(id))?;
                Ok(user.pending_proof.take())
            })
            .await
    }

    /// Records that a reminder fired for (program, plan, threshold) on the
    /// given date. The scheduler consults this to stay idempotent per day.
    pub async fn mark_reminder_sent(
        &self,
        id: i64,
        program: Program,
        plan: PlanType,
        days_left: i64,
        on: NaiveDate,
    ) -> Result<(), LedgerError> {
        self.update(id, |user| {
            user.access_mut(program)
                .plan_mut(plan)
                .reminders_sent
                .insert(days_left, on);
        })
        .await
        .map(|_| ())
    }

    pub async fn apply_for_affiliate(&self, id: i64) -> Result<User, LedgerError> {
        self.store
            .mutate(|doc| {
                let user = doc.user_mut(id).ok_or(LedgerError::UserNotFound(id))?;
                match user.affiliate_status {
                    AffiliateStatus::Pending => Err(LedgerError::invalid_transition(format!(
                        "user {id} already has a pending affiliate application"
                    ))),
                    AffiliateStatus::Approved => Err(LedgerError::invalid_transition(format!(
                        "user {id} is already an approved affiliate"
                    ))),
                    AffiliateStatus::None | AffiliateStatus::Rejected => {
                        user.affiliate_status = AffiliateStatus::Pending;
                        user.affiliate_applied_at = Some(Utc::now());
                        info!(user = id, "affiliate application submitted");
                        Ok(user.clone())
                    }
                }
            })
            .await
    }

    /// Approves an affiliate and assigns their code. The code must be
    /// unique across every affiliate, current applicants included.
    pub async fn approve_affiliate(&self, id: i64, code: &str) -> Result<User, LedgerError> {
        self.store
            .mutate(|doc| {
                let clash = doc.users.values().any(|other| {
                    other.id != id
                        && other.is_affiliate
                        && other.affiliate_code.as_deref() == Some(code)
                });
                if clash {
                    return Err(LedgerError::AlreadyExists(format!(
                        "affiliate code {code} is already assigned"
                    )));
                }
                let user = doc.user_mut(id).ok_or(LedgerError::UserNotFound(id))?;
                if user.affiliate_status == AffiliateStatus::Approved {
                    return Err(LedgerError::invalid_transition(format!(
                        "user {id} is already an approved affiliate"
                    )));
                }
                user.affiliate_status = AffiliateStatus::Approved;
                user.is_affiliate = true;
                user.affiliate_code = Some(code.to_string());
                user.affiliate_decided_at = Some(Utc::now());
                info!(user = id, code, "affiliate approved");
                Ok(user.clone())
            })
            .await
    }

    /// Rejects a pending application. Reapplication is allowed immediately;
    /// the decision timestamp is recorded should a cooldown ever be
    /// enforced.
    pub async fn reject_affiliate(&self, id: i64) -> Result<User, LedgerError> {
        self.store
            .mutate(|doc| {
                let user = doc.user_mut(id).ok_or(LedgerError::UserNotFound(id))?;
                if user.affiliate_status != AffiliateStatus::Pending {
                    return Err(LedgerError::invalid_transition(format!(
                        "user {id} has no pending affiliate application"
                    )));
                }
                user.affiliate_status = AffiliateStatus::Rejected;
                user.affiliate_decided_at = Some(Utc::now());
                info!(user = id, "affiliate application rejected");
                Ok(user.clone())
            })
            .await
    }

    pub async fn by_affiliate_code(&self, code: &str) -> Option<User> {
        self.store
            .with(|doc| {
                doc.users
                    .values()
                    .find(|u| u.is_affiliate && u.affiliate_code.as_deref() == Some(code))
                    .cloned()
            })
            .await
    }

    pub async fn all(&self) -> Vec<User> {
        self.store.with(|doc| doc.users.values().cloned().collect()).await
    }

    pub async fn affiliates(&self) -> Vec<User> {
        self.store
            .with(|doc| doc.users.values().filter(|u| u.is_affiliate).cloned().collect())
            .await
    }

    /// Applications awaiting an approve/reject decision.
    pub async fn pending_affiliate_applications(&self) -> Vec<User> {
        self.store
            .with(|doc| {
                doc.users
                    .values()
                    .filter(|u| u.affiliate_status == AffiliateStatus::Pending)
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn active_subscribers(&self, program: Option<Program>) -> Vec<User> {
        let today = Utc::now().date_naive();
        self.store
            .with(|doc| {
                doc.users
                    .values()
                    .filter(|user| match program {
                        Some(program) => PlanType::ALL
                            .iter()
                            .any(|&plan| user.access(program).plan(plan).is_active(today)),
                        None => user.has_active_subscription(today),
                    })
                    .cloned()
                    .collect()
            })
            .await
    }
}
