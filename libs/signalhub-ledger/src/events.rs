use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Payout, PlanType, Program};

/// Structured facts the engine hands to the host's notification layer.
/// Message wording and transport live entirely on the other side of the
/// `Notifier` seam.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    ReminderDue {
        user_id: i64,
        program: Program,
        plan: PlanType,
        days_left: i64,
        expires_on: NaiveDate,
    },
    AccessRevoked {
        user_id: i64,
        program: Program,
        plan: PlanType,
    },
    CommissionCredited {
        affiliate_id: i64,
        user_id: i64,
        amount: i64,
        program: Program,
        plan: PlanType,
    },
    PayoutSettled { payout: Payout },
}

/// Outbound event sink. Implementations must be cheap to call; the engine
/// treats failures as logged-and-dropped except where a scan retries.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: LedgerEvent) -> anyhow::Result<()>;
}

/// Revokes group membership for a lapsed (program, plan). The scheduler only
/// clears the stored expiry after this reports success, so failures are
/// retried on the next scan.
#[async_trait]
pub trait AccessRevoker: Send + Sync {
    async fn revoke(&self, user_id: i64, program: Program, plan: PlanType) -> anyhow::Result<()>;
}

/// Sink that drops every event, for hosts that run the ledger without a
/// notification layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: LedgerEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
