use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    #[default]
    Pending,
    Paid,
    Rejected,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PayoutStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Withdrawal request against an affiliate's available balance. Settled
/// out-of-band; `proof_ref` points at the settlement evidence the admin
/// attached when marking it paid.
///
/// Every field deserializes with a default so a record written before a
/// field existed still loads; the id is reconciled to its map key at load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payout {
    pub id: String,
    pub user_id: i64,
    pub affiliate_name: String,
    pub amount: i64,
    pub method: String,
    pub details: String,
    pub status: PayoutStatus,
    pub request_date: DateTime<Utc>,
    pub processed_date: Option<DateTime<Utc>>,
    pub proof_ref: Option<String>,
}

impl Default for Payout {
    fn default() -> Self {
        Self {
            id: String::new(),
            user_id: 0,
            affiliate_name: String::new(),
            amount: 0,
            method: String::new(),
            details: String::new(),
            status: PayoutStatus::Pending,
            request_date: Utc::now(),
            processed_date: None,
            proof_ref: None,
        }
    }
}
