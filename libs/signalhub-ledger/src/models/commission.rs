use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::{PlanType, Program};

/// Immutable credit event for one referred purchase. Never mutated or
/// deleted once written; the amount arrives pre-computed from the
/// payment-approval flow. Missing fields decode to defaults so one
/// truncated record cannot sink the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commission {
    pub id: String,
    pub affiliate_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub program: Program,
    pub plan: PlanType,
    pub vip_duration_days: Option<i64>,
    pub date: DateTime<Utc>,
}

impl Default for Commission {
    fn default() -> Self {
        Self {
            id: String::new(),
            affiliate_id: 0,
            user_id: 0,
            amount: 0,
            program: Program::default(),
            plan: PlanType::default(),
            vip_duration_days: None,
            date: Utc::now(),
        }
    }
}
