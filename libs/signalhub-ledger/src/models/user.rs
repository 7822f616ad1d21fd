use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Trading program a subscription belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    #[default]
    Crypto,
    Forex,
}

impl Program {
    pub const ALL: [Program; 2] = [Program::Crypto, Program::Forex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Program::Crypto => "crypto",
            Program::Forex => "forex",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan tier within a program: long-form course or recurring signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Academy,
    Vip,
}

impl PlanType {
    pub const ALL: [PlanType; 2] = [PlanType::Academy, PlanType::Vip];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Academy => "academy",
            PlanType::Vip => "vip",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffiliateStatus {
    #[default]
    None,
    Pending,
    Approved,
    Rejected,
}

/// One subscribable slot: expiry plus the per-day reminder markers keyed by
/// the days-left threshold that fired. Markers are cleared whenever the
/// expiry changes, so an extension re-arms every threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanAccess {
    pub expires_on: Option<NaiveDate>,
    pub reminders_sent: BTreeMap<i64, NaiveDate>,
}

impl PlanAccess {
    pub fn days_left(&self, today: NaiveDate) -> Option<i64> {
        self.expires_on.map(|expiry| (expiry - today).num_days())
    }

    pub fn is_active(&self, today: NaiveDate) -> bool {
        matches!(self.days_left(today), Some(days) if days >= 0)
    }
}

/// Per-program access state. `trial_used` is set the first time a VIP grant
/// lands and never unset by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramAccess {
    pub academy: PlanAccess,
    pub vip: PlanAccess,
    pub trial_used: bool,
}

impl ProgramAccess {
    pub fn plan(&self, plan: PlanType) -> &PlanAccess {
        match plan {
            PlanType::Academy => &self.academy,
            PlanType::Vip => &self.vip,
        }
    }

    pub fn plan_mut(&mut self, plan: PlanType) -> &mut PlanAccess {
        match plan {
            PlanType::Academy => &mut self.academy,
            PlanType::Vip => &mut self.vip,
        }
    }
}

/// In-flight payment-proof submission awaiting admin review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingProof {
    pub program: Program,
    pub plan: PlanType,
    pub duration_days: i64,
    pub amount: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl Default for PendingProof {
    fn default() -> Self {
        Self {
            program: Program::default(),
            plan: PlanType::default(),
            duration_days: 0,
            amount: 0,
            uploaded_at: Utc::now(),
        }
    }
}

/// Compact commission entry kept on the affiliate's own record so the UI
/// layer can render history without joining the commissions map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionSummary {
    pub commission_id: String,
    pub referred_id: i64,
    pub amount: i64,
    pub program: Program,
    pub plan: PlanType,
    pub date: DateTime<Utc>,
}

impl Default for CommissionSummary {
    fn default() -> Self {
        Self {
            commission_id: String::new(),
            referred_id: 0,
            amount: 0,
            program: Program::default(),
            plan: PlanType::default(),
            date: Utc::now(),
        }
    }
}

/// A registered end user. Balances are i64 minor units.
///
/// Every field deserializes with a default so records written by older
/// versions load with a complete, type-correct field-set; keys this version
/// does not know about are carried in `extra` and survive the next save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub handle: Option<String>,
    pub program: Program,
    pub crypto: ProgramAccess,
    pub forex: ProgramAccess,
    pub referred_by: Option<i64>,
    pub referrals: Vec<i64>,
    pub referral_count: usize,
    pub is_affiliate: bool,
    pub affiliate_status: AffiliateStatus,
    pub affiliate_code: Option<String>,
    pub affiliate_earnings: i64,
    pub affiliate_paid: i64,
    pub affiliate_pending: i64,
    pub affiliate_available: i64,
    pub pending_proof: Option<PendingProof>,
    pub commission_history: Vec<CommissionSummary>,
    pub registered_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub affiliate_applied_at: Option<DateTime<Utc>>,
    pub affiliate_decided_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for User {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: String::new(),
            handle: None,
            program: Program::default(),
            crypto: ProgramAccess::default(),
            forex: ProgramAccess::default(),
            referred_by: None,
            referrals: Vec::new(),
            referral_count: 0,
            is_affiliate: false,
            affiliate_status: AffiliateStatus::default(),
            affiliate_code: None,
            affiliate_earnings: 0,
            affiliate_paid: 0,
            affiliate_pending: 0,
            affiliate_available: 0,
            pending_proof: None,
            commission_history: Vec::new(),
            registered_at: now,
            last_active: now,
            affiliate_applied_at: None,
            affiliate_decided_at: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl User {
    pub fn new(id: i64, name: &str, handle: Option<&str>, program: Program) -> Self {
        Self {
            id,
            name: name.to_string(),
            handle: handle.map(str::to_string),
            program,
            ..Self::default()
        }
    }

    pub fn access(&self, program: Program) -> &ProgramAccess {
        match program {
            Program::Crypto => &self.crypto,
            Program::Forex => &self.forex,
        }
    }

    pub fn access_mut(&mut self, program: Program) -> &mut ProgramAccess {
        match program {
            Program::Crypto => &mut self.crypto,
            Program::Forex => &mut self.forex,
        }
    }

    pub fn has_active_subscription(&self, today: NaiveDate) -> bool {
        Program::ALL.iter().any(|&program| {
            PlanType::ALL
                .iter()
                .any(|&plan| self.access(program).plan(plan).is_active(today))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&Program::Forex).unwrap(), "\"forex\"");
        assert_eq!(serde_json::to_string(&PlanType::Vip).unwrap(), "\"vip\"");
        assert_eq!(
            serde_json::to_string(&AffiliateStatus::Pending).unwrap(),
            "\"pending\""
        );
    }

    #[test]
    fn bare_record_loads_with_full_field_set() {
        let user: User = serde_json::from_str("{\"id\": 42, \"name\": \"Ada\"}").unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.affiliate_status, AffiliateStatus::None);
        assert_eq!(user.affiliate_available, 0);
        assert!(user.referrals.is_empty());
        assert!(!user.crypto.trial_used);
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = "{\"id\": 7, \"name\": \"Bo\", \"legacy_note\": \"keep me\"}";
        let user: User = serde_json::from_str(raw).unwrap();
        assert_eq!(
            user.extra.get("legacy_note").and_then(|v| v.as_str()),
            Some("keep me")
        );
        let out = serde_json::to_value(&user).unwrap();
        assert_eq!(out["legacy_note"], "keep me");
    }

    #[test]
    fn days_left_spans_negative_range() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let mut slot = PlanAccess::default();
        assert_eq!(slot.days_left(today), None);
        slot.expires_on = NaiveDate::from_ymd_opt(2025, 6, 7);
        assert_eq!(slot.days_left(today), Some(-3));
        assert!(!slot.is_active(today));
    }
}
