use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::commission::Commission;
use super::payout::{Payout, PayoutStatus};
use super::referral::Referral;
use super::user::User;

/// Current on-disk schema revision. Bumped when a load-time migration is
/// added; `normalize` stamps it after every load.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub total_users: usize,
    pub total_affiliates: usize,
    pub total_commissions: usize,
    pub total_payouts: usize,
}

impl Default for Metadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            schema_version: SCHEMA_VERSION,
            total_users: 0,
            total_affiliates: 0,
            total_commissions: 0,
            total_payouts: 0,
        }
    }
}

/// The single persisted document: every collection the engine owns, in one
/// JSON object. Maps are ordered so serialization is deterministic. Unknown
/// top-level keys from older or newer writers ride along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    pub users: BTreeMap<String, User>,
    pub payouts: BTreeMap<String, Payout>,
    pub commissions: BTreeMap<String, Commission>,
    pub referrals: BTreeMap<String, Referral>,
    pub metadata: Metadata,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn user(&self, id: i64) -> Option<&User> {
        self.users.get(&id.to_string())
    }

    pub fn user_mut(&mut self, id: i64) -> Option<&mut User> {
        self.users.get_mut(&id.to_string())
    }

    /// Stamps `updated_at` and recomputes the collection counts. Called by
    /// the store right before each save.
    pub fn refresh_metadata(&mut self) {
        self.metadata.updated_at = Utc::now();
        self.metadata.total_users = self.users.len();
        self.metadata.total_affiliates =
            self.users.values().filter(|u| u.is_affiliate).count();
        self.metadata.total_commissions = self.commissions.len();
        self.metadata.total_payouts = self.payouts.len();
    }

    pub fn pending_payouts(&self) -> usize {
        self.payouts
            .values()
            .filter(|p| p.status == PayoutStatus::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Program;

    #[test]
    fn empty_schema_has_all_collections() {
        let doc = Document::empty();
        let value = serde_json::to_value(&doc).unwrap();
        for key in ["users", "payouts", "commissions", "referrals", "metadata"] {
            assert!(value.get(key).is_some(), "missing top-level key {key}");
        }
        assert_eq!(value["metadata"]["schema_version"], SCHEMA_VERSION);
    }

    #[test]
    fn refresh_metadata_recounts() {
        let mut doc = Document::empty();
        let mut affiliate = User::new(1, "Aff", None, Program::Crypto);
        affiliate.is_affiliate = true;
        doc.users.insert("1".into(), affiliate);
        doc.users
            .insert("2".into(), User::new(2, "Plain", None, Program::Forex));
        doc.refresh_metadata();
        assert_eq!(doc.metadata.total_users, 2);
        assert_eq!(doc.metadata.total_affiliates, 1);
    }

    #[test]
    fn unknown_top_level_keys_are_preserved() {
        let raw = "{\"users\": {}, \"custom_section\": {\"a\": 1}}";
        let doc: Document = serde_json::from_str(raw).unwrap();
        assert!(doc.extra.contains_key("custom_section"));
        let out = serde_json::to_value(&doc).unwrap();
        assert_eq!(out["custom_section"]["a"], 1);
    }
}
