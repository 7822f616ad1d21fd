use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::models::{Document, Referral, SCHEMA_VERSION, User};

/// What the load-time normalization pass had to repair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeReport {
    pub ids_normalized: usize,
    pub entries_rekeyed: usize,
    pub entries_dropped: usize,
    pub duplicate_referrals_removed: usize,
    pub referral_counts_fixed: usize,
}

impl NormalizeReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Runs once per load, before the document is handed to the ledger.
///
/// The map key is the lookup identity throughout: the embedded `id` field of
/// users, payouts and commissions is made to match it, user entries under
/// non-numeric keys are re-keyed from their `id` field (or dropped when
/// neither side yields one), referral records take their id pair from the
/// `"{affiliate}_{user}"` key, duplicate referral ids are removed in order,
/// and the derived `referral_count` is recomputed. Field-level backfill
/// happens in serde via defaults; this pass covers the repairs serde cannot
/// express. Idempotent.
pub fn normalize(doc: &mut Document) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    let users = std::mem::take(&mut doc.users);
    let mut rebuilt: BTreeMap<String, User> = BTreeMap::new();
    let mut strays: Vec<(String, User)> = Vec::new();

    for (key, mut user) in users {
        match key.parse::<i64>() {
            Ok(key_id) => {
                if user.id != key_id {
                    user.id = key_id;
                    report.ids_normalized += 1;
                }
                rebuilt.insert(key, user);
            }
            Err(_) => strays.push((key, user)),
        }
    }
    for (key, user) in strays {
        if user.id != 0 && !rebuilt.contains_key(&user.id.to_string()) {
            warn!(old_key = %key, id = user.id, "re-keyed user entry stored under a non-numeric key");
            rebuilt.insert(user.id.to_string(), user);
            report.entries_rekeyed += 1;
        } else {
            warn!(key = %key, "dropped user entry with no usable id");
            report.entries_dropped += 1;
        }
    }
    doc.users = rebuilt;

    for user in doc.users.values_mut() {
        let before = user.referrals.len();
        let mut seen = HashSet::new();
        user.referrals.retain(|id| seen.insert(*id));
        report.duplicate_referrals_removed += before - user.referrals.len();
        if user.referral_count != user.referrals.len() {
            user.referral_count = user.referrals.len();
            report.referral_counts_fixed += 1;
        }
    }

    // Payouts and commissions never move between keys; the key is the id.
    for (key, payout) in &mut doc.payouts {
        if payout.id != *key {
            payout.id = key.clone();
            report.ids_normalized += 1;
        }
    }
    for (key, commission) in &mut doc.commissions {
        if commission.id != *key {
            commission.id = key.clone();
            report.ids_normalized += 1;
        }
    }

    let referrals = std::mem::take(&mut doc.referrals);
    let mut rebuilt: BTreeMap<String, Referral> = BTreeMap::new();
    let mut strays: Vec<(String, Referral)> = Vec::new();

    for (key, mut referral) in referrals {
        match parse_referral_key(&key) {
            Some((affiliate_id, user_id)) => {
                if referral.affiliate_id != affiliate_id || referral.user_id != user_id {
                    referral.affiliate_id = affiliate_id;
                    referral.user_id = user_id;
                    report.ids_normalized += 1;
                }
                rebuilt.insert(key, referral);
            }
            None => strays.push((key, referral)),
        }
    }
    for (key, referral) in strays {
        let canonical = Referral::key(referral.affiliate_id, referral.user_id);
        if referral.affiliate_id != 0
            && referral.user_id != 0
            && !rebuilt.contains_key(&canonical)
        {
            warn!(old_key = %key, new_key = %canonical, "re-keyed referral entry stored under a malformed key");
            rebuilt.insert(canonical, referral);
            report.entries_rekeyed += 1;
        } else {
            warn!(key = %key, "dropped referral entry with no usable identity");
            report.entries_dropped += 1;
        }
    }
    doc.referrals = rebuilt;

    doc.metadata.schema_version = SCHEMA_VERSION;
    report
}

fn parse_referral_key(key: &str) -> Option<(i64, i64)> {
    let (affiliate, user) = key.split_once('_')?;
    Some((affiliate.parse().ok()?, user.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Commission, Payout, Program};

    fn doc_with(entries: Vec<(&str, User)>) -> Document {
        let mut doc = Document::empty();
        for (key, user) in entries {
            doc.users.insert(key.to_string(), user);
        }
        doc
    }

    #[test]
    fn id_field_follows_the_map_key() {
        let mut user = User::new(0, "No Id", None, Program::Crypto);
        user.id = 0;
        let mut doc = doc_with(vec![("55", user)]);

        let report = normalize(&mut doc);

        assert_eq!(report.ids_normalized, 1);
        assert_eq!(doc.user(55).map(|u| u.id), Some(55));
    }

    #[test]
    fn non_numeric_key_is_rekeyed_from_the_id_field() {
        let user = User::new(91, "Stray", None, Program::Forex);
        let mut doc = doc_with(vec![("user-91", user)]);

        let report = normalize(&mut doc);

        assert_eq!(report.entries_rekeyed, 1);
        assert!(doc.users.contains_key("91"));
        assert!(!doc.users.contains_key("user-91"));
    }

    #[test]
    fn unusable_entries_are_dropped_not_fatal() {
        let user = User::new(0, "Lost", None, Program::Crypto);
        let mut doc = doc_with(vec![("???", user)]);

        let report = normalize(&mut doc);

        assert_eq!(report.entries_dropped, 1);
        assert!(doc.users.is_empty());
    }

    #[test]
    fn referral_list_is_deduplicated_and_recounted() {
        let mut user = User::new(3, "Aff", None, Program::Crypto);
        user.referrals = vec![10, 11, 10, 12, 11];
        user.referral_count = 99;
        let mut doc = doc_with(vec![("3", user)]);

        let report = normalize(&mut doc);

        let user = doc.user(3).unwrap();
        assert_eq!(user.referrals, vec![10, 11, 12]);
        assert_eq!(user.referral_count, 3);
        assert_eq!(report.duplicate_referrals_removed, 2);
        assert_eq!(report.referral_counts_fixed, 1);
    }

    #[test]
    fn payout_and_commission_ids_follow_their_keys() {
        let mut doc = Document::empty();
        doc.payouts.insert("PAYOUT_A".to_string(), Payout::default());
        doc.commissions.insert(
            "COMM_A".to_string(),
            Commission {
                id: "stale".to_string(),
                ..Commission::default()
            },
        );

        let report = normalize(&mut doc);

        assert_eq!(doc.payouts["PAYOUT_A"].id, "PAYOUT_A");
        assert_eq!(doc.commissions["COMM_A"].id, "COMM_A");
        assert_eq!(report.ids_normalized, 2);
    }

    #[test]
    fn referral_identity_follows_the_composite_key() {
        let mut doc = Document::empty();
        doc.referrals.insert("10_20".to_string(), Referral::default());
        doc.referrals.insert("ref:7:8".to_string(), Referral::new(7, 8));
        doc.referrals.insert("junk".to_string(), Referral::default());

        let report = normalize(&mut doc);

        assert_eq!(doc.referrals["10_20"].affiliate_id, 10);
        assert_eq!(doc.referrals["10_20"].user_id, 20);
        assert!(doc.referrals.contains_key("7_8"));
        assert!(!doc.referrals.contains_key("junk"));
        assert_eq!(report.entries_rekeyed, 1);
        assert_eq!(report.entries_dropped, 1);
    }

    #[test]
    fn clean_document_reports_clean() {
        let mut user = User::new(8, "Fine", None, Program::Crypto);
        user.referrals = vec![1, 2];
        user.referral_count = 2;
        let mut doc = doc_with(vec![("8", user)]);

        let report = normalize(&mut doc);

        assert!(report.is_clean());
        assert_eq!(doc.metadata.schema_version, SCHEMA_VERSION);
    }
}
