use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribution of one referred user to one affiliate. At most one record per
/// pair, keyed `"{affiliate_id}_{user_id}"` in the document. Ids missing from
/// an old record are restored from that key at load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Referral {
    pub affiliate_id: i64,
    pub user_id: i64,
    pub has_subscribed: bool,
    pub commission_earned: i64,
    pub referral_date: DateTime<Utc>,
}

impl Default for Referral {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Referral {
    pub fn new(affiliate_id: i64, user_id: i64) -> Self {
        Self {
            affiliate_id,
            user_id,
            has_subscribed: false,
            commission_earned: 0,
            referral_date: Utc::now(),
        }
    }

    pub fn key(affiliate_id: i64, user_id: i64) -> String {
        format!("{affiliate_id}_{user_id}")
    }
}
