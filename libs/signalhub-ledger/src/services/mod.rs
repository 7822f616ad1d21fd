mod expiry_monitor;
mod payout_service;
mod referral_service;
mod user_service;

pub use expiry_monitor::{ExpiryMonitor, ScanReport};
pub use payout_service::PayoutService;
pub use referral_service::{
    AffiliateRollup, AffiliateStats, CommissionReport, ReferralService,
};
pub use user_service::UserService;
