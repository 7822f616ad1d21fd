pub mod commission;
pub mod document;
pub mod payout;
pub mod referral;
pub mod user;

pub use commission::Commission;
pub use document::{Document, Metadata, SCHEMA_VERSION};
pub use payout::{Payout, PayoutStatus};
pub use referral::Referral;
pub use user::{
    AffiliateStatus, CommissionSummary, PendingProof, PlanAccess, PlanType, Program,
    ProgramAccess, User,
};
