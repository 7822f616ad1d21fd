//! Persistent ledger for a subscription business.
//!
//! One JSON document on disk holds every user record, referral link,
//! commission and payout. [`store::RecordStore`] owns the document and its
//! durability (autosave, snapshots, corruption recovery); the services in
//! [`services`] implement the business rules on top of it; the
//! [`services::ExpiryMonitor`] drives the subscription lifecycle of
//! reminders, grace periods and removals.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod store;

pub(crate) mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::LedgerConfig;
pub use error::LedgerError;
pub use events::{AccessRevoker, LedgerEvent, Notifier, NullNotifier};
pub use services::{ExpiryMonitor, PayoutService, ReferralService, ScanReport, UserService};
pub use store::{CleanupReport, RecordStore, StoreStats};
