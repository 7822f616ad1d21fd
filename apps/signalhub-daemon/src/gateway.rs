use async_trait::async_trait;
use tracing::info;

use signalhub_ledger::models::{PlanType, Program};
use signalhub_ledger::{AccessRevoker, LedgerEvent, Notifier};

/// Writes every ledger event to the log as one JSON line. Stands in for
/// a chat gateway until one is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: LedgerEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&event)?;
        info!(event = %payload, "ledger event");
        Ok(())
    }
}

/// Acknowledges revocations in the log. There is no group to kick the
/// user from in standalone mode, so reporting success lets the monitor
/// clear the lapsed record.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRevoker;

#[async_trait]
impl AccessRevoker for LogRevoker {
    async fn revoke(&self, user_id: i64, program: Program, plan: PlanType) -> anyhow::Result<()> {
        info!(user = user_id, %program, %plan, "revocation logged, no group gateway configured");
        Ok(())
    }
}
