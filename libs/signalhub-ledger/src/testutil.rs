use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::events::{AccessRevoker, LedgerEvent, Notifier};
use crate::models::{PlanType, Program};

/// Config pointing at a unique temp directory, with autosave effectively
/// disabled so tests control when the file is written.
pub(crate) fn scratch_config(tag: &str) -> LedgerConfig {
    let dir = std::env::temp_dir().join(format!("signalhub-{tag}-{}", Uuid::new_v4()));
    LedgerConfig {
        file: dir.join("ledger.json"),
        backup_dir: dir.join("backups"),
        autosave_max_changes: 1000,
        autosave_max_age: Duration::from_secs(3600),
        ..LedgerConfig::default()
    }
}

/// Captures every event; flips to failure mode when `fail` is set.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub events: Mutex<Vec<LedgerEvent>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: LedgerEvent) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("notifier offline");
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingRevoker {
    pub calls: Mutex<Vec<(i64, Program, PlanType)>>,
    pub fail: AtomicBool,
}

impl RecordingRevoker {
    pub fn calls(&self) -> Vec<(i64, Program, PlanType)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccessRevoker for RecordingRevoker {
    async fn revoke(&self, user_id: i64, program: Program, plan: PlanType) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((user_id, program, plan));
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("revoker offline");
        }
        Ok(())
    }
}
