//! Account registry and cross-account triggers
//!
//! The supervisor owns one `AccountSyncer` per signed-in account. Sync runs
//! independently per account; a failure in one never blocks another.
//! Connectivity restoration triggers a pass on every registered account.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::sync::engine::{AccountSyncer, SyncOutcome};

#[derive(Default)]
pub struct SyncSupervisor {
    syncers: RwLock<HashMap<String, Arc<AccountSyncer>>>,
}

impl SyncSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, syncer: Arc<AccountSyncer>) {
        let account_id = syncer.account_id().to_string();
        info!("Registering account {}", account_id);
        self.syncers.write().await.insert(account_id, syncer);
    }

    /// Remove an account. Tears down its running pass and wipes its cached
    /// key material and passphrases.
    pub async fn unregister(&self, account_id: &str) -> Result<()> {
        let syncer = self
            .syncers
            .write()
            .await
            .remove(account_id)
            .ok_or_else(|| CoreError::AccountNotFound(account_id.to_string()))?;

        info!("Unregistering account {}", account_id);
        syncer.cancel();
        if let Some(refresh) = syncer.key_refresh() {
            refresh.cache().clear();
        }
        Ok(())
    }

    pub async fn syncer(&self, account_id: &str) -> Option<Arc<AccountSyncer>> {
        self.syncers.read().await.get(account_id).cloned()
    }

    pub async fn account_ids(&self) -> Vec<String> {
        self.syncers.read().await.keys().cloned().collect()
    }

    /// Run one pass on every registered account concurrently and wait for
    /// all of them.
    pub async fn sync_all(&self) -> HashMap<String, SyncOutcome> {
        let syncers: Vec<Arc<AccountSyncer>> =
            self.syncers.read().await.values().cloned().collect();

        let mut tasks = JoinSet::new();
        for syncer in syncers {
            tasks.spawn(async move {
                let outcome = syncer.sync().await;
                (syncer.account_id().to_string(), outcome)
            });
        }

        let mut outcomes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((account_id, outcome)) => {
                    outcomes.insert(account_id, outcome);
                }
                Err(e) => warn!("Sync task panicked: {}", e),
            }
        }
        outcomes
    }

    /// Kick off a background pass on every account, e.g. when the network
    /// comes back after an offline stretch.
    pub fn notify_connectivity_restored(self: &Arc<Self>) {
        info!("Connectivity restored, resuming sync");
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.sync_all().await;
        });
    }
}
