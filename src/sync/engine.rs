//! Per-account sync engine
//!
//! One `AccountSyncer` owns the sync lifecycle for a single account: replay
//! queued outbound ops, refresh private keys, then walk each folder through
//! reconcile and a single-transaction store commit. At most one pass runs at
//! a time; a request that arrives mid-pass coalesces into the running one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::backend::{FetchCriteria, MailRemote, MessageStore};
use crate::error::{CoreError, Result};
use crate::security::ekm::KeySource;
use crate::security::refresh::{KeyRefreshCoordinator, RefreshOutcome};
use crate::sync::outbound::{OutboundOp, OutboundQueue};
use crate::sync::reconcile::reconcile;
use crate::types::RemoteMessage;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Folders to sync, in order. Empty means ask the remote for its list.
    pub folders: Vec<String>,
    /// Retries for transient failures within one pass.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_base_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    Connecting,
    Syncing,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub account_id: String,
    pub state: SyncState,
    pub current_folder: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub synced_folders: u32,
    pub new_messages: u32,
    pub updated_messages: u32,
    pub deleted_messages: u32,
}

/// Events pushed to the UI layer while a pass runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    StateChanged(SyncStatus),
    FolderSynced {
        folder: String,
        inserted: u32,
        updated: u32,
        deleted: u32,
    },
    NewMessages {
        folder: String,
        count: u32,
    },
    MessagesDeleted {
        folder: String,
        uids: Vec<u32>,
    },
    FlagsChanged {
        folder: String,
        uids: Vec<u32>,
    },
    /// Key updates are parked until these fingerprints get a passphrase.
    PassphraseNeeded {
        fingerprints: Vec<String>,
    },
    SyncComplete(SyncResult),
    Error {
        message: String,
    },
}

/// How one call to [`AccountSyncer::sync`] ended.
#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncResult),
    /// Another pass was already running; the request folded into it.
    Coalesced,
    Cancelled,
    Failed(CoreError),
}

pub struct AccountSyncer {
    account_id: String,
    config: SyncConfig,
    remote: Arc<dyn MailRemote>,
    store: Arc<dyn MessageStore>,
    refresh: Option<Arc<KeyRefreshCoordinator>>,
    key_source: Option<Arc<dyn KeySource>>,
    outbound: OutboundQueue,
    status: RwLock<SyncStatus>,
    in_flight: AtomicBool,
    cancelled: AtomicBool,
    events: flume::Sender<SyncEvent>,
}

impl AccountSyncer {
    pub fn new(
        account_id: impl Into<String>,
        config: SyncConfig,
        remote: Arc<dyn MailRemote>,
        store: Arc<dyn MessageStore>,
    ) -> (Self, flume::Receiver<SyncEvent>) {
        let account_id = account_id.into();
        let (tx, rx) = flume::unbounded();
        let syncer = Self {
            status: RwLock::new(SyncStatus {
                account_id: account_id.clone(),
                state: SyncState::Idle,
                current_folder: None,
                last_sync: None,
                last_error: None,
            }),
            account_id,
            config,
            remote,
            store,
            refresh: None,
            key_source: None,
            outbound: OutboundQueue::default(),
            in_flight: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            events: tx,
        };
        (syncer, rx)
    }

    /// Attach a key refresh coordinator; each pass then refreshes keys
    /// before touching any folder.
    pub fn with_key_refresh(
        mut self,
        coordinator: Arc<KeyRefreshCoordinator>,
        source: Arc<dyn KeySource>,
    ) -> Self {
        self.refresh = Some(coordinator);
        self.key_source = Some(source);
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn key_refresh(&self) -> Option<&Arc<KeyRefreshCoordinator>> {
        self.refresh.as_ref()
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Queue a local change for replay at the start of the next pass.
    pub fn queue_outbound(&self, op: OutboundOp) {
        self.outbound.queue(op);
    }

    /// Request cancellation of the running pass. The pass stops at the next
    /// folder boundary or network round-trip; already committed deltas stay.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run one sync pass. Concurrent calls coalesce into the running pass.
    pub async fn sync(&self) -> SyncOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Sync already in flight for {}, coalescing", self.account_id);
            return SyncOutcome::Coalesced;
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let outcome = self.run_with_retries().await;
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_with_retries(&self) -> SyncOutcome {
        let mut attempt = 0u32;
        loop {
            self.set_state(SyncState::Connecting, None).await;

            match self.run_pass().await {
                Ok(Some(result)) => {
                    info!(
                        "Sync complete for {}: {} folder(s), {} new, {} updated, {} deleted",
                        self.account_id,
                        result.synced_folders,
                        result.new_messages,
                        result.updated_messages,
                        result.deleted_messages
                    );
                    {
                        let mut status = self.status.write().await;
                        status.last_sync = Some(Utc::now());
                        status.last_error = None;
                    }
                    self.set_state(SyncState::Idle, None).await;
                    self.emit(SyncEvent::SyncComplete(result.clone()));
                    return SyncOutcome::Completed(result);
                }
                Ok(None) => {
                    info!("Sync cancelled for {}", self.account_id);
                    self.set_state(SyncState::Idle, None).await;
                    return SyncOutcome::Cancelled;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_base_delay_ms << (attempt - 1);
                    warn!(
                        "Transient sync failure for {} (attempt {}/{}), retrying in {}ms: {}",
                        self.account_id, attempt, self.config.max_retries, delay, e
                    );
                    self.set_state(SyncState::Retrying, None).await;
                    sleep(Duration::from_millis(delay)).await;
                    if self.is_cancelled() {
                        self.set_state(SyncState::Idle, None).await;
                        return SyncOutcome::Cancelled;
                    }
                }
                Err(e) => {
                    error!("Sync failed for {}: {}", self.account_id, e);
                    self.set_state(SyncState::Failed, Some(e.to_string())).await;
                    self.emit(SyncEvent::Error {
                        message: e.to_string(),
                    });
                    self.set_state(SyncState::Idle, None).await;
                    return SyncOutcome::Failed(e);
                }
            }
        }
    }

    /// One attempt at a full pass. `Ok(None)` means cancellation.
    async fn run_pass(&self) -> Result<Option<SyncResult>> {
        self.refresh_keys().await?;
        if self.is_cancelled() {
            return Ok(None);
        }

        self.set_state(SyncState::Syncing, None).await;
        self.outbound.replay(self.remote.as_ref()).await;
        if self.is_cancelled() {
            return Ok(None);
        }

        let folders = if self.config.folders.is_empty() {
            self.remote.list_folders().await?
        } else {
            self.config.folders.clone()
        };

        let mut result = SyncResult::default();
        for folder in &folders {
            if self.is_cancelled() {
                return Ok(None);
            }
            {
                let mut status = self.status.write().await;
                status.current_folder = Some(folder.clone());
            }
            match self.sync_folder(folder).await? {
                Some((inserted, updated, deleted)) => {
                    result.synced_folders += 1;
                    result.new_messages += inserted;
                    result.updated_messages += updated;
                    result.deleted_messages += deleted;
                }
                None => return Ok(None),
            }
        }

        let mut status = self.status.write().await;
        status.current_folder = None;
        drop(status);
        Ok(Some(result))
    }

    /// Refresh private keys before the first folder pass. Transport errors
    /// abort the pass so the retry loop can pick them up; terminal refresh
    /// errors are surfaced as events and the pass continues with the keys
    /// it already has.
    async fn refresh_keys(&self) -> Result<()> {
        let (coordinator, source) = match (&self.refresh, &self.key_source) {
            (Some(c), Some(s)) => (c, s),
            _ => return Ok(()),
        };

        match coordinator.refresh(source.as_ref()).await {
            RefreshOutcome::Unchanged => {}
            RefreshOutcome::Updated(fps) => {
                info!("Updated {} private key(s) for {}", fps.len(), self.account_id);
            }
            RefreshOutcome::NeedsPassphrase(fps) => {
                self.emit(SyncEvent::PassphraseNeeded {
                    fingerprints: fps.iter().map(|fp| fp.to_string()).collect(),
                });
            }
            RefreshOutcome::Failed(e) if e.is_transient() => return Err(e),
            RefreshOutcome::Failed(e) => {
                warn!("Key refresh failed for {}: {}", self.account_id, e);
                self.emit(SyncEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Pull one folder level with the store. `Ok(None)` means cancellation
    /// landed between round-trips; nothing was committed for this folder.
    async fn sync_folder(&self, folder: &str) -> Result<Option<(u32, u32, u32)>> {
        let prior = self.store.get_snapshot(&self.account_id, folder).await?;

        let remote_snapshot = self.remote.list_uids_and_flags(folder).await?;
        if self.is_cancelled() {
            return Ok(None);
        }
        let remote_uids: BTreeSet<u32> = remote_snapshot.keys().copied().collect();

        // Full fetch only for UIDs we have never seen; flags for the rest
        // already came back with the listing.
        let new_uids: Vec<u32> = remote_uids
            .iter()
            .filter(|uid| !prior.contains_key(uid))
            .copied()
            .collect();
        let mut remote_messages = if new_uids.is_empty() {
            Vec::new()
        } else {
            self.remote
                .fetch_messages(folder, &FetchCriteria::Uids(new_uids))
                .await?
        };
        if self.is_cancelled() {
            return Ok(None);
        }
        for (uid, flags) in &remote_snapshot {
            if prior.contains_key(uid) {
                remote_messages.push(RemoteMessage {
                    uid: *uid,
                    flags: flags.clone(),
                });
            }
        }

        let delta = reconcile(&prior, &remote_uids, &remote_messages);
        if delta.is_empty() {
            debug!("Folder {} unchanged", folder);
            return Ok(Some((0, 0, 0)));
        }

        let inserted = delta.to_insert.len() as u32;
        let updated = delta.to_update.len() as u32;
        let deleted = delta.to_delete.len() as u32;
        self.store
            .apply_delta(&self.account_id, folder, &delta)
            .await?;

        if inserted > 0 {
            self.emit(SyncEvent::NewMessages {
                folder: folder.to_string(),
                count: inserted,
            });
        }
        if updated > 0 {
            self.emit(SyncEvent::FlagsChanged {
                folder: folder.to_string(),
                uids: delta.to_update.keys().copied().collect(),
            });
        }
        if deleted > 0 {
            self.emit(SyncEvent::MessagesDeleted {
                folder: folder.to_string(),
                uids: delta.to_delete.clone(),
            });
        }
        self.emit(SyncEvent::FolderSynced {
            folder: folder.to_string(),
            inserted,
            updated,
            deleted,
        });

        Ok(Some((inserted, updated, deleted)))
    }

    async fn set_state(&self, state: SyncState, last_error: Option<String>) {
        let snapshot = {
            let mut status = self.status.write().await;
            status.state = state;
            if last_error.is_some() {
                status.last_error = last_error;
            }
            if state == SyncState::Idle {
                status.current_folder = None;
            }
            status.clone()
        };
        self.emit(SyncEvent::StateChanged(snapshot));
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("No sync event listener for {}", self.account_id);
        }
    }
}
