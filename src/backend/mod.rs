//! Collaborator traits for the remote mailbox and the persisted store
//!
//! The core consumes narrow read projections of the remote mailbox plus a
//! commit call for flag changes and deletions, and a row store that applies
//! one folder's delta as a single transaction. Concrete IMAP and database
//! implementations live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{FolderSnapshot, FolderSyncDelta, KeyFingerprint, KeyMetadata, RemoteMessage};

/// Which messages a fetch should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchCriteria {
    /// Every message in the folder.
    All,
    /// Only the given UIDs.
    Uids(Vec<u32>),
}

/// Read projections of a remote mailbox, plus the commit calls the sync
/// layer needs to push local flag changes and deletions.
#[async_trait]
pub trait MailRemote: Send + Sync {
    async fn list_folders(&self) -> Result<Vec<String>>;

    /// Current UID -> flag set mapping for one folder.
    async fn list_uids_and_flags(&self, folder: &str) -> Result<FolderSnapshot>;

    /// Messages matching `criteria`, in server-provided order.
    async fn fetch_messages(
        &self,
        folder: &str,
        criteria: &FetchCriteria,
    ) -> Result<Vec<RemoteMessage>>;

    /// UIDs matching a server-side search query.
    async fn search(&self, folder: &str, query: &str) -> Result<Vec<u32>>;

    /// Apply additive/subtractive flag changes to the given UIDs.
    async fn commit_flag_changes(
        &self,
        folder: &str,
        uids: &[u32],
        add: &[String],
        remove: &[String],
    ) -> Result<()>;

    /// Permanently remove the given UIDs from the folder.
    async fn expunge(&self, folder: &str, uids: &[u32]) -> Result<()>;
}

/// Row-oriented persisted store. `apply_delta` commits one folder pass as a
/// single transaction; a partially applied delta must never be observable.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_snapshot(&self, account_id: &str, folder: &str) -> Result<FolderSnapshot>;

    async fn apply_delta(
        &self,
        account_id: &str,
        folder: &str,
        delta: &FolderSyncDelta,
    ) -> Result<()>;

    async fn upsert_key_metadata(&self, account_id: &str, metadata: &KeyMetadata) -> Result<()>;

    async fn get_key_metadata(
        &self,
        account_id: &str,
        fingerprint: &KeyFingerprint,
    ) -> Result<Option<KeyMetadata>>;
}
