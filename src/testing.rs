//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::backend::{FetchCriteria, MailRemote, MessageStore};
use crate::error::{CoreError, Result};
use crate::security::ekm::KeySource;
use crate::security::keys_cache::PrivateKeyRecord;
use crate::types::{FolderSnapshot, FolderSyncDelta, KeyFingerprint, KeyMetadata, RemoteMessage};

/// Opt-in log output for tests, driven by `RUST_LOG`. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Canned key source: either returns a fixed key set or fails every call.
pub struct FakeKeySource {
    keys: Vec<PrivateKeyRecord>,
    error: Option<CoreError>,
}

impl FakeKeySource {
    pub fn returning(keys: Vec<PrivateKeyRecord>) -> Self {
        Self { keys, error: None }
    }

    pub fn failing(error: CoreError) -> Self {
        Self {
            keys: Vec::new(),
            error: Some(error),
        }
    }
}

#[async_trait]
impl KeySource for FakeKeySource {
    async fn fetch_private_keys(&self) -> Result<Vec<PrivateKeyRecord>> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.keys.clone()),
        }
    }
}

/// HashMap-backed message store. Deltas are applied atomically under one
/// mutex, matching the single-transaction contract.
#[derive(Default)]
pub struct InMemoryStore {
    snapshots: Mutex<HashMap<(String, String), FolderSnapshot>>,
    keys: Mutex<HashMap<(String, String), KeyMetadata>>,
    applied: Mutex<Vec<(String, FolderSyncDelta)>>,
}

impl InMemoryStore {
    pub fn seed_snapshot(&self, account_id: &str, folder: &str, snapshot: FolderSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert((account_id.to_string(), folder.to_string()), snapshot);
    }

    pub fn snapshot(&self, account_id: &str, folder: &str) -> FolderSnapshot {
        self.snapshots
            .lock()
            .unwrap()
            .get(&(account_id.to_string(), folder.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn key_metadata(
        &self,
        account_id: &str,
        fingerprint: &KeyFingerprint,
    ) -> Option<KeyMetadata> {
        self.keys
            .lock()
            .unwrap()
            .get(&(account_id.to_string(), fingerprint.to_string()))
            .cloned()
    }

    /// Deltas applied so far, as (folder, delta) pairs in commit order.
    pub fn applied_deltas(&self) -> Vec<(String, FolderSyncDelta)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn get_snapshot(&self, account_id: &str, folder: &str) -> Result<FolderSnapshot> {
        Ok(self.snapshot(account_id, folder))
    }

    async fn apply_delta(
        &self,
        account_id: &str,
        folder: &str,
        delta: &FolderSyncDelta,
    ) -> Result<()> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let key = (account_id.to_string(), folder.to_string());
        let prior = snapshots.get(&key).cloned().unwrap_or_default();
        snapshots.insert(key, delta.applied_to(&prior));
        self.applied
            .lock()
            .unwrap()
            .push((folder.to_string(), delta.clone()));
        Ok(())
    }

    async fn upsert_key_metadata(&self, account_id: &str, metadata: &KeyMetadata) -> Result<()> {
        self.keys.lock().unwrap().insert(
            (account_id.to_string(), metadata.fingerprint.to_string()),
            metadata.clone(),
        );
        Ok(())
    }

    async fn get_key_metadata(
        &self,
        account_id: &str,
        fingerprint: &KeyFingerprint,
    ) -> Result<Option<KeyMetadata>> {
        Ok(self.key_metadata(account_id, fingerprint))
    }
}

/// Programmable remote mailbox. Folder listings can be rewritten between
/// sync passes, errors can be injected per call, and every commit call is
/// recorded for assertions.
pub struct FakeMailRemote {
    folders: Mutex<Vec<String>>,
    messages: Mutex<HashMap<String, Vec<RemoteMessage>>>,
    list_errors: Mutex<VecDeque<CoreError>>,
    commit_errors: Mutex<VecDeque<CoreError>>,
    committed: Mutex<Vec<(String, Vec<u32>, Vec<String>, Vec<String>)>>,
    expunged: Mutex<Vec<(String, Vec<u32>)>>,
    list_delay: Mutex<Option<Duration>>,
}

impl FakeMailRemote {
    pub fn with_folder(folder: &str, messages: Vec<RemoteMessage>) -> Self {
        let remote = Self::empty();
        remote.set_folder(folder, messages);
        remote
    }

    pub fn empty() -> Self {
        Self {
            folders: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            list_errors: Mutex::new(VecDeque::new()),
            commit_errors: Mutex::new(VecDeque::new()),
            committed: Mutex::new(Vec::new()),
            expunged: Mutex::new(Vec::new()),
            list_delay: Mutex::new(None),
        }
    }

    /// Replace one folder's server-side state, in server order.
    pub fn set_folder(&self, folder: &str, messages: Vec<RemoteMessage>) {
        let mut folders = self.folders.lock().unwrap();
        if !folders.iter().any(|f| f == folder) {
            folders.push(folder.to_string());
        }
        self.messages
            .lock()
            .unwrap()
            .insert(folder.to_string(), messages);
    }

    /// Fail the next folder listing with `error`.
    pub fn fail_next_listing(&self, error: CoreError) {
        self.list_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_commit(&self, error: CoreError) {
        self.commit_errors.lock().unwrap().push_back(error);
    }

    /// Sleep this long in every listing call, to hold a sync pass open.
    pub fn set_listing_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn committed_flag_changes(&self) -> Vec<(String, Vec<u32>, Vec<String>, Vec<String>)> {
        self.committed.lock().unwrap().clone()
    }

    pub fn expunged(&self) -> Vec<(String, Vec<u32>)> {
        self.expunged.lock().unwrap().clone()
    }

    fn folder_messages(&self, folder: &str) -> Vec<RemoteMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(folder)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MailRemote for FakeMailRemote {
    async fn list_folders(&self) -> Result<Vec<String>> {
        Ok(self.folders.lock().unwrap().clone())
    }

    async fn list_uids_and_flags(&self, folder: &str) -> Result<FolderSnapshot> {
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if let Some(error) = self.list_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self
            .folder_messages(folder)
            .into_iter()
            .map(|m| (m.uid, m.flags))
            .collect())
    }

    async fn fetch_messages(
        &self,
        folder: &str,
        criteria: &FetchCriteria,
    ) -> Result<Vec<RemoteMessage>> {
        let messages = self.folder_messages(folder);
        Ok(match criteria {
            FetchCriteria::All => messages,
            FetchCriteria::Uids(uids) => messages
                .into_iter()
                .filter(|m| uids.contains(&m.uid))
                .collect(),
        })
    }

    async fn search(&self, folder: &str, _query: &str) -> Result<Vec<u32>> {
        Ok(self.folder_messages(folder).iter().map(|m| m.uid).collect())
    }

    async fn commit_flag_changes(
        &self,
        folder: &str,
        uids: &[u32],
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        if let Some(error) = self.commit_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.committed.lock().unwrap().push((
            folder.to_string(),
            uids.to_vec(),
            add.to_vec(),
            remove.to_vec(),
        ));
        Ok(())
    }

    async fn expunge(&self, folder: &str, uids: &[u32]) -> Result<()> {
        if let Some(error) = self.commit_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.expunged
            .lock()
            .unwrap()
            .push((folder.to_string(), uids.to_vec()));
        Ok(())
    }
}
