//! Key refresh against the External Key Manager
//!
//! Reconciles locally cached private keys with the authoritative remote
//! set. A remote key supersedes the local one only when strictly newer; a
//! superseding passphrase-protected key whose passphrase is not cached is
//! deferred and reported so the caller can prompt, never replaced silently.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::backend::MessageStore;
use crate::error::{CoreError, Result};
use crate::security::ekm::KeySource;
use crate::security::keys_cache::{KeyMaterialCache, PrivateKeyRecord, StorageClass};
use crate::types::KeyFingerprint;

/// Result of one refresh pass.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Remote set brought nothing newer; no mutation happened.
    Unchanged,
    /// These keys were superseded or newly imported.
    Updated(Vec<KeyFingerprint>),
    /// These superseding keys are passphrase-protected and their
    /// passphrases are not cached. The caller must supply each passphrase
    /// through [`KeyRefreshCoordinator::finalize_pending`]. Keys that could
    /// be applied silently already were.
    NeedsPassphrase(Vec<KeyFingerprint>),
    /// Fetch failed; existing keys retained, error surfaced.
    Failed(CoreError),
}

/// Coordinates the EKM refresh flow for one account.
pub struct KeyRefreshCoordinator {
    account_id: String,
    cache: Arc<KeyMaterialCache>,
    store: Arc<dyn MessageStore>,
    /// Superseding keys waiting on a passphrase. Explicitly owned; entries
    /// leave only through finalize or discard.
    pending: RwLock<HashMap<KeyFingerprint, PrivateKeyRecord>>,
}

impl KeyRefreshCoordinator {
    pub fn new(
        account_id: impl Into<String>,
        cache: Arc<KeyMaterialCache>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            cache,
            store,
            pending: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<KeyMaterialCache> {
        &self.cache
    }

    /// Run one refresh pass against `source`.
    ///
    /// Keys present locally but absent from the remote response are left
    /// untouched; remote absence is not deletion.
    pub async fn refresh(&self, source: &dyn KeySource) -> RefreshOutcome {
        let remote_keys = match source.fetch_private_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(
                    "EKM refresh failed for account {}: {}",
                    self.account_id, e
                );
                return RefreshOutcome::Failed(e);
            }
        };

        let mut applied: Vec<KeyFingerprint> = Vec::new();
        let mut deferred: Vec<KeyFingerprint> = Vec::new();

        for remote_key in remote_keys {
            let fingerprint = remote_key.fingerprint.clone();

            if let Some(local) = self.cache.key(&fingerprint) {
                if !remote_key.is_newer_than(&local) {
                    continue;
                }
            }

            if remote_key.passphrase_protected && !self.cache.has_passphrase(&fingerprint) {
                info!(
                    "Key {} needs a passphrase before it can be updated",
                    fingerprint
                );
                self.defer(remote_key);
                deferred.push(fingerprint);
                continue;
            }

            if let Err(e) = self.apply(remote_key).await {
                warn!(
                    "Failed to apply refreshed key {} for account {}: {}",
                    fingerprint, self.account_id, e
                );
                return RefreshOutcome::Failed(e);
            }
            applied.push(fingerprint);
        }

        if !deferred.is_empty() {
            RefreshOutcome::NeedsPassphrase(deferred)
        } else if !applied.is_empty() {
            info!(
                "Refreshed {} key(s) for account {}",
                applied.len(),
                self.account_id
            );
            RefreshOutcome::Updated(applied)
        } else {
            RefreshOutcome::Unchanged
        }
    }

    /// Complete a deferred update once the caller obtained the passphrase.
    pub async fn finalize_pending(
        &self,
        fingerprint: &KeyFingerprint,
        passphrase: Vec<u8>,
        storage_class: StorageClass,
    ) -> Result<()> {
        let record = self
            .take_pending(fingerprint)
            .ok_or_else(|| CoreError::KeyNotFound(fingerprint.to_string()))?;

        self.cache
            .cache_passphrase(fingerprint.clone(), passphrase, storage_class);
        self.apply(record).await?;

        info!(
            "Finalized deferred key update for {} on account {}",
            fingerprint, self.account_id
        );
        Ok(())
    }

    /// Fingerprints still waiting on a passphrase.
    pub fn pending_fingerprints(&self) -> Vec<KeyFingerprint> {
        self.pending
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Drop a deferred update without applying it.
    pub fn discard_pending(&self, fingerprint: &KeyFingerprint) {
        self.pending
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(fingerprint);
    }

    async fn apply(&self, record: PrivateKeyRecord) -> Result<()> {
        let metadata = record.metadata();
        self.store
            .upsert_key_metadata(&self.account_id, &metadata)
            .await?;
        self.cache.put_key(record);
        Ok(())
    }

    fn defer(&self, record: PrivateKeyRecord) {
        self.pending
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.fingerprint.clone(), record);
    }

    fn take_pending(&self, fingerprint: &KeyFingerprint) -> Option<PrivateKeyRecord> {
        self.pending
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(fingerprint)
    }
}
