//! In-memory key material and passphrase cache
//!
//! Exclusively owns decrypted private keys and cached passphrases for the
//! active account session, keyed by fingerprint. Everything is zeroed on
//! eviction and on account switch; RAM-only passphrases never leave the
//! process.
//!
//! Locking is two-level: a structure lock held only while looking up or
//! inserting a slot, plus one lock per fingerprint, so writes to different
//! keys never serialize against each other and a reader never observes a
//! half-written record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use zeroize::Zeroizing;

use crate::types::{KeyFingerprint, KeyMetadata};

/// Where a cached passphrase is allowed to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageClass {
    /// Process memory only; must never be written to durable storage.
    RamOnly,
    /// May additionally be persisted by the store collaborator.
    Persisted,
}

/// A decrypted passphrase held until `valid_until`.
#[derive(Clone)]
pub struct CachedPassphrase {
    bytes: Zeroizing<Vec<u8>>,
    pub valid_until: DateTime<Utc>,
    pub storage_class: StorageClass,
}

// Secret bytes never appear in debug output.
impl std::fmt::Debug for CachedPassphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPassphrase")
            .field("bytes", &"<redacted>")
            .field("valid_until", &self.valid_until)
            .field("storage_class", &self.storage_class)
            .finish()
    }
}

/// One private key as held by the cache. The raw material is owned here
/// and nowhere else; it zeroes on drop.
#[derive(Clone)]
pub struct PrivateKeyRecord {
    pub fingerprint: KeyFingerprint,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub passphrase_protected: bool,
    material: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for PrivateKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyRecord")
            .field("fingerprint", &self.fingerprint)
            .field("is_expired", &self.is_expired)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("passphrase_protected", &self.passphrase_protected)
            .field("material", &"<redacted>")
            .finish()
    }
}

impl PrivateKeyRecord {
    pub fn new(
        material: Vec<u8>,
        is_expired: bool,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        passphrase_protected: bool,
    ) -> Self {
        let fingerprint = KeyFingerprint::from_key_material(&material);
        Self::with_fingerprint(
            fingerprint,
            material,
            is_expired,
            created_at,
            expires_at,
            passphrase_protected,
        )
    }

    /// Construct with a fingerprint computed upstream (e.g. by the OpenPGP
    /// library from the primary key packet). An updated key keeps its
    /// fingerprint even though the raw material changes.
    pub fn with_fingerprint(
        fingerprint: KeyFingerprint,
        material: Vec<u8>,
        is_expired: bool,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        passphrase_protected: bool,
    ) -> Self {
        Self {
            fingerprint,
            is_expired,
            created_at,
            expires_at,
            passphrase_protected,
            material: Zeroizing::new(material),
        }
    }

    pub fn material(&self) -> &[u8] {
        &self.material
    }

    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            fingerprint: self.fingerprint.clone(),
            is_expired: self.is_expired,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    /// Timestamp used to decide supersession: expiry when present,
    /// creation/import time otherwise.
    fn effective_timestamp(&self) -> DateTime<Utc> {
        self.expires_at.unwrap_or(self.created_at)
    }

    /// Whether this key supersedes `other`. Strictly newer only; equal
    /// timestamps are a no-op by policy.
    pub fn is_newer_than(&self, other: &PrivateKeyRecord) -> bool {
        self.effective_timestamp() > other.effective_timestamp()
    }
}

/// Time source seam so expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time, the only clock used outside tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cache policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default passphrase lifetime in seconds from insertion. The cache is
    /// in-memory, so "until app restart" is the implicit upper bound.
    pub passphrase_ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            passphrase_ttl_secs: 4 * 60 * 60,
        }
    }
}

type SlotMap<T> = RwLock<HashMap<KeyFingerprint, Arc<RwLock<T>>>>;

/// In-memory store of decrypted private keys and cached passphrases.
pub struct KeyMaterialCache {
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    passphrases: SlotMap<CachedPassphrase>,
    keys: SlotMap<PrivateKeyRecord>,
}

impl KeyMaterialCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Explicit clock injection for tests.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            config,
            passphrases: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite a passphrase with an explicit expiry.
    ///
    /// For [`StorageClass::RamOnly`] entries the caller must guarantee no
    /// write-through to the store collaborator occurs.
    pub fn put_passphrase(
        &self,
        fingerprint: KeyFingerprint,
        passphrase: Vec<u8>,
        valid_until: DateTime<Utc>,
        storage_class: StorageClass,
    ) {
        let entry = CachedPassphrase {
            bytes: Zeroizing::new(passphrase),
            valid_until,
            storage_class,
        };
        put_slot(&self.passphrases, fingerprint, entry);
    }

    /// Insert a passphrase with the configured default lifetime.
    pub fn cache_passphrase(
        &self,
        fingerprint: KeyFingerprint,
        passphrase: Vec<u8>,
        storage_class: StorageClass,
    ) {
        let valid_until =
            self.clock.now() + chrono::Duration::seconds(self.config.passphrase_ttl_secs);
        self.put_passphrase(fingerprint, passphrase, valid_until, storage_class);
    }

    /// Return the cached passphrase, or None when absent or expired.
    /// Expired entries are evicted (and zeroed) on the way out.
    pub fn passphrase(&self, fingerprint: &KeyFingerprint) -> Option<Zeroizing<Vec<u8>>> {
        let slot = read_lock(&self.passphrases).get(fingerprint).cloned()?;

        {
            let entry = read_lock(&slot);
            if self.clock.now() <= entry.valid_until {
                return Some(entry.bytes.clone());
            }
        }

        debug!("Evicting expired passphrase for {}", fingerprint);
        self.evict_passphrase(fingerprint);
        None
    }

    pub fn has_passphrase(&self, fingerprint: &KeyFingerprint) -> bool {
        self.passphrase(fingerprint).is_some()
    }

    /// Drop a passphrase regardless of validity. The bytes zero on drop.
    pub fn evict_passphrase(&self, fingerprint: &KeyFingerprint) {
        write_lock(&self.passphrases).remove(fingerprint);
    }

    /// Fingerprints with a currently valid passphrase. Expired entries are
    /// evicted as a side effect.
    pub fn cached_passphrase_fingerprints(&self) -> Vec<KeyFingerprint> {
        let fingerprints: Vec<KeyFingerprint> =
            read_lock(&self.passphrases).keys().cloned().collect();
        fingerprints
            .into_iter()
            .filter(|fp| self.has_passphrase(fp))
            .collect()
    }

    /// Insert or replace a private key record.
    pub fn put_key(&self, record: PrivateKeyRecord) {
        put_slot(&self.keys, record.fingerprint.clone(), record);
    }

    pub fn key(&self, fingerprint: &KeyFingerprint) -> Option<PrivateKeyRecord> {
        let slot = read_lock(&self.keys).get(fingerprint).cloned()?;
        let record = read_lock(&slot).clone();
        Some(record)
    }

    /// Snapshot of all cached key records. Insertion order is irrelevant.
    pub fn all_keys(&self) -> Vec<PrivateKeyRecord> {
        let slots: Vec<Arc<RwLock<PrivateKeyRecord>>> =
            read_lock(&self.keys).values().cloned().collect();
        slots.iter().map(|slot| read_lock(slot).clone()).collect()
    }

    pub fn remove_key(&self, fingerprint: &KeyFingerprint) {
        write_lock(&self.keys).remove(fingerprint);
    }

    /// Drop everything, e.g. on account switch. All key material and
    /// passphrase bytes zero on drop.
    pub fn clear(&self) {
        write_lock(&self.keys).clear();
        write_lock(&self.passphrases).clear();
        debug!("Key material cache cleared");
    }
}

/// Replace a slot in place when the fingerprint is already present (taking
/// only that fingerprint's lock), otherwise insert under the structure lock.
fn put_slot<T>(map: &SlotMap<T>, fingerprint: KeyFingerprint, value: T) {
    {
        let slots = read_lock(map);
        if let Some(slot) = slots.get(&fingerprint) {
            *write_lock(slot) = value;
            return;
        }
    }
    write_lock(map).insert(fingerprint, Arc::new(RwLock::new(value)));
}

// Poisoning only happens if a holder panicked mid-operation; the cached
// data is still the last fully written value, so recover the guard.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
