//! Shared data structures for the sync and key lifecycle layers

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// IMAP flag tokens for one message, order-insensitive.
pub type FlagSet = BTreeSet<String>;

/// Messages currently known to exist locally for one folder, keyed by UID.
pub type FolderSnapshot = BTreeMap<u32, FlagSet>;

/// Stable identifier for a private/public key, derived from key material.
/// Stored and compared as an uppercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    /// Derive a fingerprint from raw key material.
    pub fn from_key_material(material: &[u8]) -> Self {
        let digest = Sha256::digest(material);
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{:02X}", byte));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KeyFingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_uppercase())
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message as listed by the remote mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub uid: u32,
    pub flags: FlagSet,
}

impl RemoteMessage {
    pub fn new(uid: u32, flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            uid,
            flags: flags.into_iter().map(Into::into).collect(),
        }
    }
}

/// Insert/update/delete sets computed by one reconciliation pass.
///
/// Consumed immediately by the store collaborator as a single transaction;
/// never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSyncDelta {
    /// New messages in server-provided order.
    pub to_insert: Vec<RemoteMessage>,
    /// UID -> new flag set for messages whose flags changed.
    pub to_update: BTreeMap<u32, FlagSet>,
    /// UIDs that vanished server-side, ascending.
    pub to_delete: Vec<u32>,
}

impl FolderSyncDelta {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Apply this delta to a snapshot, producing the snapshot a store would
    /// hold after committing it.
    pub fn applied_to(&self, prior: &FolderSnapshot) -> FolderSnapshot {
        let mut next = prior.clone();
        for uid in &self.to_delete {
            next.remove(uid);
        }
        for (uid, flags) in &self.to_update {
            next.insert(*uid, flags.clone());
        }
        for msg in &self.to_insert {
            next.insert(msg.uid, msg.flags.clone());
        }
        next
    }
}

/// Metadata about a stored key, as persisted by the store collaborator.
/// Raw key material never travels through this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub fingerprint: KeyFingerprint,
    pub is_expired: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = KeyFingerprint::from_key_material(b"key material");
        let b = KeyFingerprint::from_key_material(b"key material");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, KeyFingerprint::from_key_material(b"other material"));
    }

    #[test]
    fn test_delta_applied_to_snapshot() {
        let mut prior = FolderSnapshot::new();
        prior.insert(1, FlagSet::from(["\\Seen".to_string()]));
        prior.insert(2, FlagSet::new());

        let delta = FolderSyncDelta {
            to_insert: vec![RemoteMessage::new(3, Vec::<String>::new())],
            to_update: BTreeMap::from([(2, FlagSet::from(["\\Seen".to_string()]))]),
            to_delete: vec![1],
        };

        let next = delta.applied_to(&prior);
        assert!(!next.contains_key(&1));
        assert_eq!(next[&2], FlagSet::from(["\\Seen".to_string()]));
        assert_eq!(next[&3], FlagSet::new());
    }
}
