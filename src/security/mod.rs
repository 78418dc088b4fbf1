//! Key lifecycle: crack-time estimation, passphrase generation, the
//! in-memory key material cache and EKM-driven key refresh.

pub mod ekm;
pub mod keys_cache;
pub mod passphrase;
pub mod refresh;
pub mod strength;

pub use ekm::{EkmClient, EkmConfig, KeySource};
pub use keys_cache::{
    CacheConfig, CachedPassphrase, KeyMaterialCache, PrivateKeyRecord, StorageClass,
};
pub use refresh::{KeyRefreshCoordinator, RefreshOutcome};
pub use strength::{CrackTimeResult, SecretKind};
