//! Mailbox synchronization: snapshot reconciliation, the per-account sync
//! engine, outbound op replay and the multi-account supervisor.

pub mod engine;
pub mod outbound;
pub mod reconcile;
pub mod supervisor;

pub use engine::{AccountSyncer, SyncConfig, SyncEvent, SyncOutcome, SyncResult, SyncState, SyncStatus};
pub use outbound::{OutboundOp, OutboundQueue, ReplayResult};
pub use reconcile::reconcile;
pub use supervisor::SyncSupervisor;
