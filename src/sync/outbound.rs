//! Outbound operation queue
//!
//! Flag changes and deletions made while offline are queued here and
//! replayed against the remote at the start of a sync pass. Additive flag
//! operations merge by (folder, flags) to avoid redundant round-trips.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::backend::MailRemote;
use crate::error::Result;

/// A local change waiting to be pushed to the remote mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundOp {
    /// Add flags to messages (additive, +FLAGS semantics).
    AddFlags {
        folder: String,
        uids: Vec<u32>,
        flags: Vec<String>,
    },
    /// Remove flags from messages (-FLAGS semantics).
    RemoveFlags {
        folder: String,
        uids: Vec<u32>,
        flags: Vec<String>,
    },
    /// Permanently delete messages.
    Delete { folder: String, uids: Vec<u32> },
}

impl OutboundOp {
    pub fn folder(&self) -> &str {
        match self {
            Self::AddFlags { folder, .. } => folder,
            Self::RemoveFlags { folder, .. } => folder,
            Self::Delete { folder, .. } => folder,
        }
    }

    /// Two ops merge when they are the same kind of change on the same
    /// folder with the same flag set.
    fn can_merge(&self, other: &OutboundOp) -> bool {
        match (self, other) {
            (
                Self::AddFlags {
                    folder: f1,
                    flags: flags1,
                    ..
                },
                Self::AddFlags {
                    folder: f2,
                    flags: flags2,
                    ..
                },
            ) => f1 == f2 && flags1 == flags2,
            (
                Self::RemoveFlags {
                    folder: f1,
                    flags: flags1,
                    ..
                },
                Self::RemoveFlags {
                    folder: f2,
                    flags: flags2,
                    ..
                },
            ) => f1 == f2 && flags1 == flags2,
            (Self::Delete { folder: f1, .. }, Self::Delete { folder: f2, .. }) => f1 == f2,
            _ => false,
        }
    }

    fn merge_uids(&mut self, other: &OutboundOp) {
        let (target, source) = match (self, other) {
            (Self::AddFlags { uids, .. }, Self::AddFlags { uids: more, .. }) => (uids, more),
            (Self::RemoveFlags { uids, .. }, Self::RemoveFlags { uids: more, .. }) => (uids, more),
            (Self::Delete { uids, .. }, Self::Delete { uids: more, .. }) => (uids, more),
            _ => return,
        };
        for uid in source {
            if !target.contains(uid) {
                target.push(*uid);
            }
        }
    }

    async fn execute(&self, remote: &dyn MailRemote) -> Result<()> {
        match self {
            Self::AddFlags {
                folder,
                uids,
                flags,
            } => remote.commit_flag_changes(folder, uids, flags, &[]).await,
            Self::RemoveFlags {
                folder,
                uids,
                flags,
            } => remote.commit_flag_changes(folder, uids, &[], flags).await,
            Self::Delete { folder, uids } => remote.expunge(folder, uids).await,
        }
    }
}

/// Outcome for one replayed op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayResult {
    Success,
    /// Transient failure; the op stays queued for the next pass.
    Retry(String),
    /// Terminal failure; the op is dropped.
    Discard(String),
}

/// In-memory queue of pending outbound ops for one account.
#[derive(Default)]
pub struct OutboundQueue {
    ops: Mutex<Vec<OutboundOp>>,
}

impl OutboundQueue {
    /// Queue an op, merging into an existing compatible one when possible.
    pub fn queue(&self, op: OutboundOp) {
        let mut ops = lock(&self.ops);
        if let Some(existing) = ops.iter_mut().find(|existing| existing.can_merge(&op)) {
            existing.merge_uids(&op);
            return;
        }
        ops.push(op);
    }

    pub fn len(&self) -> usize {
        lock(&self.ops).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.ops).is_empty()
    }

    /// Replay every queued op against the remote. Transient failures are
    /// requeued; terminal failures are discarded with a warning. The sync
    /// pass continues either way.
    pub async fn replay(&self, remote: &dyn MailRemote) -> Vec<ReplayResult> {
        let pending: Vec<OutboundOp> = lock(&self.ops).drain(..).collect();
        if pending.is_empty() {
            return Vec::new();
        }

        info!("Replaying {} outbound op(s)", pending.len());
        let mut results = Vec::with_capacity(pending.len());

        for op in pending {
            match op.execute(remote).await {
                Ok(()) => results.push(ReplayResult::Success),
                Err(e) if e.is_transient() => {
                    warn!("Outbound op on {} will be retried: {}", op.folder(), e);
                    results.push(ReplayResult::Retry(e.to_string()));
                    lock(&self.ops).push(op);
                }
                Err(e) => {
                    warn!("Discarding outbound op on {}: {}", op.folder(), e);
                    results.push(ReplayResult::Discard(e.to_string()));
                }
            }
        }

        results
    }
}

fn lock(ops: &Mutex<Vec<OutboundOp>>) -> std::sync::MutexGuard<'_, Vec<OutboundOp>> {
    ops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
