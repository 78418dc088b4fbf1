//! Mailbox reconciliation
//!
//! Computes the insert/update/delete sets that bring a local folder cache
//! in line with a fresh remote listing. Pure function of (prior snapshot,
//! remote listing) — no internal state, so a pass over unchanged remote
//! state always yields an empty delta.

use std::collections::BTreeSet;
use tracing::debug;

use crate::types::{FolderSnapshot, FolderSyncDelta, RemoteMessage};

/// Compare the prior snapshot against the remote listing for one folder.
///
/// * `to_delete`: UIDs known locally but gone server-side (expunged or
///   moved), ascending.
/// * `to_insert`: remote messages with unknown UIDs, preserving the
///   server-provided order.
/// * `to_update`: UIDs present in both whose flag set differs; unchanged
///   flags are omitted.
pub fn reconcile(
    prior: &FolderSnapshot,
    remote_uids: &BTreeSet<u32>,
    remote_messages: &[RemoteMessage],
) -> FolderSyncDelta {
    let mut delta = FolderSyncDelta::default();

    for uid in prior.keys() {
        if !remote_uids.contains(uid) {
            delta.to_delete.push(*uid);
        }
    }

    for message in remote_messages {
        match prior.get(&message.uid) {
            None => delta.to_insert.push(message.clone()),
            Some(prior_flags) => {
                if *prior_flags != message.flags {
                    delta.to_update.insert(message.uid, message.flags.clone());
                }
            }
        }
    }

    if !delta.is_empty() {
        debug!(
            "Reconciled folder: {} to insert, {} to update, {} to delete",
            delta.to_insert.len(),
            delta.to_update.len(),
            delta.to_delete.len()
        );
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FlagSet;
    use std::collections::BTreeMap;

    fn flags(tokens: &[&str]) -> FlagSet {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn snapshot(entries: &[(u32, &[&str])]) -> FolderSnapshot {
        entries
            .iter()
            .map(|(uid, tokens)| (*uid, flags(tokens)))
            .collect()
    }

    fn uids(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_spec_scenario() {
        // prior {1: {Seen}, 2: {}}, remote uids {2, 3},
        // remote messages [(2, {Seen}), (3, {})]
        let prior = snapshot(&[(1, &["\\Seen"]), (2, &[])]);
        let remote = vec![
            RemoteMessage::new(2, ["\\Seen"]),
            RemoteMessage::new(3, Vec::<String>::new()),
        ];

        let delta = reconcile(&prior, &uids(&[2, 3]), &remote);

        assert_eq!(delta.to_insert.len(), 1);
        assert_eq!(delta.to_insert[0].uid, 3);
        assert_eq!(
            delta.to_update,
            BTreeMap::from([(2, flags(&["\\Seen"]))])
        );
        assert_eq!(delta.to_delete, vec![1]);
    }

    #[test]
    fn test_unchanged_remote_state_yields_empty_delta() {
        let prior = snapshot(&[(1, &["\\Seen"]), (2, &["\\Flagged"])]);
        let remote = vec![
            RemoteMessage::new(1, ["\\Seen"]),
            RemoteMessage::new(2, ["\\Flagged"]),
        ];

        let delta = reconcile(&prior, &uids(&[1, 2]), &remote);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_idempotence_after_applying_delta() {
        let prior = snapshot(&[(1, &["\\Seen"]), (2, &[]), (5, &["\\Draft"])]);
        let remote_uids = uids(&[2, 3, 4]);
        let remote = vec![
            RemoteMessage::new(2, ["\\Seen", "\\Answered"]),
            RemoteMessage::new(3, Vec::<String>::new()),
            RemoteMessage::new(4, ["\\Seen"]),
        ];

        let delta = reconcile(&prior, &remote_uids, &remote);
        assert!(!delta.is_empty());

        let next = delta.applied_to(&prior);
        let second = reconcile(&next, &remote_uids, &remote);
        assert!(second.is_empty(), "second pass must be a no-op: {:?}", second);
    }

    #[test]
    fn test_uid_set_algebra() {
        let prior = snapshot(&[(10, &[]), (20, &[]), (30, &[])]);
        let remote_uids = uids(&[20, 30, 40, 50]);
        let remote = vec![
            RemoteMessage::new(20, Vec::<String>::new()),
            RemoteMessage::new(30, Vec::<String>::new()),
            RemoteMessage::new(40, Vec::<String>::new()),
            RemoteMessage::new(50, Vec::<String>::new()),
        ];

        let delta = reconcile(&prior, &remote_uids, &remote);

        // inserted UIDs plus surviving prior keys equal the remote set
        let mut covered: BTreeSet<u32> = delta.to_insert.iter().map(|m| m.uid).collect();
        for uid in prior.keys() {
            if remote_uids.contains(uid) {
                covered.insert(*uid);
            }
        }
        assert_eq!(covered, remote_uids);

        // deletes are exactly prior minus remote
        let expected_deletes: Vec<u32> = prior
            .keys()
            .copied()
            .filter(|uid| !remote_uids.contains(uid))
            .collect();
        assert_eq!(delta.to_delete, expected_deletes);
    }

    #[test]
    fn test_insert_preserves_server_order() {
        let prior = FolderSnapshot::new();
        // Server order is not UID order here; the reconciler must not sort
        let remote = vec![
            RemoteMessage::new(7, Vec::<String>::new()),
            RemoteMessage::new(3, Vec::<String>::new()),
            RemoteMessage::new(9, Vec::<String>::new()),
        ];

        let delta = reconcile(&prior, &uids(&[3, 7, 9]), &remote);
        let inserted: Vec<u32> = delta.to_insert.iter().map(|m| m.uid).collect();
        assert_eq!(inserted, vec![7, 3, 9]);
    }

    #[test]
    fn test_flag_order_does_not_trigger_update() {
        let prior = snapshot(&[(1, &["\\Seen", "\\Answered"])]);
        let remote = vec![RemoteMessage::new(1, ["\\Answered", "\\Seen"])];

        let delta = reconcile(&prior, &uids(&[1]), &remote);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_empty_remote_deletes_everything() {
        let prior = snapshot(&[(1, &[]), (2, &[]), (3, &[])]);
        let delta = reconcile(&prior, &BTreeSet::new(), &[]);

        assert_eq!(delta.to_delete, vec![1, 2, 3]);
        assert!(delta.to_insert.is_empty());
        assert!(delta.to_update.is_empty());
    }
}
