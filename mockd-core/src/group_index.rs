//! Connection-group index: the manager-side half of the dual-indexed
//! group membership, paired with the connection manager's own
//! per-connection group set.
//!
//! This structure owns `group-name -> set<connection-id>` under a single
//! mutex. It does not know about connections directly — `mockd-ws` pairs
//! this with each connection's own `set<group-name>` (guarded by the
//! connection's own lock) and is responsible for obeying the lock order
//! the spec mandates: the connection's mutex is always released before
//! this index's mutex is acquired.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;

/// A connection may belong to at most this many groups.
pub const MAX_GROUPS_PER_CONNECTION: usize = 100;

#[derive(Debug, PartialEq, Eq)]
pub enum GroupIndexError {
    TooManyGroups,
}

/// Thread-safe `group-name -> set<connection-id>` index. Generic over the
/// connection-id type so it can be unit-tested without pulling in the
/// WebSocket connection type.
pub struct GroupIndex<Id: Eq + Hash + Clone> {
    groups: Mutex<HashMap<String, HashSet<Id>>>,
}

impl<Id: Eq + Hash + Clone> Default for GroupIndex<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Eq + Hash + Clone> GroupIndex<Id> {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Add `id` to `group`. The caller is responsible for having already
    /// checked (and updated, under its own lock) the connection's own
    /// group-count cap before calling this — this side only maintains
    /// the reverse index.
    pub fn join(&self, group: &str, id: Id) {
        let mut groups = self.groups.lock().unwrap();
        groups.entry(group.to_string()).or_default().insert(id);
    }

    pub fn leave(&self, group: &str, id: &Id) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(members) = groups.get_mut(group) {
            members.remove(id);
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }

    /// Remove `id` from every group in one critical section.
    pub fn purge(&self, id: &Id) {
        let mut groups = self.groups.lock().unwrap();
        groups.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }

    /// Snapshot of a group's membership, for broadcast enumeration.
    pub fn members(&self, group: &str) -> Vec<Id> {
        let groups = self.groups.lock().unwrap();
        groups
            .get(group)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().unwrap().len()
    }
}

/// Check whether adding one more group to `current_count` groups would
/// violate the per-connection cap.
pub fn check_group_cap(current_count: usize) -> Result<(), GroupIndexError> {
    if current_count >= MAX_GROUPS_PER_CONNECTION {
        Err(GroupIndexError::TooManyGroups)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_members_reflects_it() {
        let index: GroupIndex<u64> = GroupIndex::new();
        index.join("room1", 1);
        index.join("room1", 2);
        index.join("room2", 3);
        let mut members = index.members("room1");
        members.sort();
        assert_eq!(members, vec![1, 2]);
        assert_eq!(index.members("room2"), vec![3]);
    }

    #[test]
    fn leave_removes_empty_group() {
        let index: GroupIndex<u64> = GroupIndex::new();
        index.join("room1", 1);
        index.leave("room1", &1);
        assert!(index.members("room1").is_empty());
        assert_eq!(index.group_count(), 0);
    }

    #[test]
    fn purge_removes_from_every_group_at_once() {
        let index: GroupIndex<u64> = GroupIndex::new();
        index.join("room1", 1);
        index.join("room2", 1);
        index.join("room2", 2);
        index.purge(&1);
        assert!(index.members("room1").is_empty());
        assert_eq!(index.members("room2"), vec![2]);
    }

    #[test]
    fn group_cap_rejects_101st_group() {
        assert!(check_group_cap(99).is_ok());
        assert_eq!(check_group_cap(100), Err(GroupIndexError::TooManyGroups));
    }
}
