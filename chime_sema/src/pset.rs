//! A partially persistent set.
//!
//! The set can backtrack to its last checkpoint and switch between saved
//! versions, but only the current version is editable. The checker uses
//! it for speculative scope manipulation: `commit` before a tentative
//! branch, then `reset` or `stash` depending on the outcome.

use std::collections::BTreeSet;

/// A stash handle. Zero is the dummy version; `apply(0)` is a no-op.
pub type VersionId = usize;

pub const DUMMY_VERSION_ID: VersionId = 0;

#[derive(Clone, Debug)]
struct LogEntry<T> {
    is_insert: bool, // otherwise erase
    data: T,
}

/// Operations are O(1) amortised except `reset`, which is linear in the
/// number of changes since the last checkpoint.
///
/// A stash is associated with the checkpoint it was captured under;
/// applying it under a different checkpoint is undefined behaviour and is
/// only guarded by a debug assertion.
#[derive(Clone, Debug)]
pub struct PSet<T: Ord + Clone> {
    data: BTreeSet<T>,
    log: Vec<Vec<LogEntry<T>>>,
    stashes: Vec<Vec<Vec<LogEntry<T>>>>,
}

impl<T: Ord + Clone> Default for PSet<T> {
    fn default() -> PSet<T> {
        PSet::new()
    }
}

impl<T: Ord + Clone> PSet<T> {
    /// An empty container always starts with a base checkpoint.
    pub fn new() -> PSet<T> {
        let mut set = PSet {
            data: BTreeSet::new(),
            log: vec![],
            stashes: vec![],
        };
        set.commit();
        set
    }

    pub fn from_set(data: BTreeSet<T>) -> PSet<T> {
        let mut set = PSet {
            data,
            log: vec![],
            stashes: vec![],
        };
        set.commit();
        set
    }

    pub fn raw(&self) -> &BTreeSet<T> {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.log.clear();
        self.stashes.clear();
        self.commit();
    }

    pub fn insert(&mut self, value: T) -> bool {
        self.check_in(&value);
        self.data.insert(value)
    }

    pub fn erase(&mut self, value: &T) -> bool {
        self.check_out(value);
        self.data.remove(value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.data.contains(value)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Whether nothing changed since the last checkpoint.
    pub fn unchanged(&self) -> bool {
        self.log.last().map_or(true, |frame| frame.is_empty())
    }

    /// Add a new checkpoint.
    pub fn commit(&mut self) {
        self.log.push(vec![]);
        self.stashes.push(vec![]);
    }

    /// Go back to the last checkpoint, discarding all changes after it.
    pub fn reset(&mut self) {
        debug_assert!(!self.log.is_empty());
        let frame = self.log.last_mut().expect("reset without a checkpoint");
        for entry in frame.iter().rev() {
            if entry.is_insert {
                self.data.remove(&entry.data);
            } else {
                self.data.insert(entry.data.clone());
            }
        }
        frame.clear();
    }

    /// Go back to the last checkpoint, saving the changes; they can be
    /// re-applied later with the returned id.
    pub fn stash(&mut self) -> VersionId {
        debug_assert!(!self.stashes.is_empty());
        let frame = self.log.last().expect("stash without a checkpoint").clone();
        self.stashes.last_mut().unwrap().push(frame);
        self.reset();
        self.stashes.last().unwrap().len()
    }

    /// Re-apply changes saved by `stash`. The id is associated with the
    /// current last checkpoint; stash and apply must happen under the
    /// same checkpoint.
    pub fn apply(&mut self, version: VersionId) {
        if version == DUMMY_VERSION_ID {
            return;
        }
        let raw = version - 1;
        debug_assert!(self.stashes.last().map_or(false, |s| s.len() > raw));
        let entries: Vec<LogEntry<T>> = self.stashes.last().unwrap()[raw].clone();
        for entry in entries {
            if entry.is_insert {
                self.check_in(&entry.data);
                self.data.insert(entry.data);
            } else {
                self.check_out(&entry.data);
                self.data.remove(&entry.data);
            }
        }
    }

    /// Remove the last checkpoint without changing the data, merging its
    /// delta into the checkpoint below:
    ///
    /// ```text
    /// 1, 2 !! 3, 4 !! 5, 6   --reset_soft-->   1, 2 !! 3, 4, 5, 6
    /// ```
    ///
    /// With no second-to-last checkpoint, only the stashed versions are
    /// cleared.
    pub fn reset_soft(&mut self) {
        if self.log.len() > 1 {
            self.stashes.pop();
            let top = self.log.pop().unwrap();
            self.log.last_mut().unwrap().extend(top);
        } else {
            self.stashes.last_mut().unwrap().clear();
        }
    }

    fn check_in(&mut self, value: &T) {
        if !self.data.contains(value) {
            self.log.last_mut().unwrap().push(LogEntry {
                is_insert: true,
                data: value.clone(),
            });
        }
    }

    fn check_out(&mut self, value: &T) {
        if self.data.contains(value) {
            self.log.last_mut().unwrap().push(LogEntry {
                is_insert: false,
                data: value.clone(),
            });
        }
    }
}

/// Commits on construction and reset-softs when leaving scope.
pub struct CommitScope<'a, T: Ord + Clone> {
    set: &'a mut PSet<T>,
}

impl<'a, T: Ord + Clone> CommitScope<'a, T> {
    pub fn new(set: &'a mut PSet<T>) -> CommitScope<'a, T> {
        set.commit();
        CommitScope { set }
    }

    pub fn get(&mut self) -> &mut PSet<T> {
        self.set
    }
}

impl<'a, T: Ord + Clone> Drop for CommitScope<'a, T> {
    fn drop(&mut self) {
        self.set.reset_soft();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_discards() {
        let mut set = PSet::new();
        set.insert(1);
        set.commit();
        set.insert(2);
        set.erase(&1);
        set.reset();
        assert!(set.contains(&1));
        assert!(!set.contains(&2));
    }

    #[test]
    fn test_stash_then_apply_restores() {
        // commit; insert x; stash v; apply v  =>  x is in the set
        let mut set = PSet::new();
        set.commit();
        set.insert(42);
        let version = set.stash();
        assert_ne!(version, DUMMY_VERSION_ID);
        assert!(!set.contains(&42));
        set.apply(version);
        assert!(set.contains(&42));
    }

    #[test]
    fn test_multiple_stashes() {
        let mut set = PSet::new();
        set.commit();
        set.insert("a");
        let va = set.stash();
        set.insert("b");
        let vb = set.stash();
        assert!(set.is_empty());

        set.apply(va);
        assert!(set.contains(&"a") && !set.contains(&"b"));
        set.reset();
        set.apply(vb);
        assert!(set.contains(&"b") && !set.contains(&"a"));
    }

    #[test]
    fn test_apply_dummy_is_noop() {
        let mut set: PSet<i32> = PSet::new();
        set.insert(1);
        set.apply(DUMMY_VERSION_ID);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_reset_soft_merges() {
        let mut set = PSet::new();
        set.insert(1);
        set.commit();
        set.insert(2);
        set.reset_soft();
        // both deltas now sit under the base checkpoint
        set.reset();
        assert!(set.is_empty());
    }

    #[test]
    fn test_commit_scope() {
        let mut set = PSet::new();
        set.insert(1);
        {
            let mut scope = CommitScope::new(&mut set);
            scope.get().insert(2);
        }
        assert!(set.contains(&2));
        // the scope merged its delta downward rather than discarding it
        set.reset();
        assert!(set.is_empty());
    }

    #[test]
    fn test_erase_then_reset_reinserts() {
        let mut set = PSet::new();
        set.insert(7);
        set.commit();
        set.erase(&7);
        assert!(!set.contains(&7));
        set.reset();
        assert!(set.contains(&7));
    }
}
