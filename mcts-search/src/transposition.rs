//! The transposition index (spec.md §4.B): a hash-to-node map letting two
//! different move orders that reach the same position share evaluation
//! work. Reads happen on the hot descent path from many selector threads;
//! writes are staged per-batch and only published at the end-of-batch
//! barrier, so no selector ever observes a transposition link created
//! mid-batch by a sibling (spec.md §8 invariant: "first publisher wins").

use crate::node::NodeIndex;
use rustc_hash::FxHashMap;
use std::sync::RwLock;

pub struct TranspositionIndex {
    published: RwLock<FxHashMap<u64, NodeIndex>>,
}

impl TranspositionIndex {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(FxHashMap::default()),
        }
    }

    /// Lock-free-ish lookup (a brief read lock) against the published map.
    pub fn lookup(&self, hash: u64) -> Option<NodeIndex> {
        self.published.read().unwrap().get(&hash).copied()
    }

    /// Publishes `hash -> index` if no entry exists yet. First writer wins;
    /// returns the entry that ended up installed (possibly someone else's).
    pub fn publish(&self, hash: u64, index: NodeIndex) -> NodeIndex {
        *self
            .published
            .write()
            .unwrap()
            .entry(hash)
            .or_insert(index)
    }

    pub fn len(&self) -> usize {
        self.published.read().unwrap().len()
    }

    pub fn clear(&self) {
        self.published.write().unwrap().clear();
    }
}

impl Default for TranspositionIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-selector staging buffer (spec.md §4.B): new positions discovered
/// during a batch are held here, not published, until `flush` runs at the
/// batch's end-of-selection barrier. This is what keeps mid-batch
/// selection from observing a transposition created three nodes earlier
/// in the same batch, which spec.md §8 explicitly disallows.
#[derive(Default)]
pub struct PendingTranspositions {
    staged: Vec<(u64, NodeIndex)>,
}

impl PendingTranspositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, hash: u64, index: NodeIndex) {
        self.staged.push((hash, index));
    }

    /// Publishes every staged entry and clears the buffer.
    pub fn flush(&mut self, index: &TranspositionIndex) {
        for (hash, idx) in self.staged.drain(..) {
            index.publish(hash, idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_publish_wins() {
        let index = TranspositionIndex::new();
        assert_eq!(index.publish(10, NodeIndex(1)), NodeIndex(1));
        assert_eq!(index.publish(10, NodeIndex(2)), NodeIndex(1));
    }

    #[test]
    fn staged_entries_are_invisible_until_flush() {
        let index = TranspositionIndex::new();
        let mut pending = PendingTranspositions::new();
        pending.stage(7, NodeIndex(3));
        assert_eq!(index.lookup(7), None);
        pending.flush(&index);
        assert_eq!(index.lookup(7), Some(NodeIndex(3)));
    }
}
