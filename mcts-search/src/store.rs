//! The node arena (spec.md §4.A). Nodes are never moved or freed
//! individually: the whole arena is reset between searches. Allocation is
//! a single atomic bump-pointer fetch-add, so many selector threads can
//! expand different parents at once without taking a lock.

use crate::error::{SearchError, SearchResult};
use crate::node::{NodeIndex, NodeRecord};
use std::sync::atomic::{AtomicU32, Ordering};

pub struct NodeStore {
    nodes: Vec<NodeRecord>,
    next_free: AtomicU32,
    capacity: u32,
}

impl NodeStore {
    /// Reserves `capacity` node slots. When `use_large_pages` is set, first
    /// probes an anonymous `memmap2` mapping of the equivalent byte size
    /// and touches every page of it — a best-effort large-page/pre-fault
    /// hint matching spec.md §4.A's "may request large pages; on failure,
    /// fall back to ordinary pages without surfacing an error". The probe
    /// result only affects logging: the arena's real backing storage is
    /// always a `Vec<NodeRecord>`, since `NodeRecord` carries `OnceLock`
    /// fields that cannot be placed directly inside a raw byte mapping.
    pub fn with_capacity(capacity: u32, use_large_pages: bool) -> Self {
        if use_large_pages {
            probe_large_page_reservation(capacity);
        }
        let nodes = (0..capacity).map(|_| NodeRecord::unallocated()).collect();
        Self {
            nodes,
            next_free: AtomicU32::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> u32 {
        self.next_free.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn get(&self, index: NodeIndex) -> &NodeRecord {
        &self.nodes[index.0 as usize]
    }

    /// Claims `count` contiguous slots and initializes each with its
    /// parent and position hash. Returns the index of the first child;
    /// subsequent children are `first + 1, first + 2, ...`.
    pub fn allocate_children(
        &self,
        parent: NodeIndex,
        hashes: &[u64],
    ) -> SearchResult<NodeIndex> {
        let count = hashes.len() as u32;
        if count == 0 {
            return Err(SearchError::InternalInvariantViolation(
                "allocate_children called with zero children".into(),
            ));
        }
        let first = self.next_free.fetch_add(count, Ordering::AcqRel);
        if first.saturating_add(count) > self.capacity {
            return Err(SearchError::ArenaExhausted {
                requested: count,
                available: self.capacity.saturating_sub(first),
            });
        }
        for (i, hash) in hashes.iter().enumerate() {
            let idx = first + i as u32;
            self.nodes[idx as usize].init(parent, *hash);
        }
        Ok(NodeIndex(first))
    }

    /// Allocates the root itself (index 0, parent `NONE`).
    pub fn allocate_root(&self, zobrist_hash: u64) -> SearchResult<NodeIndex> {
        let first = self.next_free.fetch_add(1, Ordering::AcqRel);
        if first != 0 {
            return Err(SearchError::InternalInvariantViolation(
                "allocate_root called after the arena was already used".into(),
            ));
        }
        self.nodes[0].init(NodeIndex::NONE, zobrist_hash);
        Ok(NodeIndex::ROOT)
    }
}

fn probe_large_page_reservation(capacity: u32) {
    let approx_bytes = capacity as usize * std::mem::size_of::<u64>() * 8;
    match memmap2::MmapOptions::new().len(approx_bytes.max(1)).map_anon() {
        Ok(mut mmap) => {
            for page in mmap.chunks_mut(4096) {
                if let Some(first) = page.first_mut() {
                    *first = 0;
                }
            }
            tracing::debug!(approx_bytes, "large-page arena probe succeeded");
        }
        Err(err) => {
            tracing::debug!(%err, "large-page arena probe failed, using ordinary pages");
        }
    }
}
