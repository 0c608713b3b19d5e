//! The fixed-layout node record (spec.md §3 `NodeRecord`).
//!
//! Every mutable field is either an atomic (written under a documented
//! single-writer or Apply-barrier discipline, read lock-free elsewhere) or
//! a `OnceLock` (written exactly once, at evaluation time). This is the
//! arena-plus-index realization of spec.md §9's "break cyclic references"
//! redesign flag: parents know only a child base index, children know
//! only a parent index, and nothing owns anything across the edge.

use chess_position::Terminal;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;

/// Index into the `NodeStore` arena. `0` is always the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const ROOT: NodeIndex = NodeIndex(0);
    pub const NONE: NodeIndex = NodeIndex(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// One entry of the per-node policy-move table: spec.md §3's
/// `(move_encoding, prior_p)` pair, plus the (initially unexpanded) child
/// slot for that move.
#[derive(Debug)]
pub struct PolicyEntry {
    pub move_encoding: u16,
    pub prior: f32,
    pub child: AtomicU32,
}

impl PolicyEntry {
    fn new(move_encoding: u16, prior: f32) -> Self {
        Self {
            move_encoding,
            prior,
            child: AtomicU32::new(NodeIndex::NONE.0),
        }
    }

    pub fn child_index(&self) -> NodeIndex {
        NodeIndex(self.child.load(Ordering::Acquire))
    }
}

fn terminal_to_u8(t: Terminal) -> u8 {
    match t {
        Terminal::NonTerminal => 0,
        Terminal::CheckmateWin => 1,
        Terminal::CheckmateLoss => 2,
        Terminal::Stalemate => 3,
        Terminal::TablebaseDraw => 4,
        Terminal::TablebaseWin => 5,
        Terminal::TablebaseLoss => 6,
    }
}

fn u8_to_terminal(v: u8) -> Terminal {
    match v {
        1 => Terminal::CheckmateWin,
        2 => Terminal::CheckmateLoss,
        3 => Terminal::Stalemate,
        4 => Terminal::TablebaseDraw,
        5 => Terminal::TablebaseWin,
        6 => Terminal::TablebaseLoss,
        _ => Terminal::NonTerminal,
    }
}

/// A node in the search tree's fixed-capacity arena.
///
/// Invariant 1 (spec.md §8): `n_in_flight_0 >= 0 && n_in_flight_1 >= 0` —
/// trivially true, both are unsigned.
pub struct NodeRecord {
    parent_index: AtomicU32,
    zobrist_hash: AtomicU64,

    n: AtomicU32,
    n_in_flight: [AtomicU32; 2],

    w_sum: AtomicU32, // f32 bits
    d_sum: AtomicU32,
    m_sum: AtomicU32,

    v: AtomicU32, // f32 bits, set once on evaluation
    win_p: AtomicU32,
    loss_p: AtomicU32,
    m_position: AtomicU32,
    evaluated: AtomicU8, // 0 = not yet evaluated, 1 = evaluated

    terminal: AtomicU8,

    transposition_root_index: AtomicU32,
    pending_transposition_extractions: AtomicU8,

    policy: OnceLock<Vec<PolicyEntry>>,
}

impl NodeRecord {
    /// A not-yet-allocated slot. `allocate` below publishes real content
    /// into it; until then it must never be reachable from `parent_index`
    /// / policy child slots (those start at `NodeIndex::NONE`).
    pub fn unallocated() -> Self {
        Self {
            parent_index: AtomicU32::new(NodeIndex::NONE.0),
            zobrist_hash: AtomicU64::new(0),
            n: AtomicU32::new(0),
            n_in_flight: [AtomicU32::new(0), AtomicU32::new(0)],
            w_sum: AtomicU32::new(0),
            d_sum: AtomicU32::new(0),
            m_sum: AtomicU32::new(0),
            v: AtomicU32::new(0),
            win_p: AtomicU32::new(0),
            loss_p: AtomicU32::new(0),
            m_position: AtomicU32::new(0),
            evaluated: AtomicU8::new(0),
            terminal: AtomicU8::new(0),
            transposition_root_index: AtomicU32::new(0),
            pending_transposition_extractions: AtomicU8::new(0),
            policy: OnceLock::new(),
        }
    }

    /// Publishes a freshly-allocated node's identity. Called exactly once
    /// by the thread that claimed this slot from the arena bump pointer,
    /// before the slot's index is handed to anyone else.
    pub fn init(&self, parent_index: NodeIndex, zobrist_hash: u64) {
        self.parent_index.store(parent_index.0, Ordering::Release);
        self.zobrist_hash.store(zobrist_hash, Ordering::Release);
    }

    pub fn parent_index(&self) -> NodeIndex {
        NodeIndex(self.parent_index.load(Ordering::Acquire))
    }

    pub fn zobrist_hash(&self) -> u64 {
        self.zobrist_hash.load(Ordering::Acquire)
    }

    pub fn n(&self) -> u32 {
        self.n.load(Ordering::Acquire)
    }

    pub fn n_in_flight(&self, selector_id: u8) -> u32 {
        self.n_in_flight[selector_id as usize].load(Ordering::Acquire)
    }

    /// Total visits including virtual loss, the quantity PUCT's N(child) uses.
    pub fn adjusted_n(&self) -> u32 {
        self.n() + self.n_in_flight(0) + self.n_in_flight(1)
    }

    pub fn add_in_flight(&self, selector_id: u8, delta: u32) -> u32 {
        self.n_in_flight[selector_id as usize].fetch_add(delta, Ordering::AcqRel) + delta
    }

    pub fn sub_in_flight(&self, selector_id: u8, delta: u32) {
        self.n_in_flight[selector_id as usize].fetch_sub(delta, Ordering::AcqRel);
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated.load(Ordering::Acquire) != 0
    }

    pub fn terminal(&self) -> Terminal {
        u8_to_terminal(self.terminal.load(Ordering::Acquire))
    }

    pub fn set_terminal(&self, t: Terminal) {
        self.terminal.store(terminal_to_u8(t), Ordering::Release);
    }

    pub fn v(&self) -> f32 {
        f32::from_bits(self.v.load(Ordering::Acquire))
    }

    pub fn win_p(&self) -> f32 {
        f32::from_bits(self.win_p.load(Ordering::Acquire))
    }

    pub fn loss_p(&self) -> f32 {
        f32::from_bits(self.loss_p.load(Ordering::Acquire))
    }

    pub fn m_position(&self) -> f32 {
        f32::from_bits(self.m_position.load(Ordering::Acquire))
    }

    /// `q` — the node's mean backed-up value from its own side-to-move's
    /// perspective (spec.md §3's `w_sum`/`n`, what §4.D calls `Q(child)`).
    pub fn q(&self) -> f32 {
        let n = self.n();
        if n == 0 {
            f32::NAN
        } else {
            self.w_sum() / n as f32
        }
    }

    pub fn w_sum(&self) -> f32 {
        f32::from_bits(self.w_sum.load(Ordering::Acquire))
    }

    /// This child's value from its *parent's* point of view, discounted by
    /// in-flight virtual loss: every pending visit is booked as a loss
    /// (`-1`) for the parent's mover until the real backup lands, so the
    /// edge looks steadily worse to every selector while one is already
    /// committed to it (spec.md §4.D). Returns `NaN` if nothing — real or
    /// pending — has touched this child yet.
    pub fn parent_perspective_q_with_virtual_loss(&self) -> f32 {
        let in_flight = (self.n_in_flight(0) + self.n_in_flight(1)) as f32;
        let n = self.n() as f32 + in_flight;
        if n == 0.0 {
            f32::NAN
        } else {
            (-self.w_sum() - in_flight) / n
        }
    }

    pub fn d_sum(&self) -> f32 {
        f32::from_bits(self.d_sum.load(Ordering::Acquire))
    }

    pub fn m_sum(&self) -> f32 {
        f32::from_bits(self.m_sum.load(Ordering::Acquire))
    }

    /// Stores the network (or terminal-evaluator) output for this node.
    /// Called at most once, from the Apply path, before any child of this
    /// node can be selected (children need `v`/policy to compute PUCT).
    pub fn set_evaluation(&self, value: f32, win_p: f32, loss_p: f32, m_position: f32) {
        self.v.store(value.to_bits(), Ordering::Release);
        self.win_p.store(win_p.to_bits(), Ordering::Release);
        self.loss_p.store(loss_p.to_bits(), Ordering::Release);
        self.m_position.store(m_position.to_bits(), Ordering::Release);
        self.evaluated.store(1, Ordering::Release);
    }

    /// Installs the policy-move table. Idempotent: a second call is a
    /// no-op (mirrors spec.md §4.C transposition `SingleNodeCopy`, which
    /// may race to populate the same freshly-linked node).
    pub fn set_policy(&self, moves: Vec<(u16, f32)>) {
        let _ = self.policy.set(
            moves
                .into_iter()
                .map(|(enc, prior)| PolicyEntry::new(enc, prior))
                .collect(),
        );
    }

    pub fn policy(&self) -> Option<&[PolicyEntry]> {
        self.policy.get().map(Vec::as_slice)
    }

    pub fn num_policy_moves(&self) -> usize {
        self.policy.get().map(Vec::len).unwrap_or(0)
    }

    pub fn num_children_expanded(&self) -> usize {
        self.policy
            .get()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| !e.child_index().is_none())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Backup accumulation: increments `n`, decrements in-flight by
    /// `visits`, accumulates the zero-sum statistics. Spec.md §4.H.
    pub fn apply_backup(&self, selector_id: u8, visits: u32, value: f32, draw_p: f32, m: f32) {
        self.n.fetch_add(visits, Ordering::AcqRel);
        self.sub_in_flight(selector_id, visits);
        atomic_f32_add(&self.w_sum, value * visits as f32);
        atomic_f32_add(&self.d_sum, draw_p * visits as f32);
        atomic_f32_add(&self.m_sum, m * visits as f32);
    }

    pub fn transposition_root_index(&self) -> NodeIndex {
        let raw = self.transposition_root_index.load(Ordering::Acquire);
        if raw == 0 {
            NodeIndex::NONE
        } else {
            NodeIndex(raw)
        }
    }

    pub fn pending_transposition_extractions(&self) -> u8 {
        self.pending_transposition_extractions.load(Ordering::Acquire)
    }

    /// Links this node to `root`'s subtree for up to `budget` backups
    /// without an NN call (spec.md §4.C `SingleNodeDeferredCopy`/`SharedSubtree`).
    /// A zero index is reserved for "no root" so `root.0` must be nonzero;
    /// the arena's root is index 0 only for the *search* root, never a
    /// valid transposition target (invariant 3: the target must have
    /// `n >= 1`, which the true search root always eventually has, but we
    /// sidestep the ambiguity by disallowing self-links at the call site).
    pub fn link_transposition(&self, root: NodeIndex, budget: u8) {
        self.transposition_root_index.store(root.0, Ordering::Release);
        self.pending_transposition_extractions
            .store(budget, Ordering::Release);
    }

    /// Consumes one pending extraction; returns `true` if the link should
    /// now be cleared (budget exhausted) and a permanent copy forced.
    pub fn consume_transposition_visit(&self) -> bool {
        let prev = self
            .pending_transposition_extractions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |x| {
                Some(x.saturating_sub(1))
            })
            .unwrap_or(0);
        prev <= 1
    }

    pub fn clear_transposition_link(&self) {
        self.transposition_root_index.store(0, Ordering::Release);
        self.pending_transposition_extractions.store(0, Ordering::Release);
    }
}

fn atomic_f32_add(cell: &AtomicU32, delta: f32) {
    let mut current = cell.load(Ordering::Acquire);
    loop {
        let next = f32::from_bits(current) + delta;
        match cell.compare_exchange_weak(
            current,
            next.to_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unallocated_node_has_no_parent_and_zero_stats() {
        let node = NodeRecord::unallocated();
        assert_eq!(node.parent_index(), NodeIndex::NONE);
        assert_eq!(node.n(), 0);
        assert_eq!(node.n_in_flight(0), 0);
        assert_eq!(node.n_in_flight(1), 0);
    }

    #[test]
    fn in_flight_accounting_round_trips() {
        let node = NodeRecord::unallocated();
        node.add_in_flight(0, 3);
        assert_eq!(node.n_in_flight(0), 3);
        node.apply_backup(0, 3, 1.0, 0.0, 10.0);
        assert_eq!(node.n_in_flight(0), 0);
        assert_eq!(node.n(), 3);
        assert!((node.w_sum() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn policy_install_is_idempotent() {
        let node = NodeRecord::unallocated();
        node.set_policy(vec![(1, 0.5), (2, 0.5)]);
        node.set_policy(vec![(9, 1.0)]);
        assert_eq!(node.num_policy_moves(), 2);
    }

    #[test]
    fn transposition_link_consumes_down_to_zero() {
        let node = NodeRecord::unallocated();
        node.link_transposition(NodeIndex(5), 3);
        assert!(!node.consume_transposition_visit());
        assert!(!node.consume_transposition_visit());
        assert!(node.consume_transposition_visit());
    }
}
