//! Ties the node arena, the transposition index, and the position for
//! each node together, and owns backup (spec.md §4.H).

use crate::config::SearchConfig;
use crate::error::SearchResult;
use crate::node::NodeIndex;
use crate::store::NodeStore;
use crate::transposition::TranspositionIndex;
use chess_position::{PolicyMove, Position, Terminal};
use std::sync::OnceLock;

pub struct Tree {
    pub store: NodeStore,
    pub transposition: TranspositionIndex,
    pub config: SearchConfig,
    positions: Vec<OnceLock<Position>>,
    root_moves: Vec<OnceLock<Vec<PolicyMove>>>,
}

impl Tree {
    pub fn new(config: SearchConfig, root_position: Position) -> SearchResult<Self> {
        let store = NodeStore::with_capacity(config.arena_capacity, config.use_large_pages);
        let root_hash = root_position.zobrist_hash();
        let root = store.allocate_root(root_hash)?;
        debug_assert_eq!(root, NodeIndex::ROOT);

        let capacity = config.arena_capacity as usize;
        let positions: Vec<OnceLock<Position>> = (0..capacity).map(|_| OnceLock::new()).collect();
        let root_moves: Vec<OnceLock<Vec<PolicyMove>>> =
            (0..capacity).map(|_| OnceLock::new()).collect();
        let _ = positions[0].set(root_position);

        Ok(Self {
            store,
            transposition: TranspositionIndex::new(),
            config,
            positions,
            root_moves,
        })
    }

    pub fn root(&self) -> NodeIndex {
        NodeIndex::ROOT
    }

    pub fn position(&self, index: NodeIndex) -> &Position {
        self.positions[index.0 as usize]
            .get()
            .expect("position must be set before the node is reachable")
    }

    fn set_position(&self, index: NodeIndex, position: Position) {
        let _ = self.positions[index.0 as usize].set(position);
    }

    fn legal_moves(&self, index: NodeIndex) -> &[PolicyMove] {
        self.root_moves[index.0 as usize]
            .get_or_init(|| self.position(index).legal_moves())
    }

    /// Resolves the already-allocated child for `policy_slot` at `parent`,
    /// allocating and linking a fresh node if no selector has claimed that
    /// slot yet. Returns the child index and whether this call was the one
    /// that performed the allocation (the caller stages the new node's
    /// hash for transposition lookup only on a fresh allocation).
    pub fn expand_child(&self, parent: NodeIndex, policy_slot: usize) -> SearchResult<(NodeIndex, bool)> {
        let entry = &self.store.get(parent).policy().expect("parent must be evaluated")[policy_slot];
        let existing = entry.child_index();
        if !existing.is_none() {
            return Ok((existing, false));
        }

        let moves = self.legal_moves(parent);
        let mv = &moves[policy_slot];
        let child_position = self.position(parent).apply(mv);
        let child_hash = child_position.zobrist_hash();
        let child = self.store.allocate_children(parent, &[child_hash])?;
        self.set_position(child, child_position);

        match entry.child.compare_exchange(
            NodeIndex::NONE.0,
            child.0,
            std::sync::atomic::Ordering::AcqRel,
            std::sync::atomic::Ordering::Acquire,
        ) {
            Ok(_) => Ok((child, true)),
            // Lost the race: another selector linked a child first. The
            // node we just allocated is simply never referenced again;
            // the arena trades that slot for lock freedom.
            Err(winner) => Ok((NodeIndex(winner), false)),
        }
    }

    /// Applies a terminal position's fixed evaluation, from *this node's
    /// own* side-to-move perspective (spec.md §3) — the same convention
    /// `w_sum`/`q()` use everywhere else (node.rs `q()`,
    /// `parent_perspective_q_with_virtual_loss`). `Terminal::CheckmateWin` /
    /// `TablebaseWin` name a win for the mover who *reached* this position
    /// (chess-position's `Position::terminal` doc), i.e. this node's own
    /// side to move is the one who just got mated/lost the tablebase line,
    /// so its own value is `-1.0`, not `+1.0`.
    pub fn evaluate_terminal(&self, index: NodeIndex, terminal: Terminal) {
        let node = self.store.get(index);
        node.set_terminal(terminal);
        let (value, win_p, loss_p) = match terminal {
            Terminal::CheckmateWin | Terminal::TablebaseWin => (-1.0, 0.0, 1.0),
            Terminal::CheckmateLoss | Terminal::TablebaseLoss => (1.0, 1.0, 0.0),
            Terminal::Stalemate | Terminal::TablebaseDraw => (0.0, 0.0, 0.0),
            Terminal::NonTerminal => unreachable!("evaluate_terminal called on non-terminal node"),
        };
        node.set_evaluation(value, win_p, loss_p, 0.0);
    }

    /// Backs up `value` (from `leaf`'s own side-to-move perspective) along
    /// the path to the root, flipping sign at every step (spec.md §4.H:
    /// zero-sum propagation).
    pub fn backup_path(&self, path: &[(NodeIndex, u8)], visits: u32, mut value: f32, draw_p: f32, m: f32) {
        for &(index, selector_id) in path.iter().rev() {
            self.store
                .get(index)
                .apply_backup(selector_id, visits, value, draw_p, m);
            value = -value;
        }
    }

    /// Move statistics for the root's children, used for PV/UCI-style
    /// reporting: `(policy_slot, move_encoding, visits, q)`.
    pub fn root_child_stats(&self) -> Vec<(usize, u16, u32, f32)> {
        let root = self.store.get(NodeIndex::ROOT);
        let Some(policy) = root.policy() else {
            return Vec::new();
        };
        policy
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                let child = entry.child_index();
                if child.is_none() {
                    return None;
                }
                let child_node = self.store.get(child);
                Some((slot, entry.move_encoding, child_node.n(), -child_node.q()))
            })
            .collect()
    }

    pub fn most_visited_move(&self) -> Option<u16> {
        self.root_child_stats()
            .into_iter()
            .max_by_key(|&(_, _, visits, _)| visits)
            .map(|(_, encoding, _, _)| encoding)
    }
}
