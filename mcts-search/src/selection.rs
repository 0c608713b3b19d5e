//! Leaf selection (spec.md §4.D) and the leaf-evaluator pipeline
//! (spec.md §4.C) that tries to resolve a selected leaf without an NN call.

use crate::config::TranspositionMode;
use crate::error::SearchResult;
use crate::node::NodeIndex;
use crate::transposition::PendingTranspositions;
use crate::tree::Tree;

/// One node visited on the path from root to a selected leaf, tagged with
/// the selector that visited it (virtual loss is per-selector, spec.md
/// §4.D: two overlapping selectors must not cancel each other's in-flight
/// counts).
pub type PathStep = (NodeIndex, u8);

/// Outcome of a single root-to-leaf descent.
pub enum SelectOutcome {
    /// The leaf resolved without an NN call (terminal, or linked to an
    /// already-evaluated transposition root) and has already been backed up.
    Resolved,
    /// The leaf needs a real NN evaluation; batch it.
    NeedsEval { leaf: NodeIndex, path: Vec<PathStep> },
}

pub struct LeafSelector;

impl LeafSelector {
    /// Runs one descent from the root, applying virtual loss along the way,
    /// and resolving the leaf through the evaluator pipeline if possible.
    pub fn select_one(
        tree: &Tree,
        selector_id: u8,
        pending: &mut PendingTranspositions,
    ) -> SearchResult<SelectOutcome> {
        let mut path: Vec<PathStep> = Vec::new();
        let mut current = tree.root();

        loop {
            tree.store.get(current).add_in_flight(selector_id, 1);
            path.push((current, selector_id));
            let node = tree.store.get(current);

            if node.terminal().is_terminal() {
                tree.backup_path(&path, 1, node.v(), draw_p(node), node.m_position());
                return Ok(SelectOutcome::Resolved);
            }

            if !node.is_evaluated() {
                // First time this position is seen: try terminal / transposition
                // resolution before falling back to an NN request.
                let position = tree.position(current);
                let terminal = position.terminal();
                if terminal.is_terminal() {
                    tree.evaluate_terminal(current, terminal);
                    tree.backup_path(&path, 1, node.v(), 0.0, 0.0);
                    return Ok(SelectOutcome::Resolved);
                }

                if current != tree.root() && tree.config.transposition_mode != TranspositionMode::Off {
                    let hash = position.zobrist_hash();
                    if let Some(root) = tree.transposition.lookup(hash) {
                        if root != current && try_link_transposition(tree, current, root) {
                            let value = transposed_value(tree, current, root);
                            tree.backup_path(&path, 1, value, 0.0, 0.0);
                            return Ok(SelectOutcome::Resolved);
                        }
                    } else {
                        pending.stage(hash, current);
                    }
                }

                return Ok(SelectOutcome::NeedsEval { leaf: current, path });
            }

            let Some(slot) = best_child_slot(tree, current) else {
                // Evaluated, non-terminal, but zero legal moves recorded:
                // treat as resolved at this node's own value (defensive;
                // `Position::terminal` should already have caught this).
                tree.backup_path(&path, 1, node.v(), 0.0, 0.0);
                return Ok(SelectOutcome::Resolved);
            };
            let (child, _fresh) = tree.expand_child(current, slot)?;
            current = child;
        }
    }
}

fn draw_p(node: &crate::node::NodeRecord) -> f32 {
    node.d_sum() / node.n().max(1) as f32
}

fn fpu_value(tree: &Tree, parent: &crate::node::NodeRecord) -> f32 {
    if tree.config.fpu_value.is_nan() {
        -parent.v()
    } else {
        tree.config.fpu_value
    }
}

fn best_child_slot(tree: &Tree, parent_index: NodeIndex) -> Option<usize> {
    let parent = tree.store.get(parent_index);
    let policy = parent.policy()?;
    if policy.is_empty() {
        return None;
    }
    let parent_n = (parent.adjusted_n().max(1)) as f32;
    let cpuct = tree.config.cpuct_init
        + ((1.0 + parent_n + tree.config.cpuct_base) / tree.config.cpuct_base).ln();
    let sqrt_n = parent_n.sqrt();

    let mut best_slot = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    let mut best_child = NodeIndex::NONE;
    for (slot, entry) in policy.iter().enumerate() {
        let child_index = entry.child_index();
        let (q, n_child) = if child_index.is_none() {
            (fpu_value(tree, parent), 0u32)
        } else {
            let child = tree.store.get(child_index);
            let adjusted = child.adjusted_n();
            let q = if adjusted == 0 {
                fpu_value(tree, parent)
            } else {
                child.parent_perspective_q_with_virtual_loss()
            };
            (q, adjusted)
        };
        let u = cpuct * entry.prior * sqrt_n / (1.0 + n_child as f32);
        let score = q + u;

        let better = score > best_score
            || (score == best_score && entry.prior > policy[best_slot].prior)
            || (score == best_score
                && entry.prior == policy[best_slot].prior
                && child_index.0 < best_child.0);
        if better {
            best_score = score;
            best_slot = slot;
            best_child = child_index;
        }
    }
    Some(best_slot)
}

fn try_link_transposition(tree: &Tree, node_index: NodeIndex, root: NodeIndex) -> bool {
    let root_node = tree.store.get(root);
    if root_node.n() == 0 || !root_node.is_evaluated() {
        return false;
    }
    if tree.config.transposition_mode == TranspositionMode::SingleNodeCopy {
        tree.store
            .get(node_index)
            .set_evaluation(root_node.v(), root_node.win_p(), root_node.loss_p(), root_node.m_position());
        return true;
    }
    let budget = tree.config.max_transposition_applications(root_node.n());
    tree.store.get(node_index).link_transposition(root, budget);
    tree.store
        .get(node_index)
        .set_evaluation(root_node.v(), root_node.win_p(), root_node.loss_p(), root_node.m_position());
    true
}

fn transposed_value(tree: &Tree, node_index: NodeIndex, root: NodeIndex) -> f32 {
    let node = tree.store.get(node_index);
    let exhausted = node.consume_transposition_visit();
    if exhausted {
        node.clear_transposition_link();
    }
    let root_node = tree.store.get(root);
    if tree.config.transposition_use_transposed_q && root_node.n() > 0 {
        let fraction = tree.config.transposition_root_q_fraction;
        fraction * root_node.q() + (1.0 - fraction) * node.v()
    } else {
        node.v()
    }
}

/// Classification of a batch's selected leaves (spec.md §4.E
/// `SelectedNodesSet`): which ones actually need an NN call versus which
/// resolved for free via the evaluator pipeline above.
#[derive(Default)]
pub struct SelectedNodesSet {
    pub needs_eval: Vec<(NodeIndex, Vec<PathStep>)>,
}

impl SelectedNodesSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_selected(&mut self, outcome: SelectOutcome) {
        if let SelectOutcome::NeedsEval { leaf, path } = outcome {
            self.needs_eval.push((leaf, path));
        }
    }

    pub fn len(&self) -> usize {
        self.needs_eval.len()
    }

    pub fn is_empty(&self) -> bool {
        self.needs_eval.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SearchConfig, TranspositionMode};
    use chess_position::Position;

    #[test]
    fn first_selection_from_root_needs_eval() {
        let tree = Tree::new(SearchConfig::single_threaded(), Position::starting()).unwrap();
        let mut pending = PendingTranspositions::new();
        let outcome = LeafSelector::select_one(&tree, 0, &mut pending).unwrap();
        assert!(matches!(outcome, SelectOutcome::NeedsEval { leaf, .. } if leaf == tree.root()));
    }

    /// S4 (spec.md §8): a `SingleNodeDeferredCopy` link grants a fixed
    /// number of free backups sampled from the transposition root before
    /// forcing a permanent copy and clearing the link.
    #[test]
    fn s4_deferred_transposition_link_exhausts_after_fixed_budget() {
        let mut config = SearchConfig::single_threaded();
        config.transposition_mode = TranspositionMode::SingleNodeDeferredCopy;
        config.max_transposition_root_applications_fixed = 3;
        config.max_transposition_root_applications_fraction = 0.0;
        let tree = Tree::new(config, Position::starting()).unwrap();

        // A stand-in "transposition root": an already-searched, nonterminal,
        // evaluated node elsewhere in the tree.
        let root_stand_in = tree.store.allocate_children(tree.root(), &[99]).unwrap();
        tree.store.get(root_stand_in).apply_backup(0, 1, 0.3, 0.1, 10.0);
        tree.store.get(root_stand_in).set_evaluation(0.3, 0.6, 0.1, 10.0);
        tree.store.get(root_stand_in).set_policy(vec![(1, 1.0)]);

        let leaf = tree.store.allocate_children(tree.root(), &[77]).unwrap();
        assert!(try_link_transposition(&tree, leaf, root_stand_in));
        assert_eq!(tree.store.get(leaf).pending_transposition_extractions(), 3);

        for _ in 0..2 {
            let _ = transposed_value(&tree, leaf, root_stand_in);
            assert!(
                !tree.store.get(leaf).transposition_root_index().is_none(),
                "link must survive within the configured budget"
            );
        }
        let _ = transposed_value(&tree, leaf, root_stand_in);
        assert!(
            tree.store.get(leaf).transposition_root_index().is_none(),
            "the 3rd free backup must exhaust the budget and force a copy"
        );
    }
}
