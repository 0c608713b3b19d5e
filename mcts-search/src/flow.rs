//! The overlapped search flow (spec.md §4.G): two logical selectors take
//! turns filling a batch while the *previous* batch's NN call runs
//! concurrently. The only two suspension points are "wait for the prior
//! batch's NN call" and, once stopping, "wait for the final one" — at
//! most one NN task is ever in flight, matching spec.md §8's overlap
//! invariant.

use crate::batch::BatchSizer;
use crate::error::{SearchError, SearchResult};
use crate::node::NodeIndex;
use crate::selection::{LeafSelector, PathStep, SelectOutcome, SelectedNodesSet};
use crate::transposition::PendingTranspositions;
use crate::tree::Tree;
use chess_position::PolicyMove;
use nn_eval::{EvalRequest, NnEvaluator, NnOutput};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    NodeBudget,
    TimeBudget,
    ForcedMove,
    Cancelled,
    /// The arena ran out of room for new nodes (spec.md §7: terminate the
    /// search and return best-so-far rather than surfacing an error to the
    /// caller).
    ArenaExhausted,
}

#[derive(Debug)]
pub struct SearchOutcome {
    pub stop_reason: StopReason,
    pub nodes_evaluated: u32,
    pub best_move: Option<u16>,
    /// `starting_batch_seq` plus the number of batches this call ran, so a
    /// caller resuming the same tree across several `process_direct_overlapped`
    /// calls can keep batch numbering continuous (spec.md §6).
    pub ending_batch_seq: u64,
}

/// Everything needed to run a leaf's NN call without borrowing the tree
/// across the `spawn_blocking` boundary.
struct OwnedLeaf {
    leaf: NodeIndex,
    path: Vec<PathStep>,
    encoding: chess_position::PositionEncoding,
    legal_moves: Vec<PolicyMove>,
}

type NnTask = tokio::task::JoinHandle<Result<(Vec<OwnedLeaf>, Vec<NnOutput>), nn_eval::NnError>>;

pub struct SearchFlow;

impl SearchFlow {
    pub async fn process_direct_overlapped(
        tree: &Tree,
        evaluator: Arc<dyn NnEvaluator>,
        hard_node_limit: u32,
        starting_batch_seq: u64,
        forced_batch_size: Option<u32>,
        deadline: Option<Instant>,
    ) -> SearchResult<SearchOutcome> {
        // spec.md §8 boundary: a zero node budget still runs exactly one
        // evaluation rather than returning with none performed.
        let hard_node_limit = hard_node_limit.max(1);

        if tree.store.get(tree.root()).policy().is_none() {
            return Err(SearchError::InternalInvariantViolation(
                "root must be evaluated before search starts".into(),
            ));
        }
        if tree.store.get(tree.root()).num_policy_moves() == 1 {
            return Ok(SearchOutcome {
                stop_reason: StopReason::ForcedMove,
                nodes_evaluated: 0,
                best_move: Some(tree.store.get(tree.root()).policy().unwrap()[0].move_encoding),
                ending_batch_seq: starting_batch_seq,
            });
        }

        let mut pending: Option<NnTask> = None;
        let mut nodes_evaluated: u32 = 0;
        let mut stop_reason = StopReason::NodeBudget;
        let mut batch_seq = starting_batch_seq;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    stop_reason = StopReason::TimeBudget;
                    break;
                }
            }
            if nodes_evaluated >= hard_node_limit {
                break;
            }

            let remaining = hard_node_limit - nodes_evaluated;
            let target = match forced_batch_size {
                Some(forced) => forced.min(remaining).max(1),
                None => BatchSizer::target_size(&tree.config, nodes_evaluated, remaining),
            };
            let (owned_leaves, arena_exhausted) = Self::select_batch(tree, target)?;

            // spec.md §8 boundary: the first batch (root still unvisited)
            // must never overlap, regardless of `flow_direct_overlapped` —
            // there is no prior batch yet for it to meaningfully run
            // alongside, and PUCT needs the root's real visit count before
            // double-buffering is safe to reason about.
            let overlap = tree.config.flow_direct_overlapped && tree.store.get(tree.root()).n() > 0;

            if overlap {
                // Suspension point 1: the *previous* batch's NN call, if any.
                if let Some(task) = pending.take() {
                    let (leaves, outputs) = Self::await_task(task).await?;
                    Self::apply_batch(tree, leaves, outputs);
                }
                if !owned_leaves.is_empty() {
                    nodes_evaluated += owned_leaves.len() as u32;
                    pending = Some(Self::spawn_eval(Arc::clone(&evaluator), owned_leaves));
                } else if pending.is_none() {
                    // Nothing left to select and no NN call outstanding: the
                    // whole tree resolved via terminals/transpositions alone.
                    break;
                }
            } else {
                // Non-overlapped profile: select, evaluate, apply, in strict
                // sequence — at most one batch's worth of state is ever
                // unsettled (spec.md §8 determinism law).
                debug_assert!(pending.is_none(), "non-overlapped path must never carry a pending batch");
                if owned_leaves.is_empty() {
                    break;
                }
                nodes_evaluated += owned_leaves.len() as u32;
                let task = Self::spawn_eval(Arc::clone(&evaluator), owned_leaves);
                let (leaves, outputs) = Self::await_task(task).await?;
                Self::apply_batch(tree, leaves, outputs);
            }

            batch_seq += 1;

            if arena_exhausted {
                tracing::warn!(nodes_evaluated, "arena exhausted, stopping search gracefully");
                stop_reason = StopReason::ArenaExhausted;
                break;
            }
        }

        // Suspension point 2: drain the final outstanding batch.
        if let Some(task) = pending.take() {
            let (leaves, outputs) = Self::await_task(task).await?;
            Self::apply_batch(tree, leaves, outputs);
        }

        Ok(SearchOutcome {
            stop_reason,
            nodes_evaluated,
            best_move: tree.most_visited_move(),
            ending_batch_seq: batch_seq,
        })
    }

    fn spawn_eval(evaluator: Arc<dyn NnEvaluator>, owned_leaves: Vec<OwnedLeaf>) -> NnTask {
        tokio::task::spawn_blocking(move || {
            let requests: Vec<EvalRequest<'_>> = owned_leaves
                .iter()
                .map(|l| EvalRequest {
                    encoding: l.encoding.clone(),
                    legal_moves: l.legal_moves.as_slice(),
                })
                .collect();
            let outputs = evaluator.evaluate(&requests)?;
            Ok((owned_leaves, outputs))
        })
    }

    async fn await_task(task: NnTask) -> SearchResult<(Vec<OwnedLeaf>, Vec<NnOutput>)> {
        Ok(task
            .await
            .map_err(|e| SearchError::InternalInvariantViolation(e.to_string()))??)
    }

    /// One batch's worth of leaf selection: alternates between the two
    /// selector ids (spec.md §4.D `selector_id`) so virtual loss is
    /// tracked separately per overlapping phase. Returns the collected
    /// leaves plus whether the arena ran out of room mid-collection
    /// (spec.md §7: a graceful stop, not a hard error).
    ///
    /// When `flow_split_selects` is set, collection runs in up to two
    /// passes (spec.md §4.F/§4.G): 60% of `target` first, topped up with
    /// the rest only if that first pass's yield — NN-bound leaves over
    /// descents attempted — was at least two-thirds. A tree that is mostly
    /// resolving via terminals/transpositions (e.g. a forced mate PUCT has
    /// already converged on) isn't worth a second pass's latency.
    fn select_batch(tree: &Tree, target: u32) -> SearchResult<(Vec<OwnedLeaf>, bool)> {
        let mut set = SelectedNodesSet::new();
        let mut pending = PendingTranspositions::new();

        let arena_exhausted = if tree.config.flow_split_selects {
            let (first_target, second_target) = BatchSizer::split_collection(target);
            let (first_yield, exhausted) = Self::collect_pass(tree, first_target, &mut set, &mut pending)?;
            if !exhausted && second_target > 0 && BatchSizer::should_collect_second_pass(first_yield, first_target) {
                Self::collect_pass(tree, second_target, &mut set, &mut pending)?.1
            } else {
                exhausted
            }
        } else {
            Self::collect_pass(tree, target, &mut set, &mut pending)?.1
        };
        pending.flush(&tree.transposition);

        let leaves = set
            .needs_eval
            .into_iter()
            .map(|(leaf, path)| {
                let position = tree.position(leaf);
                OwnedLeaf {
                    leaf,
                    encoding: position.encode(),
                    legal_moves: position.legal_moves(),
                    path,
                }
            })
            .collect();
        Ok((leaves, arena_exhausted))
    }

    /// Runs up to `attempts_target` root-to-leaf descents, feeding NN-bound
    /// outcomes into `set`. The loop bounds on *descents attempted*, not on
    /// leaves collected: once PUCT has converged on an already-resolved
    /// node (e.g. a forced mate), every further descent just re-visits it
    /// and resolves for free, so bounding on collected leaves alone would
    /// let a single batch spin indefinitely. Returns the number of descents
    /// that actually needed an NN call (this pass's yield numerator) and
    /// whether the arena ran out of room.
    fn collect_pass(
        tree: &Tree,
        attempts_target: u32,
        set: &mut SelectedNodesSet,
        pending: &mut PendingTranspositions,
    ) -> SearchResult<(usize, bool)> {
        let selector_ids: [u8; 2] = if tree.config.flow_dual_selectors {
            [0, 1]
        } else {
            [0, 0]
        };

        let mut attempts = 0u32;
        let mut yielded = 0usize;
        let mut arena_exhausted = false;
        while attempts < attempts_target {
            let selector_id = selector_ids[attempts as usize % selector_ids.len()];
            match LeafSelector::select_one(tree, selector_id, pending) {
                Ok(SelectOutcome::Resolved) => {}
                Ok(outcome @ SelectOutcome::NeedsEval { .. }) => {
                    set.add_selected(outcome);
                    yielded += 1;
                }
                Err(SearchError::ArenaExhausted { .. }) => {
                    arena_exhausted = true;
                    break;
                }
                Err(other) => return Err(other),
            }
            attempts += 1;
            if tree.store.get(tree.root()).n() + set.len() as u32 > tree.store.capacity() {
                arena_exhausted = true;
                break;
            }
        }
        Ok((yielded, arena_exhausted))
    }

    fn apply_batch(tree: &Tree, leaves: Vec<OwnedLeaf>, outputs: Vec<NnOutput>) {
        for (leaf, output) in leaves.into_iter().zip(outputs) {
            let node = tree.store.get(leaf.leaf);
            if !node.is_evaluated() {
                node.set_evaluation(output.value, output.win_p, output.loss_p, output.moves_left);
                node.set_policy(output.policy);
            }
            tree.backup_path(&leaf.path, 1, node.v(), output.win_p.min(1.0 - output.loss_p).max(0.0), output.moves_left);
        }
    }

    /// Convenience wall-clock deadline, in case a caller just wants "stop
    /// after N milliseconds" rather than an absolute `Instant`.
    pub fn deadline_after(budget: Duration) -> Instant {
        Instant::now() + budget
    }
}
