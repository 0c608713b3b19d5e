//! The concurrent, NN-guided MCTS search core.
//!
//! `chess-position` supplies the rules, `nn-eval` supplies the evaluator
//! collaborator; this crate owns the tree, the leaf-selection/backup
//! machinery, and the overlapped batch loop that hides NN latency behind
//! the next batch's selection (spec.md §4.G).

pub mod batch;
pub mod config;
pub mod error;
pub mod flow;
pub mod node;
pub mod selection;
pub mod store;
pub mod transposition;
pub mod tree;

pub use config::{SearchConfig, TranspositionMode};
pub use error::{SearchError, SearchResult};
pub use flow::{SearchFlow, SearchOutcome, StopReason};
pub use node::NodeIndex;
pub use tree::Tree;

use chess_position::Position;
use nn_eval::{EvalRequest, NnEvaluator};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The search core's single entry point: builds a tree over `position`,
/// evaluates the root synchronously (every selector needs the root's
/// policy before it can descend), then runs the overlapped batch loop.
pub struct Search {
    tree: Tree,
    evaluator: Arc<dyn NnEvaluator>,
}

impl Search {
    pub fn new(config: SearchConfig, position: Position, evaluator: Arc<dyn NnEvaluator>) -> SearchResult<Self> {
        let tree = Tree::new(config, position)?;
        let root = tree.store.get(tree.root());
        let root_position = tree.position(tree.root());
        let terminal = root_position.terminal();
        if terminal.is_terminal() {
            tree.evaluate_terminal(tree.root(), terminal);
        } else {
            let moves = root_position.legal_moves();
            let encoding = root_position.encode();
            let request = EvalRequest {
                encoding,
                legal_moves: &moves,
            };
            let mut outputs = evaluator.evaluate(&[request])?;
            let output = outputs.remove(0);
            root.set_evaluation(output.value, output.win_p, output.loss_p, output.moves_left);
            root.set_policy(output.policy);
        }
        Ok(Self { tree, evaluator })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub async fn run(&self, hard_node_limit: u32, time_budget: Option<Duration>) -> SearchResult<SearchOutcome> {
        let deadline = time_budget.map(|d| Instant::now() + d);
        SearchFlow::process_direct_overlapped(&self.tree, Arc::clone(&self.evaluator), hard_node_limit, 0, None, deadline)
            .await
    }

    /// Full entry point (spec.md §6): lets a caller continue batch
    /// numbering across several calls over the same tree (`starting_batch_seq`)
    /// and override the sizer's batch size (`forced_batch_size`, still
    /// clipped to the remaining node budget).
    pub async fn run_with(
        &self,
        hard_node_limit: u32,
        time_budget: Option<Duration>,
        starting_batch_seq: u64,
        forced_batch_size: Option<u32>,
    ) -> SearchResult<SearchOutcome> {
        let deadline = time_budget.map(|d| Instant::now() + d);
        SearchFlow::process_direct_overlapped(
            &self.tree,
            Arc::clone(&self.evaluator),
            hard_node_limit,
            starting_batch_seq,
            forced_batch_size,
            deadline,
        )
        .await
    }
}

#[cfg(test)]
mod scenarios {
    use super::*;
    use nn_eval::MockEvaluator;

    fn search(config: SearchConfig) -> Search {
        Search::new(config, Position::starting(), Arc::new(MockEvaluator::deterministic_zero())).unwrap()
    }

    /// S1: a fresh search over the starting position must expand at least
    /// one node per selection batch and never exceed the node budget.
    #[tokio::test]
    async fn s1_fresh_search_respects_node_budget() {
        let s = search(SearchConfig::single_threaded());
        let outcome = s.run(200, None).await.unwrap();
        assert!(outcome.nodes_evaluated <= 200);
        assert!(outcome.nodes_evaluated > 0);
        assert!(outcome.best_move.is_some());
    }

    /// S2: under the deterministic-zero evaluator every prior is uniform,
    /// so PUCT has no informative signal — the search must still converge
    /// on *some* legal move deterministically run over run.
    #[tokio::test]
    async fn s2_uniform_priors_still_pick_a_legal_move() {
        let s = search(SearchConfig::single_threaded());
        let outcome = s.run(64, None).await.unwrap();
        let mv = outcome.best_move.unwrap();
        assert!(s
            .tree()
            .root_child_stats()
            .iter()
            .any(|&(_, enc, _, _)| enc == mv));
    }

    /// S3: a position one ply from checkmate (1.f3 e5 2.g4, black to move
    /// Qh4#) must resolve the mating child as terminal the instant it's
    /// selected, without an extra NN call needed to discover it.
    #[tokio::test]
    async fn s3_mate_in_one_is_terminal_without_nn_call() {
        let pos = Position::from_fen(
            "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2",
        )
        .unwrap();
        let search = Search::new(
            SearchConfig::single_threaded(),
            pos,
            Arc::new(MockEvaluator::deterministic_zero()),
        )
        .unwrap();
        let outcome = search.run(64, None).await.unwrap();
        assert!(outcome.nodes_evaluated > 0);

        // d8h4: from=59 (d8), to=31 (h4), no promotion.
        let qh4_encoding: u16 = (59 << 9) | (31 << 3);
        let tree = search.tree();
        let root = tree.store.get(tree.root());
        let policy = root.policy().unwrap();
        let slot = policy
            .iter()
            .position(|e| e.move_encoding == qh4_encoding)
            .expect("Qh4 must be a legal root move");
        let child = policy[slot].child_index();
        assert!(!child.is_none(), "Qh4 must have been expanded");
        let child_node = tree.store.get(child);
        assert_eq!(child_node.terminal(), chess_position::Terminal::CheckmateWin);

        // `CheckmateWin` names a win for the mover who delivered mate, i.e.
        // a loss for this node's own side to move (the mated king) — its
        // own-perspective value must be -1.0, not +1.0 (zero-sum backup
        // law, spec.md §8).
        assert_eq!(child_node.v(), -1.0);
        assert_eq!(child_node.win_p(), 0.0);
        assert_eq!(child_node.loss_p(), 1.0);

        // PUCT must steer *toward* a forced mate: the root's view of this
        // child's q (what `root_child_stats` reports) must be +1.0, and
        // selection must have revisited it at least once beyond its initial
        // discovery (once Q=1 dominates, PUCT keeps re-selecting it — each
        // revisit resolves for free and doesn't consume NN budget, so its
        // visit count can run well past `nodes_evaluated`).
        let (_, _, visits, q) = tree
            .root_child_stats()
            .into_iter()
            .find(|&(s, ..)| s == slot)
            .unwrap();
        assert_eq!(q, 1.0);
        assert!(visits > 1, "mate child must have been revisited, not just discovered once");
    }

    /// S6: a root with a single legal move is a forced move and the
    /// search must return immediately without any batches.
    #[tokio::test]
    async fn s6_single_legal_move_is_forced() {
        // A position with exactly one legal move: black king boxed in,
        // white to move with only one legal reply is hard to construct by
        // hand reliably, so instead assert the forced-move path directly
        // against a root whose policy we install with one entry.
        let tree = Tree::new(SearchConfig::single_threaded(), Position::starting()).unwrap();
        tree.store.get(tree.root()).set_policy(vec![(7, 1.0)]);
        let outcome = SearchFlow::process_direct_overlapped(
            &tree,
            Arc::new(MockEvaluator::deterministic_zero()),
            100,
            0,
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::ForcedMove);
        assert_eq!(outcome.best_move, Some(7));
    }

    /// spec.md §8 boundary: `hard_limit_num_nodes = 0` clamps to 1 rather
    /// than returning with no evaluations performed.
    #[tokio::test]
    async fn zero_node_budget_still_performs_one_evaluation() {
        let s = search(SearchConfig::single_threaded());
        let outcome = s.run(0, None).await.unwrap();
        assert_eq!(outcome.nodes_evaluated, 1);
        assert!(outcome.best_move.is_some());
    }

    /// spec.md §8 boundary: `forced_batch_size` overrides the sizer but is
    /// still clipped to the remaining node budget, never overshooting it.
    #[tokio::test]
    async fn forced_batch_size_is_clipped_to_remaining_budget() {
        let s = search(SearchConfig::single_threaded());
        let outcome = s.run_with(10, None, 0, Some(1_000)).await.unwrap();
        assert_eq!(outcome.nodes_evaluated, 10);
    }

    /// spec.md §8 boundary: the first batch, with the root still at
    /// `n == 0`, must never overlap even when `flow_direct_overlapped` is
    /// enabled — there must be no pending NN task left stranded after a
    /// single-batch run starts from a fresh tree.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlap_is_suppressed_on_the_first_batch() {
        let mut config = SearchConfig::default();
        config.max_batch_size = 4; // force multiple batches within a small budget
        let s = Search::new(
            config,
            Position::starting(),
            Arc::new(MockEvaluator::deterministic_zero()),
        )
        .unwrap();
        let outcome = s.run(4, None).await.unwrap();
        assert!(outcome.nodes_evaluated >= 4);
        assert!(outcome.best_move.is_some());
    }

    /// spec.md §8 determinism law: with `flow_direct_overlapped = false`
    /// there is only ever one selector's worth of unsettled state, so
    /// repeated runs from the same position with a fixed evaluator must
    /// produce identical per-move visit counts.
    #[tokio::test]
    async fn non_overlapped_runs_are_deterministic() {
        let run_once = || async {
            let s = search(SearchConfig::single_threaded());
            let outcome = s.run(96, None).await.unwrap();
            (outcome.best_move, s.tree().root_child_stats())
        };
        let (mv_a, stats_a) = run_once().await;
        let (mv_b, stats_b) = run_once().await;
        assert_eq!(mv_a, mv_b);
        assert_eq!(stats_a, stats_b);
    }
}
