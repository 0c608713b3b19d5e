//! The neural-network evaluator collaborator.
//!
//! Weight loading, device placement, and tensor plumbing are explicitly out
//! of scope for the search core (spec.md §1). This crate defines only the
//! interface the search core calls through — `NnEvaluator` — plus a
//! deterministic, allocation-light mock implementation used by the search
//! core's own tests (spec.md §8's determinism law requires fixed NN
//! outputs under serial mode).
//!
//! Mirrors the shape of the teacher's external-evaluator crate
//! (`hexwar-gpu`: a `Context`-like handle, a batch-in/batch-out call, and a
//! `thiserror` error enum) without any of the GPU/device machinery, which
//! this spec does not ask for.

use chess_position::{PolicyMove, PositionEncoding};
use rand::{Rng, SeedableRng};

#[derive(Debug, thiserror::Error)]
pub enum NnError {
    #[error("evaluator batch too large: {0} positions, max {1}")]
    BatchTooLarge(usize, usize),
    #[error("evaluator backend failure: {0}")]
    BackendFailure(String),
}

/// One request to the evaluator: the encoded position plus the legal moves
/// the policy head must assign priors to. Real engines decode a dense
/// policy head output against a fixed action space; since that decode step
/// is itself NN-internal plumbing (out of scope here), requests carry the
/// legal-move list directly and evaluators return priors already mapped
/// onto it.
pub struct EvalRequest<'a> {
    pub encoding: PositionEncoding,
    pub legal_moves: &'a [PolicyMove],
}

/// Network output for one position: a scalar value, a win/draw/loss
/// distribution, an estimated moves-left, and policy priors keyed by the
/// move encoding spec.md §3 calls `move_encoding`.
#[derive(Clone, Debug)]
pub struct NnOutput {
    pub value: f32,
    pub win_p: f32,
    pub loss_p: f32,
    pub moves_left: f32,
    pub policy: Vec<(u16, f32)>,
}

/// Evaluates batches of positions. Implementations own whatever device
/// state they need; the search core only ever calls `evaluate`,
/// `max_batch_size`, and `device_breakpoints`.
pub trait NnEvaluator: Send + Sync {
    fn evaluate(&self, batch: &[EvalRequest<'_>]) -> Result<Vec<NnOutput>, NnError>;

    /// Hard cap on positions per `evaluate` call.
    fn max_batch_size(&self) -> usize;

    /// Ordered device-optimal batch sizes (spec.md §4.F breakpoint
    /// snapping). Empty if the backend has no preferred sizes.
    fn device_breakpoints(&self) -> &[usize];
}

/// A deterministic evaluator for tests: uniform policy priors, a fixed
/// value, seeded pseudo-random jitter optional. Matches spec.md §8 S2's
/// "all priors uniform, all values 0" scenario exactly when constructed
/// via [`MockEvaluator::deterministic_zero`].
pub struct MockEvaluator {
    value: f32,
    win_p: f32,
    loss_p: f32,
    moves_left: f32,
    max_batch_size: usize,
    breakpoints: Vec<usize>,
    jitter_seed: Option<u64>,
}

impl MockEvaluator {
    /// All values zero, uniform policy — spec.md §8 scenario S2.
    pub fn deterministic_zero() -> Self {
        Self {
            value: 0.0,
            win_p: 0.0,
            loss_p: 0.0,
            moves_left: 0.0,
            max_batch_size: 4096,
            breakpoints: vec![1, 8, 32, 64, 128, 256, 512],
            jitter_seed: None,
        }
    }

    pub fn with_jitter(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    pub fn with_max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n;
        self
    }
}

impl NnEvaluator for MockEvaluator {
    fn evaluate(&self, batch: &[EvalRequest<'_>]) -> Result<Vec<NnOutput>, NnError> {
        if batch.len() > self.max_batch_size {
            return Err(NnError::BatchTooLarge(batch.len(), self.max_batch_size));
        }
        let mut rng = self
            .jitter_seed
            .map(rand_chacha::ChaCha8Rng::seed_from_u64);

        Ok(batch
            .iter()
            .map(|req| {
                let n = req.legal_moves.len().max(1) as f32;
                let jitter = rng.as_mut().map(|r| r.gen_range(-0.01..0.01)).unwrap_or(0.0);
                NnOutput {
                    value: (self.value + jitter).clamp(-1.0, 1.0),
                    win_p: self.win_p,
                    loss_p: self.loss_p,
                    moves_left: self.moves_left,
                    policy: req
                        .legal_moves
                        .iter()
                        .map(|mv| (mv.encoding(), 1.0 / n))
                        .collect(),
                }
            })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn device_breakpoints(&self) -> &[usize] {
        &self.breakpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_position::Position;

    #[test]
    fn deterministic_zero_is_uniform() {
        let pos = Position::starting();
        let moves = pos.legal_moves();
        let evaluator = MockEvaluator::deterministic_zero();
        let req = EvalRequest {
            encoding: pos.encode(),
            legal_moves: &moves,
        };
        let out = evaluator.evaluate(&[req]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 0.0);
        assert_eq!(out[0].policy.len(), moves.len());
        let prior_sum: f32 = out[0].policy.iter().map(|(_, p)| p).sum();
        assert!((prior_sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn batch_over_cap_errors() {
        let pos = Position::starting();
        let moves = pos.legal_moves();
        let evaluator = MockEvaluator::deterministic_zero().with_max_batch_size(1);
        let reqs: Vec<_> = (0..2)
            .map(|_| EvalRequest {
                encoding: pos.encode(),
                legal_moves: &moves,
            })
            .collect();
        assert!(evaluator.evaluate(&reqs).is_err());
    }
}
