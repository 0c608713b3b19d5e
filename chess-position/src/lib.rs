//! Chess-rules collaborator for the search core.
//!
//! Move generation, check detection, Zobrist hashing, and position encoding
//! are delegated entirely to `shakmaty`. This crate exists only to narrow
//! that general-purpose chess library down to the exact interface the
//! search core consumes: legal moves with stable policy-slot encodings,
//! terminal detection, a 64-bit Zobrist hash, and an opaque tensor-ready
//! position encoding. The rules themselves are out of scope for this
//! crate — it is a thin adapter, not a chess engine.

use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move as ShakmatyMove, Outcome, Position as _};

/// Terminal classification of a position, per spec.md §3 `NodeRecord::terminal`.
///
/// Perspective is the mover who reached this position (spec.md §8 S3:
/// "the mating move's child becomes terminal=WinForMover"), not the side
/// to move at this position — a checkmated position is always a *win*
/// for whoever just delivered it.
///
/// Tablebase variants are reserved for an external oracle (spec.md §1
/// Non-goals: tablebase probing is invoked only via an opaque oracle) and
/// are never produced by this crate on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    NonTerminal,
    CheckmateWin,
    CheckmateLoss,
    Stalemate,
    TablebaseDraw,
    TablebaseWin,
    TablebaseLoss,
}

impl Terminal {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Terminal::NonTerminal)
    }
}

/// A legal move paired with the stable encoding the policy head reports
/// priors against. The encoding is a packed `(from, to, promotion)` that
/// survives node-to-node comparisons without re-running move generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyMove {
    pub encoding: u16,
    mv: ShakmatyMove,
}

impl PolicyMove {
    pub fn encoding(&self) -> u16 {
        self.encoding
    }
}

fn encode_move(mv: &ShakmatyMove) -> u16 {
    let from = mv.from().map(|s| s as u16).unwrap_or(64);
    let to = mv.to() as u16;
    let promo = mv.promotion().map(|r| r as u16 + 1).unwrap_or(0);
    (from << 9) | ((to & 0x3f) << 3) | (promo & 0x7)
}

/// A chess position, wrapping `shakmaty::Chess`.
#[derive(Clone, Debug)]
pub struct Position {
    inner: Chess,
}

#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
}

impl Position {
    pub fn starting() -> Self {
        Self {
            inner: Chess::default(),
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let setup: shakmaty::fen::Fen = fen
            .parse()
            .map_err(|_| PositionError::InvalidFen(fen.to_string()))?;
        let inner = setup
            .into_position(CastlingMode::Standard)
            .map_err(|_| PositionError::InvalidFen(fen.to_string()))?;
        Ok(Self { inner })
    }

    /// Legal moves, each tagged with a stable policy encoding. Order is
    /// deterministic (shakmaty's generation order) so two runs over the
    /// same position produce the same `num_policy_moves` ordering, which
    /// spec.md §8's determinism law relies on.
    pub fn legal_moves(&self) -> Vec<PolicyMove> {
        self.inner
            .legal_moves()
            .into_iter()
            .map(|mv| PolicyMove {
                encoding: encode_move(&mv),
                mv,
            })
            .collect()
    }

    pub fn apply(&self, mv: &PolicyMove) -> Position {
        let mut next = self.inner.clone();
        next.play_unchecked(&mv.mv);
        Position { inner: next }
    }

    /// White-to-move flag; the search core flips reward sign on this.
    pub fn white_to_move(&self) -> bool {
        self.inner.turn().is_white()
    }

    pub fn terminal(&self) -> Terminal {
        match self.inner.outcome() {
            Some(Outcome::Draw) => Terminal::Stalemate,
            Some(Outcome::Decisive { .. }) => {
                // Reaching a decisive outcome means the side to move has no
                // legal moves and is in check: a win for whoever just
                // moved into this position (spec.md §8 S3: the mating
                // move's child is `WinForMover`), independent of which
                // color that was.
                Terminal::CheckmateWin
            }
            None => Terminal::NonTerminal,
        }
    }

    pub fn zobrist_hash(&self) -> u64 {
        let z: Zobrist64 = self.inner.zobrist_hash(EnPassantMode::Legal);
        z.0
    }

    /// Opaque, fixed-size tensor-ready encoding (12 piece planes x 64
    /// squares, flattened). What the NN evaluator does with these bytes
    /// is out of scope for this spec; this crate only guarantees a stable
    /// shape and a deterministic mapping from position to bytes.
    pub fn encode(&self) -> PositionEncoding {
        let board = self.inner.board();
        let mut planes = [0u8; 12 * 64];
        for (sq, piece) in board.clone().into_iter() {
            let color_offset = if piece.color.is_white() { 0 } else { 6 };
            let role_index = piece.role as usize - 1;
            planes[(color_offset + role_index) * 64 + sq as usize] = 1;
        }
        PositionEncoding(planes)
    }

    pub fn to_fen(&self) -> String {
        shakmaty::fen::Fen::from_position(self.inner.clone(), EnPassantMode::Legal).to_string()
    }
}

/// Fixed-shape byte encoding of a position, ready to be batched into an
/// NN evaluator call. The NN evaluator itself (weights, tensors, device
/// placement) is out of scope per spec.md §1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionEncoding(pub [u8; 12 * 64]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_position_has_twenty_moves() {
        let pos = Position::starting();
        assert_eq!(pos.legal_moves().len(), 20);
        assert_eq!(pos.terminal(), Terminal::NonTerminal);
    }

    #[test]
    fn zobrist_hash_is_stable_across_clones() {
        let pos = Position::starting();
        let a = pos.zobrist_hash();
        let b = pos.clone().zobrist_hash();
        assert_eq!(a, b);
    }

    fn uci_of(mv: &PolicyMove) -> String {
        let from = mv.mv.from().map(|s| s.to_string()).unwrap_or_default();
        let to = mv.mv.to().to_string();
        let promo = mv
            .mv
            .promotion()
            .map(|r| r.char().to_string())
            .unwrap_or_default();
        format!("{from}{to}{promo}")
    }

    #[test]
    fn fools_mate_is_checkmate_for_mover() {
        // 1. f3 e5 2. g4 Qh4#
        let mut pos = Position::starting();
        for uci in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            let mv = pos
                .legal_moves()
                .into_iter()
                .find(|m| uci_of(m) == uci)
                .unwrap_or_else(|| panic!("move {uci} not legal"));
            pos = pos.apply(&mv);
        }
        assert_eq!(pos.terminal(), Terminal::CheckmateWin);
    }

    #[test]
    fn position_encoding_is_fixed_shape() {
        let pos = Position::starting();
        let enc = pos.encode();
        assert_eq!(enc.0.len(), 12 * 64);
        assert_eq!(enc.0.iter().filter(|&&b| b == 1).count(), 32);
    }
}
