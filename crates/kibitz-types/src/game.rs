use std::fmt;

use serde::{Deserialize, Serialize};

use crate::board::{PieceKind, Side, Square};

/// Sentinel best-move values reported when the side to move has no legal move.
pub const NO_MOVE_SENTINELS: [&str; 2] = ["(none)", "none"];

pub fn is_no_move(mv: &str) -> bool {
    NO_MOVE_SENTINELS.contains(&mv)
}

/// Plain from/to move with optional promotion, parsed from coordinate notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCommand {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
}

impl MoveCommand {
    /// Parses `e2e4` / `e7e8q`. Drop moves such as `N@f3` have no source
    /// square and yield `None`.
    pub fn parse_uci(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.is_ascii() || !(4..=5).contains(&text.len()) {
            return None;
        }
        let from = Square::parse(&text[0..2])?;
        let to = Square::parse(&text[2..4])?;
        let promotion = match text[4..].chars().next() {
            Some(ch) => Some(PieceKind::from_char(ch)?),
            None => None,
        };
        Some(Self {
            from,
            to,
            promotion,
        })
    }
}

impl fmt::Display for MoveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(kind) = self.promotion {
            let ch = match kind {
                PieceKind::Knight => 'n',
                PieceKind::Bishop => 'b',
                PieceKind::Rook => 'r',
                PieceKind::Queen => 'q',
                PieceKind::Pawn => 'p',
                PieceKind::King => 'k',
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

/// What the automation boundary is asked to play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AutomationCommand {
    Move(MoveCommand),
    /// Puzzle mode: the whole remaining principal variation.
    Line(Vec<String>),
}

/// Final state reported when the backend has no move to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutcome {
    Checkmate { winner: Side },
    /// `winner` is set only for variants where running out of moves wins.
    Stalemate { winner: Option<Side> },
}

impl GameOutcome {
    pub fn winner(&self) -> Option<Side> {
        match self {
            GameOutcome::Checkmate { winner } => Some(*winner),
            GameOutcome::Stalemate { winner } => *winner,
        }
    }
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOutcome::Checkmate { winner } => write!(f, "Checkmate! {winner} wins"),
            GameOutcome::Stalemate { winner: Some(winner) } => {
                write!(f, "Stalemate! {winner} wins")
            }
            GameOutcome::Stalemate { winner: None } => f.write_str("Stalemate! Draw"),
        }
    }
}

/// Which cache tier produced a resolved position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    Direct,
    Indirect,
    Full,
}
