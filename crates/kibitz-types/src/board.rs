use std::fmt;

use serde::{Deserialize, Serialize};

/// The two players. `White` owns even plies and is the "first player" for
/// score normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// Multiplier applied to raw engine scores: +1 for the first player,
    /// -1 otherwise.
    pub fn sign(self) -> i32 {
        match self {
            Side::White => 1,
            Side::Black => -1,
        }
    }

    /// Parses the side-to-move field of a FEN (`w` / `b`).
    pub fn from_fen_char(ch: char) -> Option<Self> {
        match ch {
            'w' => Some(Side::White),
            'b' => Some(Side::Black),
            _ => None,
        }
    }

    /// Reads the side to move from a full FEN-like string.
    pub fn from_fen(fen: &str) -> Option<Self> {
        fen.split_whitespace()
            .nth(1)
            .and_then(|field| field.chars().next())
            .and_then(Self::from_fen_char)
    }

    /// Board orientation as reported by host pages (`white` / `black`).
    pub fn from_orientation(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "white" | "w" => Some(Side::White),
            "black" | "b" => Some(Side::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => f.write_str("White"),
            Side::Black => f.write_str("Black"),
        }
    }
}

/// Piece kind in standard chess and its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    pub fn from_char(ch: char) -> Option<Self> {
        match ch.to_ascii_lowercase() {
            'p' => Some(PieceKind::Pawn),
            'n' => Some(PieceKind::Knight),
            'b' => Some(PieceKind::Bishop),
            'r' => Some(PieceKind::Rook),
            'q' => Some(PieceKind::Queen),
            'k' => Some(PieceKind::King),
            _ => None,
        }
    }
}

/// Board coordinate (0-indexed, file a = 0, rank 1 = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Square {
    pub file: u8,
    pub rank: u8,
}

impl Square {
    pub const BOARD_SIZE: u8 = 8;

    pub fn new(file: u8, rank: u8) -> Option<Self> {
        if file < Self::BOARD_SIZE && rank < Self::BOARD_SIZE {
            Some(Self { file, rank })
        } else {
            None
        }
    }

    /// Parses algebraic coordinates such as `e4`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let file = chars.next()?;
        let rank = chars.next()?;
        if chars.next().is_some() || !file.is_ascii_lowercase() || !rank.is_ascii_digit() {
            return None;
        }
        let file = (file as u8).checked_sub(b'a')?;
        let rank = (rank as u8).checked_sub(b'1')?;
        Self::new(file, rank)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, self.rank + 1)
    }
}

/// Piece with its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub owner: Side,
    pub kind: PieceKind,
}
