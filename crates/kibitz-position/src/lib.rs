//! Position ingestion and resolution.

pub mod cache;
pub mod resolver;
pub mod scrape;

use async_trait::async_trait;
use kibitz_types::{
    board::{Piece, PieceKind, Side, Square},
    KibitzError, Result,
};
use shakmaty::{Board, Color, Role};
use tokio::sync::watch;

pub use cache::{CacheEntry, PositionCache};
pub use resolver::{PositionResolver, ResolvedPosition};

/// Raw page text plus the orientation the board is shown from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedPosition {
    pub raw: String,
    pub orientation: Side,
}

/// Host-side transport that extracts position text from a page.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Most recent scrape, if the page has produced one yet.
    async fn latest(&self) -> Result<Option<ScrapedPosition>>;
}

/// Source fed by whoever holds the paired sender.
pub struct ChannelSource {
    rx: watch::Receiver<Option<ScrapedPosition>>,
}

impl ChannelSource {
    pub fn new() -> (watch::Sender<Option<ScrapedPosition>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }
}

#[async_trait]
impl PositionSource for ChannelSource {
    async fn latest(&self) -> Result<Option<ScrapedPosition>> {
        Ok(self.rx.borrow().clone())
    }
}

/// Piece standing on `square` in the placement field of `fen`.
pub fn piece_on(fen: &str, square: Square) -> Result<Option<Piece>> {
    let placement = fen.split_whitespace().next().unwrap_or_default();
    let board = Board::from_ascii_board_fen(placement.as_bytes())
        .map_err(|err| position_error(format!("invalid board '{placement}': {err}")))?;
    let square = shakmaty::Square::from_ascii(square.to_string().as_bytes())
        .map_err(|_| position_error(format!("invalid square {square}")))?;
    Ok(board.piece_at(square).map(|piece| Piece {
        owner: match piece.color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        },
        kind: match piece.role {
            Role::Pawn => PieceKind::Pawn,
            Role::Knight => PieceKind::Knight,
            Role::Bishop => PieceKind::Bishop,
            Role::Rook => PieceKind::Rook,
            Role::Queen => PieceKind::Queen,
            Role::King => PieceKind::King,
        },
    }))
}

pub fn position_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Position(message.into())
}
