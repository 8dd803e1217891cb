//! Turns scraped text into a board state, reusing cached prefixes.

use kibitz_types::{board::Side, game::ResolutionTier, variant::GameVariant, Result};
use shakmaty::{
    fen::Fen,
    san::San,
    uci::UciMove,
    variant::{Variant, VariantPosition},
    CastlingMode, Color, EnPassantMode, Piece, Position, PositionError, Role, Setup, Square,
};
use tracing::debug;

use crate::{
    cache::{CacheEntry, PositionCache},
    position_error,
    scrape::{parse_envelope, split_tokens, strip_last_move, PageKind, SourceSite},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPosition {
    /// Cache key; also the fingerprint compared between ticks.
    pub key: String,
    pub entry: CacheEntry,
    pub tier: ResolutionTier,
    pub site: SourceSite,
}

impl ResolvedPosition {
    pub fn mover(&self) -> Option<Side> {
        self.entry.mover()
    }
}

pub struct PositionResolver {
    cache: PositionCache,
    variant: GameVariant,
}

impl PositionResolver {
    pub fn new(capacity: usize, variant: GameVariant) -> Result<Self> {
        Ok(Self {
            cache: PositionCache::new(capacity)?,
            variant,
        })
    }

    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    /// Cached positions belong to one rule set; switching drops them.
    pub fn set_variant(&mut self, variant: GameVariant) {
        if variant != self.variant {
            self.cache.clear();
            self.variant = variant;
        }
    }

    pub fn cache(&self) -> &PositionCache {
        &self.cache
    }

    pub fn resolve(&mut self, raw: &str) -> Result<ResolvedPosition> {
        let envelope = parse_envelope(raw)?;
        let (key, entry, tier) = match envelope.kind {
            PageKind::Variant if self.variant.is_chess960() => {
                self.resolve_chess960(envelope.body)?
            }
            PageKind::Variant | PageKind::Moves => self.resolve_moves(envelope.body, None)?,
            PageKind::Pieces => self.resolve_pieces(envelope.body)?,
        };
        debug!(?tier, site = %envelope.site, moves = entry.moves.len(), "position resolved");
        Ok(ResolvedPosition {
            key,
            entry,
            tier,
            site: envelope.site,
        })
    }

    fn resolve_moves(
        &mut self,
        text: &str,
        start_fen: Option<&str>,
    ) -> Result<(String, CacheEntry, ResolutionTier)> {
        let key = match start_fen {
            Some(fen) => format!("{fen}_{text}"),
            None => text.to_string(),
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok((key, hit.clone(), ResolutionTier::Direct));
        }

        let prefix_hit = strip_last_move(&key).and_then(|(prefix, token)| {
            self.cache
                .get(prefix)
                .cloned()
                .map(|hit| (hit, token.to_string()))
        });
        if let Some((hit, token)) = prefix_hit {
            match self.extend(hit, &token) {
                Ok(entry) => {
                    self.cache.insert(key.clone(), entry.clone());
                    return Ok((key, entry, ResolutionTier::Indirect));
                }
                Err(err) => debug!("incremental resolution failed, replaying: {err}"),
            }
        }

        let entry = self.replay(text, start_fen)?;
        self.cache.insert(key.clone(), entry.clone());
        Ok((key, entry, ResolutionTier::Full))
    }

    /// Applies one move to a cached entry.
    fn extend(&self, mut entry: CacheEntry, token: &str) -> Result<CacheEntry> {
        let mut position = self.load(&entry.fen)?;
        let played = play_token(&mut position, token, self.castling_mode())?;
        entry.fen = fen_of(&position);
        entry.moves.push(played);
        Ok(entry)
    }

    fn replay(&self, text: &str, start_fen: Option<&str>) -> Result<CacheEntry> {
        let mut position = match start_fen {
            Some(fen) => self.load(fen)?,
            None => VariantPosition::new(rules(self.variant)),
        };
        let start = fen_of(&position);
        let mode = self.castling_mode();
        let moves = split_tokens(text)
            .into_iter()
            .map(|token| play_token(&mut position, token, mode))
            .collect::<Result<Vec<_>>>()?;
        Ok(CacheEntry {
            fen: fen_of(&position),
            start_fen: Some(start),
            moves,
        })
    }

    /// Clears the board and places every listed piece.
    fn resolve_pieces(&mut self, text: &str) -> Result<(String, CacheEntry, ResolutionTier)> {
        if let Some(hit) = self.cache.get(text) {
            return Ok((text.to_string(), hit.clone(), ResolutionTier::Direct));
        }

        let tokens = split_tokens(text);
        let (turn, pieces) = tokens
            .split_first()
            .ok_or_else(|| position_error("placement without side to move"))?;
        let mut setup = Setup::empty();
        setup.turn = turn
            .chars()
            .next()
            .and_then(Color::from_char)
            .ok_or_else(|| position_error(format!("invalid side to move '{turn}'")))?;
        for token in pieces {
            let (square, piece) = parse_placement(token)?;
            setup.board.set_piece_at(square, piece);
        }
        let position = self.position_from(setup)?;
        let entry = CacheEntry {
            fen: fen_of(&position),
            start_fen: None,
            moves: Vec::new(),
        };
        self.cache.insert(text, entry.clone());
        Ok((text.to_string(), entry, ResolutionTier::Full))
    }

    /// Body: `<placement>&<5 chars><moves>`. The placement gives the start
    /// position with full castling rights.
    fn resolve_chess960(&mut self, body: &str) -> Result<(String, CacheEntry, ResolutionTier)> {
        let (placement, rest) = body
            .split_once('&')
            .ok_or_else(|| position_error("chess960 page without start placement"))?;
        let moves = rest.get(5..).unwrap_or_default();
        let (_, start, _) = self.resolve_pieces(placement)?;
        let start_fen = start.fen.replacen('-', "KQkq", 1);
        self.resolve_moves(moves, Some(&start_fen))
    }

    fn castling_mode(&self) -> CastlingMode {
        if self.variant.is_chess960() {
            CastlingMode::Chess960
        } else {
            CastlingMode::Standard
        }
    }

    fn load(&self, fen: &str) -> Result<VariantPosition> {
        let setup = Fen::from_ascii(fen.as_bytes())
            .map_err(|err| position_error(format!("invalid fen '{fen}': {err}")))?
            .into_setup();
        self.position_from(setup)
    }

    fn position_from(&self, setup: Setup) -> Result<VariantPosition> {
        VariantPosition::from_setup(rules(self.variant), setup, self.castling_mode())
            .or_else(PositionError::ignore_too_much_material)
            .or_else(PositionError::ignore_impossible_check)
            .map_err(|err| position_error(format!("illegal position: {err}")))
    }
}

fn rules(variant: GameVariant) -> Variant {
    match variant {
        GameVariant::Chess | GameVariant::FischerRandom => Variant::Chess,
        GameVariant::Crazyhouse => Variant::Crazyhouse,
        GameVariant::KingOfTheHill => Variant::KingOfTheHill,
        GameVariant::ThreeCheck => Variant::ThreeCheck,
        GameVariant::Antichess => Variant::Antichess,
        GameVariant::Atomic => Variant::Atomic,
        GameVariant::Horde => Variant::Horde,
        GameVariant::RacingKings => Variant::RacingKings,
    }
}

fn fen_of(position: &VariantPosition) -> String {
    Fen::from_position(position, EnPassantMode::Legal).to_string()
}

/// Plays a SAN or coordinate-notation token and returns it in coordinate
/// notation.
fn play_token(position: &mut VariantPosition, token: &str, mode: CastlingMode) -> Result<String> {
    let by_san = San::from_ascii(token.as_bytes())
        .ok()
        .and_then(|san| san.to_move(&*position).ok());
    let mv = match by_san {
        Some(mv) => mv,
        None => UciMove::from_ascii(token.as_bytes())
            .ok()
            .and_then(|uci| uci.to_move(&*position).ok())
            .ok_or_else(|| position_error(format!("illegal move '{token}'")))?,
    };
    let played = mv.to_uci(mode).to_string();
    position.play_unchecked(mv);
    Ok(played)
}

/// `color-type-square`, e.g. `w-q-d1`.
fn parse_placement(token: &str) -> Result<(Square, Piece)> {
    let invalid = || position_error(format!("invalid piece token '{token}'"));
    let mut parts = token.split('-');
    let (Some(color), Some(role), Some(square), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let color = color.chars().next().and_then(Color::from_char).ok_or_else(invalid)?;
    let role = role.chars().next().and_then(Role::from_char).ok_or_else(invalid)?;
    let square = Square::from_ascii(square.as_bytes()).map_err(|_| invalid())?;
    Ok((square, Piece { color, role }))
}
