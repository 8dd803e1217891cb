//! Envelope of the text scraped from a host page.
//!
//! Layout: three prefix characters, five meta characters, a three character
//! separator, then the body. Bodies list move or piece tokens, each ended by
//! [`MOVE_DELIMITER`].

use std::fmt;

use kibitz_types::Result;
use serde::Serialize;

use crate::position_error;

pub const MOVE_DELIMITER: &str = "*****";

const META_START: usize = 3;
const META_END: usize = 8;
const BODY_START: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceSite {
    Lichess,
    ChessCom,
    BlitzTactics,
    Unknown,
}

impl SourceSite {
    fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "li" => SourceSite::Lichess,
            "cc" => SourceSite::ChessCom,
            "bt" => SourceSite::BlitzTactics,
            _ => SourceSite::Unknown,
        }
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceSite::Lichess => "Lichess.org",
            SourceSite::ChessCom => "Chess.com",
            SourceSite::BlitzTactics => "BlitzTactics.com",
            SourceSite::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Move history from the standard starting position.
    Moves,
    /// Move history of a variant game.
    Variant,
    /// Piece placement: side-to-move token, then `color-type-square` tokens.
    Pieces,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeEnvelope<'a> {
    pub site: SourceSite,
    pub kind: PageKind,
    pub body: &'a str,
}

pub fn parse_envelope(raw: &str) -> Result<ScrapeEnvelope<'_>> {
    let (Some(meta), Some(body)) = (raw.get(META_START..META_END), raw.get(BODY_START..)) else {
        return Err(position_error(format!(
            "scraped text too short ({} bytes)",
            raw.len()
        )));
    };
    let site = SourceSite::from_prefix(meta.get(..2).unwrap_or_default());
    let kind = if meta.contains("var") {
        PageKind::Variant
    } else if meta.contains("puz") {
        PageKind::Pieces
    } else {
        PageKind::Moves
    };
    Ok(ScrapeEnvelope { site, kind, body })
}

/// Tokens of a body; text after the last delimiter is not a complete token.
pub fn split_tokens(body: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = body.split(MOVE_DELIMITER).collect();
    tokens.pop();
    tokens
}

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '+' | '=' | '#')
}

/// Splits `key` into the key without its trailing move token and that
/// token. `None` when the key does not end in a delimited token.
pub fn strip_last_move(key: &str) -> Option<(&str, &str)> {
    let unterminated = key.trim_end_matches('*');
    if unterminated.len() == key.len() {
        return None;
    }
    let start = unterminated
        .char_indices()
        .rev()
        .take_while(|(_, ch)| is_token_char(*ch))
        .last()
        .map(|(index, _)| index)?;
    Some((&key[..start], &unterminated[start..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_fields() {
        let envelope = parse_envelope("xx:livar***e4*****").expect("envelope");
        assert_eq!(envelope.site, SourceSite::Lichess);
        assert_eq!(envelope.kind, PageKind::Variant);
        assert_eq!(envelope.body, "e4*****");

        let envelope = parse_envelope("xx:ccpuz***w*****").expect("envelope");
        assert_eq!(envelope.site, SourceSite::ChessCom);
        assert_eq!(envelope.kind, PageKind::Pieces);

        let envelope = parse_envelope("xx:btgam***").expect("envelope");
        assert_eq!(envelope.site, SourceSite::BlitzTactics);
        assert_eq!(envelope.kind, PageKind::Moves);
        assert_eq!(envelope.body, "");

        assert!(parse_envelope("xx:li").is_err());
    }

    #[test]
    fn trailing_fragment_is_not_a_token() {
        assert_eq!(split_tokens("e4*****e5*****"), vec!["e4", "e5"]);
        assert_eq!(split_tokens("e4*****Nf"), vec!["e4"]);
        assert!(split_tokens("").is_empty());
    }

    #[test]
    fn last_move_is_stripped() {
        assert_eq!(
            strip_last_move("e4*****e5*****Nf3*****"),
            Some(("e4*****e5*****", "Nf3"))
        );
        assert_eq!(strip_last_move("e8=Q+*****"), Some(("", "e8=Q+")));
        assert_eq!(strip_last_move("O-O*****"), Some(("", "O-O")));
        assert_eq!(strip_last_move("e4*****e5"), None);
        assert_eq!(strip_last_move("*****"), None);
    }
}
