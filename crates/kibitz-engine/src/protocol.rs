//! Line parser for the streaming engine protocol.

use kibitz_types::{
    analysis::{EvaluationLine, RequestId, Score},
    board::Side,
    game::is_no_move,
    telemetry::EngineMetrics,
};
use serde::{Deserialize, Serialize};

/// Lines containing any of these carry partial search state and are dropped.
const DISCARD_MARKERS: [&str; 3] = ["lowerbound", "upperbound", "currmove"];

/// Value following an info key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Token {
    Integer(i64),
    Text(String),
}

impl Token {
    pub fn parse(raw: &str) -> Self {
        raw.parse::<i64>()
            .map(Token::Integer)
            .unwrap_or_else(|_| Token::Text(raw.to_string()))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Token::Integer(value) => Some(*value),
            Token::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoRecord {
    pub depth: u32,
    /// 1-based multi-PV index.
    pub index: usize,
    /// Already multiplied by the mover's sign.
    pub score: Score,
    pub pv: Vec<String>,
    /// Every other key/value pair in order of appearance.
    pub fields: Vec<(String, Token)>,
}

impl InfoRecord {
    pub fn field(&self, key: &str) -> Option<&Token> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, token)| token)
    }

    fn integer(&self, key: &str) -> Option<i64> {
        self.field(key).and_then(Token::as_integer)
    }

    pub fn metrics(&self) -> EngineMetrics {
        let clamp_u32 = |value: i64| u32::try_from(value.max(0)).unwrap_or(u32::MAX);
        let clamp_u64 = |value: i64| u64::try_from(value.max(0)).unwrap_or_default();
        EngineMetrics {
            depth: self.depth,
            seldepth: self.integer("seldepth").map(clamp_u32).unwrap_or_default(),
            nodes: self.integer("nodes").map(clamp_u64).unwrap_or_default(),
            nps: self.integer("nps").map(clamp_u64).unwrap_or_default(),
            hashfull: self.integer("hashfull").map(clamp_u32).unwrap_or_default(),
        }
    }

    pub fn to_line(&self) -> EvaluationLine {
        EvaluationLine {
            index: self.index,
            score: self.score,
            pv: self.pv.clone(),
            depth: self.depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestMove {
    pub mv: String,
    pub ponder: Option<String>,
}

impl BestMove {
    pub fn is_game_over(&self) -> bool {
        is_no_move(&self.mv)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Info(InfoRecord),
    BestMove(BestMove),
    Ignored,
    Malformed(String),
}

/// Record forwarded to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRecord {
    Info(InfoRecord),
    BestMove(BestMove),
}

/// Record plus the request it was parsed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRecord {
    pub request: RequestId,
    pub record: EngineRecord,
}

impl TaggedRecord {
    pub fn new(request: RequestId, record: EngineRecord) -> Self {
        Self { request, record }
    }
}

/// Parses one line of backend output. `mover` is the side to move in the
/// position being searched.
pub fn parse_line(line: &str, mover: Side) -> ParsedLine {
    let line = line.trim();
    if DISCARD_MARKERS.iter().any(|marker| line.contains(marker)) {
        return ParsedLine::Ignored;
    }
    if line.starts_with("bestmove") {
        return parse_best_move(line);
    }
    if line.starts_with("info depth") {
        return parse_info(line, mover);
    }
    ParsedLine::Ignored
}

fn parse_best_move(line: &str) -> ParsedLine {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(mv) = tokens.get(1) else {
        return ParsedLine::Malformed(format!("bestmove without a move: '{line}'"));
    };
    let ponder = tokens
        .iter()
        .position(|token| *token == "ponder")
        .and_then(|at| tokens.get(at + 1))
        .map(|token| token.to_string());
    ParsedLine::BestMove(BestMove {
        mv: mv.to_string(),
        ponder,
    })
}

fn parse_info(line: &str, mover: Side) -> ParsedLine {
    let tokens: Vec<&str> = line.split_whitespace().skip(1).collect();
    let mut fields = Vec::new();
    let mut score = None;
    let mut pv = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "score" => {
                let (Some(kind), Some(value)) = (tokens.get(i + 1), tokens.get(i + 2)) else {
                    return ParsedLine::Malformed(format!("truncated score in '{line}'"));
                };
                let Ok(value) = value.parse::<i32>() else {
                    return ParsedLine::Malformed(format!("non-numeric score '{value}'"));
                };
                score = Some(match *kind {
                    "cp" => Score::Centipawns(value),
                    "mate" => Score::Mate(value),
                    other => {
                        return ParsedLine::Malformed(format!("unknown score kind '{other}'"))
                    }
                });
                i += 3;
            }
            "pv" => {
                pv = tokens[i + 1..].iter().map(|mv| mv.to_string()).collect();
                break;
            }
            key => {
                if let Some(value) = tokens.get(i + 1) {
                    fields.push((key.to_string(), Token::parse(value)));
                }
                i += 2;
            }
        }
    }

    let Some(score) = score else {
        return ParsedLine::Malformed(format!("info line without score: '{line}'"));
    };
    let integer = |key: &str| {
        fields
            .iter()
            .find(|(name, _)| name == key)
            .and_then(|(_, token)| token.as_integer())
    };
    let Some(depth) = integer("depth").and_then(|d| u32::try_from(d).ok()) else {
        return ParsedLine::Malformed(format!("info line without depth: '{line}'"));
    };
    let index = integer("multipv")
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(1)
        .max(1);

    ParsedLine::Info(InfoRecord {
        depth,
        index,
        score: score.normalized(mover),
        pv,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(line: &str, mover: Side) -> InfoRecord {
        match parse_line(line, mover) {
            ParsedLine::Info(record) => record,
            other => panic!("expected info record, got {other:?}"),
        }
    }

    #[test]
    fn score_is_normalized_by_mover() {
        let line = "info depth 12 multipv 1 score cp 120 pv e2e4";
        assert_eq!(info(line, Side::Black).score, Score::Centipawns(-120));
        assert_eq!(info(line, Side::White).score, Score::Centipawns(120));
    }

    #[test]
    fn extreme_scores_saturate_instead_of_overflowing() {
        let record = info("info depth 1 score cp -2147483648 pv e2e4", Side::Black);
        assert_eq!(record.score, Score::Centipawns(i32::MAX));
        let record = info("info depth 1 score mate -2147483648 pv e2e4", Side::Black);
        assert_eq!(record.score, Score::Mate(i32::MAX));
    }

    #[test]
    fn full_info_line() {
        let record = info(
            "info depth 5 seldepth 7 multipv 2 score cp -35 nodes 1200 nps 50000 hashfull 3 tbhits 0 time 24 pv e7e5 g1f3 b8c6",
            Side::White,
        );
        assert_eq!(record.depth, 5);
        assert_eq!(record.index, 2);
        assert_eq!(record.score, Score::Centipawns(-35));
        assert_eq!(record.pv, vec!["e7e5", "g1f3", "b8c6"]);
        assert_eq!(record.field("time"), Some(&Token::Integer(24)));

        let metrics = record.metrics();
        assert_eq!(metrics.seldepth, 7);
        assert_eq!(metrics.nodes, 1200);
        assert_eq!(metrics.nps, 50000);
        assert_eq!(metrics.hashfull, 3);
    }

    #[test]
    fn multipv_defaults_to_first_line() {
        let record = info("info depth 3 score mate 2 pv d1h5 g7g6 h5e5", Side::White);
        assert_eq!(record.index, 1);
        assert_eq!(record.score, Score::Mate(2));
    }

    #[test]
    fn text_tokens_are_kept() {
        let record = info(
            "info depth 9 multipv 1 score cp 10 wdl text pv e2e4",
            Side::White,
        );
        assert_eq!(record.field("wdl"), Some(&Token::Text("text".into())));
    }

    #[test]
    fn mate_zero_without_pv() {
        let record = info("info depth 0 score mate 0", Side::Black);
        assert_eq!(record.score, Score::Mate(0));
        assert!(record.pv.is_empty());
    }

    #[test]
    fn bound_and_currmove_lines_are_ignored() {
        for line in [
            "info depth 10 multipv 1 score cp 15 lowerbound nodes 10 pv e2e4",
            "info depth 10 multipv 1 score cp 15 upperbound nodes 10 pv e2e4",
            "info depth 10 currmove e2e4 currmovenumber 1",
            "info string NNUE evaluation enabled",
            "readyok",
        ] {
            assert_eq!(parse_line(line, Side::White), ParsedLine::Ignored, "{line}");
        }
    }

    #[test]
    fn best_move_with_and_without_ponder() {
        assert_eq!(
            parse_line("bestmove e2e4 ponder e7e5", Side::White),
            ParsedLine::BestMove(BestMove {
                mv: "e2e4".into(),
                ponder: Some("e7e5".into()),
            })
        );
        let ParsedLine::BestMove(none) = parse_line("bestmove (none)", Side::White) else {
            panic!("expected best move");
        };
        assert!(none.is_game_over());
        assert!(none.ponder.is_none());
    }

    #[test]
    fn malformed_lines_are_reported() {
        assert!(matches!(
            parse_line("info depth 4 multipv 1 nodes 20 pv e2e4", Side::White),
            ParsedLine::Malformed(_)
        ));
        assert!(matches!(
            parse_line("info depth 4 score cp", Side::White),
            ParsedLine::Malformed(_)
        ));
        assert!(matches!(
            parse_line("bestmove", Side::White),
            ParsedLine::Malformed(_)
        ));
    }
}
