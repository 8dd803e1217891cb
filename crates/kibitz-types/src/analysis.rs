//! Analysis requests and the evaluation state derived from backend output.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    board::{Side, Square},
    game::GameOutcome,
    telemetry::EngineMetrics,
    variant::GameVariant,
};

/// Tag attached to every record parsed for a request, used to drop output
/// from superseded searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: RequestId,
    /// Resolved position text; two requests with the same fingerprint
    /// describe the same position.
    pub fingerprint: String,
    pub fen: String,
    /// Starting position the move list applies to, when a history is known.
    pub start_fen: Option<String>,
    pub moves: Vec<String>,
    pub mover: Side,
    pub time_ms: u64,
    pub multipv: usize,
    pub variant: GameVariant,
}

impl AnalysisRequest {
    /// Position to hand to the backend: the starting position when moves
    /// follow, else the resolved position itself.
    pub fn position_fen(&self) -> &str {
        match (&self.start_fen, self.moves.is_empty()) {
            (Some(start), false) => start,
            _ => &self.fen,
        }
    }

    /// Space separated move list, `None` when the position is sent bare.
    pub fn moves_text(&self) -> Option<String> {
        if self.start_fen.is_none() || self.moves.is_empty() {
            None
        } else {
            Some(self.moves.join(" "))
        }
    }
}

/// Evaluation of one line, already multiplied by the mover's sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Score {
    #[serde(rename = "cp")]
    Centipawns(i32),
    Mate(i32),
}

impl Score {
    /// Applies the `+1` / `-1` side multiplier, saturating at the `i32` bounds.
    pub fn normalized(self, mover: Side) -> Self {
        match self {
            Score::Centipawns(value) => Score::Centipawns(value.saturating_mul(mover.sign())),
            Score::Mate(value) => Score::Mate(value.saturating_mul(mover.sign())),
        }
    }

    pub fn is_mate(&self) -> bool {
        matches!(self, Score::Mate(_))
    }

    pub fn mate(&self) -> Option<i32> {
        match self {
            Score::Mate(value) => Some(*value),
            Score::Centipawns(_) => None,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Centipawns(cp) => write!(f, "{:+.2}", f64::from(*cp) / 100.0),
            Score::Mate(moves) => write!(f, "#{moves}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationLine {
    /// 1-based multi-PV index.
    pub index: usize,
    pub score: Score,
    pub pv: Vec<String>,
    pub depth: u32,
}

impl EvaluationLine {
    pub fn first_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }

    /// Expected reply to the first move.
    pub fn reply(&self) -> Option<&str> {
        self.pv.get(1).map(String::as_str)
    }
}

/// Live evaluation state of the current request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    pub request: Option<RequestId>,
    pub fingerprint: String,
    pub mover: Side,
    pub lines: Vec<Option<EvaluationLine>>,
    pub populated: usize,
    pub best_move: Option<String>,
    pub threat: Option<String>,
    pub terminal: bool,
    pub outcome: Option<GameOutcome>,
    pub metrics: EngineMetrics,
}

impl EvaluationSnapshot {
    pub fn empty(width: usize) -> Self {
        Self {
            request: None,
            fingerprint: String::new(),
            mover: Side::White,
            lines: vec![None; width],
            populated: 0,
            best_move: None,
            threat: None,
            terminal: false,
            outcome: None,
            metrics: EngineMetrics::default(),
        }
    }

    pub fn for_request(request: &AnalysisRequest) -> Self {
        Self {
            request: Some(request.id),
            fingerprint: request.fingerprint.clone(),
            mover: request.mover,
            ..Self::empty(request.multipv)
        }
    }

    pub fn width(&self) -> usize {
        self.lines.len()
    }

    pub fn best_line(&self) -> Option<&EvaluationLine> {
        self.lines.first().and_then(Option::as_ref)
    }

    pub fn reset_lines(&mut self) {
        let width = self.lines.len();
        self.lines = vec![None; width];
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTag {
    Best,
    Good,
    Okay,
    Blunder,
}

/// Classifier output for one candidate move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveAnnotation {
    pub mv: String,
    pub index: usize,
    pub quality: QualityTag,
    /// Pawns lost relative to the best line, from the mover's point of view.
    pub loss: f64,
    pub weight: f64,
    /// Heatmap cell of the move.
    pub destination: Option<Square>,
    pub visible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(moves: Vec<&str>, start: Option<&str>) -> AnalysisRequest {
        AnalysisRequest {
            id: RequestId::new(),
            fingerprint: "fp".into(),
            fen: "resolved".into(),
            start_fen: start.map(str::to_string),
            moves: moves.into_iter().map(str::to_string).collect(),
            mover: Side::White,
            time_ms: 1000,
            multipv: 2,
            variant: GameVariant::Chess,
        }
    }

    #[test]
    fn normalization_follows_mover() {
        assert_eq!(
            Score::Centipawns(120).normalized(Side::Black),
            Score::Centipawns(-120)
        );
        assert_eq!(
            Score::Centipawns(120).normalized(Side::White),
            Score::Centipawns(120)
        );
        assert_eq!(Score::Mate(3).normalized(Side::Black), Score::Mate(-3));
    }

    #[test]
    fn position_uses_start_only_with_moves() {
        let with_moves = request(vec!["e2e4", "e7e5"], Some("start"));
        assert_eq!(with_moves.position_fen(), "start");
        assert_eq!(with_moves.moves_text().as_deref(), Some("e2e4 e7e5"));

        let bare = request(vec![], Some("start"));
        assert_eq!(bare.position_fen(), "resolved");
        assert!(bare.moves_text().is_none());
    }

    #[test]
    fn snapshot_sized_to_request() {
        let req = request(vec![], None);
        let mut snapshot = EvaluationSnapshot::for_request(&req);
        assert_eq!(snapshot.width(), 2);
        assert_eq!(snapshot.request, Some(req.id));
        snapshot.lines[1] = Some(EvaluationLine {
            index: 2,
            score: Score::Centipawns(10),
            pv: vec!["e2e4".into()],
            depth: 3,
        });
        snapshot.reset_lines();
        assert_eq!(snapshot.width(), 2);
        assert!(snapshot.lines.iter().all(Option::is_none));
    }
}
