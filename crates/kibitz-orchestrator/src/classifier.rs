//! Move quality tags and arrow weights for the populated lines.

use kibitz_types::{
    analysis::{EvaluationLine, EvaluationSnapshot, MoveAnnotation, QualityTag, Score},
    board::{Side, Square},
    game::MoveCommand,
};

pub const MAX_WEIGHT: f64 = 0.225;
pub const MIN_WEIGHT: f64 = 0.075;
const WEIGHT_SHIM: f64 = 0.0125;
/// Pinned above the normal range.
pub const BEST_WEIGHT: f64 = MAX_WEIGHT + 2.0 * WEIGHT_SHIM;

/// Pawn value standing in for a forced mate.
const MATE_PAWNS: i64 = 20;
const WINNING_PAWNS: f64 = 4.0;
const GOOD_LOSS: f64 = 0.5;
const OKAY_LOSS: f64 = 2.0;

/// Line score from the mover's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MoverScore {
    centipawns: i64,
    /// Positive when the mover mates, otherwise the mover is mated.
    mate: Option<i64>,
}

impl MoverScore {
    fn of(score: Score, mover: Side) -> Self {
        let sign = i64::from(mover.sign());
        match score {
            Score::Centipawns(cp) => Self {
                centipawns: i64::from(cp) * sign,
                mate: None,
            },
            Score::Mate(moves) => {
                let moves = i64::from(moves) * sign;
                let pawns = if moves > 0 { MATE_PAWNS } else { -MATE_PAWNS };
                Self {
                    centipawns: pawns * 100,
                    mate: Some(moves),
                }
            }
        }
    }

    fn pawns(self) -> f64 {
        self.centipawns as f64 / 100.0
    }

    fn is_mate(self) -> bool {
        self.mate.is_some()
    }

    fn mates(self) -> bool {
        self.mate.is_some_and(|moves| moves > 0)
    }

    fn is_mated(self) -> bool {
        self.mate.is_some_and(|moves| moves <= 0)
    }
}

pub fn classify(snapshot: &EvaluationSnapshot) -> Vec<MoveAnnotation> {
    let Some(best) = snapshot.best_line() else {
        return Vec::new();
    };
    let top = MoverScore::of(best.score, snapshot.mover);
    snapshot
        .lines
        .iter()
        .take(snapshot.populated)
        .enumerate()
        .filter_map(|(slot, line)| {
            let line = line.as_ref()?;
            annotate(slot, line, top, snapshot.mover)
        })
        .collect()
}

fn annotate(slot: usize, line: &EvaluationLine, top: MoverScore, mover: Side) -> Option<MoveAnnotation> {
    let mv = line.first_move()?.to_string();
    let score = MoverScore::of(line.score, mover);
    let loss = (top.centipawns - score.centipawns) as f64 / 100.0;
    let (quality, weight) = if slot == 0 {
        (QualityTag::Best, BEST_WEIGHT)
    } else {
        (quality(score, top, loss), weight(score, top))
    };
    Some(MoveAnnotation {
        destination: destination(&mv),
        mv,
        index: slot + 1,
        quality,
        loss,
        weight,
        visible: weight > 0.0,
    })
}

fn quality(score: MoverScore, top: MoverScore, loss: f64) -> QualityTag {
    if score.mates() {
        QualityTag::Good
    } else if score.is_mated() || top.is_mate() {
        QualityTag::Blunder
    } else if loss <= GOOD_LOSS {
        QualityTag::Good
    } else if loss <= OKAY_LOSS {
        QualityTag::Okay
    } else {
        QualityTag::Blunder
    }
}

/// Arrow weight for a non-best line; zero hides the arrow.
fn weight(score: MoverScore, top: MoverScore) -> f64 {
    if top.is_mate() || top.pawns() >= WINNING_PAWNS {
        if score.mates() {
            return MAX_WEIGHT - WEIGHT_SHIM;
        }
        if score.is_mated() || score.pawns() < WINNING_PAWNS {
            return 0.0;
        }
        let delta = top.pawns() - score.pawns();
        if delta <= 0.0 {
            MAX_WEIGHT - 2.0 * WEIGHT_SHIM
        } else {
            (MAX_WEIGHT - 2.0 * WEIGHT_SHIM - delta / 150.0).clamp(MIN_WEIGHT, MAX_WEIGHT)
        }
    } else {
        let delta = top.pawns() - score.pawns();
        if score.mate.is_some() || delta >= WINNING_PAWNS {
            0.0
        } else {
            (MAX_WEIGHT - delta / 15.0).clamp(MIN_WEIGHT, MAX_WEIGHT)
        }
    }
}

/// Target square of a coordinate move or a drop (`N@f3`).
fn destination(mv: &str) -> Option<Square> {
    match MoveCommand::parse_uci(mv) {
        Some(command) => Some(command.to),
        None => mv.split_once('@').and_then(|(_, to)| Square::parse(to)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(mover: Side, scores: &[Score]) -> EvaluationSnapshot {
        let moves = ["e2e4", "d2d4", "c2c4", "g1f3"];
        let mut snapshot = EvaluationSnapshot::empty(scores.len());
        snapshot.mover = mover;
        snapshot.populated = scores.len();
        for (slot, score) in scores.iter().enumerate() {
            snapshot.lines[slot] = Some(EvaluationLine {
                index: slot + 1,
                score: *score,
                pv: vec![moves[slot].to_string()],
                depth: 10,
            });
        }
        snapshot
    }

    fn second_quality(top_cp: i32, line_cp: i32) -> QualityTag {
        let annotations = classify(&snapshot(
            Side::White,
            &[Score::Centipawns(top_cp), Score::Centipawns(line_cp)],
        ));
        annotations[1].quality
    }

    #[test]
    fn loss_boundaries() {
        assert_eq!(second_quality(100, 50), QualityTag::Good);
        assert_eq!(second_quality(100, 49), QualityTag::Okay);
        assert_eq!(second_quality(250, 50), QualityTag::Okay);
        assert_eq!(second_quality(251, 50), QualityTag::Blunder);
    }

    #[test]
    fn black_scores_are_seen_from_black() {
        // Stored scores are white-relative; black is better at -150.
        let annotations = classify(&snapshot(
            Side::Black,
            &[Score::Centipawns(-150), Score::Centipawns(-20)],
        ));
        assert_eq!(annotations[0].quality, QualityTag::Best);
        assert!((annotations[1].loss - 1.3).abs() < 1e-9);
        assert_eq!(annotations[1].quality, QualityTag::Okay);
    }

    #[test]
    fn mate_tags() {
        let annotations = classify(&snapshot(
            Side::White,
            &[Score::Mate(3), Score::Mate(5), Score::Centipawns(900), Score::Mate(-2)],
        ));
        let tags: Vec<_> = annotations.iter().map(|a| a.quality).collect();
        assert_eq!(
            tags,
            vec![
                QualityTag::Best,
                QualityTag::Good,
                QualityTag::Blunder,
                QualityTag::Blunder
            ]
        );
    }

    #[test]
    fn any_mate_on_top_turns_plain_lines_into_blunders() {
        let annotations = classify(&snapshot(
            Side::White,
            &[Score::Mate(-4), Score::Centipawns(-1950)],
        ));
        assert_eq!(annotations[1].quality, QualityTag::Blunder);
        assert!(!annotations[1].visible);
    }

    #[test]
    fn weights_in_even_positions() {
        let annotations = classify(&snapshot(
            Side::White,
            &[
                Score::Centipawns(30),
                Score::Centipawns(30),
                Score::Centipawns(-120),
                Score::Centipawns(-500),
            ],
        ));
        assert_eq!(annotations[0].weight, BEST_WEIGHT);
        assert_eq!(annotations[1].weight, MAX_WEIGHT);
        assert!((annotations[2].weight - (MAX_WEIGHT - 1.5 / 15.0)).abs() < 1e-9);
        assert_eq!(annotations[3].weight, 0.0);
        assert!(!annotations[3].visible);
        assert!(annotations[2].visible);
    }

    #[test]
    fn weights_when_winning() {
        let annotations = classify(&snapshot(
            Side::White,
            &[
                Score::Centipawns(600),
                Score::Mate(4),
                Score::Centipawns(450),
                Score::Centipawns(200),
            ],
        ));
        assert_eq!(annotations[1].weight, MAX_WEIGHT - WEIGHT_SHIM);
        let expected = MAX_WEIGHT - 2.0 * WEIGHT_SHIM - 1.5 / 150.0;
        assert!((annotations[2].weight - expected).abs() < 1e-9);
        assert_eq!(annotations[3].weight, 0.0);
    }

    #[test]
    fn unpopulated_lines_are_skipped() {
        let mut snap = snapshot(Side::White, &[Score::Centipawns(10), Score::Centipawns(5)]);
        snap.lines[1] = None;
        assert_eq!(classify(&snap).len(), 1);
        assert!(classify(&EvaluationSnapshot::empty(2)).is_empty());
    }

    #[test]
    fn destinations() {
        assert_eq!(destination("e2e4"), Square::parse("e4"));
        assert_eq!(destination("N@f3"), Square::parse("f3"));
        assert_eq!(destination("junk"), None);
    }
}
