//! Folds tagged engine records into the live evaluation snapshot.

use kibitz_engine::{
    protocol::{BestMove, InfoRecord},
    EngineRecord, TaggedRecord,
};
use kibitz_types::{
    analysis::{AnalysisRequest, EvaluationSnapshot, RequestId},
    game::GameOutcome,
    variant::GameVariant,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorEvent {
    /// A line of the snapshot changed.
    Updated,
    /// Previous depth's top line, emitted before the lines are reset.
    InterimBestMove {
        best_move: String,
        threat: Option<String>,
    },
    Terminal {
        best_move: String,
        threat: Option<String>,
    },
    GameOver(GameOutcome),
    /// Record from a superseded or finished request.
    Discarded,
}

pub struct EvaluationAggregator {
    snapshot: EvaluationSnapshot,
    phase: Phase,
    variant: GameVariant,
}

impl EvaluationAggregator {
    pub fn new(width: usize, variant: GameVariant) -> Self {
        Self {
            snapshot: EvaluationSnapshot::empty(width),
            phase: Phase::Idle,
            variant,
        }
    }

    pub fn snapshot(&self) -> &EvaluationSnapshot {
        &self.snapshot
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_request(&self) -> Option<RequestId> {
        self.snapshot.request
    }

    pub fn set_variant(&mut self, variant: GameVariant) {
        self.variant = variant;
    }

    /// Replaces the snapshot wholesale for a new request.
    pub fn begin(&mut self, request: &AnalysisRequest) {
        self.snapshot = EvaluationSnapshot::for_request(request);
        self.phase = Phase::Streaming;
    }

    pub fn apply(&mut self, tagged: TaggedRecord) -> Vec<AggregatorEvent> {
        if self.phase != Phase::Streaming || self.snapshot.request != Some(tagged.request) {
            debug!(request = %tagged.request, phase = ?self.phase, "record discarded");
            return vec![AggregatorEvent::Discarded];
        }
        match tagged.record {
            EngineRecord::Info(info) => self.apply_info(info),
            EngineRecord::BestMove(best) => self.apply_best_move(best),
        }
    }

    fn apply_info(&mut self, info: InfoRecord) -> Vec<AggregatorEvent> {
        self.snapshot.metrics = info.metrics();
        let index = info.index.max(1);
        if index > self.snapshot.width() {
            debug!(index, width = self.snapshot.width(), "line beyond requested width");
            return Vec::new();
        }

        let mut events = Vec::new();
        if index == 1 {
            let interim = self.snapshot.best_line().and_then(|line| {
                line.first_move().map(|mv| AggregatorEvent::InterimBestMove {
                    best_move: mv.to_string(),
                    threat: line.reply().map(str::to_string),
                })
            });
            events.extend(interim);
            self.snapshot.reset_lines();
        }
        let mut line = info.to_line();
        line.index = index;
        self.snapshot.lines[index - 1] = Some(line);
        self.snapshot.populated = self.snapshot.populated.max(index);
        events.push(AggregatorEvent::Updated);
        events
    }

    fn apply_best_move(&mut self, best: BestMove) -> Vec<AggregatorEvent> {
        self.phase = Phase::Terminal;
        self.snapshot.terminal = true;
        self.snapshot.threat = best.ponder.clone();

        if best.is_game_over() {
            let outcome = self.outcome();
            self.snapshot.best_move = None;
            self.snapshot.outcome = Some(outcome);
            return vec![AggregatorEvent::GameOver(outcome)];
        }
        self.snapshot.best_move = Some(best.mv.clone());
        vec![AggregatorEvent::Terminal {
            best_move: best.mv,
            threat: best.ponder,
        }]
    }

    /// The side to move has no move: mated when the top line carries a mate
    /// score, stalemated otherwise.
    fn outcome(&self) -> GameOutcome {
        let mover = self.snapshot.mover;
        let mated = self
            .snapshot
            .best_line()
            .is_some_and(|line| line.score.is_mate());
        let inverted = self.variant.inverts_loss();
        match (mated, inverted) {
            (true, false) => GameOutcome::Checkmate {
                winner: mover.opponent(),
            },
            (true, true) => GameOutcome::Checkmate { winner: mover },
            (false, false) => GameOutcome::Stalemate { winner: None },
            (false, true) => GameOutcome::Stalemate {
                winner: Some(mover),
            },
        }
    }
}
