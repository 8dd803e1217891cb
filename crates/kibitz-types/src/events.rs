use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    analysis::{EvaluationSnapshot, MoveAnnotation, RequestId},
    board::Side,
    game::{AutomationCommand, GameOutcome, ResolutionTier},
    telemetry::LatencySample,
};

/// Kinds of message published by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Position,
    Evaluation,
    BestMove,
    Threat,
    GameOver,
    Automation,
}

/// Immutable event envelope for logging and visualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Lifecycle(LifecycleEvent),
    Position(PositionEvent),
    Evaluation(EvaluationEvent),
    BestMove(BestMoveEvent),
    Threat(ThreatEvent),
    GameOver(GameOutcome),
    Automation(AutomationEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub phase: LifecyclePhase,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecyclePhase {
    Boot,
    Ready,
    BackendUnavailable,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub request: RequestId,
    pub fen: String,
    pub mover: Side,
    pub site: String,
    pub tier: ResolutionTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationEvent {
    pub snapshot: EvaluationSnapshot,
    pub annotations: Vec<MoveAnnotation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestMoveEvent {
    pub request: RequestId,
    pub mover: Side,
    pub best_move: String,
    pub threat: Option<String>,
    /// False for the progressive per-depth updates.
    pub terminal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    /// Side expected to play the threat.
    pub by: Side,
    pub mv: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub command: AutomationCommand,
    pub delay_ms: u64,
    pub status: AutomationStatus,
    pub latency: Option<LatencySample>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AutomationStatus {
    Scheduled,
    Executed,
    Canceled,
    Failed,
}

impl SessionEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn lifecycle(phase: LifecyclePhase, details: Option<String>) -> Self {
        Self::new(
            EventKind::Lifecycle,
            EventPayload::Lifecycle(LifecycleEvent { phase, details }),
        )
    }
}
