//! Decides whether to play the engine's move and runs it after a delay.

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use kibitz_controller::MoveExecutor;
use kibitz_position::piece_on;
use kibitz_types::{
    analysis::EvaluationSnapshot,
    board::Side,
    config::AutomationConfig,
    events::AutomationStatus,
    game::{AutomationCommand, MoveCommand},
    telemetry::LatencySample,
};
use rand::{seq::SliceRandom, Rng};
use tokio::{
    sync::mpsc,
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Candidate pauses before a move in human mode, picked uniformly.
pub const HUMAN_DELAYS_MS: [u64; 14] = [
    0, 500, 1_000, 1_500, 2_000, 3_000, 4_000, 5_000, 6_000, 8_000, 10_000, 12_000, 15_000, 18_000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NotTerminal,
    GameOver,
    OpponentToMove,
    NoMove,
    /// Drops have no source square to verify.
    DropMove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationDecision {
    Skip(SkipReason),
    /// The source square no longer holds the mover's piece; the evaluation
    /// finished after the position moved on.
    StaleAbort,
    Execute {
        command: AutomationCommand,
        delay_ms: u64,
    },
}

#[derive(Debug, Clone)]
pub struct AutomationReport {
    pub command: AutomationCommand,
    pub delay_ms: u64,
    pub status: AutomationStatus,
    pub latency: Option<LatencySample>,
}

pub struct AutomationController<X: MoveExecutor> {
    config: AutomationConfig,
    executor: Arc<X>,
    pending: Option<CancellationToken>,
    reports: mpsc::UnboundedSender<AutomationReport>,
}

impl<X: MoveExecutor + 'static> AutomationController<X> {
    pub fn new(
        config: AutomationConfig,
        executor: X,
        reports: mpsc::UnboundedSender<AutomationReport>,
    ) -> Self {
        Self {
            config,
            executor: Arc::new(executor),
            pending: None,
            reports,
        }
    }

    pub fn set_config(&mut self, config: AutomationConfig) {
        self.config = config;
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    pub fn decide(
        &self,
        snapshot: &EvaluationSnapshot,
        orientation: Side,
        current_fen: &str,
    ) -> AutomationDecision {
        self.decide_with(snapshot, orientation, current_fen, &mut rand::thread_rng())
    }

    pub fn decide_with<R: Rng>(
        &self,
        snapshot: &EvaluationSnapshot,
        orientation: Side,
        current_fen: &str,
        rng: &mut R,
    ) -> AutomationDecision {
        if !self.config.is_active() {
            return AutomationDecision::Skip(SkipReason::Disabled);
        }
        if !snapshot.terminal {
            return AutomationDecision::Skip(SkipReason::NotTerminal);
        }
        if snapshot.outcome.is_some() {
            return AutomationDecision::Skip(SkipReason::GameOver);
        }
        if snapshot.mover != orientation {
            return AutomationDecision::Skip(SkipReason::OpponentToMove);
        }
        let Some(best) = snapshot.best_move.as_deref() else {
            return AutomationDecision::Skip(SkipReason::NoMove);
        };
        let Some(mv) = MoveCommand::parse_uci(best) else {
            return AutomationDecision::Skip(SkipReason::DropMove);
        };

        let owner = piece_on(current_fen, mv.from)
            .ok()
            .flatten()
            .map(|piece| piece.owner);
        if owner != Some(snapshot.mover) {
            debug!(%mv, "best move is stale");
            return AutomationDecision::StaleAbort;
        }

        let command = if self.config.puzzle_mode {
            let pv = snapshot
                .best_line()
                .map(|line| line.pv.clone())
                .filter(|pv| !pv.is_empty())
                .unwrap_or_else(|| vec![best.to_string()]);
            AutomationCommand::Line(pv)
        } else {
            AutomationCommand::Move(mv)
        };
        let delay_ms = if self.config.human_mode {
            sample_delay(rng)
        } else {
            0
        };
        AutomationDecision::Execute { command, delay_ms }
    }

    /// Runs `command` after `delay_ms` unless canceled first. The outcome
    /// arrives on the reports channel.
    pub fn schedule(&mut self, command: AutomationCommand, delay_ms: u64) {
        self.cancel_pending();
        let token = CancellationToken::new();
        self.pending = Some(token.clone());
        let executor = self.executor.clone();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let scheduled = Instant::now();
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(delay_ms, "pending move canceled");
                    let _ = reports.send(AutomationReport {
                        command,
                        delay_ms,
                        status: AutomationStatus::Canceled,
                        latency: None,
                    });
                    return;
                }
                _ = sleep(Duration::from_millis(delay_ms)) => {}
            }

            let started = Instant::now();
            let status = match executor.execute(&command).await {
                Ok(()) => {
                    info!(?command, delay_ms, "move executed");
                    AutomationStatus::Executed
                }
                Err(err) => {
                    warn!("move execution failed: {err}");
                    AutomationStatus::Failed
                }
            };
            let latency = LatencySample {
                delay_ms,
                execution_ms: started.elapsed().as_millis() as u64,
                total_ms: scheduled.elapsed().as_millis() as u64,
                captured_at: Utc::now(),
            };
            let _ = reports.send(AutomationReport {
                command,
                delay_ms,
                status,
                latency: Some(latency),
            });
        });
    }

    /// Cancels a move still waiting out its delay.
    pub fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

pub fn sample_delay<R: Rng>(rng: &mut R) -> u64 {
    HUMAN_DELAYS_MS.choose(rng).copied().unwrap_or_default()
}
