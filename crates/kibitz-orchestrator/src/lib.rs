//! Session orchestration: position ingestion, evaluation aggregation, move
//! classification and automated play.

pub mod aggregator;
pub mod automation;
pub mod classifier;
pub mod session;

use kibitz_types::KibitzError;

pub use aggregator::{AggregatorEvent, EvaluationAggregator, Phase};
pub use automation::{AutomationController, AutomationDecision, AutomationReport, SkipReason};
pub use classifier::classify;
pub use session::{Session, SessionRunner};

pub fn orchestrator_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Orchestrator(message.into())
}
