use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Search counters reported alongside evaluation lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineMetrics {
    pub depth: u32,
    pub seldepth: u32,
    pub nodes: u64,
    pub nps: u64,
    /// Hash table fill in permille.
    pub hashfull: u32,
}

/// Timing of one automated move, from terminal evaluation to execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySample {
    pub delay_ms: u64,
    pub execution_ms: u64,
    pub total_ms: u64,
    pub captured_at: DateTime<Utc>,
}
