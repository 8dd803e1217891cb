//! Move execution on the host page.

pub mod http;

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use kibitz_types::{game::AutomationCommand, KibitzError, Result};
use serde::Serialize;
use tracing::info;

pub use http::HttpExecutor;

/// Aggregated executor counters.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExecutorMetrics {
    pub executed: u64,
    pub failed: u64,
    pub last_execution_ms: Option<u64>,
}

#[async_trait]
pub trait MoveExecutor: Send + Sync {
    async fn execute(&self, command: &AutomationCommand) -> Result<()>;
    fn metrics(&self) -> ExecutorMetrics;
}

/// Keeps every command in memory instead of playing it.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    commands: Arc<Mutex<Vec<AutomationCommand>>>,
    metrics: Arc<Mutex<ExecutorMetrics>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<AutomationCommand> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MoveExecutor for RecordingExecutor {
    async fn execute(&self, command: &AutomationCommand) -> Result<()> {
        let start = Instant::now();
        info!(?command, "recording automation command");
        self.commands
            .lock()
            .map_err(|_| controller_error("failed to lock command log"))?
            .push(command.clone());
        record_success(&self.metrics, start);
        Ok(())
    }

    fn metrics(&self) -> ExecutorMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

pub(crate) fn record_success(metrics: &Mutex<ExecutorMetrics>, start: Instant) {
    if let Ok(mut guard) = metrics.lock() {
        guard.executed += 1;
        guard.last_execution_ms = Some(start.elapsed().as_millis() as u64);
    }
}

pub(crate) fn record_failure(metrics: &Mutex<ExecutorMetrics>) {
    if let Ok(mut guard) = metrics.lock() {
        guard.failed += 1;
    }
}

pub fn controller_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Automation(message.into())
}
