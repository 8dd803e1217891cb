//! Operational helpers: logging setup and the in-memory event log.

use std::{collections::VecDeque, sync::Arc};

use kibitz_types::{
    config::OpsConfig,
    events::{EventKind, SessionEvent},
    KibitzError, Result,
};
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ops_error(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(())
}

/// The most recent events published by a session, oldest first.
#[derive(Clone)]
pub struct TelemetryStore {
    events: Arc<Mutex<VecDeque<SessionEvent>>>,
    capacity: usize,
}

impl TelemetryStore {
    /// Keeps at most `capacity` events, dropping the oldest.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    pub fn from_config(config: &OpsConfig) -> Self {
        Self::new(config.telemetry_capacity)
    }

    pub async fn record_event(&self, event: SessionEvent) -> Result<()> {
        let mut events = self.events.lock().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    pub async fn snapshot_events(&self) -> Vec<SessionEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn events_of(&self, kind: EventKind) -> Vec<SessionEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }
}

pub fn ops_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Ops(message.into())
}
