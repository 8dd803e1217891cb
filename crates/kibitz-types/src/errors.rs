use thiserror::Error;

pub type Result<T, E = KibitzError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum KibitzError {
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Backend construction or weight preload failed; no analysis may run
    /// until the session is reconfigured.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("protocol parse error: {0}")]
    ProtocolParse(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("position error: {0}")]
    Position(String),
    #[error("automation error: {0}")]
    Automation(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KibitzError {
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, KibitzError::BackendUnavailable(_))
    }
}
