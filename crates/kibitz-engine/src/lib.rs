//! Engine adapter: one uniform command surface over several backend kinds.

pub mod command;
pub mod embedded;
pub mod local;
pub mod protocol;
pub mod remote;
pub mod sandboxed;
pub mod uci;
pub mod weights;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kibitz_types::{
    analysis::AnalysisRequest,
    backend::{BackendDescriptor, BackendKind},
    config::KibitzConfig,
    KibitzError, Result,
};
use tracing::{info, warn};

use crate::{
    command::EngineOptions,
    embedded::{EmbeddedBackend, ModuleRegistry},
    local::LocalProcessBackend,
    remote::RemoteBackend,
    sandboxed::{SandboxedBackend, SubordinateLink},
    uci::DriverTimeouts,
    weights::WeightStore,
};

pub use protocol::{EngineRecord, TaggedRecord};

/// Records of one request, ending after its `BestMove`.
pub type RecordStream = BoxStream<'static, TaggedRecord>;

#[async_trait]
pub trait Backend: Send + Sync {
    fn descriptor(&self) -> BackendDescriptor;
    /// Loads the engine and any weights; fails with `BackendUnavailable`.
    async fn start(&mut self) -> Result<()>;
    async fn configure(&mut self, options: &EngineOptions) -> Result<()>;
    async fn new_game(&mut self) -> Result<()>;
    /// Supersedes any running search.
    async fn analyze(&mut self, request: &AnalysisRequest) -> Result<RecordStream>;
    async fn stop(&mut self) -> Result<()>;
    async fn shutdown(&mut self) -> Result<()>;
}

pub type SubordinateFactory = Box<dyn Fn() -> Result<SubordinateLink> + Send + Sync>;

/// Host-provided pieces needed to construct in-process and sandboxed
/// backends.
#[derive(Default)]
pub struct BackendEnvironment {
    pub modules: ModuleRegistry,
    pub subordinates: Option<SubordinateFactory>,
}

/// Constructs the backend selected by `config.engine.variant`.
pub fn build_backend(config: &KibitzConfig, env: &BackendEnvironment) -> Result<Box<dyn Backend>> {
    let engine = &config.engine;
    let descriptor = engine.variant.descriptor();
    let timeouts = DriverTimeouts::from_millis(engine.handshake_timeout_ms, engine.stop_ack_timeout_ms);
    let weights = WeightStore::from_location(engine.weights_location.as_deref());

    let backend: Box<dyn Backend> = match descriptor.kind {
        BackendKind::LocalProcess => {
            let binary = engine.binary_path.as_deref().ok_or_else(|| {
                KibitzError::BackendUnavailable(format!(
                    "{} needs engine.binary_path",
                    descriptor.variant
                ))
            })?;
            Box::new(LocalProcessBackend::new(
                descriptor,
                binary,
                engine.args.clone(),
                timeouts,
            ))
        }
        BackendKind::EmbeddedModule => Box::new(EmbeddedBackend::new(
            descriptor,
            env.modules.instantiate(descriptor.variant)?,
            weights,
            config.analysis.game_variant,
            timeouts,
        )),
        BackendKind::SandboxedSubordinate => {
            let factory = env.subordinates.as_ref().ok_or_else(|| {
                KibitzError::BackendUnavailable(format!(
                    "no subordinate host available for {}",
                    descriptor.variant
                ))
            })?;
            Box::new(SandboxedBackend::new(descriptor, factory()?, weights, timeouts))
        }
        BackendKind::RemoteService => Box::new(RemoteBackend::new(
            descriptor,
            config.remote.base_url.clone(),
            Duration::from_millis(config.remote.request_timeout_ms),
        )?),
    };
    Ok(backend)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Ready,
    /// Construction or weight preload failed; cleared only by installing
    /// another backend.
    Unavailable(String),
}

/// Owns at most one live backend.
pub struct EngineAdapter {
    backend: Option<Box<dyn Backend>>,
    state: AdapterState,
    options: EngineOptions,
}

impl EngineAdapter {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            backend: None,
            state: AdapterState::Idle,
            options,
        }
    }

    pub fn options_from(config: &KibitzConfig) -> EngineOptions {
        EngineOptions {
            hash_mb: config.engine.hash_mb,
            threads: config.engine.threads,
            multipv: config.analysis.multipv,
            variant: config.analysis.game_variant,
        }
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    pub fn descriptor(&self) -> Option<BackendDescriptor> {
        self.backend.as_ref().map(|backend| backend.descriptor())
    }

    /// Tears down the current backend, then starts, configures and resets
    /// `backend`.
    pub async fn install(&mut self, mut backend: Box<dyn Backend>) -> Result<()> {
        self.shutdown().await;
        let variant = backend.descriptor().variant;
        let options = self.options;
        let started = async {
            backend.start().await?;
            backend.configure(&options).await?;
            backend.new_game().await
        }
        .await;

        match started {
            Ok(()) => {
                info!(engine = %variant, "backend ready");
                self.backend = Some(backend);
                self.state = AdapterState::Ready;
                Ok(())
            }
            Err(err) => {
                let reason = match err {
                    KibitzError::BackendUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                warn!(engine = %variant, %reason, "backend unavailable");
                if let Err(err) = backend.shutdown().await {
                    warn!(engine = %variant, "shutdown after failed start: {err}");
                }
                self.state = AdapterState::Unavailable(reason.clone());
                Err(KibitzError::BackendUnavailable(reason))
            }
        }
    }

    /// Installs a new backend with different options.
    pub async fn reconfigure(
        &mut self,
        options: EngineOptions,
        backend: Box<dyn Backend>,
    ) -> Result<()> {
        self.options = options;
        self.install(backend).await
    }

    pub async fn analyze(&mut self, request: &AnalysisRequest) -> Result<RecordStream> {
        self.ready_backend()?.analyze(request).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.ready_backend()?.stop().await
    }

    pub async fn new_game(&mut self) -> Result<()> {
        self.ready_backend()?.new_game().await
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if let Err(err) = backend.shutdown().await {
                warn!("backend shutdown failed: {err}");
            }
        }
        self.state = AdapterState::Idle;
    }

    fn ready_backend(&mut self) -> Result<&mut Box<dyn Backend>> {
        match (&self.state, self.backend.as_mut()) {
            (AdapterState::Ready, Some(backend)) => Ok(backend),
            (AdapterState::Unavailable(reason), _) => {
                Err(KibitzError::BackendUnavailable(reason.clone()))
            }
            _ => Err(engine_error("no backend installed")),
        }
    }
}

pub fn engine_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Engine(message.into())
}
