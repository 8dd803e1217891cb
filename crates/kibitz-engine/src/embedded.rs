//! Engines loaded in-process behind a line callback.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use kibitz_types::{
    analysis::AnalysisRequest,
    backend::{variant_weight_file, BackendDescriptor, EngineVariant, WeightSource},
    variant::GameVariant,
    KibitzError, Result,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    command::{gate_options, variant_option, EngineCommand, EngineOptions},
    engine_error,
    uci::{CommandSink, DriverTimeouts, UciDriver},
    weights::WeightStore,
    Backend, RecordStream,
};

/// In-process engine instance.
pub trait EmbeddedModule: Send + Sync {
    /// Name of the `index`-th weight file the module wants, if any.
    fn recommended_weights(&self, index: usize) -> Option<String>;
    fn register_weights(&self, index: usize, data: Vec<u8>) -> Result<()>;
    /// Installs the callback receiving every output line.
    fn attach(&self, listener: mpsc::UnboundedSender<String>);
    fn post(&self, line: &str) -> Result<()>;
}

pub type ModuleFactory = Box<dyn Fn() -> Result<Arc<dyn EmbeddedModule>> + Send + Sync>;

/// Loaders for the engine builds that run in-process.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: HashMap<EngineVariant, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, variant: EngineVariant, factory: ModuleFactory) {
        self.factories.insert(variant, factory);
    }

    pub fn instantiate(&self, variant: EngineVariant) -> Result<Arc<dyn EmbeddedModule>> {
        let factory = self.factories.get(&variant).ok_or_else(|| {
            KibitzError::BackendUnavailable(format!("no module registered for {variant}"))
        })?;
        factory().map_err(|err| {
            KibitzError::BackendUnavailable(format!("failed to load module {variant}: {err}"))
        })
    }
}

struct ModuleSink {
    module: Arc<dyn EmbeddedModule>,
}

#[async_trait]
impl CommandSink for ModuleSink {
    async fn send_line(&self, line: &str) -> Result<()> {
        self.module.post(line)
    }
}

pub struct EmbeddedBackend {
    descriptor: BackendDescriptor,
    module: Arc<dyn EmbeddedModule>,
    weights: WeightStore,
    game_variant: GameVariant,
    timeouts: DriverTimeouts,
    driver: Option<UciDriver>,
}

impl EmbeddedBackend {
    pub fn new(
        descriptor: BackendDescriptor,
        module: Arc<dyn EmbeddedModule>,
        weights: WeightStore,
        game_variant: GameVariant,
        timeouts: DriverTimeouts,
    ) -> Self {
        Self {
            descriptor,
            module,
            weights,
            game_variant,
            timeouts,
            driver: None,
        }
    }

    fn driver(&self) -> Result<&UciDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| engine_error("embedded module not started"))
    }

    /// Weight names asked for by the module, stopping at the first gap or
    /// repeated name.
    fn recommended_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for index in 0.. {
            match self.module.recommended_weights(index) {
                Some(name) if !name.is_empty() && !names.contains(&name) => names.push(name),
                _ => break,
            }
        }
        names
    }

    async fn preload_weights(&self) -> Result<()> {
        let files: Vec<String> = match self.descriptor.capabilities.weights {
            WeightSource::ModuleRecommended => self.recommended_names(),
            WeightSource::PerGameVariant => {
                vec![format!("nnue/{}", variant_weight_file(self.game_variant))]
            }
            WeightSource::Blob(name) => vec![name.to_string()],
            WeightSource::None => Vec::new(),
        };
        for (index, file) in files.iter().enumerate() {
            let data = self.weights.fetch(file).await?;
            self.module.register_weights(index, data).map_err(|err| {
                KibitzError::BackendUnavailable(format!("module rejected weights {file}: {err}"))
            })?;
            debug!(index, file = file.as_str(), "weights registered");
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for EmbeddedBackend {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor
    }

    async fn start(&mut self) -> Result<()> {
        info!(engine = %self.descriptor.variant, "starting embedded module");
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        self.module.attach(lines_tx);
        let driver = UciDriver::spawn(
            Box::new(ModuleSink {
                module: self.module.clone(),
            }),
            lines_rx,
            self.timeouts,
        );

        if let Some(command) = variant_option(self.game_variant, &self.descriptor.capabilities) {
            driver.send(&command).await?;
        }
        self.preload_weights().await?;
        driver
            .expect(EngineCommand::IsReady, "readyok")
            .await
            .map_err(|err| KibitzError::BackendUnavailable(format!("module not ready: {err}")))?;
        self.driver = Some(driver);
        Ok(())
    }

    async fn configure(&mut self, options: &EngineOptions) -> Result<()> {
        let driver = self.driver()?;
        for command in gate_options(options, &self.descriptor.capabilities) {
            driver.send(&command).await?;
        }
        Ok(())
    }

    async fn new_game(&mut self) -> Result<()> {
        let driver = self.driver()?;
        driver.send(&EngineCommand::NewGame).await?;
        driver.expect(EngineCommand::IsReady, "readyok").await
    }

    async fn analyze(&mut self, request: &AnalysisRequest) -> Result<RecordStream> {
        self.driver()?.analyze(request).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.driver()?.stop().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            if let Err(err) = driver.send(&EngineCommand::Quit).await {
                debug!("engine did not take quit: {err}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use futures::StreamExt;
    use kibitz_types::board::Side;

    use crate::{protocol::EngineRecord, uci::tests::request};

    /// Module answering `isready` and finishing every search immediately.
    #[derive(Default)]
    pub(crate) struct FakeModule {
        pub recommended: Vec<String>,
        pub posted: Mutex<Vec<String>>,
        pub registered: Mutex<Vec<(usize, usize)>>,
        pub listener: Mutex<Option<mpsc::UnboundedSender<String>>>,
    }

    impl FakeModule {
        fn emit(&self, line: &str) {
            if let Some(listener) = self.listener.lock().unwrap().as_ref() {
                let _ = listener.send(line.to_string());
            }
        }
    }

    impl EmbeddedModule for FakeModule {
        fn recommended_weights(&self, index: usize) -> Option<String> {
            self.recommended.get(index).cloned()
        }

        fn register_weights(&self, index: usize, data: Vec<u8>) -> Result<()> {
            self.registered.lock().unwrap().push((index, data.len()));
            Ok(())
        }

        fn attach(&self, listener: mpsc::UnboundedSender<String>) {
            *self.listener.lock().unwrap() = Some(listener);
        }

        fn post(&self, line: &str) -> Result<()> {
            self.posted.lock().unwrap().push(line.to_string());
            if line == "isready" {
                self.emit("readyok");
            } else if line.starts_with("go") {
                self.emit("info depth 8 multipv 1 score cp 31 nodes 4000 pv g1f3 d7d5");
                self.emit("bestmove g1f3 ponder d7d5");
            }
            Ok(())
        }
    }

    fn weights_dir(name: &str, files: &[&str]) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(name);
        for file in files {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"nnue").unwrap();
        }
        root
    }

    #[tokio::test]
    async fn recommended_weights_are_registered_by_index() {
        let root = weights_dir("kibitz-embedded-rec", &["big.nnue", "small.nnue"]);
        let module = Arc::new(FakeModule {
            recommended: vec!["big.nnue".into(), "small.nnue".into(), "big.nnue".into()],
            ..FakeModule::default()
        });
        let mut backend = EmbeddedBackend::new(
            EngineVariant::Stockfish17Nnue79.descriptor(),
            module.clone(),
            WeightStore::Directory(root.clone()),
            GameVariant::Chess,
            DriverTimeouts::from_millis(500, 500),
        );
        backend.start().await.expect("start");
        assert_eq!(*module.registered.lock().unwrap(), vec![(0, 4), (1, 4)]);

        let records: Vec<_> = backend
            .analyze(&request(Side::White))
            .await
            .expect("analyze")
            .collect()
            .await;
        assert!(matches!(records.last().unwrap().record, EngineRecord::BestMove(_)));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn fairy_sets_variant_before_weights() {
        let root = weights_dir("kibitz-embedded-fairy", &["nnue/atomic-2cf13ff256cc.nnue"]);
        let module = Arc::new(FakeModule::default());
        let mut backend = EmbeddedBackend::new(
            EngineVariant::FairyStockfish14Nnue.descriptor(),
            module.clone(),
            WeightStore::Directory(root.clone()),
            GameVariant::Atomic,
            DriverTimeouts::from_millis(500, 500),
        );
        backend.start().await.expect("start");
        let posted = module.posted.lock().unwrap().clone();
        assert_eq!(posted[0], "setoption name UCI_Variant value atomic");
        assert_eq!(*module.registered.lock().unwrap(), vec![(0, 4)]);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn missing_weights_make_start_fail() {
        let module = Arc::new(FakeModule {
            recommended: vec!["absent.nnue".into()],
            ..FakeModule::default()
        });
        let mut backend = EmbeddedBackend::new(
            EngineVariant::Stockfish16Nnue7.descriptor(),
            module,
            WeightStore::Missing,
            GameVariant::Chess,
            DriverTimeouts::from_millis(500, 500),
        );
        let err = backend.start().await.unwrap_err();
        assert!(err.is_backend_unavailable());
    }

    #[test]
    fn unregistered_module_is_unavailable() {
        let registry = ModuleRegistry::new();
        let err = registry
            .instantiate(EngineVariant::Stockfish11Hce)
            .err()
            .expect("no factory");
        assert!(err.is_backend_unavailable());
    }
}
