//! Engines running behind a message-passing boundary.

use std::sync::Arc;

use async_trait::async_trait;
use kibitz_types::{
    analysis::AnalysisRequest,
    backend::{BackendDescriptor, WeightSource},
    KibitzError, Result,
};
use tokio::{
    sync::mpsc,
    time::{interval, timeout, Duration},
};
use tracing::{debug, info};

use crate::{
    command::{gate_options, EngineCommand, EngineOptions},
    engine_error,
    uci::{CommandSink, DriverTimeouts, UciDriver},
    weights::WeightStore,
    Backend, RecordStream,
};

const LIVENESS_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubordinateMessage {
    Command(String),
    Weights { name: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubordinateEvent {
    /// Any first message proves the subordinate is up.
    Alive,
    Line(String),
}

/// Outbound side of the boundary.
pub trait Subordinate: Send + Sync {
    fn post(&self, message: SubordinateMessage) -> Result<()>;
}

/// Both directions of a subordinate connection.
pub struct SubordinateLink {
    pub outbound: Arc<dyn Subordinate>,
    pub events: mpsc::UnboundedReceiver<SubordinateEvent>,
}

/// In-memory subordinate; the returned endpoint plays the far side.
pub struct ChannelSubordinate {
    tx: mpsc::UnboundedSender<SubordinateMessage>,
}

pub struct SubordinateEndpoint {
    pub inbox: mpsc::UnboundedReceiver<SubordinateMessage>,
    pub outbox: mpsc::UnboundedSender<SubordinateEvent>,
}

impl ChannelSubordinate {
    pub fn link() -> (SubordinateLink, SubordinateEndpoint) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (outbox, events) = mpsc::unbounded_channel();
        (
            SubordinateLink {
                outbound: Arc::new(ChannelSubordinate { tx }),
                events,
            },
            SubordinateEndpoint { inbox, outbox },
        )
    }
}

impl Subordinate for ChannelSubordinate {
    fn post(&self, message: SubordinateMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| engine_error("subordinate channel closed"))
    }
}

struct SubordinateSink {
    outbound: Arc<dyn Subordinate>,
}

#[async_trait]
impl CommandSink for SubordinateSink {
    async fn send_line(&self, line: &str) -> Result<()> {
        self.outbound
            .post(SubordinateMessage::Command(line.to_string()))
    }
}

pub struct SandboxedBackend {
    descriptor: BackendDescriptor,
    outbound: Arc<dyn Subordinate>,
    events: Option<mpsc::UnboundedReceiver<SubordinateEvent>>,
    weights: WeightStore,
    weights_sent: bool,
    timeouts: DriverTimeouts,
    driver: Option<UciDriver>,
}

impl SandboxedBackend {
    pub fn new(
        descriptor: BackendDescriptor,
        link: SubordinateLink,
        weights: WeightStore,
        timeouts: DriverTimeouts,
    ) -> Self {
        Self {
            descriptor,
            outbound: link.outbound,
            events: Some(link.events),
            weights,
            weights_sent: false,
            timeouts,
            driver: None,
        }
    }

    fn driver(&self) -> Result<&UciDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| engine_error("subordinate not started"))
    }

    /// Polls until the subordinate has said anything at all.
    async fn await_liveness(
        &self,
        events: &mut mpsc::UnboundedReceiver<SubordinateEvent>,
    ) -> Result<Vec<SubordinateEvent>> {
        let poll = async {
            let mut ticker = interval(LIVENESS_POLL);
            loop {
                ticker.tick().await;
                match events.try_recv() {
                    Ok(event) => return Ok(vec![event]),
                    Err(mpsc::error::TryRecvError::Empty) => debug!("subordinate not alive yet"),
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        return Err(KibitzError::BackendUnavailable(
                            "subordinate closed before signalling liveness".into(),
                        ))
                    }
                }
            }
        };
        timeout(self.timeouts.handshake, poll).await.map_err(|_| {
            KibitzError::BackendUnavailable("subordinate never signalled liveness".into())
        })?
    }

    async fn transfer_weights(&mut self) -> Result<()> {
        let WeightSource::Blob(name) = self.descriptor.capabilities.weights else {
            return Ok(());
        };
        if self.weights_sent {
            return Ok(());
        }
        let data = self.weights.fetch(&format!("weights/{name}")).await?;
        self.outbound
            .post(SubordinateMessage::Weights {
                name: name.to_string(),
                data,
            })
            .map_err(|err| KibitzError::BackendUnavailable(format!("weight transfer failed: {err}")))?;
        self.weights_sent = true;
        info!(blob = name, "weights transferred to subordinate");
        Ok(())
    }
}

#[async_trait]
impl Backend for SandboxedBackend {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor
    }

    async fn start(&mut self) -> Result<()> {
        let mut events = self
            .events
            .take()
            .ok_or_else(|| KibitzError::BackendUnavailable("subordinate already started".into()))?;
        let early = self.await_liveness(&mut events).await?;
        info!(engine = %self.descriptor.variant, "subordinate alive");

        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        for event in early {
            if let SubordinateEvent::Line(line) = event {
                let _ = lines_tx.send(line);
            }
        }
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SubordinateEvent::Line(line) = event {
                    if lines_tx.send(line).is_err() {
                        break;
                    }
                }
            }
        });

        let driver = UciDriver::spawn(
            Box::new(SubordinateSink {
                outbound: self.outbound.clone(),
            }),
            lines_rx,
            self.timeouts,
        );
        self.transfer_weights().await?;
        driver
            .expect(EngineCommand::IsReady, "readyok")
            .await
            .map_err(|err| {
                KibitzError::BackendUnavailable(format!("subordinate not ready: {err}"))
            })?;
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
mod tests {
    use super::*;
    use futures::StreamExt;
    use kibitz_types::{backend::EngineVariant, board::Side};

    use crate::{protocol::EngineRecord, uci::tests::request};

    /// Far side that comes alive after a delay and answers the protocol.
    fn spawn_far_side(mut endpoint: SubordinateEndpoint, delay: Duration) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = endpoint.outbox.send(SubordinateEvent::Alive);
            let mut blobs = 0;
            while let Some(message) = endpoint.inbox.recv().await {
                match message {
                    SubordinateMessage::Weights { name, .. } => {
                        assert_eq!(name, "weights_32195.dat.gz");
                        blobs += 1;
                    }
                    SubordinateMessage::Command(line) if line == "isready" => {
                        let _ = endpoint.outbox.send(SubordinateEvent::Line("readyok".into()));
                    }
                    SubordinateMessage::Command(line) if line.starts_with("go") => {
                        for reply in [
                            "info depth 3 multipv 1 score cp 12 pv e2e4",
                            "bestmove e2e4",
                        ] {
                            let _ = endpoint.outbox.send(SubordinateEvent::Line(reply.into()));
                        }
                    }
                    SubordinateMessage::Command(line) if line == "quit" => break,
                    SubordinateMessage::Command(_) => {}
                }
            }
            blobs
        })
    }

    fn blob_store() -> (WeightStore, std::path::PathBuf) {
        let root = std::env::temp_dir().join("kibitz-sandboxed-weights");
        std::fs::create_dir_all(root.join("weights")).unwrap();
        std::fs::write(root.join("weights/weights_32195.dat.gz"), b"blob").unwrap();
        (WeightStore::Directory(root.clone()), root)
    }

    #[tokio::test]
    async fn handshake_then_single_weight_transfer() {
        let (link, endpoint) = ChannelSubordinate::link();
        let far_side = spawn_far_side(endpoint, Duration::from_millis(250));
        let (store, root) = blob_store();
        let mut backend = SandboxedBackend::new(
            EngineVariant::Lc0.descriptor(),
            link,
            store,
            DriverTimeouts::from_millis(2_000, 500),
        );
        backend.start().await.expect("start");
        backend.new_game().await.expect("new game");

        let records: Vec<_> = backend
            .analyze(&request(Side::White))
            .await
            .expect("analyze")
            .collect()
            .await;
        assert!(matches!(records[0].record, EngineRecord::Info(_)));
        assert!(matches!(records[1].record, EngineRecord::BestMove(_)));

        backend.shutdown().await.expect("shutdown");
        assert_eq!(far_side.await.expect("far side"), 1);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn silent_subordinate_is_unavailable() {
        let (link, _endpoint) = ChannelSubordinate::link();
        let mut backend = SandboxedBackend::new(
            EngineVariant::Lc0.descriptor(),
            link,
            WeightStore::Missing,
            DriverTimeouts::from_millis(300, 300),
        );
        let err = backend.start().await.unwrap_err();
        assert!(err.is_backend_unavailable());
    }
}
