//! One analysis session: polls the page, keeps a single request in flight
//! and fans results out to visualization and automation.

use async_trait::async_trait;
use futures::StreamExt;
use kibitz_controller::MoveExecutor;
use kibitz_engine::{Backend, EngineAdapter, RecordStream, TaggedRecord};
use kibitz_network::EventPublisher;
use kibitz_ops::TelemetryStore;
use kibitz_position::{PositionResolver, PositionSource, ResolvedPosition};
use kibitz_types::{
    analysis::{AnalysisRequest, EvaluationSnapshot, RequestId},
    board::Side,
    config::KibitzConfig,
    events::{
        AutomationEvent, AutomationStatus, BestMoveEvent, EvaluationEvent, EventKind,
        EventPayload, LifecyclePhase, PositionEvent, SessionEvent, ThreatEvent,
    },
    Result,
};
use tokio::{
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    aggregator::{AggregatorEvent, EvaluationAggregator},
    automation::{AutomationController, AutomationDecision, AutomationReport},
    classifier::classify,
    orchestrator_error,
};

struct CurrentPosition {
    resolved: ResolvedPosition,
    orientation: Side,
}

/// Where session events go: subscribers first, then the telemetry log.
struct Outlet<N> {
    network: N,
    telemetry: TelemetryStore,
}

impl<N: EventPublisher> Outlet<N> {
    async fn publish(&self, event: SessionEvent) -> Result<()> {
        let cloned = event.clone();
        self.network.publish(event).await?;
        self.telemetry.record_event(cloned).await?;
        Ok(())
    }

    /// Publishes the result of installing a backend and passes it on.
    async fn announce(&self, installed: Result<()>) -> Result<()> {
        match installed {
            Ok(()) => {
                self.publish(SessionEvent::lifecycle(LifecyclePhase::Ready, None))
                    .await
            }
            Err(err) => {
                self.publish(SessionEvent::lifecycle(
                    LifecyclePhase::BackendUnavailable,
                    Some(err.to_string()),
                ))
                .await?;
                Err(err)
            }
        }
    }
}

enum LoopEvent {
    Shutdown,
    Tick,
    Record(TaggedRecord),
    StreamEnded,
    Report(AutomationReport),
}

pub struct Session<P, X, N>
where
    P: PositionSource,
    X: MoveExecutor,
    N: EventPublisher,
{
    config: KibitzConfig,
    source: P,
    adapter: EngineAdapter,
    resolver: PositionResolver,
    aggregator: EvaluationAggregator,
    automation: AutomationController<X>,
    reports: mpsc::UnboundedReceiver<AutomationReport>,
    outlet: Outlet<N>,
    stream: Option<RecordStream>,
    last_scrape: Option<(String, Side)>,
    current: Option<CurrentPosition>,
    shutdown: CancellationToken,
}

impl<P, X, N> Session<P, X, N>
where
    P: PositionSource,
    X: MoveExecutor + 'static,
    N: EventPublisher,
{
    pub fn new(
        config: KibitzConfig,
        source: P,
        executor: X,
        network: N,
        telemetry: TelemetryStore,
    ) -> Result<Self> {
        config.validate()?;
        let (reports_tx, reports) = mpsc::unbounded_channel();
        Ok(Self {
            adapter: EngineAdapter::new(EngineAdapter::options_from(&config)),
            resolver: PositionResolver::new(
                config.ingestion.cache_capacity,
                config.analysis.game_variant,
            )?,
            aggregator: EvaluationAggregator::new(
                config.analysis.multipv,
                config.analysis.game_variant,
            ),
            automation: AutomationController::new(config.automation.clone(), executor, reports_tx),
            reports,
            config,
            source,
            outlet: Outlet { network, telemetry },
            stream: None,
            last_scrape: None,
            current: None,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn snapshot(&self) -> &EvaluationSnapshot {
        self.aggregator.snapshot()
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.outlet.telemetry
    }

    /// Cancelling the token ends [`SessionRunner::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn boot(&mut self, backend: Box<dyn Backend>) -> Result<()> {
        self.outlet.network.run().await?;
        self.outlet.publish(SessionEvent::lifecycle(
            LifecyclePhase::Boot,
            Some(format!("engine {}", backend.descriptor().variant)),
        ))
        .await?;
        let installed = self.adapter.install(backend).await;
        self.outlet.announce(installed).await
    }

    /// Replaces the backend and every setting derived from `config`. The
    /// next tick analyzes the page again.
    pub async fn reconfigure(
        &mut self,
        config: KibitzConfig,
        backend: Box<dyn Backend>,
    ) -> Result<()> {
        config.validate()?;
        self.stream = None;
        self.automation.cancel_pending();
        self.automation.set_config(config.automation.clone());
        self.resolver.set_variant(config.analysis.game_variant);
        self.aggregator =
            EvaluationAggregator::new(config.analysis.multipv, config.analysis.game_variant);
        self.last_scrape = None;
        self.current = None;

        let options = EngineAdapter::options_from(&config);
        self.config = config;
        let installed = self.adapter.reconfigure(options, backend).await;
        self.outlet.announce(installed).await
    }

    /// One ingestion poll. Unchanged page text returns without touching the
    /// live snapshot.
    pub async fn tick(&mut self) -> Result<()> {
        let Some(scraped) = self.source.latest().await? else {
            return Ok(());
        };
        let scrape = (scraped.raw, scraped.orientation);
        if self.last_scrape.as_ref() == Some(&scrape) {
            return Ok(());
        }
        let (raw, orientation) = scrape;
        let resolved = match self.resolver.resolve(&raw) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("unable to resolve scraped position: {err}");
                self.last_scrape = Some((raw, orientation));
                return Ok(());
            }
        };
        self.last_scrape = Some((raw, orientation));

        let unchanged = self.current.as_ref().is_some_and(|current| {
            current.resolved.key == resolved.key && current.orientation == orientation
        });
        if unchanged {
            return Ok(());
        }
        if self.automation.cancel_pending() {
            debug!("position changed, pending move canceled");
        }
        self.start_analysis(resolved, orientation).await
    }

    async fn start_analysis(&mut self, resolved: ResolvedPosition, orientation: Side) -> Result<()> {
        let mover = resolved.mover().ok_or_else(|| {
            orchestrator_error(format!("no side to move in '{}'", resolved.entry.fen))
        })?;
        let request = AnalysisRequest {
            id: RequestId::new(),
            fingerprint: resolved.key.clone(),
            fen: resolved.entry.fen.clone(),
            start_fen: resolved.entry.start_fen.clone(),
            moves: resolved.entry.moves.clone(),
            mover,
            time_ms: self.config.analysis.compute_time_ms,
            multipv: self.config.analysis.multipv,
            variant: self.resolver.variant(),
        };
        info!(
            request = %request.id,
            tier = ?resolved.tier,
            site = %resolved.site,
            fen = request.fen.as_str(),
            "new position"
        );
        self.outlet.publish(SessionEvent::new(
            EventKind::Position,
            EventPayload::Position(PositionEvent {
                request: request.id,
                fen: request.fen.clone(),
                mover,
                site: resolved.site.to_string(),
                tier: resolved.tier,
            }),
        ))
        .await?;
        self.current = Some(CurrentPosition {
            resolved,
            orientation,
        });

        // Records still buffered for the previous request go with its stream.
        self.stream = None;
        self.aggregator.begin(&request);
        match self.adapter.analyze(&request).await {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(err) if err.is_backend_unavailable() => {
                warn!("analysis refused: {err}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn handle_record(&mut self, tagged: TaggedRecord) -> Result<()> {
        for event in self.aggregator.apply(tagged) {
            match event {
                AggregatorEvent::Discarded => {}
                AggregatorEvent::Updated => {
                    let snapshot = self.aggregator.snapshot().clone();
                    let annotations = classify(&snapshot);
                    self.outlet.publish(SessionEvent::new(
                        EventKind::Evaluation,
                        EventPayload::Evaluation(EvaluationEvent {
                            snapshot,
                            annotations,
                        }),
                    ))
                    .await?;
                }
                AggregatorEvent::InterimBestMove { best_move, threat } => {
                    if let Some(event) = self.best_move_event(best_move, threat, false) {
                        self.outlet.publish(event).await?;
                    }
                }
                AggregatorEvent::Terminal { best_move, threat } => {
                    if let Some(event) = self.best_move_event(best_move, threat.clone(), true) {
                        self.outlet.publish(event).await?;
                    }
                    if let Some(mv) = threat.filter(|_| self.config.analysis.threat_analysis) {
                        let by = self.aggregator.snapshot().mover.opponent();
                        self.outlet.publish(SessionEvent::new(
                            EventKind::Threat,
                            EventPayload::Threat(ThreatEvent { by, mv }),
                        ))
                        .await?;
                    }
                    self.automate().await?;
                }
                AggregatorEvent::GameOver(outcome) => {
                    info!(%outcome, "game over");
                    self.outlet.publish(SessionEvent::new(
                        EventKind::GameOver,
                        EventPayload::GameOver(outcome),
                    ))
                    .await?;
                }
            }
        }
        Ok(())
    }

    fn best_move_event(
        &self,
        best_move: String,
        threat: Option<String>,
        terminal: bool,
    ) -> Option<SessionEvent> {
        let snapshot = self.aggregator.snapshot();
        let request = snapshot.request?;
        Some(SessionEvent::new(
            EventKind::BestMove,
            EventPayload::BestMove(BestMoveEvent {
                request,
                mover: snapshot.mover,
                best_move,
                threat,
                terminal,
            }),
        ))
    }

    async fn automate(&mut self) -> Result<()> {
        let Some(orientation) = self.current.as_ref().map(|current| current.orientation) else {
            return Ok(());
        };
        let Some(fen) = self.latest_fen().await else {
            return Ok(());
        };
        match self
            .automation
            .decide(self.aggregator.snapshot(), orientation, &fen)
        {
            AutomationDecision::Skip(reason) => {
                debug!(?reason, "automation skipped");
                Ok(())
            }
            AutomationDecision::StaleAbort => Ok(()),
            AutomationDecision::Execute { command, delay_ms } => {
                self.automation.schedule(command.clone(), delay_ms);
                self.outlet.publish(SessionEvent::new(
                    EventKind::Automation,
                    EventPayload::Automation(AutomationEvent {
                        command,
                        delay_ms,
                        status: AutomationStatus::Scheduled,
                        latency: None,
                    }),
                ))
                .await
            }
        }
    }

    /// Position currently shown on the page, which may already be past the
    /// one that was analyzed.
    async fn latest_fen(&mut self) -> Option<String> {
        let latest = match self.source.latest().await {
            Ok(latest) => latest,
            Err(err) => {
                warn!("position source failed: {err}");
                None
            }
        };
        match latest {
            Some(scraped) => self
                .resolver
                .resolve(&scraped.raw)
                .map(|resolved| resolved.entry.fen)
                .ok(),
            None => self
                .current
                .as_ref()
                .map(|current| current.resolved.entry.fen.clone()),
        }
    }

    pub async fn handle_report(&mut self, report: AutomationReport) -> Result<()> {
        self.outlet.publish(SessionEvent::new(
            EventKind::Automation,
            EventPayload::Automation(AutomationEvent {
                command: report.command,
                delay_ms: report.delay_ms,
                status: report.status,
                latency: report.latency,
            }),
        ))
        .await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.automation.cancel_pending();
        self.stream = None;
        self.adapter.shutdown().await;
        self.outlet
            .publish(SessionEvent::lifecycle(LifecyclePhase::Shutdown, None))
            .await
    }
}

async fn next_record(stream: &mut Option<RecordStream>) -> Option<TaggedRecord> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Per-tick and per-record failures are logged; the loop keeps going.
fn absorb(context: &str, result: Result<()>) {
    if let Err(err) = result {
        warn!("{context}: {err}");
    }
}

#[async_trait]
pub trait SessionRunner {
    async fn run(&mut self) -> Result<()>;
}

#[async_trait]
impl<P, X, N> SessionRunner for Session<P, X, N>
where
    P: PositionSource + 'static,
    X: MoveExecutor + 'static,
    N: EventPublisher + 'static,
{
    async fn run(&mut self) -> Result<()> {
        let period = Duration::from_millis(self.config.ingestion.refresh_interval_ms);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = period.as_millis() as u64, "session running");

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => LoopEvent::Shutdown,
                Some(report) = self.reports.recv() => LoopEvent::Report(report),
                record = next_record(&mut self.stream) => match record {
                    Some(record) => LoopEvent::Record(record),
                    None => LoopEvent::StreamEnded,
                },
                _ = ticker.tick() => LoopEvent::Tick,
            };
            match event {
                LoopEvent::Shutdown => break,
                LoopEvent::Tick => absorb("tick failed", self.tick().await),
                LoopEvent::Record(record) => {
                    absorb("record handling failed", self.handle_record(record).await)
                }
                LoopEvent::StreamEnded => self.stream = None,
                LoopEvent::Report(report) => {
                    absorb("automation report failed", self.handle_report(report).await)
                }
            }
        }
        self.shutdown().await
    }
}
