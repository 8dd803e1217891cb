use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use futures::StreamExt;
use kibitz_controller::{ExecutorMetrics, HttpExecutor, MoveExecutor, RecordingExecutor};
use kibitz_engine::{build_backend, BackendEnvironment};
use kibitz_network::{EventHub, EventPublisher};
use kibitz_ops::{init_tracing, TelemetryStore};
use kibitz_orchestrator::{Session, SessionRunner};
use kibitz_position::{ChannelSource, ScrapedPosition};
use kibitz_types::{board::Side, config::KibitzConfig, game::AutomationCommand};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
    time::sleep,
};
use tracing::{info, warn};

/// Analyzes scraped board text read from stdin and prints session events
/// as JSON lines.
#[derive(Debug, Parser)]
#[command(name = "kibitz", version)]
struct Args {
    /// Configuration file.
    #[arg(long, env = "KIBITZ_CONFIG", default_value = "configs/dev.toml")]
    config: PathBuf,
    /// Orientation for input lines that do not start with `white<TAB>` or
    /// `black<TAB>`.
    #[arg(long, default_value = "white")]
    orientation: String,
    /// How long to keep analyzing after stdin closes.
    #[arg(long, default_value_t = 5_000)]
    linger_ms: u64,
}

/// Plays through the HTTP endpoint when one is configured, otherwise only
/// records.
enum CliExecutor {
    Recording(RecordingExecutor),
    Http(HttpExecutor),
}

#[async_trait]
impl MoveExecutor for CliExecutor {
    async fn execute(&self, command: &AutomationCommand) -> kibitz_types::Result<()> {
        match self {
            CliExecutor::Recording(executor) => executor.execute(command).await,
            CliExecutor::Http(executor) => executor.execute(command).await,
        }
    }

    fn metrics(&self) -> ExecutorMetrics {
        match self {
            CliExecutor::Recording(executor) => executor.metrics(),
            CliExecutor::Http(executor) => executor.metrics(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config).with_preset_applied();
    init_tracing(&config.ops)?;
    let default_orientation = Side::from_orientation(&args.orientation).unwrap_or(Side::White);

    let executor = match config.automation.executor_url.as_deref() {
        Some(url) => CliExecutor::Http(HttpExecutor::new(
            url,
            Duration::from_millis(config.remote.request_timeout_ms),
        )?),
        None => CliExecutor::Recording(RecordingExecutor::new()),
    };
    let backend = build_backend(&config, &BackendEnvironment::default())?;
    info!(engine = %config.engine.variant, variant = %config.analysis.game_variant, "starting");

    let hub = EventHub::new(256);
    let mut events = hub.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!("unable to encode event: {err}"),
            }
        }
    });

    let (positions, source) = ChannelSource::new();
    let telemetry = TelemetryStore::from_config(&config.ops);
    let mut session = Session::new(config, source, executor, hub, telemetry)?;
    session.boot(backend).await?;

    let shutdown = session.shutdown_token();
    let linger = Duration::from_millis(args.linger_ms);
    tokio::spawn(async move {
        if let Err(err) = feed_stdin(positions, default_orientation).await {
            warn!("stdin closed with error: {err}");
        }
        sleep(linger).await;
        shutdown.cancel();
    });

    session.run().await?;
    drop(session);
    let _ = printer.await;
    Ok(())
}

/// Forwards each stdin line as the latest scrape.
async fn feed_stdin(
    positions: watch::Sender<Option<ScrapedPosition>>,
    default_orientation: Side,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        positions.send_replace(Some(parse_input(&line, default_orientation)));
    }
    Ok(())
}

fn parse_input(line: &str, default_orientation: Side) -> ScrapedPosition {
    let (orientation, raw) = match line.split_once('\t') {
        Some((side, raw)) => match Side::from_orientation(side) {
            Some(side) => (side, raw),
            None => (default_orientation, line),
        },
        None => (default_orientation, line),
    };
    ScrapedPosition {
        raw: raw.to_string(),
        orientation,
    }
}

fn load_config(path: &Path) -> KibitzConfig {
    match KibitzConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                KibitzConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            KibitzConfig::default()
        }
    }
}
