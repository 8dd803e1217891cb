use std::path::PathBuf;

use async_trait::async_trait;
use kibitz_types::{
    analysis::AnalysisRequest, backend::BackendDescriptor, KibitzError, Result,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::{mpsc, Mutex},
};
use tracing::{debug, info, warn};

use crate::{
    command::{gate_options, EngineCommand, EngineOptions},
    engine_error,
    uci::{CommandSink, DriverTimeouts, UciDriver},
    Backend, RecordStream,
};

struct StdinSink {
    stdin: Mutex<ChildStdin>,
}

#[async_trait]
impl CommandSink for StdinSink {
    async fn send_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|err| engine_error(format!("failed to write to engine: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| engine_error(format!("failed to flush engine input: {err}")))
    }
}

/// Engine running as a child process speaking the protocol over stdio.
pub struct LocalProcessBackend {
    descriptor: BackendDescriptor,
    binary: PathBuf,
    args: Vec<String>,
    timeouts: DriverTimeouts,
    child: Option<Child>,
    driver: Option<UciDriver>,
}

impl LocalProcessBackend {
    pub fn new(
        descriptor: BackendDescriptor,
        binary: impl Into<PathBuf>,
        args: Vec<String>,
        timeouts: DriverTimeouts,
    ) -> Self {
        Self {
            descriptor,
            binary: binary.into(),
            args,
            timeouts,
            child: None,
            driver: None,
        }
    }

    fn driver(&self) -> Result<&UciDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| engine_error("local engine process not started"))
    }
}

#[async_trait]
impl Backend for LocalProcessBackend {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor
    }

    async fn start(&mut self) -> Result<()> {
        info!(binary = %self.binary.display(), "spawning engine process");
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                KibitzError::BackendUnavailable(format!(
                    "failed to spawn {}: {err}",
                    self.binary.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KibitzError::BackendUnavailable("engine stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KibitzError::BackendUnavailable("engine stdout unavailable".into()))?;

        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if lines_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("engine stdout read error: {err}");
                        break;
                    }
                }
            }
        });

        let driver = UciDriver::spawn(
            Box::new(StdinSink {
                stdin: Mutex::new(stdin),
            }),
            lines_rx,
            self.timeouts,
        );
        self.child = Some(child);

        let handshake = async {
            driver.expect(EngineCommand::Uci, "uciok").await?;
            driver.expect(EngineCommand::IsReady, "readyok").await
        };
        handshake
            .await
            .map_err(|err| KibitzError::BackendUnavailable(format!("handshake failed: {err}")))?;
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
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                warn!("failed to kill engine process: {err}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use kibitz_types::{backend::EngineVariant, board::Side, variant::GameVariant};

    use crate::{protocol::EngineRecord, uci::tests::request};

    const FAKE_ENGINE: &str = r#"
while read -r line; do
  case "$line" in
    uci) echo "id name fake"; echo uciok ;;
    isready) echo readyok ;;
    go*) echo "info depth 1 multipv 1 score cp 31 pv e2e4 e7e5"; echo "bestmove e2e4 ponder e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;

    fn backend(binary: &str, args: Vec<String>) -> LocalProcessBackend {
        LocalProcessBackend::new(
            EngineVariant::Stockfish16Nnue40.descriptor(),
            binary,
            args,
            DriverTimeouts::from_millis(2_000, 500),
        )
    }

    #[tokio::test]
    async fn child_process_handshakes_and_searches() {
        let mut backend = backend("sh", vec!["-c".into(), FAKE_ENGINE.into()]);
        backend.start().await.expect("handshake");
        backend
            .configure(&EngineOptions {
                hash_mb: 16,
                threads: 1,
                multipv: 2,
                variant: GameVariant::Chess,
            })
            .await
            .expect("configure");
        backend.new_game().await.expect("new game");

        let req = request(Side::White);
        let records: Vec<_> = backend.analyze(&req).await.expect("analyze").collect().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.request == req.id));
        match &records[0].record {
            EngineRecord::Info(info) => assert_eq!(info.pv, vec!["e2e4", "e7e5"]),
            other => panic!("unexpected record {other:?}"),
        }
        match &records[1].record {
            EngineRecord::BestMove(best) => assert_eq!(best.mv, "e2e4"),
            other => panic!("unexpected record {other:?}"),
        }

        backend.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let mut backend = backend("/nonexistent/kibitz-engine", Vec::new());
        let err = backend.start().await.expect_err("spawn must fail");
        assert!(err.is_backend_unavailable(), "{err}");
    }
}
