//! Shared driver for backends that exchange protocol text lines.
//!
//! Inbound lines are consumed by a pump task that parses them under the
//! request that is active when they arrive. A new search is only started
//! once the previous one has acknowledged `stop` with its `bestmove`, so
//! every record reaching a stream carries the tag it was produced for.
//! A search whose `stop` goes unacknowledged is abandoned, and its output is
//! swallowed up to the late `bestmove`.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use kibitz_types::{
    analysis::{AnalysisRequest, RequestId},
    board::Side,
    Result,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::{
    command::EngineCommand,
    engine_error,
    protocol::{parse_line, EngineRecord, ParsedLine, TaggedRecord},
    RecordStream,
};

/// Outbound half of a line-oriented transport.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_line(&self, line: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct DriverTimeouts {
    pub handshake: Duration,
    pub stop_ack: Duration,
}

impl DriverTimeouts {
    pub fn from_millis(handshake_ms: u64, stop_ack_ms: u64) -> Self {
        Self {
            handshake: Duration::from_millis(handshake_ms),
            stop_ack: Duration::from_millis(stop_ack_ms),
        }
    }
}

struct ActiveSearch {
    id: RequestId,
    mover: Side,
    records: mpsc::UnboundedSender<TaggedRecord>,
    stop_ack: Option<oneshot::Sender<()>>,
}

struct Waiter {
    reply: String,
    notify: oneshot::Sender<()>,
}

#[derive(Default)]
struct PumpState {
    active: Option<ActiveSearch>,
    waiters: Vec<Waiter>,
    /// Abandoned searches still owing a `bestmove`.
    abandoned: usize,
}

pub struct UciDriver {
    sink: Box<dyn CommandSink>,
    state: Arc<Mutex<PumpState>>,
    pump: JoinHandle<()>,
    timeouts: DriverTimeouts,
}

impl UciDriver {
    /// Starts the pump over `inbound`. Must be called inside a tokio runtime.
    pub fn spawn(
        sink: Box<dyn CommandSink>,
        inbound: mpsc::UnboundedReceiver<String>,
        timeouts: DriverTimeouts,
    ) -> Self {
        let state = Arc::new(Mutex::new(PumpState::default()));
        let pump = tokio::spawn(pump(state.clone(), inbound));
        Self {
            sink,
            state,
            pump,
            timeouts,
        }
    }

    pub async fn send(&self, command: &EngineCommand) -> Result<()> {
        let line = command.to_string();
        debug!("engine < {line}");
        self.sink.send_line(&line).await
    }

    /// Sends `command` and waits for a line starting with `reply`.
    pub async fn expect(&self, command: EngineCommand, reply: &str) -> Result<()> {
        let (notify, ready) = oneshot::channel();
        self.lock()?.waiters.push(Waiter {
            reply: reply.to_string(),
            notify,
        });
        self.send(&command).await?;
        match timeout(self.timeouts.handshake, ready).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(engine_error(format!(
                "engine output closed before '{reply}'"
            ))),
            Err(_) => Err(engine_error(format!("timed out waiting for '{reply}'"))),
        }
    }

    /// Stops any running search, then starts `request`.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<RecordStream> {
        self.halt(true).await?;

        let (records, stream) = mpsc::unbounded_channel();
        self.lock()?.active = Some(ActiveSearch {
            id: request.id,
            mover: request.mover,
            records,
            stop_ack: None,
        });
        self.send(&EngineCommand::Position {
            fen: request.position_fen().to_string(),
            moves: request.moves_text(),
        })
        .await?;
        self.send(&EngineCommand::Go {
            movetime_ms: request.time_ms,
        })
        .await?;
        Ok(UnboundedReceiverStream::new(stream).boxed())
    }

    pub async fn stop(&self) -> Result<()> {
        self.halt(false).await
    }

    pub fn is_searching(&self) -> bool {
        self.lock().map(|s| s.active.is_some()).unwrap_or(false)
    }

    async fn halt(&self, always_send: bool) -> Result<()> {
        let pending = {
            let mut state = self.lock()?;
            state.active.as_mut().map(|search| {
                let (ack, acked) = oneshot::channel();
                search.stop_ack = Some(ack);
                (search.id, acked)
            })
        };
        if pending.is_none() && !always_send {
            return Ok(());
        }

        self.send(&EngineCommand::Stop).await?;
        if let Some((id, acked)) = pending {
            if timeout(self.timeouts.stop_ack, acked).await.is_err() {
                warn!(request = %id, "stop not acknowledged in time, abandoning search");
                let mut state = self.lock()?;
                if state.active.as_ref().map(|s| s.id) == Some(id) {
                    state.active = None;
                    state.abandoned += 1;
                }
            } else {
                debug!(request = %id, "stop acknowledged");
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, PumpState>> {
        self.state
            .lock()
            .map_err(|_| engine_error("driver state lock poisoned"))
    }
}

impl Drop for UciDriver {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(state: Arc<Mutex<PumpState>>, mut inbound: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = inbound.recv().await {
        debug!("engine > {line}");
        let Ok(mut guard) = state.lock() else {
            warn!("driver state lock poisoned, stopping pump");
            return;
        };
        dispatch(&mut guard, line.trim());
    }
    if let Ok(mut guard) = state.lock() {
        guard.active = None;
        guard.waiters.clear();
        guard.abandoned = 0;
    }
    warn!("engine output closed");
}

fn dispatch(state: &mut PumpState, line: &str) {
    let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
        .into_iter()
        .partition(|waiter| line.starts_with(waiter.reply.as_str()));
    state.waiters = waiting;
    for waiter in ready {
        let _ = waiter.notify.send(());
    }

    if state.abandoned > 0 {
        if matches!(parse_line(line, Side::White), ParsedLine::BestMove(_)) {
            state.abandoned -= 1;
            debug!(remaining = state.abandoned, "late bestmove from abandoned search");
        }
        return;
    }

    let Some((id, mover)) = state.active.as_ref().map(|s| (s.id, s.mover)) else {
        return;
    };
    match parse_line(line, mover) {
        ParsedLine::Info(info) => {
            if let Some(search) = &state.active {
                let _ = search
                    .records
                    .send(TaggedRecord::new(id, EngineRecord::Info(info)));
            }
        }
        ParsedLine::BestMove(best) => {
            if let Some(search) = state.active.take() {
                let _ = search
                    .records
                    .send(TaggedRecord::new(id, EngineRecord::BestMove(best)));
                if let Some(ack) = search.stop_ack {
                    let _ = ack.send(());
                }
            }
        }
        ParsedLine::Ignored => {}
        ParsedLine::Malformed(reason) => {
            warn!(request = %id, %reason, "dropping malformed engine line");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use kibitz_types::variant::GameVariant;

    pub(crate) type Script = Box<dyn Fn(&str) -> Vec<String> + Send + Sync>;

    /// Sink that records every line and lets a script answer them.
    pub(crate) struct ScriptedSink {
        pub sent: Arc<Mutex<Vec<String>>>,
        pub replies: mpsc::UnboundedSender<String>,
        pub script: Script,
    }

    #[async_trait]
    impl CommandSink for ScriptedSink {
        async fn send_line(&self, line: &str) -> Result<()> {
            self.sent.lock().unwrap().push(line.to_string());
            for reply in (self.script)(line) {
                let _ = self.replies.send(reply);
            }
            Ok(())
        }
    }

    pub(crate) fn request(mover: Side) -> AnalysisRequest {
        AnalysisRequest {
            id: RequestId::new(),
            fingerprint: "fp".into(),
            fen: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".into(),
            start_fen: None,
            moves: Vec::new(),
            mover,
            time_ms: 100,
            multipv: 2,
            variant: GameVariant::Chess,
        }
    }

    fn driver(script: Script) -> (UciDriver, Arc<Mutex<Vec<String>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = ScriptedSink {
            sent: sent.clone(),
            replies: tx,
            script,
        };
        let driver = UciDriver::spawn(
            Box::new(sink),
            rx,
            DriverTimeouts::from_millis(500, 500),
        );
        (driver, sent)
    }

    fn search_script() -> Script {
        Box::new(|line: &str| match line {
            "isready" => vec!["readyok".into()],
            l if l.starts_with("go") => vec![
                "info depth 1 multipv 1 score cp 20 pv e2e4 e7e5".into(),
                "info depth 1 multipv 1 score cp 25 lowerbound pv e2e4".into(),
                "bestmove e2e4 ponder e7e5".into(),
            ],
            _ => Vec::new(),
        })
    }

    #[tokio::test]
    async fn handshake_waits_for_reply() {
        let (driver, sent) = driver(search_script());
        driver
            .expect(EngineCommand::IsReady, "readyok")
            .await
            .expect("readyok");
        assert_eq!(sent.lock().unwrap().as_slice(), ["isready"]);
    }

    #[tokio::test]
    async fn handshake_times_out_without_reply() {
        let (driver, _) = driver(Box::new(|_: &str| Vec::new()));
        assert!(driver.expect(EngineCommand::Uci, "uciok").await.is_err());
    }

    #[tokio::test]
    async fn stream_ends_after_best_move() {
        let (driver, _) = driver(search_script());
        let req = request(Side::Black);
        let records: Vec<_> = driver.analyze(&req).await.expect("analyze").collect().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.request == req.id));
        match &records[0].record {
            EngineRecord::Info(info) => {
                assert_eq!(info.score, kibitz_types::analysis::Score::Centipawns(-20))
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert!(matches!(records[1].record, EngineRecord::BestMove(_)));
        assert!(!driver.is_searching());
    }

    /// Searches until stopped; an idle engine ignores `stop`.
    fn endless_script() -> Script {
        let searching = AtomicBool::new(false);
        Box::new(move |line: &str| match line {
            l if l.starts_with("go") => {
                searching.store(true, Ordering::SeqCst);
                vec!["info depth 1 multipv 1 score cp 5 pv d2d4".into()]
            }
            "stop" if searching.swap(false, Ordering::SeqCst) => vec!["bestmove d2d4".into()],
            _ => Vec::new(),
        })
    }

    #[tokio::test]
    async fn new_search_stops_previous_first() {
        let (driver, sent) = driver(endless_script());
        let first = request(Side::White);
        let mut first_stream = driver.analyze(&first).await.expect("first");
        let record = first_stream.next().await.expect("info for first");
        assert_eq!(record.request, first.id);

        let second = request(Side::White);
        let mut second_stream = driver.analyze(&second).await.expect("second");

        let tail: Vec<_> = first_stream.collect().await;
        assert!(tail.iter().all(|r| r.request == first.id));
        assert!(tail
            .iter()
            .any(|r| matches!(r.record, EngineRecord::BestMove(_))));

        let record = second_stream.next().await.expect("info for second");
        assert_eq!(record.request, second.id);

        let sent = sent.lock().unwrap().clone();
        let stop_at = sent.iter().rposition(|l| l == "stop").expect("stop sent");
        let position_at = sent
            .iter()
            .rposition(|l| l.starts_with("position"))
            .expect("position sent");
        assert!(stop_at < position_at, "stop must precede position: {sent:?}");
    }

    #[tokio::test]
    async fn late_best_move_of_abandoned_search_is_swallowed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = tx.clone();
        let sink = ScriptedSink {
            sent: Arc::new(Mutex::new(Vec::new())),
            replies: tx,
            script: Box::new(|line: &str| match line {
                l if l.starts_with("go") => {
                    vec!["info depth 1 multipv 1 score cp 5 pv d2d4".into()]
                }
                _ => Vec::new(),
            }),
        };
        let driver = UciDriver::spawn(Box::new(sink), rx, DriverTimeouts::from_millis(500, 50));

        let first = request(Side::White);
        let first_stream = driver.analyze(&first).await.expect("first");
        let second = request(Side::White);
        let second_stream = driver.analyze(&second).await.expect("second");

        let first_records: Vec<_> = first_stream.collect().await;
        assert!(first_records.iter().all(|r| r.request == first.id));

        engine.send("bestmove d2d4".into()).unwrap();
        engine
            .send("info depth 2 multipv 1 score cp 7 pv e2e4".into())
            .unwrap();
        engine.send("bestmove e2e4".into()).unwrap();

        let records: Vec<_> = second_stream.collect().await;
        assert_eq!(records.len(), 2, "{records:?}");
        assert!(records.iter().all(|r| r.request == second.id));
        match &records[0].record {
            EngineRecord::Info(info) => {
                assert_eq!(info.score, kibitz_types::analysis::Score::Centipawns(7))
            }
            other => panic!("unexpected record {other:?}"),
        }
        match &records[1].record {
            EngineRecord::BestMove(best) => assert_eq!(best.mv, "e2e4"),
            other => panic!("unexpected record {other:?}"),
        }
    }
}
