//! Stateless analysis service reached over HTTP.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use kibitz_types::{
    analysis::{AnalysisRequest, RequestId, Score},
    backend::BackendDescriptor,
    board::Side,
    KibitzError, Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    command::EngineOptions,
    engine_error,
    protocol::{BestMove, EngineRecord, InfoRecord, TaggedRecord},
    Backend, RecordStream,
};

#[derive(Debug, Clone, Serialize)]
pub struct RemoteAnalysisRequest {
    pub fen: String,
    pub moves: Option<String>,
    pub time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteLine {
    #[serde(default)]
    pub score: Option<i32>,
    #[serde(default)]
    pub mate: Option<i32>,
    #[serde(default)]
    pub pv: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(default = "first_line")]
    pub multipv: usize,
}

fn first_line() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAnalysis {
    pub bestmove: String,
    #[serde(default)]
    pub threat: Option<String>,
    #[serde(default)]
    pub lines: Vec<RemoteLine>,
}

impl RemoteAnalysis {
    /// Converts the one-shot response into the same records a streaming
    /// backend produces, normalized for `mover`.
    pub fn into_records(self, request: RequestId, mover: Side) -> Vec<TaggedRecord> {
        let mut records = Vec::with_capacity(self.lines.len() + 1);
        for line in self.lines {
            let score = match (line.mate, line.score) {
                (Some(mate), _) => Score::Mate(mate),
                (None, Some(cp)) => Score::Centipawns(cp),
                (None, None) => {
                    warn!(multipv = line.multipv, "remote line without score dropped");
                    continue;
                }
            };
            let info = InfoRecord {
                depth: line.depth,
                index: line.multipv.max(1),
                score: score.normalized(mover),
                pv: line.pv.split_whitespace().map(str::to_string).collect(),
                fields: Vec::new(),
            };
            records.push(TaggedRecord::new(request, EngineRecord::Info(info)));
        }
        records.push(TaggedRecord::new(
            request,
            EngineRecord::BestMove(BestMove {
                mv: self.bestmove,
                ponder: self.threat,
            }),
        ));
        records
    }
}

pub struct RemoteBackend {
    descriptor: BackendDescriptor,
    client: reqwest::Client,
    base_url: String,
    configured: bool,
}

impl RemoteBackend {
    pub fn new(
        descriptor: BackendDescriptor,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| {
                KibitzError::BackendUnavailable(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            descriptor,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            configured: false,
        })
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor
    }

    async fn start(&mut self) -> Result<()> {
        info!(base_url = %self.base_url, "using remote analysis service");
        Ok(())
    }

    /// Sent once; later calls are ignored.
    async fn configure(&mut self, options: &EngineOptions) -> Result<()> {
        if self.configured {
            debug!("remote service already configured");
            return Ok(());
        }
        let url = format!("{}/configure", self.base_url);
        self.client
            .post(&url)
            .json(options)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| {
                KibitzError::BackendUnavailable(format!("remote configure failed: {err}"))
            })?;
        self.configured = true;
        Ok(())
    }

    async fn new_game(&mut self) -> Result<()> {
        Ok(())
    }

    async fn analyze(&mut self, request: &AnalysisRequest) -> Result<RecordStream> {
        if !self.configured {
            return Err(engine_error("remote service used before configure"));
        }
        let client = self.client.clone();
        let url = format!("{}/analyse", self.base_url);
        let body = RemoteAnalysisRequest {
            fen: request.position_fen().to_string(),
            moves: request.moves_text(),
            time: request.time_ms,
        };
        let id = request.id;
        let mover = request.mover;

        let records = stream! {
            let response = client.post(&url).json(&body).send().await;
            let analysis = match response.and_then(|res| res.error_for_status()) {
                Ok(res) => res.json::<RemoteAnalysis>().await,
                Err(err) => Err(err),
            };
            match analysis {
                Ok(analysis) => {
                    for record in analysis.into_records(id, mover) {
                        yield record;
                    }
                }
                Err(err) => warn!(request = %id, "remote analysis failed: {err}"),
            }
        };
        Ok(records.boxed())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_becomes_normalized_records() {
        let analysis: RemoteAnalysis = serde_json::from_value(serde_json::json!({
            "bestmove": "e7e5",
            "threat": "g1f3",
            "lines": [
                {"score": 35, "pv": "e7e5 g1f3", "depth": 20, "multipv": 1},
                {"mate": -4, "pv": "f7f6 d1h5", "depth": 20, "multipv": 2},
                {"pv": "a7a6", "depth": 20, "multipv": 3}
            ]
        }))
        .expect("decode response");

        let id = RequestId::new();
        let records = analysis.into_records(id, Side::Black);
        assert_eq!(records.len(), 3);
        match &records[0].record {
            EngineRecord::Info(info) => {
                assert_eq!(info.score, Score::Centipawns(-35));
                assert_eq!(info.pv, vec!["e7e5", "g1f3"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &records[1].record {
            EngineRecord::Info(info) => assert_eq!(info.score, Score::Mate(4)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            records[2].record,
            EngineRecord::BestMove(BestMove {
                mv: "e7e5".into(),
                ponder: Some("g1f3".into()),
            })
        );
    }

    #[test]
    fn request_body_schema() {
        let body = RemoteAnalysisRequest {
            fen: "start".into(),
            moves: None,
            time: 1500,
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"fen": "start", "moves": null, "time": 1500})
        );
    }

    #[tokio::test]
    async fn analyze_requires_configure() {
        let mut backend = RemoteBackend::new(
            kibitz_types::backend::EngineVariant::Remote.descriptor(),
            "http://127.0.0.1:9",
            Duration::from_millis(200),
        )
        .expect("client");
        backend.start().await.expect("start");
        let request = crate::uci::tests::request(Side::White);
        assert!(backend.analyze(&request).await.is_err());
        assert!(backend
            .configure(&EngineOptions {
                hash_mb: 16,
                threads: 1,
                multipv: 1,
                variant: Default::default(),
            })
            .await
            .unwrap_err()
            .is_backend_unavailable());
    }
}
