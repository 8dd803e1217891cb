use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use kibitz_types::{game::AutomationCommand, Result};
use tracing::{debug, warn};

use crate::{controller_error, record_failure, record_success, ExecutorMetrics, MoveExecutor};

/// Posts each command as JSON to a host-side endpoint that plays it.
pub struct HttpExecutor {
    client: reqwest::Client,
    url: String,
    metrics: Arc<Mutex<ExecutorMetrics>>,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| controller_error(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
            metrics: Arc::new(Mutex::new(ExecutorMetrics::default())),
        })
    }
}

#[async_trait]
impl MoveExecutor for HttpExecutor {
    async fn execute(&self, command: &AutomationCommand) -> Result<()> {
        let start = Instant::now();
        let result = self
            .client
            .post(&self.url)
            .json(command)
            .send()
            .await
            .and_then(|res| res.error_for_status());
        match result {
            Ok(_) => {
                debug!(url = %self.url, "automation command delivered");
                record_success(&self.metrics, start);
                Ok(())
            }
            Err(err) => {
                warn!(url = %self.url, "automation command failed: {err}");
                record_failure(&self.metrics);
                Err(controller_error(format!("executor request failed: {err}")))
            }
        }
    }

    fn metrics(&self) -> ExecutorMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}
