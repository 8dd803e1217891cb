//! Publication of session events to visualization clients.

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use kibitz_types::{events::SessionEvent, Result};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn run(&self) -> Result<()>;
    async fn publish(&self, event: SessionEvent) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, SessionEvent>;
}

/// In-process hub backed by a broadcast channel. Slow subscribers skip the
/// events they fell behind on.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for EventHub {
    async fn run(&self) -> Result<()> {
        info!("event hub ready");
        Ok(())
    }

    async fn publish(&self, event: SessionEvent) -> Result<()> {
        if self.tx.send(event).is_err() {
            debug!("event dropped, no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, SessionEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(err) => {
                        warn!("subscriber lagged: {err}");
                        None
                    }
                }
            })
            .boxed()
    }
}
