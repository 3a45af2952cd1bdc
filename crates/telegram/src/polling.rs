use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::events::{EventContext, EventDispatcher, HandlerResult};
use crate::updates::Update;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport offset commit failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Source of Bot API updates. `acknowledge` commits the offset so the update
/// is not delivered again.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_update(&self) -> Result<Option<Update>, TransportError>;
    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopUpdateTransport;

#[async_trait]
impl UpdateTransport for NoopUpdateTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_update(&self) -> Result<Option<Update>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _update_id: i64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// In-process update feed. The stream ends once every sender is dropped.
pub struct ChannelUpdateTransport {
    receiver: Mutex<mpsc::Receiver<Update>>,
}

impl ChannelUpdateTransport {
    pub fn new(capacity: usize) -> (mpsc::Sender<Update>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver: Mutex::new(receiver) })
    }
}

#[async_trait]
impl UpdateTransport for ChannelUpdateTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_update(&self) -> Result<Option<Update>, TransportError> {
        Ok(self.receiver.lock().await.recv().await)
    }

    async fn acknowledge(&self, _update_id: i64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.receiver.lock().await.close();
        Ok(())
    }
}

/// Pulls updates and hands each one to the dispatcher on its own task, so a
/// slow conversation never holds up other users.
pub struct PollingRunner {
    transport: Arc<dyn UpdateTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl PollingRunner {
    pub fn new(
        transport: Arc<dyn UpdateTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher: Arc::new(dispatcher), reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.telegram.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "update transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            event_name = "ingress.telegram.retries_exhausted",
                            max_retries = self.reconnect_policy.max_retries,
                            "polling retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(event_name = "ingress.telegram.connecting", attempt, "opening update transport");
        self.transport.connect().await?;

        let mut in_flight = JoinSet::new();
        let pumped = self.pump(attempt, &mut in_flight).await;
        while in_flight.join_next().await.is_some() {}
        pumped
    }

    async fn pump(&self, attempt: u32, in_flight: &mut JoinSet<()>) -> Result<(), TransportError> {
        loop {
            while in_flight.try_join_next().is_some() {}

            let Some(update) = self.transport.next_update().await? else {
                info!(attempt, "update stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let context = EventContext::for_update(&update);

            info!(
                event_name = "ingress.telegram.update_received",
                correlation_id = %context.correlation_id,
                update_kind = update.kind().as_str(),
                user_id = update.user_id().unwrap_or_default(),
                "received telegram update"
            );

            if let Err(error) = self.transport.acknowledge(update.update_id).await {
                warn!(
                    event_name = "ingress.telegram.offset_committed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "failed to commit update offset"
                );
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            in_flight.spawn(async move {
                match dispatcher.dispatch(&update, &context).await {
                    Ok(HandlerResult::Processed(outcome)) => debug!(
                        correlation_id = %context.correlation_id,
                        disposition = ?outcome.disposition,
                        "update processed"
                    ),
                    Ok(HandlerResult::Ignored) => debug!(
                        correlation_id = %context.correlation_id,
                        "update ignored"
                    ),
                    Err(error) => warn!(
                        correlation_id = %context.correlation_id,
                        error = %error,
                        "update dispatch failed; continuing polling loop"
                    ),
                }
            });
        }
    }
}
