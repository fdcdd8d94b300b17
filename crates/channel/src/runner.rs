use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{
    ChannelEnvelope, ChannelEvent, ChannelReply, ConversationService, EventContext,
    InboundMessage,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport send failed: {0}")]
    Send(String),
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

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the stream closed cleanly.
    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn send(&self, reply: &ChannelReply) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopChannelTransport;

#[async_trait]
impl ChannelTransport for NoopChannelTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, _reply: &ChannelReply) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct QueuedMessage {
    message: InboundMessage,
    ctx: EventContext,
}

struct ThreadQueue {
    sender: mpsc::UnboundedSender<QueuedMessage>,
    worker: JoinHandle<()>,
}

type QueueMap = Arc<Mutex<HashMap<String, ThreadQueue>>>;

fn lock_queues(queues: &QueueMap) -> std::sync::MutexGuard<'_, HashMap<String, ThreadQueue>> {
    match queues.lock() {
        Ok(queues) => queues,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Pumps envelopes from a transport into the conversation service.
///
/// Each sender gets its own queue and worker, so replies to one sender go out
/// in arrival order while other senders are served in parallel. A worker that
/// sees no message for `idle_worker` exits.
pub struct ChannelRunner {
    transport: Arc<dyn ChannelTransport>,
    service: Arc<dyn ConversationService>,
    reconnect_policy: ReconnectPolicy,
    idle_worker: Duration,
    queues: QueueMap,
}

impl ChannelRunner {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        service: Arc<dyn ConversationService>,
        reconnect_policy: ReconnectPolicy,
        idle_worker: Duration,
    ) -> Self {
        Self {
            transport,
            service,
            reconnect_policy,
            idle_worker,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs until the transport stream closes or retries are exhausted, then
    /// waits for queued messages to be answered.
    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => break,
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "channel transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "channel retries exhausted; continuing process without crash"
                        );
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    pub fn active_queues(&self) -> usize {
        lock_queues(&self.queues).len()
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening channel transport connection");
        self.transport.connect().await?;
        info!(attempt, "channel transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "channel transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            info!(
                event_name = "ingress.channel.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                "received channel envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.channel.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge channel envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.channel.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    "acknowledged channel envelope"
                );
            }

            let ChannelEvent::Message(message) = envelope.event else {
                continue;
            };
            if let Err(reason) = message.accept() {
                debug!(
                    event_name = "ingress.channel.message_ignored",
                    envelope_id = %envelope.envelope_id,
                    reason = reason.as_str(),
                    "ignoring channel message"
                );
                continue;
            }

            let ctx = EventContext { correlation_id: envelope.envelope_id.clone() };
            self.enqueue(message, ctx);
        }
    }

    fn enqueue(&self, message: InboundMessage, ctx: EventContext) {
        let mut queues = lock_queues(&self.queues);
        let key = message.sender_id.clone();
        let mut queued = QueuedMessage { message, ctx };

        if let Some(queue) = queues.get(&key) {
            match queue.sender.send(queued) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => queued = returned,
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive until the worker starts, so this cannot fail.
        let _ = sender.send(queued);
        let worker = tokio::spawn(run_worker(
            key.clone(),
            receiver,
            self.queues.clone(),
            self.service.clone(),
            self.transport.clone(),
            self.idle_worker,
        ));
        queues.insert(key, ThreadQueue { sender, worker });
    }

    async fn drain(&self) {
        let workers = lock_queues(&self.queues)
            .drain()
            .map(|(_, queue)| queue.worker)
            .collect::<Vec<_>>();

        for worker in workers {
            if let Err(error) = worker.await {
                warn!(error = %error, "channel worker ended abnormally");
            }
        }
    }
}

async fn run_worker(
    key: String,
    mut receiver: mpsc::UnboundedReceiver<QueuedMessage>,
    queues: QueueMap,
    service: Arc<dyn ConversationService>,
    transport: Arc<dyn ChannelTransport>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, receiver.recv()).await {
            Ok(Some(queued)) => deliver(queued, service.as_ref(), transport.as_ref()).await,
            Ok(None) => return,
            Err(_) => {
                // Messages are enqueued under the same lock, so an empty queue
                // here stays empty once the entry is gone.
                let mut queues = lock_queues(&queues);
                if receiver.is_empty() {
                    queues.remove(&key);
                    debug!(event_name = "channel.worker_idle_exit", thread_id = %key, "queue worker exited");
                    return;
                }
            }
        }
    }
}

async fn deliver(
    queued: QueuedMessage,
    service: &dyn ConversationService,
    transport: &dyn ChannelTransport,
) {
    let text = service.respond(&queued.message, &queued.ctx).await;
    if text.is_empty() {
        return;
    }

    let reply = ChannelReply { recipient: queued.message.sender_id.clone(), text };
    match transport.send(&reply).await {
        Ok(()) => info!(
            event_name = "egress.channel.reply_sent",
            correlation_id = %queued.ctx.correlation_id,
            thread_id = %reply.recipient,
            "reply sent"
        ),
        Err(error) => warn!(
            event_name = "egress.channel.reply_failed",
            correlation_id = %queued.ctx.correlation_id,
            thread_id = %reply.recipient,
            error = %error,
            "failed to send reply"
        ),
    }
}
