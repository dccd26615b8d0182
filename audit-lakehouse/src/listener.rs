//! AuditQueueListener: bounded-concurrency queue consumer
//!
//! One listener per event type. Each delivery is handled on its own task,
//! at most `max_concurrent_handlers` at once, and answered on its ack
//! channel: `Ok(id)` to delete the message, `Err(reason)` to leave it for
//! redrive. Nothing is retried here.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::event::{AuditEventType, InboundMessage};
use crate::router::IngestionRouter;

/// Handler verdict for one delivery
pub type Ack = std::result::Result<String, String>;

/// A message plus the channel its verdict goes back on
#[derive(Debug)]
pub struct QueueDelivery {
    pub message: InboundMessage,
    pub ack: oneshot::Sender<Ack>,
}

impl QueueDelivery {
    pub fn new(message: InboundMessage) -> (Self, oneshot::Receiver<Ack>) {
        let (ack, rx) = oneshot::channel();
        (Self { message, ack }, rx)
    }
}

pub struct AuditQueueListener {
    event_type: AuditEventType,
    router: Arc<IngestionRouter>,
    max_concurrent_handlers: usize,
}

impl AuditQueueListener {
    pub fn new(
        event_type: AuditEventType,
        router: Arc<IngestionRouter>,
        max_concurrent_handlers: usize,
    ) -> Self {
        Self {
            event_type,
            router,
            max_concurrent_handlers: max_concurrent_handlers.max(1),
        }
    }

    /// Consume until the sender side closes and every handler has finished
    pub fn spawn(self, rx: mpsc::Receiver<QueueDelivery>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: mpsc::Receiver<QueueDelivery>) {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_handlers));
        info!(
            event_type = %self.event_type,
            max_concurrent = self.max_concurrent_handlers,
            "Queue listener started"
        );

        while let Some(delivery) = rx.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let router = Arc::clone(&self.router);
            let event_type = self.event_type;
            tokio::spawn(async move {
                let verdict = match router.handle_message(event_type, &delivery.message).await {
                    Ok(outcome) => Ok(outcome.id().to_string()),
                    Err(e) => {
                        warn!(%event_type, error = %e, "Audit message handling failed");
                        Err(e.to_string())
                    }
                };
                let _ = delivery.ack.send(verdict);
                drop(permit);
            });
        }

        // Drain: wait for in-flight handlers
        let _ = permits
            .acquire_many(self.max_concurrent_handlers as u32)
            .await;
        info!(event_type = %self.event_type, "Queue listener stopped");
    }
}
