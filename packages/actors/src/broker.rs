//! Client handle for the broker actor.

use std::collections::HashSet;
use std::time::Duration;

use db::repositories::MessageRepository;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use thumbnailer_core::{BrokerEvent, Delivery, DeliveryId, JobId, JobMessage};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::broker_actor::{BrokerActor, BrokerArgs};
use crate::error::BrokerError;
use crate::messages::{AckOutcome, BrokerMessage, BrokerStats, SubscriptionId};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle to a running broker.
///
/// Created once at startup and passed to the producer, the supervisor and
/// anything else that needs the broker.
#[derive(Clone)]
pub struct BrokerClient {
    actor: ActorRef<BrokerMessage>,
    event_tx: broadcast::Sender<BrokerEvent>,
}

impl BrokerClient {
    /// Spawn a broker over `log`, replaying unacknowledged messages.
    pub async fn start(
        log: MessageRepository,
        event_capacity: usize,
    ) -> Result<(Self, JoinHandle<()>), BrokerError> {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        let args = BrokerArgs {
            log,
            event_tx: event_tx.clone(),
        };

        let (actor, handle) = Actor::spawn(None, BrokerActor, args)
            .await
            .map_err(|e| BrokerError::Unavailable(format!("Failed to spawn broker: {}", e)))?;

        Ok((Self { actor, event_tx }, handle))
    }

    async fn call<T, F>(&self, build: F) -> Result<T, BrokerError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> BrokerMessage,
    {
        match ractor::rpc::call(&self.actor, build, Some(CALL_TIMEOUT)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(BrokerError::Unavailable("call timed out".into())),
            Ok(CallResult::SenderError) => {
                Err(BrokerError::Unavailable("broker dropped the reply".into()))
            }
            Err(e) => Err(BrokerError::Unavailable(e.to_string())),
        }
    }

    /// Persist and queue a message.
    pub async fn enqueue(&self, message: JobMessage) -> Result<Delivery, BrokerError> {
        self.call(|reply| BrokerMessage::Enqueue { message, reply })
            .await?
    }

    /// Register the single consumer. Fails with `AlreadySubscribed` while
    /// another subscription is active.
    pub async fn subscribe(
        &self,
        consumer: impl Into<String>,
        concurrency: u32,
    ) -> Result<SubscriptionId, BrokerError> {
        let consumer = consumer.into();
        self.call(|reply| BrokerMessage::Subscribe {
            consumer,
            concurrency,
            reply,
        })
        .await?
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), BrokerError> {
        self.call(|reply| BrokerMessage::Unsubscribe {
            subscription,
            reply,
        })
        .await?
    }

    /// Next delivery for the subscription, or `None` when the queue is
    /// empty or the concurrency limit is reached.
    pub async fn request(
        &self,
        subscription: SubscriptionId,
    ) -> Result<Option<Delivery>, BrokerError> {
        self.call(|reply| BrokerMessage::Request {
            subscription,
            reply,
        })
        .await?
    }

    /// Acknowledge a delivery. The message leaves the durable log and the
    /// terminal event is published; that event is also returned.
    pub async fn ack(
        &self,
        subscription: SubscriptionId,
        delivery_id: DeliveryId,
        outcome: AckOutcome,
    ) -> Result<BrokerEvent, BrokerError> {
        self.call(|reply| BrokerMessage::Ack {
            subscription,
            delivery_id,
            outcome,
            reply,
        })
        .await?
    }

    /// Subscribe to terminal notifications.
    pub fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.event_tx.subscribe()
    }

    /// Jobs that still have a message in the durable log.
    pub async fn logged_job_ids(&self) -> Result<HashSet<JobId>, BrokerError> {
        self.call(|reply| BrokerMessage::LoggedJobIds { reply })
            .await?
    }

    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        self.call(|reply| BrokerMessage::GetStats { reply }).await
    }

    /// Stop the broker and wait for it to exit.
    pub async fn stop(&self) {
        if let Err(e) = self.actor.stop_and_wait(None, Some(CALL_TIMEOUT)).await {
            tracing::warn!("Broker did not stop cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::error::Error;

    use db::DbConfig;
    use thumbnailer_core::JobId;

    use super::*;

    #[tokio::test]
    async fn unanswered_request_returns_delivery_to_queue() -> Result<(), Box<dyn Error>> {
        let db = db::init(&DbConfig::memory()).await?;
        let (broker, _handle) = BrokerClient::start(MessageRepository::new(db), 16).await?;
        let sub = broker.subscribe("workers", 1).await?;
        let job_id = JobId::new();
        let queued = broker.enqueue(JobMessage::new(job_id)).await?;

        // The requester is gone before the broker answers.
        let (tx, rx) = ractor::concurrency::oneshot();
        drop(rx);
        broker.actor.cast(BrokerMessage::Request {
            subscription: sub,
            reply: tx.into(),
        })
        .map_err(|e| e.to_string())?;

        let delivery = broker.request(sub).await?.ok_or("delivery was lost")?;
        assert_eq!(delivery.id, queued.id);
        assert_eq!(delivery.message.job_id, job_id);

        let stats = broker.stats().await?;
        assert_eq!((stats.queued, stats.in_flight), (0, 1));

        broker.stop().await;
        Ok(())
    }
}
