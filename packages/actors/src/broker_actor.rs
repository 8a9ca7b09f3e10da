//! Broker actor: a durable FIFO of job messages with a single consumer.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use db::repositories::MessageRepository;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use thumbnailer_core::{BrokerEvent, Delivery, DeliveryId, JobMessage};
use tokio::sync::broadcast;

use crate::error::BrokerError;
use crate::messages::{AckOutcome, BrokerMessage, BrokerStats, SubscriptionId};

/// The active consumer.
#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    consumer: String,
    concurrency: usize,
}

/// State for the broker actor.
pub struct BrokerActorState {
    /// Durable log of unacknowledged messages.
    log: MessageRepository,
    /// Deliveries waiting for a worker, in sequence order.
    queue: VecDeque<Delivery>,
    /// Deliveries handed out and not yet acknowledged.
    in_flight: HashMap<DeliveryId, Delivery>,
    next_seq: u64,
    subscription: Option<Subscription>,
    subscription_counter: u64,
    /// Terminal notification side-channel.
    event_tx: broadcast::Sender<BrokerEvent>,
    acked: u64,
    failed: u64,
}

impl BrokerActorState {
    fn stats(&self) -> BrokerStats {
        BrokerStats {
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            acked: self.acked,
            failed: self.failed,
            subscribed: self.subscription.is_some(),
        }
    }

    fn check_subscription(&self, id: SubscriptionId) -> Result<&Subscription, BrokerError> {
        self.subscription
            .as_ref()
            .filter(|s| s.id == id)
            .ok_or(BrokerError::NotSubscribed)
    }

    /// A job whose message is still queued or in flight is not enqueued again.
    fn pending_delivery(&self, message: &JobMessage) -> Option<&Delivery> {
        self.queue
            .iter()
            .chain(self.in_flight.values())
            .find(|d| d.message.job_id == message.job_id)
    }

    async fn enqueue(&mut self, message: JobMessage) -> Result<Delivery, BrokerError> {
        if let Some(existing) = self.pending_delivery(&message) {
            tracing::debug!(delivery_id = %existing.id, job_id = %message.job_id, "Message already pending");
            return Ok(existing.clone());
        }

        let seq = self.next_seq;
        let stored = self.log.append(seq, &message).await?;
        self.next_seq += 1;

        let delivery = Delivery {
            id: stored.delivery_id(),
            message,
            redelivered: false,
            enqueued_at: stored.enqueued_at,
        };
        self.queue.push_back(delivery.clone());

        tracing::debug!(delivery_id = %delivery.id, job_id = %message.job_id, "Enqueued message");
        Ok(delivery)
    }

    fn next_delivery(&mut self, id: SubscriptionId) -> Result<Option<Delivery>, BrokerError> {
        let concurrency = self.check_subscription(id)?.concurrency;
        if self.in_flight.len() >= concurrency {
            return Ok(None);
        }

        let Some(delivery) = self.queue.pop_front() else {
            return Ok(None);
        };
        self.in_flight.insert(delivery.id, delivery.clone());

        tracing::debug!(
            delivery_id = %delivery.id,
            job_id = %delivery.message.job_id,
            redelivered = delivery.redelivered,
            "Delivering message"
        );
        Ok(Some(delivery))
    }

    async fn ack(
        &mut self,
        id: SubscriptionId,
        delivery_id: DeliveryId,
        outcome: AckOutcome,
    ) -> Result<BrokerEvent, BrokerError> {
        self.check_subscription(id)?;
        let delivery = self
            .in_flight
            .remove(&delivery_id)
            .ok_or(BrokerError::UnknownDelivery(delivery_id))?;

        // A row left behind is redelivered after a restart, where the
        // handler's duplicate guard absorbs it.
        if let Err(e) = self.log.remove(delivery_id.0).await {
            tracing::warn!(delivery_id = %delivery_id, "Failed to remove acknowledged message: {}", e);
        }

        let job_id = delivery.message.job_id;
        let timestamp = Utc::now();
        let event = match outcome {
            Ok(result) => {
                self.acked += 1;
                BrokerEvent::Completed {
                    delivery_id,
                    job_id,
                    result,
                    timestamp,
                }
            }
            Err(error) => {
                self.failed += 1;
                BrokerEvent::Failed {
                    delivery_id,
                    job_id,
                    error,
                    timestamp,
                }
            }
        };

        tracing::debug!(delivery_id = %delivery_id, "{}", event.description());
        let _ = self.event_tx.send(event.clone());
        Ok(event)
    }

    /// Put a delivery whose requester never received it back at the head
    /// of the queue.
    fn return_delivery(&mut self, delivery_id: DeliveryId) {
        if let Some(delivery) = self.in_flight.remove(&delivery_id) {
            tracing::warn!(delivery_id = %delivery_id, "Requester went away, returning delivery to the queue");
            self.queue.push_front(delivery);
        }
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), BrokerError> {
        let subscription = self.check_subscription(id)?.clone();
        self.subscription = None;

        let mut returned: Vec<Delivery> = self.in_flight.drain().map(|(_, d)| d).collect();
        returned.sort_by_key(|d| d.id);
        for delivery in returned.into_iter().rev() {
            self.queue.push_front(delivery);
        }

        tracing::info!("Consumer {} unsubscribed", subscription.consumer);
        Ok(())
    }
}

/// Broker actor arguments.
pub struct BrokerArgs {
    pub log: MessageRepository,
    pub event_tx: broadcast::Sender<BrokerEvent>,
}

/// Broker actor that owns the FIFO and the durable log.
pub struct BrokerActor;

impl Actor for BrokerActor {
    type Msg = BrokerMessage;
    type State = BrokerActorState;
    type Arguments = BrokerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let stored = args
            .log
            .list()
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to load broker log: {}", e)))?;

        let next_seq = stored.last().map_or(1, |m| m.seq + 1);
        let queue: VecDeque<Delivery> = stored
            .into_iter()
            .map(|m| Delivery {
                id: m.delivery_id(),
                message: m.message(),
                redelivered: true,
                enqueued_at: m.enqueued_at,
            })
            .collect();

        tracing::info!(
            "Starting message broker ({} unacknowledged messages)",
            queue.len()
        );

        Ok(BrokerActorState {
            log: args.log,
            queue,
            in_flight: HashMap::new(),
            next_seq,
            subscription: None,
            subscription_counter: 0,
            event_tx: args.event_tx,
            acked: 0,
            failed: 0,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::Enqueue { message, reply } => {
                let _ = reply.send(state.enqueue(message).await);
            }

            BrokerMessage::Subscribe {
                consumer,
                concurrency,
                reply,
            } => {
                if let Some(active) = &state.subscription {
                    let _ = reply.send(Err(BrokerError::AlreadySubscribed(active.consumer.clone())));
                    return Ok(());
                }

                state.subscription_counter += 1;
                let id = SubscriptionId(state.subscription_counter);
                tracing::info!("Consumer {} subscribed (concurrency {})", consumer, concurrency);
                state.subscription = Some(Subscription {
                    id,
                    consumer,
                    concurrency: concurrency.max(1) as usize,
                });
                let _ = reply.send(Ok(id));
            }

            BrokerMessage::Unsubscribe {
                subscription,
                reply,
            } => {
                let _ = reply.send(state.unsubscribe(subscription));
            }

            BrokerMessage::Request {
                subscription,
                reply,
            } => {
                let next = state.next_delivery(subscription);
                let handed_out = match &next {
                    Ok(Some(delivery)) => Some(delivery.id),
                    _ => None,
                };
                if reply.send(next).is_err() {
                    if let Some(delivery_id) = handed_out {
                        state.return_delivery(delivery_id);
                    }
                }
            }

            BrokerMessage::Ack {
                subscription,
                delivery_id,
                outcome,
                reply,
            } => {
                let _ = reply.send(state.ack(subscription, delivery_id, outcome).await);
            }

            BrokerMessage::LoggedJobIds { reply } => {
                let _ = reply.send(state.log.job_ids().await.map_err(BrokerError::from));
            }

            BrokerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Message broker stopped ({} queued, {} in flight)",
            state.queue.len(),
            state.in_flight.len()
        );
        Ok(())
    }
}
