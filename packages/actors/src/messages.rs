//! Message types for actor communication.

use std::collections::HashSet;

use ractor::RpcReplyPort;
use thumbnailer_core::{BrokerEvent, Delivery, DeliveryId, JobId, JobMessage};

use crate::error::{BrokerError, PipelineError};
use crate::handler::HandlerResult;

/// Identifies the active broker subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome reported when acknowledging a delivery.
pub type AckOutcome = HandlerResult;

/// Broker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub queued: usize,
    pub in_flight: usize,
    pub acked: u64,
    pub failed: u64,
    pub subscribed: bool,
}

/// Messages for the BrokerActor.
#[derive(Debug)]
pub enum BrokerMessage {
    /// Append a message to the log and the FIFO.
    Enqueue {
        message: JobMessage,
        reply: RpcReplyPort<Result<Delivery, BrokerError>>,
    },

    /// Register the single consumer.
    Subscribe {
        consumer: String,
        concurrency: u32,
        reply: RpcReplyPort<Result<SubscriptionId, BrokerError>>,
    },

    /// Drop the subscription and return in-flight deliveries to the queue.
    Unsubscribe {
        subscription: SubscriptionId,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },

    /// Hand out the next delivery, if any and if under the concurrency limit.
    Request {
        subscription: SubscriptionId,
        reply: RpcReplyPort<Result<Option<Delivery>, BrokerError>>,
    },

    /// Acknowledge a delivery with its outcome.
    Ack {
        subscription: SubscriptionId,
        delivery_id: DeliveryId,
        outcome: AckOutcome,
        reply: RpcReplyPort<Result<BrokerEvent, BrokerError>>,
    },

    /// Jobs that still have a message in the durable log.
    LoggedJobIds {
        reply: RpcReplyPort<Result<HashSet<JobId>, BrokerError>>,
    },

    /// Get broker stats.
    GetStats { reply: RpcReplyPort<BrokerStats> },
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ask the broker for work.
    Poll,
}

/// Counters kept by the completion listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Events received.
    pub seen: u64,
    /// Jobs the listener had to finalize itself.
    pub repaired: u64,
}

/// Messages for the ListenerActor.
#[derive(Debug)]
pub enum ListenerMessage {
    /// A terminal notification from the broker.
    Event(Box<BrokerEvent>),

    /// Get listener stats.
    GetStats { reply: RpcReplyPort<ListenerStats> },
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Re-enqueue orphaned pending jobs now.
    Sweep {
        reply: Option<RpcReplyPort<Result<usize, PipelineError>>>,
    },

    /// Number of live workers.
    WorkerCount { reply: RpcReplyPort<usize> },

    /// Counters of the completion listener.
    ListenerStats {
        reply: RpcReplyPort<Option<ListenerStats>>,
    },

    /// Stop workers and listener, then the supervisor itself.
    Shutdown { reply: RpcReplyPort<()> },

    /// Periodic tick for housekeeping.
    Tick,
}
