//! Worker actor for processing deliveries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use thumbnailer_core::Delivery;

use crate::broker::BrokerClient;
use crate::error::BrokerError;
use crate::handler::{HandlerResult, MessageHandler};
use crate::messages::{SubscriptionId, WorkerMessage};

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Deliveries handled so far.
    pub processed: u64,
    broker: BrokerClient,
    subscription: SubscriptionId,
    handler: Arc<dyn MessageHandler>,
    poll_interval: Duration,
}

/// Worker actor arguments.
#[derive(Clone)]
pub struct WorkerArgs {
    pub worker_id: String,
    pub broker: BrokerClient,
    pub subscription: SubscriptionId,
    pub handler: Arc<dyn MessageHandler>,
    pub poll_interval: Duration,
}

/// Worker actor that pulls deliveries from the broker one at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        // Start the work loop
        myself.send_message(WorkerMessage::Poll)?;

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            processed: 0,
            broker: args.broker,
            subscription: args.subscription,
            handler: args.handler,
            poll_interval: args.poll_interval,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                let delivery = match state.broker.request(state.subscription).await {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => {
                        let _ = myself.send_after(state.poll_interval, || WorkerMessage::Poll);
                        return Ok(());
                    }
                    Err(BrokerError::NotSubscribed) => {
                        tracing::info!("Worker {} lost its subscription, stopping", state.worker_id);
                        myself.stop(None);
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!("Worker {} failed to poll: {}", state.worker_id, e);
                        let _ = myself.send_after(state.poll_interval, || WorkerMessage::Poll);
                        return Ok(());
                    }
                };

                let outcome = run_handler(state.handler.as_ref(), &delivery).await;

                match &outcome {
                    Ok(_) => tracing::debug!(
                        delivery_id = %delivery.id,
                        job_id = %delivery.message.job_id,
                        "Worker {} handled delivery",
                        state.worker_id
                    ),
                    Err(error) => tracing::warn!(
                        delivery_id = %delivery.id,
                        job_id = %delivery.message.job_id,
                        "Worker {} failed delivery: {}",
                        state.worker_id,
                        error
                    ),
                }

                if let Err(e) = state
                    .broker
                    .ack(state.subscription, delivery.id, outcome)
                    .await
                {
                    tracing::warn!(delivery_id = %delivery.id, "Failed to acknowledge delivery: {}", e);
                }

                state.processed += 1;

                // Keep draining while there is work.
                myself.send_message(WorkerMessage::Poll)?;
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
            "Worker {} stopped after {} deliveries",
            state.worker_id,
            state.processed
        );
        Ok(())
    }
}

/// Run the handler, turning a panic into a failed outcome.
async fn run_handler(handler: &dyn MessageHandler, delivery: &Delivery) -> HandlerResult {
    match AssertUnwindSafe(handler.handle(delivery)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("Handler panicked: {reason}"))
        }
    }
}
