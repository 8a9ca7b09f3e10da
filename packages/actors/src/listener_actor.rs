//! Completion listener: finalizes jobs from terminal broker events.
//!
//! Workers write the terminal status themselves before acknowledging, so the
//! listener normally finds the job terminal and does nothing. It repairs jobs
//! left non-terminal, e.g. when a handler panicked.

use db::repositories::JobRepository;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use thumbnailer_core::{BrokerEvent, JobStatus};
use tokio::sync::broadcast::error::RecvError;

use crate::broker::BrokerClient;
use crate::error::PipelineError;
use crate::messages::{ListenerMessage, ListenerStats};

/// What the listener did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The job was already terminal.
    Unchanged,
    /// The listener moved the job to `status`.
    Finalized(JobStatus),
}

/// Bring a job in line with a terminal event.
pub async fn reconcile_event(
    jobs: &JobRepository,
    event: &BrokerEvent,
) -> Result<Reconciliation, PipelineError> {
    let job_id = event.job_id();
    let job = jobs.get(job_id).await?;
    if job.status.is_terminal() {
        return Ok(Reconciliation::Unchanged);
    }

    let updated = match event {
        BrokerEvent::Completed {
            result: Some(result),
            ..
        } => {
            jobs.set_status(job_id, JobStatus::Complete, Some(result.thumbnail_id))
                .await?
        }
        BrokerEvent::Completed { result: None, .. } => {
            jobs.fail(job_id, "completed without a thumbnail").await?
        }
        BrokerEvent::Failed { error, .. } => jobs.fail(job_id, error.clone()).await?,
    };

    Ok(Reconciliation::Finalized(updated.status))
}

/// State for the listener actor.
pub struct ListenerActorState {
    jobs: JobRepository,
    stats: ListenerStats,
}

/// Listener actor arguments.
pub struct ListenerArgs {
    pub broker: BrokerClient,
    pub jobs: JobRepository,
}

/// Listener actor subscribed to the broker side-channel.
pub struct ListenerActor;

impl Actor for ListenerActor {
    type Msg = ListenerMessage;
    type State = ListenerActorState;
    type Arguments = ListenerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting completion listener");

        let mut events = args.broker.events();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if myself_clone
                            .send_message(ListenerMessage::Event(Box::new(event)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Completion listener missed {} events", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(ListenerActorState {
            jobs: args.jobs,
            stats: ListenerStats::default(),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ListenerMessage::Event(event) => {
                state.stats.seen += 1;
                let job_id = event.job_id();

                match reconcile_event(&state.jobs, &event).await {
                    Ok(Reconciliation::Unchanged) => {}
                    Ok(Reconciliation::Finalized(status)) => {
                        state.stats.repaired += 1;
                        tracing::info!(job_id = %job_id, "Listener finalized job as {}", status);
                    }
                    Err(e) => {
                        tracing::warn!(
                            job_id = %job_id,
                            delivery_id = %event.delivery_id(),
                            "Failed to reconcile event: {}",
                            e
                        );
                    }
                }
            }

            ListenerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats.clone());
            }
        }

        Ok(())
    }
}
