//! Supervisor actor for the worker pool, the listener and the sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::Database;
use db::repositories::{ImageRepository, JobRepository, MessageRepository, ThumbnailRepository};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use storage::Storage;
use thumbnailer_core::{JobMessage, PipelineConfig};
use tokio::task::JoinHandle;

use crate::broker::BrokerClient;
use crate::collaborators::{ImageIngest, ImageStore, StoredImageStore, ThumbnailGenerator};
use crate::error::{BrokerError, PipelineError};
use crate::handler::MessageHandler;
use crate::listener_actor::{ListenerActor, ListenerArgs};
use crate::messages::{ListenerMessage, ListenerStats, SubscriptionId, SupervisorMessage, WorkerMessage};
use crate::pipeline::ThumbnailPipeline;
use crate::producer::Producer;
use crate::worker_actor::{WorkerActor, WorkerArgs};

const CONSUMER_NAME: &str = "thumbnail-workers";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// State for the supervisor actor.
pub struct SupervisorState {
    broker: BrokerClient,
    jobs: JobRepository,
    handler: Arc<dyn MessageHandler>,
    config: PipelineConfig,
    subscription: SubscriptionId,
    /// Live workers by actor id.
    workers: HashMap<ActorId, ActorRef<WorkerMessage>>,
    listener: Option<ActorRef<ListenerMessage>>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
    stopping: bool,
}

impl SupervisorState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("worker-{}", self.worker_counter)
    }

    fn worker_args(&mut self) -> WorkerArgs {
        WorkerArgs {
            worker_id: self.next_worker_id(),
            broker: self.broker.clone(),
            subscription: self.subscription,
            handler: self.handler.clone(),
            poll_interval: self.config.poll_interval(),
        }
    }

    /// Re-enqueue pending jobs older than the stale threshold that have no
    /// message in the broker log.
    async fn sweep(&self) -> Result<usize, PipelineError> {
        let cutoff = chrono::Duration::from_std(self.config.stale_pending())
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self.jobs.list_stale_pending(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let logged = self.broker.logged_job_ids().await?;
        let mut requeued = 0;
        for job in stale.into_iter().filter(|job| !logged.contains(&job.id)) {
            self.broker.enqueue(JobMessage::new(job.id)).await?;
            tracing::info!(job_id = %job.id, "Re-enqueued orphaned pending job");
            requeued += 1;
        }

        Ok(requeued)
    }
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let args = state.worker_args();
    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;
    state.workers.insert(worker.get_id(), worker);
    Ok(())
}

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub broker: BrokerClient,
    pub jobs: JobRepository,
    pub handler: Arc<dyn MessageHandler>,
    pub config: PipelineConfig,
}

/// Supervisor actor that owns the worker pool and the listener.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting thumbnail supervisor with {} workers",
            args.config.concurrency
        );

        let subscription = args
            .broker
            .subscribe(CONSUMER_NAME, args.config.concurrency)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to subscribe: {}", e)))?;

        let mut state = SupervisorState {
            broker: args.broker,
            jobs: args.jobs,
            handler: args.handler,
            config: args.config,
            subscription,
            workers: HashMap::new(),
            listener: None,
            worker_counter: 0,
            stopping: false,
        };

        // The listener subscribes before any worker can acknowledge.
        let listener_args = ListenerArgs {
            broker: state.broker.clone(),
            jobs: state.jobs.clone(),
        };
        let (listener, _handle) =
            Actor::spawn_linked(None, ListenerActor, listener_args, myself.get_cell())
                .await
                .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn listener: {}", e)))?;
        state.listener = Some(listener);

        for _ in 0..state.config.concurrency.max(1) {
            spawn_worker(&myself, &mut state).await?;
        }

        // Start periodic tick
        let myself_clone = myself.clone();
        let period = state.config.sweep_interval().max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Tick => {
                if state.stopping {
                    return Ok(());
                }
                match state.sweep().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Sweep re-enqueued {} jobs", n),
                    Err(e) => tracing::warn!("Sweep failed: {}", e),
                }
            }

            SupervisorMessage::Sweep { reply } => {
                let result = state.sweep().await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!("Sweep failed: {}", e);
                        }
                    }
                }
            }

            SupervisorMessage::WorkerCount { reply } => {
                let _ = reply.send(state.workers.len());
            }

            SupervisorMessage::ListenerStats { reply } => {
                let stats = match &state.listener {
                    Some(listener) => match ractor::rpc::call(
                        listener,
                        |reply| ListenerMessage::GetStats { reply },
                        Some(SHUTDOWN_TIMEOUT),
                    )
                    .await
                    {
                        Ok(CallResult::Success(stats)) => Some(stats),
                        _ => None,
                    },
                    None => None,
                };
                let _ = reply.send(stats);
            }

            SupervisorMessage::Shutdown { reply } => {
                tracing::info!("Shutting down thumbnail supervisor");
                state.stopping = true;

                // Workers finish their current delivery before stopping.
                for (_, worker) in state.workers.drain() {
                    if let Err(e) = worker.stop_and_wait(None, Some(SHUTDOWN_TIMEOUT)).await {
                        tracing::warn!("Worker did not stop cleanly: {}", e);
                    }
                }
                if let Some(listener) = state.listener.take()
                    && let Err(e) = listener.stop_and_wait(None, Some(SHUTDOWN_TIMEOUT)).await
                {
                    tracing::warn!("Listener did not stop cleanly: {}", e);
                }
                if let Err(e) = state.broker.unsubscribe(state.subscription).await {
                    tracing::warn!("Failed to unsubscribe: {}", e);
                }

                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if state.workers.remove(&cell.get_id()).is_some() && !state.stopping {
                    tracing::info!("Worker {} terminated: {:?}", cell.get_id(), reason);
                }
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                let was_worker = state.workers.remove(&cell.get_id()).is_some();
                if was_worker && !state.stopping {
                    tracing::warn!("Worker {} failed: {}, restarting", cell.get_id(), err);
                    spawn_worker(&myself, state).await?;
                } else if !was_worker {
                    tracing::warn!("Child actor {} failed: {}", cell.get_id(), err);
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Everything the pipeline needs from the outside.
pub struct PipelineDeps {
    pub db: Database,
    pub storage: Storage,
    pub images: Arc<dyn ImageStore>,
    pub generator: Arc<dyn ThumbnailGenerator>,
}

impl PipelineDeps {
    /// Images come from the image table and blob storage.
    pub fn stored(db: Database, storage: Storage, generator: Arc<dyn ThumbnailGenerator>) -> Self {
        let images = StoredImageStore::new(ImageRepository::new(db.clone()), storage.clone());
        Self {
            db,
            storage,
            images: Arc::new(images),
            generator,
        }
    }
}

/// A running pipeline: broker, supervisor, workers and listener.
pub struct Pipeline {
    broker: BrokerClient,
    producer: Producer,
    ingest: ImageIngest,
    supervisor: ActorRef<SupervisorMessage>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn broker(&self) -> &BrokerClient {
        &self.broker
    }

    pub fn ingest(&self) -> &ImageIngest {
        &self.ingest
    }

    /// Run the reconciliation sweep now and return how many jobs it
    /// re-enqueued.
    pub async fn sweep_now(&self) -> Result<usize, PipelineError> {
        match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::Sweep { reply: Some(reply) },
            Some(SHUTDOWN_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(result)) => result,
            _ => Err(BrokerError::Unavailable("supervisor did not answer".into()).into()),
        }
    }

    pub async fn worker_count(&self) -> usize {
        match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::WorkerCount { reply },
            Some(SHUTDOWN_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(count)) => count,
            _ => 0,
        }
    }

    /// Listener counters, if the listener is running.
    pub async fn listener_stats(&self) -> Option<ListenerStats> {
        match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::ListenerStats { reply },
            Some(SHUTDOWN_TIMEOUT),
        )
        .await
        {
            Ok(CallResult::Success(stats)) => stats,
            _ => None,
        }
    }

    /// Stop workers after their current delivery, then the listener and
    /// the broker.
    pub async fn shutdown(self) {
        let stopped = ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::Shutdown { reply },
            Some(SHUTDOWN_TIMEOUT * 2),
        )
        .await;
        if !matches!(stopped, Ok(CallResult::Success(()))) {
            tracing::warn!("Supervisor did not confirm shutdown");
            self.supervisor.stop(None);
        }

        self.broker.stop().await;
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("Thumbnail pipeline stopped");
    }
}

/// Start the supervisor with an arbitrary handler.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor, args).await
}

/// Start the broker, the thumbnail pipeline handler and the supervisor.
pub async fn start_pipeline(
    deps: PipelineDeps,
    config: PipelineConfig,
) -> Result<Pipeline, PipelineError> {
    let (broker, broker_handle) = BrokerClient::start(
        MessageRepository::new(deps.db.clone()),
        config.event_capacity,
    )
    .await?;

    let jobs = JobRepository::new(deps.db.clone());
    let handler = ThumbnailPipeline::new(
        jobs.clone(),
        ThumbnailRepository::new(deps.db.clone()),
        deps.images,
        deps.generator,
        deps.storage.clone(),
        &config,
    );

    let args = SupervisorArgs {
        broker: broker.clone(),
        jobs: jobs.clone(),
        handler: Arc::new(handler),
        config,
    };
    let (supervisor, supervisor_handle) = match start_supervisor(args).await {
        Ok(spawned) => spawned,
        Err(e) => {
            broker.stop().await;
            return Err(BrokerError::Unavailable(format!("Failed to start supervisor: {}", e)).into());
        }
    };

    Ok(Pipeline {
        producer: Producer::new(jobs, broker.clone()),
        ingest: ImageIngest::new(ImageRepository::new(deps.db), deps.storage),
        broker,
        supervisor,
        handles: vec![supervisor_handle, broker_handle],
    })
}
