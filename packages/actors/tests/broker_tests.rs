#![allow(clippy::disallowed_methods)]

mod common;

use actors::{BrokerClient, BrokerError};
use db::repositories::MessageRepository;
use thumbnailer_core::{BrokerEvent, JobId, JobMessage, ThumbnailId, ThumbnailResult};

use common::TestResult;

#[tokio::test]
async fn only_one_subscription_at_a_time() -> TestResult {
    let db = common::setup_db().await?;
    let (broker, _handle) = BrokerClient::start(MessageRepository::new(db), 16).await?;

    let first = broker.subscribe("workers", 1).await?;
    let second = broker.subscribe("intruder", 1).await;
    assert_eq!(second, Err(BrokerError::AlreadySubscribed("workers".into())));

    broker.unsubscribe(first).await?;
    let third = broker.subscribe("workers", 1).await?;
    assert_ne!(first, third);

    // The old subscription can no longer pull.
    assert_eq!(broker.request(first).await, Err(BrokerError::NotSubscribed));

    broker.stop().await;
    Ok(())
}

#[tokio::test]
async fn deliveries_follow_enqueue_order() -> TestResult {
    let db = common::setup_db().await?;
    let (broker, _handle) = BrokerClient::start(MessageRepository::new(db), 16).await?;
    let sub = broker.subscribe("workers", 3).await?;

    let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
    for id in &ids {
        broker.enqueue(JobMessage::new(*id)).await?;
    }

    let mut delivered = Vec::new();
    while let Some(delivery) = broker.request(sub).await? {
        assert!(!delivery.redelivered);
        delivered.push(delivery);
    }

    let order: Vec<JobId> = delivered.iter().map(|d| d.message.job_id).collect();
    assert_eq!(order, ids);
    assert!(delivered.windows(2).all(|w| w[0].id < w[1].id));

    broker.stop().await;
    Ok(())
}

#[tokio::test]
async fn concurrency_limits_in_flight_deliveries() -> TestResult {
    let db = common::setup_db().await?;
    let (broker, _handle) = BrokerClient::start(MessageRepository::new(db), 16).await?;
    let sub = broker.subscribe("workers", 1).await?;

    broker.enqueue(JobMessage::new(JobId::new())).await?;
    broker.enqueue(JobMessage::new(JobId::new())).await?;

    let first = broker.request(sub).await?.ok_or("expected a delivery")?;
    assert!(broker.request(sub).await?.is_none());

    broker.ack(sub, first.id, Ok(None)).await?;
    assert!(broker.request(sub).await?.is_some());

    let stats = broker.stats().await?;
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.acked, 1);

    broker.stop().await;
    Ok(())
}

#[tokio::test]
async fn ack_removes_from_log_and_publishes() -> TestResult {
    let db = common::setup_db().await?;
    let log = MessageRepository::new(db.clone());
    let (broker, _handle) = BrokerClient::start(log.clone(), 16).await?;
    let mut events = broker.events();
    let sub = broker.subscribe("workers", 2).await?;

    let ok_job = JobId::new();
    let bad_job = JobId::new();
    broker.enqueue(JobMessage::new(ok_job)).await?;
    broker.enqueue(JobMessage::new(bad_job)).await?;
    assert_eq!(log.list().await?.len(), 2);

    let ok = broker.request(sub).await?.ok_or("expected a delivery")?;
    let bad = broker.request(sub).await?.ok_or("expected a delivery")?;

    let result = ThumbnailResult {
        thumbnail_id: ThumbnailId::new(),
        size: 42,
    };
    broker.ack(sub, ok.id, Ok(Some(result.clone()))).await?;
    broker.ack(sub, bad.id, Err("decode failed".into())).await?;
    assert!(log.list().await?.is_empty());

    match events.recv().await? {
        BrokerEvent::Completed {
            job_id, result: r, ..
        } => {
            assert_eq!(job_id, ok_job);
            assert_eq!(r, Some(result));
        }
        other => panic!("unexpected event {other:?}"),
    }
    match events.recv().await? {
        BrokerEvent::Failed { job_id, error, .. } => {
            assert_eq!(job_id, bad_job);
            assert_eq!(error, "decode failed");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // A delivery can be acknowledged once.
    assert_eq!(
        broker.ack(sub, ok.id, Ok(None)).await,
        Err(BrokerError::UnknownDelivery(ok.id))
    );

    let stats = broker.stats().await?;
    assert_eq!((stats.acked, stats.failed), (1, 1));

    broker.stop().await;
    Ok(())
}

#[tokio::test]
async fn unacknowledged_messages_survive_restart() -> TestResult {
    let db = common::setup_db().await?;
    let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();

    {
        let (broker, handle) = BrokerClient::start(MessageRepository::new(db.clone()), 16).await?;
        let sub = broker.subscribe("workers", 1).await?;
        for id in &ids {
            broker.enqueue(JobMessage::new(*id)).await?;
        }
        // Handed out but never acknowledged.
        let taken = broker.request(sub).await?.ok_or("expected a delivery")?;
        assert_eq!(taken.message.job_id, ids[0]);
        broker.stop().await;
        handle.await?;
    }

    let (broker, _handle) = BrokerClient::start(MessageRepository::new(db.clone()), 16).await?;
    let sub = broker.subscribe("workers", 3).await?;

    let mut replayed = Vec::new();
    while let Some(delivery) = broker.request(sub).await? {
        assert!(delivery.redelivered);
        replayed.push(delivery.message.job_id);
    }
    assert_eq!(replayed, ids);

    // New messages continue the sequence.
    let fresh = broker.enqueue(JobMessage::new(JobId::new())).await?;
    assert!(fresh.id.0 > 3);
    assert!(!fresh.redelivered);

    broker.stop().await;
    Ok(())
}

#[tokio::test]
async fn pending_job_is_not_enqueued_twice() -> TestResult {
    let db = common::setup_db().await?;
    let log = MessageRepository::new(db);
    let (broker, _handle) = BrokerClient::start(log.clone(), 16).await?;

    let job_id = JobId::new();
    let first = broker.enqueue(JobMessage::new(job_id)).await?;
    let again = broker.enqueue(JobMessage::new(job_id)).await?;
    assert_eq!(first.id, again.id);
    assert_eq!(log.list().await?.len(), 1);
    assert!(broker.logged_job_ids().await?.contains(&job_id));

    // Once acknowledged, the job may be enqueued again.
    let sub = broker.subscribe("workers", 1).await?;
    let delivery = broker.request(sub).await?.ok_or("expected a delivery")?;
    broker.ack(sub, delivery.id, Ok(None)).await?;
    let later = broker.enqueue(JobMessage::new(job_id)).await?;
    assert!(later.id > first.id);

    broker.stop().await;
    Ok(())
}
