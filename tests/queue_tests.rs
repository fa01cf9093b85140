//! Job queue integration tests

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use waflow::db;
use waflow::error::QueueError;
use waflow::queue::{backoff, EnqueueOptions, JobFilter, JobPriority, JobQueue, JobStatus};

const TENANT: &str = "tenant-a";

async fn memory_queue() -> JobQueue {
    JobQueue::new(db::connect_in_memory().await.unwrap())
}

/// File-backed database so several connections race for real
async fn file_queue() -> (JobQueue, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("waflow-queue-{}.db", uuid::Uuid::new_v4()));
    let pool = db::connect(path.to_str().unwrap()).await.unwrap();
    (JobQueue::new(pool), path)
}

#[tokio::test]
async fn retries_back_off_then_fail_terminally() {
    let queue = memory_queue().await;
    let job = queue
        .enqueue(TENANT, "email.send", json!({}), EnqueueOptions::default().max_retries(2))
        .await
        .unwrap();

    // Stored timestamps have millisecond precision
    let mut now = db::from_millis(Utc::now().timestamp_millis());
    let mut previous_retry_at = None;

    for attempt in 1..=3u32 {
        let claimed = queue.dequeue_at("default", now).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.attempts, attempt);

        let status = queue
            .mark_failed_at(&job.id, &format!("smtp down #{}", attempt), now)
            .await
            .unwrap();
        let stored = queue.get_job(TENANT, &job.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some(format!("smtp down #{}", attempt).as_str()));

        if attempt < 3 {
            assert_eq!(status, JobStatus::Retrying);
            assert_eq!(stored.status, JobStatus::Retrying);

            let retry_at = stored.scheduled_at.unwrap();
            assert_eq!(retry_at - now, backoff(attempt));
            if let Some(previous) = previous_retry_at {
                assert!(retry_at > previous);
            }
            previous_retry_at = Some(retry_at);

            // Not due before the backoff elapses
            assert!(queue.dequeue_at("default", now).await.unwrap().is_none());
            now = retry_at;
        } else {
            assert_eq!(status, JobStatus::Failed);
            assert_eq!(stored.status, JobStatus::Failed);
            assert!(stored.failed_at.is_some());
        }
    }

    let far_future = now + Duration::days(1);
    assert!(queue.dequeue_at("default", far_future).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_dequeue_has_a_single_winner() {
    let (queue, path) = file_queue().await;
    queue
        .enqueue(TENANT, "report", json!({ "month": 6 }), EnqueueOptions::default())
        .await
        .unwrap();

    let queue = Arc::new(queue);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move { queue.dequeue("default").await.unwrap() }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn dequeue_orders_by_priority_then_age() {
    let queue = memory_queue().await;
    let first = queue.enqueue(TENANT, "x", json!(1), EnqueueOptions::default()).await.unwrap();
    let second = queue.enqueue(TENANT, "x", json!(2), EnqueueOptions::default()).await.unwrap();
    let urgent = queue
        .enqueue(TENANT, "x", json!(3), EnqueueOptions::default().priority(JobPriority::High))
        .await
        .unwrap();
    let background = queue
        .enqueue(TENANT, "x", json!(4), EnqueueOptions::default().priority(JobPriority::Low))
        .await
        .unwrap();
    queue
        .enqueue(TENANT, "x", json!(5), EnqueueOptions::default().queue("emails"))
        .await
        .unwrap();

    let mut order = Vec::new();
    while let Some(job) = queue.dequeue("default").await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec![urgent.id, first.id, second.id, background.id]);
}

#[tokio::test]
async fn cancel_only_from_pending_or_retrying() {
    let queue = memory_queue().await;

    let pending = queue.enqueue(TENANT, "x", json!({}), EnqueueOptions::default()).await.unwrap();
    queue.cancel(TENANT, &pending.id).await.unwrap();
    let cancelled = queue.get_job(TENANT, &pending.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(queue.dequeue("default").await.unwrap().is_none());

    let processing = queue.enqueue(TENANT, "x", json!({}), EnqueueOptions::default()).await.unwrap();
    queue.dequeue("default").await.unwrap().unwrap();
    let err = queue.cancel(TENANT, &processing.id).await.unwrap_err();
    assert!(matches!(err, QueueError::NotCancellable(_)));
    assert!(err.to_string().contains("not found or not cancellable"));

    queue.mark_failed(&processing.id, "boom").await.unwrap();
    queue.cancel(TENANT, &processing.id).await.unwrap();

    // Other tenants cannot cancel
    let foreign = queue.enqueue("tenant-b", "x", json!({}), EnqueueOptions::default()).await.unwrap();
    assert!(queue.cancel(TENANT, &foreign.id).await.is_err());
    assert!(queue.cancel(TENANT, "missing").await.is_err());
}

#[tokio::test]
async fn completion_stores_result() {
    let queue = memory_queue().await;
    let job = queue.enqueue(TENANT, "export", json!({}), EnqueueOptions::default()).await.unwrap();
    queue.dequeue("default").await.unwrap().unwrap();

    queue
        .mark_completed(&job.id, Some(json!({ "rows": 42 })))
        .await
        .unwrap();

    let done = queue.get_job(TENANT, &job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, Some(json!({ "rows": 42 })));
    assert!(done.completed_at.is_some());

    assert!(matches!(
        queue.mark_completed("missing", None).await,
        Err(QueueError::NotFound(_))
    ));
}

#[tokio::test]
async fn list_and_stats() {
    let queue = memory_queue().await;
    for job_type in ["email", "email", "report"] {
        queue.enqueue(TENANT, job_type, json!({}), EnqueueOptions::default()).await.unwrap();
    }
    queue
        .enqueue(TENANT, "email", json!({}), EnqueueOptions::default().queue("priority"))
        .await
        .unwrap();
    queue.enqueue("tenant-b", "email", json!({}), EnqueueOptions::default()).await.unwrap();

    let started = queue.dequeue("default").await.unwrap().unwrap();
    queue.mark_completed(&started.id, None).await.unwrap();

    let emails = queue
        .list_jobs(
            TENANT,
            &JobFilter {
                job_type: Some("email".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(emails.len(), 3);

    let completed = queue
        .list_jobs(
            TENANT,
            &JobFilter {
                status: Some(JobStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);

    let page = queue
        .list_jobs(
            TENANT,
            &JobFilter {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    let stats = queue.get_stats(TENANT).await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_status.get("pending"), Some(&3));
    assert_eq!(stats.by_status.get("completed"), Some(&1));
    assert_eq!(stats.by_queue.get("default"), Some(&3));
    assert_eq!(stats.by_queue.get("priority"), Some(&1));
    assert_eq!(stats.by_type.get("email"), Some(&3));
    assert!(stats.average_wait_secs.unwrap() >= 0.0);

    let empty = queue.get_stats("nobody").await.unwrap();
    assert_eq!(empty.total, 0);
    assert!(empty.average_wait_secs.is_none());
}

#[tokio::test]
async fn delete_old_jobs_only_purges_finished_jobs() {
    let queue = memory_queue().await;
    let done = queue.enqueue(TENANT, "x", json!({}), EnqueueOptions::default()).await.unwrap();
    queue.dequeue("default").await.unwrap().unwrap();
    queue.mark_completed(&done.id, None).await.unwrap();

    let failed = queue
        .enqueue(TENANT, "x", json!({}), EnqueueOptions::default().max_retries(0))
        .await
        .unwrap();
    queue.dequeue("default").await.unwrap().unwrap();
    assert_eq!(queue.mark_failed(&failed.id, "fatal").await.unwrap(), JobStatus::Failed);

    let waiting = queue.enqueue(TENANT, "x", json!({}), EnqueueOptions::default()).await.unwrap();

    assert_eq!(queue.delete_old_jobs(Utc::now() - Duration::days(7)).await.unwrap(), 0);
    assert_eq!(queue.delete_old_jobs(Utc::now() + Duration::seconds(1)).await.unwrap(), 2);

    assert!(queue.get_job(TENANT, &done.id).await.unwrap().is_none());
    assert!(queue.get_job(TENANT, &failed.id).await.unwrap().is_none());
    assert!(queue.get_job(TENANT, &waiting.id).await.unwrap().is_some());
}
