mod common;

use std::time::Duration;

use common::{email, gate, submit};
use dispatchflow::jobs::{DispatchQueue, InMemoryDispatchQueue, JobStatus, Priority};
use dispatchflow::Backend;
use uuid::Uuid;

#[tokio::test]
async fn high_priority_jobs_are_dispatched_first() {
    let backend = Backend::in_memory();
    let gate = gate(&backend);
    let queue = backend.queue();

    let mut low = Vec::new();
    for i in 0..3 {
        low.push(submit(&gate, "low", email(&format!("low{i}@example.com"))).await);
    }
    let mut high = Vec::new();
    for i in 0..2 {
        high.push(submit(&gate, "high", email(&format!("high{i}@example.com"))).await);
    }

    let mut dequeued = Vec::new();
    while let Some(id) = queue.dequeue_best().await.unwrap() {
        dequeued.push(id);
    }

    assert_eq!(dequeued.len(), 5);
    let (first, rest) = dequeued.split_at(2);

    let mut first = first.to_vec();
    first.sort();
    high.sort();
    assert_eq!(first, high);

    let mut rest = rest.to_vec();
    rest.sort();
    low.sort();
    assert_eq!(rest, low);
}

#[tokio::test]
async fn equal_scores_break_ties_by_job_id() {
    let queue = InMemoryDispatchQueue::new();
    let mut ids: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        queue.enqueue(*id, Priority::Low.score()).await.unwrap();
    }
    ids.sort();

    let mut dequeued = Vec::new();
    while let Some(id) = queue.dequeue_best().await.unwrap() {
        dequeued.push(id);
    }
    assert_eq!(dequeued, ids);
}

#[tokio::test]
async fn each_dequeue_removes_exactly_one_entry() {
    let queue = InMemoryDispatchQueue::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    queue.enqueue(a, 1).await.unwrap();
    queue.enqueue(b, 2).await.unwrap();

    assert_eq!(queue.dequeue_best().await.unwrap(), Some(a));
    assert_eq!(queue.len().await.unwrap(), 1);
    assert!(!queue.contains(a).await.unwrap());
    assert!(queue.contains(b).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn delayed_high_priority_waits_behind_ready_low_priority() {
    let queue = InMemoryDispatchQueue::new();
    let delayed = Uuid::new_v4();
    let ready = Uuid::new_v4();

    queue
        .enqueue_delayed(delayed, Priority::High.score(), Duration::from_millis(50))
        .await
        .unwrap();
    queue.enqueue(ready, Priority::Low.score()).await.unwrap();

    assert_eq!(queue.dequeue_best().await.unwrap(), Some(ready));
    assert_eq!(queue.dequeue_best().await.unwrap(), None);
    assert_eq!(queue.len().await.unwrap(), 1);

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(queue.dequeue_best().await.unwrap(), Some(delayed));
}

#[test]
fn status_strings_match_their_serialized_form() {
    for status in [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::RetryScheduled,
        JobStatus::Completed,
        JobStatus::Failed,
    ] {
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json, serde_json::Value::String(status.as_str().to_string()));

        let back: JobStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
        assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
    }
}
