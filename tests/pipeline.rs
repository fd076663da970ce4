//! End-to-end pipeline tests over the in-memory channel and store.
//!
//! Exercises the full flow: submission → work queue → (simulated worker) →
//! result queue → listener reconciliation, including crash redelivery and
//! graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::Utc;

use aml_pipeline::{
    JobStatus, JobStore, ListenerConfig, MemoryChannel, MemoryStore, MessageChannel, Outcome,
    ResultListener, ResultMessage, ResultStore, SubmissionService, SubmitError, WorkMessage,
};

const WORK_QUEUE: &str = "analysis.requests";
const RESULT_QUEUE: &str = "analysis.results";

struct Pipeline {
    channel: Arc<MemoryChannel>,
    store: Arc<MemoryStore>,
    submission: SubmissionService,
    listener: ResultListener,
}

fn pipeline() -> Pipeline {
    let channel = Arc::new(MemoryChannel::new());
    let store = Arc::new(MemoryStore::new());

    let submission = SubmissionService::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&channel) as Arc<dyn MessageChannel>,
        WORK_QUEUE,
    );

    let listener = ResultListener::new(
        Arc::clone(&channel) as Arc<dyn MessageChannel>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        ListenerConfig::new(RESULT_QUEUE).with_poll_interval(Duration::from_millis(10)),
    );

    Pipeline {
        channel,
        store,
        submission,
        listener,
    }
}

/// Plays the external worker: consumes one work message and publishes the
/// corresponding result.
async fn run_worker(channel: &MemoryChannel, artifact: &[u8]) -> WorkMessage {
    let delivery = channel
        .receive(WORK_QUEUE, Duration::from_millis(100))
        .await
        .expect("receive")
        .expect("work message available");
    let work = WorkMessage::from_bytes(&delivery.payload).expect("valid work message");
    channel.ack(&delivery).await.expect("ack");

    let result = ResultMessage::new(work.job_id, artifact, Utc::now())
        .to_bytes()
        .expect("serializable");
    channel
        .publish(RESULT_QUEUE, &result)
        .await
        .expect("publish result");

    work
}

#[tokio::test]
async fn submit_creates_one_pending_job_and_one_work_message() {
    let p = pipeline();

    let job_id = p
        .submission
        .submit("alice", "a.csv", b"x,y\n1,2")
        .await
        .expect("submission succeeds");
    assert_eq!(job_id, 1);

    let pending = p.store.pending_by_owner("alice").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, 1);
    assert_eq!(pending[0].owner_id, "alice");
    assert_eq!(pending[0].status, JobStatus::Pending);

    assert_eq!(p.channel.ready_len(WORK_QUEUE), 1);
    let delivery = p
        .channel
        .receive(WORK_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .expect("message published");
    let work = WorkMessage::from_bytes(&delivery.payload).expect("valid work message");
    assert_eq!(work.job_id, 1);
    assert_eq!(work.user_id, "alice");
    assert_eq!(work.file_name, "a.csv");
    assert_eq!(work.file_data, BASE64_STANDARD.encode(b"x,y\n1,2"));
}

#[tokio::test]
async fn empty_dataset_rejected_with_no_side_effects() {
    let p = pipeline();

    let err = p
        .submission
        .submit("alice", "a.csv", b"")
        .await
        .expect_err("must be rejected");
    assert!(matches!(err, SubmitError::EmptyDataset));

    assert!(p.store.pending_by_owner("alice").await.unwrap().is_empty());
    assert_eq!(p.channel.ready_len(WORK_QUEUE), 0);
}

#[tokio::test]
async fn full_round_trip_completes_the_job() {
    let p = pipeline();

    let job_id = p
        .submission
        .submit("alice", "a.csv", b"x,y\n1,2")
        .await
        .unwrap();
    let work = run_worker(&p.channel, b"DRUGDATA").await;
    assert_eq!(work.job_id, job_id);
    assert_eq!(work.dataset().unwrap(), b"x,y\n1,2");

    let delivery = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(100))
        .await
        .unwrap()
        .expect("result available");
    let outcome = p.listener.process(&delivery).await.unwrap();
    assert_eq!(outcome, Outcome::Completed(job_id));

    assert!(p.store.pending_by_owner("alice").await.unwrap().is_empty());
    let completed = p.store.completed_by_owner("alice").await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].job.id, job_id);
    assert_eq!(completed[0].result.artifact, b"DRUGDATA");
}

#[tokio::test]
async fn redelivered_result_is_absorbed_without_duplicate_artifact() {
    let p = pipeline();
    let job_id = p.submission.submit("alice", "a.csv", b"data").await.unwrap();

    let payload = ResultMessage::new(job_id, b"DRUGDATA", Utc::now())
        .to_bytes()
        .unwrap();
    // Simulated redelivery: the same result message arrives twice.
    p.channel.publish(RESULT_QUEUE, &payload).await.unwrap();
    p.channel.publish(RESULT_QUEUE, &payload).await.unwrap();

    let first = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        p.listener.process(&first).await.unwrap(),
        Outcome::Completed(job_id)
    );

    let second = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        p.listener.process(&second).await.unwrap(),
        Outcome::Duplicate(job_id)
    );

    // Exactly one result row, job completed, nothing left in flight.
    let job = p.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(p.store.result_for_job(job_id).await.unwrap().is_some());
    assert_eq!(p.channel.in_flight_len(RESULT_QUEUE), 0);
}

#[tokio::test]
async fn result_for_nonexistent_job_is_acked_and_not_stored() {
    let p = pipeline();

    let payload = ResultMessage::new(999, b"X", Utc::now()).to_bytes().unwrap();
    p.channel.publish(RESULT_QUEUE, &payload).await.unwrap();

    let delivery = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        p.listener.process(&delivery).await.unwrap(),
        Outcome::Duplicate(999)
    );

    assert!(p.store.result_for_job(999).await.unwrap().is_none());
    assert_eq!(p.channel.in_flight_len(RESULT_QUEUE), 0);
}

#[tokio::test]
async fn crash_before_ack_redelivers_and_preserves_invariants() {
    let p = pipeline();
    let job_id = p.submission.submit("alice", "a.csv", b"data").await.unwrap();

    let payload = ResultMessage::new(job_id, b"DRUGDATA", Utc::now())
        .to_bytes()
        .unwrap();
    p.channel.publish(RESULT_QUEUE, &payload).await.unwrap();

    // Consume without processing or acking: the consumer "crashed" here.
    let _ = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p.channel.in_flight_len(RESULT_QUEUE), 1);

    // Restarted consumer recovers the stranded delivery and processes it.
    assert_eq!(p.channel.recover(RESULT_QUEUE).await.unwrap(), 1);
    let delivery = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        p.listener.process(&delivery).await.unwrap(),
        Outcome::Completed(job_id)
    );

    // Result exists => job completed.
    let job = p.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(p.store.result_for_job(job_id).await.unwrap().is_some());
}

#[tokio::test]
async fn listing_never_leaks_other_owners_jobs() {
    let p = pipeline();
    p.submission.submit("alice", "a.csv", b"a").await.unwrap();
    let bob_job = p.submission.submit("bob", "b.csv", b"b").await.unwrap();

    // Complete bob's job through the listener.
    let payload = ResultMessage::new(bob_job, b"artifact", Utc::now())
        .to_bytes()
        .unwrap();
    p.channel.publish(RESULT_QUEUE, &payload).await.unwrap();
    let delivery = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    p.listener.process(&delivery).await.unwrap();

    let alice_pending = p.store.pending_by_owner("alice").await.unwrap();
    assert!(alice_pending.iter().all(|j| j.owner_id == "alice"));
    assert_eq!(alice_pending.len(), 1);
    assert!(p.store.completed_by_owner("alice").await.unwrap().is_empty());

    let bob_completed = p.store.completed_by_owner("bob").await.unwrap();
    assert_eq!(bob_completed.len(), 1);
    assert!(bob_completed.iter().all(|c| c.job.owner_id == "bob"));
    assert!(p.store.pending_by_owner("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn listener_loop_processes_messages_and_shuts_down_gracefully() {
    let p = pipeline();
    let job_id = p.submission.submit("alice", "a.csv", b"data").await.unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let listener = p.listener;
    let handle = tokio::spawn(async move { listener.run(shutdown_rx).await });

    // Worker produces the result while the listener is live.
    let payload = ResultMessage::new(job_id, b"DRUGDATA", Utc::now())
        .to_bytes()
        .unwrap();
    p.channel.publish(RESULT_QUEUE, &payload).await.unwrap();

    // Wait until the listener has reconciled the job.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let job = p.store.get(job_id).await.unwrap().unwrap();
        if job.status == JobStatus::Completed {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "listener did not reconcile the job in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(()).expect("listener still running");
    handle
        .await
        .expect("listener task not panicked")
        .expect("listener exited cleanly");

    assert!(p.store.result_for_job(job_id).await.unwrap().is_some());
    assert_eq!(p.channel.in_flight_len(RESULT_QUEUE), 0);
}

#[tokio::test]
async fn malformed_result_goes_to_dead_letter_queue() {
    let p = pipeline();

    p.channel
        .publish(RESULT_QUEUE, b"{\"this\":\"is not a result\"}")
        .await
        .unwrap();
    let delivery = p
        .channel
        .receive(RESULT_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        p.listener.process(&delivery).await.unwrap(),
        Outcome::DeadLettered
    );
    assert_eq!(p.channel.in_flight_len(RESULT_QUEUE), 0);
    assert_eq!(p.channel.dead_letters(RESULT_QUEUE).len(), 1);
}
