use super::worker::Processed;
use super::*;
use crate::jobs::{DispatchToken, JobState, MemoryJobStore, Transition};
use crate::storage::MemoryBlobStore;
use crate::testing::{test_settings, FnExecutor, GatedExecutor, StallingExecutor, UnavailableStore};
use crate::transform::TransformError;

struct Harness {
    pipeline: JobPipeline,
    store: MemoryJobStore,
    blobs: MemoryBlobStore,
}

fn harness(executor: impl TransformExecutor + 'static, settings: PipelineSettings) -> Harness {
    let store = MemoryJobStore::new();
    let blobs = MemoryBlobStore::new();
    let pipeline = JobPipeline::new(
        Arc::new(store.clone()),
        Arc::new(blobs.clone()),
        Arc::new(executor),
        settings,
    );
    Harness {
        pipeline,
        store,
        blobs,
    }
}

fn echo() -> FnExecutor<impl Fn(Vec<u8>) -> Result<Vec<u8>, TransformError>> {
    FnExecutor(|mut input: Vec<u8>| -> Result<Vec<u8>, TransformError> {
        input.reverse();
        Ok(input)
    })
}

fn owner() -> OwnerId {
    OwnerId::from("alice")
}

async fn until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_zero_capacity_rejects_without_creating_a_record() {
    let settings = PipelineSettings {
        queue_capacity: 0,
        ..test_settings()
    };
    let h = harness(echo(), settings);

    let result = h.pipeline.submit(owner(), BlobRef::from("in")).await;

    assert!(matches!(result, Err(PipelineError::Overloaded { capacity: 0 })));
    assert!(h.store.is_empty());
    assert_eq!(h.pipeline.metrics().jobs_rejected, 1);
}

#[tokio::test]
async fn test_rejected_upload_leaves_no_blob() {
    let settings = PipelineSettings {
        queue_capacity: 0,
        ..test_settings()
    };
    let h = harness(echo(), settings);

    let result = h.pipeline.submit_bytes(owner(), None, b"image".to_vec()).await;

    assert!(matches!(result, Err(PipelineError::Overloaded { .. })));
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn test_full_queue_rejects_until_drained() {
    let settings = PipelineSettings {
        queue_capacity: 1,
        ..test_settings()
    };
    let h = harness(echo(), settings);

    let first = h.pipeline.submit_bytes(owner(), None, b"one".to_vec()).await.unwrap();
    assert!(matches!(
        h.pipeline.submit_bytes(owner(), None, b"two".to_vec()).await,
        Err(PipelineError::Overloaded { capacity: 1 })
    ));

    let id = h.pipeline.queue.next().await.unwrap();
    assert_eq!(id, first);
    assert!(h.pipeline.submit_bytes(owner(), None, b"three".to_vec()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_submit_wait_bounds_the_wait_for_space() {
    let settings = PipelineSettings {
        queue_capacity: 1,
        submit_wait_ms: 50,
        ..test_settings()
    };
    let h = harness(echo(), settings);
    h.pipeline.submit(owner(), BlobRef::from("a")).await.unwrap();

    let started = tokio::time::Instant::now();
    let result = h.pipeline.submit(owner(), BlobRef::from("b")).await;

    assert!(matches!(result, Err(PipelineError::Overloaded { .. })));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_capacity_one_runs_job_to_completion() {
    let settings = PipelineSettings {
        queue_capacity: 1,
        ..test_settings()
    };
    let gate = GatedExecutor::default();
    let h = harness(gate.clone(), settings);
    let runtime = h.pipeline.start();

    let id = h.pipeline.submit_bytes(owner(), None, b"abc".to_vec()).await.unwrap();
    let state = h.pipeline.get_status(id).await.unwrap().state;
    assert!(matches!(state, JobState::Pending | JobState::Processing));

    until(|| gate.calls() == 1).await;
    let job = h.pipeline.get_status(id).await.unwrap();
    assert_eq!(job.state, JobState::Processing);
    assert!(job.dispatch_token.is_some());
    assert!(matches!(
        h.pipeline.get_result(id).await,
        Err(PipelineError::NotReady { state: JobState::Processing, .. })
    ));

    gate.open(1);
    let job = h
        .pipeline
        .wait_for_terminal(id, Duration::from_millis(5), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Completed);

    let output_ref = h.pipeline.get_result(id).await.unwrap();
    assert_eq!(Some(output_ref), job.output_ref);
    assert_eq!(h.pipeline.fetch_result(id).await.unwrap(), b"abc");

    let metrics = h.pipeline.metrics();
    assert_eq!(metrics.jobs_submitted, 1);
    assert_eq!(metrics.jobs_completed, 1);
    assert_eq!(metrics.current_running, 0);

    assert!(runtime.shutdown(Duration::from_secs(1)).await.is_graceful());
}

#[tokio::test]
async fn test_pending_job_is_not_ready() {
    let h = harness(echo(), test_settings());
    let id = h.pipeline.submit(owner(), BlobRef::from("in")).await.unwrap();

    assert!(matches!(
        h.pipeline.get_result(id).await,
        Err(PipelineError::NotReady { state: JobState::Pending, .. })
    ));
}

#[tokio::test]
async fn test_executor_failure_is_recorded_not_thrown() {
    let failing = FnExecutor(|_: Vec<u8>| -> Result<Vec<u8>, TransformError> {
        Err(TransformError::InvalidInput("not an image".into()))
    });
    let h = harness(failing, test_settings());
    let id = h.pipeline.submit_bytes(owner(), None, b"junk".to_vec()).await.unwrap();

    let processed = h.pipeline.process(id).await;

    assert!(matches!(processed, Processed::Failed(_)));
    let job = h.pipeline.get_status(id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert!(error.starts_with("ExecutorError"));
    assert!(error.contains("not an image"));
    assert!(job.output_ref.is_none());

    match h.pipeline.get_result(id).await {
        Err(PipelineError::JobFailed { error: reported, .. }) => assert_eq!(reported, error),
        other => panic!("expected JobFailed, got {other:?}"),
    }
    assert_eq!(h.pipeline.metrics().jobs_failed, 1);
}

#[tokio::test]
async fn test_missing_input_fails_the_job() {
    let h = harness(echo(), test_settings());
    let id = h.pipeline.submit(owner(), BlobRef::from("mem/vanished")).await.unwrap();

    h.pipeline.process(id).await;

    let job = h.pipeline.get_status(id).await.unwrap();
    assert!(job.error.unwrap().starts_with("InputUnavailable"));
}

#[tokio::test(start_paused = true)]
async fn test_executor_timeout_fails_the_job() {
    let h = harness(StallingExecutor, test_settings());
    let id = h.pipeline.submit_bytes(owner(), None, b"slow".to_vec()).await.unwrap();

    let processed = h.pipeline.process(id).await;

    match processed {
        Processed::Failed(error) => assert!(error.starts_with("ExecutorTimeout")),
        other => panic!("expected a failure, got {other:?}"),
    }
    let job = h.pipeline.get_status(id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.redispatch_count, 0);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness(echo(), test_settings());
    let id = JobId::new();

    assert!(matches!(h.pipeline.get_status(id).await, Err(PipelineError::NotFound(_))));
    assert!(matches!(h.pipeline.get_result(id).await, Err(PipelineError::NotFound(_))));
    assert_eq!(h.pipeline.process(id).await, Processed::Skipped);
}

#[tokio::test]
async fn test_deleted_output_is_result_missing() {
    let h = harness(echo(), test_settings());
    let id = h.pipeline.submit_bytes(owner(), None, b"abc".to_vec()).await.unwrap();
    let Processed::Completed(output_ref) = h.pipeline.process(id).await else {
        panic!("job should complete");
    };

    h.blobs.delete(&output_ref).await.unwrap();

    assert!(matches!(
        h.pipeline.get_result(id).await,
        Err(PipelineError::ResultMissing { .. })
    ));
    assert!(matches!(
        h.pipeline.fetch_result(id).await,
        Err(PipelineError::ResultMissing { .. })
    ));
}

#[tokio::test]
async fn test_store_outage_propagates() {
    let pipeline = JobPipeline::new(
        Arc::new(UnavailableStore),
        Arc::new(MemoryBlobStore::new()),
        Arc::new(echo()),
        test_settings(),
    );
    let id = JobId::new();

    assert!(matches!(
        pipeline.submit(owner(), BlobRef::from("in")).await,
        Err(PipelineError::StoreUnavailable(_))
    ));
    assert!(matches!(pipeline.get_status(id).await, Err(PipelineError::StoreUnavailable(_))));
    assert!(matches!(pipeline.get_result(id).await, Err(PipelineError::StoreUnavailable(_))));
    // The reserved slot was released
    assert_eq!(pipeline.queue.len(), 0);
}

#[tokio::test]
async fn test_second_dispatch_of_same_job_is_dropped() {
    let h = harness(echo(), test_settings());
    let id = h.pipeline.submit_bytes(owner(), None, b"abc".to_vec()).await.unwrap();

    assert!(matches!(h.pipeline.process(id).await, Processed::Completed(_)));
    assert_eq!(h.pipeline.process(id).await, Processed::Skipped);

    let metrics = h.pipeline.metrics();
    assert_eq!(metrics.jobs_claimed, 1);
    assert_eq!(metrics.dispatch_conflicts, 1);
}

#[tokio::test]
async fn test_crashed_worker_is_redispatched_then_abandoned() {
    let h = harness(echo(), test_settings());
    let id = h.pipeline.submit(owner(), BlobRef::from("in")).await.unwrap();
    let base = Utc::now();
    let max = h.pipeline.settings().max_redispatches;

    let mut redispatches = 0;
    for round in 0..=i64::from(max) {
        let claimed_at = base + chrono::Duration::seconds(round * 10);
        // A worker claims the job and dies without reporting
        h.store
            .transition(id, &Transition::claim(DispatchToken::new(), claimed_at))
            .await
            .unwrap();

        let report = h
            .pipeline
            .watchdog_pass(claimed_at + chrono::Duration::seconds(5))
            .await
            .unwrap();
        redispatches += report.redispatched;

        if report.abandoned == 1 {
            break;
        }
        let job = h.store.get(id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.dispatch_token.is_none());
    }

    assert_eq!(redispatches, max as usize);
    let job = h.store.get(id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.redispatch_count, max);
    assert!(job.error.unwrap().starts_with("MaxRetriesExceeded"));
    assert!(matches!(
        h.pipeline.get_result(id).await,
        Err(PipelineError::JobFailed { .. })
    ));
}

#[tokio::test]
async fn test_watchdog_ignores_jobs_within_timeout() {
    let h = harness(echo(), test_settings());
    let id = h.pipeline.submit(owner(), BlobRef::from("in")).await.unwrap();
    let now = Utc::now();
    h.store
        .transition(id, &Transition::claim(DispatchToken::new(), now))
        .await
        .unwrap();

    let report = h.pipeline.watchdog_pass(now).await.unwrap();

    assert_eq!(report, WatchdogReport::default());
    assert_eq!(h.store.get(id).await.unwrap().state, JobState::Processing);
}

#[tokio::test]
async fn test_superseded_worker_discards_its_output() {
    let gate = GatedExecutor::default();
    let h = harness(gate.clone(), test_settings());
    let id = h.pipeline.submit_bytes(owner(), None, b"abc".to_vec()).await.unwrap();

    let worker = {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move { pipeline.process(id).await })
    };
    until(|| gate.calls() == 1).await;

    // The watchdog decides the worker is stuck
    let report = h
        .pipeline
        .watchdog_pass(Utc::now() + chrono::Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(report.redispatched, 1);

    gate.open(1);
    assert_eq!(worker.await.unwrap(), Processed::Lost);

    let job = h.store.get(id).await.unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert!(job.output_ref.is_none());
    // Only the input remains
    assert_eq!(h.blobs.len(), 1);
}

#[tokio::test]
async fn test_recover_pending_enqueues_orphans() {
    let h = harness(echo(), test_settings());
    for _ in 0..3 {
        let job = Job::new(owner(), BlobRef::from("in"), Utc::now());
        h.store.create(&job).await.unwrap();
    }

    assert_eq!(h.pipeline.recover_pending().await.unwrap(), 3);
    assert_eq!(h.pipeline.queue.len(), 3);
    // Already queued ids are not queued twice
    assert_eq!(h.pipeline.recover_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_watchdog_requeues_idle_pending_jobs_once() {
    let h = harness(echo(), test_settings());
    let job = Job::new(owner(), BlobRef::from("in"), Utc::now() - chrono::Duration::minutes(5));
    h.store.create(&job).await.unwrap();

    let first = h.pipeline.watchdog_pass(Utc::now()).await.unwrap();
    let second = h.pipeline.watchdog_pass(Utc::now()).await.unwrap();

    assert_eq!(first.requeued, 1);
    assert_eq!(second.requeued, 0);
    assert_eq!(h.pipeline.queue.next().await, Some(job.id));
}

#[tokio::test]
async fn test_list_jobs_is_per_owner_and_oldest_first() {
    let h = harness(echo(), test_settings());
    let first = h.pipeline.submit(owner(), BlobRef::from("a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = h.pipeline.submit(owner(), BlobRef::from("b")).await.unwrap();
    h.pipeline.submit(OwnerId::from("bob"), BlobRef::from("c")).await.unwrap();

    let jobs = h.pipeline.list_jobs(&owner()).await.unwrap();

    assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![first, second]);
    assert!(jobs.iter().all(|j| j.owner_id == owner()));
}

#[tokio::test]
async fn test_upload_name_is_kept_through_the_lifecycle() {
    let h = harness(echo(), test_settings());
    let named = h
        .pipeline
        .submit_bytes(owner(), Some("cat.png".to_string()), b"abc".to_vec())
        .await
        .unwrap();
    let anonymous = h.pipeline.submit_bytes(owner(), None, b"def".to_vec()).await.unwrap();

    assert!(matches!(h.pipeline.process(named).await, Processed::Completed(_)));

    let job = h.pipeline.get_status(named).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.source_name.as_deref(), Some("cat.png"));

    let listed = h.pipeline.list_jobs(&owner()).await.unwrap();
    let name_of = |id| listed.iter().find(|j| j.id == id).map(|j| j.source_name.clone());
    assert_eq!(listed.len(), 2);
    assert_eq!(name_of(named), Some(Some("cat.png".to_string())));
    assert_eq!(name_of(anonymous), Some(None));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_terminal_times_out() {
    let h = harness(echo(), test_settings());
    let id = h.pipeline.submit(owner(), BlobRef::from("in")).await.unwrap();

    let result = h
        .pipeline
        .wait_for_terminal(id, Duration::from_millis(10), Duration::from_millis(100))
        .await;

    assert!(matches!(result, Err(PipelineError::WaitTimeout { .. })));
}

#[tokio::test]
async fn test_started_pipeline_drains_many_jobs() {
    let h = harness(echo(), test_settings());
    let runtime = h.pipeline.start();

    let mut ids = Vec::new();
    for n in 0..6u8 {
        ids.push(h.pipeline.submit_bytes(owner(), None, vec![n, 1, 2]).await.unwrap());
    }

    for id in &ids {
        let job = h
            .pipeline
            .wait_for_terminal(*id, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
    }
    assert_eq!(h.pipeline.metrics().jobs_completed, 6);

    assert!(runtime.shutdown(Duration::from_secs(1)).await.is_graceful());
}
