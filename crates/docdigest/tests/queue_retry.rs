//! Retry, dead-letter and lease-exclusivity behavior of the durable queue
//! as driven by real workers.

mod common;

use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{fast_queue_settings, EchoProvider, FakeOcr, PdfBuilder, StaticExtractor, TestHarness};
use docdigest::broadcast::ProgressState;
use docdigest::db::Database;
use docdigest::queue::{JobQueue, JobState, NewJob, SqliteJobQueue};
use docdigest::worker::JobDisposition;

const SETTLE: Duration = Duration::from_secs(20);

#[test]
fn test_transient_failure_dead_letters_after_max_attempts() {
    let harness = TestHarness::with_queue_settings(fast_queue_settings(3));
    let pdf = PdfBuilder::new().image_page().build();
    let input = harness.write_input("fax.pdf", &pdf);

    let pipeline = harness.pipeline(
        harness.pdf_extractor(FakeOcr::broken()),
        Arc::new(EchoProvider::new()),
        4000,
    );
    let pool = harness.start_pool(pipeline, 2);
    let service = harness.service(&pool);

    let handle = service.enqueue(&input, "fax.pdf", "user-1").unwrap();
    let results = harness.wait_for_terminal(&pool, &handle.job_id, SETTLE);
    pool.wait();

    let dispositions: Vec<_> = results.iter().map(|r| r.disposition.clone()).collect();
    assert_eq!(dispositions.len(), 3, "dispositions: {:?}", dispositions);
    assert!(matches!(dispositions[0], JobDisposition::Requeued { .. }));
    assert!(matches!(dispositions[1], JobDisposition::Requeued { .. }));
    assert_eq!(dispositions[2], JobDisposition::DeadLettered);
    assert!(results[2].error.as_deref().unwrap().contains("OCR failed"));

    let job = service.get_job(&handle.job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.dead_lettered);
    assert_eq!(job.attempt, 3);
    assert!(job.lease.is_none());

    let dead: Vec<_> = service
        .list_dead_letters()
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(dead, vec![handle.job_id.clone()]);

    let progress = service.get_progress(&handle.job_id);
    assert_eq!(progress.state, ProgressState::Failed);
    assert_eq!(progress.percent, 100);
    assert!(harness.document_for(&handle.job_id).is_none());
}

#[test]
fn test_permanent_failure_skips_retries_and_can_be_revived() {
    let harness = TestHarness::with_queue_settings(fast_queue_settings(5));
    let input = harness.write_input("letter.pdf", b"unused");

    let extractor = Arc::new(StaticExtractor::new("Dear tenant, the rent is due on Friday."));
    extractor.set_corrupt(true);
    let pipeline = harness.pipeline(extractor.clone(), Arc::new(EchoProvider::new()), 4000);
    let pool = harness.start_pool(pipeline, 1);
    let service = harness.service(&pool);

    let handle = service.enqueue(&input, "letter.pdf", "user-1").unwrap();
    let results = harness.wait_for_terminal(&pool, &handle.job_id, SETTLE);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].disposition, JobDisposition::DeadLettered);
    assert_eq!(service.get_job(&handle.job_id).unwrap().unwrap().attempt, 1);

    extractor.set_corrupt(false);
    service.retry_dead_letter(&handle.job_id).unwrap();
    let results = harness.wait_for_terminal(&pool, &handle.job_id, SETTLE);
    pool.wait();

    assert!(results.last().unwrap().success());
    let job = service.get_job(&handle.job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(!job.dead_lettered);
    assert!(service.list_dead_letters().unwrap().is_empty());
    assert_eq!(service.get_progress(&handle.job_id).percent, 100);
}

#[test]
fn test_concurrent_lease_has_single_winner() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_path = temp_dir.path().join("queue.db");

    // Two handles, two connections: the same setup as two processes.
    let first = Arc::new(SqliteJobQueue::new(
        Database::open(&db_path).unwrap(),
        fast_queue_settings(3),
    ));
    let second = Arc::new(SqliteJobQueue::new(
        Database::open(&db_path).unwrap(),
        fast_queue_settings(3),
    ));

    for round in 0..10 {
        let job_id = first
            .enqueue(NewJob {
                source_ref: PathBuf::from(format!("/uploads/{}.pdf", round)),
                display_name: format!("{}.pdf", round),
                owner_id: "user-1".to_string(),
            })
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let contenders: Vec<_> = [(first.clone(), "worker-a"), (second.clone(), "worker-b")]
            .into_iter()
            .map(|(queue, worker_id)| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    queue
                        .lease(worker_id)
                        .unwrap()
                        .map(|job| (worker_id, job.id))
                })
            })
            .collect();

        let winners: Vec<_> = contenders
            .into_iter()
            .filter_map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(winners.len(), 1, "round {}: {:?}", round, winners);
        let (worker_id, leased_id) = &winners[0];
        assert_eq!(leased_id, &job_id);

        let job = second.get(&job_id).unwrap().unwrap();
        assert_eq!(job.lease.unwrap().worker_id, *worker_id);
        first.complete(&job_id, worker_id).unwrap();
    }

    assert_eq!(first.counts().unwrap().completed, 10);
}
