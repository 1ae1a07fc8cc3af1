//! Integration tests for the durable job queue.
//!
//! Each test runs in its own schema (see `TestDatabase`). Run with:
//! `DATABASE_URL=... cargo test -p collab-db -- --ignored`

use std::collections::HashSet;
use std::time::Duration;

use collab_db::test_fixtures::TestDatabase;
use collab_db::{
    CompleteOutcome, EvaluationKey, FailOutcome, JobPayload, JobQueue, JobStatus,
    MonthlyRefreshJob, PairKey, QueueConfig, RunMatchingJob,
};
use uuid::Uuid;

fn refresh(user_id: Uuid) -> JobPayload {
    JobPayload::MonthlyRefresh(MonthlyRefreshJob { user_id })
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_concurrent_claims_never_share_a_job() {
    let test_db = TestDatabase::new().await.expect("test database");
    let queue = &test_db.db.jobs;

    for _ in 0..20 {
        queue.enqueue(refresh(Uuid::new_v4())).await.unwrap();
    }

    let (a, b) = tokio::join!(
        queue.claim_next("worker-a", 15),
        queue.claim_next("worker-b", 15)
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let ids: HashSet<Uuid> = a.iter().chain(b.iter()).map(|j| j.id).collect();
    assert_eq!(ids.len(), a.len() + b.len(), "a job was claimed twice");
    assert_eq!(ids.len(), 20);
    assert!(a
        .iter()
        .all(|j| j.status == JobStatus::Processing && j.locked_by.as_deref() == Some("worker-a")));
    assert!(b.iter().all(|j| j.locked_by.as_deref() == Some("worker-b")));

    let again = queue.claim_next("worker-c", 10).await.unwrap();
    assert!(again.is_empty());

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_always_failing_job_backs_off_then_dead_letters() {
    let config = QueueConfig::default()
        .with_max_attempts(4)
        .with_backoff(20, 1_000);
    let test_db = TestDatabase::with_queue_config(config)
        .await
        .expect("test database");
    let queue = &test_db.db.jobs;

    let job_id = queue.enqueue(refresh(Uuid::new_v4())).await.unwrap();

    let mut last_attempts = 0;
    let mut last_next_run = None;
    for round in 1..=4 {
        // Wait out the previous backoff.
        let claimed = loop {
            let claimed = queue.claim_next("worker", 1).await.unwrap();
            if !claimed.is_empty() {
                break claimed;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        };
        assert_eq!(claimed[0].id, job_id);

        match queue.fail(job_id, "worker", "handler exploded").await.unwrap() {
            FailOutcome::Retrying {
                attempts,
                next_run_at,
            } => {
                assert!(round < 4);
                assert!(attempts > last_attempts);
                if let Some(previous) = last_next_run {
                    assert!(next_run_at > previous);
                }
                last_attempts = attempts;
                last_next_run = Some(next_run_at);
            }
            FailOutcome::Dead { attempts } => {
                assert_eq!(round, 4);
                assert_eq!(attempts, 4);
            }
            FailOutcome::LeaseLost => panic!("worker held the lease"),
        }
    }

    let job = queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Dead);
    assert_eq!(job.attempts, 4);
    assert_eq!(job.last_error.as_deref(), Some("handler exploded"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.claim_next("worker", 5).await.unwrap().is_empty());

    let dead = queue.list_dead(10).await.unwrap();
    assert_eq!(dead.len(), 1);

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_expired_lease_is_reclaimed_and_counts_as_attempt() {
    let config = QueueConfig::default().with_lock_duration(Duration::from_secs(1));
    let test_db = TestDatabase::with_queue_config(config)
        .await
        .expect("test database");
    let queue = &test_db.db.jobs;

    let job_id = queue.enqueue(refresh(Uuid::new_v4())).await.unwrap();
    let first = queue.claim_next("crashed-worker", 1).await.unwrap();
    assert_eq!(first.len(), 1);

    // Lease still held: nobody else gets it.
    assert!(queue.claim_next("rescuer", 1).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let second = queue.claim_next("rescuer", 1).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, job_id);
    assert_eq!(second[0].attempts, 1);
    assert_eq!(second[0].locked_by.as_deref(), Some("rescuer"));
    assert!(second[0]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("crashed-worker")));

    assert_eq!(
        queue.complete(job_id, "rescuer", None).await.unwrap(),
        CompleteOutcome::Completed
    );
    let job = queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_enqueue_unique_collapses_live_duplicates() {
    let test_db = TestDatabase::new().await.expect("test database");
    let queue = &test_db.db.jobs;

    let pair = PairKey::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
    let payload = JobPayload::RunMatching(RunMatchingJob::for_pair(pair));
    let key = payload.dedup_key().unwrap();

    let first = queue.enqueue_unique(payload.clone(), &key).await.unwrap();
    let second = queue.enqueue_unique(payload.clone(), &key).await.unwrap();
    assert!(first.is_some());
    assert!(second.is_none());

    // Still live while processing.
    let claimed = queue.claim_next("worker", 1).await.unwrap();
    assert!(queue
        .enqueue_unique(payload.clone(), &key)
        .await
        .unwrap()
        .is_none());

    queue.complete(claimed[0].id, "worker", None).await.unwrap();
    assert!(queue.enqueue_unique(payload, &key).await.unwrap().is_some());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.total, 2);

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_undecodable_rows_do_not_strand_the_batch() {
    let test_db = TestDatabase::new().await.expect("test database");
    let queue = &test_db.db.jobs;

    // Interleave bad rows with good ones so every position in the batch is hit.
    let mut good = HashSet::new();
    for _ in 0..3 {
        sqlx::query(
            "INSERT INTO job_queue (id, job_type, payload, max_attempts)
             VALUES ($1, 'reindex_everything', '{\"type\": \"reindex_everything\"}', 1)",
        )
        .bind(Uuid::new_v4())
        .execute(&test_db.pool)
        .await
        .unwrap();
        good.insert(queue.enqueue(refresh(Uuid::new_v4())).await.unwrap());
    }

    let claimed: HashSet<Uuid> = queue
        .claim_next("worker", 10)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(claimed, good);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.dead, 3, "single-attempt bad rows go straight to dead");
    assert_eq!(stats.processing, 3);

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_undecodable_payload_is_failed_during_claim() {
    let test_db = TestDatabase::new().await.expect("test database");
    let queue = &test_db.db.jobs;

    let bogus = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO job_queue (id, job_type, payload, max_attempts)
         VALUES ($1, 'reindex_everything', '{\"type\": \"reindex_everything\", \"data\": {}}', 3)",
    )
    .bind(bogus)
    .execute(&test_db.pool)
    .await
    .unwrap();
    let good = queue.enqueue(refresh(Uuid::new_v4())).await.unwrap();

    let claimed = queue.claim_next("worker", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, good);

    let (status, attempts, last_error): (String, i32, Option<String>) =
        sqlx::query_as("SELECT status, attempts, last_error FROM job_queue WHERE id = $1")
            .bind(bogus)
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
    assert_eq!(status, "pending");
    assert_eq!(attempts, 1);
    assert!(last_error.unwrap().contains("undecodable payload"));

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_requeue_resurrects_dead_job_with_fresh_budget() {
    let config = QueueConfig::default().with_max_attempts(1);
    let test_db = TestDatabase::with_queue_config(config)
        .await
        .expect("test database");
    let queue = &test_db.db.jobs;

    let job_id = queue.enqueue(refresh(Uuid::new_v4())).await.unwrap();
    queue.claim_next("worker", 1).await.unwrap();
    assert_eq!(
        queue.fail(job_id, "worker", "boom").await.unwrap(),
        FailOutcome::Dead { attempts: 1 }
    );

    assert!(queue.requeue(job_id).await.unwrap());
    assert!(!queue.requeue(job_id).await.unwrap(), "only dead jobs requeue");

    let claimed = queue.claim_next("worker", 1).await.unwrap();
    assert_eq!(claimed[0].id, job_id);
    assert_eq!(claimed[0].attempts, 0);

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_stale_worker_cannot_settle_a_reclaimed_job() {
    let config = QueueConfig::default().with_lock_duration(Duration::from_secs(1));
    let test_db = TestDatabase::with_queue_config(config)
        .await
        .expect("test database");
    let queue = &test_db.db.jobs;

    let job_id = queue.enqueue(refresh(Uuid::new_v4())).await.unwrap();
    assert_eq!(queue.claim_next("slow-worker", 1).await.unwrap().len(), 1);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(queue.claim_next("rescuer", 1).await.unwrap().len(), 1);

    // The slow worker finally reports; neither call touches the row.
    assert_eq!(
        queue.fail(job_id, "slow-worker", "late failure").await.unwrap(),
        FailOutcome::LeaseLost
    );
    assert_eq!(
        queue.complete(job_id, "slow-worker", None).await.unwrap(),
        CompleteOutcome::LeaseLost
    );
    let job = queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.locked_by.as_deref(), Some("rescuer"));

    assert_eq!(
        queue.complete(job_id, "rescuer", None).await.unwrap(),
        CompleteOutcome::Completed
    );
    assert!(matches!(
        queue.complete(Uuid::new_v4(), "rescuer", None).await,
        Err(collab_db::Error::NotFound(_))
    ));

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL with a reachable PostgreSQL"]
async fn test_processing_job_does_not_absorb_newer_versions() {
    let test_db = TestDatabase::new().await.expect("test database");
    let queue = &test_db.db.jobs;

    let pair = PairKey::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
    let payload = JobPayload::RunMatching(RunMatchingJob::for_pair(pair));
    let at = |a, b| {
        RunMatchingJob::dedup_key_at(EvaluationKey {
            pair,
            profile_version_a: a,
            profile_version_b: b,
        })
    };

    assert!(queue
        .enqueue_unique(payload.clone(), &at(1, 1))
        .await
        .unwrap()
        .is_some());
    assert_eq!(queue.claim_next("worker", 1).await.unwrap().len(), 1);

    assert!(queue
        .enqueue_unique(payload.clone(), &at(1, 1))
        .await
        .unwrap()
        .is_none());
    assert!(queue
        .enqueue_unique(payload, &at(1, 2))
        .await
        .unwrap()
        .is_some());

    test_db.cleanup().await.unwrap();
}
