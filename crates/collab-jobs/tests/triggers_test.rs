//! Trigger API and the non-matching handlers.

mod common;

use serde_json::json;
use uuid::Uuid;

use collab_core::{
    Error, ExpandMatchPoolJob, GenerateProfileJob, JobType, MonthlyRefreshJob, PairKey,
    RefreshReport, SendEmailJob,
};
use collab_inference::mock::MockGenerationBackend;
use collab_jobs::{
    ExpandMatchPoolHandler, GenerateProfileHandler, HandlerOutcome, JobContext, JobHandler,
    MonthlyRefreshHandler, ProgressStage,
};

use common::{profile, seed_researcher, FakeCollaborators, Fixture};

fn ctx(attempts: i32, max_attempts: i32) -> JobContext {
    JobContext {
        job_id: Uuid::new_v4(),
        attempts,
        max_attempts,
        worker_id: "test".into(),
    }
}

fn count_of(fx: &Fixture, job_type: JobType) -> usize {
    fx.store
        .jobs()
        .iter()
        .filter(|j| j.payload.kind() == job_type)
        .count()
}

#[tokio::test]
async fn test_profile_update_enqueues_only_that_researchers_pairs() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let a = seed_researcher(&fx.store, 2, 1);
    let b = seed_researcher(&fx.store, 1, 2);
    let c = seed_researcher(&fx.store, 1, 3);
    let d = seed_researcher(&fx.store, 1, 4);
    fx.store.add_pool_entry(a, b);
    fx.store.add_pool_entry(c, a);
    fx.store.add_pool_entry(c, d);

    let triggers = fx.services.triggers();
    let report = triggers.enqueue_for_profile_update(a).await.unwrap();
    assert_eq!((report.considered, report.enqueued), (2, 2));

    // The sweep sees three pairs; two are already live.
    let sweep = triggers.enqueue_scheduled_sweep().await.unwrap();
    assert_eq!(sweep.considered, 3);
    assert_eq!(sweep.enqueued, 1);
    assert_eq!(sweep.already_queued, 2);
    assert_eq!(count_of(&fx, JobType::RunMatching), 3);
}

#[tokio::test]
async fn test_profile_update_without_profile_enqueues_nothing() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let a = Uuid::new_v4();
    fx.store.add_user(a, true);
    let b = seed_researcher(&fx.store, 1, 1);
    fx.store.add_pool_entry(b, a);

    let report = fx.services.triggers().enqueue_for_profile_update(a).await.unwrap();
    assert_eq!(report.considered, 0);
    assert!(fx.store.jobs().is_empty());
}

#[tokio::test]
async fn test_monthly_refresh_all_covers_profiled_users_once() {
    let fx = Fixture::new(MockGenerationBackend::new());
    for pmid in 1..=3 {
        seed_researcher(&fx.store, 1, pmid);
    }
    fx.store.add_user(Uuid::new_v4(), true);

    let triggers = fx.services.triggers();
    let first = triggers.enqueue_monthly_refresh_all().await.unwrap();
    assert_eq!((first.considered, first.enqueued), (3, 3));

    let again = triggers.enqueue_monthly_refresh_all().await.unwrap();
    assert_eq!((again.enqueued, again.already_queued), (0, 3));
    assert_eq!(count_of(&fx, JobType::MonthlyRefresh), 3);
}

#[tokio::test]
async fn test_self_pair_is_rejected_at_the_trigger() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let a = seed_researcher(&fx.store, 1, 1);

    let err = fx.services.triggers().enqueue_for_new_pair(a, a).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(fx.store.jobs().is_empty());
}

#[tokio::test]
async fn test_pool_expansion_queues_each_new_pair() {
    let a = Uuid::new_v4();
    let (b, c) = (Uuid::new_v4(), Uuid::new_v4());
    let collaborators = FakeCollaborators::with_edges(vec![(a, b), (a, a), (c, a)]);
    let fx = Fixture::with_parts(MockGenerationBackend::new(), collaborators, Default::default());
    let handler = ExpandMatchPoolHandler::new(fx.collaborators.clone(), fx.services.triggers());

    let outcome = handler
        .handle(&ctx(0, 5), &ExpandMatchPoolJob { user_id: a })
        .await
        .unwrap();

    let HandlerOutcome::Completed(Some(value)) = outcome else {
        panic!("expected a completed outcome");
    };
    assert_eq!(value["new_edges"], json!(3));
    assert_eq!(value["matching"]["enqueued"], json!(2));
    assert_eq!(count_of(&fx, JobType::RunMatching), 2);
}

#[tokio::test]
async fn test_profile_generation_runs_through_to_matching() {
    let fx = Fixture::new(MockGenerationBackend::new().with_default_response("[]"));
    let a = seed_researcher(&fx.store, 1, 1);
    let b = seed_researcher(&fx.store, 1, 2);
    fx.store.add_pool_entry(b, a);
    let triggers = fx.services.triggers();

    let queued = triggers
        .enqueue_profile_generation(a, "0000-0002-1825-0097")
        .await
        .unwrap();
    assert!(queued.is_some());
    assert!(triggers
        .enqueue_profile_generation(a, "0000-0002-1825-0097")
        .await
        .unwrap()
        .is_none());

    // generate_profile, then expand_match_pool and run_matching.
    assert_eq!(fx.worker().drain().await.unwrap(), 3);
    assert_eq!(fx.services.progress.get(a).await, Some(ProgressStage::Complete));
    assert_eq!(count_of(&fx, JobType::ExpandMatchPool), 1);
    assert_eq!(count_of(&fx, JobType::RunMatching), 1);
    let pair = PairKey::new(a, b).unwrap();
    assert_eq!(fx.store.results_for_pair(pair).len(), 1);
}

#[tokio::test]
async fn test_profile_generation_reports_error_only_on_last_attempt() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let user_id = Uuid::new_v4();
    let handler = GenerateProfileHandler::new(
        fx.collaborators.clone(),
        fx.services.progress.clone(),
        fx.services.triggers(),
    );
    let job = GenerateProfileJob {
        user_id,
        orcid: "0000-0001-5109-3700".into(),
    };

    *fx.collaborators.generate_result.lock().unwrap() =
        Some(Err(Error::Request("ORCID timeout".into())));
    assert!(handler.handle(&ctx(0, 3), &job).await.is_err());
    assert_eq!(fx.services.progress.get(user_id).await, Some(ProgressStage::Queued));

    *fx.collaborators.generate_result.lock().unwrap() =
        Some(Err(Error::Request("ORCID timeout".into())));
    assert!(handler.handle(&ctx(2, 3), &job).await.is_err());
    match fx.services.progress.get(user_id).await {
        Some(ProgressStage::Error(message)) => assert!(message.contains("ORCID timeout")),
        other => panic!("unexpected stage {:?}", other),
    }
    assert!(fx.store.jobs().is_empty());
}

#[tokio::test]
async fn test_progress_reconciles_with_stored_profile() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let progress = &fx.services.progress;
    let user_id = Uuid::new_v4();

    assert_eq!(progress.reconcile(user_id, false).await, ProgressStage::Unknown);
    assert_eq!(progress.reconcile(user_id, true).await, ProgressStage::Complete);

    progress.set(user_id, ProgressStage::GeneratingProfile).await;
    assert_eq!(
        progress.reconcile(user_id, true).await,
        ProgressStage::GeneratingProfile
    );
}

#[tokio::test]
async fn test_monthly_refresh_with_new_version_requeues_pairs() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let a = seed_researcher(&fx.store, 1, 1);
    let b = seed_researcher(&fx.store, 1, 2);
    fx.store.add_pool_entry(a, b);
    let handler = MonthlyRefreshHandler::new(fx.collaborators.clone(), fx.services.triggers());

    // Unchanged: nothing queued.
    let outcome = handler
        .handle(&ctx(0, 5), &MonthlyRefreshJob { user_id: a })
        .await
        .unwrap();
    let HandlerOutcome::Completed(Some(value)) = outcome else {
        panic!("expected a completed outcome");
    };
    assert_eq!(value["changed"], json!(false));
    assert!(fx.store.jobs().is_empty());

    // The pipeline wrote version 2.
    fx.store.put_profile(profile(a, 2));
    *fx.collaborators.refresh_report.lock().unwrap() = Some(RefreshReport {
        previous_version: Some(1),
        current_version: Some(2),
    });
    let outcome = handler
        .handle(&ctx(0, 5), &MonthlyRefreshJob { user_id: a })
        .await
        .unwrap();
    let HandlerOutcome::Completed(Some(value)) = outcome else {
        panic!("expected a completed outcome");
    };
    assert_eq!(value["changed"], json!(true));
    assert_eq!(value["matching"]["enqueued"], json!(1));
    assert_eq!(count_of(&fx, JobType::RunMatching), 1);
}

#[tokio::test]
async fn test_emails_are_never_collapsed() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let triggers = fx.services.triggers();
    let email = SendEmailJob {
        user_id: Uuid::new_v4(),
        template: "weekly_digest".into(),
        data: json!({"proposals": 3}),
    };

    let first = triggers.enqueue_email(email.clone()).await.unwrap();
    let second = triggers.enqueue_email(email.clone()).await.unwrap();
    assert_ne!(first, second);

    fx.worker().drain().await.unwrap();
    let sent = fx.collaborators.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|e| e.template == "weekly_digest"));
}

#[tokio::test]
async fn test_profile_generation_without_orcid_is_rejected() {
    let fx = Fixture::new(MockGenerationBackend::new());
    let handler = GenerateProfileHandler::new(
        fx.collaborators.clone(),
        fx.services.progress.clone(),
        fx.services.triggers(),
    );
    let user_id = Uuid::new_v4();
    let err = handler
        .handle(&ctx(4, 5), &GenerateProfileJob { user_id, orcid: String::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(matches!(
        fx.services.progress.get(user_id).await,
        Some(ProgressStage::Error(_))
    ));
}
