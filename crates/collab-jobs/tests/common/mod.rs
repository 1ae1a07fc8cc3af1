//! Shared fixtures: in-memory storage, scripted model, fake collaborators.
#![allow(dead_code)]

mod memory;

pub use memory::MemoryStore;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use collab_core::{
    EmailSender, Error, PoolEdge, PoolExpander, PoolSource, ProfileGenerationReport,
    ProfilePipeline, Publication, RefreshReport, ResearcherProfile, Result, SendEmailJob,
};
use collab_db::QueueConfig;
use collab_inference::mock::MockGenerationBackend;
use collab_jobs::{
    JobWorker, PipelineServices, ProfileProgressCache, WorkerBuilder, WorkerConfig,
};
use collab_matching::MatchingEngine;

pub fn profile(user_id: Uuid, version: i32) -> ResearcherProfile {
    ResearcherProfile {
        user_id,
        profile_version: version,
        display_name: format!("Dr. {}", &user_id.to_string()[..8]),
        affiliation: Some("Institute".to_string()),
        research_summary: "Studies RNA granules in motor neurons".to_string(),
        techniques: vec!["live imaging".to_string()],
        experimental_models: vec!["iPSC neurons".to_string()],
        disease_areas: vec!["ALS".to_string()],
        key_targets: vec!["TDP-43".to_string()],
        keywords: vec![],
        grant_titles: vec![],
        updated_at: Utc::now(),
    }
}

pub fn publication(user_id: Uuid, external_id: &str) -> Publication {
    Publication {
        id: Uuid::new_v4(),
        user_id,
        external_id: external_id.to_string(),
        title: format!("Findings {}", external_id),
        journal: Some("Neuron".to_string()),
        year: Some(2023),
        abstract_text: Some("We report granule dynamics.".to_string()),
    }
}

/// A structurally valid proposal candidate anchored on `anchors`.
pub fn candidate(title: &str, anchors: &[&str]) -> Value {
    json!({
        "title": title,
        "collaboration_type": "shared_technique",
        "scientific_question": format!("Question behind {}", title),
        "one_line_summary_a": "Your imaging meets their models.",
        "one_line_summary_b": "Your models meet their imaging.",
        "detailed_rationale": "Both labs study granule dynamics from different angles.",
        "lab_a_contributions": "Imaging",
        "lab_b_contributions": "Models",
        "lab_a_benefits": "Disease relevance",
        "lab_b_benefits": "Resolution",
        "proposed_first_experiment": "Image granules in patient-derived neurons.",
        "anchoring_publication_ids": anchors,
        "confidence_tier": "high"
    })
}

/// Add a researcher who accepts incoming proposals, with a profile and one
/// publication `PMID:<n>`.
pub fn seed_researcher(store: &MemoryStore, version: i32, pmid: u32) -> Uuid {
    let user_id = Uuid::new_v4();
    store.add_user(user_id, true);
    store.put_profile(profile(user_id, version));
    store.add_publication(publication(user_id, &format!("PMID:{}", pmid)));
    user_id
}

/// Scripted stand-in for the profile pipeline, pool service and mailer.
#[derive(Default)]
pub struct FakeCollaborators {
    pub generate_result: Mutex<Option<Result<ProfileGenerationReport>>>,
    pub refresh_report: Mutex<Option<RefreshReport>>,
    pub edges: Mutex<Vec<PoolEdge>>,
    pub sent: Mutex<Vec<SendEmailJob>>,
    pub fail_email: Mutex<bool>,
}

impl FakeCollaborators {
    pub fn with_edges(edges: Vec<(Uuid, Uuid)>) -> Self {
        let fake = Self::default();
        *fake.edges.lock().unwrap() = edges
            .into_iter()
            .map(|(user_id, target_user_id)| PoolEdge {
                user_id,
                target_user_id,
                source: PoolSource::Affiliation,
            })
            .collect();
        fake
    }
}

#[async_trait]
impl ProfilePipeline for FakeCollaborators {
    async fn generate_profile(&self, _user_id: Uuid, orcid: &str) -> Result<ProfileGenerationReport> {
        match self.generate_result.lock().unwrap().take() {
            Some(result) => result,
            None if orcid.is_empty() => Err(Error::InvalidInput("missing ORCID".into())),
            None => Ok(ProfileGenerationReport {
                profile_version: 1,
                publication_count: 12,
            }),
        }
    }

    async fn refresh_profile(&self, _user_id: Uuid) -> Result<RefreshReport> {
        Ok(self
            .refresh_report
            .lock()
            .unwrap()
            .unwrap_or(RefreshReport {
                previous_version: Some(1),
                current_version: Some(1),
            }))
    }
}

#[async_trait]
impl PoolExpander for FakeCollaborators {
    async fn expand_match_pool(&self, _user_id: Uuid) -> Result<Vec<PoolEdge>> {
        Ok(self.edges.lock().unwrap().clone())
    }
}

#[async_trait]
impl EmailSender for FakeCollaborators {
    async fn send(&self, email: &SendEmailJob) -> Result<()> {
        if *self.fail_email.lock().unwrap() {
            return Err(Error::Request("mail relay unavailable".into()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct Fixture {
    pub store: MemoryStore,
    pub backend: MockGenerationBackend,
    pub collaborators: Arc<FakeCollaborators>,
    pub services: PipelineServices,
}

impl Fixture {
    pub fn new(backend: MockGenerationBackend) -> Self {
        Self::with_parts(
            backend,
            FakeCollaborators::default(),
            QueueConfig::default(),
        )
    }

    pub fn with_parts(
        backend: MockGenerationBackend,
        collaborators: FakeCollaborators,
        queue: QueueConfig,
    ) -> Self {
        let store = MemoryStore::new(queue);
        let collaborators = Arc::new(collaborators);
        let shared = Arc::new(store.clone());
        let services = PipelineServices {
            queue: shared.clone(),
            resolver: shared.clone(),
            data: shared.clone(),
            store: shared,
            engine: MatchingEngine::new(Arc::new(backend.clone())),
            profiles: collaborators.clone(),
            pool: collaborators.clone(),
            email: collaborators.clone(),
            progress: ProfileProgressCache::default(),
        };
        Self {
            store,
            backend,
            collaborators,
            services,
        }
    }

    pub fn worker(&self) -> JobWorker {
        WorkerBuilder::new(self.services.queue.clone(), self.services.handler_set())
            .with_config(
                WorkerConfig::default()
                    .with_worker_id("test-worker")
                    .with_poll_interval(10)
                    .with_job_timeout(Duration::from_secs(5)),
            )
            .with_notify(self.store.job_notify())
            .build()
    }
}
