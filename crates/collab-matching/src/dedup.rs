//! Content fingerprints and duplicate suppression.
//!
//! Two candidates are duplicates when they agree on normalized title,
//! collaboration type, scientific question and the set of anchoring
//! publications. The fingerprint doubles as the stored `content_hash`, so the
//! same function recognizes duplicates of already-stored proposals.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use collab_core::{CollaborationType, PairContext, ProposalDraft};

/// Trim, lower-case and collapse internal whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 fingerprint (hex) of a proposal's identifying content.
pub fn fingerprint(
    title: &str,
    collaboration_type: CollaborationType,
    scientific_question: &str,
    anchoring_publication_ids: &[String],
) -> String {
    let mut ids: Vec<String> = anchoring_publication_ids
        .iter()
        .map(|id| id.trim().to_lowercase())
        .collect();
    ids.sort();
    ids.dedup();

    let mut hasher = Sha256::new();
    hash_field(&mut hasher, &normalize_text(title));
    hash_field(&mut hasher, collaboration_type.as_str());
    hash_field(&mut hasher, &normalize_text(scientific_question));
    hasher.update((ids.len() as u64).to_le_bytes());
    for id in &ids {
        hash_field(&mut hasher, id);
    }
    hex::encode(hasher.finalize())
}

/// Length-prefixed so no field content can shift across a boundary.
fn hash_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

/// Tracks fingerprints already accepted for one pair-version tuple.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    rejected: usize,
}

impl Deduplicator {
    /// Seed with the proposals already stored at the context's current versions.
    pub fn for_context(context: &PairContext) -> Self {
        Self {
            seen: context
                .proposals_at_current_versions()
                .map(|p| p.content_hash.clone())
                .collect(),
            rejected: 0,
        }
    }

    /// Returns `true` if the draft is new; duplicates are counted and rejected.
    pub fn admit(&mut self, draft: &ProposalDraft) -> bool {
        if self.seen.insert(draft.fingerprint.clone()) {
            true
        } else {
            self.rejected += 1;
            false
        }
    }

    /// Number of drafts rejected as duplicates so far.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}
