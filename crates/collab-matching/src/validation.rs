//! Parsing and structural validation of model output.
//!
//! Parsing is all-or-nothing: output that contains no JSON list of candidates
//! is an [`Error::Validation`]. Validation is per candidate: a bad candidate is
//! rejected with a [`Rejection`] and the rest survive.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

use collab_core::{CollaborationType, ConfidenceTier, Error, PairContext, ProposalDraft, Result};

use crate::dedup::fingerprint;

/// Required non-empty text fields, in output order.
pub const REQUIRED_TEXT_FIELDS: [&str; 10] = [
    "title",
    "scientific_question",
    "one_line_summary_a",
    "one_line_summary_b",
    "detailed_rationale",
    "lab_a_contributions",
    "lab_b_contributions",
    "lab_a_benefits",
    "lab_b_benefits",
    "proposed_first_experiment",
];

/// Why a single candidate was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("candidate is not a JSON object")]
    NotAnObject,

    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),

    #[error("unknown collaboration type `{0}`")]
    UnknownCollaborationType(String),

    #[error("unknown confidence tier `{0}`")]
    UnknownConfidenceTier(String),

    #[error("`anchoring_publication_ids` must be a list of identifiers")]
    MalformedAnchors,

    #[error("anchoring publication `{0}` is not authored by either researcher")]
    UnknownPublication(String),
}

/// Outcome of validating one batch of candidates.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub drafts: Vec<ProposalDraft>,
    pub rejections: Vec<Rejection>,
}

/// Strip a surrounding Markdown code fence (```` ``` ```` or ```` ```json ````).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Slice from the first `[`/`{` to the last `]`/`}`, dropping chatter around JSON.
fn outermost_json(raw: &str) -> Option<&str> {
    let start = raw.find(['[', '{'])?;
    let end = raw.rfind([']', '}'])?;
    (end > start).then(|| &raw[start..=end])
}

fn candidates_from_value(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => {
            if let Some(Value::Array(items)) = obj.remove("proposals") {
                return Some(items);
            }
            // A lone proposal object instead of a one-element list.
            obj.contains_key("title")
                .then(|| vec![Value::Object(obj)])
        }
        _ => None,
    }
}

/// Extract the candidate list from raw model output.
///
/// Accepts a JSON array, an object with a `proposals` array, or a lone
/// proposal object, optionally fenced or surrounded
/// by prose. An empty list is valid and means "no proposal".
pub fn parse_candidates(raw: &str) -> Result<Vec<Value>> {
    let unfenced = strip_code_fence(raw);
    let attempts = [Some(raw.trim()), Some(unfenced), outermost_json(unfenced)];

    for text in attempts.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            if let Some(items) = candidates_from_value(value) {
                return Ok(items);
            }
        }
    }

    let preview: String = raw.chars().take(120).collect();
    Err(Error::Validation(format!(
        "model output contains no proposal list: {:?}",
        preview
    )))
}

fn text_field(obj: &Map<String, Value>, field: &'static str) -> std::result::Result<String, Rejection> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(Rejection::MissingField(field))
}

fn anchor_ids(obj: &Map<String, Value>) -> std::result::Result<Vec<String>, Rejection> {
    let Some(value) = obj.get("anchoring_publication_ids") else {
        return Ok(Vec::new());
    };
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(Rejection::MalformedAnchors),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(Rejection::MalformedAnchors),
        })
        .collect()
}

/// Validate one candidate against the pair's publication set.
///
/// `known_publications` maps lower-cased external id to its canonical form;
/// accepted anchors are rewritten to the canonical form.
pub fn validate_candidate(
    value: &Value,
    known_publications: &HashMap<String, String>,
) -> std::result::Result<ProposalDraft, Rejection> {
    let obj = value.as_object().ok_or(Rejection::NotAnObject)?;

    let mut texts = Vec::with_capacity(REQUIRED_TEXT_FIELDS.len());
    for field in REQUIRED_TEXT_FIELDS {
        texts.push(text_field(obj, field)?);
    }

    let raw_type = text_field(obj, "collaboration_type")?;
    let collaboration_type = CollaborationType::parse(&raw_type)
        .ok_or(Rejection::UnknownCollaborationType(raw_type))?;

    let raw_tier = text_field(obj, "confidence_tier")?;
    let confidence_tier =
        ConfidenceTier::parse(&raw_tier).ok_or(Rejection::UnknownConfidenceTier(raw_tier))?;

    let mut anchoring_publication_ids = Vec::new();
    for id in anchor_ids(obj)? {
        let canonical = known_publications
            .get(&id.to_lowercase())
            .ok_or_else(|| Rejection::UnknownPublication(id.clone()))?;
        if !anchoring_publication_ids.contains(canonical) {
            anchoring_publication_ids.push(canonical.clone());
        }
    }

    let reasoning = text_field(obj, "reasoning").ok();

    let mut texts = texts.into_iter();
    let mut next = || texts.next().unwrap_or_default();
    let title = next();
    let scientific_question = next();
    let fingerprint = fingerprint(
        &title,
        collaboration_type,
        &scientific_question,
        &anchoring_publication_ids,
    );

    Ok(ProposalDraft {
        title,
        collaboration_type,
        scientific_question,
        one_line_summary_a: next(),
        one_line_summary_b: next(),
        detailed_rationale: next(),
        lab_a_contributions: next(),
        lab_b_contributions: next(),
        lab_a_benefits: next(),
        lab_b_benefits: next(),
        proposed_first_experiment: next(),
        anchoring_publication_ids,
        confidence_tier,
        reasoning,
        fingerprint,
    })
}

/// Validate every candidate against the context's publications.
pub fn validate_candidates(candidates: &[Value], context: &PairContext) -> ValidationReport {
    let known: HashMap<String, String> = context
        .publication_ids()
        .into_iter()
        .map(|id| (id.to_lowercase(), id.to_string()))
        .collect();

    let mut report = ValidationReport::default();
    for candidate in candidates {
        match validate_candidate(candidate, &known) {
            Ok(draft) => report.drafts.push(draft),
            Err(rejection) => report.rejections.push(rejection),
        }
    }
    report
}
