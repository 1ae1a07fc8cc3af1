//! Prompt assembly for proposal generation.

use std::fmt::Write;

use collab_core::{defaults, CollaborationType, PairContext, Publication, ResearcherProfile};

/// Instructions shared by every generation request.
const SYSTEM_PROMPT: &str = "\
You are a scientific matchmaker. Given two researchers (A and B) and their \
publications, propose concrete, specific collaborations that neither lab could \
easily do alone. Propose nothing rather than something generic: an empty list \
is a valid answer.

Respond with a JSON array. Each element is an object with these string fields:
title, collaboration_type, scientific_question, one_line_summary_a, \
one_line_summary_b, detailed_rationale, lab_a_contributions, \
lab_b_contributions, lab_a_benefits, lab_b_benefits, proposed_first_experiment, \
confidence_tier, reasoning
and one list field:
anchoring_publication_ids (identifiers copied exactly from the publication lists).

collaboration_type is one of: {types}.
confidence_tier is one of: high, moderate, speculative.
one_line_summary_a is addressed to researcher A, one_line_summary_b to researcher B.";

/// Appended on the retry after unusable output.
const STRICT_SUFFIX: &str = "

Your previous answer could not be used. Output ONLY the JSON array, with no \
prose and no code fence. Every field listed above is required and must be a \
non-empty string, except anchoring_publication_ids which must be a list of \
identifiers that appear verbatim in the publication lists. Do not invent \
identifiers.";

/// Options controlling how much context reaches the model.
#[derive(Debug, Clone)]
pub struct PromptOptions {
    /// Characters kept from each abstract.
    pub abstract_chars: usize,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            abstract_chars: defaults::CONTEXT_ABSTRACT_CHARS,
        }
    }
}

/// System prompt; `strict` adds the stricter retry instructions.
pub fn system_prompt(strict: bool) -> String {
    let types = CollaborationType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let mut prompt = SYSTEM_PROMPT.replace("{types}", &types);
    if strict {
        prompt.push_str(STRICT_SUFFIX);
    }
    prompt
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn write_list(out: &mut String, label: &str, items: &[String]) {
    if !items.is_empty() {
        let _ = writeln!(out, "{}: {}", label, items.join("; "));
    }
}

fn write_researcher(
    out: &mut String,
    label: &str,
    profile: &ResearcherProfile,
    publications: &[Publication],
    options: &PromptOptions,
) {
    let _ = writeln!(out, "## Researcher {}: {}", label, profile.display_name);
    if let Some(affiliation) = &profile.affiliation {
        let _ = writeln!(out, "Affiliation: {}", affiliation);
    }
    let _ = writeln!(out, "Summary: {}", profile.research_summary);
    write_list(out, "Techniques", &profile.techniques);
    write_list(out, "Experimental models", &profile.experimental_models);
    write_list(out, "Disease areas", &profile.disease_areas);
    write_list(out, "Key targets", &profile.key_targets);
    write_list(out, "Keywords", &profile.keywords);
    write_list(out, "Grants", &profile.grant_titles);

    if publications.is_empty() {
        let _ = writeln!(out, "Publications: none on record");
    } else {
        let _ = writeln!(out, "Publications:");
        for publication in publications {
            let year = publication
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "n.d.".to_string());
            let _ = write!(out, "- [{}] {} ({}", publication.external_id, publication.title, year);
            if let Some(journal) = &publication.journal {
                let _ = write!(out, ", {}", journal);
            }
            let _ = writeln!(out, ")");
            if let Some(abstract_text) = publication.abstract_text.as_deref() {
                let abstract_text = abstract_text.trim();
                if !abstract_text.is_empty() {
                    let _ = writeln!(
                        out,
                        "  {}",
                        truncate_chars(abstract_text, options.abstract_chars)
                    );
                }
            }
        }
    }
    out.push('\n');
}

/// User prompt describing the pair.
pub fn user_prompt(context: &PairContext, options: &PromptOptions) -> String {
    let mut out = String::new();
    write_researcher(
        &mut out,
        "A",
        &context.researcher_a,
        &context.publications_a,
        options,
    );
    write_researcher(
        &mut out,
        "B",
        &context.researcher_b,
        &context.publications_b,
        options,
    );

    let existing: Vec<&str> = context
        .existing_proposals
        .iter()
        .map(|p| p.title.as_str())
        .collect();
    if !existing.is_empty() {
        let _ = writeln!(
            out,
            "Already proposed to this pair (do not repeat): {}",
            existing.join("; ")
        );
    }

    out.push_str("Propose collaborations for researchers A and B.");
    out
}
