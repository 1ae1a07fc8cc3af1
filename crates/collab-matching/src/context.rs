//! Pair context assembly.

use tracing::debug;

use collab_core::{defaults, MatchingDataSource, PairContext, PairKey, Result};

/// Load everything the engine needs for one pair.
///
/// Returns `Ok(None)` when the pair can no longer be evaluated: a profile is
/// missing or neither researcher has the other in their pool any more. Both
/// happen legitimately between enqueue and processing.
pub async fn assemble_context_for_pair(
    data: &dyn MatchingDataSource,
    pair: PairKey,
    max_publications: usize,
) -> Result<Option<PairContext>> {
    let (a, b) = (pair.researcher_a_id(), pair.researcher_b_id());

    let Some(researcher_a) = data.load_profile(a).await? else {
        debug!(subsystem = "matching", researcher_a_id = %a, "Profile missing, no context");
        return Ok(None);
    };
    let Some(researcher_b) = data.load_profile(b).await? else {
        debug!(subsystem = "matching", researcher_b_id = %b, "Profile missing, no context");
        return Ok(None);
    };
    let Some(direction) = data.pool_direction(pair).await? else {
        debug!(subsystem = "matching", pair = %pair, "No pool edge between pair, no context");
        return Ok(None);
    };

    let publications_a = data.load_publications(a, max_publications).await?;
    let publications_b = data.load_publications(b, max_publications).await?;
    let existing_proposals = data.load_existing_proposals(pair).await?;

    Ok(Some(PairContext {
        pair,
        researcher_a,
        researcher_b,
        publications_a,
        publications_b,
        existing_proposals,
        direction,
    }))
}

/// [`assemble_context_for_pair`] with the default publication limit.
pub async fn assemble_default_context(
    data: &dyn MatchingDataSource,
    pair: PairKey,
) -> Result<Option<PairContext>> {
    assemble_context_for_pair(data, pair, defaults::CONTEXT_MAX_PUBLICATIONS).await
}
