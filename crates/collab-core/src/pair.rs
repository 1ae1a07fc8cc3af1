//! Canonical researcher pairs and eligibility candidates.
//!
//! Every path that names a pair goes through [`PairKey::new`], which sorts the
//! two identifiers. The ordering is byte-wise, identical to PostgreSQL's
//! `uuid` ordering, so `LEAST`/`GREATEST` in SQL and `PairKey` in Rust always
//! agree on which researcher is "A".

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Canonically ordered pair of researcher identifiers (`researcher_a_id < researcher_b_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    researcher_a_id: Uuid,
    researcher_b_id: Uuid,
}

impl PairKey {
    /// Build the canonical pair from two identifiers in either order.
    pub fn new(x: Uuid, y: Uuid) -> Result<Self> {
        if x == y {
            return Err(Error::InvalidInput(format!(
                "a researcher cannot be paired with themselves: {}",
                x
            )));
        }
        let (researcher_a_id, researcher_b_id) = if x < y { (x, y) } else { (y, x) };
        Ok(Self {
            researcher_a_id,
            researcher_b_id,
        })
    }

    pub fn researcher_a_id(&self) -> Uuid {
        self.researcher_a_id
    }

    pub fn researcher_b_id(&self) -> Uuid {
        self.researcher_b_id
    }

    /// Whether the given researcher is one side of this pair.
    pub fn contains(&self, user_id: Uuid) -> bool {
        self.researcher_a_id == user_id || self.researcher_b_id == user_id
    }

    /// The other side of the pair, if `user_id` is a member.
    pub fn other(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.researcher_a_id {
            Some(self.researcher_b_id)
        } else if user_id == self.researcher_b_id {
            Some(self.researcher_a_id)
        } else {
            None
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.researcher_a_id, self.researcher_b_id)
    }
}

/// The idempotency tuple: one evaluation per pair per profile-version pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationKey {
    pub pair: PairKey,
    pub profile_version_a: i32,
    pub profile_version_b: i32,
}

/// Which side(s) of a pair put the other in their match pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolDirection {
    /// Both researchers selected each other.
    Mutual,
    /// Only researcher A selected researcher B.
    AToB,
    /// Only researcher B selected researcher A.
    BToA,
}

impl PoolDirection {
    /// Derive the direction from the two directed edges, `None` if neither exists.
    pub fn from_edges(a_selected_b: bool, b_selected_a: bool) -> Option<Self> {
        match (a_selected_b, b_selected_a) {
            (true, true) => Some(Self::Mutual),
            (true, false) => Some(Self::AToB),
            (false, true) => Some(Self::BToA),
            (false, false) => None,
        }
    }

    /// Initial `(visibility_a, visibility_b)` of a freshly generated proposal.
    ///
    /// The side that did not select the other waits until the initiator acts.
    pub fn initial_visibility(self) -> (ProposalVisibility, ProposalVisibility) {
        match self {
            Self::Mutual => (ProposalVisibility::Visible, ProposalVisibility::Visible),
            Self::AToB => (
                ProposalVisibility::Visible,
                ProposalVisibility::PendingOtherInterest,
            ),
            Self::BToA => (
                ProposalVisibility::PendingOtherInterest,
                ProposalVisibility::Visible,
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutual => "mutual",
            Self::AToB => "a_to_b",
            Self::BToA => "b_to_a",
        }
    }
}

/// Per-side visibility of a proposal in the swipe queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalVisibility {
    Visible,
    PendingOtherInterest,
}

impl ProposalVisibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::PendingOtherInterest => "pending_other_interest",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "visible" => Ok(Self::Visible),
            "pending_other_interest" => Ok(Self::PendingOtherInterest),
            other => Err(Error::Serialization(format!(
                "unknown proposal visibility: {}",
                other
            ))),
        }
    }
}

/// One unit of eligible matching work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairCandidate {
    pub researcher_a_id: Uuid,
    pub researcher_b_id: Uuid,
    pub profile_version_a: i32,
    pub profile_version_b: i32,
    pub direction: PoolDirection,
}

impl PairCandidate {
    pub fn pair(&self) -> PairKey {
        PairKey {
            researcher_a_id: self.researcher_a_id,
            researcher_b_id: self.researcher_b_id,
        }
    }

    pub fn evaluation_key(&self) -> EvaluationKey {
        EvaluationKey {
            pair: self.pair(),
            profile_version_a: self.profile_version_a,
            profile_version_b: self.profile_version_b,
        }
    }
}

/// Which pairs an eligibility computation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairScope {
    /// Every pair in the system (scheduled sweep).
    All,
    /// Pairs involving one researcher (profile edit, new pool membership).
    User(Uuid),
    /// A single pair (defensive re-check inside `run_matching`).
    Pair(PairKey),
}
