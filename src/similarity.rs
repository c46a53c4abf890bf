// 📏 Similarity Scorer - field-level scores for one organization/school pair

use crate::organization::NormalizedOrganization;
use crate::school::School;
use serde::{Deserialize, Serialize};
use strsim::jaro;

// ============================================================================
// MATCH ROUND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchRound {
    /// Name, address and ZIP; ZIP must agree
    Strict,
    /// Name only, for organizations the strict round left over
    NameOnly,
}

impl MatchRound {
    /// Match basis tag written to the output table
    pub fn basis(&self) -> &'static str {
        match self {
            MatchRound::Strict => "name,address",
            MatchRound::NameOnly => "name",
        }
    }
}

// ============================================================================
// FIELD SCORES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldScores {
    /// Jaro-Winkler similarity of names, [0, 1]
    pub name: f64,

    /// Jaro-Winkler similarity of street addresses, [0, 1]; 0 in round 2
    pub address: f64,

    /// 1.0 when ZIPs are equal, else 0.0; 0 in round 2
    pub zip: f64,
}

impl FieldScores {
    /// Unweighted sum, not a probability
    pub fn total(&self) -> f64 {
        self.name + self.address + self.zip
    }

    pub fn zip_matches(&self) -> bool {
        self.zip == 1.0
    }
}

/// Prefix boost applies only above this Jaro similarity
const BOOST_THRESHOLD: f64 = 0.7;
const PREFIX_SCALE: f64 = 0.1;
const PREFIX_LIMIT: usize = 4;

/// Jaro-Winkler on two normalized strings; a missing side scores 0.
///
/// Standard Winkler boost: at most four shared leading characters count, and
/// only pairs already above 0.7 Jaro are boosted.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let sim = jaro(a, b);
    if sim <= BOOST_THRESHOLD {
        return sim;
    }

    let prefix = a
        .chars()
        .zip(b.chars())
        .take(PREFIX_LIMIT)
        .take_while(|(x, y)| x == y)
        .count();

    sim + PREFIX_SCALE * prefix as f64 * (1.0 - sim)
}

fn zip_indicator(a: &str, b: &str) -> f64 {
    if !a.is_empty() && a == b {
        1.0
    } else {
        0.0
    }
}

/// Score one candidate pair for the given round.
pub fn score(org: &NormalizedOrganization, school: &School, round: MatchRound) -> FieldScores {
    let name = string_similarity(&org.name, &school.name);

    match round {
        MatchRound::Strict => FieldScores {
            name,
            address: string_similarity(&org.address, &school.street),
            zip: zip_indicator(&org.zip, &school.zip),
        },
        MatchRound::NameOnly => FieldScores {
            name,
            address: 0.0,
            zip: 0.0,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================
