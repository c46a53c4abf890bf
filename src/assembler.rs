// 🧩 Match Assembler - merge both rounds into the final match table
// Applies acceptance thresholds and records why each organization ended up
// matched, rejected or unmatched.

use crate::config::AcceptanceThresholds;
use crate::organization::{Exclusion, ExclusionReason, NormalizedOrganization};
use crate::school::School;
use crate::selector::{LinkState, Selection};
use crate::similarity::{FieldScores, MatchRound};
use crate::taxonomy::Category;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// MATCH RECORD
// ============================================================================

/// One row of the output table. EIN is unique within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    #[serde(rename = "EIN")]
    pub ein: String,

    #[serde(rename = "Organization_Name")]
    pub organization_name: String,

    #[serde(rename = "Org_code")]
    pub category: Category,

    #[serde(rename = "schID")]
    pub school_id: String,

    #[serde(rename = "leaID")]
    pub leaid: String,

    #[serde(rename = "School_Name")]
    pub school_name: String,

    #[serde(rename = "School_level")]
    pub school_level: String,

    #[serde(rename = "Organization_Street")]
    pub organization_street: String,

    #[serde(rename = "School_Street")]
    pub school_street: String,

    #[serde(rename = "Revenue")]
    pub revenue: Option<f64>,

    /// "name,address" or "name"
    #[serde(rename = "Match_Parameter")]
    pub match_basis: String,

    #[serde(rename = "Name_Score")]
    pub name_score: f64,

    #[serde(rename = "Address_Score")]
    pub address_score: f64,

    #[serde(rename = "Zip_Score")]
    pub zip_score: f64,

    #[serde(rename = "Total_Score")]
    pub total_score: f64,
}

impl MatchRecord {
    fn from_selection(
        org: &NormalizedOrganization,
        school: &School,
        round: MatchRound,
        scores: &FieldScores,
    ) -> Self {
        MatchRecord {
            ein: org.ein.clone(),
            organization_name: org.name.clone(),
            category: org.category,
            school_id: school.id.clone(),
            leaid: school.leaid.clone(),
            school_name: school.name.clone(),
            school_level: school.level.clone(),
            organization_street: org.address.clone(),
            school_street: school.street.clone(),
            revenue: org.revenue,
            match_basis: round.basis().to_string(),
            name_score: scores.name,
            address_score: scores.address,
            zip_score: scores.zip,
            total_score: scores.total(),
        }
    }

    pub fn round(&self) -> MatchRound {
        if self.match_basis == MatchRound::Strict.basis() {
            MatchRound::Strict
        } else {
            MatchRound::NameOnly
        }
    }
}

// ============================================================================
// ACCEPTANCE
// ============================================================================

/// Round 1 keeps a match when either name or address clears its threshold;
/// round 2 needs the name to clear.
pub fn accepts(thresholds: &AcceptanceThresholds, round: MatchRound, scores: &FieldScores) -> bool {
    match round {
        MatchRound::Strict => {
            !(scores.name < thresholds.round_one_name
                && scores.address < thresholds.round_one_address)
        }
        MatchRound::NameOnly => scores.name >= thresholds.round_two_name,
    }
}

// ============================================================================
// LINK OUTCOME
// ============================================================================

/// Terminal status of one input organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkOutcome {
    Matched {
        ein: String,
        round: MatchRound,
        school_id: String,
    },
    /// Best candidate failed the acceptance threshold; organization stays unmatched
    Rejected {
        ein: String,
        round: MatchRound,
        school_id: String,
        scores: FieldScores,
    },
    /// No candidate survived either round
    NoCandidate { ein: String },
    /// Never scored
    Excluded {
        ein: String,
        reason: ExclusionReason,
    },
}

impl LinkOutcome {
    pub fn ein(&self) -> &str {
        match self {
            LinkOutcome::Matched { ein, .. }
            | LinkOutcome::Rejected { ein, .. }
            | LinkOutcome::NoCandidate { ein }
            | LinkOutcome::Excluded { ein, .. } => ein,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, LinkOutcome::Matched { .. })
    }
}

// ============================================================================
// LINK REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkReport {
    /// Accepted matches: round 1 first, then round 2, each in input order
    pub matches: Vec<MatchRecord>,

    /// One entry per input organization, in input order
    pub outcomes: Vec<LinkOutcome>,

    /// Selections that won on registry order over an equal-scoring school
    pub ambiguous: usize,
}

impl LinkReport {
    pub fn matched_count(&self) -> usize {
        self.matches.len()
    }

    pub fn rejected_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, LinkOutcome::Rejected { .. }))
            .count()
    }

    pub fn count_by_round(&self, round: MatchRound) -> usize {
        self.matches.iter().filter(|m| m.round() == round).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} organizations: {} matched ({} name+address, {} name only), {} rejected, {} ambiguous ties",
            self.outcomes.len(),
            self.matched_count(),
            self.count_by_round(MatchRound::Strict),
            self.count_by_round(MatchRound::NameOnly),
            self.rejected_count(),
            self.ambiguous
        )
    }
}

// ============================================================================
// ASSEMBLY
// ============================================================================

/// Build the match table from the final cascade states.
///
/// `excluded` lists organizations (by index) that were never scored.
pub fn assemble(
    orgs: &[NormalizedOrganization],
    schools: &[School],
    states: &[LinkState],
    excluded: &[(usize, Exclusion)],
    thresholds: &AcceptanceThresholds,
) -> LinkReport {
    let mut outcomes: Vec<Option<LinkOutcome>> = vec![None; orgs.len()];
    for (i, exclusion) in excluded {
        outcomes[*i] = Some(LinkOutcome::Excluded {
            ein: orgs[*i].ein.clone(),
            reason: exclusion.reason.clone(),
        });
    }

    let mut report = LinkReport::default();
    let mut seen = HashSet::new();

    for round in [MatchRound::Strict, MatchRound::NameOnly] {
        for (i, state) in states.iter().enumerate() {
            let Some((state_round, selection)) = state.selection() else {
                continue;
            };
            if state_round != round {
                continue;
            }

            let Selection { school, scores, .. } = *selection;
            let org = &orgs[i];
            let school = &schools[school];

            if selection.is_ambiguous() {
                report.ambiguous += 1;
            }

            if !accepts(thresholds, round, &scores) {
                debug!(
                    "Rejected {} -> {} ({:?}): name {:.3}, address {:.3}",
                    org.ein, school.id, round, scores.name, scores.address
                );
                outcomes[i] = Some(LinkOutcome::Rejected {
                    ein: org.ein.clone(),
                    round,
                    school_id: school.id.clone(),
                    scores,
                });
                continue;
            }

            // Round 2 only sees round-1 leftovers, so an EIN can appear once
            if !seen.insert(org.ein.as_str()) {
                continue;
            }

            report
                .matches
                .push(MatchRecord::from_selection(org, school, round, &scores));
            outcomes[i] = Some(LinkOutcome::Matched {
                ein: org.ein.clone(),
                round,
                school_id: school.id.clone(),
            });
        }
    }

    report.outcomes = outcomes
        .into_iter()
        .zip(orgs)
        .map(|(outcome, org)| {
            outcome.unwrap_or_else(|| LinkOutcome::NoCandidate {
                ein: org.ein.clone(),
            })
        })
        .collect();

    info!("Assembled: {}", report.summary());
    report
}

// ============================================================================
// TESTS
// ============================================================================
