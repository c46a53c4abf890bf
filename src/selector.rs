// 🎯 Best-Match Selector - two-round cascade
//
// Round 1 (strict): ZIP must agree, best name + address + ZIP score wins.
// Round 2 (fallback): organizations with no round-1 candidate, plus PO-box
// organizations, compared on name only.
//
// Each organization keeps only its running best candidate, so the cross
// product is never held in memory.

use crate::organization::NormalizedOrganization;
use crate::pairs::generate_pairs;
use crate::school::School;
use crate::similarity::{score, FieldScores, MatchRound};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

// ============================================================================
// SELECTION
// ============================================================================

/// Winning candidate for one organization in one round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub org: usize,
    pub school: usize,
    pub scores: FieldScores,

    /// Other schools that scored exactly the same total (lost on registry order)
    pub tied: usize,
}

impl Selection {
    pub fn total(&self) -> f64 {
        self.scores.total()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.tied > 0
    }
}

// ============================================================================
// LINK STATE
// ============================================================================

/// Where one organization stands in the cascade.
///
/// Round 1 moves `Unmatched` to `Selected` or `RoundOneAttempted`.
/// Round 2 moves `RoundOneAttempted` to `Selected` or `NoCandidate`.
/// `Selected` and `NoCandidate` are terminal; acceptance thresholds are
/// applied to `Selected` afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkState {
    /// Not scored yet
    Unmatched,
    /// Round 1 found no same-ZIP candidate (or was skipped for a PO box)
    RoundOneAttempted,
    Selected {
        round: MatchRound,
        selection: Selection,
    },
    /// Round 2 found no candidate either
    NoCandidate,
}

impl LinkState {
    pub fn after_round(self, round: MatchRound, best: Option<Selection>) -> LinkState {
        match (self, round, best) {
            (LinkState::Unmatched, MatchRound::Strict, Some(selection))
            | (LinkState::RoundOneAttempted, MatchRound::NameOnly, Some(selection)) => {
                LinkState::Selected { round, selection }
            }
            (LinkState::Unmatched, MatchRound::Strict, None) => LinkState::RoundOneAttempted,
            (LinkState::RoundOneAttempted, MatchRound::NameOnly, None) => LinkState::NoCandidate,
            (state, _, _) => state,
        }
    }

    /// PO-box addresses cannot be compared against a street; skip round 1.
    pub fn set_aside(self) -> LinkState {
        match self {
            LinkState::Unmatched => LinkState::RoundOneAttempted,
            state => state,
        }
    }

    pub fn awaits_round_two(&self) -> bool {
        matches!(self, LinkState::RoundOneAttempted)
    }

    pub fn selection(&self) -> Option<(MatchRound, &Selection)> {
        match self {
            LinkState::Selected { round, selection } => Some((*round, selection)),
            _ => None,
        }
    }
}

// ============================================================================
// ROUND SELECTION
// ============================================================================

fn eligible(round: MatchRound, scores: &FieldScores) -> bool {
    if scores.total() <= 0.0 {
        return false;
    }
    match round {
        MatchRound::Strict => scores.zip_matches(),
        MatchRound::NameOnly => true,
    }
}

/// Best school for each listed organization (`members` are indices into `orgs`).
///
/// Arg-max on total score; exact ties keep the first school in registry
/// order and are counted on the selection.
pub fn select_round(
    orgs: &[NormalizedOrganization],
    members: &[usize],
    schools: &[School],
    round: MatchRound,
) -> Vec<Option<Selection>> {
    let mut best: Vec<Option<Selection>> = vec![None; members.len()];

    for (pos, school) in generate_pairs(members.len(), schools.len()) {
        let org = members[pos];
        let scores = score(&orgs[org], &schools[school], round);
        if !eligible(round, &scores) {
            continue;
        }

        let total = scores.total();
        let replace = match &best[pos] {
            None => true,
            Some(current) => total > current.total(),
        };

        if replace {
            best[pos] = Some(Selection {
                org,
                school,
                scores,
                tied: 0,
            });
        } else if let Some(current) = best[pos].as_mut() {
            if total == current.total() {
                current.tied += 1;
            }
        }
    }

    for selection in best.iter().flatten() {
        if selection.is_ambiguous() {
            warn!(
                "{:?} round: {} tied on total {:.4} with {} other school(s); kept {}",
                round,
                orgs[selection.org].ein,
                selection.total(),
                selection.tied,
                schools[selection.school].id
            );
        }
    }

    best
}

/// Run both rounds and return the final state of every organization.
pub fn run_cascade(
    orgs: &[NormalizedOrganization],
    eligible_orgs: &[usize],
    schools: &[School],
) -> Vec<LinkState> {
    let mut states = vec![LinkState::Unmatched; orgs.len()];

    let (po_box, strict): (Vec<usize>, Vec<usize>) =
        eligible_orgs.iter().copied().partition(|&i| orgs[i].po_box);

    for &i in &po_box {
        states[i] = std::mem::replace(&mut states[i], LinkState::Unmatched).set_aside();
    }

    // Round 1
    let round_one = select_round(orgs, &strict, schools, MatchRound::Strict);
    for (&i, best) in strict.iter().zip(round_one) {
        states[i] = std::mem::replace(&mut states[i], LinkState::Unmatched)
            .after_round(MatchRound::Strict, best);
    }

    let selected_one = strict
        .iter()
        .filter(|&&i| states[i].selection().is_some())
        .count();
    info!(
        "Round 1: {} organizations, {} with a same-ZIP candidate ({} PO box set aside)",
        strict.len(),
        selected_one,
        po_box.len()
    );

    // Round 2: leftovers first, then the PO-box set
    let leftovers: Vec<usize> = strict
        .iter()
        .chain(po_box.iter())
        .copied()
        .filter(|&i| states[i].awaits_round_two())
        .collect();

    let round_two = select_round(orgs, &leftovers, schools, MatchRound::NameOnly);
    for (&i, best) in leftovers.iter().zip(round_two) {
        states[i] = std::mem::replace(&mut states[i], LinkState::Unmatched)
            .after_round(MatchRound::NameOnly, best);
        debug!("{} -> {:?}", orgs[i].ein, states[i]);
    }

    info!(
        "Round 2: {} organizations, {} with a name candidate",
        leftovers.len(),
        leftovers
            .iter()
            .filter(|&&i| states[i].selection().is_some())
            .count()
    );

    states
}

// ============================================================================
// TESTS
// ============================================================================
