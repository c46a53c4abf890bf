// 🔍 Linkage Engine - organizations in, match table out
// Pure and deterministic: identical inputs and configuration give identical reports.

use crate::assembler::{assemble, LinkReport};
use crate::config::{ConfigError, LinkConfig};
use crate::organization::{
    prepare_organizations, Batch, Exclusion, ExclusionReason, FeedRecord, NormalizedOrganization,
};
use crate::school::School;
use crate::selector::run_cascade;
use crate::taxonomy::Taxonomy;
use log::{info, warn};
use std::collections::HashSet;

/// Link categorized organizations to schools.
///
/// Organizations without a name, without a school-linked category, or with
/// an EIN already seen earlier in the slice are reported as excluded and never
/// scored. An invalid configuration fails before anything is scored.
pub fn link(
    organizations: &[NormalizedOrganization],
    schools: &[School],
    config: &LinkConfig,
) -> Result<LinkReport, ConfigError> {
    config.validate()?;

    let mut eligible = Vec::with_capacity(organizations.len());
    let mut excluded = Vec::new();
    let mut seen = HashSet::new();

    for (i, org) in organizations.iter().enumerate() {
        let reason = if org.name.trim().is_empty() {
            Some(ExclusionReason::MissingName)
        } else if !org.category.is_school_linked() {
            Some(ExclusionReason::Unclassified)
        } else if !seen.insert(org.ein.as_str()) {
            Some(ExclusionReason::DuplicateId)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!("Organization {} not scored: {:?}", org.ein, reason);
                excluded.push((
                    i,
                    Exclusion {
                        id: org.ein.clone(),
                        reason,
                    },
                ));
            }
            None => eligible.push(i),
        }
    }

    info!(
        "Linking {} organizations against {} schools ({} excluded)",
        eligible.len(),
        schools.len(),
        excluded.len()
    );

    let states = run_cascade(organizations, &eligible, schools);
    Ok(assemble(organizations, schools, &states, &excluded, &config.thresholds))
}

// ============================================================================
// LINKAGE ENGINE
// ============================================================================

/// Rule tables plus configuration, loaded and validated once.
pub struct LinkageEngine {
    pub taxonomy: Taxonomy,
    pub config: LinkConfig,
}

impl LinkageEngine {
    /// Engine with the built-in taxonomy and default thresholds
    pub fn new() -> Self {
        LinkageEngine {
            taxonomy: Taxonomy::builtin().clone(),
            config: LinkConfig::default(),
        }
    }

    /// Validates both before anything is matched.
    pub fn with_config(taxonomy: Taxonomy, config: LinkConfig) -> Result<Self, ConfigError> {
        taxonomy.validate()?;
        config.validate()?;
        Ok(LinkageEngine { taxonomy, config })
    }

    /// Filter, classify and merge the two organization feeds.
    pub fn prepare(
        &self,
        feed_a: Vec<FeedRecord>,
        feed_b: Vec<FeedRecord>,
    ) -> Batch<NormalizedOrganization> {
        prepare_organizations(feed_a, feed_b, &self.config.feed_filter, &self.taxonomy)
    }

    pub fn link(
        &self,
        organizations: &[NormalizedOrganization],
        schools: &[School],
    ) -> Result<LinkReport, ConfigError> {
        link(organizations, schools, &self.config)
    }

    /// Feeds to report in one call.
    pub fn run(
        &self,
        feed_a: Vec<FeedRecord>,
        feed_b: Vec<FeedRecord>,
        schools: &[School],
    ) -> Result<(Batch<NormalizedOrganization>, LinkReport), ConfigError> {
        self.config.validate()?;
        let batch = self.prepare(feed_a, feed_b);
        let report = self.link(&batch.records, schools)?;
        Ok((batch, report))
    }
}

impl Default for LinkageEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::LinkOutcome;
    use crate::similarity::MatchRound;
    use crate::taxonomy::{classify, Category};

    fn feed_row(ein: &str, name: &str, address: &str, zip: &str) -> FeedRecord {
        FeedRecord {
            ein: ein.to_string(),
            state: Some("NC".to_string()),
            activity_code: Some("B".to_string()),
            name: Some(name.to_string()),
            address: Some(address.to_string()),
            zip: Some(zip.to_string()),
            ..FeedRecord::default()
        }
    }

    #[test]
    fn test_lincoln_pta_round_one() {
        assert_eq!(classify("LINCOLN PTA"), Category::Pta);

        let orgs = vec![NormalizedOrganization::new("1", "LINCOLN PTA", Category::Pta).with_zip("27601")];
        let schools = vec![School::new("10", "lincoln elementary", "27601")];

        let report = link(&orgs, &schools, &LinkConfig::default()).unwrap();

        assert_eq!(report.matches.len(), 1);
        let m = &report.matches[0];
        assert_eq!(m.ein, "1");
        assert_eq!(m.school_id, "10");
        assert_eq!(m.match_basis, "name,address");
        assert_eq!(m.zip_score, 1.0);
    }

    #[test]
    fn test_washington_boosters_fall_back_to_name() {
        let orgs = vec![
            NormalizedOrganization::new("2", "WASHINGTON BAND BOOSTERS", Category::Booster)
                .with_zip("27000"),
        ];
        let schools = vec![School::new("20", "washington high school", "28000")];

        let report = link(&orgs, &schools, &LinkConfig::default()).unwrap();

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].match_basis, "name");
        assert!((report.matches[0].name_score - 0.848).abs() < 1e-3);
        assert_eq!(
            report.outcomes[0],
            LinkOutcome::Matched {
                ein: "2".to_string(),
                round: MatchRound::NameOnly,
                school_id: "20".to_string(),
            }
        );
    }

    #[test]
    fn test_round_one_matches_share_zip() {
        let orgs = vec![
            NormalizedOrganization::new("1", "lincoln pta", Category::Pta).with_zip("27601"),
            NormalizedOrganization::new("2", "oak grove pto", Category::Pto).with_zip("27603"),
            NormalizedOrganization::new("3", "cary band boosters", Category::Booster).with_zip("27511"),
        ];
        let schools = vec![
            School::new("10", "lincoln elementary", "27601"),
            School::new("11", "oak grove elementary", "27603"),
            School::new("12", "cary high", "27513"),
        ];

        let report = link(&orgs, &schools, &LinkConfig::default()).unwrap();

        for m in report.matches.iter().filter(|m| m.round() == MatchRound::Strict) {
            let org = orgs.iter().find(|o| o.ein == m.ein).unwrap();
            let school = schools.iter().find(|s| s.id == m.school_id).unwrap();
            assert_eq!(org.zip, school.zip);
        }
    }

    #[test]
    fn test_rejected_round_one_is_not_retried() {
        // Same ZIP but nothing alike; a better name match exists elsewhere
        let orgs = vec![NormalizedOrganization::new("1", "lincoln pta", Category::Pta).with_zip("27601")];
        let schools = vec![
            School::new("10", "zebulon magnet", "27601"),
            School::new("11", "lincoln pta", "28000"),
        ];

        let report = link(&orgs, &schools, &LinkConfig::default()).unwrap();

        assert!(report.matches.is_empty());
        assert!(matches!(
            report.outcomes[0],
            LinkOutcome::Rejected { round: MatchRound::Strict, .. }
        ));
    }

    #[test]
    fn test_unscoreable_organizations_are_excluded() {
        let orgs = vec![
            NormalizedOrganization::new("1", "", Category::Pta),
            NormalizedOrganization::new("2", "rotary club", Category::Unclassified),
            NormalizedOrganization::new("3", "lincoln pta", Category::Pta),
            NormalizedOrganization::new("3", "lincoln pta again", Category::Pta),
        ];
        let schools = vec![School::new("10", "lincoln elementary", "")];

        let report = link(&orgs, &schools, &LinkConfig::default()).unwrap();

        let reasons: Vec<_> = report
            .outcomes
            .iter()
            .filter_map(|o| match o {
                LinkOutcome::Excluded { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            reasons,
            vec![
                ExclusionReason::MissingName,
                ExclusionReason::Unclassified,
                ExclusionReason::DuplicateId
            ]
        );
        assert_eq!(report.matches.len(), 1);
    }

    #[test]
    fn test_drop_listed_names_never_matched() {
        let engine = LinkageEngine::new();
        let feed_a = vec![
            feed_row("1", "LINCOLN HOME SCHOOL PTA", "1 MAIN ST", "27601"),
            feed_row("2", "LINCOLN PTA", "1 MAIN ST", "27601"),
        ];
        let schools = vec![School::new("10", "lincoln elementary", "27601").with_street("1 main st")];

        let (batch, report) = engine.run(feed_a, Vec::new(), &schools).unwrap();

        assert_eq!(batch.records.len(), 1);
        assert!(report.matches.iter().all(|m| m.ein != "1"));
        assert_eq!(report.matches.len(), 1);
    }

    #[test]
    fn test_engine_rejects_bad_thresholds() {
        let mut config = LinkConfig::default();
        config.thresholds.round_two_name = 1.2;

        let result = LinkageEngine::with_config(Taxonomy::builtin().clone(), config);
        assert!(result.is_err());
    }

    #[test]
    fn test_link_rejects_invalid_thresholds() {
        let orgs = vec![NormalizedOrganization::new("1", "lincoln pta", Category::Pta).with_zip("27601")];
        let schools = vec![School::new("10", "lincoln elementary", "27601")];

        let mut config = LinkConfig::default();
        config.thresholds.round_one_name = f64::NAN;
        let err = link(&orgs, &schools, &config).unwrap_err();
        assert_eq!(err.field, "thresholds.round_one_name");

        let mut config = LinkConfig::default();
        config.thresholds.round_two_name = 1.5;
        let err = link(&orgs, &schools, &config).unwrap_err();
        assert_eq!(err.field, "thresholds.round_two_name");

        let mut engine = LinkageEngine::new();
        engine.config.thresholds.round_one_address = -0.2;
        assert!(engine.run(Vec::new(), Vec::new(), &schools).is_err());
    }

    #[test]
    fn test_shared_prefix_alone_does_not_match() {
        let orgs = vec![NormalizedOrganization::new("1", "WAKE PTO", Category::Pto).with_zip("27587")];
        let schools = vec![School::new("10", "wakefield middle", "27614")];

        let report = link(&orgs, &schools, &LinkConfig::default()).unwrap();

        assert!(report.matches.is_empty());
        match &report.outcomes[0] {
            LinkOutcome::Rejected { round, scores, .. } => {
                assert_eq!(*round, MatchRound::NameOnly);
                assert!(scores.name < 0.7);
            }
            other => panic!("expected a rejected name-only selection, got {:?}", other),
        }
    }

    #[test]
    fn test_link_is_deterministic() {
        let engine = LinkageEngine::new();
        let feed_a = vec![
            feed_row("1", "LINCOLN PTA", "1 MAIN ST", "27601"),
            feed_row("2", "WASHINGTON BAND BOOSTERS", "PO BOX 7", "27000"),
            feed_row("3", "OAK GROVE PTO", "9 ELM ST", "27603"),
        ];
        let schools = vec![
            School::new("10", "lincoln elementary", "27601").with_street("1 main st"),
            School::new("20", "washington high school", "28000"),
            School::new("30", "oak grove elementary", "27603").with_street("9 elm st"),
        ];

        let (_, first) = engine.run(feed_a.clone(), Vec::new(), &schools).unwrap();
        let (_, second) = engine.run(feed_a, Vec::new(), &schools).unwrap();

        assert_eq!(first.matches, second.matches);
        assert_eq!(first.outcomes, second.outcomes);
        assert_eq!(first.matches.len(), 3);
    }
}
