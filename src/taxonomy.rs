// 🏷️ Organization Taxonomy - Rules as Data
// Phrase and multi-term rules that sort nonprofit names into school-linked categories

use crate::config::ConfigError;
use anyhow::{Context, Result};
use log::{error, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Rule tables shipped with the crate.
pub const BUILTIN_TAXONOMY_JSON: &str = include_str!("../rules/taxonomy.json");

static BUILTIN: Lazy<Taxonomy> = Lazy::new(|| {
    Taxonomy::from_json(BUILTIN_TAXONOMY_JSON).unwrap_or_else(|e| {
        error!("Built-in taxonomy is invalid, every name will classify as 0: {:#}", e);
        Taxonomy::empty()
    })
});

// ============================================================================
// CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Category {
    /// Dropped or unclassified; never matched
    Unclassified = 0,
    /// Parent-teacher association
    Pta = 1,
    /// Parent-teacher organization
    Pto = 2,
    /// Arts and sports boosters
    Booster = 3,
    /// Other single-school supporting nonprofit
    Other = 4,
}

impl Category {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Unclassified => "unclassified",
            Category::Pta => "PTA",
            Category::Pto => "PTO",
            Category::Booster => "booster",
            Category::Other => "other",
        }
    }

    pub fn is_school_linked(&self) -> bool {
        *self != Category::Unclassified
    }
}

impl From<Category> for u8 {
    fn from(category: Category) -> u8 {
        category.code()
    }
}

impl TryFrom<u8> for Category {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Category::Unclassified),
            1 => Ok(Category::Pta),
            2 => Ok(Category::Pto),
            3 => Ok(Category::Booster),
            4 => Ok(Category::Other),
            other => Err(format!("unknown category code {}", other)),
        }
    }
}

// ============================================================================
// RULE TABLES
// ============================================================================

/// Literal phrases plus unordered multi-term rules for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub phrases: Vec<String>,

    /// Each inner list matches when every member occurs somewhere in the name
    #[serde(default)]
    pub terms: Vec<Vec<String>>,
}

impl RuleSet {
    fn matching_phrase(&self, upper: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| upper.contains(phrase.as_str()))
            .map(String::as_str)
    }

    fn matching_terms(&self, upper: &str) -> Option<&[String]> {
        self.terms
            .iter()
            .find(|words| contains_terms(upper, words))
            .map(Vec::as_slice)
    }

    fn rule_count(&self) -> usize {
        self.phrases.len() + self.terms.len()
    }
}

/// True when every word occurs in the text, in any order.
pub fn contains_terms(text: &str, words: &[String]) -> bool {
    words.iter().all(|word| text.contains(word.as_str()))
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

/// Which rule decided a classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchedRule {
    DropPhrase(String),
    Phrase(String),
    Terms(Vec<String>),
    NoRule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub rule: MatchedRule,
}

impl Classification {
    pub fn is_dropped(&self) -> bool {
        matches!(self.rule, MatchedRule::DropPhrase(_))
    }
}

// ============================================================================
// TAXONOMY
// ============================================================================

/// Versioned rule tables. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub version: String,

    #[serde(default)]
    pub drop: Vec<String>,

    #[serde(default)]
    pub pta: RuleSet,

    #[serde(default)]
    pub pto: RuleSet,

    #[serde(default)]
    pub booster: RuleSet,

    #[serde(default)]
    pub other: RuleSet,
}

impl Taxonomy {
    fn empty() -> Self {
        Taxonomy {
            version: "empty".to_string(),
            drop: Vec::new(),
            pta: RuleSet::default(),
            pto: RuleSet::default(),
            booster: RuleSet::default(),
            other: RuleSet::default(),
        }
    }

    /// The rule tables embedded in the crate.
    pub fn builtin() -> &'static Taxonomy {
        &BUILTIN
    }

    /// Load rules from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read taxonomy file: {:?}", path.as_ref()))?;

        Taxonomy::from_json(&content)
            .with_context(|| format!("Invalid taxonomy file: {:?}", path.as_ref()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let taxonomy: Taxonomy =
            serde_json::from_str(json).context("Failed to parse taxonomy JSON")?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    /// Reject tables that would silently misclassify.
    ///
    /// Names are upper-cased before comparison, so a literal containing
    /// lower-case letters could never match. An empty literal would match
    /// every name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::new("version", "taxonomy version is empty"));
        }

        validate_phrases("drop", &self.drop)?;

        for (name, set) in self.rule_sets() {
            validate_phrases(&format!("{}.phrases", name), &set.phrases)?;

            for (i, words) in set.terms.iter().enumerate() {
                let field = format!("{}.terms[{}]", name, i);
                if words.len() < 2 {
                    return Err(ConfigError::new(
                        &field,
                        "multi-term rule needs at least two members",
                    ));
                }
                validate_phrases(&field, words)?;
            }

            warn_duplicates(name, &set.phrases);
        }

        warn_duplicates("drop", &self.drop);
        Ok(())
    }

    fn rule_sets(&self) -> [(&'static str, &RuleSet); 4] {
        [
            ("pta", &self.pta),
            ("pto", &self.pto),
            ("booster", &self.booster),
            ("other", &self.other),
        ]
    }

    pub fn rule_count(&self) -> usize {
        self.drop.len()
            + self
                .rule_sets()
                .iter()
                .map(|(_, set)| set.rule_count())
                .sum::<usize>()
    }

    pub fn classify(&self, name: &str) -> Category {
        self.classify_detailed(name).category
    }

    /// Classify a raw organization name, reporting the rule that decided it.
    ///
    /// Precedence: drop list, PTA, PTO, booster, other. Within a category
    /// literal phrases are tried before multi-term rules.
    pub fn classify_detailed(&self, name: &str) -> Classification {
        let upper = name.to_uppercase();

        if let Some(phrase) = self.drop.iter().find(|p| upper.contains(p.as_str())) {
            return Classification {
                category: Category::Unclassified,
                rule: MatchedRule::DropPhrase(phrase.clone()),
            };
        }

        let ordered = [
            (Category::Pta, &self.pta),
            (Category::Pto, &self.pto),
            (Category::Booster, &self.booster),
            (Category::Other, &self.other),
        ];

        for (category, set) in ordered {
            if let Some(phrase) = set.matching_phrase(&upper) {
                return Classification {
                    category,
                    rule: MatchedRule::Phrase(phrase.to_string()),
                };
            }
            if let Some(words) = set.matching_terms(&upper) {
                return Classification {
                    category,
                    rule: MatchedRule::Terms(words.to_vec()),
                };
            }
        }

        Classification {
            category: Category::Unclassified,
            rule: MatchedRule::NoRule,
        }
    }
}

fn validate_phrases(field: &str, phrases: &[String]) -> Result<(), ConfigError> {
    for phrase in phrases {
        if phrase.trim().is_empty() {
            return Err(ConfigError::new(field, "empty rule literal"));
        }
        if phrase.chars().any(|c| c.is_lowercase()) {
            return Err(ConfigError::new(
                field,
                format!("rule literal {:?} is not upper-case", phrase),
            ));
        }
    }
    Ok(())
}

fn warn_duplicates(field: &str, phrases: &[String]) {
    let mut seen = HashSet::new();
    for phrase in phrases {
        if !seen.insert(phrase.as_str()) {
            warn!("Duplicate rule literal in {}: {:?}", field, phrase);
        }
    }
}

/// Classify with the built-in rule tables.
pub fn classify(name: &str) -> Category {
    Taxonomy::builtin().classify(name)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_taxonomy() -> Taxonomy {
        Taxonomy::from_json(
            r#"{
                "version": "test-1",
                "drop": ["HOME SCHOOL"],
                "pta": {"phrases": [" PTA", "PTSA"]},
                "pto": {"phrases": [" PTO"], "terms": [["PARENT", "TEACHER", " ORG"]]},
                "booster": {"phrases": ["BAND"], "terms": [["SCHOOL", "DRAMA"]]},
                "other": {"phrases": ["SCHOOL FOUNDATION"], "terms": [["FRIENDS OF", "ELEM"]]}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_taxonomy_is_valid() {
        let taxonomy = Taxonomy::from_json(BUILTIN_TAXONOMY_JSON).unwrap();
        assert_eq!(taxonomy.version, "2023.06-nc");
        assert!(taxonomy.rule_count() > 100);
        assert_eq!(Taxonomy::builtin().version, taxonomy.version);
    }

    #[test]
    fn test_builtin_taxonomy_is_not_the_empty_fallback() {
        let builtin = Taxonomy::builtin();
        assert_ne!(builtin, &Taxonomy::empty());
        assert_eq!(builtin.rule_count(), Taxonomy::from_json(BUILTIN_TAXONOMY_JSON).unwrap().rule_count());
        assert_eq!(builtin.classify("LINCOLN PTA"), Category::Pta);
    }

    #[test]
    fn test_category_precedence_order() {
        let taxonomy = small_taxonomy();

        assert_eq!(taxonomy.classify("LINCOLN PTA"), Category::Pta);
        assert_eq!(taxonomy.classify("OAKWOOD PTO INC"), Category::Pto);
        assert_eq!(taxonomy.classify("GREEN HOPE BAND"), Category::Booster);
        assert_eq!(taxonomy.classify("CARY SCHOOL FOUNDATION"), Category::Other);
        assert_eq!(taxonomy.classify("RALEIGH ROTARY CLUB"), Category::Unclassified);
    }

    #[test]
    fn test_pta_phrase_beats_weaker_rules() {
        let taxonomy = small_taxonomy();

        // Also satisfies the PTO multi-term rule and the booster phrase
        let result = taxonomy.classify_detailed("BAND PARENT TEACHER ORGANIZATION PTSA");
        assert_eq!(result.category, Category::Pta);
        assert_eq!(result.rule, MatchedRule::Phrase("PTSA".to_string()));
    }

    #[test]
    fn test_drop_list_wins_over_everything() {
        let taxonomy = small_taxonomy();

        let result = taxonomy.classify_detailed("WAKE HOME SCHOOL PTA");
        assert_eq!(result.category, Category::Unclassified);
        assert!(result.is_dropped());
    }

    #[test]
    fn test_multi_term_rule_ignores_order() {
        let taxonomy = small_taxonomy();

        let result = taxonomy.classify_detailed("TEACHER AND PARENT ORGANIZATION OF APEX");
        assert_eq!(result.category, Category::Pto);
        assert_eq!(
            result.rule,
            MatchedRule::Terms(vec![
                "PARENT".to_string(),
                "TEACHER".to_string(),
                " ORG".to_string()
            ])
        );

        assert_eq!(taxonomy.classify("DRAMA CLUB OF WAKE SCHOOL"), Category::Booster);
        assert_eq!(taxonomy.classify("FRIENDS OF DURANT ELEMENTARY"), Category::Other);
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        let taxonomy = small_taxonomy();
        assert_eq!(taxonomy.classify("lincoln pta"), Category::Pta);
        assert_eq!(taxonomy.classify("Wake Home School Network"), Category::Unclassified);
    }

    #[test]
    fn test_phrase_spacing_is_significant() {
        let taxonomy = small_taxonomy();
        // " PTA" needs a leading space; "CAPTAIN" must not match
        assert_eq!(taxonomy.classify("CAPTAIN FUND"), Category::Unclassified);
    }

    #[test]
    fn test_builtin_drop_list() {
        for name in ["HOME SCHOOL", "HOME AND SCHOOL", "LESBIANS AND GAYS", "LESBIANS & GAYS"] {
            let padded = format!("TRIANGLE {} PTA BAND", name);
            assert_eq!(classify(&padded), Category::Unclassified, "{}", padded);
        }
    }

    #[test]
    fn test_builtin_examples() {
        assert_eq!(classify("LINCOLN PTA"), Category::Pta);
        assert_eq!(classify("WASHINGTON BAND BOOSTERS"), Category::Booster);
        assert_eq!(classify("APEX HIGH SCHOOL FOUNDATION"), Category::Other);
        assert_eq!(classify("NORTH HILLS PTO"), Category::Pto);
    }

    #[test]
    fn test_lowercase_literal_rejected() {
        let err = Taxonomy::from_json(
            r#"{"version": "v", "pta": {"phrases": ["pta"]}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("upper-case"));
    }

    #[test]
    fn test_single_member_terms_rejected() {
        let taxonomy: Taxonomy = serde_json::from_str(
            r#"{"version": "v", "booster": {"terms": [["BAND"]]}}"#,
        )
        .unwrap();
        let err = taxonomy.validate().unwrap_err();
        assert_eq!(err.field, "booster.terms[0]");
    }

    #[test]
    fn test_empty_literal_rejected() {
        let taxonomy: Taxonomy =
            serde_json::from_str(r#"{"version": "v", "drop": [" "]}"#).unwrap();
        assert!(taxonomy.validate().is_err());
    }

    #[test]
    fn test_category_code_round_trip() {
        assert_eq!(Category::try_from(3u8), Ok(Category::Booster));
        assert!(Category::try_from(9u8).is_err());
        assert_eq!(u8::from(Category::Pto), 2);
    }
}
