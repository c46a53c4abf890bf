// School Link - Core Library
// Classifies school-linked nonprofits and links them to a school registry

pub mod config;
pub mod taxonomy;       // Text classifier: rule tables as data
pub mod organization;   // Feed filtering + record normalization
pub mod school;         // School registry normalization
pub mod pairs;          // Candidate pair generation (full cross join)
pub mod similarity;     // Field-level similarity scores
pub mod selector;       // Two-round best-match cascade
pub mod assembler;      // Thresholds + final match table
pub mod engine;         // link() entry point
pub mod db;             // CSV I/O + SQLite persistence

// Re-export commonly used types
pub use config::{AcceptanceThresholds, ConfigError, FeedFilter, LinkConfig};
pub use taxonomy::{
    classify, Category, Classification, MatchedRule, RuleSet, Taxonomy,
};
pub use organization::{
    Batch, Exclusion, ExclusionReason, FeedRecord, NormalizedOrganization, Provenance,
    prepare_organizations,
};
pub use school::{normalize_schools, School, SchoolRecord};
pub use pairs::generate_pairs;
pub use similarity::{score, FieldScores, MatchRound};
pub use selector::{run_cascade, select_round, LinkState, Selection};
pub use assembler::{accepts, LinkOutcome, LinkReport, MatchRecord};
pub use engine::{link, LinkageEngine};
pub use db::{
    LinkRun, fingerprint_matches, load_feed_dir, load_schools_csv, read_feed, read_schools,
    setup_database, save_run, get_matches_for_year, last_fingerprint, verify_count,
    write_matches, write_matches_csv,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
