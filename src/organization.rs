// 🏢 Organization Records - feed filtering, classification and normalization
// Two feeds (A = business master file, B = core financial file) are merged on EIN.

use crate::config::FeedFilter;
use crate::taxonomy::{Category, MatchedRule, Taxonomy};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// RAW FEED ROW
// ============================================================================

/// One organization row as it appears in a feed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    #[serde(rename = "EIN")]
    pub ein: String,

    #[serde(rename = "STATE", default)]
    pub state: Option<String>,

    /// NTEE major group letter
    #[serde(rename = "NTEE1", default)]
    pub activity_code: Option<String>,

    #[serde(rename = "NAME", default)]
    pub name: Option<String>,

    /// "Doing business as" name
    #[serde(rename = "SEC_NAME", default)]
    pub secondary_name: Option<String>,

    #[serde(rename = "ADDRESS", default)]
    pub address: Option<String>,

    #[serde(rename = "ZIP5", default)]
    pub zip: Option<String>,

    #[serde(rename = "TOTREV", default)]
    pub revenue: Option<f64>,
}

/// A feed row that survived filtering, with its category.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub record: FeedRecord,
    pub category: Category,
}

// ============================================================================
// EXCLUSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExclusionReason {
    /// Required comparison field (name) absent
    MissingName,
    /// State or activity code outside the configured filter
    OutOfScope,
    /// Id (EIN or school id) already seen earlier in the same source
    DuplicateId,
    /// Name hit the drop list
    DropListed(String),
    /// No taxonomy rule matched
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub id: String,
    pub reason: ExclusionReason,
}

/// Output of a normalization stage: kept records plus why others were removed.
#[derive(Debug, Clone, Default)]
pub struct Batch<T> {
    pub records: Vec<T>,
    pub excluded: Vec<Exclusion>,
}

// ============================================================================
// FEED FILTER + CLASSIFICATION
// ============================================================================

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Keep in-scope rows, drop repeated EINs (first row wins), classify each
/// row on its primary name and drop category 0.
pub fn filter_feed(
    rows: Vec<FeedRecord>,
    filter: &FeedFilter,
    taxonomy: &Taxonomy,
) -> Batch<ClassifiedRecord> {
    let mut batch = Batch {
        records: Vec::new(),
        excluded: Vec::new(),
    };
    let mut seen = HashSet::new();
    let total = rows.len();

    for row in rows {
        let in_state = non_empty(&row.state).is_some_and(|s| s.contains(filter.state.as_str()));
        let in_activity = non_empty(&row.activity_code)
            .is_some_and(|c| c.contains(filter.activity_code.as_str()));

        if !in_state || !in_activity {
            batch.excluded.push(Exclusion {
                id: row.ein,
                reason: ExclusionReason::OutOfScope,
            });
            continue;
        }

        if !seen.insert(row.ein.clone()) {
            batch.excluded.push(Exclusion {
                id: row.ein,
                reason: ExclusionReason::DuplicateId,
            });
            continue;
        }

        let Some(name) = non_empty(&row.name) else {
            batch.excluded.push(Exclusion {
                id: row.ein,
                reason: ExclusionReason::MissingName,
            });
            continue;
        };

        let classification = taxonomy.classify_detailed(name);
        if !classification.category.is_school_linked() {
            let reason = match classification.rule {
                MatchedRule::DropPhrase(phrase) => ExclusionReason::DropListed(phrase),
                _ => ExclusionReason::Unclassified,
            };
            debug!("Dropping {} ({}): {:?}", row.ein, name, reason);
            batch.excluded.push(Exclusion { id: row.ein, reason });
            continue;
        }

        batch.records.push(ClassifiedRecord {
            category: classification.category,
            record: row,
        });
    }

    info!(
        "Feed filter: {} rows in, {} classified, {} excluded",
        total,
        batch.records.len(),
        batch.excluded.len()
    );

    batch
}

/// Feed A reports a "doing business as" name that replaces the primary one.
pub fn prefer_secondary_names(records: &mut [ClassifiedRecord]) {
    for classified in records.iter_mut() {
        if let Some(secondary) = non_empty(&classified.record.secondary_name) {
            classified.record.name = Some(secondary.to_string());
        }
    }
}

// ============================================================================
// NORMALIZED ORGANIZATION
// ============================================================================

/// Which feeds an EIN appeared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Both,
    FeedAOnly,
    FeedBOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrganization {
    pub ein: String,

    /// Lowercased canonical name
    pub name: String,

    /// Lowercased canonical street address (empty when unknown)
    pub address: String,

    /// Canonical 5-digit ZIP (empty when unknown)
    pub zip: String,

    /// Address is only a PO box; kept out of address-based scoring
    pub po_box: bool,

    pub category: Category,
    pub revenue: Option<f64>,
    pub provenance: Provenance,
}

impl NormalizedOrganization {
    /// Builder for callers that already hold clean values.
    pub fn new(ein: &str, name: &str, category: Category) -> Self {
        NormalizedOrganization {
            ein: ein.to_string(),
            name: name.to_lowercase(),
            address: String::new(),
            zip: String::new(),
            po_box: false,
            category,
            revenue: None,
            provenance: Provenance::FeedAOnly,
        }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.po_box = is_po_box(address);
        self.address = address.to_lowercase();
        self
    }

    pub fn with_zip(mut self, zip: &str) -> Self {
        self.zip = normalize_zip(zip);
        self
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = Some(revenue);
        self
    }
}

pub fn is_po_box(address: &str) -> bool {
    address.trim_start().to_uppercase().starts_with("PO BOX")
}

/// Canonical 5-digit ZIP: drops ZIP+4 suffixes and float artifacts ("27601.0"),
/// restores leading zeros lost by numeric columns.
pub fn normalize_zip(raw: &str) -> String {
    let mut zip = raw.trim();
    if let Some(stripped) = zip.strip_suffix(".0") {
        zip = stripped;
    }
    if let Some((head, _)) = zip.split_once('-') {
        zip = head;
    }
    let zip = zip.trim();

    if !zip.is_empty() && zip.len() < 5 && zip.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>5}", zip)
    } else {
        zip.to_string()
    }
}

fn first_non_empty(a: Option<&FeedRecord>, b: Option<&FeedRecord>, field: fn(&FeedRecord) -> &Option<String>) -> String {
    a.and_then(|r| non_empty(field(r)))
        .or_else(|| b.and_then(|r| non_empty(field(r))))
        .unwrap_or_default()
        .to_string()
}

/// Full outer join of the two classified feeds on EIN.
///
/// Each field resolves independently to feed A's value when non-empty,
/// otherwise feed B's. Output order: feed A order, then B-only EINs in
/// feed B order.
pub fn merge_feeds(
    feed_a: &[ClassifiedRecord],
    feed_b: &[ClassifiedRecord],
) -> Batch<NormalizedOrganization> {
    let by_ein_b: HashMap<&str, &ClassifiedRecord> = feed_b
        .iter()
        .map(|c| (c.record.ein.as_str(), c))
        .collect();
    let eins_a: HashSet<&str> = feed_a.iter().map(|c| c.record.ein.as_str()).collect();

    let pairs = feed_a
        .iter()
        .map(|a| (a.record.ein.as_str(), Some(a), by_ein_b.get(a.record.ein.as_str()).copied()))
        .chain(
            feed_b
                .iter()
                .filter(|b| !eins_a.contains(b.record.ein.as_str()))
                .map(|b| (b.record.ein.as_str(), None, Some(b))),
        );

    let mut batch = Batch {
        records: Vec::new(),
        excluded: Vec::new(),
    };

    for (ein, a, b) in pairs {
        let ra = a.map(|c| &c.record);
        let rb = b.map(|c| &c.record);

        let name = first_non_empty(ra, rb, |r| &r.name);
        if name.is_empty() {
            batch.excluded.push(Exclusion {
                id: ein.to_string(),
                reason: ExclusionReason::MissingName,
            });
            continue;
        }

        let address = first_non_empty(ra, rb, |r| &r.address);
        let zip = first_non_empty(ra, rb, |r| &r.zip);

        let provenance = match (a.is_some(), b.is_some()) {
            (true, true) => Provenance::Both,
            (true, false) => Provenance::FeedAOnly,
            _ => Provenance::FeedBOnly,
        };

        // Both sides were classified non-zero by filter_feed
        let category = a.or(b).map(|c| c.category).unwrap_or(Category::Unclassified);

        batch.records.push(NormalizedOrganization {
            ein: ein.to_string(),
            name: name.to_lowercase(),
            po_box: is_po_box(&address),
            address: address.to_lowercase(),
            zip: normalize_zip(&zip),
            category,
            revenue: ra.and_then(|r| r.revenue).or_else(|| rb.and_then(|r| r.revenue)),
            provenance,
        });
    }

    info!(
        "Merged feeds: {} organizations ({} PO box only)",
        batch.records.len(),
        batch.records.iter().filter(|o| o.po_box).count()
    );

    batch
}

/// Filter, classify and merge both feeds into matchable organizations.
pub fn prepare_organizations(
    feed_a: Vec<FeedRecord>,
    feed_b: Vec<FeedRecord>,
    filter: &FeedFilter,
    taxonomy: &Taxonomy,
) -> Batch<NormalizedOrganization> {
    let mut a = filter_feed(feed_a, filter, taxonomy);
    prefer_secondary_names(&mut a.records);
    let b = filter_feed(feed_b, filter, taxonomy);

    let mut merged = merge_feeds(&a.records, &b.records);

    let mut excluded = a.excluded;
    excluded.extend(b.excluded);
    excluded.append(&mut merged.excluded);
    merged.excluded = excluded;

    merged
}

// ============================================================================
// TESTS
// ============================================================================
