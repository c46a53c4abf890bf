// 🏫 School Registry - one row per school per year

use crate::organization::{normalize_zip, Batch, Exclusion, ExclusionReason};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// School registry row, in the column layout of the registry extract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchoolRecord {
    pub school_id: String,

    /// Education-agency (LEA) id
    #[serde(default)]
    pub leaid: String,

    #[serde(default)]
    pub school_name: Option<String>,

    #[serde(default)]
    pub street_location: Option<String>,

    #[serde(default)]
    pub zip_location: Option<String>,

    #[serde(default)]
    pub school_level: Option<String>,
}

/// School with comparison fields lowercased once at load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
    pub id: String,
    pub leaid: String,
    pub name: String,
    pub street: String,
    pub zip: String,
    pub level: String,
}

impl School {
    pub fn new(id: &str, name: &str, zip: &str) -> Self {
        School {
            id: id.to_string(),
            leaid: String::new(),
            name: name.to_lowercase(),
            street: String::new(),
            zip: normalize_zip(zip),
            level: String::new(),
        }
    }

    pub fn with_street(mut self, street: &str) -> Self {
        self.street = street.to_lowercase();
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_lowercase();
        self
    }

    pub fn with_leaid(mut self, leaid: &str) -> Self {
        self.leaid = leaid.to_string();
        self
    }
}

fn lowered(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or("").to_lowercase()
}

/// Lowercase registry rows; rows without a name or with a repeated id are excluded.
pub fn normalize_schools(rows: Vec<SchoolRecord>) -> Batch<School> {
    let mut batch = Batch {
        records: Vec::new(),
        excluded: Vec::new(),
    };
    let mut seen = HashSet::new();

    for row in rows {
        let name = lowered(&row.school_name);
        if name.is_empty() {
            warn!("School {} has no name, excluded from matching", row.school_id);
            batch.excluded.push(Exclusion {
                id: row.school_id,
                reason: ExclusionReason::MissingName,
            });
            continue;
        }

        if !seen.insert(row.school_id.clone()) {
            warn!("School id {} repeated in registry, keeping first row", row.school_id);
            batch.excluded.push(Exclusion {
                id: row.school_id,
                reason: ExclusionReason::DuplicateId,
            });
            continue;
        }

        batch.records.push(School {
            street: lowered(&row.street_location),
            zip: normalize_zip(row.zip_location.as_deref().unwrap_or("")),
            level: lowered(&row.school_level),
            name,
            id: row.school_id,
            leaid: row.leaid,
        });
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: Option<&str>) -> SchoolRecord {
        SchoolRecord {
            school_id: id.to_string(),
            leaid: "920".to_string(),
            school_name: name.map(str::to_string),
            street_location: Some("100 MAIN ST".to_string()),
            zip_location: Some("27601".to_string()),
            school_level: Some("Elementary".to_string()),
        }
    }

    #[test]
    fn test_normalize_lowercases_fields() {
        let batch = normalize_schools(vec![record("10", Some("LINCOLN Elementary"))]);
        let school = &batch.records[0];

        assert_eq!(school.name, "lincoln elementary");
        assert_eq!(school.street, "100 main st");
        assert_eq!(school.level, "elementary");
        assert_eq!(school.zip, "27601");
    }

    #[test]
    fn test_nameless_and_repeated_schools_excluded() {
        let batch = normalize_schools(vec![
            record("10", Some("Lincoln")),
            record("11", None),
            record("10", Some("Lincoln again")),
        ]);

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.excluded.len(), 2);
        assert_eq!(batch.excluded[0].reason, ExclusionReason::MissingName);
        assert_eq!(batch.excluded[1].reason, ExclusionReason::DuplicateId);
    }
}
