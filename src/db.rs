use crate::assembler::{LinkReport, MatchRecord};
use crate::organization::FeedRecord;
use crate::school::SchoolRecord;
use crate::taxonomy::Category;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// CSV INPUT
// ============================================================================

fn read_rows<T: DeserializeOwned, R: Read>(reader: R, source: &str) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line_num, result) in rdr.deserialize().enumerate() {
        let row: T = result.with_context(|| {
            format!("Failed to parse CSV line {} in {}", line_num + 2, source)
        })?;
        rows.push(row);
    }

    Ok(rows)
}

/// Organization feed rows from any CSV reader.
pub fn read_feed<R: Read>(reader: R, source: &str) -> Result<Vec<FeedRecord>> {
    read_rows(reader, source)
}

/// School registry rows from any CSV reader.
pub fn read_schools<R: Read>(reader: R, source: &str) -> Result<Vec<SchoolRecord>> {
    read_rows(reader, source)
}

/// All `.csv` files in a feed directory, concatenated in file-name order
/// (one file per month in the source archives).
pub fn load_feed_dir(dir: &Path) -> Result<Vec<FeedRecord>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read feed directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();

    if files.is_empty() {
        warn!("No CSV files found in {}", dir.display());
    }

    let mut rows = Vec::new();
    for path in files {
        let file = fs::File::open(&path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        let mut batch = read_feed(file, &path.display().to_string())?;
        info!("Loaded {} rows from {}", batch.len(), path.display());
        rows.append(&mut batch);
    }

    Ok(rows)
}

pub fn load_schools_csv(path: &Path) -> Result<Vec<SchoolRecord>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open school registry: {}", path.display()))?;
    read_schools(file, &path.display().to_string())
}

// ============================================================================
// CSV OUTPUT
// ============================================================================

pub fn write_matches<W: Write>(writer: W, matches: &[MatchRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in matches {
        wtr.serialize(record).context("Failed to serialize match")?;
    }
    wtr.flush().context("Failed to flush match table")?;
    Ok(())
}

pub fn write_matches_csv(path: &Path, matches: &[MatchRecord]) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    write_matches(file, matches)
}

/// SHA-256 of the serialized match table; equal tables give equal fingerprints.
pub fn fingerprint_matches(matches: &[MatchRecord]) -> Result<String> {
    let mut buf = Vec::new();
    write_matches(&mut buf, matches)?;

    let mut hasher = Sha256::new();
    hasher.update(&buf);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// SQLITE PERSISTENCE
// ============================================================================

/// One invocation of the linker for one year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRun {
    pub run_id: String,
    pub year: i32,
    pub taxonomy_version: String,
    pub fingerprint: String,
    pub match_count: usize,
    pub linked_at: DateTime<Utc>,
}

impl LinkRun {
    pub fn new(year: i32, taxonomy_version: &str, report: &LinkReport) -> Result<Self> {
        Ok(LinkRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            year,
            taxonomy_version: taxonomy_version.to_string(),
            fingerprint: fingerprint_matches(&report.matches)?,
            match_count: report.matches.len(),
            linked_at: Utc::now(),
        })
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!("journal_mode = {}", mode);

    conn.execute(
        "CREATE TABLE IF NOT EXISTS link_runs (
            run_id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            taxonomy_version TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            match_count INTEGER NOT NULL,
            linked_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            ein TEXT NOT NULL,
            organization_name TEXT NOT NULL,
            org_code INTEGER NOT NULL,
            school_id TEXT NOT NULL,
            leaid TEXT NOT NULL,
            school_name TEXT NOT NULL,
            school_level TEXT NOT NULL,
            organization_street TEXT NOT NULL,
            school_street TEXT NOT NULL,
            revenue REAL,
            match_basis TEXT NOT NULL,
            name_score REAL NOT NULL,
            address_score REAL NOT NULL,
            zip_score REAL NOT NULL,
            total_score REAL NOT NULL,
            run_id TEXT NOT NULL REFERENCES link_runs(run_id),
            UNIQUE(year, ein)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_matches_school ON matches(year, school_id)",
        [],
    )?;

    Ok(())
}

/// Fingerprint of the last run stored for a year, if any.
pub fn last_fingerprint(conn: &Connection, year: i32) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT fingerprint FROM link_runs WHERE year = ?1 ORDER BY linked_at DESC, rowid DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![year])?;

    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Store a run and its matches. A year's previous matches are replaced, so
/// re-running a year never leaves stale rows behind.
pub fn save_run(conn: &mut Connection, run: &LinkRun, matches: &[MatchRecord]) -> Result<usize> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO link_runs (run_id, year, taxonomy_version, fingerprint, match_count, linked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run.run_id,
            run.year,
            run.taxonomy_version,
            run.fingerprint,
            run.match_count as i64,
            run.linked_at.to_rfc3339(),
        ],
    )?;

    let replaced = tx.execute("DELETE FROM matches WHERE year = ?1", params![run.year])?;
    if replaced > 0 {
        info!("Replacing {} stored matches for {}", replaced, run.year);
    }

    let mut inserted = 0;
    for m in matches {
        tx.execute(
            "INSERT INTO matches (
                year, ein, organization_name, org_code, school_id, leaid, school_name,
                school_level, organization_street, school_street, revenue, match_basis,
                name_score, address_score, zip_score, total_score, run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                run.year,
                m.ein,
                m.organization_name,
                m.category.code(),
                m.school_id,
                m.leaid,
                m.school_name,
                m.school_level,
                m.organization_street,
                m.school_street,
                m.revenue,
                m.match_basis,
                m.name_score,
                m.address_score,
                m.zip_score,
                m.total_score,
                run.run_id,
            ],
        )?;
        inserted += 1;
    }

    tx.commit()?;
    info!("✓ Stored {} matches for {} (run {})", inserted, run.year, run.run_id);

    Ok(inserted)
}

pub fn get_matches_for_year(conn: &Connection, year: i32) -> Result<Vec<MatchRecord>> {
    let mut stmt = conn.prepare(
        "SELECT ein, organization_name, org_code, school_id, leaid, school_name, school_level,
                organization_street, school_street, revenue, match_basis,
                name_score, address_score, zip_score, total_score
         FROM matches WHERE year = ?1 ORDER BY id",
    )?;

    let rows = stmt.query_map(params![year], |row| {
        let code: u8 = row.get(2)?;
        let category = Category::try_from(code).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, e.into())
        })?;

        Ok(MatchRecord {
            ein: row.get(0)?,
            organization_name: row.get(1)?,
            category,
            school_id: row.get(3)?,
            leaid: row.get(4)?,
            school_name: row.get(5)?,
            school_level: row.get(6)?,
            organization_street: row.get(7)?,
            school_street: row.get(8)?,
            revenue: row.get(9)?,
            match_basis: row.get(10)?,
            name_score: row.get(11)?,
            address_score: row.get(12)?,
            zip_score: row.get(13)?,
            total_score: row.get(14)?,
        })
    })?;

    let mut matches = Vec::new();
    for row in rows {
        matches.push(row.context("Failed to read stored match")?);
    }

    Ok(matches)
}

pub fn verify_count(conn: &Connection, year: i32) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM matches WHERE year = ?1",
        params![year],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::engine::link;
    use crate::organization::NormalizedOrganization;
    use crate::school::School;

    fn sample_report() -> LinkReport {
        let orgs = vec![
            NormalizedOrganization::new("1", "LINCOLN PTA", Category::Pta)
                .with_zip("27601")
                .with_revenue(5400.0),
            NormalizedOrganization::new("2", "WASHINGTON BAND BOOSTERS", Category::Booster)
                .with_zip("27000"),
        ];
        let schools = vec![
            School::new("10", "lincoln elementary", "27601").with_leaid("920"),
            School::new("20", "washington high school", "28000").with_leaid("920"),
        ];
        link(&orgs, &schools, &LinkConfig::default()).unwrap()
    }

    #[test]
    fn test_read_feed_from_csv() {
        let data = "EIN,STATE,NTEE1,NAME,SEC_NAME,ADDRESS,ZIP5,TOTREV\n\
                    561234567,NC,B,LINCOLN PTA,,100 MAIN ST,27601,5400\n\
                    561234568,NC,B,OAK GROVE PTO,OAK GROVE ELEM PTO,,27603,\n";

        let rows = read_feed(data.as_bytes(), "test.csv").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ein, "561234567");
        assert_eq!(rows[0].revenue, Some(5400.0));
        assert_eq!(rows[0].secondary_name, None);
        assert_eq!(rows[1].secondary_name.as_deref(), Some("OAK GROVE ELEM PTO"));
        assert_eq!(rows[1].revenue, None);
    }

    #[test]
    fn test_read_feed_reports_bad_line() {
        let data = "EIN,STATE,NTEE1,NAME,SEC_NAME,ADDRESS,ZIP5,TOTREV\n\
                    1,NC,B,A PTA,,,27601,not-a-number\n";

        let err = read_feed(data.as_bytes(), "bad.csv").unwrap_err();
        assert!(err.to_string().contains("line 2 in bad.csv"));
    }

    #[test]
    fn test_read_schools_from_csv() {
        let data = "school_id,leaid,school_name,street_location,zip_location,school_level\n\
                    370001,3700030,Lincoln Elementary,100 Main St,27601,Elementary\n";

        let rows = read_schools(data.as_bytes(), "schools.csv").unwrap();
        assert_eq!(rows[0].school_id, "370001");
        assert_eq!(rows[0].school_name.as_deref(), Some("Lincoln Elementary"));
    }

    #[test]
    fn test_written_table_has_expected_columns() {
        let report = sample_report();
        let mut buf = Vec::new();
        write_matches(&mut buf, &report.matches).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(
            header,
            "EIN,Organization_Name,Org_code,schID,leaID,School_Name,School_level,\
             Organization_Street,School_Street,Revenue,Match_Parameter,\
             Name_Score,Address_Score,Zip_Score,Total_Score"
        );
        assert!(text.contains("\"name,address\""));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let first = fingerprint_matches(&sample_report().matches).unwrap();
        let second = fingerprint_matches(&sample_report().matches).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let empty = fingerprint_matches(&[]).unwrap();
        assert_ne!(first, empty);
    }

    #[test]
    fn test_save_and_reload_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let report = sample_report();
        let run = LinkRun::new(2021, "test-1", &report).unwrap();
        let inserted = save_run(&mut conn, &run, &report.matches).unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(verify_count(&conn, 2021).unwrap(), 2);
        assert_eq!(last_fingerprint(&conn, 2021).unwrap(), Some(run.fingerprint.clone()));
        assert_eq!(last_fingerprint(&conn, 2019).unwrap(), None);

        let stored = get_matches_for_year(&conn, 2021).unwrap();
        assert_eq!(stored, report.matches);
    }

    #[test]
    fn test_rerun_replaces_year() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let report = sample_report();
        for _ in 0..2 {
            let run = LinkRun::new(2021, "test-1", &report).unwrap();
            save_run(&mut conn, &run, &report.matches).unwrap();
        }

        assert_eq!(verify_count(&conn, 2021).unwrap(), 2);
        let runs: i64 = conn
            .query_row("SELECT COUNT(*) FROM link_runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(runs, 2);
    }
}
