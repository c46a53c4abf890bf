use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use school_link::{
    last_fingerprint, load_feed_dir, load_schools_csv, normalize_schools, save_run,
    setup_database, write_matches_csv, LinkConfig, LinkRun, LinkageEngine, Taxonomy,
};

#[derive(Parser, Debug)]
#[command(name = "school-link", version, about = "Link school-linked nonprofits to a school registry")]
struct Cli {
    /// Taxonomy rule file (JSON); defaults to the built-in tables
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify and link one year of organization feeds
    Link {
        /// Directory of feed A CSVs (business master file)
        #[arg(long)]
        feed_a: PathBuf,

        /// Directory of feed B CSVs (core financial file)
        #[arg(long)]
        feed_b: PathBuf,

        /// School registry CSV for the same year
        #[arg(long)]
        schools: PathBuf,

        #[arg(long)]
        year: i32,

        /// Output match table (CSV)
        #[arg(long)]
        output: PathBuf,

        /// Threshold / feed filter config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also store the run in this SQLite database
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Print the category code for an organization name
    Classify { name: String },

    /// Validate a rule file and print its version
    Rules,
}

fn load_taxonomy(rules: Option<&Path>) -> Result<Taxonomy> {
    let taxonomy = match rules {
        Some(path) => Taxonomy::from_file(path)?,
        None => Taxonomy::builtin().clone(),
    };
    info!(
        "Taxonomy {} loaded ({} rules)",
        taxonomy.version,
        taxonomy.rule_count()
    );
    Ok(taxonomy)
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();

    match cli.command {
        Command::Link {
            feed_a,
            feed_b,
            schools,
            year,
            output,
            config,
            db,
        } => {
            let taxonomy = load_taxonomy(cli.rules.as_deref())?;
            let config = match config {
                Some(path) => LinkConfig::from_file(&path)?,
                None => LinkConfig::default(),
            };
            let engine = LinkageEngine::with_config(taxonomy, config)?;

            run_link(&engine, &feed_a, &feed_b, &schools, year, &output, db.as_deref())
        }
        Command::Classify { name } => {
            let taxonomy = load_taxonomy(cli.rules.as_deref())?;
            let result = taxonomy.classify_detailed(&name);
            println!("{}\t{}\t{:?}", result.category.code(), result.category.as_str(), result.rule);
            Ok(())
        }
        Command::Rules => {
            let taxonomy = load_taxonomy(cli.rules.as_deref())?;
            println!("{}\t{} rules", taxonomy.version, taxonomy.rule_count());
            Ok(())
        }
    }
}

fn run_link(
    engine: &LinkageEngine,
    feed_a: &Path,
    feed_b: &Path,
    schools_path: &Path,
    year: i32,
    output: &Path,
    db_path: Option<&Path>,
) -> Result<()> {
    info!("Linking organizations for {}", year);

    let rows_a = load_feed_dir(feed_a)?;
    let rows_b = load_feed_dir(feed_b)?;
    let school_rows = load_schools_csv(schools_path)?;

    let schools = normalize_schools(school_rows);
    if !schools.excluded.is_empty() {
        warn!("{} school rows excluded", schools.excluded.len());
    }

    let (orgs, report) = engine.run(rows_a, rows_b, &schools.records)?;
    info!(
        "{} organizations prepared, {} feed rows excluded",
        orgs.records.len(),
        orgs.excluded.len()
    );

    write_matches_csv(output, &report.matches)?;
    info!("✓ Wrote {} matches to {}", report.matches.len(), output.display());

    if let Some(path) = db_path {
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        setup_database(&conn)?;

        let run = LinkRun::new(year, &engine.taxonomy.version, &report)?;
        if last_fingerprint(&conn, year)?.as_deref() == Some(run.fingerprint.as_str()) {
            info!("Match table for {} unchanged since last run", year);
        }
        save_run(&mut conn, &run, &report.matches)?;
    }

    println!("{}", report.summary());
    Ok(())
}
