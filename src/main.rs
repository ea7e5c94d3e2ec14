use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod aggregate;
mod cache;
mod db;
mod district;
mod matching;
mod models;
mod report;
mod rows;
mod status;

use aggregate::AggregationOptions;
use cache::{ReportCache, ScopeKey, SystemClock};
use models::ReportPayload;
use rows::RowFilters;
use status::Category;

#[derive(Parser)]
#[command(name = "partner-usage-analytics")]
#[command(about = "Virtual session usage analytics and roster matching", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Generate a markdown usage report
    Report {
        /// Virtual year, e.g. 2024-2025
        #[arg(long)]
        year: String,
        #[arg(long)]
        district: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        school: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<Category>,
        #[arg(long)]
        career_cluster: Option<String>,
        /// Include every district with activity, not just the main ones
        #[arg(long, default_value_t = false)]
        show_all: bool,
        /// Skip the cache and recompute from storage
        #[arg(long, default_value_t = false)]
        refresh: bool,
        #[arg(long, default_value_t = aggregate::STUDENTS_PER_TEACHER)]
        students_per_teacher: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Print the monthly activity breakdown
    Monthly {
        #[arg(long)]
        year: String,
        #[arg(long)]
        district: Option<String>,
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Import a teacher roster from a CSV file
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        year: String,
    },
    /// Auto-match roster entries to teacher records
    MatchRoster {
        #[arg(long)]
        year: String,
        /// Persist the bindings; without this the pass is a dry run
        #[arg(long, default_value_t = false)]
        apply: bool,
        #[arg(long, default_value_t = matching::NAME_MATCH_THRESHOLD)]
        threshold: f64,
    },
    /// Manually bind (or clear) one roster entry
    MatchOne {
        #[arg(long)]
        progress_id: Uuid,
        /// Omit to clear an existing binding
        #[arg(long)]
        teacher_id: Option<Uuid>,
    },
    /// Drop cached report payloads after underlying data changes
    #[command(group(
        ArgGroup::new("target")
            .args(["all", "year"])
            .multiple(false)
            .required(true)
    ))]
    InvalidateCache {
        #[arg(long, default_value_t = false)]
        all: bool,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        district: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Report {
            year,
            district,
            from,
            to,
            school,
            search,
            status,
            career_cluster,
            show_all,
            refresh,
            students_per_teacher,
            out,
        } => {
            let scope = ScopeKey::new(&year, district, from, to)?;
            let report_cache = ReportCache::new(db::PgCacheStore::new(pool.clone()), SystemClock);
            let payload = load_or_compute(&pool, &report_cache, &scope, refresh).await?;

            let filters = RowFilters { district: None, school, search, status, career_cluster };
            let narrowed = !scope.is_full_scope()
                || !filters.is_empty()
                || show_all
                || students_per_teacher != aggregate::STUDENTS_PER_TEACHER;

            let display = if narrowed {
                // Narrow queries re-aggregate from the cached unfiltered
                // rows instead of going back to storage.
                let (window_from, window_to) = scope.window();
                let mut narrowed_rows: Vec<_> = payload
                    .session_rows
                    .iter()
                    .filter(|row| row.date >= window_from && row.date <= window_to)
                    .cloned()
                    .collect();
                narrowed_rows = rows::apply_filters(&narrowed_rows, &filters);
                let options = AggregationOptions {
                    show_all,
                    students_per_teacher,
                    ..Default::default()
                };
                let (district_summaries, overall_summary) =
                    aggregate::summarize(&narrowed_rows, &options);
                ReportPayload {
                    filter_options: aggregate::filter_options(&narrowed_rows),
                    session_rows: narrowed_rows,
                    district_summaries,
                    overall_summary,
                }
            } else {
                payload
            };

            let monthly = aggregate::monthly_breakdown(&display.session_rows, &scope.year);
            let status_counts = aggregate::status_breakdown(&display.session_rows);
            let rendered = report::build_report(&scope, &display, &monthly, &status_counts);
            std::fs::write(&out, rendered)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Monthly { year, district, refresh } => {
            let scope = ScopeKey::new(&year, district, None, None)?;
            let report_cache = ReportCache::new(db::PgCacheStore::new(pool.clone()), SystemClock);
            let payload = load_or_compute(&pool, &report_cache, &scope, refresh).await?;
            let monthly = aggregate::monthly_breakdown(&payload.session_rows, &scope.year);

            println!("Monthly activity for {}:", scope.year.label());
            for bucket in monthly {
                println!("- {}: {} rows", bucket.label, bucket.total);
            }
        }
        Commands::ImportRoster { csv, year } => {
            // Store under the canonical label so padded spellings of the
            // same year land in one roster.
            let year = models::VirtualYear::parse(&year)?.label();
            let summary = db::import_roster_csv(&pool, &csv, &year).await?;
            println!(
                "Imported {} roster entries from {} ({} deactivated).",
                summary.upserted,
                csv.display(),
                summary.deactivated
            );
        }
        Commands::MatchRoster { year, apply, threshold } => {
            let year = models::VirtualYear::parse(&year)?.label();
            let entries = db::fetch_roster(&pool, &year).await?;
            let teachers = db::fetch_teachers(&pool).await?;
            let outcome = matching::match_roster(&entries, &teachers, threshold);

            println!(
                "Matched {} by email, {} by name; {} unmatched, {} already bound.",
                outcome.stats.by_email,
                outcome.stats.by_name,
                outcome.stats.unmatched,
                outcome.stats.already_bound
            );
            for result in outcome
                .results
                .iter()
                .filter(|r| r.basis == matching::MatchBasis::Name)
            {
                println!(
                    "- {} bound by name (similarity {:.3})",
                    result.progress_id, result.similarity
                );
            }

            if apply {
                let applied = db::apply_matches(&pool, &outcome.results).await?;
                println!("Persisted {applied} bindings.");
            } else {
                println!("Dry run; pass --apply to persist bindings.");
            }
        }
        Commands::MatchOne { progress_id, teacher_id } => {
            db::apply_match_one(&pool, progress_id, teacher_id).await?;
            match teacher_id {
                Some(teacher_id) => println!("Bound {progress_id} to teacher {teacher_id}."),
                None => println!("Cleared binding on {progress_id}."),
            }
        }
        Commands::InvalidateCache { all, year, district } => {
            let report_cache = ReportCache::new(db::PgCacheStore::new(pool.clone()), SystemClock);
            if all {
                report_cache.invalidate_all().await?;
                println!("Report cache cleared.");
            } else {
                let Some(year) = year else {
                    bail!("--year is required unless --all is given");
                };
                match district {
                    Some(district) => {
                        let scope = ScopeKey::new(&year, Some(district), None, None)?;
                        report_cache.invalidate(&scope).await?;
                        println!("Cache entry {} removed.", scope.storage_key());
                    }
                    None => {
                        // Sweep district-scoped entries along with the
                        // year-wide one; a data write stales them all.
                        let year = models::VirtualYear::parse(&year)?;
                        report_cache.invalidate_year(&year).await?;
                        println!("Cache entries for {} removed.", year.label());
                    }
                }
            }
        }
    }

    Ok(())
}

/// Read a fresh, schema-compatible cache entry for the full-year scope,
/// or recompute from storage and write it back. The full batched fetch
/// completes before aggregation; the dedup sets need every row.
async fn load_or_compute(
    pool: &PgPool,
    report_cache: &ReportCache<db::PgCacheStore, SystemClock>,
    scope: &ScopeKey,
    refresh: bool,
) -> anyhow::Result<ReportPayload> {
    let full_scope = ScopeKey {
        year: scope.year,
        district: scope.district.clone(),
        date_from: None,
        date_to: None,
    };

    if !refresh {
        if let Some(entry) = report_cache.get(&full_scope).await? {
            return Ok(entry.payload);
        }
    }

    let events = db::fetch_events(pool, scope.year.starts_on(), scope.year.ends_on()).await?;
    let teachers: HashMap<Uuid, models::TeacherRecord> = db::fetch_teachers(pool)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();
    let volunteers: HashMap<Uuid, models::VolunteerRecord> = db::fetch_volunteers(pool)
        .await?
        .into_iter()
        .map(|v| (v.id, v))
        .collect();

    let mut session_rows = rows::build_rows(&events, &teachers, &volunteers, None);
    if let Some(district) = full_scope.district.as_deref() {
        session_rows.retain(|row| district::names_match(&row.district_name, district));
    }

    let (district_summaries, overall_summary) =
        aggregate::summarize(&session_rows, &AggregationOptions::default());
    let payload = ReportPayload {
        filter_options: aggregate::filter_options(&session_rows),
        session_rows,
        district_summaries,
        overall_summary,
    };

    report_cache.put(&full_scope, &payload).await?;
    Ok(payload)
}
