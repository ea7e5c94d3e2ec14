use std::collections::HashMap;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::cache::{CacheStore, ScopeKey};
use crate::matching::{MatchBasis, MatchResult};
use crate::models::{
    EventRecord, EventStatus, RegistrationRecord, TeacherProgress, TeacherRecord, VolunteerRecord,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is always valid"))
}

/// Batched fetch of events with their registrations, presenters, and
/// attached districts. The whole window is materialized before any
/// aggregation runs; identity-set dedup needs the complete row set.
pub async fn fetch_events(
    pool: &PgPool,
    from: NaiveDate,
    to: NaiveDate,
) -> anyhow::Result<Vec<EventRecord>> {
    let window_start = day_start(from);
    let window_end = day_start(to + chrono::Duration::days(1));

    let rows = sqlx::query(
        "SELECT id, title, start_at, status, original_status, district_partner, \
         career_cluster, duration_minutes, participant_count \
         FROM partner_usage.events \
         WHERE start_at >= $1 AND start_at < $2 \
         ORDER BY start_at",
    )
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await
    .context("failed to fetch events")?;

    let mut events: Vec<EventRecord> = Vec::with_capacity(rows.len());
    let mut index: HashMap<i64, usize> = HashMap::new();
    for row in rows {
        let id: i64 = row.get("id");
        let status: String = row.get("status");
        index.insert(id, events.len());
        events.push(EventRecord {
            id,
            title: row.get("title"),
            start_at: row.get("start_at"),
            status: EventStatus::from_db(&status),
            original_status: row.get("original_status"),
            district_partner: row.get("district_partner"),
            career_cluster: row.get("career_cluster"),
            duration_minutes: row.get("duration_minutes"),
            participant_count: row.get("participant_count"),
            district_names: Vec::new(),
            registrations: Vec::new(),
            presenter_ids: Vec::new(),
        });
    }

    if events.is_empty() {
        return Ok(events);
    }
    let event_ids: Vec<i64> = events.iter().map(|e| e.id).collect();

    let registrations = sqlx::query(
        "SELECT event_id, teacher_id, status, is_simulcast, attendance_confirmed_at \
         FROM partner_usage.teacher_registrations \
         WHERE event_id = ANY($1)",
    )
    .bind(&event_ids)
    .fetch_all(pool)
    .await
    .context("failed to fetch teacher registrations")?;

    for row in registrations {
        let event_id: i64 = row.get("event_id");
        if let Some(&position) = index.get(&event_id) {
            events[position].registrations.push(RegistrationRecord {
                event_id,
                teacher_id: row.get("teacher_id"),
                status: row.get("status"),
                is_simulcast: row.get("is_simulcast"),
                attendance_confirmed_at: row.get("attendance_confirmed_at"),
            });
        }
    }

    let presenters = sqlx::query(
        "SELECT event_id, volunteer_id \
         FROM partner_usage.event_volunteers \
         WHERE event_id = ANY($1)",
    )
    .bind(&event_ids)
    .fetch_all(pool)
    .await
    .context("failed to fetch event presenters")?;

    for row in presenters {
        let event_id: i64 = row.get("event_id");
        if let Some(&position) = index.get(&event_id) {
            events[position].presenter_ids.push(row.get("volunteer_id"));
        }
    }

    let districts = sqlx::query(
        "SELECT ed.event_id, d.name \
         FROM partner_usage.event_districts ed \
         JOIN partner_usage.districts d ON d.id = ed.district_id \
         WHERE ed.event_id = ANY($1) \
         ORDER BY ed.event_id, ed.position",
    )
    .bind(&event_ids)
    .fetch_all(pool)
    .await
    .context("failed to fetch event districts")?;

    for row in districts {
        let event_id: i64 = row.get("event_id");
        if let Some(&position) = index.get(&event_id) {
            events[position].district_names.push(row.get("name"));
        }
    }

    tracing::debug!(events = events.len(), "fetched event window");
    Ok(events)
}

pub async fn fetch_teachers(pool: &PgPool) -> anyhow::Result<Vec<TeacherRecord>> {
    let rows = sqlx::query(
        "SELECT t.id, t.first_name, t.last_name, t.email, s.name AS school_name, d.name AS district_name \
         FROM partner_usage.teachers t \
         LEFT JOIN partner_usage.schools s ON s.id = t.school_id \
         LEFT JOIN partner_usage.districts d ON d.id = s.district_id",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch teacher reference data")?;

    Ok(rows
        .into_iter()
        .map(|row| TeacherRecord {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            school_name: row.get("school_name"),
            district_name: row.get("district_name"),
        })
        .collect())
}

pub async fn fetch_volunteers(pool: &PgPool) -> anyhow::Result<Vec<VolunteerRecord>> {
    let rows = sqlx::query(
        "SELECT id, name, organization, is_local, is_people_of_color \
         FROM partner_usage.volunteers",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch volunteer reference data")?;

    Ok(rows
        .into_iter()
        .map(|row| VolunteerRecord {
            id: row.get("id"),
            name: row.get("name"),
            organization: row.get("organization"),
            is_local: row.get("is_local"),
            is_people_of_color: row.get("is_people_of_color"),
        })
        .collect())
}

pub async fn fetch_roster(pool: &PgPool, virtual_year: &str) -> anyhow::Result<Vec<TeacherProgress>> {
    let rows = sqlx::query(
        "SELECT id, academic_year, virtual_year, building, name, email, \
         target_sessions, teacher_id, is_active \
         FROM partner_usage.teacher_progress \
         WHERE virtual_year = $1 AND is_active \
         ORDER BY name",
    )
    .bind(virtual_year)
    .fetch_all(pool)
    .await
    .context("failed to fetch roster entries")?;

    Ok(rows
        .into_iter()
        .map(|row| TeacherProgress {
            id: row.get("id"),
            academic_year: row.get("academic_year"),
            virtual_year: row.get("virtual_year"),
            building: row.get("building"),
            name: row.get("name"),
            email: row.get("email"),
            target_sessions: row.get("target_sessions"),
            teacher_id: row.get("teacher_id"),
            is_active: row.get("is_active"),
        })
        .collect())
}

#[derive(Debug, Default)]
pub struct RosterImportSummary {
    pub upserted: usize,
    pub deactivated: usize,
}

/// One parsed roster CSV row, prior to normalization.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RosterCsvRow {
    pub name: String,
    pub email: String,
    pub building: Option<String>,
    pub academic_year: Option<String>,
    pub target_sessions: Option<i32>,
}

/// A normalized entry ready to upsert by (email, virtual_year).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUpsert {
    pub name: String,
    pub email: String,
    pub building: Option<String>,
    pub academic_year: String,
    pub target_sessions: i32,
}

#[derive(Debug, Default)]
pub struct RosterImportPlan {
    pub upserts: Vec<RosterUpsert>,
    pub deactivate_emails: Vec<String>,
    pub skipped: usize,
}

/// Decide what a roster import does before any SQL runs: which rows to
/// upsert (emails lowercased and trimmed, names trimmed, missing years
/// defaulted) and which currently active entries to soft-deactivate
/// because the file no longer carries them. Rows without an email are
/// skipped and counted.
pub fn plan_roster_import(
    rows: &[RosterCsvRow],
    active_emails: &[String],
    virtual_year: &str,
) -> RosterImportPlan {
    let mut plan = RosterImportPlan::default();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for row in rows {
        let email = row.email.trim().to_lowercase();
        if email.is_empty() {
            tracing::warn!(name = %row.name, "skipping roster row without an email");
            plan.skipped += 1;
            continue;
        }
        seen.insert(email.clone());
        plan.upserts.push(RosterUpsert {
            name: row.name.trim().to_string(),
            email,
            building: row.building.clone(),
            academic_year: row
                .academic_year
                .clone()
                .unwrap_or_else(|| virtual_year.to_string()),
            target_sessions: row.target_sessions.unwrap_or(0),
        });
    }

    plan.deactivate_emails = active_emails
        .iter()
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !seen.contains(email))
        .collect();
    plan
}

/// Import a roster CSV for one virtual year. Upserts by
/// (email, virtual_year); active entries absent from the file are
/// soft-deactivated, never deleted, so their history and any manual
/// match survive a re-import.
pub async fn import_roster_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    virtual_year: &str,
) -> anyhow::Result<RosterImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open roster csv {}", csv_path.display()))?;
    let mut rows: Vec<RosterCsvRow> = Vec::new();
    for result in reader.deserialize::<RosterCsvRow>() {
        rows.push(result.context("malformed roster csv row")?);
    }

    let active: Vec<String> = sqlx::query(
        "SELECT email FROM partner_usage.teacher_progress \
         WHERE virtual_year = $1 AND is_active",
    )
    .bind(virtual_year)
    .fetch_all(pool)
    .await
    .context("failed to fetch active roster entries")?
    .into_iter()
    .map(|row| row.get("email"))
    .collect();

    let plan = plan_roster_import(&rows, &active, virtual_year);
    let mut summary = RosterImportSummary::default();

    for entry in &plan.upserts {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.teacher_progress
            (id, academic_year, virtual_year, building, name, email, target_sessions, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            ON CONFLICT (email, virtual_year) DO UPDATE
            SET academic_year = EXCLUDED.academic_year,
                building = EXCLUDED.building,
                name = EXCLUDED.name,
                target_sessions = EXCLUDED.target_sessions,
                is_active = TRUE
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.academic_year)
        .bind(virtual_year)
        .bind(&entry.building)
        .bind(&entry.name)
        .bind(&entry.email)
        .bind(entry.target_sessions)
        .execute(pool)
        .await?;
        summary.upserted += 1;
    }

    let deactivated = sqlx::query(
        "UPDATE partner_usage.teacher_progress \
         SET is_active = FALSE \
         WHERE virtual_year = $1 AND is_active AND email = ANY($2)",
    )
    .bind(virtual_year)
    .bind(&plan.deactivate_emails)
    .execute(pool)
    .await?;
    summary.deactivated = deactivated.rows_affected() as usize;

    Ok(summary)
}

/// Persist an auto-match pass as one transaction: either every binding
/// commits or none do. Unmatched results carry no binding and are
/// skipped.
pub async fn apply_matches(pool: &PgPool, results: &[MatchResult]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await.context("failed to start match transaction")?;
    let mut applied = 0usize;

    for result in results {
        if result.basis == MatchBasis::Unmatched {
            continue;
        }
        let updated = sqlx::query(
            "UPDATE partner_usage.teacher_progress SET teacher_id = $1 WHERE id = $2",
        )
        .bind(result.teacher_id)
        .bind(result.progress_id)
        .execute(&mut *tx)
        .await
        .context("failed to persist a roster match")?;
        applied += updated.rows_affected() as usize;
    }

    tx.commit().await.context("failed to commit match transaction")?;
    Ok(applied)
}

/// Manual override: bind a roster entry to a teacher, or clear the
/// binding with `None`. No similarity check; the operator always wins.
pub async fn apply_match_one(
    pool: &PgPool,
    progress_id: Uuid,
    teacher_id: Option<Uuid>,
) -> anyhow::Result<()> {
    let updated = sqlx::query(
        "UPDATE partner_usage.teacher_progress SET teacher_id = $1 WHERE id = $2",
    )
    .bind(teacher_id)
    .bind(progress_id)
    .execute(pool)
    .await
    .context("failed to persist manual match")?;

    if updated.rows_affected() == 0 {
        bail!("no roster entry with id {progress_id}");
    }
    Ok(())
}

/// Postgres backing for the report cache: one row per scope key, payload
/// and timestamp replaced together in a single upsert.
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        PgCacheStore { pool }
    }
}

impl CacheStore for PgCacheStore {
    async fn load(
        &self,
        key: &str,
    ) -> anyhow::Result<Option<(serde_json::Value, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT payload, last_updated FROM partner_usage.report_cache WHERE scope_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read cache entry")?;

        Ok(row.map(|row| (row.get("payload"), row.get("last_updated"))))
    }

    async fn save(
        &self,
        scope: &ScopeKey,
        payload: &serde_json::Value,
        last_updated: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.report_cache
            (scope_key, virtual_year, district, payload, last_updated)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (scope_key) DO UPDATE
            SET payload = EXCLUDED.payload, last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(scope.storage_key())
        .bind(scope.year.label())
        .bind(&scope.district)
        .bind(payload)
        .bind(last_updated)
        .execute(&self.pool)
        .await
        .context("failed to write cache entry")?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM partner_usage.report_cache WHERE scope_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("failed to remove cache entry")?;
        Ok(())
    }

    async fn remove_year(&self, year_label: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM partner_usage.report_cache WHERE virtual_year = $1")
            .bind(year_label)
            .execute(&self.pool)
            .await
            .context("failed to remove cache entries for year")?;
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM partner_usage.report_cache")
            .execute(&self.pool)
            .await
            .context("failed to clear report cache")?;
        Ok(())
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let districts = vec![
        (
            Uuid::parse_str("7b3f0a46-1c24-4f0b-9a6e-2d1f30b6c001")?,
            "Hampton City Schools",
        ),
        (
            Uuid::parse_str("7b3f0a46-1c24-4f0b-9a6e-2d1f30b6c002")?,
            "Newport News Public Schools",
        ),
        (
            Uuid::parse_str("7b3f0a46-1c24-4f0b-9a6e-2d1f30b6c003")?,
            "Norfolk Public Schools",
        ),
    ];
    for (id, name) in districts.iter().copied() {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.districts (id, name)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let schools = vec![
        (
            Uuid::parse_str("5a51e6d0-88a1-4e0e-b7c4-9f4a12e4a001")?,
            "Jones Magnet Middle",
            districts[0].0,
        ),
        (
            Uuid::parse_str("5a51e6d0-88a1-4e0e-b7c4-9f4a12e4a002")?,
            "Heritage High",
            districts[1].0,
        ),
        (
            Uuid::parse_str("5a51e6d0-88a1-4e0e-b7c4-9f4a12e4a003")?,
            "Granby Elementary",
            districts[2].0,
        ),
    ];
    for (id, name, district_id) in schools.iter().copied() {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.schools (id, name, district_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (name, district_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(district_id)
        .execute(pool)
        .await?;
    }

    let teachers = vec![
        (
            Uuid::parse_str("9c80b1f2-6a4d-4f3e-8a11-54f2b8c1d001")?,
            "Dana",
            "Reeves",
            "dana.reeves@example.org",
            schools[0].0,
        ),
        (
            Uuid::parse_str("9c80b1f2-6a4d-4f3e-8a11-54f2b8c1d002")?,
            "Robert",
            "Smith",
            "robert.smith@example.org",
            schools[1].0,
        ),
        (
            Uuid::parse_str("9c80b1f2-6a4d-4f3e-8a11-54f2b8c1d003")?,
            "Maya",
            "Okafor",
            "maya.okafor@example.org",
            schools[2].0,
        ),
    ];
    for (id, first, last, email, school_id) in teachers.iter().copied() {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.teachers (id, first_name, last_name, email, school_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(first)
        .bind(last)
        .bind(email)
        .bind(school_id)
        .execute(pool)
        .await?;
    }

    let volunteers = vec![
        (
            Uuid::parse_str("2f6c9e1a-3b5d-4c7e-9f80-1a2b3c4d5001")?,
            "Priya Shah",
            "Tidewater Robotics",
            true,
            true,
        ),
        (
            Uuid::parse_str("2f6c9e1a-3b5d-4c7e-9f80-1a2b3c4d5002")?,
            "Chris Doyle",
            "Meridian Aerospace",
            false,
            false,
        ),
    ];
    for (id, name, organization, is_local, is_poc) in volunteers.iter().copied() {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.volunteers
            (id, name, organization, is_local, is_people_of_color)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(organization)
        .bind(is_local)
        .bind(is_poc)
        .execute(pool)
        .await?;
    }

    let events = vec![
        (
            1001i64,
            "Career Day: Robotics",
            "2024-10-08T14:00:00Z",
            "completed",
            Some("Successfully Completed"),
            "Engineering",
        ),
        (
            1002i64,
            "Life of an Aerospace Engineer",
            "2025-01-15T14:00:00Z",
            "completed",
            Some("Moved to In-Person"),
            "Engineering",
        ),
        (
            1003i64,
            "Intro to Nursing Careers",
            "2025-02-20T15:30:00Z",
            "cancelled",
            Some("Pathful Professional No-Show"),
            "Health Science",
        ),
        (
            1004i64,
            "Marine Biology Q&A",
            "2025-03-12T13:00:00Z",
            "requested",
            None,
            "Science",
        ),
    ];
    for (id, title, start_at, status, original_status, cluster) in events.iter().copied() {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.events
            (id, title, start_at, status, original_status, career_cluster,
             duration_minutes, participant_count)
            VALUES ($1, $2, $3::timestamptz, $4, $5, $6, 45, 28)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(start_at)
        .bind(status)
        .bind(original_status)
        .bind(cluster)
        .execute(pool)
        .await?;
    }

    let registrations = vec![
        (1001i64, teachers[0].0, false),
        (1001i64, teachers[1].0, true),
        (1002i64, teachers[1].0, false),
        (1003i64, teachers[2].0, false),
    ];
    for (event_id, teacher_id, is_simulcast) in registrations.iter().copied() {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.teacher_registrations
            (event_id, teacher_id, is_simulcast)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, teacher_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(teacher_id)
        .bind(is_simulcast)
        .execute(pool)
        .await?;
    }

    let event_volunteers = vec![
        (1001i64, volunteers[0].0),
        (1001i64, volunteers[1].0),
        (1002i64, volunteers[1].0),
    ];
    for (event_id, volunteer_id) in event_volunteers.iter().copied() {
        sqlx::query(
            r#"
            INSERT INTO partner_usage.event_volunteers (event_id, volunteer_id)
            VALUES ($1, $2)
            ON CONFLICT (event_id, volunteer_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(volunteer_id)
        .execute(pool)
        .await?;
    }

    Ok(())
}
