use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;

use crate::models::{ReportPayload, VirtualYear};

/// Entries older than this are recomputed no matter what they contain.
pub const CACHE_TTL_HOURS: i64 = 24;

/// Fields the current engine emits on every summary. The structural
/// probe checks cached payloads against these lists so the payload
/// schema can evolve without a manual cache migration: an entry written
/// by an older engine version simply reads as a miss.
const SUMMARY_PROBE_FIELDS: &[&str] = &[
    "teacher_count",
    "school_count",
    "session_count",
    "experience_count",
    "organization_count",
    "professional_count",
    "professional_of_color_count",
    "local_professional_count",
    "local_session_count",
    "local_session_percent",
    "poc_session_count",
    "poc_session_percent",
    "total_students",
];

const ROW_PROBE_FIELDS: &[&str] = &[
    "event_id",
    "title",
    "date",
    "time_label",
    "category",
    "district_name",
    "presenters",
    "duration_minutes",
    "participant_count",
];

/// Cache partition key: virtual year, optional district, optional date
/// range. Only full-scope keys (no date range) are ever cached; narrower
/// queries re-aggregate from the cached full-scope rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKey {
    pub year: VirtualYear,
    pub district: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl ScopeKey {
    pub fn new(
        year_label: &str,
        district: Option<String>,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> anyhow::Result<ScopeKey> {
        let year = VirtualYear::parse(year_label)
            .context("a report scope requires a valid virtual year")?;
        Ok(ScopeKey { year, district, date_from, date_to })
    }

    pub fn full_year(year: VirtualYear) -> ScopeKey {
        ScopeKey { year, district: None, date_from: None, date_to: None }
    }

    pub fn is_full_scope(&self) -> bool {
        self.date_from.is_none() && self.date_to.is_none()
    }

    pub fn storage_key(&self) -> String {
        format!(
            "{}|{}",
            self.year.label(),
            self.district.as_deref().unwrap_or("-"),
        )
    }

    /// Effective date window: explicit bounds clamped onto the year.
    pub fn window(&self) -> (NaiveDate, NaiveDate) {
        (
            self.date_from.unwrap_or_else(|| self.year.starts_on()),
            self.date_to.unwrap_or_else(|| self.year.ends_on()),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: ReportPayload,
    pub last_updated: DateTime<Utc>,
}

/// Storage behind the cache. One row per scope key; `save` must replace
/// the payload and timestamp together so a reader never observes a new
/// `last_updated` on a stale payload.
pub trait CacheStore {
    async fn load(&self, key: &str) -> anyhow::Result<Option<(Value, DateTime<Utc>)>>;
    async fn save(
        &self,
        scope: &ScopeKey,
        payload: &Value,
        last_updated: DateTime<Utc>,
    ) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
    /// Drop every entry for one virtual year, district-scoped included.
    async fn remove_year(&self, year_label: &str) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Structural probe: does this cached payload carry every field the
/// current engine expects? Checks the overall summary and, when rows
/// exist, the first session row.
pub fn probe_payload(payload: &Value) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };
    if !object.contains_key("district_summaries") || !object.contains_key("filter_options") {
        return false;
    }

    let Some(summary) = object.get("overall_summary").and_then(Value::as_object) else {
        return false;
    };
    if SUMMARY_PROBE_FIELDS.iter().any(|field| !summary.contains_key(*field)) {
        return false;
    }

    let Some(rows) = object.get("session_rows").and_then(Value::as_array) else {
        return false;
    };
    if let Some(first) = rows.first() {
        let Some(row) = first.as_object() else {
            return false;
        };
        if ROW_PROBE_FIELDS.iter().any(|field| !row.contains_key(*field)) {
            return false;
        }
    }

    true
}

/// Staleness- and schema-aware cache of full-scope aggregation outputs.
/// Storage and clock are injected; nothing here touches global state.
/// Invalidation is the caller's job after any write to the underlying
/// events or teachers.
pub struct ReportCache<S, C> {
    store: S,
    clock: C,
}

impl<S: CacheStore, C: Clock> ReportCache<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        ReportCache { store, clock }
    }

    /// A hit requires: a full-scope key, an entry younger than the TTL,
    /// and a payload that passes the structural probe. Anything else is
    /// a miss; a payload that probes clean but no longer deserializes is
    /// also a miss rather than an error.
    pub async fn get(&self, scope: &ScopeKey) -> anyhow::Result<Option<CacheEntry>> {
        if !scope.is_full_scope() {
            return Ok(None);
        }
        let key = scope.storage_key();
        let Some((value, last_updated)) = self.store.load(&key).await? else {
            tracing::debug!(%key, "cache miss");
            return Ok(None);
        };

        let age = self.clock.now() - last_updated;
        if age >= Duration::hours(CACHE_TTL_HOURS) {
            tracing::debug!(%key, age_hours = age.num_hours(), "cache entry stale");
            return Ok(None);
        }
        if !probe_payload(&value) {
            tracing::debug!(%key, "cache entry failed schema probe, forcing recompute");
            return Ok(None);
        }

        match serde_json::from_value::<ReportPayload>(value) {
            Ok(payload) => {
                tracing::debug!(%key, "cache hit");
                Ok(Some(CacheEntry { payload, last_updated }))
            }
            Err(error) => {
                tracing::warn!(%key, %error, "cached payload unreadable, forcing recompute");
                Ok(None)
            }
        }
    }

    /// Write a freshly computed payload. The store replaces payload and
    /// timestamp in one statement; concurrent recomputes of the same key
    /// are last-write-wins, which is fine because both wrote the same
    /// pure function of the same inputs.
    pub async fn put(
        &self,
        scope: &ScopeKey,
        payload: &ReportPayload,
    ) -> anyhow::Result<DateTime<Utc>> {
        debug_assert!(scope.is_full_scope(), "only full-scope payloads are cached");
        let value = serde_json::to_value(payload).context("failed to serialize report payload")?;
        let last_updated = self.clock.now();
        self.store
            .save(scope, &value, last_updated)
            .await
            .context("failed to persist cache entry")?;
        tracing::debug!(key = %scope.storage_key(), "cache entry written");
        Ok(last_updated)
    }

    pub async fn invalidate(&self, scope: &ScopeKey) -> anyhow::Result<()> {
        self.store.remove(&scope.storage_key()).await
    }

    /// Invalidate every scope of one virtual year in one call, so a
    /// write to the underlying data does not leave district-scoped
    /// entries behind.
    pub async fn invalidate_year(&self, year: &VirtualYear) -> anyhow::Result<()> {
        self.store.remove_year(&year.label()).await
    }

    pub async fn invalidate_all(&self) -> anyhow::Result<()> {
        self.store.clear().await
    }
}
