use std::collections::BTreeMap;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::Category;

/// Program year running Aug 1 through Jul 31, labeled "2024-2025".
/// Distinct from the academic year (Jul 1 - Jun 30), which roster rows
/// carry but which never scopes a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualYear {
    pub start_year: i32,
}

impl VirtualYear {
    pub fn parse(label: &str) -> anyhow::Result<VirtualYear> {
        let (start, end) = label
            .split_once('-')
            .with_context(|| format!("virtual year must look like 2024-2025, got {label:?}"))?;
        let start: i32 = start
            .trim()
            .parse()
            .with_context(|| format!("invalid virtual year start in {label:?}"))?;
        let end: i32 = end
            .trim()
            .parse()
            .with_context(|| format!("invalid virtual year end in {label:?}"))?;
        if end != start + 1 {
            bail!("virtual year must span consecutive years, got {label:?}");
        }
        Ok(VirtualYear { start_year: start })
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start_year, self.start_year + 1)
    }

    pub fn starts_on(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start_year, 8, 1).expect("Aug 1 is always valid")
    }

    pub fn ends_on(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start_year + 1, 7, 31).expect("Jul 31 is always valid")
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.starts_on() && date <= self.ends_on()
    }

    /// Month labels in program order, Aug through Jul.
    pub fn month_labels(&self) -> Vec<String> {
        const NAMES: [&str; 12] = [
            "Aug", "Sep", "Oct", "Nov", "Dec", "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul",
        ];
        NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let year = if i < 5 { self.start_year } else { self.start_year + 1 };
                format!("{name} {year}")
            })
            .collect()
    }
}

/// Coarse event lifecycle status from the event store. The free-text
/// original status is the primary classification input; this enum is the
/// fallback of last resort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Draft,
    Requested,
    Scheduled,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn from_db(value: &str) -> EventStatus {
        match value.trim().to_lowercase().as_str() {
            "draft" => EventStatus::Draft,
            "requested" => EventStatus::Requested,
            "scheduled" => EventStatus::Scheduled,
            "completed" => EventStatus::Completed,
            "cancelled" | "canceled" => EventStatus::Cancelled,
            _ => EventStatus::Requested,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Requested => "requested",
            EventStatus::Scheduled => "scheduled",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: i64,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub status: EventStatus,
    pub original_status: Option<String>,
    pub district_partner: Option<String>,
    pub career_cluster: Option<String>,
    pub duration_minutes: i32,
    pub participant_count: i32,
    /// Districts attached to the event itself, in attachment order.
    pub district_names: Vec<String>,
    pub registrations: Vec<RegistrationRecord>,
    pub presenter_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    pub event_id: i64,
    pub teacher_id: Uuid,
    pub status: Option<String>,
    pub is_simulcast: bool,
    pub attendance_confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TeacherRecord {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub school_name: Option<String>,
    pub district_name: Option<String>,
}

impl TeacherRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct VolunteerRecord {
    pub id: Uuid,
    pub name: String,
    pub organization: Option<String>,
    pub is_local: bool,
    pub is_people_of_color: bool,
}

/// Presenter detail carried on a session row. Locality and
/// people-of-color flags come from the volunteer reference record,
/// never inferred from free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presenter {
    pub id: Uuid,
    pub name: String,
    pub organization: Option<String>,
    pub is_local: bool,
    pub is_poc: bool,
}

impl Presenter {
    /// Dedup identity for professional counts: id when present, else name.
    pub fn identity(&self) -> String {
        if self.id.is_nil() {
            self.name.clone()
        } else {
            self.id.to_string()
        }
    }
}

/// One flattened (event x teacher-registration) record, the aggregation
/// unit. Immutable once built; serialized whole into the report cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub event_id: Option<i64>,
    pub title: String,
    pub date: NaiveDate,
    pub time_label: String,
    pub category: Category,
    pub teacher_id: Option<Uuid>,
    pub teacher_name: Option<String>,
    pub school_name: Option<String>,
    pub district_name: String,
    pub presenters: Vec<Presenter>,
    pub duration_minutes: i32,
    pub participant_count: i32,
    pub career_cluster: Option<String>,
}

impl SessionRow {
    /// Session dedup identity: the numeric event id when one exists,
    /// else the title text.
    pub fn session_key(&self) -> String {
        match self.event_id {
            Some(id) => id.to_string(),
            None => self.title.clone(),
        }
    }
}

/// Counts and percentages for one district (or the overall roll-up).
/// Every count is the cardinality of an identity set, never a running
/// increment, so re-aggregating the same rows is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub teacher_count: usize,
    pub school_count: usize,
    pub session_count: usize,
    pub experience_count: usize,
    pub organization_count: usize,
    pub professional_count: usize,
    pub professional_of_color_count: usize,
    pub local_professional_count: usize,
    pub local_session_count: usize,
    pub local_session_percent: u32,
    pub poc_session_count: usize,
    pub poc_session_percent: u32,
    pub total_students: usize,
}

/// Distinct values present in a row set, for dashboard filter dropdowns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterOptions {
    pub districts: Vec<String>,
    pub schools: Vec<String>,
    pub statuses: Vec<String>,
    pub career_clusters: Vec<String>,
}

/// The full cached product of one full-scope aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub session_rows: Vec<SessionRow>,
    pub district_summaries: BTreeMap<String, UsageSummary>,
    pub overall_summary: UsageSummary,
    pub filter_options: FilterOptions,
}

/// Imported roster entry for an expected participant, prior to identity
/// resolution. Soft-deactivated when absent from a later import.
#[derive(Debug, Clone)]
pub struct TeacherProgress {
    pub id: Uuid,
    pub academic_year: String,
    pub virtual_year: String,
    pub building: Option<String>,
    pub name: String,
    pub email: String,
    pub target_sessions: i32,
    pub teacher_id: Option<Uuid>,
    pub is_active: bool,
}
