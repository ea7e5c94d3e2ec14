use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::district::{self, UNKNOWN_DISTRICT};
use crate::models::{FilterOptions, SessionRow, UsageSummary, VirtualYear};

/// Assumed class size behind `total_students`. A domain constant, not
/// derived from data; confirm with program owners before changing.
pub const STUDENTS_PER_TEACHER: usize = 25;

/// Districts shown by default. Others appear only under `show_all`.
pub const DEFAULT_MAIN_DISTRICTS: &[&str] = &[
    "Hampton City Schools",
    "Newport News Public Schools",
    "Norfolk Public Schools",
    "Virginia Beach City Public Schools",
    "Chesapeake Public Schools",
    "Portsmouth Public Schools",
];

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub show_all: bool,
    pub students_per_teacher: usize,
    pub main_districts: Vec<String>,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        AggregationOptions {
            show_all: false,
            students_per_teacher: STUDENTS_PER_TEACHER,
            main_districts: DEFAULT_MAIN_DISTRICTS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Identity sets backing one summary. Dedup keys, per metric:
/// teachers by display name; schools by name; sessions by numeric event
/// id (title when absent); experiences by (session, teacher) pair;
/// organizations by name; professionals by volunteer id-or-name.
#[derive(Debug, Default)]
struct MetricSets {
    teachers: HashSet<String>,
    schools: HashSet<String>,
    sessions: HashSet<String>,
    experiences: HashSet<String>,
    organizations: HashSet<String>,
    professionals: HashSet<String>,
    poc_professionals: HashSet<String>,
    local_professionals: HashSet<String>,
    local_sessions: HashSet<String>,
    poc_sessions: HashSet<String>,
}

impl MetricSets {
    fn absorb(&mut self, row: &SessionRow) {
        let session_key = row.session_key();
        self.sessions.insert(session_key.clone());

        let teacher_key = row.teacher_name.as_deref().unwrap_or("-");
        self.experiences.insert(format!("{teacher_key}|{session_key}"));

        if let Some(name) = row.teacher_name.as_deref() {
            if !name.is_empty() {
                self.teachers.insert(name.to_string());
            }
        }
        if let Some(school) = row.school_name.as_deref() {
            if !school.is_empty() {
                self.schools.insert(school.to_string());
            }
        }

        let mut any_local = false;
        let mut any_poc = false;
        for presenter in &row.presenters {
            let identity = presenter.identity();
            self.professionals.insert(identity.clone());
            if presenter.is_local {
                any_local = true;
                self.local_professionals.insert(identity.clone());
            }
            if presenter.is_poc {
                any_poc = true;
                self.poc_professionals.insert(identity.clone());
            }
            if let Some(org) = presenter.organization.as_deref() {
                if !org.is_empty() {
                    self.organizations.insert(org.to_string());
                }
            }
        }
        if any_local {
            self.local_sessions.insert(session_key.clone());
        }
        if any_poc {
            self.poc_sessions.insert(session_key);
        }
    }

    fn summary(&self, students_per_teacher: usize) -> UsageSummary {
        UsageSummary {
            teacher_count: self.teachers.len(),
            school_count: self.schools.len(),
            session_count: self.sessions.len(),
            experience_count: self.experiences.len(),
            organization_count: self.organizations.len(),
            professional_count: self.professionals.len(),
            professional_of_color_count: self.poc_professionals.len(),
            local_professional_count: self.local_professionals.len(),
            local_session_count: self.local_sessions.len(),
            local_session_percent: percent(self.local_sessions.len(), self.sessions.len()),
            poc_session_count: self.poc_sessions.len(),
            poc_session_percent: percent(self.poc_sessions.len(), self.sessions.len()),
            total_students: self.teachers.len() * students_per_teacher,
        }
    }
}

fn percent(count: usize, denominator: usize) -> u32 {
    if denominator == 0 {
        return 0;
    }
    ((count as f64) * 100.0 / (denominator as f64)).round() as u32
}

/// Reduce session rows into per-district and overall summaries. Only
/// counted categories contribute; the rest stay visible in raw and
/// monthly breakdowns. Districts with rows but no counted rows come out
/// all-zero so consumers see a stable key set.
pub fn summarize(
    rows: &[SessionRow],
    options: &AggregationOptions,
) -> (BTreeMap<String, UsageSummary>, UsageSummary) {
    let mut districts_seen: BTreeSet<String> = BTreeSet::new();
    for row in rows {
        districts_seen.insert(row.district_name.clone());
    }

    let included: BTreeSet<String> = districts_seen
        .into_iter()
        .filter(|name| {
            options.show_all
                || options
                    .main_districts
                    .iter()
                    .any(|main| district::names_match(main, name))
        })
        .collect();

    let mut per_district: BTreeMap<String, MetricSets> = included
        .iter()
        .map(|name| (name.clone(), MetricSets::default()))
        .collect();
    let mut overall = MetricSets::default();

    for row in rows {
        if !row.category.is_counted() {
            continue;
        }
        let Some(sets) = per_district.get_mut(&row.district_name) else {
            continue;
        };
        sets.absorb(row);
        overall.absorb(row);
    }

    let summaries = per_district
        .into_iter()
        .map(|(name, sets)| (name, sets.summary(options.students_per_teacher)))
        .collect();
    (summaries, overall.summary(options.students_per_teacher))
}

/// Per-month running counts across ALL categories, in program order
/// (Aug through Jul). No dedup here; this is the raw activity view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyBucket {
    pub label: String,
    pub by_category: BTreeMap<String, usize>,
    pub total: usize,
}

pub fn monthly_breakdown(rows: &[SessionRow], year: &VirtualYear) -> Vec<MonthlyBucket> {
    let mut buckets: Vec<MonthlyBucket> = year
        .month_labels()
        .into_iter()
        .map(|label| MonthlyBucket { label, by_category: BTreeMap::new(), total: 0 })
        .collect();

    for row in rows {
        if !year.contains(row.date) {
            continue;
        }
        let month = chrono::Datelike::month(&row.date);
        let index = if month >= 8 { month - 8 } else { month + 4 } as usize;
        let bucket = &mut buckets[index];
        *bucket.by_category.entry(row.category.as_str().to_string()).or_insert(0) += 1;
        bucket.total += 1;
    }

    buckets
}

/// Raw per-category counts over every row in scope, counted and not.
pub fn status_breakdown(rows: &[SessionRow]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.category.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Distinct values for dashboard filter dropdowns, Unknown District last.
pub fn filter_options(rows: &[SessionRow]) -> FilterOptions {
    let mut districts: BTreeSet<String> = BTreeSet::new();
    let mut schools: BTreeSet<String> = BTreeSet::new();
    let mut statuses: BTreeSet<String> = BTreeSet::new();
    let mut clusters: BTreeSet<String> = BTreeSet::new();

    for row in rows {
        if row.district_name != UNKNOWN_DISTRICT {
            districts.insert(row.district_name.clone());
        }
        if let Some(school) = &row.school_name {
            schools.insert(school.clone());
        }
        statuses.insert(row.category.as_str().to_string());
        if let Some(cluster) = &row.career_cluster {
            clusters.insert(cluster.clone());
        }
    }

    let mut districts: Vec<String> = districts.into_iter().collect();
    if rows.iter().any(|r| r.district_name == UNKNOWN_DISTRICT) {
        districts.push(UNKNOWN_DISTRICT.to_string());
    }

    FilterOptions {
        districts,
        schools: schools.into_iter().collect(),
        statuses: statuses.into_iter().collect(),
        career_clusters: clusters.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    use crate::models::Presenter;
    use crate::status::Category;

    fn presenter(name: &str, is_local: bool, is_poc: bool) -> Presenter {
        Presenter {
            id: Uuid::new_v4(),
            name: name.to_string(),
            organization: Some(format!("{name} & Co")),
            is_local,
            is_poc,
        }
    }

    fn row(
        event_id: i64,
        teacher: &str,
        district: &str,
        category: Category,
        presenters: Vec<Presenter>,
    ) -> SessionRow {
        SessionRow {
            event_id: Some(event_id),
            title: "Career Day".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            time_label: "09:00 AM".to_string(),
            category,
            teacher_id: Some(Uuid::new_v4()),
            teacher_name: Some(teacher.to_string()),
            school_name: Some(format!("{district} Middle")),
            district_name: district.to_string(),
            presenters,
            duration_minutes: 45,
            participant_count: 25,
            career_cluster: None,
        }
    }

    fn show_all() -> AggregationOptions {
        AggregationOptions { show_all: true, ..Default::default() }
    }

    #[test]
    fn summarize_is_idempotent() {
        let rows = vec![
            row(1, "Dana Reeves", "Acme Schools", Category::Completed, vec![presenter("P1", true, false)]),
            row(2, "Lee Park", "Acme Schools", Category::Completed, vec![]),
        ];
        let first = summarize(&rows, &show_all());
        let second = summarize(&rows, &show_all());
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn repeated_teacher_rows_count_once() {
        let rows: Vec<SessionRow> = (0..5)
            .map(|i| row(i, "Dana Reeves", "Acme Schools", Category::Completed, vec![]))
            .collect();
        let (districts, overall) = summarize(&rows, &show_all());
        assert_eq!(districts["Acme Schools"].teacher_count, 1);
        assert_eq!(overall.teacher_count, 1);
        // Five distinct events are still five sessions.
        assert_eq!(districts["Acme Schools"].session_count, 5);
    }

    #[test]
    fn overall_teacher_count_is_conserved() {
        let rows = vec![
            row(1, "Dana Reeves", "Acme Schools", Category::Completed, vec![]),
            row(2, "Dana Reeves", "Beacon Schools", Category::Completed, vec![]),
            row(3, "Lee Park", "Beacon Schools", Category::Completed, vec![]),
        ];
        let (districts, overall) = summarize(&rows, &show_all());
        let max = districts.values().map(|s| s.teacher_count).max().unwrap();
        let sum: usize = districts.values().map(|s| s.teacher_count).sum();
        assert!(overall.teacher_count >= max);
        assert!(overall.teacher_count <= sum);
        // Dana teaches in two districts but is one person overall.
        assert_eq!(overall.teacher_count, 2);
    }

    #[test]
    fn scenario_one_local_presenter_math() {
        // Two rows of the same event, presenters P1 (local) and P2 (not).
        let presenters = vec![presenter("P1", true, false), presenter("P2", false, false)];
        let rows = vec![
            row(100, "Dana Reeves", "Acme Schools", Category::Completed, presenters.clone()),
            row(100, "Lee Park", "Acme Schools", Category::Completed, presenters),
        ];
        let (districts, _) = summarize(&rows, &show_all());
        let acme = &districts["Acme Schools"];
        assert_eq!(acme.session_count, 1);
        assert_eq!(acme.professional_count, 2);
        assert_eq!(acme.local_professional_count, 1);
        assert_eq!(acme.local_session_count, 1);
        assert_eq!(acme.local_session_percent, 100);
    }

    #[test]
    fn percentages_stay_in_bounds() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
    }

    #[test]
    fn uncounted_categories_never_touch_summaries() {
        let rows = vec![
            row(1, "Dana Reeves", "Acme Schools", Category::ProfessionalNoShowPathful, vec![]),
            row(2, "Lee Park", "Acme Schools", Category::TeacherCancel, vec![]),
        ];
        let (districts, overall) = summarize(&rows, &show_all());
        // District appears (stable key set) but with an all-zero summary.
        assert_eq!(districts["Acme Schools"], UsageSummary::default());
        assert_eq!(overall.session_count, 0);
        // The raw breakdown still sees both rows.
        let breakdown = status_breakdown(&rows);
        assert_eq!(breakdown["professional_no_show_pathful"], 1);
        assert_eq!(breakdown["teacher_cancel"], 1);
    }

    #[test]
    fn counted_categories_include_simulcast_and_moved() {
        let rows = vec![
            row(1, "Dana Reeves", "Acme Schools", Category::Simulcast, vec![]),
            row(2, "Lee Park", "Acme Schools", Category::MovedToInPerson, vec![]),
        ];
        let (districts, _) = summarize(&rows, &show_all());
        assert_eq!(districts["Acme Schools"].session_count, 2);
        assert_eq!(districts["Acme Schools"].teacher_count, 2);
    }

    #[test]
    fn default_scope_restricts_to_main_districts() {
        let rows = vec![
            row(1, "Dana Reeves", "Hampton City Schools", Category::Completed, vec![]),
            row(2, "Lee Park", "Somewhere Else ISD", Category::Completed, vec![]),
        ];
        let (districts, overall) = summarize(&rows, &AggregationOptions::default());
        assert!(districts.contains_key("Hampton City Schools"));
        assert!(!districts.contains_key("Somewhere Else ISD"));
        // Out-of-scope districts are excluded from the overall roll-up too.
        assert_eq!(overall.teacher_count, 1);

        let (districts, overall) = summarize(&rows, &show_all());
        assert!(districts.contains_key("Somewhere Else ISD"));
        assert_eq!(overall.teacher_count, 2);
    }

    #[test]
    fn total_students_uses_the_class_size_constant() {
        let rows = vec![
            row(1, "Dana Reeves", "Acme Schools", Category::Completed, vec![]),
            row(2, "Lee Park", "Acme Schools", Category::Completed, vec![]),
        ];
        let (districts, _) = summarize(&rows, &show_all());
        assert_eq!(districts["Acme Schools"].total_students, 2 * STUDENTS_PER_TEACHER);
    }

    #[test]
    fn monthly_buckets_follow_program_order() {
        let year = VirtualYear::parse("2024-2025").unwrap();
        let mut september = row(1, "Dana Reeves", "Acme Schools", Category::Completed, vec![]);
        september.date = NaiveDate::from_ymd_opt(2024, 9, 3).unwrap();
        let mut january = row(2, "Lee Park", "Acme Schools", Category::TeacherCancel, vec![]);
        january.date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let mut outside = row(3, "Lee Park", "Acme Schools", Category::Completed, vec![]);
        outside.date = NaiveDate::from_ymd_opt(2023, 9, 3).unwrap();

        let buckets = monthly_breakdown(&[september, january, outside], &year);
        assert_eq!(buckets.len(), 12);
        assert_eq!(buckets[1].label, "Sep 2024");
        assert_eq!(buckets[1].total, 1);
        assert_eq!(buckets[5].label, "Jan 2025");
        assert_eq!(buckets[5].by_category["teacher_cancel"], 1);
        // Out-of-year rows are dropped, not mis-bucketed.
        let total: usize = buckets.iter().map(|b| b.total).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn filter_options_are_sorted_and_deduped() {
        let rows = vec![
            row(1, "Dana Reeves", "Beacon Schools", Category::Completed, vec![]),
            row(2, "Lee Park", "Acme Schools", Category::Completed, vec![]),
            row(3, "Lee Park", "Acme Schools", Category::TeacherCancel, vec![]),
        ];
        let options = filter_options(&rows);
        assert_eq!(options.districts, vec!["Acme Schools", "Beacon Schools"]);
        assert_eq!(options.statuses, vec!["completed", "teacher_cancel"]);
        assert_eq!(options.schools.len(), 2);
    }
}
