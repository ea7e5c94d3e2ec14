use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::district;
use crate::models::{EventRecord, Presenter, SessionRow, TeacherRecord, VolunteerRecord};
use crate::status::{self, Category, ClassifyInput};

/// User-facing filters. Applied as one final pass over fully built rows,
/// never during classification or district resolution, so results stay
/// consistent across filter combinations.
#[derive(Debug, Clone, Default)]
pub struct RowFilters {
    pub district: Option<String>,
    pub school: Option<String>,
    pub search: Option<String>,
    pub status: Option<Category>,
    pub career_cluster: Option<String>,
}

impl RowFilters {
    pub fn is_empty(&self) -> bool {
        self.district.is_none()
            && self.school.is_none()
            && self.search.is_none()
            && self.status.is_none()
            && self.career_cluster.is_none()
    }
}

/// Flatten events into session rows: one row per teacher registration,
/// or a single teacherless row when an event has no registrations.
/// District is resolved per teacher, not per event, so an event serving
/// two districts attributes one row to each.
pub fn build_rows(
    events: &[EventRecord],
    teachers: &HashMap<Uuid, TeacherRecord>,
    volunteers: &HashMap<Uuid, VolunteerRecord>,
    date_range: Option<(NaiveDate, NaiveDate)>,
) -> Vec<SessionRow> {
    let mut rows = Vec::new();

    for event in events {
        let date = event.start_at.date_naive();
        if let Some((from, to)) = date_range {
            if date < from || date > to {
                continue;
            }
        }

        let presenters = presenters_for(event, volunteers);
        let time_label = event.start_at.format("%I:%M %p").to_string();

        if event.registrations.is_empty() {
            rows.push(SessionRow {
                event_id: Some(event.id),
                title: event.title.clone(),
                date,
                time_label: time_label.clone(),
                category: status::classify(ClassifyInput {
                    original_status: event.original_status.as_deref(),
                    event_status: event.status,
                    registration_status: None,
                    has_presenters: !presenters.is_empty(),
                    attendance_confirmed: false,
                }),
                teacher_id: None,
                teacher_name: None,
                school_name: None,
                district_name: district::resolve(None, event),
                presenters: presenters.clone(),
                duration_minutes: event.duration_minutes,
                participant_count: event.participant_count,
                career_cluster: event.career_cluster.clone(),
            });
            continue;
        }

        for registration in &event.registrations {
            let teacher = teachers.get(&registration.teacher_id);
            let mut category = status::classify(ClassifyInput {
                original_status: event.original_status.as_deref(),
                event_status: event.status,
                registration_status: registration.status.as_deref(),
                has_presenters: !presenters.is_empty(),
                attendance_confirmed: registration.attendance_confirmed_at.is_some(),
            });
            // A registration flagged simulcast watched the stream rather
            // than joining live; promote completed classifications only.
            if registration.is_simulcast && category == Category::Completed {
                category = Category::Simulcast;
            }

            rows.push(SessionRow {
                event_id: Some(event.id),
                title: event.title.clone(),
                date,
                time_label: time_label.clone(),
                category,
                teacher_id: Some(registration.teacher_id),
                teacher_name: teacher.map(TeacherRecord::display_name),
                school_name: teacher.and_then(|t| t.school_name.clone()),
                district_name: district::resolve(teacher, event),
                presenters: presenters.clone(),
                duration_minutes: event.duration_minutes,
                participant_count: event.participant_count,
                career_cluster: event.career_cluster.clone(),
            });
        }
    }

    rows
}

fn presenters_for(
    event: &EventRecord,
    volunteers: &HashMap<Uuid, VolunteerRecord>,
) -> Vec<Presenter> {
    event
        .presenter_ids
        .iter()
        .filter_map(|id| {
            let volunteer = volunteers.get(id);
            if volunteer.is_none() {
                tracing::warn!(volunteer_id = %id, event_id = event.id, "presenter missing from volunteer reference data");
            }
            volunteer.map(|v| Presenter {
                id: v.id,
                name: v.name.clone(),
                organization: v.organization.clone(),
                is_local: v.is_local,
                is_poc: v.is_people_of_color,
            })
        })
        .collect()
}

/// The final filter pass. Search is a case-insensitive substring match
/// over title, teacher, school, district and presenter names.
pub fn apply_filters(rows: &[SessionRow], filters: &RowFilters) -> Vec<SessionRow> {
    rows.iter()
        .filter(|row| row_matches(row, filters))
        .cloned()
        .collect()
}

fn row_matches(row: &SessionRow, filters: &RowFilters) -> bool {
    if let Some(wanted) = filters.district.as_deref() {
        if !district::names_match(&row.district_name, wanted) {
            return false;
        }
    }
    if let Some(wanted) = filters.school.as_deref() {
        match row.school_name.as_deref() {
            Some(school) if school.eq_ignore_ascii_case(wanted) => {}
            _ => return false,
        }
    }
    if let Some(wanted) = filters.status {
        if row.category != wanted {
            return false;
        }
    }
    if let Some(wanted) = filters.career_cluster.as_deref() {
        match row.career_cluster.as_deref() {
            Some(cluster) if cluster.eq_ignore_ascii_case(wanted) => {}
            _ => return false,
        }
    }
    if let Some(needle) = filters.search.as_deref() {
        let needle = needle.to_lowercase();
        let mut haystack = vec![row.title.to_lowercase(), row.district_name.to_lowercase()];
        if let Some(name) = &row.teacher_name {
            haystack.push(name.to_lowercase());
        }
        if let Some(school) = &row.school_name {
            haystack.push(school.to_lowercase());
        }
        haystack.extend(row.presenters.iter().map(|p| p.name.to_lowercase()));
        if !haystack.iter().any(|text| text.contains(&needle)) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::models::{EventStatus, RegistrationRecord};

    fn volunteer(name: &str, is_local: bool) -> VolunteerRecord {
        VolunteerRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            organization: Some("Acme Robotics".to_string()),
            is_local,
            is_people_of_color: false,
        }
    }

    fn teacher(id: Uuid, district: &str) -> TeacherRecord {
        TeacherRecord {
            id,
            first_name: "Dana".to_string(),
            last_name: "Reeves".to_string(),
            email: Some("dana.reeves@example.org".to_string()),
            school_name: Some("Jones Magnet Middle".to_string()),
            district_name: Some(district.to_string()),
        }
    }

    fn base_event(id: i64) -> EventRecord {
        EventRecord {
            id,
            title: "Career Day".to_string(),
            start_at: Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap(),
            status: EventStatus::Completed,
            original_status: Some("Successfully Completed".to_string()),
            district_partner: None,
            career_cluster: Some("Engineering".to_string()),
            duration_minutes: 45,
            participant_count: 28,
            district_names: vec!["Norfolk Public Schools".to_string()],
            registrations: Vec::new(),
            presenter_ids: Vec::new(),
        }
    }

    fn registration(event_id: i64, teacher_id: Uuid) -> RegistrationRecord {
        RegistrationRecord {
            event_id,
            teacher_id,
            status: None,
            is_simulcast: false,
            attendance_confirmed_at: None,
        }
    }

    #[test]
    fn one_row_per_registration_with_per_teacher_district() {
        let hampton_teacher = teacher(Uuid::new_v4(), "Hampton City Schools");
        let norfolk_teacher = teacher(Uuid::new_v4(), "Norfolk Public Schools");
        let mut event = base_event(7);
        event.registrations = vec![
            registration(7, hampton_teacher.id),
            registration(7, norfolk_teacher.id),
        ];

        let teachers: HashMap<_, _> = [hampton_teacher, norfolk_teacher]
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        let rows = build_rows(&[event], &teachers, &HashMap::new(), None);

        assert_eq!(rows.len(), 2);
        let districts: Vec<_> = rows.iter().map(|r| r.district_name.as_str()).collect();
        assert!(districts.contains(&"Hampton City Schools"));
        assert!(districts.contains(&"Norfolk Public Schools"));
        assert!(rows.iter().all(|r| r.category == Category::Completed));
    }

    #[test]
    fn event_without_registrations_yields_one_teacherless_row() {
        let event = base_event(9);
        let rows = build_rows(&[event], &HashMap::new(), &HashMap::new(), None);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].teacher_id.is_none());
        assert_eq!(rows[0].district_name, "Norfolk Public Schools");
    }

    #[test]
    fn simulcast_registration_promotes_completed_only() {
        let t = teacher(Uuid::new_v4(), "Norfolk Public Schools");
        let mut event = base_event(11);
        let mut reg = registration(11, t.id);
        reg.is_simulcast = true;
        event.registrations = vec![reg.clone()];

        let teachers: HashMap<_, _> = [(t.id, t)].into_iter().collect();
        let rows = build_rows(&[event.clone()], &teachers, &HashMap::new(), None);
        assert_eq!(rows[0].category, Category::Simulcast);

        // A cancelled simulcast registration stays cancelled.
        event.original_status = Some("Teacher Cancellation".to_string());
        event.registrations = vec![reg];
        let rows = build_rows(&[event], &teachers, &HashMap::new(), None);
        assert_eq!(rows[0].category, Category::TeacherCancel);
    }

    #[test]
    fn presenter_flags_come_from_reference_data() {
        let local = volunteer("Priya Shah", true);
        let remote = volunteer("Chris Doyle", false);
        let mut event = base_event(13);
        event.presenter_ids = vec![local.id, remote.id];

        let volunteers: HashMap<_, _> =
            [local, remote].into_iter().map(|v| (v.id, v)).collect();
        let rows = build_rows(&[event], &HashMap::new(), &volunteers, None);

        assert_eq!(rows[0].presenters.len(), 2);
        assert_eq!(rows[0].presenters.iter().filter(|p| p.is_local).count(), 1);
    }

    #[test]
    fn date_range_excludes_out_of_window_events() {
        let january = base_event(1);
        let mut june = base_event(2);
        june.start_at = Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap();

        let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let rows = build_rows(&[january, june], &HashMap::new(), &HashMap::new(), Some((from, to)));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id, Some(1));
    }

    #[test]
    fn filters_are_a_pure_final_pass() {
        let t = teacher(Uuid::new_v4(), "Hampton City Schools");
        let mut event = base_event(20);
        event.registrations = vec![registration(20, t.id)];
        let teachers: HashMap<_, _> = [(t.id, t)].into_iter().collect();
        let rows = build_rows(&[event], &teachers, &HashMap::new(), None);

        // District filter honors aliases.
        let filtered = apply_filters(
            &rows,
            &RowFilters { district: Some("hampton".to_string()), ..Default::default() },
        );
        assert_eq!(filtered.len(), 1);
        // Filtering never rewrites the rows it keeps.
        assert_eq!(filtered[0].category, rows[0].category);
        assert_eq!(filtered[0].district_name, rows[0].district_name);

        let none = apply_filters(
            &rows,
            &RowFilters { status: Some(Category::Unfilled), ..Default::default() },
        );
        assert!(none.is_empty());

        let searched = apply_filters(
            &rows,
            &RowFilters { search: Some("career".to_string()), ..Default::default() },
        );
        assert_eq!(searched.len(), 1);
    }
}
