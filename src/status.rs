use serde::{Deserialize, Serialize};

use crate::models::EventStatus;

/// Canonical session status category. Legacy feeds carry free-text
/// status strings in a dozen spellings; everything downstream works in
/// terms of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Completed,
    Simulcast,
    TeacherCancel,
    TeacherNoShow,
    ProfessionalCancelPathful,
    ProfessionalNoShowPathful,
    ProfessionalCancelLocal,
    ProfessionalNoShowLocal,
    TechnicalDifficulty,
    InclementWeather,
    MovedToInPerson,
    Unfilled,
    Draft,
    Count,
    Other,
}

impl Category {
    /// Categories that contribute to completion-based summary metrics.
    /// Moved-to-in-person and simulcast sessions still happened, so they
    /// count; everything else shows up only in raw breakdowns.
    pub fn is_counted(&self) -> bool {
        matches!(
            self,
            Category::Completed | Category::Simulcast | Category::MovedToInPerson
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Completed => "completed",
            Category::Simulcast => "simulcast",
            Category::TeacherCancel => "teacher_cancel",
            Category::TeacherNoShow => "teacher_no_show",
            Category::ProfessionalCancelPathful => "professional_cancel_pathful",
            Category::ProfessionalNoShowPathful => "professional_no_show_pathful",
            Category::ProfessionalCancelLocal => "professional_cancel_local",
            Category::ProfessionalNoShowLocal => "professional_no_show_local",
            Category::TechnicalDifficulty => "technical_difficulty",
            Category::InclementWeather => "inclement_weather",
            Category::MovedToInPerson => "moved_to_in_person",
            Category::Unfilled => "unfilled",
            Category::Draft => "draft",
            Category::Count => "count",
            Category::Other => "other",
        }
    }

    pub fn all() -> &'static [Category] {
        &[
            Category::Completed,
            Category::Simulcast,
            Category::TeacherCancel,
            Category::TeacherNoShow,
            Category::ProfessionalCancelPathful,
            Category::ProfessionalNoShowPathful,
            Category::ProfessionalCancelLocal,
            Category::ProfessionalNoShowLocal,
            Category::TechnicalDifficulty,
            Category::InclementWeather,
            Category::MovedToInPerson,
            Category::Unfilled,
            Category::Draft,
            Category::Count,
            Category::Other,
        ]
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Category::all()
            .iter()
            .find(|category| category.as_str() == value)
            .copied()
            .ok_or_else(|| format!("unknown status category {value:?}"))
    }
}

struct Rule {
    /// Every needle must appear in the normalized text for the rule to fire.
    needles: &'static [&'static str],
    category: Category,
}

/// Ordered most specific first. The order is correctness-critical:
/// "successfully completed" must win before bare "completed", and
/// "teacher no show" before the generic teacher+cancel pair. Changing
/// the order changes classification results on real feeds.
const RULES: &[Rule] = &[
    Rule { needles: &["successfully completed"], category: Category::Completed },
    Rule { needles: &["moved to in person"], category: Category::MovedToInPerson },
    Rule { needles: &["simulcast"], category: Category::Simulcast },
    Rule { needles: &["technical difficult"], category: Category::TechnicalDifficulty },
    Rule { needles: &["inclement weather"], category: Category::InclementWeather },
    Rule { needles: &["weather"], category: Category::InclementWeather },
    Rule { needles: &["teacher no show"], category: Category::TeacherNoShow },
    Rule { needles: &["teacher", "no show"], category: Category::TeacherNoShow },
    Rule { needles: &["teacher", "cancel"], category: Category::TeacherCancel },
    Rule { needles: &["pathful", "no show"], category: Category::ProfessionalNoShowPathful },
    Rule { needles: &["pathful", "cancel"], category: Category::ProfessionalCancelPathful },
    Rule { needles: &["local", "no show"], category: Category::ProfessionalNoShowLocal },
    Rule { needles: &["local", "cancel"], category: Category::ProfessionalCancelLocal },
    Rule { needles: &["professional", "no show"], category: Category::ProfessionalNoShowPathful },
    Rule { needles: &["professional", "cancel"], category: Category::ProfessionalCancelPathful },
    Rule { needles: &["volunteer", "no show"], category: Category::ProfessionalNoShowPathful },
    Rule { needles: &["volunteer", "cancel"], category: Category::ProfessionalCancelPathful },
    Rule { needles: &["no show"], category: Category::ProfessionalNoShowPathful },
    Rule { needles: &["unfilled"], category: Category::Unfilled },
    Rule { needles: &["draft"], category: Category::Draft },
    Rule { needles: &["count"], category: Category::Count },
    Rule { needles: &["completed"], category: Category::Completed },
    Rule { needles: &["complete"], category: Category::Completed },
];

/// Lowercase, turn separator punctuation into spaces, collapse runs of
/// whitespace. "Teacher No-Show" and "teacher_no_show" both normalize
/// to "teacher no show".
fn normalize(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '-' | '_' | '/' | ',' | '.') { ' ' } else { c })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn match_rules(text: &str) -> Option<Category> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    RULES
        .iter()
        .find(|rule| rule.needles.iter().all(|needle| normalized.contains(needle)))
        .map(|rule| rule.category)
}

pub struct ClassifyInput<'a> {
    pub original_status: Option<&'a str>,
    pub event_status: EventStatus,
    pub registration_status: Option<&'a str>,
    pub has_presenters: bool,
    pub attendance_confirmed: bool,
}

/// Map raw status text to a canonical category. The original-status
/// string is tried first, then the per-registration status, then the
/// coarse event enum plus presenter presence.
pub fn classify(input: ClassifyInput) -> Category {
    if let Some(category) = input.original_status.and_then(match_rules) {
        return category;
    }
    if let Some(category) = input.registration_status.and_then(match_rules) {
        return category;
    }

    // No usable text at all. A confirmed-attendance timestamp means the
    // session actually ran, whatever the record says.
    if input.attendance_confirmed {
        return Category::Completed;
    }

    match input.event_status {
        EventStatus::Completed => Category::Completed,
        EventStatus::Draft => Category::Draft,
        _ if !input.has_presenters => Category::Unfilled,
        _ => Category::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_text(text: &str) -> Category {
        classify(ClassifyInput {
            original_status: Some(text),
            event_status: EventStatus::Scheduled,
            registration_status: None,
            has_presenters: true,
            attendance_confirmed: false,
        })
    }

    #[test]
    fn successfully_completed_beats_bare_completed() {
        assert_eq!(classify_text("Successfully Completed"), Category::Completed);
        assert_eq!(classify_text("Completed"), Category::Completed);
        assert_eq!(match_rules("successfully completed session"), Some(Category::Completed));
    }

    #[test]
    fn teacher_no_show_beats_teacher_cancel() {
        assert_eq!(classify_text("Teacher No-Show"), Category::TeacherNoShow);
        assert_eq!(classify_text("Teacher Cancellation"), Category::TeacherCancel);
        // Text mentioning both a no-show and a cancellation is a no-show.
        assert_eq!(
            classify_text("teacher no-show, cancelled day-of"),
            Category::TeacherNoShow
        );
    }

    #[test]
    fn pathful_professional_no_show_gets_its_own_bucket() {
        assert_eq!(
            classify_text("Pathful Professional No-Show"),
            Category::ProfessionalNoShowPathful
        );
        assert!(!Category::ProfessionalNoShowPathful.is_counted());
    }

    #[test]
    fn local_professional_variants_stay_distinct() {
        assert_eq!(
            classify_text("Local Professional Cancellation"),
            Category::ProfessionalCancelLocal
        );
        assert_eq!(
            classify_text("local professional no-show"),
            Category::ProfessionalNoShowLocal
        );
        assert_eq!(
            classify_text("Professional Cancelled"),
            Category::ProfessionalCancelPathful
        );
    }

    #[test]
    fn separators_and_case_are_irrelevant() {
        assert_eq!(classify_text("TEACHER_NO_SHOW"), Category::TeacherNoShow);
        assert_eq!(classify_text("moved-to-in-person"), Category::MovedToInPerson);
        assert_eq!(classify_text("Technical Difficulties"), Category::TechnicalDifficulty);
        assert_eq!(classify_text("Inclement   Weather"), Category::InclementWeather);
    }

    #[test]
    fn moved_to_in_person_is_counted_but_distinct() {
        let category = classify_text("Moved to In-Person");
        assert_eq!(category, Category::MovedToInPerson);
        assert!(category.is_counted());
        assert_ne!(category, Category::Completed);
    }

    #[test]
    fn falls_back_to_registration_status() {
        let category = classify(ClassifyInput {
            original_status: Some("???"),
            event_status: EventStatus::Scheduled,
            registration_status: Some("simulcast session"),
            has_presenters: true,
            attendance_confirmed: false,
        });
        assert_eq!(category, Category::Simulcast);
    }

    #[test]
    fn empty_status_with_confirmed_attendance_is_completed() {
        let category = classify(ClassifyInput {
            original_status: Some(""),
            event_status: EventStatus::Scheduled,
            registration_status: None,
            has_presenters: true,
            attendance_confirmed: true,
        });
        assert_eq!(category, Category::Completed);
    }

    #[test]
    fn empty_status_without_presenters_is_unfilled() {
        let category = classify(ClassifyInput {
            original_status: None,
            event_status: EventStatus::Requested,
            registration_status: None,
            has_presenters: false,
            attendance_confirmed: false,
        });
        assert_eq!(category, Category::Unfilled);
    }

    #[test]
    fn enum_fallback_respects_completed_and_draft() {
        let completed = classify(ClassifyInput {
            original_status: None,
            event_status: EventStatus::Completed,
            registration_status: None,
            has_presenters: false,
            attendance_confirmed: false,
        });
        assert_eq!(completed, Category::Completed);

        let draft = classify(ClassifyInput {
            original_status: None,
            event_status: EventStatus::Draft,
            registration_status: None,
            has_presenters: true,
            attendance_confirmed: false,
        });
        assert_eq!(draft, Category::Draft);
    }

    #[test]
    fn unmatched_text_with_presenters_is_other() {
        let category = classify(ClassifyInput {
            original_status: Some("pending review"),
            event_status: EventStatus::Scheduled,
            registration_status: None,
            has_presenters: true,
            attendance_confirmed: false,
        });
        assert_eq!(category, Category::Other);
    }

    #[test]
    fn counted_categories_are_exactly_three() {
        let counted: Vec<_> = Category::all().iter().filter(|c| c.is_counted()).collect();
        assert_eq!(
            counted,
            vec![&Category::Completed, &Category::Simulcast, &Category::MovedToInPerson]
        );
    }
}
