use crate::models::{EventRecord, TeacherRecord};

pub const UNKNOWN_DISTRICT: &str = "Unknown District";

/// Known spelling variants from import feeds, mapped to the canonical
/// district name. Feeds are inconsistent about "City Schools" vs
/// "Public Schools" and about abbreviations, so new variants land here
/// as they show up.
const ALIASES: &[(&str, &str)] = &[
    ("hampton public schools", "Hampton City Schools"),
    ("hampton city", "Hampton City Schools"),
    ("hampton", "Hampton City Schools"),
    ("newport news", "Newport News Public Schools"),
    ("newport news schools", "Newport News Public Schools"),
    ("nnps", "Newport News Public Schools"),
    ("norfolk", "Norfolk Public Schools"),
    ("norfolk city schools", "Norfolk Public Schools"),
    ("virginia beach schools", "Virginia Beach City Public Schools"),
    ("virginia beach", "Virginia Beach City Public Schools"),
    ("vbcps", "Virginia Beach City Public Schools"),
    ("chesapeake", "Chesapeake Public Schools"),
    ("chesapeake city schools", "Chesapeake Public Schools"),
    ("portsmouth", "Portsmouth Public Schools"),
    ("portsmouth city schools", "Portsmouth Public Schools"),
];

fn fold(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Trim and map through the alias table. Unrecognized names pass through
/// trimmed but otherwise untouched.
pub fn canonical_district(name: &str) -> String {
    let folded = fold(name);
    for (variant, canonical) in ALIASES {
        if folded == *variant || folded == fold(canonical) {
            return (*canonical).to_string();
        }
    }
    name.trim().to_string()
}

/// Case-insensitive comparison through the alias table, checked in both
/// directions since feeds disagree about which spelling is canonical.
pub fn names_match(a: &str, b: &str) -> bool {
    if fold(a) == fold(b) {
        return true;
    }
    fold(canonical_district(a).as_str()) == fold(b)
        || fold(canonical_district(b).as_str()) == fold(a)
        || canonical_district(a) == canonical_district(b)
}

/// Determine the district a session row belongs to. Priority: the
/// teacher's school's district, then the event's attached district
/// collection, then the event's free-text district partner, then the
/// "Unknown District" diagnostic bucket.
pub fn resolve(teacher: Option<&TeacherRecord>, event: &EventRecord) -> String {
    if let Some(name) = teacher.and_then(|t| t.district_name.as_deref()) {
        if !name.trim().is_empty() {
            return canonical_district(name);
        }
    }
    if let Some(name) = event.district_names.first() {
        if !name.trim().is_empty() {
            return canonical_district(name);
        }
    }
    if let Some(name) = event.district_partner.as_deref() {
        if !name.trim().is_empty() {
            return canonical_district(name);
        }
    }
    UNKNOWN_DISTRICT.to_string()
}
