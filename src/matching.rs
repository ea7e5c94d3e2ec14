use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{TeacherProgress, TeacherRecord};

/// Minimum Jaro-Winkler similarity for a name-based binding. An
/// undocumented domain constant inherited from the legacy matcher;
/// tunable per run via `--threshold`.
pub const NAME_MATCH_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
    Email,
    Name,
    Unmatched,
}

impl MatchBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchBasis::Email => "email",
            MatchBasis::Name => "name",
            MatchBasis::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub progress_id: Uuid,
    pub teacher_id: Option<Uuid>,
    pub basis: MatchBasis,
    pub similarity: f64,
}

/// Per-basis counts. Unmatched entries are counted, never dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub by_email: usize,
    pub by_name: usize,
    pub unmatched: usize,
    pub already_bound: usize,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub results: Vec<MatchResult>,
    pub stats: MatchStats,
}

/// Lowercase, strip punctuation, collapse whitespace. "Robert A. Smith"
/// becomes "robert a smith".
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Resolve roster entries to canonical teacher records. Pure function:
/// no persistence happens here, so the matching rules are testable
/// without a database. Exact email match binds immediately; otherwise
/// the best normalized-name similarity binds iff it reaches the
/// threshold, with ties going to the first candidate to reach the
/// maximum (accepted ambiguity). Entries already bound are skipped.
pub fn match_roster(
    entries: &[TeacherProgress],
    teachers: &[TeacherRecord],
    threshold: f64,
) -> MatchOutcome {
    let mut by_email: HashMap<String, Uuid> = HashMap::new();
    for teacher in teachers {
        if let Some(email) = teacher.email.as_deref() {
            let normalized = normalize_email(email);
            if !normalized.is_empty() {
                by_email.entry(normalized).or_insert(teacher.id);
            }
        }
    }

    let normalized_names: Vec<(Uuid, String)> = teachers
        .iter()
        .map(|t| (t.id, normalize_name(&t.display_name())))
        .collect();

    let mut results = Vec::new();
    let mut stats = MatchStats::default();

    for entry in entries {
        if entry.teacher_id.is_some() {
            stats.already_bound += 1;
            continue;
        }

        if let Some(&teacher_id) = by_email.get(&normalize_email(&entry.email)) {
            stats.by_email += 1;
            results.push(MatchResult {
                progress_id: entry.id,
                teacher_id: Some(teacher_id),
                basis: MatchBasis::Email,
                similarity: 1.0,
            });
            continue;
        }

        let entry_name = normalize_name(&entry.name);
        let mut best: Option<(Uuid, f64)> = None;
        for (teacher_id, teacher_name) in &normalized_names {
            if teacher_name.is_empty() || entry_name.is_empty() {
                continue;
            }
            let score = strsim::jaro_winkler(&entry_name, teacher_name);
            // Strict greater-than keeps the first candidate on a tie.
            if best.map_or(true, |(_, high)| score > high) {
                best = Some((*teacher_id, score));
            }
        }

        match best {
            Some((teacher_id, score)) if score >= threshold => {
                stats.by_name += 1;
                results.push(MatchResult {
                    progress_id: entry.id,
                    teacher_id: Some(teacher_id),
                    basis: MatchBasis::Name,
                    similarity: score,
                });
            }
            best => {
                stats.unmatched += 1;
                results.push(MatchResult {
                    progress_id: entry.id,
                    teacher_id: None,
                    basis: MatchBasis::Unmatched,
                    similarity: best.map_or(0.0, |(_, score)| score),
                });
            }
        }
    }

    tracing::debug!(
        by_email = stats.by_email,
        by_name = stats.by_name,
        unmatched = stats.unmatched,
        already_bound = stats.already_bound,
        "roster match pass complete"
    );
    MatchOutcome { results, stats }
}
