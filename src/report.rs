use std::fmt::Write;

use crate::aggregate::MonthlyBucket;
use crate::cache::ScopeKey;
use crate::models::{ReportPayload, UsageSummary};

fn write_summary(output: &mut String, summary: &UsageSummary) {
    let _ = writeln!(output, "- Teachers: {}", summary.teacher_count);
    let _ = writeln!(output, "- Schools: {}", summary.school_count);
    let _ = writeln!(output, "- Sessions: {}", summary.session_count);
    let _ = writeln!(output, "- Experiences: {}", summary.experience_count);
    let _ = writeln!(output, "- Organizations: {}", summary.organization_count);
    let _ = writeln!(output, "- Professionals: {}", summary.professional_count);
    let _ = writeln!(
        output,
        "- Professionals of color: {}",
        summary.professional_of_color_count
    );
    let _ = writeln!(
        output,
        "- Local professionals: {}",
        summary.local_professional_count
    );
    let _ = writeln!(
        output,
        "- Local sessions: {} ({}%)",
        summary.local_session_count, summary.local_session_percent
    );
    let _ = writeln!(
        output,
        "- Sessions with professionals of color: {} ({}%)",
        summary.poc_session_count, summary.poc_session_percent
    );
    let _ = writeln!(output, "- Estimated students reached: {}", summary.total_students);
}

pub fn build_report(
    scope: &ScopeKey,
    payload: &ReportPayload,
    monthly: &[MonthlyBucket],
    status_counts: &std::collections::BTreeMap<String, usize>,
) -> String {
    let mut output = String::new();
    let (from, to) = scope.window();

    let _ = writeln!(output, "# Virtual Session Usage Report");
    let _ = writeln!(
        output,
        "Virtual year {} ({} through {})",
        scope.year.label(),
        from,
        to
    );
    if let Some(district) = scope.district.as_deref() {
        let _ = writeln!(output, "District scope: {district}");
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Overall");
    write_summary(&mut output, &payload.overall_summary);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Districts");
    if payload.district_summaries.is_empty() {
        let _ = writeln!(output, "No districts in scope for this window.");
    }
    for (name, summary) in &payload.district_summaries {
        let _ = writeln!(output);
        let _ = writeln!(output, "### {name}");
        write_summary(&mut output, summary);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Activity");
    let active: Vec<_> = monthly.iter().filter(|bucket| bucket.total > 0).collect();
    if active.is_empty() {
        let _ = writeln!(output, "No sessions recorded for this window.");
    } else {
        for bucket in active {
            let mix = bucket
                .by_category
                .iter()
                .map(|(category, count)| format!("{category} {count}"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(output, "- {}: {} rows ({mix})", bucket.label, bucket.total);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");
    if status_counts.is_empty() {
        let _ = writeln!(output, "No session rows in scope.");
    } else {
        for (category, count) in status_counts {
            let _ = writeln!(output, "- {category}: {count}");
        }
    }

    output
}
