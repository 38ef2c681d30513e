use crate::llm::enrich::BreakContext;
use crate::llm::types::{PriorityBatchResponse, RootCauseAssessment, RootCauseBatchResponse};
use serde_json::Value;
use std::fmt::Write;

const ROOT_CAUSE_PREAMBLE: &str = "\
You are a dividend reconciliation analyst. For each break below, explain the \
most likely root cause of the discrepancy between the internal ledger (NBIM) \
booking and the custodian booking.

Rules:
- Base every hypothesis on the field values shown; do not invent amounts.
- Prefer specific causes (wrong treaty rate, stale position, late booking) \
over generic ones.
- Return one analysis per break, in the order the breaks are listed.

Breaks to analyze:
";

const PRIORITY_PREAMBLE: &str = "\
You are triaging dividend reconciliation breaks for a back-office operations \
team. For each break below, assign a business priority.

Rules:
- Priority must be monotonic with the money at stake and the materiality of \
the break.
- Recommended actions must be concrete and imperative: change data, perform \
a check, contact a counterparty, or correct a calculation. No congratulatory \
or \"continue monitoring\" statements.
- Return one classification per break, in the order the breaks are listed.

Breaks to classify:
";

fn record_json(record: Option<&crate::schema::EventRecord>) -> String {
    record
        .and_then(|r| serde_json::to_string_pretty(r).ok())
        .unwrap_or_else(|| "None".to_string())
}

fn push_break_section(out: &mut String, idx: usize, job: &BreakContext<'_>) {
    let _ = write!(
        out,
        "\n--- Break {} ---\n\
         Row: {}\n\
         Company: {}\n\
         Break Type: {}\n\
         Severity: {}\n\
         Amount Impact: {:.2} {}\n\
         Detection Summary: {}\n",
        idx + 1,
        job.row_id,
        job.company_name.as_deref().unwrap_or("Unknown"),
        job.finding.break_type.label(),
        job.finding.severity.label(),
        job.finding.amount_impact,
        job.finding.currency,
        job.finding.description,
    );
    if let Some(delta) = job.finding.delta {
        let _ = writeln!(out, "Delta (custody - nbim): {delta:+.2}");
    }
}

/// Context for one root-cause batch call: preamble, one section per break
/// with both raw records, and the expected response shape.
pub fn root_cause_batch_context(jobs: &[BreakContext<'_>]) -> String {
    let mut out = String::from(ROOT_CAUSE_PREAMBLE);

    for (idx, job) in jobs.iter().enumerate() {
        push_break_section(&mut out, idx, job);
        let _ = write!(
            out,
            "NBIM Record: {}\nCustody Record: {}\n",
            record_json(job.nbim),
            record_json(job.custody),
        );
    }

    let _ = write!(
        out,
        "\nReturn ONLY a JSON object of the form {{\"analyses\": [...]}} with \
         exactly {} element(s), matching the provided schema.",
        jobs.len()
    );

    out
}

/// Context for one priority batch call. Root-cause assessments from the
/// earlier pass are included when available so priorities reflect them.
pub fn priority_batch_context(
    jobs: &[BreakContext<'_>],
    causes: &[&RootCauseAssessment],
) -> String {
    let mut out = String::from(PRIORITY_PREAMBLE);

    for (idx, job) in jobs.iter().enumerate() {
        push_break_section(&mut out, idx, job);
        if let Some(cause) = causes.get(idx) {
            if let Ok(json) = serde_json::to_string_pretty(cause) {
                let _ = writeln!(out, "Root Cause Analysis: {json}");
            }
        }
    }

    let _ = write!(
        out,
        "\nReturn ONLY a JSON object of the form {{\"classifications\": [...]}} \
         with exactly {} element(s), matching the provided schema.",
        jobs.len()
    );

    out
}

pub fn root_cause_schema_hint() -> Value {
    serde_json::to_value(schemars::schema_for!(RootCauseBatchResponse)).unwrap_or(Value::Null)
}

pub fn priority_schema_hint() -> Value {
    serde_json::to_value(schemars::schema_for!(PriorityBatchResponse)).unwrap_or(Value::Null)
}
