use crate::detector::{BreakType, Finding, Severity};
use crate::llm::adapter::{
    ClassificationAdapter, ClassificationOutcome, PartialFields, Provenance,
};
use crate::llm::capability::ClassificationCapability;
use crate::llm::prompts;
use crate::llm::types::{
    Confidence, PriorityAssessment, PriorityLevel, RootCauseAssessment, RootCauseCategory, Urgency,
};
use futures::stream::{self, StreamExt};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the enrichment passes need to know about one break.
#[derive(Debug, Clone)]
pub struct BreakContext<'a> {
    pub row_id: String,
    pub company_name: Option<String>,
    pub finding: &'a Finding,
    pub nbim: Option<&'a crate::schema::EventRecord>,
    pub custody: Option<&'a crate::schema::EventRecord>,
}

/// Deterministic data-quality sub-scores, derived from the finding type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityScores {
    pub completeness: u8,
    pub accuracy: u8,
    pub consistency: u8,
}

impl DataQualityScores {
    pub fn for_finding(finding: &Finding) -> Self {
        let graded = |worst: u8| match finding.severity {
            Severity::Low => 8,
            Severity::Medium => 6,
            Severity::High => 4,
            Severity::Critical => worst,
        };
        match finding.break_type {
            BreakType::MissingRecord | BreakType::DuplicateRecord | BreakType::UnmatchableRecord => {
                Self {
                    completeness: 2,
                    accuracy: 10,
                    consistency: 10,
                }
            }
            BreakType::AmountMismatch | BreakType::TaxMismatch => Self {
                completeness: 10,
                accuracy: graded(2),
                consistency: 10,
            },
            BreakType::DateMismatch | BreakType::CurrencyMismatch => Self {
                completeness: 10,
                accuracy: 10,
                consistency: graded(2),
            },
        }
    }
}

/// A discrepancy finding after both enrichment passes. Immutable once the
/// consolidation stage has assembled it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedBreak {
    pub finding: Finding,

    pub root_cause: RootCauseAssessment,
    pub root_cause_provenance: Provenance,

    pub priority_score: u8,
    pub priority_level: PriorityLevel,
    pub operational_urgency: Urgency,
    pub escalation_required: bool,
    pub target_resolution_days: u32,
    pub business_justification: String,
    pub recommended_actions: Vec<String>,
    pub priority_provenance: Provenance,

    /// Money at stake in the row's currency.
    pub financial_impact: f64,
    pub data_quality: DataQualityScores,

    /// True when at least one pass came entirely from local fallback logic
    /// rather than the external capability.
    pub degraded: bool,
}

impl EnrichedBreak {
    pub fn assemble(
        finding: &Finding,
        root_cause: (RootCauseAssessment, Provenance),
        priority: (PriorityAssessment, Provenance),
    ) -> Self {
        let (root_cause, root_cause_provenance) = root_cause;
        let (priority, priority_provenance) = priority;
        let degraded = root_cause_provenance == Provenance::Fallback
            || priority_provenance == Provenance::Fallback;

        Self {
            financial_impact: finding.amount_impact,
            data_quality: DataQualityScores::for_finding(finding),
            finding: finding.clone(),
            root_cause,
            root_cause_provenance,
            priority_score: priority.priority_score,
            priority_level: PriorityLevel::from_score(priority.priority_score),
            operational_urgency: priority.operational_urgency,
            escalation_required: priority.escalation_required,
            target_resolution_days: priority.target_resolution_days,
            business_justification: priority.business_justification,
            recommended_actions: priority.recommended_actions,
            priority_provenance,
            degraded,
        }
    }
}

/// Root-cause pass: one batched call per chunk, reassembled in input order.
pub struct RootCauseEnricher<'a, C> {
    adapter: &'a ClassificationAdapter<C>,
    parallelism: usize,
}

impl<'a, C: ClassificationCapability> RootCauseEnricher<'a, C> {
    pub fn new(adapter: &'a ClassificationAdapter<C>, parallelism: usize) -> Self {
        Self {
            adapter,
            parallelism: parallelism.max(1),
        }
    }

    pub async fn assess(
        &self,
        jobs: &[BreakContext<'_>],
    ) -> Vec<(RootCauseAssessment, Provenance)> {
        if jobs.is_empty() {
            return Vec::new();
        }
        info!("Root-cause pass over {} break(s)", jobs.len());

        let schema = prompts::root_cause_schema_hint();
        let schema = &schema;
        let batches: Vec<Vec<ClassificationOutcome<RootCauseAssessment>>> =
            stream::iter(jobs.chunks(self.adapter.batch_size()))
                .map(|chunk| {
                    let context = prompts::root_cause_batch_context(chunk);
                    let expected = chunk.len();
                    async move {
                        self.adapter
                            .classify_batch(&context, schema, "analyses", expected)
                            .await
                    }
                })
                .buffered(self.parallelism)
                .collect()
                .await;

        batches
            .into_iter()
            .flatten()
            .zip(jobs)
            .map(|(outcome, job)| resolve_root_cause(outcome, job.finding))
            .collect()
    }
}

/// Priority pass; consumes the root-cause pass output so priorities can
/// reflect the causal picture, but runs fine without it.
pub struct PriorityEnricher<'a, C> {
    adapter: &'a ClassificationAdapter<C>,
    parallelism: usize,
}

impl<'a, C: ClassificationCapability> PriorityEnricher<'a, C> {
    pub fn new(adapter: &'a ClassificationAdapter<C>, parallelism: usize) -> Self {
        Self {
            adapter,
            parallelism: parallelism.max(1),
        }
    }

    pub async fn assess(
        &self,
        jobs: &[BreakContext<'_>],
        causes: &[RootCauseAssessment],
    ) -> Vec<(PriorityAssessment, Provenance)> {
        if jobs.is_empty() {
            return Vec::new();
        }
        info!("Priority pass over {} break(s)", jobs.len());

        let schema = prompts::priority_schema_hint();
        let schema = &schema;
        let batch_size = self.adapter.batch_size();
        let batches: Vec<Vec<ClassificationOutcome<PriorityAssessment>>> =
            stream::iter(jobs.chunks(batch_size).enumerate())
                .map(|(chunk_idx, chunk)| {
                    let cause_refs: Vec<&RootCauseAssessment> = causes
                        .iter()
                        .skip(chunk_idx * batch_size)
                        .take(chunk.len())
                        .collect();
                    let context = prompts::priority_batch_context(chunk, &cause_refs);
                    let expected = chunk.len();
                    async move {
                        self.adapter
                            .classify_batch(&context, schema, "classifications", expected)
                            .await
                    }
                })
                .buffered(self.parallelism)
                .collect()
                .await;

        batches
            .into_iter()
            .flatten()
            .zip(jobs)
            .map(|(outcome, job)| resolve_priority(outcome, job.finding))
            .collect()
    }
}

fn resolve_root_cause(
    outcome: ClassificationOutcome<RootCauseAssessment>,
    finding: &Finding,
) -> (RootCauseAssessment, Provenance) {
    match outcome {
        ClassificationOutcome::Parsed(assessment) => (assessment, Provenance::Assisted),
        ClassificationOutcome::PartiallyParsed(partial) => {
            let mut assessment = fallback_root_cause(finding);
            if let Some(category) = partial
                .category
                .as_deref()
                .and_then(RootCauseCategory::from_loose)
            {
                assessment.primary_root_cause = category;
            }
            (assessment, Provenance::Partial)
        }
        ClassificationOutcome::Fallback(_) => (fallback_root_cause(finding), Provenance::Fallback),
    }
}

fn resolve_priority(
    outcome: ClassificationOutcome<PriorityAssessment>,
    finding: &Finding,
) -> (PriorityAssessment, Provenance) {
    match outcome {
        ClassificationOutcome::Parsed(mut assessment) => {
            assessment.priority_score = assessment.priority_score.clamp(1, 10);
            (assessment, Provenance::Assisted)
        }
        ClassificationOutcome::PartiallyParsed(partial) => {
            (merge_partial_priority(partial, finding), Provenance::Partial)
        }
        ClassificationOutcome::Fallback(_) => (fallback_priority(finding), Provenance::Fallback),
    }
}

fn merge_partial_priority(partial: PartialFields, finding: &Finding) -> PriorityAssessment {
    let mut assessment = fallback_priority(finding);
    if let Some(score) = partial.priority {
        assessment.priority_score = score.clamp(1, 10);
    }
    if let Some(action) = partial.action {
        assessment.recommended_actions = vec![action];
    }
    assessment
}

/// Root-cause stand-in derived purely from the finding. Keyed off the break
/// type the same way the assisted prompt frames its categories.
pub fn fallback_root_cause(finding: &Finding) -> RootCauseAssessment {
    let (category, hypothesis, investigation) = match finding.break_type {
        BreakType::MissingRecord => (
            RootCauseCategory::MissingRecord,
            "Event booked in one system only; feed gap or late booking",
            "Confirm the event with the custodian and check the booking queue",
        ),
        BreakType::DateMismatch => (
            RootCauseCategory::Timing,
            "Same event booked against different dates",
            "Verify ex-date and payment date against the issuing agent notice",
        ),
        BreakType::AmountMismatch => (
            RootCauseCategory::SystemDiscrepancy,
            "The two systems computed different net proceeds",
            "Recompute net amount from the gross amount and tax rate on both sides",
        ),
        BreakType::TaxMismatch => (
            RootCauseCategory::SystemDiscrepancy,
            "Withholding tax applied differently between the systems",
            "Recompute withholding using the applicable treaty rate",
        ),
        BreakType::CurrencyMismatch => (
            RootCauseCategory::DataQuality,
            "Quotation currency inconsistent between the systems",
            "Verify the quotation currency on the custodian confirmation",
        ),
        BreakType::DuplicateRecord | BreakType::UnmatchableRecord => (
            RootCauseCategory::DataQuality,
            "Identity key problem in the source data",
            "Correct the identity key fields and re-run the reconciliation",
        ),
    };

    RootCauseAssessment {
        primary_root_cause: category,
        root_causes: vec![hypothesis.to_string()],
        data_quality_issues: Vec::new(),
        recommended_investigation: vec![investigation.to_string()],
        analysis_confidence: Confidence::Low,
        detailed_explanation: format!(
            "Classification service unavailable; cause derived locally from the {} finding.",
            finding.break_type.label()
        ),
    }
}

/// Priority stand-in derived purely from the finding: severity sets the
/// base, the money at stake adjusts it.
pub fn fallback_priority(finding: &Finding) -> PriorityAssessment {
    let base: i8 = match finding.severity {
        Severity::Critical => 9,
        Severity::High => 8,
        Severity::Medium => 5,
        Severity::Low => 2,
    };

    let impact = finding.amount_impact;
    let adjustment: i8 = if impact > 100_000.0 {
        2
    } else if impact > 10_000.0 {
        1
    } else if impact < 100.0 {
        -1
    } else {
        0
    };
    let score = (base + adjustment).clamp(1, 10) as u8;

    let operational_urgency = if impact > 100_000.0 || finding.severity == Severity::Critical {
        Urgency::Immediate
    } else if impact > 10_000.0 {
        Urgency::Urgent
    } else {
        Urgency::Routine
    };

    let target_resolution_days = if impact > 100_000.0 {
        1
    } else if impact > 10_000.0 {
        3
    } else if impact > 1_000.0 {
        7
    } else {
        14
    };

    PriorityAssessment {
        priority_score: score,
        operational_urgency,
        recommended_actions: vec![canned_action(finding.break_type).to_string()],
        escalation_required: impact > 10_000.0,
        target_resolution_days,
        business_justification: format!(
            "Derived locally from {} severity and {:.2} {} at stake.",
            finding.severity.label(),
            impact,
            finding.currency
        ),
    }
}

/// One canned imperative per discrepancy type, used whenever the external
/// capability supplies nothing better.
pub fn canned_action(break_type: BreakType) -> &'static str {
    match break_type {
        BreakType::AmountMismatch => "Verify the net amount against the custodian statement",
        BreakType::TaxMismatch => "Recompute withholding tax and confirm the treaty rate",
        BreakType::DateMismatch => "Confirm ex-date and payment date with the issuing agent",
        BreakType::CurrencyMismatch => "Verify the quotation currency with the custodian",
        BreakType::MissingRecord => "Investigate the missing booking with the source system",
        BreakType::DuplicateRecord => "Correct the duplicated booking and re-run matching",
        BreakType::UnmatchableRecord => "Fix the malformed identity key and re-run matching",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemicRisk {
    None,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFrequency {
    pub category: String,
    pub frequency: usize,
    pub ratio: f64,
}

/// Portfolio-level pattern extraction over the root-cause pass output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub patterns_found: bool,
    pub category_counts: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_common_root_cause: Option<CategoryFrequency>,
    pub systemic_risk: SystemicRisk,
    pub recommended_systemic_actions: Vec<String>,
}

impl PatternAnalysis {
    pub fn empty() -> Self {
        Self {
            patterns_found: false,
            category_counts: BTreeMap::new(),
            most_common_root_cause: None,
            systemic_risk: SystemicRisk::None,
            recommended_systemic_actions: Vec::new(),
        }
    }
}

/// Most frequent root-cause categories plus a graded systemic-risk
/// indicator: one category explaining more than the configured share of
/// breaks suggests a process problem rather than isolated noise.
pub fn extract_patterns(
    breaks: &[&EnrichedBreak],
    thresholds: (f64, f64),
) -> PatternAnalysis {
    if breaks.is_empty() {
        return PatternAnalysis::empty();
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for brk in breaks {
        *counts
            .entry(brk.root_cause.primary_root_cause.label().to_string())
            .or_insert(0) += 1;
    }

    // BTreeMap iteration makes ties resolve to the lexicographically first
    // category, keeping the output stable run to run.
    let (category, frequency) = counts
        .iter()
        .fold(("", 0usize), |best, (cat, &count)| {
            if count > best.1 {
                (cat.as_str(), count)
            } else {
                best
            }
        });

    let ratio = frequency as f64 / breaks.len() as f64;
    let (moderate, high) = thresholds;

    let systemic_risk = if ratio > high {
        SystemicRisk::High
    } else if ratio > moderate {
        SystemicRisk::Moderate
    } else {
        SystemicRisk::None
    };

    let recommended_systemic_actions = match systemic_risk {
        SystemicRisk::High => vec![
            format!(
                "Investigate {} as a systemic cause: it explains {:.0}% of breaks",
                category,
                ratio * 100.0
            ),
            "Escalate to senior management for a process review".to_string(),
        ],
        SystemicRisk::Moderate => vec![format!(
            "Review controls around {}: it explains {:.0}% of breaks",
            category,
            ratio * 100.0
        )],
        SystemicRisk::None => Vec::new(),
    };

    PatternAnalysis {
        patterns_found: true,
        most_common_root_cause: Some(CategoryFrequency {
            category: category.to_string(),
            frequency,
            ratio,
        }),
        category_counts: counts,
        systemic_risk,
        recommended_systemic_actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconciliationConfig;
    use crate::detector::detect_findings;
    use crate::llm::capability::CapabilityError;
    use crate::matcher::match_records;
    use crate::schema::{EventRecord, RecordSource};
    use chrono::NaiveDate;
    use futures::future::BoxFuture;
    use std::collections::BTreeMap as StdBTreeMap;

    struct FailingCapability;

    impl ClassificationCapability for FailingCapability {
        fn classify<'a>(
            &'a self,
            _context: &'a str,
            _schema_hint: Option<&'a serde_json::Value>,
        ) -> BoxFuture<'a, Result<String, CapabilityError>> {
            Box::pin(async { Err(CapabilityError::Transport("down".to_string())) })
        }
    }

    fn record(source: RecordSource, net: f64) -> EventRecord {
        EventRecord {
            event_key: "E1".to_string(),
            isin: "GB0002374006".to_string(),
            ex_date: NaiveDate::from_ymd_opt(2024, 6, 6).unwrap(),
            payment_date: NaiveDate::from_ymd_opt(2024, 6, 20).unwrap(),
            net_amount: net,
            tax_amount: 0.0,
            currency: "GBP".to_string(),
            company_name: None,
            custodian: None,
            source,
            extra: StdBTreeMap::new(),
        }
    }

    fn one_amount_finding() -> Finding {
        let set = match_records(
            &[record(RecordSource::Nbim, 1000.0)],
            &[record(RecordSource::Custody, 950.0)],
        );
        detect_findings(&set, &ReconciliationConfig::default())
            .into_iter()
            .flatten()
            .next()
            .unwrap()
    }

    #[test]
    fn test_fallback_priority_tracks_severity_and_impact() {
        let mut finding = one_amount_finding();
        finding.severity = Severity::High;
        finding.amount_impact = 50.0;
        let low_impact = fallback_priority(&finding);
        assert_eq!(low_impact.priority_score, 7); // 8 - 1 for tiny impact

        finding.amount_impact = 250_000.0;
        let high_impact = fallback_priority(&finding);
        assert_eq!(high_impact.priority_score, 10);
        assert_eq!(high_impact.operational_urgency, Urgency::Immediate);
        assert!(high_impact.escalation_required);
        assert_eq!(high_impact.target_resolution_days, 1);
    }

    #[test]
    fn test_fallback_root_cause_keyed_by_break_type() {
        let mut finding = one_amount_finding();
        assert_eq!(
            fallback_root_cause(&finding).primary_root_cause,
            RootCauseCategory::SystemDiscrepancy
        );

        finding.break_type = BreakType::MissingRecord;
        assert_eq!(
            fallback_root_cause(&finding).primary_root_cause,
            RootCauseCategory::MissingRecord
        );
    }

    #[tokio::test]
    async fn test_unavailable_capability_degrades_without_error() {
        let config = ReconciliationConfig::default();
        let adapter = ClassificationAdapter::new(FailingCapability, &config);
        let finding = one_amount_finding();
        let jobs = vec![BreakContext {
            row_id: "GB0002374006-E1".to_string(),
            company_name: None,
            finding: &finding,
            nbim: None,
            custody: None,
        }];

        let causes = RootCauseEnricher::new(&adapter, config.parallelism)
            .assess(&jobs)
            .await;
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].1, Provenance::Fallback);

        let cause_values: Vec<RootCauseAssessment> =
            causes.iter().map(|(a, _)| a.clone()).collect();
        let priorities = PriorityEnricher::new(&adapter, config.parallelism)
            .assess(&jobs, &cause_values)
            .await;
        assert_eq!(priorities.len(), 1);
        assert_eq!(priorities[0].1, Provenance::Fallback);

        let enriched = EnrichedBreak::assemble(
            &finding,
            causes.into_iter().next().unwrap(),
            priorities.into_iter().next().unwrap(),
        );
        assert!(enriched.degraded);
        assert!(!enriched.recommended_actions.is_empty());
    }

    #[test]
    fn test_pattern_extraction_grades_systemic_risk() {
        let finding = one_amount_finding();
        let brk = EnrichedBreak::assemble(
            &finding,
            (fallback_root_cause(&finding), Provenance::Fallback),
            (fallback_priority(&finding), Provenance::Fallback),
        );
        let breaks: Vec<&EnrichedBreak> = std::iter::repeat(&brk).take(4).collect();

        let patterns = extract_patterns(&breaks, (0.5, 0.7));
        assert!(patterns.patterns_found);
        assert_eq!(patterns.systemic_risk, SystemicRisk::High);
        let top = patterns.most_common_root_cause.unwrap();
        assert_eq!(top.category, "system_discrepancy");
        assert_eq!(top.frequency, 4);
        assert!((top.ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pattern_extraction_empty_input() {
        let patterns = extract_patterns(&[], (0.5, 0.7));
        assert!(!patterns.patterns_found);
        assert_eq!(patterns.systemic_risk, SystemicRisk::None);
    }
}
