use crate::config::{ReconciliationConfig, ScoreWeights};
use crate::detector::{self, BreakType, Finding, Severity};
use crate::llm::adapter::ClassificationAdapter;
use crate::llm::capability::ClassificationCapability;
use crate::llm::enrich::{
    extract_patterns, BreakContext, EnrichedBreak, PatternAnalysis, PriorityEnricher,
    RootCauseEnricher,
};
use crate::llm::types::RootCauseAssessment;
use crate::matcher::{match_records, MatchSet, RecordMatch};
use crate::schema::EventRecord;
use crate::utils::{is_actionable, normalize_action};
use chrono::NaiveDate;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Stages of one analysis run. Transitions are strictly sequential; a
/// failure short-circuits to `Failed` carrying whatever stages completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Loaded,
    Matched,
    Detected,
    Enriched,
    Consolidated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Reconciled,
    MinorIssue,
    MajorIssue,
    MissingData,
}

impl OverallStatus {
    pub fn label(self) -> &'static str {
        match self {
            OverallStatus::Reconciled => "reconciled",
            OverallStatus::MinorIssue => "minor_issue",
            OverallStatus::MajorIssue => "major_issue",
            OverallStatus::MissingData => "missing_data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materiality {
    Immaterial,
    Material,
    HighlyMaterial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioHealth {
    Excellent,
    Good,
    Concerning,
    Critical,
}

/// The per-match final object. Constructed only here; immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowAnalysis {
    pub row_id: String,
    pub isin: String,
    pub event_key: String,
    pub company_name: String,
    pub ex_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub currency: String,
    pub reconciliation_score: u8,
    pub overall_status: OverallStatus,
    pub breaks: Vec<EnrichedBreak>,
    pub total_financial_impact: f64,
    pub materiality: Materiality,
    /// True when any break on this row carries fallback enrichment.
    pub degraded: bool,
    pub narrative: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopImpactRow {
    pub row_id: String,
    pub company_name: String,
    pub impact: f64,
    pub score: u8,
}

/// Rows that never became a RowAnalysis, with the reason why.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludedRecords {
    pub unmatchable: usize,
    pub invariant_violations: usize,
    pub reasons: Vec<String>,
}

impl ExcludedRecords {
    pub fn total(&self) -> usize {
        self.unmatchable + self.invariant_violations
    }
}

/// Derived, read-only aggregate over all row analyses. Recomputed on every
/// run, never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_rows: usize,
    pub total_financial_impact: f64,
    pub average_reconciliation_score: f64,
    pub status_distribution: BTreeMap<String, usize>,
    pub severity_distribution: BTreeMap<String, usize>,
    pub high_impact_rows_count: usize,
    pub portfolio_health: PortfolioHealth,
    pub pattern_analysis: PatternAnalysis,
    /// Union of distinct actionable recommendations across top-impact rows.
    pub recommended_actions: Vec<String>,
    pub key_recommendations: Vec<String>,
    pub top_issues_by_impact: Vec<TopImpactRow>,
    /// Number of breaks whose enrichment came from local fallbacks.
    pub degraded_count: usize,
    pub excluded: ExcludedRecords,
}

/// Full result of one pipeline run: plain structured data for the
/// reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analysis_type: String,
    pub stage: RunStage,
    pub total_rows_analyzed: usize,
    pub row_analyses: Vec<RowAnalysis>,
    pub portfolio_summary: PortfolioSummary,
}

/// Runs the pipeline stages in order and consolidates per-row findings into
/// the portfolio view. Nothing thrown by stages 2-5 escapes this type: the
/// matcher and detector are total functions, and the adapter converts every
/// external failure into fallback enrichment.
pub struct Consolidator<'a> {
    config: &'a ReconciliationConfig,
}

impl<'a> Consolidator<'a> {
    pub fn new(config: &'a ReconciliationConfig) -> Self {
        Self { config }
    }

    /// Dropping the returned future abandons the run at the next stage
    /// boundary; no stage performs unbounded work, and every external call
    /// inside the enrichment passes carries its own timeout.
    pub async fn run<C: ClassificationCapability>(
        &self,
        adapter: &ClassificationAdapter<C>,
        nbim: &[EventRecord],
        custody: &[EventRecord],
    ) -> AnalysisReport {
        let mut stage = RunStage::Loaded;
        info!(
            "Reconciliation run: {} NBIM rows vs {} custody rows",
            nbim.len(),
            custody.len()
        );

        let full_set = match_records(nbim, custody);
        let (set, mut excluded) = split_out_violations(full_set);
        stage = advance(stage, RunStage::Matched);

        let mut per_match = detector::detect_findings(&set, self.config);
        attach_duplicate_findings(&set, &mut per_match);
        for rec in &set.unmatchable {
            excluded.unmatchable += 1;
            excluded
                .reasons
                .push(detector::unmatchable_finding(rec).description);
        }
        stage = advance(stage, RunStage::Detected);

        let jobs = build_break_contexts(&set.matches, &per_match);
        let causes = RootCauseEnricher::new(adapter, self.config.parallelism)
            .assess(&jobs)
            .await;
        let cause_values: Vec<RootCauseAssessment> =
            causes.iter().map(|(a, _)| a.clone()).collect();
        let priorities = PriorityEnricher::new(adapter, self.config.parallelism)
            .assess(&jobs, &cause_values)
            .await;
        stage = advance(stage, RunStage::Enriched);

        let mut enriched = causes.into_iter().zip(priorities);
        let mut rows = Vec::with_capacity(set.matches.len());
        for (record_match, findings) in set.matches.iter().zip(&per_match) {
            let breaks: Vec<EnrichedBreak> = findings
                .iter()
                .map(|finding| {
                    let (cause, priority) = enriched
                        .next()
                        .unwrap_or_else(|| degraded_pair(finding));
                    EnrichedBreak::assemble(finding, cause, priority)
                })
                .collect();
            rows.push(self.build_row(record_match, breaks));
        }

        let summary = self.build_summary(&rows, excluded);
        stage = advance(stage, RunStage::Consolidated);

        AnalysisReport {
            analysis_type: "consolidated_row_analysis".to_string(),
            stage,
            total_rows_analyzed: rows.len(),
            row_analyses: rows,
            portfolio_summary: summary,
        }
    }

    fn build_row(&self, record_match: &RecordMatch, breaks: Vec<EnrichedBreak>) -> RowAnalysis {
        let record = record_match.any_record();
        let company_name = record
            .and_then(|r| r.company_name.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let currency = record
            .map(|r| r.currency.clone())
            .unwrap_or_else(|| "USD".to_string());

        let has_missing = breaks
            .iter()
            .any(|b| b.finding.break_type == BreakType::MissingRecord);

        let (score, status) = if has_missing {
            // A missing side forces the status regardless of anything else.
            (0, OverallStatus::MissingData)
        } else {
            let score = reconciliation_score(&breaks, &self.config.score_weights);
            (score, status_from_score(score))
        };

        // Impact is the sum of the non-negative break impacts.
        let total_financial_impact: f64 = breaks
            .iter()
            .map(|b| b.financial_impact.max(0.0))
            .sum();

        let (material, highly) = self.config.materiality_bounds;
        let materiality = if total_financial_impact > highly {
            Materiality::HighlyMaterial
        } else if total_financial_impact > material {
            Materiality::Material
        } else {
            Materiality::Immaterial
        };

        RowAnalysis {
            row_id: record_match.key.row_id(),
            isin: record_match.key.isin.clone(),
            event_key: record_match.key.event_key.clone(),
            company_name,
            ex_date: record.map(|r| r.ex_date),
            payment_date: record.map(|r| r.payment_date),
            currency,
            reconciliation_score: score,
            overall_status: status,
            narrative: narrative(record_match, &breaks, status),
            degraded: breaks.iter().any(|b| b.degraded),
            total_financial_impact,
            materiality,
            breaks,
        }
    }

    fn build_summary(&self, rows: &[RowAnalysis], excluded: ExcludedRecords) -> PortfolioSummary {
        let mut status_distribution: BTreeMap<String, usize> = [
            OverallStatus::Reconciled,
            OverallStatus::MinorIssue,
            OverallStatus::MajorIssue,
            OverallStatus::MissingData,
        ]
        .into_iter()
        .map(|s| (s.label().to_string(), 0))
        .collect();
        let mut severity_distribution: BTreeMap<String, usize> =
            [Severity::Low, Severity::Medium, Severity::High, Severity::Critical]
                .into_iter()
                .map(|s| (s.label().to_string(), 0))
                .collect();

        let mut total_impact = 0.0;
        let mut score_sum = 0u32;
        let mut degraded_count = 0;
        for row in rows {
            *status_distribution
                .entry(row.overall_status.label().to_string())
                .or_insert(0) += 1;
            for brk in &row.breaks {
                *severity_distribution
                    .entry(brk.finding.severity.label().to_string())
                    .or_insert(0) += 1;
                if brk.degraded {
                    degraded_count += 1;
                }
            }
            total_impact += row.total_financial_impact;
            score_sum += u32::from(row.reconciliation_score);
        }

        let average = if rows.is_empty() {
            10.0
        } else {
            round1(f64::from(score_sum) / rows.len() as f64)
        };

        let portfolio_health = if average >= 9.0 {
            PortfolioHealth::Excellent
        } else if average >= 7.0 {
            PortfolioHealth::Good
        } else if average >= 5.0 {
            PortfolioHealth::Concerning
        } else {
            PortfolioHealth::Critical
        };

        let mut by_impact: Vec<&RowAnalysis> =
            rows.iter().filter(|r| r.total_financial_impact > 0.0).collect();
        // Stable sort: equal impacts keep match order.
        by_impact.sort_by(|a, b| {
            b.total_financial_impact
                .partial_cmp(&a.total_financial_impact)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top_issues_by_impact: Vec<TopImpactRow> = by_impact
            .iter()
            .take(5)
            .map(|row| TopImpactRow {
                row_id: row.row_id.clone(),
                company_name: row.company_name.clone(),
                impact: row.total_financial_impact,
                score: row.reconciliation_score,
            })
            .collect();

        let high_impact_rows_count = rows
            .iter()
            .filter(|r| r.total_financial_impact > self.config.high_impact_threshold)
            .count();

        let all_breaks: Vec<&EnrichedBreak> =
            rows.iter().flat_map(|r| r.breaks.iter()).collect();
        let pattern_analysis = if all_breaks.is_empty() {
            PatternAnalysis::empty()
        } else {
            extract_patterns(&all_breaks, self.config.systemic_risk_thresholds)
        };

        let recommended_actions = top_row_actions(&by_impact);

        let mut key_recommendations = Vec::new();
        if all_breaks.is_empty() && excluded.total() == 0 {
            key_recommendations
                .push("No breaks detected - all records reconciled successfully".to_string());
        }
        if high_impact_rows_count > 0 {
            key_recommendations.push(format!(
                "URGENT: {} row(s) have financial impact above {:.0} requiring immediate attention",
                high_impact_rows_count, self.config.high_impact_threshold
            ));
        }
        if !rows.is_empty() && average < 7.0 {
            key_recommendations.push(format!(
                "Portfolio reconciliation quality is below acceptable threshold (avg score: {average:.1}/10)"
            ));
        }
        let critical_breaks = severity_distribution
            .get(Severity::Critical.label())
            .copied()
            .unwrap_or(0);
        if critical_breaks > 0 {
            key_recommendations.push(format!(
                "CRITICAL: {critical_breaks} critical issue(s) identified requiring immediate escalation"
            ));
        }
        if excluded.total() > 0 {
            key_recommendations.push(format!(
                "{} row(s) excluded from analysis - see excluded reasons",
                excluded.total()
            ));
        }

        PortfolioSummary {
            total_rows: rows.len(),
            total_financial_impact: total_impact,
            average_reconciliation_score: average,
            status_distribution,
            severity_distribution,
            high_impact_rows_count,
            portfolio_health,
            pattern_analysis,
            recommended_actions,
            key_recommendations,
            top_issues_by_impact,
            degraded_count,
            excluded,
        }
    }
}

fn advance(from: RunStage, to: RunStage) -> RunStage {
    debug!("Run stage {from:?} -> {to:?}");
    to
}

/// Matches with neither side present cannot be processed; they are logged
/// and counted, and the rest of the run proceeds.
fn split_out_violations(set: MatchSet) -> (MatchSet, ExcludedRecords) {
    let mut excluded = ExcludedRecords::default();
    let (valid, invalid): (Vec<_>, Vec<_>) = set
        .matches
        .into_iter()
        .partition(|m| m.nbim.is_some() || m.custody.is_some());

    for m in invalid {
        error!("Match invariant violated for {}: neither side present", m.key);
        excluded.invariant_violations += 1;
        excluded
            .reasons
            .push(format!("{}: match with neither side present", m.key));
    }

    (
        MatchSet {
            matches: valid,
            duplicates: set.duplicates,
            unmatchable: set.unmatchable,
        },
        excluded,
    )
}

/// Duplicate reports become findings on the row that kept the first
/// occurrence of the key, so they surface in the same stream as every
/// other anomaly.
fn attach_duplicate_findings(set: &MatchSet, per_match: &mut [Vec<Finding>]) {
    if set.duplicates.is_empty() {
        return;
    }
    let index_by_key: HashMap<_, _> = set
        .matches
        .iter()
        .enumerate()
        .map(|(idx, m)| (m.key.clone(), idx))
        .collect();

    for dup in &set.duplicates {
        if let Some(&idx) = index_by_key.get(&dup.key) {
            per_match[idx].push(detector::duplicate_finding(dup));
        }
    }
}

fn build_break_contexts<'m>(
    matches: &'m [RecordMatch],
    per_match: &'m [Vec<Finding>],
) -> Vec<BreakContext<'m>> {
    matches
        .iter()
        .zip(per_match)
        .flat_map(|(m, findings)| {
            findings.iter().map(move |finding| BreakContext {
                row_id: m.key.row_id(),
                company_name: m.any_record().and_then(|r| r.company_name.clone()),
                finding,
                nbim: m.nbim.as_ref(),
                custody: m.custody.as_ref(),
            })
        })
        .collect()
}

fn degraded_pair(
    finding: &Finding,
) -> (
    (RootCauseAssessment, crate::llm::adapter::Provenance),
    (crate::llm::types::PriorityAssessment, crate::llm::adapter::Provenance),
) {
    use crate::llm::adapter::Provenance;
    use crate::llm::enrich::{fallback_priority, fallback_root_cause};
    (
        (fallback_root_cause(finding), Provenance::Fallback),
        (fallback_priority(finding), Provenance::Fallback),
    )
}

/// `10 - min(10, weighted severity sum)`, clamped to [0, 10].
pub fn reconciliation_score(breaks: &[EnrichedBreak], weights: &ScoreWeights) -> u8 {
    let penalty: f64 = breaks
        .iter()
        .map(|b| {
            type_weight(b.finding.break_type, weights)
                * weights.severity_points[b.finding.severity.index()]
        })
        .sum();

    (10.0 - penalty.min(10.0)).clamp(0.0, 10.0).round() as u8
}

fn type_weight(break_type: BreakType, weights: &ScoreWeights) -> f64 {
    match break_type {
        BreakType::AmountMismatch => weights.amount,
        BreakType::TaxMismatch => weights.tax,
        BreakType::DateMismatch => weights.date,
        BreakType::CurrencyMismatch => weights.currency,
        BreakType::DuplicateRecord | BreakType::UnmatchableRecord => weights.duplicate,
        BreakType::MissingRecord => weights.missing,
    }
}

fn status_from_score(score: u8) -> OverallStatus {
    match score {
        10 => OverallStatus::Reconciled,
        7..=9 => OverallStatus::MinorIssue,
        _ => OverallStatus::MajorIssue,
    }
}

fn narrative(record_match: &RecordMatch, breaks: &[EnrichedBreak], status: OverallStatus) -> String {
    if breaks.is_empty() {
        return format!(
            "{}: NBIM and custody bookings agree on amounts, dates and currency.",
            record_match.key
        );
    }

    let mut parts = vec![format!(
        "{}: {} break(s), status {}.",
        record_match.key,
        breaks.len(),
        status.label()
    )];
    for brk in breaks {
        parts.push(brk.finding.description.clone());
    }
    if let Some(top) = breaks.first() {
        parts.push(format!(
            "Most likely cause: {}.",
            top.root_cause.primary_root_cause.label()
        ));
    }
    parts.join(" ")
}

/// Union of distinct actionable recommendations across the top-impact rows,
/// first occurrence wins, generic phrasing dropped.
fn top_row_actions(by_impact: &[&RowAnalysis]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut actions = Vec::new();
    for row in by_impact.iter().take(5) {
        for brk in &row.breaks {
            for action in &brk.recommended_actions {
                if !is_actionable(action) {
                    continue;
                }
                let key = normalize_action(action);
                if seen.insert(key) {
                    actions.push(crate::utils::collapse_whitespace(action));
                }
            }
        }
    }
    actions
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Legacy projection
// ---------------------------------------------------------------------------

/// The pre-existing flat break shape some report consumers still expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyBreak {
    pub break_type: String,
    pub severity: String,
    pub root_causes: Vec<String>,
    pub actions: Vec<String>,
    pub priority_score: u8,
    pub explanation: String,
    pub amount_impact: f64,
    pub currency: String,
    pub isin: String,
    pub company_name: String,
    pub financial_impact: String,
    pub operational_urgency: String,
    pub escalation_required: bool,
    pub target_resolution_days: u32,
}

/// Pure read-only projection of the canonical report into the legacy flat
/// list, sorted by priority score descending (ties keep match order).
/// Never a second computation path.
pub fn legacy_breaks(report: &AnalysisReport) -> Vec<LegacyBreak> {
    let mut breaks: Vec<LegacyBreak> = report
        .row_analyses
        .iter()
        .flat_map(|row| {
            row.breaks.iter().map(|brk| LegacyBreak {
                break_type: brk.finding.break_type.label().to_string(),
                severity: brk.priority_level.label().to_string(),
                root_causes: brk.root_cause.root_causes.clone(),
                actions: brk.recommended_actions.clone(),
                priority_score: brk.priority_score,
                explanation: brk.root_cause.detailed_explanation.clone(),
                amount_impact: brk.financial_impact,
                currency: brk.finding.currency.clone(),
                isin: row.isin.clone(),
                company_name: row.company_name.clone(),
                financial_impact: impact_label(brk.financial_impact).to_string(),
                operational_urgency: brk.operational_urgency.label().to_string(),
                escalation_required: brk.escalation_required,
                target_resolution_days: brk.target_resolution_days,
            })
        })
        .collect();

    breaks.sort_by_key(|b| std::cmp::Reverse(b.priority_score));
    breaks
}

fn impact_label(amount: f64) -> &'static str {
    if amount > 50_000.0 {
        "high"
    } else if amount > 5_000.0 {
        "medium"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::adapter::Provenance;
    use crate::llm::enrich::{fallback_priority, fallback_root_cause};
    use crate::matcher::match_records;
    use crate::schema::RecordSource;
    use std::collections::BTreeMap as StdBTreeMap;

    fn record(isin: &str, source: RecordSource, net: f64) -> EventRecord {
        EventRecord {
            event_key: "K1".to_string(),
            isin: isin.to_string(),
            ex_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            payment_date: NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            net_amount: net,
            tax_amount: 0.0,
            currency: "USD".to_string(),
            company_name: Some("Acme".to_string()),
            custodian: None,
            source,
            extra: StdBTreeMap::new(),
        }
    }

    fn enriched(finding: &Finding) -> EnrichedBreak {
        EnrichedBreak::assemble(
            finding,
            (fallback_root_cause(finding), Provenance::Fallback),
            (fallback_priority(finding), Provenance::Fallback),
        )
    }

    fn finding_of(break_type: BreakType, severity: Severity) -> Finding {
        Finding {
            break_type,
            severity,
            field: None,
            nbim_value: None,
            custody_value: None,
            delta: None,
            amount_impact: 100.0,
            currency: "USD".to_string(),
            description: "test finding".to_string(),
        }
    }

    #[test]
    fn test_score_is_clamped_and_monotonic() {
        let weights = ScoreWeights::default();
        let low = vec![enriched(&finding_of(BreakType::DateMismatch, Severity::Low))];
        let medium = vec![
            enriched(&finding_of(BreakType::DateMismatch, Severity::Low)),
            enriched(&finding_of(BreakType::AmountMismatch, Severity::Medium)),
        ];
        let heavy: Vec<EnrichedBreak> = (0..6)
            .map(|_| enriched(&finding_of(BreakType::AmountMismatch, Severity::Critical)))
            .collect();

        let s0 = reconciliation_score(&[], &weights);
        let s1 = reconciliation_score(&low, &weights);
        let s2 = reconciliation_score(&medium, &weights);
        let s3 = reconciliation_score(&heavy, &weights);

        assert_eq!(s0, 10);
        assert!(s1 <= s0 && s2 <= s1 && s3 <= s2);
        assert_eq!(s3, 0);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(status_from_score(10), OverallStatus::Reconciled);
        assert_eq!(status_from_score(9), OverallStatus::MinorIssue);
        assert_eq!(status_from_score(7), OverallStatus::MinorIssue);
        assert_eq!(status_from_score(6), OverallStatus::MajorIssue);
        assert_eq!(status_from_score(0), OverallStatus::MajorIssue);
    }

    #[test]
    fn test_missing_record_forces_missing_data_and_zero_score() {
        let config = ReconciliationConfig::default();
        let consolidator = Consolidator::new(&config);
        let set = match_records(&[record("A", RecordSource::Nbim, 2000.0)], &[]);
        let findings = detector::detect_findings(&set, &config);
        let breaks: Vec<EnrichedBreak> = findings[0].iter().map(enriched).collect();

        let row = consolidator.build_row(&set.matches[0], breaks);
        assert_eq!(row.overall_status, OverallStatus::MissingData);
        assert_eq!(row.reconciliation_score, 0);
        assert_eq!(row.total_financial_impact, 2000.0);
    }

    #[test]
    fn test_legacy_projection_sorts_by_priority() {
        let config = ReconciliationConfig::default();
        let consolidator = Consolidator::new(&config);

        let set_a = match_records(&[record("A", RecordSource::Nbim, 500_000.0)], &[]);
        let findings_a = detector::detect_findings(&set_a, &config);
        let row_a = consolidator.build_row(
            &set_a.matches[0],
            findings_a[0].iter().map(enriched).collect(),
        );

        let low_finding = finding_of(BreakType::DateMismatch, Severity::Low);
        let set_b = match_records(
            &[record("B", RecordSource::Nbim, 100.0)],
            &[record("B", RecordSource::Custody, 100.0)],
        );
        let row_b = consolidator.build_row(&set_b.matches[0], vec![enriched(&low_finding)]);

        let summary = consolidator.build_summary(
            std::slice::from_ref(&row_b),
            ExcludedRecords::default(),
        );
        let report = AnalysisReport {
            analysis_type: "consolidated_row_analysis".to_string(),
            stage: RunStage::Consolidated,
            total_rows_analyzed: 2,
            row_analyses: vec![row_b, row_a],
            portfolio_summary: summary,
        };

        let legacy = legacy_breaks(&report);
        assert_eq!(legacy.len(), 2);
        assert!(legacy[0].priority_score >= legacy[1].priority_score);
        assert_eq!(legacy[0].isin, "A");
        assert_eq!(legacy[0].break_type, "missing_record");
        assert_eq!(legacy[0].financial_impact, "high");
    }

    #[test]
    fn test_summary_distributions_and_health() {
        let config = ReconciliationConfig::default();
        let consolidator = Consolidator::new(&config);

        let clean_set = match_records(
            &[record("A", RecordSource::Nbim, 100.0)],
            &[record("A", RecordSource::Custody, 100.0)],
        );
        let clean = consolidator.build_row(&clean_set.matches[0], Vec::new());

        let missing_set = match_records(&[record("B", RecordSource::Nbim, 5000.0)], &[]);
        let findings = detector::detect_findings(&missing_set, &config);
        let broken = consolidator.build_row(
            &missing_set.matches[0],
            findings[0].iter().map(enriched).collect(),
        );

        let summary =
            consolidator.build_summary(&[clean, broken], ExcludedRecords::default());

        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.status_distribution["reconciled"], 1);
        assert_eq!(summary.status_distribution["missing_data"], 1);
        assert_eq!(summary.severity_distribution["critical"], 1);
        assert_eq!(summary.average_reconciliation_score, 5.0);
        assert_eq!(summary.portfolio_health, PortfolioHealth::Concerning);
        assert_eq!(summary.high_impact_rows_count, 1);
        assert_eq!(summary.top_issues_by_impact.len(), 1);
        assert_eq!(summary.degraded_count, 1);
        assert!(summary
            .key_recommendations
            .iter()
            .any(|r| r.starts_with("CRITICAL")));
    }

    #[test]
    fn test_recommended_actions_are_deduped_and_actionable() {
        let config = ReconciliationConfig::default();
        let consolidator = Consolidator::new(&config);

        let finding = finding_of(BreakType::AmountMismatch, Severity::High);
        let mut brk = enriched(&finding);
        brk.recommended_actions = vec![
            "Verify the net amount against the custodian statement".to_string(),
            "verify the net  amount against the custodian statement".to_string(),
            "Continue monitoring for patterns".to_string(),
        ];
        brk.financial_impact = 5000.0;

        let set = match_records(
            &[record("A", RecordSource::Nbim, 5000.0)],
            &[record("A", RecordSource::Custody, 0.0)],
        );
        let mut row = consolidator.build_row(&set.matches[0], vec![brk]);
        row.total_financial_impact = 5000.0;

        let summary = consolidator.build_summary(
            std::slice::from_ref(&row),
            ExcludedRecords::default(),
        );
        assert_eq!(summary.recommended_actions.len(), 1);
        assert!(summary.recommended_actions[0].starts_with("Verify"));
    }
}
