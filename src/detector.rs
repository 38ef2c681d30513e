use crate::config::ReconciliationConfig;
use crate::matcher::{DuplicateRecord, MatchSet, RecordMatch, UnmatchableRecord};
use crate::schema::RecordSource;
use log::debug;
use serde::{Deserialize, Serialize};

/// Classification of a detected break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    AmountMismatch,
    TaxMismatch,
    DateMismatch,
    CurrencyMismatch,
    MissingRecord,
    DuplicateRecord,
    UnmatchableRecord,
}

impl BreakType {
    pub fn label(&self) -> &'static str {
        match self {
            BreakType::AmountMismatch => "amount_mismatch",
            BreakType::TaxMismatch => "tax_mismatch",
            BreakType::DateMismatch => "date_mismatch",
            BreakType::CurrencyMismatch => "currency_mismatch",
            BreakType::MissingRecord => "missing_record",
            BreakType::DuplicateRecord => "duplicate_record",
            BreakType::UnmatchableRecord => "unmatchable_record",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Index into `ScoreWeights::severity_points`.
    pub fn index(self) -> usize {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One discrepancy on one match. Deltas follow the custody - nbim
/// convention and are always present when both sides are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub break_type: BreakType,
    pub severity: Severity,
    /// The compared field, where one applies ("net_amount", "ex_date", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbim_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custody_value: Option<serde_json::Value>,
    /// custody - nbim for numeric comparisons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Local estimate of the money at stake, in the row's currency.
    pub amount_impact: f64,
    pub currency: String,
    pub description: String,
}

/// Compares both sides of every match and emits typed findings, grouped by
/// match in the matcher's output order. A one-sided match yields exactly one
/// missing-record finding naming the side present.
pub fn detect_findings(set: &MatchSet, config: &ReconciliationConfig) -> Vec<Vec<Finding>> {
    let per_match: Vec<Vec<Finding>> = set
        .matches
        .iter()
        .map(|m| detect_match(m, config))
        .collect();

    let total: usize = per_match.iter().map(Vec::len).sum();
    debug!("Detected {total} findings across {} matches", per_match.len());

    per_match
}

fn detect_match(record_match: &RecordMatch, config: &ReconciliationConfig) -> Vec<Finding> {
    let (nbim, custody) = match (&record_match.nbim, &record_match.custody) {
        (Some(n), Some(c)) => (n, c),
        _ => {
            let present = record_match
                .present_side()
                .unwrap_or(RecordSource::Nbim);
            let record = record_match.any_record();
            let impact = record.map(|r| r.net_amount.abs()).unwrap_or(0.0);
            let currency = record
                .map(|r| r.currency.clone())
                .unwrap_or_else(|| "USD".to_string());
            return vec![Finding {
                break_type: BreakType::MissingRecord,
                severity: Severity::Critical,
                field: None,
                nbim_value: None,
                custody_value: None,
                delta: None,
                amount_impact: impact,
                currency,
                description: format!(
                    "Record for {} exists only in {}; missing from {}",
                    record_match.key,
                    present,
                    present.other()
                ),
            }];
        }
    };

    let mut findings = Vec::new();
    let currency = nbim.currency.clone();

    if !config.amount_tolerance.within(nbim.net_amount, custody.net_amount) {
        let delta = custody.net_amount - nbim.net_amount;
        findings.push(Finding {
            break_type: BreakType::AmountMismatch,
            severity: numeric_severity(delta, nbim.net_amount, custody.net_amount),
            field: Some("net_amount".to_string()),
            nbim_value: Some(nbim.net_amount.into()),
            custody_value: Some(custody.net_amount.into()),
            delta: Some(delta),
            amount_impact: delta.abs(),
            currency: currency.clone(),
            description: format!(
                "Net amount differs: NBIM {:.2} vs custody {:.2} (delta {:+.2} {})",
                nbim.net_amount, custody.net_amount, delta, currency
            ),
        });
    }

    if !config.tax_tolerance.within(nbim.tax_amount, custody.tax_amount) {
        let delta = custody.tax_amount - nbim.tax_amount;
        findings.push(Finding {
            break_type: BreakType::TaxMismatch,
            severity: numeric_severity(delta, nbim.tax_amount, custody.tax_amount),
            field: Some("tax_amount".to_string()),
            nbim_value: Some(nbim.tax_amount.into()),
            custody_value: Some(custody.tax_amount.into()),
            delta: Some(delta),
            amount_impact: delta.abs(),
            currency: currency.clone(),
            description: format!(
                "Withholding tax differs: NBIM {:.2} vs custody {:.2} (delta {:+.2} {})",
                nbim.tax_amount, custody.tax_amount, delta, currency
            ),
        });
    }

    for (field, nbim_date, custody_date) in [
        ("ex_date", nbim.ex_date, custody.ex_date),
        ("payment_date", nbim.payment_date, custody.payment_date),
    ] {
        if nbim_date != custody_date {
            findings.push(Finding {
                break_type: BreakType::DateMismatch,
                severity: Severity::Medium,
                field: Some(field.to_string()),
                nbim_value: Some(nbim_date.to_string().into()),
                custody_value: Some(custody_date.to_string().into()),
                delta: None,
                amount_impact: 0.0,
                currency: currency.clone(),
                description: format!("{field} differs: NBIM {nbim_date} vs custody {custody_date}"),
            });
        }
    }

    if nbim.currency != custody.currency {
        findings.push(Finding {
            break_type: BreakType::CurrencyMismatch,
            severity: Severity::High,
            field: Some("currency".to_string()),
            nbim_value: Some(nbim.currency.clone().into()),
            custody_value: Some(custody.currency.clone().into()),
            delta: None,
            amount_impact: 0.0,
            currency: currency.clone(),
            description: format!(
                "Currency differs: NBIM {} vs custody {}",
                nbim.currency, custody.currency
            ),
        });
    }

    findings
}

/// Severity bucket from the delta's absolute size and its share of the
/// larger leg. The buckets are the deterministic stand-in for the judgment
/// the external classifier would otherwise provide.
fn numeric_severity(delta: f64, a: f64, b: f64) -> Severity {
    let abs = delta.abs();
    let scale = a.abs().max(b.abs()).max(1.0);
    let pct = abs / scale;

    if pct > 0.25 || abs > 100_000.0 {
        Severity::Critical
    } else if pct > 0.05 || abs > 10_000.0 {
        Severity::High
    } else if pct > 0.01 || abs > 1_000.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Projects a duplicate report into the finding stream so every anomaly is
/// visible in one place.
pub fn duplicate_finding(dup: &DuplicateRecord) -> Finding {
    Finding {
        break_type: BreakType::DuplicateRecord,
        severity: Severity::Medium,
        field: None,
        nbim_value: None,
        custody_value: None,
        delta: None,
        amount_impact: dup.record.net_amount.abs(),
        currency: dup.record.currency.clone(),
        description: format!(
            "Duplicate {} booking for {}; later occurrence reported, first kept",
            dup.source, dup.key
        ),
    }
}

pub fn unmatchable_finding(rec: &UnmatchableRecord) -> Finding {
    Finding {
        break_type: BreakType::UnmatchableRecord,
        severity: Severity::High,
        field: None,
        nbim_value: None,
        custody_value: None,
        delta: None,
        amount_impact: rec.record.net_amount.abs(),
        currency: rec.record.currency.clone(),
        description: format!("{} row excluded from matching: {}", rec.source, rec.reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::match_records;
    use crate::schema::EventRecord;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn record(source: RecordSource, net: f64, tax: f64) -> EventRecord {
        EventRecord {
            event_key: "EVT1".to_string(),
            isin: "US0378331005".to_string(),
            ex_date: NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(),
            payment_date: NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
            net_amount: net,
            tax_amount: tax,
            currency: "USD".to_string(),
            company_name: Some("Apple Inc".to_string()),
            custodian: None,
            source,
            extra: BTreeMap::new(),
        }
    }

    fn detect_pair(nbim: EventRecord, custody: EventRecord) -> Vec<Finding> {
        let set = match_records(&[nbim], &[custody]);
        detect_findings(&set, &ReconciliationConfig::default())
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn test_amount_mismatch_delta_is_custody_minus_nbim() {
        let findings = detect_pair(
            record(RecordSource::Nbim, 1000.0, 100.0),
            record(RecordSource::Custody, 950.0, 100.0),
        );

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].break_type, BreakType::AmountMismatch);
        assert_eq!(findings[0].delta, Some(-50.0));
        assert_eq!(findings[0].amount_impact, 50.0);
    }

    #[test]
    fn test_within_tolerance_is_clean() {
        let findings = detect_pair(
            record(RecordSource::Nbim, 1000.0, 100.0),
            record(RecordSource::Custody, 1000.005, 100.0),
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_simultaneous_amount_and_tax_findings() {
        let findings = detect_pair(
            record(RecordSource::Nbim, 1000.0, 150.0),
            record(RecordSource::Custody, 900.0, 135.0),
        );

        let types: Vec<BreakType> = findings.iter().map(|f| f.break_type).collect();
        assert_eq!(types, vec![BreakType::AmountMismatch, BreakType::TaxMismatch]);
    }

    #[test]
    fn test_date_mismatch_requires_exact_match() {
        let mut custody = record(RecordSource::Custody, 1000.0, 100.0);
        custody.payment_date = NaiveDate::from_ymd_opt(2024, 2, 16).unwrap();

        let findings = detect_pair(record(RecordSource::Nbim, 1000.0, 100.0), custody);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].break_type, BreakType::DateMismatch);
        assert_eq!(findings[0].field.as_deref(), Some("payment_date"));
    }

    #[test]
    fn test_one_sided_match_yields_single_missing_finding() {
        let set = match_records(&[record(RecordSource::Nbim, 1000.0, 100.0)], &[]);
        let findings = detect_findings(&set, &ReconciliationConfig::default());

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].len(), 1);
        let finding = &findings[0][0];
        assert_eq!(finding.break_type, BreakType::MissingRecord);
        assert_eq!(finding.severity, Severity::Critical);
        assert!(finding.description.contains("only in NBIM"));
        assert_eq!(finding.amount_impact, 1000.0);
    }

    #[test]
    fn test_numeric_severity_buckets() {
        assert_eq!(numeric_severity(-5.0, 1000.0, 995.0), Severity::Low);
        assert_eq!(numeric_severity(-50.0, 1000.0, 950.0), Severity::Medium);
        assert_eq!(numeric_severity(-200.0, 1000.0, 800.0), Severity::High);
        assert_eq!(numeric_severity(-500.0, 1000.0, 500.0), Severity::Critical);
        assert_eq!(numeric_severity(150_000.0, 1e6, 1.15e6), Severity::Critical);
    }
}
