use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which system a record was booked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Nbim,
    Custody,
}

impl RecordSource {
    pub fn other(self) -> Self {
        match self {
            RecordSource::Nbim => RecordSource::Custody,
            RecordSource::Custody => RecordSource::Nbim,
        }
    }
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::Nbim => write!(f, "NBIM"),
            RecordSource::Custody => write!(f, "CUSTODY"),
        }
    }
}

/// Identity key of a dividend event: instrument identifier plus the
/// corporate-action event key shared by both booking systems.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub isin: String,
    pub event_key: String,
}

impl RecordKey {
    pub fn new(isin: impl Into<String>, event_key: impl Into<String>) -> Self {
        Self {
            isin: isin.into(),
            event_key: event_key.into(),
        }
    }

    /// A key is malformed when either component is empty after trimming.
    /// Rows carrying malformed keys are excluded from matching and reported
    /// separately rather than aborting the run.
    pub fn is_well_formed(&self) -> bool {
        !self.isin.trim().is_empty() && !self.event_key.trim().is_empty()
    }

    /// Row identifier used throughout reporting ("ISIN-EventKey").
    pub fn row_id(&self) -> String {
        format!("{}-{}", self.isin, self.event_key)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.isin, self.event_key)
    }
}

/// One normalized dividend booking row, as produced by the upstream
/// normalization step. Immutable once loaded; the pipeline only reads it.
///
/// Source-specific columns that have no place in the common schema
/// (SEDOL, ticker, gross amounts, tax rates, ...) ride along in `extra`
/// so reporting can still display them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_key: String,
    pub isin: String,
    pub ex_date: NaiveDate,
    pub payment_date: NaiveDate,
    pub net_amount: f64,
    pub tax_amount: f64,
    pub currency: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub custodian: Option<String>,
    pub source: RecordSource,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EventRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.isin.clone(), self.event_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(isin: &str, event_key: &str) -> EventRecord {
        EventRecord {
            event_key: event_key.to_string(),
            isin: isin.to_string(),
            ex_date: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
            payment_date: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            net_amount: 1000.0,
            tax_amount: 150.0,
            currency: "USD".to_string(),
            company_name: Some("Test Corp".to_string()),
            custodian: None,
            source: RecordSource::Nbim,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_key_well_formedness() {
        assert!(record("US0378331005", "EVT1").key().is_well_formed());
        assert!(!record("", "EVT1").key().is_well_formed());
        assert!(!record("US0378331005", "   ").key().is_well_formed());
    }

    #[test]
    fn test_row_id_format() {
        let key = record("US0378331005", "EVT1").key();
        assert_eq!(key.row_id(), "US0378331005-EVT1");
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut rec = record("NO0010096985", "COAC-77");
        rec.extra.insert(
            "sedol".to_string(),
            serde_json::Value::String("B1234".to_string()),
        );

        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("NO0010096985"));

        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key(), rec.key());
        assert_eq!(back.extra.get("sedol"), rec.extra.get("sedol"));
    }
}
