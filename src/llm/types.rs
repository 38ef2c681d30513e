use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseCategory {
    #[schemars(description = "Bad or inconsistent reference/booking data in one of the systems")]
    DataQuality,

    #[schemars(description = "The two booking systems applied different calculations or feeds")]
    SystemDiscrepancy,

    #[schemars(description = "A business rule (tax treaty, restitution, rounding policy) was applied differently")]
    BusinessRule,

    #[schemars(description = "Same event booked against different dates or in different periods")]
    Timing,

    #[schemars(description = "The event was never booked on one side")]
    MissingRecord,

    #[schemars(description = "None of the listed categories fits")]
    Other,
}

impl RootCauseCategory {
    pub fn label(self) -> &'static str {
        match self {
            RootCauseCategory::DataQuality => "data_quality",
            RootCauseCategory::SystemDiscrepancy => "system_discrepancy",
            RootCauseCategory::BusinessRule => "business_rule",
            RootCauseCategory::Timing => "timing",
            RootCauseCategory::MissingRecord => "missing_record",
            RootCauseCategory::Other => "other",
        }
    }

    /// Loose parse used when salvaging fields from a degraded response.
    pub fn from_loose(text: &str) -> Option<Self> {
        let needle = text.trim().to_lowercase().replace([' ', '-'], "_");
        match needle.as_str() {
            "data_quality" => Some(Self::DataQuality),
            "system_discrepancy" => Some(Self::SystemDiscrepancy),
            "business_rule" => Some(Self::BusinessRule),
            "timing" => Some(Self::Timing),
            "missing_record" => Some(Self::MissingRecord),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// One root-cause assessment, as requested from the external capability.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RootCauseAssessment {
    #[schemars(description = "The single most likely cause category for this break")]
    pub primary_root_cause: RootCauseCategory,

    #[schemars(description = "Specific root-cause hypotheses, most likely first")]
    pub root_causes: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Data quality problems observed in either record")]
    pub data_quality_issues: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Concrete investigation steps for the operations team")]
    pub recommended_investigation: Vec<String>,

    pub analysis_confidence: Confidence,

    #[schemars(description = "A short paragraph explaining the reasoning")]
    pub detailed_explanation: String,
}

/// Batch wrapper: the capability is asked to return exactly one assessment
/// per submitted break, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RootCauseBatchResponse {
    pub analyses: Vec<RootCauseAssessment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Immediate,
    Urgent,
    Routine,
    Low,
}

impl Urgency {
    pub fn label(self) -> &'static str {
        match self {
            Urgency::Immediate => "immediate",
            Urgency::Urgent => "urgent",
            Urgency::Routine => "routine",
            Urgency::Low => "low",
        }
    }
}

/// One priority classification, as requested from the external capability.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriorityAssessment {
    #[schemars(
        description = "Business priority from 1 (ignore for now) to 10 (drop everything)",
        range(min = 1, max = 10)
    )]
    pub priority_score: u8,

    pub operational_urgency: Urgency,

    #[schemars(description = "Short imperative remediation actions, most important first")]
    pub recommended_actions: Vec<String>,

    #[serde(default)]
    pub escalation_required: bool,

    #[schemars(description = "Working days within which this break should be resolved")]
    pub target_resolution_days: u32,

    #[schemars(description = "One or two sentences justifying the score")]
    pub business_justification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriorityBatchResponse {
    pub classifications: Vec<PriorityAssessment>,
}

/// Priority bucket derived from the score; never asked of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    High,
    Medium,
    Low,
}

impl PriorityLevel {
    /// score >= 8 is high, 4-7 medium, the rest low.
    pub fn from_score(score: u8) -> Self {
        match score {
            8..=u8::MAX => PriorityLevel::High,
            4..=7 => PriorityLevel::Medium,
            _ => PriorityLevel::Low,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PriorityLevel::High => "high",
            PriorityLevel::Medium => "medium",
            PriorityLevel::Low => "low",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation_mentions_required_fields() {
        let schema = schemars::schema_for!(RootCauseBatchResponse);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("analyses"));
        assert!(json.contains("primary_root_cause"));

        let schema = schemars::schema_for!(PriorityBatchResponse);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("classifications"));
        assert!(json.contains("priority_score"));
    }

    #[test]
    fn test_priority_level_buckets() {
        assert_eq!(PriorityLevel::from_score(10), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_score(8), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_score(7), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_score(4), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_score(3), PriorityLevel::Low);
        assert_eq!(PriorityLevel::from_score(1), PriorityLevel::Low);
    }

    #[test]
    fn test_loose_category_parse() {
        assert_eq!(
            RootCauseCategory::from_loose(" System Discrepancy "),
            Some(RootCauseCategory::SystemDiscrepancy)
        );
        assert_eq!(
            RootCauseCategory::from_loose("timing"),
            Some(RootCauseCategory::Timing)
        );
        assert_eq!(RootCauseCategory::from_loose("cosmic rays"), None);
    }

    #[test]
    fn test_assessment_deserializes_with_defaults() {
        let json = r#"{
            "primary_root_cause": "timing",
            "root_causes": ["Ex-date booked off the record date"],
            "analysis_confidence": "medium",
            "detailed_explanation": "Dates differ by one business day."
        }"#;
        let parsed: RootCauseAssessment = serde_json::from_str(json).unwrap();
        assert!(parsed.data_quality_issues.is_empty());
        assert!(parsed.recommended_investigation.is_empty());
    }
}
