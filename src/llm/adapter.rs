use crate::config::ReconciliationConfig;
use crate::llm::capability::ClassificationCapability;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

/// Where an enriched field set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Full structured response from the external capability.
    Assisted,
    /// Minimum fields salvaged from a malformed response.
    Partial,
    /// Derived locally from the finding itself.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FallbackReason {
    Timeout,
    CapabilityUnavailable(String),
    UnparseableResponse,
    MissingBatchMember,
}

/// The minimum fields worth salvaging from a response that failed the
/// strict parse: a priority, a cause category, one action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialFields {
    pub priority: Option<u8>,
    pub category: Option<String>,
    pub action: Option<String>,
}

impl PartialFields {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none() && self.category.is_none() && self.action.is_none()
    }
}

/// Per-member result of one classification call. Downstream enrichment
/// handles all three variants explicitly; assuming success is a bug.
#[derive(Debug, Clone)]
pub enum ClassificationOutcome<T> {
    Parsed(T),
    PartiallyParsed(PartialFields),
    Fallback(FallbackReason),
}

/// Translates batches of findings into classification calls and converts
/// whatever comes back (or fails to come back) into per-member outcomes.
///
/// This boundary never raises: timeouts, transport failures and malformed
/// responses all degrade to `Fallback`, one member at a time.
pub struct ClassificationAdapter<C> {
    capability: C,
    call_timeout: Duration,
    batch_size: usize,
}

impl<C: ClassificationCapability> ClassificationAdapter<C> {
    pub fn new(capability: C, config: &ReconciliationConfig) -> Self {
        Self {
            capability,
            call_timeout: config.call_timeout,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// One external call for up to `batch_size` findings. `array_key` names
    /// the response field expected to hold one member per submitted finding;
    /// a short array degrades only the missing tail.
    pub async fn classify_batch<T: DeserializeOwned>(
        &self,
        context: &str,
        schema_hint: &Value,
        array_key: &str,
        expected: usize,
    ) -> Vec<ClassificationOutcome<T>> {
        let call = self.capability.classify(context, Some(schema_hint));
        let raw = match timeout(self.call_timeout, call).await {
            Err(_) => {
                warn!("Classification call timed out after {:?}", self.call_timeout);
                return fallback_all(expected, FallbackReason::Timeout);
            }
            Ok(Err(err)) => {
                warn!("Classification call failed: {err}");
                return fallback_all(
                    expected,
                    FallbackReason::CapabilityUnavailable(err.to_string()),
                );
            }
            Ok(Ok(text)) => text,
        };

        let value = match extract_json(&raw) {
            Some(value) => value,
            None => {
                // With a single member there is no ambiguity about which
                // finding a keyword belongs to, so scan the raw text.
                if expected == 1 {
                    let partial = salvage_from_text(&raw);
                    if !partial.is_empty() {
                        return vec![ClassificationOutcome::PartiallyParsed(partial)];
                    }
                }
                warn!(
                    "Unparseable classification response ({} chars), degrading {} member(s)",
                    raw.len(),
                    expected
                );
                return fallback_all(expected, FallbackReason::UnparseableResponse);
            }
        };

        let members = member_array(value, array_key, expected);

        (0..expected)
            .map(|idx| match members.get(idx) {
                Some(member) => parse_member(member),
                None => ClassificationOutcome::Fallback(FallbackReason::MissingBatchMember),
            })
            .collect()
    }
}

fn parse_member<T: DeserializeOwned>(member: &Value) -> ClassificationOutcome<T> {
    match serde_json::from_value::<T>(member.clone()) {
        Ok(parsed) => ClassificationOutcome::Parsed(parsed),
        Err(err) => {
            debug!("Strict member parse failed ({err}), salvaging");
            let partial = salvage_from_value(member);
            if partial.is_empty() {
                ClassificationOutcome::Fallback(FallbackReason::UnparseableResponse)
            } else {
                ClassificationOutcome::PartiallyParsed(partial)
            }
        }
    }
}

fn fallback_all<T>(expected: usize, reason: FallbackReason) -> Vec<ClassificationOutcome<T>> {
    (0..expected)
        .map(|_| ClassificationOutcome::Fallback(reason.clone()))
        .collect()
}

/// Pulls a JSON document out of free-form model output: direct parse first,
/// then the outermost object, then the outermost array. Handles fenced
/// code blocks and surrounding prose without caring about either.
pub fn extract_json(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (raw.find(open), raw.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&raw[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Locates the per-member array inside the response document. Tolerates a
/// bare array, and a bare object when only one member was requested.
fn member_array(value: Value, array_key: &str, expected: usize) -> Vec<Value> {
    match value {
        Value::Object(mut map) => {
            if let Some(Value::Array(items)) = map.remove(array_key) {
                return items;
            }
            // A lone object is acceptable in place of a one-element array.
            if expected == 1 {
                return vec![Value::Object(map)];
            }
            Vec::new()
        }
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn salvage_from_value(member: &Value) -> PartialFields {
    let mut partial = PartialFields::default();
    let Some(map) = member.as_object() else {
        return partial;
    };

    for (key, value) in map {
        let key = key.to_lowercase();
        if partial.priority.is_none() && (key.contains("priority") || key.contains("score")) {
            partial.priority = value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .filter(|n| (1..=10).contains(n))
                .map(|n| n as u8);
        }
        if partial.category.is_none()
            && (key.contains("cause") || key.contains("category") || key.contains("type"))
        {
            partial.category = value.as_str().map(str::to_string);
        }
        if partial.action.is_none() && (key.contains("action") || key.contains("recommend")) {
            partial.action = match value {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.iter().find_map(|v| v.as_str()).map(str::to_string),
                _ => None,
            };
        }
    }

    partial
}

/// Keyword scan over unstructured text, used only for single-member calls
/// where attribution is unambiguous.
fn salvage_from_text(raw: &str) -> PartialFields {
    let mut partial = PartialFields::default();
    let lower = raw.to_lowercase();

    if let Some(pos) = lower.find("priority") {
        partial.priority = lower[pos..]
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse::<u8>()
            .ok()
            .filter(|n| (1..=10).contains(n));
    }

    for category in [
        "system_discrepancy",
        "data_quality",
        "business_rule",
        "missing_record",
        "timing",
    ] {
        if lower.contains(category) || lower.contains(&category.replace('_', " ")) {
            partial.category = Some(category.to_string());
            break;
        }
    }

    partial.action = raw
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("- ") || line.starts_with("* "))
        .map(|line| line[2..].trim().to_string());

    partial
}
