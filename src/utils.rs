/// Lowercased, whitespace-collapsed form of an action string. Two actions
/// normalizing to the same text are duplicates.
pub fn normalize_action(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

const GENERIC_PREFIXES: &[&str] = &[
    "maintain",
    "continue",
    "monitor",
    "document",
    "create benchmark",
    "celebrate",
    "keep up",
    "no action",
    "none",
];

const ACTIONABLE_VERBS: &[&str] = &[
    "verify",
    "reconcile",
    "cross-check",
    "crosscheck",
    "investigate",
    "contact",
    "request",
    "correct",
    "update",
    "adjust",
    "book",
    "amend",
    "align",
    "compute",
    "recompute",
    "escalate",
    "implement",
    "fix",
    "map",
    "match",
    "attach",
    "obtain",
    "validate",
];

/// Whether an action string is worth surfacing to operations: long enough
/// to mean something, not a congratulatory/hygiene statement, and carrying
/// an imperative verb that changes data, performs a check, or contacts a
/// counterparty.
pub fn is_actionable(text: &str) -> bool {
    let normalized = normalize_action(text);
    if normalized.len() < 10 {
        return false;
    }
    if GENERIC_PREFIXES.iter().any(|p| normalized.starts_with(p)) {
        return false;
    }
    ACTIONABLE_VERBS
        .iter()
        .any(|verb| normalized.split(|c: char| !c.is_alphanumeric() && c != '-').any(|w| w == *verb))
}
