use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Invalid configuration for {field}: {details}")]
    InvalidConfig { field: String, details: String },

    #[error("Invalid tolerance {0}: must be non-negative")]
    InvalidTolerance(f64),

    #[error("Invalid score weight {0}: must be non-negative")]
    InvalidScoreWeight(f64),

    #[error("Match invariant violated for key {0}: neither side present")]
    EmptyMatch(String),

    #[error("Pipeline failed during {stage} stage: {details}")]
    StageFailed { stage: String, details: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
