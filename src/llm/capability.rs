use futures::future::BoxFuture;
use thiserror::Error;

/// Failure modes of the external text-generation capability. These never
/// cross the adapter boundary; the adapter converts every one of them into
/// a deterministic fallback result.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service returned an empty response")]
    EmptyResponse,
}

/// The external classification capability:
/// `classify(context, schema_hint) -> text`.
///
/// Availability, latency and response shape are outside this crate's
/// control; callers must treat the returned text as untrusted input. The
/// trait is the seam that lets tests substitute a deterministic stub for
/// the real service.
pub trait ClassificationCapability: Send + Sync {
    fn classify<'a>(
        &'a self,
        context: &'a str,
        schema_hint: Option<&'a serde_json::Value>,
    ) -> BoxFuture<'a, Result<String, CapabilityError>>;
}

impl<T: ClassificationCapability + ?Sized> ClassificationCapability for &T {
    fn classify<'a>(
        &'a self,
        context: &'a str,
        schema_hint: Option<&'a serde_json::Value>,
    ) -> BoxFuture<'a, Result<String, CapabilityError>> {
        (**self).classify(context, schema_hint)
    }
}

impl<T: ClassificationCapability + ?Sized> ClassificationCapability for std::sync::Arc<T> {
    fn classify<'a>(
        &'a self,
        context: &'a str,
        schema_hint: Option<&'a serde_json::Value>,
    ) -> BoxFuture<'a, Result<String, CapabilityError>> {
        (**self).classify(context, schema_hint)
    }
}
