pub mod adapter;
pub mod capability;
#[cfg(feature = "anthropic")]
pub mod client;
pub mod enrich;
pub mod prompts;
pub mod types;

pub use adapter::*;
pub use capability::*;
#[cfg(feature = "anthropic")]
pub use client::*;
pub use enrich::*;
pub use types::*;
