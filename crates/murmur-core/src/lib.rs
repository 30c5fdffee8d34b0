//! Murmur Core crate - shared configuration, error taxonomy, and the
//! outbound pipeline event stream.

pub mod config;
pub mod error;
pub mod events;

pub use config::{MurmurConfig, SessionSettings};
pub use error::{MurmurError, Result};
pub use events::{EventBus, PipelineEvent, SessionOutcome};
