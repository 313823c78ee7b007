// ============================================================================
// prop-cells - Core Module
// Identities, type-erased traits and configuration
// ============================================================================

pub mod config;
pub mod id;
pub mod types;

// Re-export commonly used items
pub use config::{FlushMode, SequencerConfig, DEFAULT_MAX_FLUSH_DEPTH};
pub use id::PropertyId;
pub use types::{ancestors, AnyProperty, Callback, EqualsFn};
