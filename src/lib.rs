// ============================================================================
// prop-cells - Observable Property Cells for Rust
// ============================================================================
//
// Mutable value cells that notify listeners through a coalescing scheduler,
// read-only views derived from them, and cached asynchronous validation.
//
// Layout:
//   core/        ids, type-erased traits, sequencer configuration
//   reactivity/  the sequencer (coalescing queue), batching, equality
//   primitives/  properties, registrations, derived and sequence views
//   validation/  results, validators, the validation engine
// ============================================================================

pub mod core;
pub mod macros;
pub mod primitives;
pub mod reactivity;
pub mod validation;

// Re-export core items at crate root for ergonomic access
pub use crate::core::config::{FlushMode, SequencerConfig, DEFAULT_MAX_FLUSH_DEPTH};
pub use crate::core::id::PropertyId;
pub use crate::core::types::{ancestors, AnyProperty, Callback, EqualsFn};

// Re-export primitives at crate root
pub use primitives::property::{
    property, Property, PropertyInner, PropertyOptions, ReadOnlyProperty, ReadableProperty,
};
pub use primitives::registration::{Registration, RegistrationOps};
pub use primitives::seq::{ReadOnlySeqProperty, SeqPatch};

// Re-export reactivity functions
pub use reactivity::batching::{batch, current_sequencer, flush, is_batching};
pub use reactivity::equality::{equals, never_equals, safe_equals_f32, safe_equals_f64};
pub use reactivity::scheduling::{Sequencer, TaskKey, TaskKind};

// Re-export validation
pub use validation::{
    async_validator, try_validator, AsyncValidator, TryValidator, ValidationError,
    ValidationHandle, ValidationOutcome, ValidationOutput, ValidationResult, ValidationState,
    Validator, ValidatorFailure, ValidatorFuture,
};

// =============================================================================
// TESTS
// =============================================================================
