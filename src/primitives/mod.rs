// ============================================================================
// prop-cells - Primitives Module
// Property cells, registrations, derived and sequence views
// ============================================================================

pub mod derived;
pub mod property;
pub mod registration;
pub mod seq;

// Re-export for convenience
pub use property::{
    property, Property, PropertyInner, PropertyOptions, ReadOnlyProperty, ReadableProperty,
};
pub use registration::{Registration, RegistrationOps};
pub use seq::{ReadOnlySeqProperty, SeqPatch};
