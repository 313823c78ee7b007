// ============================================================================
// prop-cells - Reactivity Module
// Notification scheduling, batching and equality strategies
// ============================================================================

pub mod batching;
pub mod equality;
pub mod scheduling;

// Re-export scheduling types
pub use scheduling::{Sequencer, Task, TaskKey, TaskKind};

// Re-export batching functions
pub use batching::{batch, current_sequencer, flush, is_batching};

pub use equality::{equals, never_equals, safe_equals_f32, safe_equals_f64};
