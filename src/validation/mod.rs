// ============================================================================
// prop-cells - Validation Module
// Validator chains, cached pass results and the validity property
// ============================================================================

pub mod engine;
pub mod result;
pub mod validator;
mod waker;

pub use engine::{ValidationHandle, ValidationState};
pub use result::{ValidationError, ValidationOutput, ValidationResult, ValidatorFailure};
pub use validator::{
    async_validator, try_validator, AsyncValidator, TryValidator, ValidationOutcome, Validator,
    ValidatorFuture,
};
