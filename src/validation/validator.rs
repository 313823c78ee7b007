// ============================================================================
// prop-cells - Validators
// Synchronous and asynchronous checks attached to a property
// ============================================================================

use std::future::Future;

use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::validation::result::{ValidationResult, ValidatorFailure};

/// What a single validator produces.
pub type ValidationOutcome = Result<ValidationResult, ValidatorFailure>;

/// The future a validator hands back for one value.
pub type ValidatorFuture = LocalBoxFuture<'static, ValidationOutcome>;

/// A check run against every value a validation pass sees.
///
/// Closures `Fn(&A) -> ValidationResult` are validators. Use
/// [`async_validator`] for checks that complete later and [`try_validator`]
/// for synchronous checks that can fail outright.
pub trait Validator<A> {
    /// Start checking `value`. The returned future must not borrow it.
    fn validate(&self, value: &A) -> ValidatorFuture;
}

impl<A, F> Validator<A> for F
where
    F: Fn(&A) -> ValidationResult,
{
    fn validate(&self, value: &A) -> ValidatorFuture {
        future::ready(Ok(self(value))).boxed_local()
    }
}

// =============================================================================
// ADAPTERS
// =============================================================================

/// Validator built from a closure returning a future. See [`async_validator`].
pub struct AsyncValidator<F> {
    check: F,
}

impl<A, F, Fut> Validator<A> for AsyncValidator<F>
where
    F: Fn(&A) -> Fut,
    Fut: Future<Output = ValidationOutcome> + 'static,
{
    fn validate(&self, value: &A) -> ValidatorFuture {
        (self.check)(value).boxed_local()
    }
}

/// Adapt a closure that returns a future. The closure runs when the pass
/// starts; it must copy what it needs out of the value.
///
/// # Example
///
/// ```
/// use futures::executor::block_on;
/// use prop_cells::{async_validator, Property, ReadableProperty, ValidationResult};
///
/// let name = Property::new(String::from("taken"));
/// name.add_validator(async_validator(|name: &String| {
///     let name = name.clone();
///     async move {
///         // e.g. a round trip to a server
///         if name == "taken" {
///             Ok(ValidationResult::invalid(["name already in use"]))
///         } else {
///             Ok(ValidationResult::Valid)
///         }
///     }
/// }));
///
/// assert_eq!(
///     block_on(name.is_valid()),
///     Ok(ValidationResult::invalid(["name already in use"]))
/// );
/// ```
pub fn async_validator<A, F, Fut>(check: F) -> AsyncValidator<F>
where
    F: Fn(&A) -> Fut,
    Fut: Future<Output = ValidationOutcome> + 'static,
{
    AsyncValidator { check }
}

/// Validator built from a fallible synchronous closure. See [`try_validator`].
pub struct TryValidator<F> {
    check: F,
}

impl<A, F> Validator<A> for TryValidator<F>
where
    F: Fn(&A) -> ValidationOutcome,
{
    fn validate(&self, value: &A) -> ValidatorFuture {
        future::ready((self.check)(value)).boxed_local()
    }
}

/// Adapt a synchronous closure that may fail instead of judging the value.
pub fn try_validator<A, F>(check: F) -> TryValidator<F>
where
    F: Fn(&A) -> ValidationOutcome,
{
    TryValidator { check }
}

// =============================================================================
// TESTS
// =============================================================================
