// ============================================================================
// prop-cells - Validation Results
// The value-level outcome of a validation pass and its failure modes
// ============================================================================

use thiserror::Error;

// =============================================================================
// VALIDATION RESULT
// =============================================================================

/// Outcome of validating a value: valid, or invalid with ordered messages.
///
/// An `Invalid` result is an ordinary value, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidationResult {
    #[default]
    Valid,
    Invalid(Vec<String>),
}

impl ValidationResult {
    /// An invalid result carrying `errors` in order.
    ///
    /// # Example
    ///
    /// ```
    /// use prop_cells::ValidationResult;
    ///
    /// let result = ValidationResult::invalid(["too short", "no digits"]);
    /// assert!(!result.is_valid());
    /// assert_eq!(result.errors(), ["too short", "no digits"]);
    /// ```
    pub fn invalid<S: Into<String>>(errors: impl IntoIterator<Item = S>) -> Self {
        Self::Invalid(errors.into_iter().map(Into::into).collect())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Error messages; empty for `Valid`.
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid(errors) => errors,
        }
    }

    /// Combine two results. Valid only if both are; otherwise the messages of
    /// `self` followed by those of `other`.
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Valid, Self::Valid) => Self::Valid,
            (Self::Valid, invalid) | (invalid, Self::Valid) => invalid,
            (Self::Invalid(mut errors), Self::Invalid(more)) => {
                errors.extend(more);
                Self::Invalid(errors)
            }
        }
    }
}

impl FromIterator<ValidationResult> for ValidationResult {
    fn from_iter<I: IntoIterator<Item = ValidationResult>>(iter: I) -> Self {
        iter.into_iter().fold(Self::Valid, Self::and)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// A validator that could not produce a result (for example, a remote check
/// that failed to complete).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidatorFailure {
    message: String,
}

impl ValidatorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ValidatorFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ValidatorFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Why a validation pass produced no [`ValidationResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A validator failed; the pass fails as a whole.
    #[error("validator {index} failed: {source}")]
    ValidatorFailed {
        index: usize,
        source: ValidatorFailure,
    },

    /// The value changed (or the property was dropped) before the pass
    /// completed.
    #[error("validation pass cancelled by a newer value")]
    Cancelled,
}

/// What every awaiter of a validation pass receives.
pub type ValidationOutput = Result<ValidationResult, ValidationError>;

/// Fold per-validator outcomes, in validator order, into one pass result.
///
/// The first failing validator fails the whole pass.
pub(crate) fn fold_outcomes(
    outcomes: impl IntoIterator<Item = Result<ValidationResult, ValidatorFailure>>,
) -> ValidationOutput {
    outcomes
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| {
            outcome.map_err(|source| ValidationError::ValidatorFailed { index, source })
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
