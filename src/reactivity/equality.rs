// ============================================================================
// prop-cells - Equality Strategies
// Ready-made `EqualsFn`s for `Property::with_equals`
// ============================================================================
//
// A property without an equality strategy notifies on every `set`. With one,
// a `set` whose value compares equal to the stored value is dropped.
// ============================================================================

/// Strict equality via `PartialEq`.
///
/// # Example
/// ```
/// use prop_cells::{equals, Property, ReadableProperty};
///
/// let p = Property::with_equals(3, equals);
/// assert!(!p.set(3));
/// assert!(p.set(4));
/// ```
pub fn equals<A: PartialEq>(a: &A, b: &A) -> bool {
    a == b
}

/// Equality for f64 that treats NaN as equal to NaN.
///
/// Plain `PartialEq` would report every NaN write as a change.
///
/// # Example
/// ```
/// use prop_cells::reactivity::equality::safe_equals_f64;
///
/// assert!(safe_equals_f64(&f64::NAN, &f64::NAN));
/// assert!(!safe_equals_f64(&f64::NAN, &1.0));
/// assert!(safe_equals_f64(&2.5, &2.5));
/// ```
pub fn safe_equals_f64(a: &f64, b: &f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    a == b
}

/// Same as [`safe_equals_f64`] for f32.
pub fn safe_equals_f32(a: &f32, b: &f32) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    a == b
}

/// Never equal: every `set` notifies. Equivalent to having no strategy.
pub fn never_equals<A>(_a: &A, _b: &A) -> bool {
    false
}
