// ============================================================================
// prop-cells - Ergonomic Macros
// ============================================================================

/// Clone variables into a move closure.
///
/// Listener and transform closures must be `'static`, so any property handle
/// they use has to be cloned in first.
///
/// # Usage
///
/// ```rust
/// use prop_cells::{cloned, Property, ReadableProperty};
///
/// let a = Property::new(1);
/// let b = Property::new(2);
///
/// let _registration = a.listen(cloned!(b => move |v| { b.set(*v * 2); }), false);
/// a.set(5);
/// assert_eq!(b.get(), 10);
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}

/// Subscribe to a property with automatic variable capturing.
///
/// Wraps `property.listen(cloned!(... => move |value| ...), false)`.
///
/// # Usage
///
/// ```rust
/// use prop_cells::{listen, Property, ReadableProperty};
///
/// let first = Property::new(String::from("Ada"));
/// let last = Property::new(String::from("Lovelace"));
/// let full = Property::new(String::new());
///
/// let _registration = listen!(first, last, full => |name| {
///     full.set(format!("{name} {}", last.get()));
/// });
///
/// first.set(String::from("Augusta"));
/// assert_eq!(full.get(), "Augusta Lovelace");
/// ```
#[macro_export]
macro_rules! listen {
    // Case 1: With captures
    ($property:ident, $($deps:ident),+ => |$value:pat_param| $body:expr) => {
        $crate::ReadableProperty::listen(
            &$property,
            $crate::cloned!($($deps),+ => move |$value| $body),
            false,
        )
    };
    // Case 2: No captures
    ($property:ident => |$value:pat_param| $body:expr) => {
        $crate::ReadableProperty::listen(&$property, move |$value| $body, false)
    };
}
