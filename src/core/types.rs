// ============================================================================
// prop-cells - Type Definitions
// Type-erased traits and shared aliases for the property graph
// ============================================================================

use std::rc::Rc;

use super::id::PropertyId;

// =============================================================================
// TYPE-ERASED PROPERTY
// =============================================================================
//
// Graph operations (propagating a change upward, counting listeners) don't
// need the value type. Parent pointers are stored as Rc<dyn AnyProperty> so a
// property of one type can hang below a property of another.
// =============================================================================

/// Type-erased view of a property, used for parent pointers and diagnostics.
pub trait AnyProperty {
    /// The property's stable identity.
    fn id(&self) -> PropertyId;

    /// Drop the cached validation, schedule a listener flush and propagate
    /// the change to the parent chain.
    fn value_changed(&self);

    /// Persistent listeners plus pending one-time listeners.
    fn listeners_count(&self) -> usize;

    /// The parent this property reports changes to, if any.
    fn parent(&self) -> Option<Rc<dyn AnyProperty>>;
}

// =============================================================================
// ALIASES
// =============================================================================

/// Equality strategy used by [`Property::with_equals`](crate::Property::with_equals).
pub type EqualsFn<A> = fn(&A, &A) -> bool;

/// A value listener. Shared so a flush can snapshot the registry cheaply.
pub type Callback<A> = Rc<dyn Fn(&A)>;

/// Walk the parent chain of `property`, nearest ancestor first.
pub fn ancestors(property: &dyn AnyProperty) -> Vec<PropertyId> {
    let mut ids = Vec::new();
    let mut next = property.parent();
    while let Some(parent) = next {
        ids.push(parent.id());
        next = parent.parent();
    }
    ids
}
