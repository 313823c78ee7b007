// ============================================================================
// prop-cells - Identities
// Process-unique property ids and per-property listener tokens
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// PROPERTY ID
// =============================================================================

static NEXT_PROPERTY_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a property, stable for the property's lifetime.
///
/// Ids are allocated from a process-wide counter, so no two properties ever
/// share one (even across threads). The scheduler uses them as coalescing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(u64);

impl PropertyId {
    /// Allocate a fresh id.
    pub(crate) fn next() -> Self {
        Self(NEXT_PROPERTY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// LISTENER ID
// =============================================================================

/// Token for one entry in a property's listener or validator registry.
///
/// Tokens are handed out in increasing order, so an ordered map keyed by them
/// iterates in subscription order and removal never reorders survivors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ListenerId(u64);

/// Monotonic source of [`ListenerId`]s, one per property.
#[derive(Debug, Default)]
pub(crate) struct ListenerIds {
    next: std::cell::Cell<u64>,
}

impl ListenerIds {
    pub(crate) fn next(&self) -> ListenerId {
        let id = self.next.get();
        self.next.set(id + 1);
        ListenerId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_ids_are_unique() {
        let a = PropertyId::next();
        let b = PropertyId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn property_id_display() {
        let id = PropertyId(7);
        assert_eq!(id.to_string(), "#7");
    }

    #[test]
    fn listener_ids_increase() {
        let ids = ListenerIds::default();
        let first = ids.next();
        let second = ids.next();
        assert!(first < second);
    }
}
