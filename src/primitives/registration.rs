// ============================================================================
// prop-cells - Registrations
// Cancellable, restartable subscription handles
// ============================================================================

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::core::id::ListenerId;
use crate::core::types::Callback;
use crate::primitives::property::{OnceListener, PropertyInner};

// =============================================================================
// REGISTRATION
// =============================================================================

/// The operations behind a [`Registration`].
pub trait RegistrationOps {
    /// Detach the subscription. Idempotent.
    fn cancel(&self);

    /// Re-attach a cancelled subscription. Past values are not replayed.
    fn restart(&self);

    fn is_active(&self) -> bool;
}

/// Handle returned by every subscribe operation.
///
/// Clones share the same subscription. Dropping a handle does not cancel it.
#[derive(Clone)]
pub struct Registration {
    ops: Rc<dyn RegistrationOps>,
}

impl Registration {
    pub fn new(ops: Rc<dyn RegistrationOps>) -> Self {
        Self { ops }
    }

    /// One handle controlling several subscriptions at once.
    pub fn combined(registrations: Vec<Registration>) -> Self {
        Self::new(Rc::new(CombinedRegistration { registrations }))
    }

    pub fn cancel(&self) {
        self.ops.cancel();
    }

    pub fn restart(&self) {
        self.ops.restart();
    }

    pub fn is_active(&self) -> bool {
        self.ops.is_active()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.is_active())
            .finish()
    }
}

struct CombinedRegistration {
    registrations: Vec<Registration>,
}

impl RegistrationOps for CombinedRegistration {
    fn cancel(&self) {
        for registration in &self.registrations {
            registration.cancel();
        }
    }

    fn restart(&self) {
        for registration in &self.registrations {
            registration.restart();
        }
    }

    fn is_active(&self) -> bool {
        self.registrations.iter().any(Registration::is_active)
    }
}

// =============================================================================
// LISTENER REGISTRATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerKind {
    Persistent,
    Once,
}

/// A value listener attached to one property's registry.
pub(crate) struct ListenerRegistration<A> {
    target: Weak<PropertyInner<A>>,
    callback: Callback<A>,
    kind: ListenerKind,
    /// Registry slot while attached
    slot: Cell<Option<ListenerId>>,
    /// Set once a one-time listener has been delivered
    fired: Cell<bool>,
    self_weak: Weak<ListenerRegistration<A>>,
}

impl<A: Clone + 'static> ListenerRegistration<A> {
    pub(crate) fn new(
        target: Weak<PropertyInner<A>>,
        callback: Callback<A>,
        kind: ListenerKind,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_weak| Self {
            target,
            callback,
            kind,
            slot: Cell::new(None),
            fired: Cell::new(false),
            self_weak: self_weak.clone(),
        })
    }

    /// Append the callback to the target's registry (at the end).
    pub(crate) fn activate(&self) {
        if self.slot.get().is_some() || self.fired.get() {
            return;
        }
        let Some(target) = self.target.upgrade() else {
            return;
        };

        let id = target.listener_ids.next();
        match self.kind {
            ListenerKind::Persistent => {
                target.listeners.borrow_mut().insert(id, self.callback.clone());
            }
            ListenerKind::Once => {
                target.once_listeners.borrow_mut().insert(
                    id,
                    OnceListener {
                        callback: self.callback.clone(),
                        registration: self.self_weak.clone(),
                    },
                );
            }
        }
        self.slot.set(Some(id));
    }

    /// Called by the flush after a one-time callback ran. The flush already
    /// took the entry out of the registry.
    pub(crate) fn mark_fired(&self) {
        self.fired.set(true);
        self.slot.set(None);
    }
}

impl<A: Clone + 'static> RegistrationOps for ListenerRegistration<A> {
    fn cancel(&self) {
        let Some(id) = self.slot.take() else {
            return;
        };
        let Some(target) = self.target.upgrade() else {
            return;
        };

        // Removed callbacks may own property handles whose drop cancels other
        // registrations on this same target, so drop them with no borrow held.
        match self.kind {
            ListenerKind::Persistent => {
                let removed = target.listeners.borrow_mut().remove(&id);
                drop(removed);
            }
            ListenerKind::Once => {
                let removed = target.once_listeners.borrow_mut().remove(&id);
                drop(removed);
            }
        }
    }

    fn restart(&self) {
        self.activate();
    }

    fn is_active(&self) -> bool {
        self.slot.get().is_some() && self.target.strong_count() > 0
    }
}

// =============================================================================
// TESTS
// =============================================================================
