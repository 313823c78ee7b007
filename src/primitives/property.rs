// ============================================================================
// prop-cells - Property Primitive
// The mutable observable value cell and its read-only view
// ============================================================================
//
// A property owns its value, two listener registries (persistent and
// one-time) and an optional parent pointer. `set` stores the value and calls
// `value_changed`, which:
//   1. drops the cached validation result,
//   2. schedules a listener flush keyed by the property's id,
//   3. forwards the change to the parent, recursively.
//
// Listeners never run inline. The scheduled flush reads the value at flush
// time, snapshots both registries, clears the one-time registry and only
// then invokes the snapshot. Subscriptions made or cancelled by a running
// callback therefore never affect the flush in progress.
// ============================================================================

use std::cell::{OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::error;

use crate::core::id::{ListenerId, ListenerIds, PropertyId};
use crate::core::types::{AnyProperty, Callback, EqualsFn};
use crate::primitives::derived::{combine, stream_to, transform};
use crate::primitives::registration::{ListenerKind, ListenerRegistration, Registration};
use crate::primitives::seq::{transform_to_seq, ReadOnlySeqProperty};
use crate::reactivity::scheduling::{Sequencer, TaskKey};
use crate::validation::engine::{PendingValidation, ValidationHandle, ValidationState};
use crate::validation::result::ValidationResult;
use crate::validation::validator::Validator;

// =============================================================================
// PROPERTY INNER
// =============================================================================

/// A one-time listener waiting for its single flush.
pub(crate) struct OnceListener<A> {
    pub(crate) callback: Callback<A>,
    pub(crate) registration: Weak<ListenerRegistration<A>>,
}

/// A subscription owned by a derived property, plus the source it keeps
/// alive so intermediate links of a derivation chain are not dropped.
struct Upstream {
    registration: Registration,
    _source: Option<Rc<dyn AnyProperty>>,
}

/// Shared state behind [`Property`] and [`ReadOnlyProperty`] handles.
pub struct PropertyInner<A> {
    pub(crate) id: PropertyId,
    pub(crate) sequencer: Rc<Sequencer>,
    pub(crate) value: RefCell<A>,
    equals: Option<EqualsFn<A>>,
    parent: Option<Rc<dyn AnyProperty>>,

    pub(crate) listener_ids: ListenerIds,
    pub(crate) listeners: RefCell<BTreeMap<ListenerId, Callback<A>>>,
    pub(crate) once_listeners: RefCell<BTreeMap<ListenerId, OnceListener<A>>>,

    pub(crate) validators: RefCell<BTreeMap<ListenerId, Rc<dyn Validator<A>>>>,
    pub(crate) validation: RefCell<Option<PendingValidation>>,
    pub(crate) validation_epoch: std::cell::Cell<u64>,
    pub(crate) validity: OnceCell<Rc<PropertyInner<ValidationResult>>>,

    /// Subscriptions this property holds on its sources (derived properties)
    upstream: RefCell<Vec<Upstream>>,

    pub(crate) self_weak: Weak<PropertyInner<A>>,
}

impl<A: Clone + 'static> PropertyInner<A> {
    pub(crate) fn new(
        sequencer: &Rc<Sequencer>,
        value: A,
        equals: Option<EqualsFn<A>>,
        parent: Option<Rc<dyn AnyProperty>>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_weak| Self {
            id: PropertyId::next(),
            sequencer: sequencer.clone(),
            value: RefCell::new(value),
            equals,
            parent,
            listener_ids: ListenerIds::default(),
            listeners: RefCell::new(BTreeMap::new()),
            once_listeners: RefCell::new(BTreeMap::new()),
            validators: RefCell::new(BTreeMap::new()),
            validation: RefCell::new(None),
            validation_epoch: std::cell::Cell::new(0),
            validity: OnceCell::new(),
            upstream: RefCell::new(Vec::new()),
            self_weak: self_weak.clone(),
        })
    }

    pub fn get(&self) -> A {
        self.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Store `value` and announce the change. Returns false when the equality
    /// strategy considers the value unchanged.
    pub(crate) fn set(&self, value: A) -> bool {
        if let Some(equals) = self.equals {
            if equals(&self.value.borrow(), &value) {
                return false;
            }
        }

        self.sequencer.batch(|| {
            let previous = self.value.replace(value);
            drop(previous);
            self.value_changed();
        });
        true
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut A)) {
        self.sequencer.batch(|| {
            f(&mut self.value.borrow_mut());
            self.value_changed();
        });
    }

    /// Register a listener and hand back its registration.
    pub(crate) fn listen(&self, callback: Callback<A>, init_update: bool) -> Registration {
        let registration =
            ListenerRegistration::new(self.self_weak.clone(), callback.clone(), ListenerKind::Persistent);
        registration.activate();

        if init_update {
            let value = self.get();
            callback(&value);
        }

        Registration::new(registration)
    }

    pub(crate) fn listen_once(&self, callback: Callback<A>) -> Registration {
        let registration =
            ListenerRegistration::new(self.self_weak.clone(), callback, ListenerKind::Once);
        registration.activate();
        Registration::new(registration)
    }

    /// Keep `registration` (and optionally its source) alive for as long as
    /// this property lives, and cancel it when the property is dropped.
    pub(crate) fn add_upstream(
        &self,
        registration: Registration,
        source: Option<Rc<dyn AnyProperty>>,
    ) {
        self.upstream.borrow_mut().push(Upstream {
            registration,
            _source: source,
        });
    }

    /// The flush task body: deliver the current value to a snapshot of the
    /// registries.
    fn fire_value_listeners(&self) {
        self.refresh_validity();

        let value = self.get();
        let listeners: Vec<Callback<A>> = self.listeners.borrow().values().cloned().collect();
        let once: Vec<OnceListener<A>> = std::mem::take(&mut *self.once_listeners.borrow_mut())
            .into_values()
            .collect();

        for callback in &listeners {
            self.run_listener(callback, &value);
        }

        for listener in once {
            self.run_listener(&listener.callback, &value);
            if let Some(registration) = listener.registration.upgrade() {
                registration.mark_fired();
            }
        }
    }

    fn run_listener(&self, callback: &Callback<A>, value: &A) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(value))) {
            error!(
                property = %self.id,
                panic = panic_message(&panic),
                "listener panicked; continuing with the remaining listeners"
            );
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

impl<A: Clone + 'static> AnyProperty for PropertyInner<A> {
    fn id(&self) -> PropertyId {
        self.id
    }

    fn value_changed(&self) {
        self.invalidate_validation();

        let weak = self.self_weak.clone();
        self.sequencer.batch(|| {
            self.sequencer.enqueue(TaskKey::listeners(self.id), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_value_listeners();
                }
            });

            if let Some(parent) = &self.parent {
                parent.value_changed();
            }
        });
    }

    fn listeners_count(&self) -> usize {
        self.listeners.borrow().len() + self.once_listeners.borrow().len()
    }

    fn parent(&self) -> Option<Rc<dyn AnyProperty>> {
        self.parent.clone()
    }
}

impl<A> Drop for PropertyInner<A> {
    fn drop(&mut self) {
        for upstream in self.upstream.get_mut().drain(..) {
            upstream.registration.cancel();
        }
        if let Some(pending) = self.validation.get_mut().take() {
            pending.abort();
        }
    }
}

// =============================================================================
// READABLE PROPERTY - shared read API
// =============================================================================

/// Read, subscribe and derive: everything both property handles support.
///
/// # Example
///
/// ```
/// use prop_cells::{Property, ReadableProperty};
///
/// let celsius = Property::new(20.0);
/// let fahrenheit = celsius.transform(|c| c * 9.0 / 5.0 + 32.0);
///
/// celsius.set(100.0);
/// assert_eq!(fahrenheit.get(), 212.0);
/// ```
pub trait ReadableProperty<A: Clone + 'static> {
    /// The shared cell behind this handle (for advanced use).
    fn inner(&self) -> &Rc<PropertyInner<A>>;

    fn id(&self) -> PropertyId {
        self.inner().id
    }

    /// The sequencer that schedules this property's notifications.
    fn sequencer(&self) -> &Rc<Sequencer> {
        &self.inner().sequencer
    }

    /// The current value. Always reflects the latest committed `set`, even
    /// before listeners have been flushed.
    fn get(&self) -> A {
        self.inner().get()
    }

    /// Read the current value without cloning it.
    fn with<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        self.inner().with(f)
    }

    /// Subscribe to value changes.
    ///
    /// With `init_update` the callback also runs immediately with the current
    /// value; that call is not deduplicated against a pending flush.
    fn listen(&self, callback: impl Fn(&A) + 'static, init_update: bool) -> Registration {
        self.inner().listen(Rc::new(callback), init_update)
    }

    /// Subscribe for the next flush only. The registration cancels itself
    /// after the callback runs.
    fn listen_once(&self, callback: impl Fn(&A) + 'static) -> Registration {
        self.inner().listen_once(Rc::new(callback))
    }

    /// Persistent listeners plus pending one-time listeners. The validity
    /// property's refresh is not a listener and is never counted.
    fn listeners_count(&self) -> usize {
        self.inner().listeners_count()
    }

    /// The cached validation result, or a fresh pass when nothing is cached.
    fn is_valid(&self) -> ValidationHandle {
        self.inner().is_valid()
    }

    /// Start a new validation pass, discarding any cached result.
    fn validate(&self) -> ValidationHandle {
        self.inner().validate()
    }

    fn validation_state(&self) -> ValidationState {
        self.inner().validation_state()
    }

    /// Read-only property holding the result of the latest completed
    /// validation pass. Every change of this property triggers a new pass.
    fn valid(&self) -> ReadOnlyProperty<ValidationResult> {
        ReadOnlyProperty::from_inner(self.inner().valid())
    }

    /// Derived property whose value is always `f(self.get())`.
    fn transform<B: Clone + 'static>(&self, f: impl Fn(&A) -> B + 'static) -> ReadOnlyProperty<B> {
        transform(self.inner(), f)
    }

    /// Sequence-valued variant of [`transform`](Self::transform) with
    /// element-level change notifications.
    fn transform_to_seq<B: Clone + PartialEq + 'static>(
        &self,
        f: impl Fn(&A) -> Vec<B> + 'static,
    ) -> ReadOnlySeqProperty<B> {
        transform_to_seq(self.inner(), f)
    }

    /// Derived property computed from this property and `other`.
    ///
    /// Each input has its own subscription: when both change in the same
    /// turn the combiner runs twice.
    fn combine<B: Clone + 'static, O: Clone + 'static>(
        &self,
        other: &impl ReadableProperty<B>,
        combiner: impl Fn(&A, &B) -> O + 'static,
    ) -> ReadOnlyProperty<O> {
        combine(self.inner(), other.inner(), None, combiner)
    }

    /// [`combine`](Self::combine) with a parent for the output property.
    fn combine_with_parent<B: Clone + 'static, O: Clone + 'static>(
        &self,
        other: &impl ReadableProperty<B>,
        parent: Rc<dyn AnyProperty>,
        combiner: impl Fn(&A, &B) -> O + 'static,
    ) -> ReadOnlyProperty<O> {
        combine(self.inner(), other.inner(), Some(parent), combiner)
    }

    /// Forward every change into an independent `target`, one way.
    fn stream_to<B: Clone + 'static>(
        &self,
        target: &Property<B>,
        init_update: bool,
        transformer: impl Fn(&A) -> B + 'static,
    ) -> Registration {
        stream_to(self.inner(), target.inner(), init_update, transformer)
    }

    /// Type-erased handle, usable as another property's parent.
    fn as_any_property(&self) -> Rc<dyn AnyProperty> {
        self.inner().clone()
    }
}

// =============================================================================
// PROPERTY<A> - the writable handle
// =============================================================================

/// Options for [`Property::with_options`].
pub struct PropertyOptions<A> {
    /// Sequencer for notifications; the thread default when `None`
    pub sequencer: Option<Rc<Sequencer>>,
    /// Property notified whenever this one changes
    pub parent: Option<Rc<dyn AnyProperty>>,
    /// Suppress writes that compare equal to the stored value
    pub equals: Option<EqualsFn<A>>,
}

impl<A> Default for PropertyOptions<A> {
    fn default() -> Self {
        Self {
            sequencer: None,
            parent: None,
            equals: None,
        }
    }
}

/// A mutable observable value cell.
///
/// Handles are cheap to clone and share one cell.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use prop_cells::{Property, ReadableProperty};
///
/// let count = Property::new(0);
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let sink = seen.clone();
/// let registration = count.listen(move |v| sink.borrow_mut().push(*v), false);
///
/// count.set(1);
/// registration.cancel();
/// count.set(2);
///
/// assert_eq!(*seen.borrow(), vec![1]);
/// ```
pub struct Property<A> {
    inner: Rc<PropertyInner<A>>,
}

impl<A> Clone for Property<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Clone + 'static> Property<A> {
    /// Create a root property on the thread's default sequencer.
    pub fn new(value: A) -> Self {
        Self::with_options(value, PropertyOptions::default())
    }

    /// Create a root property on an explicit sequencer.
    pub fn new_in(sequencer: &Rc<Sequencer>, value: A) -> Self {
        Self::with_options(
            value,
            PropertyOptions {
                sequencer: Some(sequencer.clone()),
                ..PropertyOptions::default()
            },
        )
    }

    /// Create a property whose changes also invalidate and notify `parent`.
    pub fn with_parent(value: A, parent: Rc<dyn AnyProperty>) -> Self {
        Self::with_options(
            value,
            PropertyOptions {
                parent: Some(parent),
                ..PropertyOptions::default()
            },
        )
    }

    /// Create a property that ignores writes equal to the stored value.
    pub fn with_equals(value: A, equals: EqualsFn<A>) -> Self {
        Self::with_options(
            value,
            PropertyOptions {
                equals: Some(equals),
                ..PropertyOptions::default()
            },
        )
    }

    pub fn with_options(value: A, options: PropertyOptions<A>) -> Self {
        let sequencer = options.sequencer.unwrap_or_else(Sequencer::current);
        Self {
            inner: PropertyInner::new(&sequencer, value, options.equals, options.parent),
        }
    }

    /// Store `value` and notify listeners, validation and ancestors.
    ///
    /// Returns false only when an equality strategy rejected the write.
    pub fn set(&self, value: A) -> bool {
        self.inner.set(value)
    }

    /// Mutate the value in place, then notify.
    ///
    /// The value is borrowed mutably while `f` runs, so `f` must not read
    /// this property.
    pub fn update(&self, f: impl FnOnce(&mut A)) {
        self.inner.update(f);
    }

    /// Announce a change without writing a new value.
    pub fn touch(&self) {
        self.inner.sequencer.batch(|| self.inner.value_changed());
    }

    /// Append a validator. Cancelling the registration removes it again;
    /// both drop the cached validation result.
    pub fn add_validator(&self, validator: impl Validator<A> + 'static) -> Registration {
        self.inner.add_validator(Rc::new(validator))
    }

    pub fn clear_validators(&self) {
        self.inner.clear_validators();
    }

    /// A read-only view of the same cell.
    pub fn read_only(&self) -> ReadOnlyProperty<A> {
        ReadOnlyProperty::from_inner(self.inner.clone())
    }
}

impl<A: Clone + 'static> ReadableProperty<A> for Property<A> {
    fn inner(&self) -> &Rc<PropertyInner<A>> {
        &self.inner
    }
}

impl<A: Clone + Default + 'static> Default for Property<A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A: fmt::Debug + Clone + 'static> fmt::Debug for Property<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Create a property on the thread's default sequencer.
///
/// # Example
///
/// ```
/// use prop_cells::{property, ReadableProperty};
///
/// let name = property(String::from("ada"));
/// name.set(String::from("grace"));
/// assert_eq!(name.get(), "grace");
/// ```
pub fn property<A: Clone + 'static>(value: A) -> Property<A> {
    Property::new(value)
}

// =============================================================================
// READ-ONLY PROPERTY
// =============================================================================

/// A property handle without `set`. Derived properties are handed out as
/// read-only views.
pub struct ReadOnlyProperty<A> {
    inner: Rc<PropertyInner<A>>,
}

impl<A> Clone for ReadOnlyProperty<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Clone + 'static> ReadOnlyProperty<A> {
    pub(crate) fn from_inner(inner: Rc<PropertyInner<A>>) -> Self {
        Self { inner }
    }
}

impl<A: Clone + 'static> ReadableProperty<A> for ReadOnlyProperty<A> {
    fn inner(&self) -> &Rc<PropertyInner<A>> {
        &self.inner
    }
}

impl<A: fmt::Debug + Clone + 'static> fmt::Debug for ReadOnlyProperty<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyProperty")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
