// ============================================================================
// prop-cells - Validation Engine
// Cached, cancellable validation passes driven through the sequencer
// ============================================================================
//
// A pass is a shared future. Every `is_valid()` caller between two value
// changes gets a clone of the same future, so validators run once per value.
//
// Lifecycle of a pass:
//   1. `validate()` creates the shared future and caches it. With validators
//      attached it also enqueues a (property, FireValidation) task.
//   2. The task reads the value at flush time, starts every validator and
//      hands their futures to the pass through a oneshot channel, then polls
//      the pass so synchronous validators resolve without an executor.
//   3. A validator still pending wakes the pass's slot when it can make
//      progress; the slot enqueues another poll on the sequencer.
//   4. A value change drops the cache and aborts the pass. Holders of the old
//      future see `Err(Cancelled)` unless it had already resolved.
//   5. The pass that completes while still current publishes its result to
//      the validity property, if one exists.
//
// A validator that panics, when called or when polled, fails the pass like a
// validator that returned `Err`.
// ============================================================================

use std::any::Any;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use futures::future::{self, join_all, AbortHandle, FutureExt, LocalBoxFuture, Shared, abortable};
use tracing::{debug, error, trace};

use crate::core::id::{ListenerId, PropertyId};
use crate::primitives::property::{panic_message, PropertyInner};
use crate::primitives::registration::{Registration, RegistrationOps};
use crate::reactivity::equality::equals;
use crate::reactivity::scheduling::TaskKey;
use crate::validation::result::{
    fold_outcomes, ValidationError, ValidationOutput, ValidationResult, ValidatorFailure,
};
use crate::validation::validator::{Validator, ValidatorFuture};
use crate::validation::waker::PassSlot;

/// Handle on a validation pass. Await it (or clone it first) to get the
/// pass result; every clone resolves to the same output.
pub type ValidationHandle = Shared<LocalBoxFuture<'static, ValidationOutput>>;

/// Where a property's validation cache stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState {
    /// No pass since the last value change
    Uncached,
    /// A pass exists but has not completed
    Pending,
    Resolved(ValidationOutput),
}

/// The cached pass of one property.
pub(crate) struct PendingValidation {
    handle: ValidationHandle,
    abort: AbortHandle,
    _wakeups: Option<PassSlot>,
}

impl PendingValidation {
    pub(crate) fn abort(self) {
        self.abort.abort();
    }
}

// =============================================================================
// ENGINE
// =============================================================================

impl<A: Clone + 'static> PropertyInner<A> {
    /// Drop the cached pass. Runs synchronously on every value change, before
    /// any listener of that change.
    pub(crate) fn invalidate_validation(&self) {
        self.validation_epoch.set(self.validation_epoch.get() + 1);

        let previous = self.validation.borrow_mut().take();
        if let Some(previous) = previous {
            trace!(property = %self.id, "dropped cached validation");
            previous.abort();
        }
    }

    pub(crate) fn is_valid(&self) -> ValidationHandle {
        let cached = self
            .validation
            .borrow()
            .as_ref()
            .map(|pending| pending.handle.clone());

        match cached {
            Some(handle) => handle,
            None => self.validate(),
        }
    }

    /// Replace the cached pass with a fresh one.
    pub(crate) fn validate(&self) -> ValidationHandle {
        self.invalidate_validation();
        let epoch = self.validation_epoch.get();

        let (pass, sender, wakeups) = if self.validators.borrow().is_empty() {
            let pass = future::ready(Ok(ValidationResult::Valid)).boxed_local();
            (pass, None, None)
        } else {
            let (sender, receiver) = oneshot::channel::<Vec<ValidatorFuture>>();
            let weak = self.self_weak.clone();
            let wakeups = PassSlot::register(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.schedule_poll(epoch);
                }
            });
            let pass = wakeups.drive(
                async move {
                    match receiver.await {
                        Ok(checks) => fold_outcomes(join_all(checks).await),
                        // The scheduled task was superseded before it ran
                        Err(oneshot::Canceled) => Err(ValidationError::Cancelled),
                    }
                }
                .boxed_local(),
            );
            (pass, Some(sender), Some(wakeups))
        };

        let (pass, abort) = abortable(pass);
        let owner = self.self_weak.clone();
        let handle = async move {
            let output = pass.await.unwrap_or(Err(ValidationError::Cancelled));
            if let Some(owner) = owner.upgrade() {
                owner.finish_pass(epoch, &output);
            }
            output
        }
        .boxed_local()
        .shared();

        *self.validation.borrow_mut() = Some(PendingValidation {
            handle: handle.clone(),
            abort,
            _wakeups: wakeups,
        });

        match sender {
            None => {
                // Nothing to run: resolve in place so the state reads Resolved
                let _ = handle.clone().now_or_never();
            }
            Some(sender) => self.schedule_pass(epoch, sender),
        }

        handle
    }

    fn schedule_pass(&self, epoch: u64, sender: oneshot::Sender<Vec<ValidatorFuture>>) {
        let weak = self.self_weak.clone();
        self.sequencer.enqueue(TaskKey::validation(self.id), move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.validation_epoch.get() != epoch {
                trace!(property = %inner.id, "skipped superseded validation pass");
                return;
            }

            let value = inner.get();
            let validators: Vec<Rc<dyn Validator<A>>> =
                inner.validators.borrow().values().cloned().collect();
            debug!(property = %inner.id, validators = validators.len(), "running validation pass");

            let checks = validators
                .iter()
                .map(|validator| start_check(inner.id, &**validator, &value))
                .collect();
            if sender.send(checks).is_ok() {
                inner.poll_pass(epoch);
            }
        });
    }

    /// A pending validator can make progress: poll the pass again.
    fn schedule_poll(&self, epoch: u64) {
        let weak = self.self_weak.clone();
        self.sequencer.enqueue(TaskKey::validation(self.id), move || {
            if let Some(inner) = weak.upgrade() {
                inner.poll_pass(epoch);
            }
        });
    }

    fn poll_pass(&self, epoch: u64) {
        if self.validation_epoch.get() != epoch {
            trace!(property = %self.id, "skipped superseded validation pass");
            return;
        }
        let handle = self
            .validation
            .borrow()
            .as_ref()
            .map(|pending| pending.handle.clone());
        if let Some(handle) = handle {
            let _ = handle.now_or_never();
        }
    }

    fn finish_pass(&self, epoch: u64, output: &ValidationOutput) {
        if self.validation_epoch.get() != epoch {
            return;
        }
        match output {
            Ok(result) => debug!(property = %self.id, valid = result.is_valid(), "validation pass resolved"),
            Err(error) => debug!(property = %self.id, %error, "validation pass failed"),
        }
        self.publish_validity(output);
    }

    pub(crate) fn validation_state(&self) -> ValidationState {
        match self.validation.borrow().as_ref() {
            None => ValidationState::Uncached,
            Some(pending) => match pending.handle.peek() {
                Some(output) => ValidationState::Resolved(output.clone()),
                None => ValidationState::Pending,
            },
        }
    }

    // -------------------------------------------------------------------------
    // Validity property
    // -------------------------------------------------------------------------

    /// The validity property, created on first use.
    pub(crate) fn valid(&self) -> Rc<PropertyInner<ValidationResult>> {
        if let Some(validity) = self.validity.get() {
            return validity.clone();
        }

        let validity = PropertyInner::new(
            &self.sequencer,
            ValidationResult::Valid,
            Some(equals::<ValidationResult>),
            None,
        );

        // Refreshed from this property's listener flush, not through a listener
        let validity = self.validity.get_or_init(|| validity).clone();

        // A pass that resolved before the property existed published nothing
        let handle = self.is_valid();
        if let Some(output) = handle.peek() {
            self.publish_validity(output);
        }

        validity
    }

    /// Start a pass for the validity property, if there is one. Runs at the
    /// head of every listener flush.
    pub(crate) fn refresh_validity(&self) {
        if self.validity.get().is_some() {
            drop(self.is_valid());
        }
    }

    fn publish_validity(&self, output: &ValidationOutput) {
        let Some(validity) = self.validity.get() else {
            return;
        };
        let result = match output {
            Ok(result) => result.clone(),
            Err(ValidationError::Cancelled) => return,
            Err(failure) => ValidationResult::invalid([failure.to_string()]),
        };
        validity.set(result);
    }

    // -------------------------------------------------------------------------
    // Validator registry
    // -------------------------------------------------------------------------

    pub(crate) fn add_validator(&self, validator: Rc<dyn Validator<A>>) -> Registration {
        let registration = Rc::new(ValidatorRegistration {
            target: self.self_weak.clone(),
            validator,
            slot: Cell::new(None),
        });
        registration.restart();
        Registration::new(registration)
    }

    pub(crate) fn clear_validators(&self) {
        let removed = std::mem::take(&mut *self.validators.borrow_mut());
        drop(removed);
        self.validators_changed();
    }

    /// The validator set changed: the cached verdict no longer applies.
    fn validators_changed(&self) {
        self.invalidate_validation();
        self.refresh_validity();
    }
}

/// Start one validator. A panic, at the call or while the check is polled,
/// becomes a [`ValidatorFailure`].
fn start_check<A>(
    property: PropertyId,
    validator: &dyn Validator<A>,
    value: &A,
) -> ValidatorFuture {
    match catch_unwind(AssertUnwindSafe(|| validator.validate(value))) {
        Ok(check) => AssertUnwindSafe(check)
            .catch_unwind()
            .map(move |outcome| outcome.unwrap_or_else(|panic| Err(panicked(property, &panic))))
            .boxed_local(),
        Err(panic) => future::ready(Err(panicked(property, &panic))).boxed_local(),
    }
}

fn panicked(property: PropertyId, panic: &Box<dyn Any + Send>) -> ValidatorFailure {
    let message = panic_message(panic);
    error!(property = %property, panic = message, "validator panicked; failing the pass");
    ValidatorFailure::new(format!("validator panicked: {message}"))
}

// =============================================================================
// VALIDATOR REGISTRATION
// =============================================================================

struct ValidatorRegistration<A> {
    target: Weak<PropertyInner<A>>,
    validator: Rc<dyn Validator<A>>,
    slot: Cell<Option<ListenerId>>,
}

impl<A: Clone + 'static> RegistrationOps for ValidatorRegistration<A> {
    fn cancel(&self) {
        let Some(id) = self.slot.take() else {
            return;
        };
        let Some(target) = self.target.upgrade() else {
            return;
        };

        let removed = target.validators.borrow_mut().remove(&id);
        if removed.is_some() {
            drop(removed);
            target.validators_changed();
        }
    }

    fn restart(&self) {
        if self.is_active() {
            return;
        }
        let Some(target) = self.target.upgrade() else {
            return;
        };

        let id = target.listener_ids.next();
        target
            .validators
            .borrow_mut()
            .insert(id, self.validator.clone());
        self.slot.set(Some(id));
        target.validators_changed();
    }

    /// False after `clear_validators` removed the entry.
    fn is_active(&self) -> bool {
        match (self.slot.get(), self.target.upgrade()) {
            (Some(id), Some(target)) => target.validators.borrow().contains_key(&id),
            _ => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SequencerConfig;
    use crate::reactivity::scheduling::Sequencer;
    use crate::validation::validator::{async_validator, try_validator};
    use crate::{Property, ReadableProperty};
    use futures::executor::block_on;
    use std::cell::RefCell;

    fn positive(value: &i32) -> ValidationResult {
        if *value > 0 {
            ValidationResult::Valid
        } else {
            ValidationResult::invalid(["value > 0"])
        }
    }

    /// A validator that counts its invocations.
    fn counted(calls: &Rc<Cell<u32>>) -> impl Fn(&i32) -> ValidationResult + 'static {
        let calls = calls.clone();
        move |value: &i32| {
            calls.set(calls.get() + 1);
            positive(value)
        }
    }

    /// An async validator whose results are released by hand.
    fn gated(
        gates: &Rc<RefCell<Vec<oneshot::Sender<ValidationResult>>>>,
    ) -> impl Validator<i32> + 'static {
        let gates = gates.clone();
        async_validator(move |_: &i32| {
            let (sender, receiver) = oneshot::channel();
            gates.borrow_mut().push(sender);
            async move { receiver.await.map_err(|_| ValidatorFailure::new("gate dropped")) }
        })
    }

    #[test]
    fn resolves_invalid_then_valid() {
        let p = Property::new(-1);
        p.add_validator(positive);

        assert_eq!(
            block_on(p.is_valid()),
            Ok(ValidationResult::invalid(["value > 0"]))
        );

        p.set(5);
        assert_eq!(block_on(p.is_valid()), Ok(ValidationResult::Valid));
    }

    #[test]
    fn no_validators_is_valid_without_scheduling() {
        let sequencer = Rc::new(Sequencer::new(SequencerConfig::manual()));
        let p = Property::new_in(&sequencer, 0);

        let handle = p.is_valid();

        assert_eq!(sequencer.pending_tasks(), 0);
        assert_eq!(
            p.validation_state(),
            ValidationState::Resolved(Ok(ValidationResult::Valid))
        );
        assert_eq!(block_on(handle), Ok(ValidationResult::Valid));
    }

    #[test]
    fn cached_result_is_reused_until_the_value_changes() {
        let calls = Rc::new(Cell::new(0));
        let p = Property::new(1);
        p.add_validator(counted(&calls));

        let first = block_on(p.is_valid());
        let second = block_on(p.is_valid());
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);

        p.set(2);
        assert_eq!(p.validation_state(), ValidationState::Uncached);

        block_on(p.is_valid());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn validate_forces_a_new_pass() {
        let calls = Rc::new(Cell::new(0));
        let p = Property::new(1);
        p.add_validator(counted(&calls));

        block_on(p.is_valid());
        block_on(p.validate());

        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn state_machine_transitions() {
        let sequencer = Rc::new(Sequencer::new(SequencerConfig::manual()));
        let p = Property::new_in(&sequencer, -3);
        p.add_validator(positive);
        assert_eq!(p.validation_state(), ValidationState::Uncached);

        let _handle = p.is_valid();
        assert_eq!(p.validation_state(), ValidationState::Pending);

        sequencer.flush();
        assert_eq!(
            p.validation_state(),
            ValidationState::Resolved(Ok(ValidationResult::invalid(["value > 0"])))
        );

        p.set(4);
        assert_eq!(p.validation_state(), ValidationState::Uncached);
    }

    #[test]
    fn change_cancels_the_pending_pass() {
        let gates = Rc::new(RefCell::new(Vec::new()));
        let p = Property::new(1);
        p.add_validator(gated(&gates));

        let stale = p.is_valid();
        assert_eq!(p.validation_state(), ValidationState::Pending);

        p.set(2);
        assert_eq!(block_on(stale), Err(ValidationError::Cancelled));

        let fresh = p.is_valid();
        assert_eq!(gates.borrow().len(), 2);

        let gate = gates.borrow_mut().pop();
        if let Some(gate) = gate {
            gate.send(ValidationResult::invalid(["checked 2"])).unwrap();
        }
        assert_eq!(block_on(fresh), Ok(ValidationResult::invalid(["checked 2"])));
    }

    #[test]
    fn listener_sees_a_fresh_pass() {
        let calls = Rc::new(Cell::new(0));
        let p = Property::new(-1);
        p.add_validator(counted(&calls));
        block_on(p.is_valid());

        let from_listener = Rc::new(RefCell::new(None));
        let slot = from_listener.clone();
        let source = p.clone();
        let _registration = p.listen(
            move |_| {
                *slot.borrow_mut() = Some(source.is_valid());
            },
            false,
        );

        p.set(7);

        let handle = from_listener.borrow_mut().take();
        let handle = handle.expect("listener ran");
        assert_eq!(block_on(handle), Ok(ValidationResult::Valid));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn failing_validator_fails_the_pass() {
        let p = Property::new(1);
        p.add_validator(positive);
        p.add_validator(try_validator(|_: &i32| Err(ValidatorFailure::new("offline"))));

        assert_eq!(
            block_on(p.is_valid()),
            Err(ValidationError::ValidatorFailed {
                index: 1,
                source: ValidatorFailure::new("offline"),
            })
        );
    }

    #[test]
    fn errors_concatenate_in_validator_order() {
        let p = Property::new(String::new());
        p.add_validator(|s: &String| {
            if s.is_empty() {
                ValidationResult::invalid(["required"])
            } else {
                ValidationResult::Valid
            }
        });
        p.add_validator(|s: &String| {
            if s.len() < 3 {
                ValidationResult::invalid(["too short"])
            } else {
                ValidationResult::Valid
            }
        });

        assert_eq!(
            block_on(p.is_valid()),
            Ok(ValidationResult::invalid(["required", "too short"]))
        );
    }

    #[test]
    fn valid_property_tracks_passes() {
        let p = Property::new(-1);
        p.add_validator(positive);

        let valid = p.valid();
        assert_eq!(valid.get(), ValidationResult::invalid(["value > 0"]));

        p.set(5);
        assert_eq!(valid.get(), ValidationResult::Valid);

        p.set(-2);
        assert_eq!(valid.get(), ValidationResult::invalid(["value > 0"]));
    }

    #[test]
    fn valid_property_publishes_failures() {
        let p = Property::new(0);
        let valid = p.valid();
        assert!(valid.get().is_valid());

        p.add_validator(try_validator(|_: &i32| Err(ValidatorFailure::new("offline"))));

        assert_eq!(
            valid.get(),
            ValidationResult::invalid(["validator 0 failed: offline"])
        );
    }

    #[test]
    fn valid_property_follows_an_async_pass_without_awaiting() {
        let gates = Rc::new(RefCell::new(Vec::new()));
        let p = Property::new(1);
        p.add_validator(gated(&gates));

        let valid = p.valid();
        assert_eq!(valid.get(), ValidationResult::Valid);
        assert_eq!(p.validation_state(), ValidationState::Pending);

        let gate = gates.borrow_mut().pop().expect("pass started");
        gate.send(ValidationResult::invalid(["bad"])).unwrap();

        assert_eq!(valid.get(), ValidationResult::invalid(["bad"]));
        assert_eq!(
            p.validation_state(),
            ValidationState::Resolved(Ok(ValidationResult::invalid(["bad"])))
        );
    }

    #[test]
    fn async_pass_completing_inside_a_batch_publishes_at_batch_end() {
        let gates = Rc::new(RefCell::new(Vec::new()));
        let p = Property::new(1);
        p.add_validator(gated(&gates));
        let valid = p.valid();

        crate::batch(|| {
            let gate = gates.borrow_mut().pop().expect("pass started");
            gate.send(ValidationResult::invalid(["late"])).unwrap();
            assert_eq!(valid.get(), ValidationResult::Valid);
        });

        assert_eq!(valid.get(), ValidationResult::invalid(["late"]));
    }

    #[test]
    fn panicking_validator_fails_the_pass_without_stalling_the_flush() {
        let p = Property::new(1);
        p.add_validator(|_: &i32| -> ValidationResult { panic!("validator exploded") });
        let q = Property::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _registration = q.listen(move |v| sink.borrow_mut().push(*v), false);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            crate::batch(|| {
                drop(p.is_valid());
                q.set(7);
            })
        }));

        assert!(outcome.is_ok(), "validator panic escaped the batch");
        assert_eq!(*seen.borrow(), vec![7]);
        assert_eq!(p.sequencer().pending_tasks(), 0);
        assert!(matches!(
            block_on(p.is_valid()),
            Err(ValidationError::ValidatorFailed { index: 0, .. })
        ));
    }

    #[test]
    fn validator_panicking_while_polled_fails_the_pass() {
        let p = Property::new(1);
        p.add_validator(positive);
        p.add_validator(async_validator(|value: &i32| {
            let value = *value;
            async move {
                if value > 0 {
                    panic!("lost connection");
                }
                Ok::<_, ValidatorFailure>(ValidationResult::Valid)
            }
        }));

        assert_eq!(
            block_on(p.is_valid()),
            Err(ValidationError::ValidatorFailed {
                index: 1,
                source: ValidatorFailure::new("validator panicked: lost connection"),
            })
        );
    }

    #[test]
    fn validator_registration_round_trip() {
        let p = Property::new(-1);
        let registration = p.add_validator(positive);
        assert!(!block_on(p.is_valid()).unwrap().is_valid());

        registration.cancel();
        assert_eq!(p.validation_state(), ValidationState::Uncached);
        assert_eq!(block_on(p.is_valid()), Ok(ValidationResult::Valid));

        registration.restart();
        assert!(registration.is_active());
        assert!(!block_on(p.is_valid()).unwrap().is_valid());

        p.clear_validators();
        assert!(!registration.is_active());
        assert_eq!(block_on(p.is_valid()), Ok(ValidationResult::Valid));
    }

    #[test]
    fn child_change_invalidates_parent_validation() {
        let calls = Rc::new(Cell::new(0));
        let parent = Property::new(1);
        parent.add_validator(counted(&calls));
        let child = Property::with_parent("x", parent.as_any_property());

        block_on(parent.is_valid());
        child.set("y");

        assert_eq!(parent.validation_state(), ValidationState::Uncached);
        block_on(parent.is_valid());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn dropping_the_property_cancels_its_pass() {
        let gates = Rc::new(RefCell::new(Vec::new()));
        let handle = {
            let p = Property::new(1);
            p.add_validator(gated(&gates));
            p.is_valid()
        };

        assert_eq!(block_on(handle), Err(ValidationError::Cancelled));
    }
}
