// ============================================================================
// prop-cells - Derived Properties
// Read-only views computed from source properties
// ============================================================================
//
// A derived property is an ordinary property whose only writer is a listener
// on its source(s). The listener holds the output weakly; the output holds
// its sources and the registrations, and cancels them when dropped. No
// dependency tracking: a derived value is recomputed exactly when a source
// flush delivers a new value.
// ============================================================================

use std::rc::Rc;

use crate::core::types::AnyProperty;
use crate::primitives::property::{PropertyInner, ReadOnlyProperty};
use crate::primitives::registration::{Registration, RegistrationOps};

// =============================================================================
// TRANSFORM
// =============================================================================

/// Build a read-only property holding `f(source)`, seeded immediately.
pub(crate) fn transform<A, B>(
    source: &Rc<PropertyInner<A>>,
    f: impl Fn(&A) -> B + 'static,
) -> ReadOnlyProperty<B>
where
    A: Clone + 'static,
    B: Clone + 'static,
{
    let output = PropertyInner::new(&source.sequencer, source.with(&f), None, None);

    let target = Rc::downgrade(&output);
    let registration = source.listen(
        Rc::new(move |value: &A| {
            if let Some(output) = target.upgrade() {
                output.set(f(value));
            }
        }),
        false,
    );
    output.add_upstream(registration, Some(source.clone()));

    ReadOnlyProperty::from_inner(output)
}

// =============================================================================
// COMBINE
// =============================================================================

/// Build a read-only property holding `combiner(source, other)`.
///
/// Each input is observed independently; a change on one side recomputes
/// with the other side's current value.
pub(crate) fn combine<A, B, O>(
    source: &Rc<PropertyInner<A>>,
    other: &Rc<PropertyInner<B>>,
    parent: Option<Rc<dyn AnyProperty>>,
    combiner: impl Fn(&A, &B) -> O + 'static,
) -> ReadOnlyProperty<O>
where
    A: Clone + 'static,
    B: Clone + 'static,
    O: Clone + 'static,
{
    let combiner = Rc::new(combiner);
    let initial = source.with(|a| other.with(|b| combiner(a, b)));
    let output = PropertyInner::new(&source.sequencer, initial, None, parent);

    let from_source = {
        let target = Rc::downgrade(&output);
        let other = other.clone();
        let combiner = combiner.clone();
        source.listen(
            Rc::new(move |a: &A| {
                if let Some(output) = target.upgrade() {
                    output.set(other.with(|b| combiner(a, b)));
                }
            }),
            false,
        )
    };

    let from_other = {
        let target = Rc::downgrade(&output);
        let source = source.clone();
        other.listen(
            Rc::new(move |b: &B| {
                if let Some(output) = target.upgrade() {
                    output.set(source.with(|a| combiner(a, b)));
                }
            }),
            false,
        )
    };

    output.add_upstream(from_source, Some(source.clone()));
    output.add_upstream(from_other, Some(other.clone()));

    ReadOnlyProperty::from_inner(output)
}

// =============================================================================
// STREAM TO
// =============================================================================

/// Registration for a one-way forward: restarting re-attaches the listener
/// and forwards the current value once.
struct StreamRegistration {
    listener: Registration,
    forward: Rc<dyn Fn()>,
}

impl RegistrationOps for StreamRegistration {
    fn cancel(&self) {
        self.listener.cancel();
    }

    fn restart(&self) {
        self.listener.restart();
        (self.forward)();
    }

    fn is_active(&self) -> bool {
        self.listener.is_active()
    }
}

/// Forward `transformer(source)` into `target` on every source change.
///
/// `target` stays independently writable; a direct write to it holds only
/// until the next forward.
pub(crate) fn stream_to<A, B>(
    source: &Rc<PropertyInner<A>>,
    target: &Rc<PropertyInner<B>>,
    init_update: bool,
    transformer: impl Fn(&A) -> B + 'static,
) -> Registration
where
    A: Clone + 'static,
    B: Clone + 'static,
{
    let transformer = Rc::new(transformer);

    let listener = {
        let target = target.clone();
        let transformer = transformer.clone();
        source.listen(
            Rc::new(move |value: &A| {
                target.set(transformer(value));
            }),
            false,
        )
    };

    let forward: Rc<dyn Fn()> = {
        let source = Rc::downgrade(source);
        let target = target.clone();
        Rc::new(move || {
            if let Some(source) = source.upgrade() {
                target.set(source.with(|value| transformer(value)));
            }
        })
    };

    if init_update {
        forward();
    }

    Registration::new(Rc::new(StreamRegistration { listener, forward }))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Property, ReadableProperty, Sequencer, SequencerConfig};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorded<A: Clone + 'static>(p: &impl ReadableProperty<A>) -> Rc<RefCell<Vec<A>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        // Dropping the handle keeps the listener attached
        drop(p.listen(move |v: &A| sink.borrow_mut().push(v.clone()), false));
        log
    }

    #[test]
    fn transform_seeds_and_follows() {
        let p = Property::new(2);
        let squared = p.transform(|v| v * v);
        assert_eq!(squared.get(), 4);

        p.set(3);
        assert_eq!(squared.get(), 9);
    }

    #[test]
    fn transform_chain_matches_composition() {
        let p = Property::new(1);
        let chained = p.transform(|v| v + 1).transform(|v| v * 10);
        let composed = p.transform(|v| (v + 1) * 10);
        let chained_log = recorded(&chained);
        let composed_log = recorded(&composed);

        for v in [5, 6, 6, -3] {
            p.set(v);
        }

        assert_eq!(*chained_log.borrow(), *composed_log.borrow());
        assert_eq!(*chained_log.borrow(), vec![60, 70, 70, -20]);
    }

    #[test]
    fn combine_tracks_both_inputs() {
        let a = Property::new(1);
        let b = Property::new(String::from("x"));
        let joined = a.combine(&b, |a, b| format!("{b}{a}"));
        assert_eq!(joined.get(), "x1");

        a.set(2);
        assert_eq!(joined.get(), "x2");

        b.set(String::from("y"));
        assert_eq!(joined.get(), "y2");
    }

    #[test]
    fn combine_recomputes_once_per_input_change() {
        let sequencer = Rc::new(Sequencer::new(SequencerConfig::manual()));
        let a = Property::new_in(&sequencer, 1);
        let b = Property::new_in(&sequencer, 10);

        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = calls.clone();
        let sum = a.combine(&b, move |a, b| {
            counter.set(counter.get() + 1);
            a + b
        });
        assert_eq!(calls.get(), 1);

        a.set(2);
        b.set(20);
        sequencer.flush();

        // No deduplication between the two input subscriptions
        assert_eq!(calls.get(), 3);
        assert_eq!(sum.get(), 22);
    }

    #[test]
    fn combine_with_parent_notifies_parent() {
        let form = Property::new(());
        let a = Property::new(1);
        let b = Property::new(2);
        let _sum = a.combine_with_parent(&b, form.as_any_property(), |a, b| a + b);
        let form_log = recorded(&form);

        a.set(5);

        assert_eq!(form_log.borrow().len(), 1);
    }

    #[test]
    fn stream_to_forwards_one_way() {
        let source = Property::new(1);
        let target = Property::new(0);

        let _registration = source.stream_to(&target, true, |v| v * 10);
        assert_eq!(target.get(), 10);

        target.set(999);
        assert_eq!(source.get(), 1);

        source.set(2);
        assert_eq!(target.get(), 20);
    }

    #[test]
    fn stream_to_without_init_waits_for_change() {
        let source = Property::new(1);
        let target = Property::new(0);

        let _registration = source.stream_to(&target, false, |v| v + 1);
        assert_eq!(target.get(), 0);

        source.set(4);
        assert_eq!(target.get(), 5);
    }

    #[test]
    fn stream_restart_forwards_current_value() {
        let source = Property::new(1);
        let target = Property::new(0);
        let registration = source.stream_to(&target, true, |v| *v);

        registration.cancel();
        source.set(7);
        assert_eq!(target.get(), 1);

        registration.restart();
        assert_eq!(target.get(), 7);
        assert!(registration.is_active());

        source.set(8);
        assert_eq!(target.get(), 8);
    }

    #[test]
    fn derived_is_read_only_but_listenable() {
        let p = Property::new(1);
        let doubled = p.transform(|v| v * 2);
        let log = recorded(&doubled);

        p.set(2);
        p.set(3);

        assert_eq!(*log.borrow(), vec![4, 6]);
    }
}
