// ============================================================================
// prop-cells - Batching
// Thread-default shortcuts for grouping mutations into one flush
// ============================================================================

use std::rc::Rc;

use crate::reactivity::scheduling::Sequencer;

// =============================================================================
// BATCH
// =============================================================================

/// Group mutations on the thread's default sequencer into a single flush.
///
/// Repeated writes to one property inside the batch coalesce: its listeners
/// run once, with the last value written.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use prop_cells::{batch, Property, ReadableProperty};
///
/// let a = Property::new(1);
/// let b = Property::new(2);
/// let sum = a.combine(&b, |a, b| a + b);
///
/// let runs = Rc::new(Cell::new(0));
/// let counter = runs.clone();
/// let _registration = sum.listen(move |_| counter.set(counter.get() + 1), false);
///
/// batch(|| {
///     a.set(10);
///     a.set(20);
///     b.set(30);
/// });
///
/// assert_eq!(sum.get(), 50);
/// // One recompute per source, and `sum`'s own notifications coalesce
/// assert_eq!(runs.get(), 1);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Sequencer::current().batch(f)
}

/// Drain the thread's default sequencer.
///
/// With the default automatic sequencer the queue is already empty whenever
/// a mutation returns, so this only matters inside an open batch.
pub fn flush() {
    Sequencer::current().flush();
}

/// The thread's default sequencer.
pub fn current_sequencer() -> Rc<Sequencer> {
    Sequencer::current()
}

/// Check if the default sequencer is inside a batch.
///
/// # Example
///
/// ```
/// use prop_cells::{batch, is_batching};
///
/// assert!(!is_batching());
///
/// batch(|| {
///     assert!(is_batching());
/// });
///
/// assert!(!is_batching());
/// ```
pub fn is_batching() -> bool {
    Sequencer::current().is_batching()
}

// =============================================================================
// TESTS
// =============================================================================
