// ============================================================================
// prop-cells - Notification Scheduling
// Key-coalescing task queue that defers and batches listener invocations
// ============================================================================
//
// Every property change enqueues a task under (property id, task kind).
// Enqueuing under a key that is still pending replaces the pending task in
// place, so a burst of writes to one property yields a single listener pass
// that reads the value at flush time. Distinct keys run in first-enqueue
// order. Once a flush starts it drains everything, including tasks appended
// by the tasks it runs.
//
// A flush drains in rounds. A round takes the whole queue and runs it by
// cursor; anything enqueued meanwhile lands in the next round, unless its key
// is still waiting further along the current one, in which case it replaces
// that task in place. The runaway guard bounds the number of rounds, never
// the number of tasks.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::core::config::{FlushMode, SequencerConfig};
use crate::core::id::PropertyId;

// =============================================================================
// TASK KEYS
// =============================================================================

/// What a scheduled task does for its property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    FireValueListeners,
    FireValidation,
}

/// Coalescing key of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub property: PropertyId,
    pub kind: TaskKind,
}

impl TaskKey {
    pub fn listeners(property: PropertyId) -> Self {
        Self {
            property,
            kind: TaskKind::FireValueListeners,
        }
    }

    pub fn validation(property: PropertyId) -> Self {
        Self {
            property,
            kind: TaskKind::FireValidation,
        }
    }
}

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Queued tasks by key; a slot is emptied when its task runs.
type Round = IndexMap<TaskKey, Option<Task>>;

// =============================================================================
// SEQUENCER
// =============================================================================

thread_local! {
    /// The thread's default sequencer
    static DEFAULT_SEQUENCER: Rc<Sequencer> = Rc::new(Sequencer::new(SequencerConfig::default()));
}

/// Single-threaded cooperative task queue with key-based coalescing.
///
/// Each thread has a default instance ([`Sequencer::current`]); properties can
/// also be created on an isolated one, typically a manual sequencer in tests.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use prop_cells::{Property, ReadableProperty, Sequencer, SequencerConfig};
///
/// let sequencer = Rc::new(Sequencer::new(SequencerConfig::manual()));
/// let p = Property::new_in(&sequencer, 1);
/// p.set(2);
/// assert_eq!(sequencer.pending_tasks(), 1);
///
/// sequencer.flush();
/// assert_eq!(sequencer.pending_tasks(), 0);
/// ```
pub struct Sequencer {
    config: SequencerConfig,

    /// Tasks for the next round, in first-enqueue order
    queue: RefCell<Round>,

    /// The round being drained; slots before `cursor` have run
    running: RefCell<Round>,
    cursor: Cell<usize>,

    /// Whether a flush is draining the queue right now
    flushing: Cell<bool>,

    /// Nesting depth of open batches
    batch_depth: Cell<u32>,
}

impl Sequencer {
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            config,
            queue: RefCell::new(IndexMap::new()),
            running: RefCell::new(IndexMap::new()),
            cursor: Cell::new(0),
            flushing: Cell::new(false),
            batch_depth: Cell::new(0),
        }
    }

    /// The calling thread's default sequencer.
    pub fn current() -> Rc<Self> {
        DEFAULT_SEQUENCER.with(Rc::clone)
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Number of tasks waiting to run.
    pub fn pending_tasks(&self) -> usize {
        let unrun = self.running.borrow().len().saturating_sub(self.cursor.get());
        self.queue.borrow().len() + unrun
    }

    /// Whether a task with this key is waiting.
    pub fn is_pending(&self, key: &TaskKey) -> bool {
        self.queue.borrow().contains_key(key) || self.waiting_in_round(key).is_some()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    /// Queue `task` under `key`, replacing a still-pending task with the same
    /// key without changing its position.
    ///
    /// An automatic sequencer outside any batch or flush drains immediately.
    pub fn enqueue(&self, key: TaskKey, task: impl FnOnce() + 'static) {
        let task: Task = Box::new(task);
        let replaced = match self.waiting_in_round(&key) {
            Some(index) => self
                .running
                .borrow_mut()
                .get_index_mut(index)
                .and_then(|(_, slot)| slot.replace(task)),
            None => self.queue.borrow_mut().insert(key, Some(task)).flatten(),
        };
        if replaced.is_some() {
            trace!(property = %key.property, kind = ?key.kind, "coalesced pending task");
        } else {
            trace!(property = %key.property, kind = ?key.kind, "enqueued task");
        }
        // The replaced task may own property handles; drop it with no borrow held
        drop(replaced);

        if self.should_drain() {
            self.flush();
        }
    }

    /// Run `f` with draining deferred until the outermost batch ends.
    ///
    /// # Example
    ///
    /// ```
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use prop_cells::{batch, Property, ReadableProperty};
    ///
    /// let p = Property::new(1);
    /// let log = Rc::new(RefCell::new(Vec::new()));
    /// let sink = log.clone();
    /// let _registration = p.listen(move |v| sink.borrow_mut().push(*v), false);
    ///
    /// batch(|| {
    ///     p.set(2);
    ///     p.set(3);
    /// });
    ///
    /// assert_eq!(*log.borrow(), vec![3]);
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.batch_depth.set(self.batch_depth.get() + 1);

        // Exit the batch even when `f` panics
        struct BatchGuard<'a> {
            sequencer: &'a Sequencer,
        }

        impl Drop for BatchGuard<'_> {
            fn drop(&mut self) {
                let depth = self.sequencer.batch_depth.get().saturating_sub(1);
                self.sequencer.batch_depth.set(depth);

                if depth == 0 && !std::thread::panicking() && self.sequencer.should_drain() {
                    self.sequencer.flush();
                }
            }
        }

        let _guard = BatchGuard { sequencer: self };
        f()
    }

    /// Drain the queue, including tasks enqueued by the tasks being run.
    ///
    /// Calling this while a flush is already running is a no-op; the running
    /// flush picks up anything appended.
    ///
    /// # Panics
    ///
    /// Panics when a single flush needs more than
    /// [`SequencerConfig::max_flush_depth`] rounds. The queue is discarded.
    /// A panicking task leaves the tasks behind it queued.
    pub fn flush(&self) {
        if self.flushing.replace(true) {
            return;
        }

        struct FlushGuard<'a> {
            sequencer: &'a Sequencer,
        }

        impl Drop for FlushGuard<'_> {
            fn drop(&mut self) {
                self.sequencer.requeue_unrun();
                self.sequencer.flushing.set(false);
            }
        }

        let _guard = FlushGuard { sequencer: self };

        let mut rounds = 0usize;
        let mut executed = 0usize;
        loop {
            let round = std::mem::take(&mut *self.queue.borrow_mut());
            if round.is_empty() {
                break;
            }

            rounds += 1;
            if rounds > self.config.max_flush_depth {
                drop(round);
                let abandoned = std::mem::take(&mut *self.queue.borrow_mut());
                drop(abandoned);
                panic!(
                    "Maximum update depth exceeded: more than {} drain rounds in one flush. \
                     Check for listeners that keep writing to the properties they observe.",
                    self.config.max_flush_depth
                );
            }

            *self.running.borrow_mut() = round;
            self.cursor.set(0);
            loop {
                let index = self.cursor.get();
                let next = self
                    .running
                    .borrow_mut()
                    .get_index_mut(index)
                    .map(|(key, slot)| (*key, slot.take()));
                let Some((key, task)) = next else {
                    break;
                };
                self.cursor.set(index + 1);

                if let Some(task) = task {
                    trace!(property = %key.property, kind = ?key.kind, "running task");
                    executed += 1;
                    task();
                }
            }

            let finished = std::mem::take(&mut *self.running.borrow_mut());
            drop(finished);
            self.cursor.set(0);
        }

        if executed > 0 {
            trace!(executed, rounds, "flush complete");
        }
    }

    /// Index of `key` in the running round if its task has not run yet.
    fn waiting_in_round(&self, key: &TaskKey) -> Option<usize> {
        let cursor = self.cursor.get();
        self.running
            .borrow()
            .get_index_of(key)
            .filter(|index| *index >= cursor)
    }

    /// Put tasks of an interrupted round back ahead of the queue.
    fn requeue_unrun(&self) {
        let cursor = self.cursor.replace(0);
        let mut round = std::mem::take(&mut *self.running.borrow_mut());
        if cursor >= round.len() {
            return;
        }

        let unrun = round.split_off(cursor);
        drop(round);
        let later = std::mem::take(&mut *self.queue.borrow_mut());
        let mut queue = unrun;
        queue.extend(later);
        *self.queue.borrow_mut() = queue;
    }

    fn should_drain(&self) -> bool {
        self.config.mode == FlushMode::Automatic
            && !self.flushing.get()
            && self.batch_depth.get() == 0
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(SequencerConfig::default())
    }
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("config", &self.config)
            .field("pending_tasks", &self.pending_tasks())
            .field("flushing", &self.flushing.get())
            .field("batch_depth", &self.batch_depth.get())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| -> Task {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(label))
        };
        (log, make)
    }

    fn key() -> TaskKey {
        TaskKey::listeners(PropertyId::next())
    }

    #[test]
    fn automatic_mode_runs_immediately() {
        let sequencer = Sequencer::default();
        let (log, task) = recorder();

        sequencer.enqueue(key(), task("a"));

        assert_eq!(*log.borrow(), vec!["a"]);
        assert_eq!(sequencer.pending_tasks(), 0);
    }

    #[test]
    fn same_key_coalesces_to_latest_task() {
        let sequencer = Sequencer::new(SequencerConfig::manual());
        let (log, task) = recorder();
        let k = key();

        sequencer.enqueue(k, task("first"));
        sequencer.enqueue(k, task("second"));
        assert_eq!(sequencer.pending_tasks(), 1);

        sequencer.flush();
        assert_eq!(*log.borrow(), vec!["second"]);
    }

    #[test]
    fn distinct_keys_keep_first_enqueue_order() {
        let sequencer = Sequencer::new(SequencerConfig::manual());
        let (log, task) = recorder();
        let a = key();
        let b = key();

        sequencer.enqueue(a, task("a1"));
        sequencer.enqueue(b, task("b"));
        sequencer.enqueue(a, task("a2"));

        sequencer.flush();
        assert_eq!(*log.borrow(), vec!["a2", "b"]);
    }

    #[test]
    fn tasks_enqueued_during_flush_are_drained() {
        let sequencer = Rc::new(Sequencer::default());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_seq = sequencer.clone();
        let inner_log = log.clone();
        sequencer.batch(|| {
            sequencer.enqueue(key(), move || {
                inner_log.borrow_mut().push("outer");
                let nested_log = inner_log.clone();
                inner_seq.enqueue(key(), move || nested_log.borrow_mut().push("nested"));
                // Still flushing: the nested task must not run inline
                assert_eq!(inner_log.borrow().len(), 1);
            });
        });

        assert_eq!(*log.borrow(), vec!["outer", "nested"]);
        assert_eq!(sequencer.pending_tasks(), 0);
    }

    #[test]
    fn batch_defers_until_outermost_exit() {
        let sequencer = Sequencer::default();
        let (log, task) = recorder();

        sequencer.batch(|| {
            sequencer.batch(|| sequencer.enqueue(key(), task("a")));
            assert!(log.borrow().is_empty());
            assert!(sequencer.is_batching());
        });

        assert_eq!(*log.borrow(), vec!["a"]);
        assert!(!sequencer.is_batching());
    }

    #[test]
    fn manual_mode_waits_for_flush() {
        let sequencer = Sequencer::new(SequencerConfig::manual());
        let (log, task) = recorder();

        sequencer.batch(|| sequencer.enqueue(key(), task("a")));
        assert!(log.borrow().is_empty());
        assert_eq!(sequencer.pending_tasks(), 1);

        sequencer.flush();
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn is_pending_reports_queued_keys() {
        let sequencer = Sequencer::new(SequencerConfig::manual());
        let k = key();
        assert!(!sequencer.is_pending(&k));
        sequencer.enqueue(k, || {});
        assert!(sequencer.is_pending(&k));
    }

    #[test]
    fn key_waiting_in_the_running_round_coalesces_in_place() {
        let sequencer = Rc::new(Sequencer::new(SequencerConfig::manual()));
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (key(), key());

        let inner_seq = sequencer.clone();
        let inner_log = log.clone();
        sequencer.enqueue(a, move || {
            inner_log.borrow_mut().push("a");
            let replaced_log = inner_log.clone();
            inner_seq.enqueue(b, move || replaced_log.borrow_mut().push("b2"));
        });
        let first_log = log.clone();
        sequencer.enqueue(b, move || first_log.borrow_mut().push("b1"));

        sequencer.flush();
        assert_eq!(*log.borrow(), vec!["a", "b2"]);
    }

    #[test]
    fn wide_round_is_not_a_runaway() {
        let sequencer = Sequencer::new(SequencerConfig::manual().with_max_flush_depth(1));
        let ran = Rc::new(Cell::new(0usize));

        for _ in 0..10_001 {
            let ran = ran.clone();
            sequencer.enqueue(key(), move || ran.set(ran.get() + 1));
        }
        assert_eq!(sequencer.pending_tasks(), 10_001);

        sequencer.flush();
        assert_eq!(ran.get(), 10_001);
        assert_eq!(sequencer.pending_tasks(), 0);
    }

    #[test]
    #[should_panic(expected = "Maximum update depth exceeded")]
    fn runaway_flush_panics() {
        let sequencer = Rc::new(Sequencer::new(
            SequencerConfig::manual().with_max_flush_depth(10),
        ));

        fn requeue(sequencer: Rc<Sequencer>) {
            let next = sequencer.clone();
            sequencer.enqueue(TaskKey::listeners(PropertyId::next()), move || requeue(next));
        }

        requeue(sequencer.clone());
        sequencer.flush();
    }

    #[test]
    fn flush_flag_resets_after_panic() {
        let sequencer = Sequencer::new(SequencerConfig::manual());
        let (log, task) = recorder();
        sequencer.enqueue(key(), || panic!("boom"));
        sequencer.enqueue(key(), task("after"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sequencer.flush()));
        assert!(result.is_err());
        assert!(!sequencer.is_flushing());

        // The task behind the panic is still queued
        assert_eq!(sequencer.pending_tasks(), 1);
        sequencer.flush();
        assert_eq!(*log.borrow(), vec!["after"]);
    }
}
