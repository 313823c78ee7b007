// ============================================================================
// prop-cells - Pass Wakers
// Wake-ups from pending validators, routed back to the owning sequencer
// ============================================================================
//
// A `Waker` must be Send + Sync; properties are neither. A pass waker
// therefore carries only its owning thread and a slot number, and each thread
// keeps a registry from slot to the re-poll hook of a live pass. A wake on the
// owning thread runs the hook, which schedules the pass to be polled again.
// A wake from another thread only wakes tasks awaiting the pass handle; they
// drive the pass when they poll it.
//
// Pass wakers are never registered with the pass's `Shared` handle. The
// hook polls that handle, and `Shared` holds its notifier lock while it wakes.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{waker_ref, ArcWake, AtomicWaker};
use tracing::trace;

type RepollHook = Rc<dyn Fn()>;

thread_local! {
    static REPOLL_HOOKS: RefCell<HashMap<u64, RepollHook>> = RefCell::new(HashMap::new());
    static NEXT_SLOT: Cell<u64> = const { Cell::new(0) };
}

struct PassWaker {
    thread: ThreadId,
    slot: u64,

    /// Whoever polls the pass through its shared handle
    awaiters: AtomicWaker,
}

impl ArcWake for PassWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.awaiters.wake();

        if thread::current().id() != arc_self.thread {
            return;
        }
        let hook = REPOLL_HOOKS
            .try_with(|hooks| hooks.borrow().get(&arc_self.slot).cloned())
            .ok()
            .flatten();
        match hook {
            Some(hook) => hook(),
            None => trace!(slot = arc_self.slot, "wake for a retired validation pass"),
        }
    }
}

/// A pass's entry in the thread's re-poll registry. Dropping it retires the
/// entry; later wakes of the pass are ignored.
pub(crate) struct PassSlot {
    waker: Arc<PassWaker>,
}

impl PassSlot {
    pub(crate) fn register(repoll: impl Fn() + 'static) -> Self {
        let slot = NEXT_SLOT.with(|next| {
            let slot = next.get();
            next.set(slot + 1);
            slot
        });
        REPOLL_HOOKS.with(|hooks| hooks.borrow_mut().insert(slot, Rc::new(repoll)));

        Self {
            waker: Arc::new(PassWaker {
                thread: thread::current().id(),
                slot,
                awaiters: AtomicWaker::new(),
            }),
        }
    }

    /// Wrap `pass` so that everything it waits on wakes this slot.
    pub(crate) fn drive<T: 'static>(
        &self,
        pass: LocalBoxFuture<'static, T>,
    ) -> LocalBoxFuture<'static, T> {
        Driven {
            pass,
            waker: self.waker.clone(),
        }
        .boxed_local()
    }
}

impl Drop for PassSlot {
    fn drop(&mut self) {
        let slot = self.waker.slot;
        let retired = REPOLL_HOOKS
            .try_with(|hooks| hooks.borrow_mut().remove(&slot))
            .ok()
            .flatten();
        drop(retired);
    }
}

/// Polls the pass with its slot's waker and forwards wakes to the caller.
struct Driven<T> {
    pass: LocalBoxFuture<'static, T>,
    waker: Arc<PassWaker>,
}

impl<T> Future for Driven<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        this.waker.awaiters.register(cx.waker());

        let waker = waker_ref(&this.waker);
        let mut pass_cx = Context::from_waker(&waker);
        this.pass.poll_unpin(&mut pass_cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;

    #[test]
    fn wake_on_the_owning_thread_runs_the_hook() {
        let repolls = Rc::new(Cell::new(0));
        let counter = repolls.clone();
        let slot = PassSlot::register(move || counter.set(counter.get() + 1));

        let (sender, receiver) = oneshot::channel::<u8>();
        let mut pass = slot.drive(async move { receiver.await.unwrap_or(0) }.boxed_local());
        assert_eq!((&mut pass).now_or_never(), None);

        sender.send(7).unwrap();
        assert_eq!(repolls.get(), 1);
        assert_eq!(pass.now_or_never(), Some(7));
    }

    #[test]
    fn retired_slot_ignores_wakes() {
        let repolls = Rc::new(Cell::new(0));
        let counter = repolls.clone();
        let slot = PassSlot::register(move || counter.set(counter.get() + 1));

        let (sender, receiver) = oneshot::channel::<u8>();
        let mut pass = slot.drive(async move { receiver.await.unwrap_or(0) }.boxed_local());
        assert_eq!((&mut pass).now_or_never(), None);

        drop(slot);
        sender.send(7).unwrap();
        assert_eq!(repolls.get(), 0);
    }

    #[test]
    fn wake_from_another_thread_skips_the_hook() {
        let repolls = Rc::new(Cell::new(0));
        let counter = repolls.clone();
        let slot = PassSlot::register(move || counter.set(counter.get() + 1));

        let (sender, receiver) = oneshot::channel::<u8>();
        let mut pass = slot.drive(async move { receiver.await.unwrap_or(0) }.boxed_local());
        assert_eq!((&mut pass).now_or_never(), None);

        std::thread::spawn(move || sender.send(7).unwrap())
            .join()
            .unwrap();
        assert_eq!(repolls.get(), 0);
        assert_eq!(pass.now_or_never(), Some(7));
    }
}
