//! Push-to-pull adapter.
//!
//! A producer pushes items through a [`BridgeSender`]; a single consumer pulls
//! them from the paired [`StreamBridge`], either with [`StreamBridge::next`] or
//! through the [`Stream`] implementation. The shared state is an explicit state
//! machine:
//!
//! ```text
//!   Active ──(finish, backlog empty)───────────────────► Closed
//!     │                                                    ▲
//!     └──(fail, or finish with backlog)──► Draining ───────┘ (backlog and error taken)
//!   any ──(cancel / drop of the consumer)──────────────► Closed
//! ```
//!
//! A terminal error is handed to the consumer only after every buffered item
//! has been yielded, and only once. The close hook registered with
//! [`StreamBridge::on_close`] runs exactly once, on whichever path reaches
//! `Closed` first.

use futures_util::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::warn;

/// Bound applied to a bridge's holding area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backlog {
    /// Buffer every pending item.
    #[default]
    Unbounded,
    /// Keep at most `n` pending items, evicting the oldest on overflow.
    DropOldest(NonZeroUsize),
}

/// Lifecycle of a bridged subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Active,
    Draining,
    Closed,
}

type CloseHook = Box<dyn FnOnce() + Send>;

struct Shared<T, E> {
    queue: VecDeque<T>,
    waiter: Option<Waker>,
    state: BridgeState,
    terminal: Option<E>,
    backlog: Backlog,
    dropped: u64,
    on_close: Option<CloseHook>,
}

impl<T, E> Shared<T, E> {
    /// Moves to `Closed` and hands back the hook so it runs outside the lock.
    fn close(&mut self) -> Option<CloseHook> {
        self.state = BridgeState::Closed;
        self.waiter = None;
        self.on_close.take()
    }

    fn end_upstream(&mut self) -> (Option<Waker>, Option<CloseHook>) {
        let waiter = self.waiter.take();
        if self.queue.is_empty() {
            let hook = self.close();
            (waiter, hook)
        } else {
            self.state = BridgeState::Draining;
            (waiter, None)
        }
    }
}

fn run_after_unlock(waiter: Option<Waker>, hook: Option<CloseHook>) {
    if let Some(waiter) = waiter {
        waiter.wake();
    }
    if let Some(hook) = hook {
        hook();
    }
}

/// Creates a connected sender/bridge pair.
#[must_use]
pub fn channel<T, E>(backlog: Backlog) -> (BridgeSender<T, E>, StreamBridge<T, E>) {
    let shared = Arc::new(Mutex::new(Shared {
        queue: VecDeque::new(),
        waiter: None,
        state: BridgeState::Active,
        terminal: None,
        backlog,
        dropped: 0,
        on_close: None,
    }));
    (BridgeSender { shared: Arc::clone(&shared) }, StreamBridge { shared })
}

/// Push side of a bridge.
///
/// Dropping the sender without calling [`finish`](Self::finish) or
/// [`fail`](Self::fail) ends the stream as if `finish` was called.
pub struct BridgeSender<T, E> {
    shared: Arc<Mutex<Shared<T, E>>>,
}

impl<T, E> BridgeSender<T, E> {
    /// Delivers an item to the consumer.
    ///
    /// Returns the item back when the bridge no longer accepts input because
    /// the consumer went away or the upstream already ended.
    pub fn push(&self, item: T) -> Result<(), T> {
        let waiter = {
            let mut shared = self.shared.lock();
            if shared.state != BridgeState::Active {
                return Err(item);
            }
            if let Backlog::DropOldest(limit) = shared.backlog
                && shared.queue.len() >= limit.get()
            {
                shared.queue.pop_front();
                shared.dropped = shared.dropped.saturating_add(1);
                if shared.dropped.is_power_of_two() {
                    warn!(
                        limit = limit.get(),
                        dropped = shared.dropped,
                        "Subscriber backlog full; dropping oldest events"
                    );
                }
            }
            // A parked consumer implies an empty queue, so this item is the
            // very next one it receives.
            shared.queue.push_back(item);
            shared.waiter.take()
        };
        if let Some(waiter) = waiter {
            waiter.wake();
        }
        Ok(())
    }

    /// Signals normal completion of the upstream source.
    pub fn finish(&self) {
        let (waiter, hook) = {
            let mut shared = self.shared.lock();
            if shared.state != BridgeState::Active {
                return;
            }
            shared.end_upstream()
        };
        run_after_unlock(waiter, hook);
    }

    /// Signals abnormal termination. The consumer receives `error` after the
    /// items already buffered.
    pub fn fail(&self, error: E) {
        let waiter = {
            let mut shared = self.shared.lock();
            if shared.state != BridgeState::Active {
                return;
            }
            shared.terminal = Some(error);
            // The error still has to reach the consumer, so stay in Draining
            // until it is taken even when nothing is buffered.
            shared.state = BridgeState::Draining;
            shared.waiter.take()
        };
        run_after_unlock(waiter, None);
    }

    /// Returns `true` once the bridge stopped accepting items.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().state != BridgeState::Active
    }
}

impl<T, E> Drop for BridgeSender<T, E> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<T, E> fmt::Debug for BridgeSender<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("BridgeSender")
            .field("state", &shared.state)
            .field("queued", &shared.queue.len())
            .finish()
    }
}

/// Pull side of a bridge: a single-consumer sequence of `Result<T, E>`.
#[must_use = "streams do nothing unless polled"]
pub struct StreamBridge<T, E> {
    shared: Arc<Mutex<Shared<T, E>>>,
}

impl<T, E> StreamBridge<T, E> {
    /// Waits for the next item.
    ///
    /// Returns `None` once the stream has ended; a terminal error is returned
    /// as `Some(Err(_))` exactly once, after buffered items.
    pub async fn next(&mut self) -> Option<Result<T, E>> {
        poll_fn(|cx| self.poll_pull(cx)).await
    }

    /// Returns the next buffered item without waiting.
    pub fn try_next(&mut self) -> Option<Result<T, E>> {
        let (out, hook) = {
            let mut shared = self.shared.lock();
            Self::take_ready(&mut shared)?
        };
        run_after_unlock(None, hook);
        out
    }

    /// Abandons the subscription. Buffered items are discarded and the close
    /// hook runs if it has not already. Calling this more than once is a no-op.
    pub fn cancel(&mut self) {
        let hook = {
            let mut shared = self.shared.lock();
            shared.queue.clear();
            shared.terminal = None;
            shared.close()
        };
        run_after_unlock(None, hook);
    }

    /// Registers a hook that runs once when the bridge reaches `Closed`.
    ///
    /// Runs immediately when the bridge is already closed. Replaces a hook
    /// that has not run yet.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self.shared.lock();
        if shared.state == BridgeState::Closed {
            drop(shared);
            hook();
        } else {
            shared.on_close = Some(Box::new(hook));
        }
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.shared.lock().state
    }

    /// Number of buffered items not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Number of items evicted by a [`Backlog::DropOldest`] policy.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }

    /// Outer `None`: nothing ready and the stream is still active.
    fn take_ready(
        shared: &mut Shared<T, E>,
    ) -> Option<(Option<Result<T, E>>, Option<CloseHook>)> {
        if let Some(item) = shared.queue.pop_front() {
            let hook = if shared.state == BridgeState::Draining
                && shared.queue.is_empty()
                && shared.terminal.is_none()
            {
                shared.close()
            } else {
                None
            };
            return Some((Some(Ok(item)), hook));
        }
        match shared.state {
            BridgeState::Active => None,
            BridgeState::Draining => {
                let error = shared.terminal.take();
                let hook = shared.close();
                Some((error.map(Err), hook))
            },
            BridgeState::Closed => Some((shared.terminal.take().map(Err), None)),
        }
    }

    fn poll_pull(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<T, E>>> {
        let (out, hook) = {
            let mut shared = self.shared.lock();
            match Self::take_ready(&mut shared) {
                Some(ready) => ready,
                None => {
                    if !shared.waiter.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                        shared.waiter = Some(cx.waker().clone());
                    }
                    return Poll::Pending;
                },
            }
        };
        run_after_unlock(None, hook);
        Poll::Ready(out)
    }
}

impl<T, E> Stream for StreamBridge<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_pull(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let shared = self.shared.lock();
        match shared.state {
            BridgeState::Active => (shared.queue.len(), None),
            _ => {
                let len = shared.queue.len() + usize::from(shared.terminal.is_some());
                (len, Some(len))
            },
        }
    }
}

impl<T, E> Drop for StreamBridge<T, E> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T, E> fmt::Debug for StreamBridge<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("StreamBridge")
            .field("state", &shared.state)
            .field("pending", &shared.queue.len())
            .field("dropped", &shared.dropped)
            .finish_non_exhaustive()
    }
}
