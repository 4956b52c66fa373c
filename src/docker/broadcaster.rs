//! Last-known-status cell with synchronous subscriber fan-out.
//!
//! ```text
//!   monitor task ── push(status) ──► StatusBroadcaster ──► subscriber 1
//!                                     (current cell)   ──► subscriber 2
//!   caller ── wait_for(mask) ── snapshot + subscribe ──► ...
//! ```
//!
//! State lives behind one mutex. `push` overwrites the current value and
//! calls every subscriber in registration order while still holding it, so
//! no callback sees a half-updated list and a concurrent `subscribe` lands
//! either wholly before or wholly after a push. `wait_for` snapshots the
//! current value and registers its subscriber under the same lock, so a
//! status pushed concurrently with registration is never missed.
//!
//! Callbacks run under the lock and must not call back into the broadcaster.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::docker::error::WaitError;
use crate::docker::event::StatusMask;

type Callback<S> = Box<dyn Fn(S) + Send + Sync>;

/// Handle identifying one registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner<S> {
    current: S,
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Callback<S>)>,
}

impl<S> Inner<S> {
    fn register(&mut self, callback: Callback<S>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, callback));
        id
    }
}

/// Broadcasts the most recently classified status to registered subscribers.
pub struct StatusBroadcaster<S: StatusMask> {
    inner: Mutex<Inner<S>>,
}

impl<S: StatusMask> StatusBroadcaster<S> {
    /// Create a broadcaster whose current value is `S::NONE`.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: S::NONE,
                next_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last pushed status.
    pub fn current(&self) -> S {
        self.lock().current
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Record a new status and notify every subscriber in registration order.
    pub fn push(&self, status: S) {
        let mut inner = self.lock();
        inner.current = status;
        for (_, callback) in &inner.subscribers {
            callback(status);
        }
    }

    /// Register a callback for every future push.
    ///
    /// The caller owns the returned id and must pass it to
    /// [`unsubscribe`](Self::unsubscribe) when done.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(S) + Send + Sync + 'static,
    {
        self.lock().register(Box::new(callback))
    }

    /// Register a callback that is removed when the returned guard drops.
    pub fn subscribe_guard<F>(&self, callback: F) -> Subscription<'_, S>
    where
        F: Fn(S) + Send + Sync + 'static,
    {
        Subscription {
            broadcaster: self,
            id: self.subscribe(callback),
        }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    /// Wait until the current or any future status intersects `mask`.
    ///
    /// Returns the status that satisfied the wait. Returns immediately when
    /// the current value already matches. Without a timeout or cancellation
    /// token in `options` this can wait forever if the status never arrives.
    pub async fn wait_for(&self, mask: S, options: WaitOptions) -> Result<S, WaitError> {
        let signal = Arc::new(WaitSignal::<S>::new());

        let _subscription = {
            let mut inner = self.lock();
            if inner.current.intersects(mask) {
                return Ok(inner.current);
            }
            let matched = Arc::clone(&signal);
            let id = inner.register(Box::new(move |status: S| {
                if status.intersects(mask) {
                    matched.trigger(status);
                }
            }));
            Subscription {
                broadcaster: self,
                id,
            }
        };

        let triggered = async {
            loop {
                if let Some(status) = signal.take() {
                    return status;
                }
                signal.notify.notified().await;
            }
        };

        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let deadline = async {
            match options.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = triggered => Ok(status),
            _ = cancelled => Err(WaitError::Cancelled {
                mask: mask.to_string(),
            }),
            _ = deadline => Err(WaitError::TimedOut {
                mask: mask.to_string(),
                timeout: options.timeout.unwrap_or_default(),
            }),
        }
    }
}

impl<S: StatusMask> Default for StatusBroadcaster<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StatusMask> std::fmt::Debug for StatusBroadcaster<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StatusBroadcaster")
            .field("current", &inner.current)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

/// Guard that unsubscribes when dropped.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct Subscription<'a, S: StatusMask> {
    broadcaster: &'a StatusBroadcaster<S>,
    id: SubscriptionId,
}

impl<S: StatusMask> Subscription<'_, S> {
    /// Id of the guarded subscriber.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl<S: StatusMask> Drop for Subscription<'_, S> {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

/// Bounds applied to a status wait.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Give up after this long.
    pub timeout: Option<Duration>,
    /// Give up when this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl WaitOptions {
    /// No timeout and no cancellation.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout if one is given.
    pub fn with_optional_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

struct WaitSignal<S> {
    observed: Mutex<Option<S>>,
    notify: Notify,
}

impl<S: StatusMask> WaitSignal<S> {
    fn new() -> Self {
        Self {
            observed: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn trigger(&self, status: S) {
        let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
        if observed.is_none() {
            *observed = Some(status);
            self.notify.notify_one();
        }
    }

    fn take(&self) -> Option<S> {
        *self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::event::{ContainerStatus, container_status_for};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_push_updates_current() {
        let broadcaster = StatusBroadcaster::<ContainerStatus>::new();
        assert_eq!(broadcaster.current(), ContainerStatus::NONE);

        broadcaster.push(ContainerStatus::CREATE);
        broadcaster.push(ContainerStatus::START);
        assert_eq!(broadcaster.current(), ContainerStatus::START);
    }

    #[test]
    fn test_subscribers_notified_in_registration_order() {
        let broadcaster = StatusBroadcaster::<ContainerStatus>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            broadcaster.subscribe(move |status| seen.lock().unwrap().push((tag, status)));
        }

        broadcaster.push(ContainerStatus::START);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("first", ContainerStatus::START),
                ("second", ContainerStatus::START),
                ("third", ContainerStatus::START),
            ]
        );
    }

    #[test]
    fn test_unsubscribed_callback_receives_nothing_further() {
        let broadcaster = StatusBroadcaster::<ContainerStatus>::new();
        broadcaster.push(ContainerStatus::CREATE);

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = broadcaster.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.push(ContainerStatus::START);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        broadcaster.push(ContainerStatus::STOP);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_guard_unsubscribes_on_drop() {
        let broadcaster = StatusBroadcaster::<ContainerStatus>::new();
        {
            let _guard = broadcaster.subscribe_guard(|_| {});
            assert_eq!(broadcaster.subscriber_count(), 1);
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_current_matches() {
        let broadcaster = StatusBroadcaster::<ContainerStatus>::new();
        broadcaster.push(ContainerStatus::EXEC_START);

        let status = tokio::time::timeout(
            Duration::from_millis(50),
            broadcaster.wait_for(
                ContainerStatus::START | ContainerStatus::EXEC_START,
                WaitOptions::unbounded(),
            ),
        )
        .await
        .expect("wait should not block")
        .unwrap();

        assert_eq!(status, ContainerStatus::EXEC_START);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_waiter_unblocks_only_on_matching_push() {
        let broadcaster = Arc::new(StatusBroadcaster::<ContainerStatus>::new());

        let waiter = {
            let broadcaster = Arc::clone(&broadcaster);
            tokio::spawn(async move {
                broadcaster
                    .wait_for(ContainerStatus::EXEC_START, WaitOptions::unbounded())
                    .await
            })
        };

        while broadcaster.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        for action in ["create", "start"] {
            broadcaster.push(container_status_for(action));
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(!waiter.is_finished(), "waiter woke on '{action}'");
        }

        broadcaster.push(container_status_for("exec_start"));
        let status = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap()
            .unwrap();
        assert_eq!(status, ContainerStatus::EXEC_START);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let broadcaster = StatusBroadcaster::<ContainerStatus>::new();
        let result = broadcaster
            .wait_for(
                ContainerStatus::DESTROY,
                WaitOptions::unbounded().with_timeout(Duration::from_millis(20)),
            )
            .await;

        assert!(matches!(result, Err(WaitError::TimedOut { .. })));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let broadcaster = StatusBroadcaster::<ContainerStatus>::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = broadcaster
            .wait_for(
                ContainerStatus::STOP,
                WaitOptions::unbounded().with_cancel(cancel),
            )
            .await;

        assert!(matches!(result, Err(WaitError::Cancelled { .. })));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_pushes_and_subscriptions() {
        let broadcaster = Arc::new(StatusBroadcaster::<ContainerStatus>::new());
        let pusher = {
            let broadcaster = Arc::clone(&broadcaster);
            tokio::spawn(async move {
                for _ in 0..500 {
                    broadcaster.push(ContainerStatus::START);
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..100 {
            let id = broadcaster.subscribe(|_| {});
            tokio::task::yield_now().await;
            assert!(broadcaster.unsubscribe(id));
        }

        pusher.await.unwrap();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.current(), ContainerStatus::START);
    }
}
