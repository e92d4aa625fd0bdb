//! Wake-up primitives shared by the modules.
//!
//! `Signal` is an edge-triggered broadcast: a trigger wakes every task that
//! is already waiting and leaves nothing behind, so late waiters block until
//! the next edge. `Channel` layers a FIFO queue on top so values survive
//! until a consumer picks them up.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

// ── Signal ────────────────────────────────────────────────────────────────────

/// Edge-triggered broadcast wake-up with no payload.
#[derive(Clone, Default)]
pub struct Signal {
    notify: Arc<Notify>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every task currently waiting, then rearm. A trigger with no
    /// waiters is a no-op.
    pub fn trigger(&self) {
        self.notify.notify_waiters();
    }

    /// Suspend until the next trigger.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Suspend until the next trigger or the timeout, whichever comes
    /// first. Returns silently on timeout so poll loops stay simple.
    pub async fn wait_timeout(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// Asynchronous FIFO queue with a wake-up signal. Multiple producers and
/// consumers may hold clones; each value is delivered to one consumer.
///
/// Unlike [`Signal`], the wake-up here is permit-based so a send racing
/// with a receiver's empty-queue check is never lost.
#[derive(Clone)]
pub struct Channel<T> {
    queue: Arc<Mutex<VecDeque<T>>>,
    notify: Arc<Notify>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self { queue: Arc::new(Mutex::new(VecDeque::new())), notify: Arc::new(Notify::new()) }
    }
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a value and wake a waiting consumer.
    pub fn send(&self, value: T) {
        self.queue.lock().expect("channel queue poisoned").push_back(value);
        self.notify.notify_one();
    }

    fn try_recv(&self) -> Option<T> {
        self.queue.lock().expect("channel queue poisoned").pop_front()
    }

    /// Receive the next value, waiting for one to arrive.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(value) = self.try_recv() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    /// Receive the next value or `None` once the timeout elapses.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_wakes_every_waiter_once() {
        let signal = Signal::new();
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let signal = signal.clone();
            tasks.push(tokio::spawn(async move { signal.wait().await }));
        }
        // Let the waiters park before the edge.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("waiter missed the edge")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn signal_trigger_without_waiters_does_not_latch() {
        let signal = Signal::new();
        signal.trigger();
        // The earlier edge must not satisfy this wait.
        let woke = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(woke.is_err());
    }

    #[tokio::test]
    async fn signal_wait_timeout_returns_on_timeout() {
        let signal = Signal::new();
        signal.wait_timeout(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn channel_is_fifo() {
        let channel = Channel::new();
        channel.send(1);
        channel.send(2);
        channel.send(3);
        assert_eq!(channel.recv().await, 1);
        assert_eq!(channel.recv().await, 2);
        assert_eq!(channel.recv().await, 3);
    }

    #[tokio::test]
    async fn channel_recv_timeout_expires_when_empty() {
        let channel: Channel<u8> = Channel::new();
        assert_eq!(channel.recv_timeout(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn channel_delivers_across_tasks() {
        let channel = Channel::new();
        let rx = channel.clone();
        let consumer = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.send(42u32);
        assert_eq!(consumer.await.unwrap(), 42);
    }
}
