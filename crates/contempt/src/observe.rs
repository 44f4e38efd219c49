//! Latest-value cells with replay-on-subscribe.

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

struct Inner<T> {
    current: T,
    tx: broadcast::Sender<T>,
}

/// A value that can be read at any time and watched for changes.
///
/// A new subscriber first receives the current value, then every later
/// update in order. Reads and subscriptions share one lock with writes, so a
/// subscriber never misses or duplicates the update racing its subscribe.
pub struct Observable<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> Observable<T> {
    /// Create a cell holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                current: initial,
                tx,
            }),
        }
    }

    /// The current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.lock().current.clone()
    }

    /// Watch the value.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        let inner = self.inner.lock();
        Subscription {
            pending: Some(inner.current.clone()),
            rx: inner.tx.subscribe(),
        }
    }
}

impl<T: Clone + PartialEq> Observable<T> {
    /// Replace the value only if it differs. Returns whether it changed.
    pub fn set_if_changed(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.current == value {
            return false;
        }
        inner.current = value.clone();
        // No receivers is fine.
        let _ = inner.tx.send(value);
        true
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("current", &self.inner.lock().current)
            .finish()
    }
}

/// A subscription to an [`Observable`].
pub struct Subscription<T> {
    pending: Option<T>,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Wait for the next value.
    ///
    /// Returns `None` once the observable is dropped. A subscriber that falls
    /// more than the channel capacity behind skips to the oldest value still
    /// buffered.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next value if one is ready.
    pub fn try_recv(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Drain every value ready now.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Convert into a stream.
    pub fn into_stream(self) -> impl Stream<Item = T>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut sub| async move {
            let value = sub.recv().await?;
            Some((value, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_subscribe_replays_current() {
        let cell = Observable::new(1);
        cell.set_if_changed(2);
        let mut sub = cell.subscribe();
        assert_eq!(sub.try_recv(), Some(2));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_updates_delivered_in_order() {
        let cell = Observable::new(0);
        let mut sub = cell.subscribe();
        cell.set_if_changed(1);
        cell.set_if_changed(2);
        assert_eq!(sub.drain(), vec![0, 1, 2]);
    }

    #[test]
    fn test_independent_subscribers() {
        let cell = Observable::new("a".to_string());
        let mut first = cell.subscribe();
        cell.set_if_changed("b".to_string());
        let mut second = cell.subscribe();
        cell.set_if_changed("c".to_string());
        assert_eq!(first.drain(), vec!["a", "b", "c"]);
        assert_eq!(second.drain(), vec!["b", "c"]);
    }

    #[test]
    fn test_set_if_changed() {
        let cell = Observable::new(5);
        let mut sub = cell.subscribe();
        assert!(!cell.set_if_changed(5));
        assert!(cell.set_if_changed(6));
        assert_eq!(sub.drain(), vec![5, 6]);
    }

    #[tokio::test]
    async fn test_recv_ends_when_dropped() {
        let cell = Observable::new(1);
        let mut sub = cell.subscribe();
        drop(cell);
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream() {
        let cell = Observable::new(1);
        let stream = cell.subscribe().into_stream();
        cell.set_if_changed(2);
        drop(cell);
        let values: Vec<i32> = stream.collect().await;
        assert_eq!(values, vec![1, 2]);
    }
}
