//! Read-only parameter snapshots broadcast from the training loop
//!
//! Only the trainer mutates network parameters. Gatherers, agents and
//! reward functions hold a [`Snapshot`] and read whatever version was
//! published last; publishing replaces the shared `Arc`, it never mutates
//! a network someone else is reading.

use std::sync::Arc;

use tokio::sync::watch;

/// Publishing side of a snapshot channel
#[derive(Debug)]
pub struct SnapshotPublisher<T> {
    tx: watch::Sender<Arc<T>>,
}

impl<T> SnapshotPublisher<T> {
    /// Replace the broadcast value
    pub fn publish(&self, value: T) {
        self.tx.send_replace(Arc::new(value));
    }

    /// New reader of this channel
    #[must_use]
    pub fn subscribe(&self) -> Snapshot<T> {
        Snapshot {
            rx: self.tx.subscribe(),
        }
    }

    /// The value most recently published
    #[must_use]
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.tx.borrow())
    }
}

/// Reading side of a snapshot channel
#[derive(Debug)]
pub struct Snapshot<T> {
    rx: watch::Receiver<Arc<T>>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> Snapshot<T> {
    /// A snapshot that never changes
    #[must_use]
    pub fn fixed(value: T) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(value));
        Self { rx }
    }

    /// The value most recently published
    #[must_use]
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.rx.borrow())
    }

    /// Whether a value was published after this reader was created
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}

/// Create a snapshot channel seeded with `initial`
#[must_use]
pub fn snapshot_channel<T>(initial: T) -> (SnapshotPublisher<T>, Snapshot<T>) {
    let (tx, rx) = watch::channel(Arc::new(initial));
    (SnapshotPublisher { tx }, Snapshot { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_latest_publication() {
        let (publisher, reader) = snapshot_channel(vec![1.0]);
        let other = publisher.subscribe();
        let held = reader.current();

        publisher.publish(vec![2.0]);
        assert_eq!(*reader.current(), vec![2.0]);
        assert_eq!(*other.current(), vec![2.0]);
        assert_eq!(*held, vec![1.0]);
    }

    #[test]
    fn fixed_snapshot_outlives_its_sender() {
        let snap = Snapshot::fixed(3_u32);
        assert_eq!(*snap.current(), 3);
        assert!(!snap.has_changed());
    }
}
