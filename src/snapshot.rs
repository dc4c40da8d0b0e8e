use parking_lot::RwLock;
use std::sync::Arc;

/// A swappable, read-mostly reference to an immutable value.
///
/// Readers clone the inner `Arc` and work on that snapshot without holding
/// the lock; writers build a complete replacement and swap it in. A value
/// is never mutated while published.
pub struct Shared<T> {
    current: RwLock<Option<Arc<T>>>,
}

impl<T> Shared<T> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    pub fn with(value: T) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(value))),
        }
    }

    /// Current snapshot, if one has been published.
    pub fn get(&self) -> Option<Arc<T>> {
        self.current.read().clone()
    }

    /// Publish `value`, returning the snapshot it replaced.
    pub fn replace(&self, value: T) -> Option<Arc<T>> {
        self.publish(Arc::new(value))
    }

    /// Publish an already shared value. Callers keep their own `Arc` to the
    /// exact snapshot they published.
    pub fn publish(&self, next: Arc<T>) -> Option<Arc<T>> {
        std::mem::replace(&mut *self.current.write(), Some(next))
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot_across_swaps() {
        let shared = Shared::with(vec![1, 2, 3]);
        let before = shared.get().unwrap();

        let old = shared.replace(vec![9]).unwrap();
        assert!(Arc::ptr_eq(&before, &old));
        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*shared.get().unwrap(), vec![9]);
    }

    #[test]
    fn starts_empty_until_published() {
        let shared: Shared<u32> = Shared::default();
        assert!(shared.get().is_none());

        let five = Arc::new(5);
        assert!(shared.publish(Arc::clone(&five)).is_none());
        assert!(Arc::ptr_eq(&shared.get().unwrap(), &five));
    }

    #[test]
    fn concurrent_readers_during_rebuild() {
        let shared = Arc::new(Shared::with(0usize));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snap = shared.get().unwrap();
                        assert!(*snap <= 100);
                    }
                })
            })
            .collect();
        for i in 1..=100 {
            shared.replace(i);
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(*shared.get().unwrap(), 100);
    }
}
