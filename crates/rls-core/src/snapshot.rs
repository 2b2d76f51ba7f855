//! Lock-free snapshot container.
//!
//! Readers take an `Arc` to the current generation without locking; writers
//! allocate a full replacement and swap the pointer atomically. A reader
//! holding a generation keeps it alive for the duration of one request even
//! as newer generations land.

use std::sync::Arc;

use arc_swap::ArcSwap;

#[derive(Debug)]
pub struct SnapshotCell<T> {
    inner: ArcSwap<T>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: ArcSwap::from_pointee(value),
        }
    }

    /// Current generation.
    pub fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Publish a new generation.
    pub fn replace(&self, next: T) {
        self.inner.store(Arc::new(next));
    }
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_keep_their_generation() {
        let cell = SnapshotCell::new(vec![1, 2, 3]);
        let old = cell.load();
        cell.replace(vec![4]);
        assert_eq!(*old, vec![1, 2, 3]);
        assert_eq!(*cell.load(), vec![4]);
    }

    #[test]
    fn test_concurrent_swaps_are_whole() {
        let cell = Arc::new(SnapshotCell::new((0u64, 0u64)));
        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 1..=1000u64 {
                    cell.replace((i, i));
                }
            })
        };
        for _ in 0..1000 {
            let (a, b) = *cell.load();
            assert_eq!(a, b, "readers must never see a half-written pair");
        }
        writer.join().unwrap();
    }
}
