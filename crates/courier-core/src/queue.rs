use std::{collections::HashMap, hash::Hash, sync::Mutex};

use crate::sync::lock;

/// Append-only buffer filled by the I/O thread and drained by the UI thread.
///
/// [`DrainQueue::drain`] swaps the buffer out, so ownership of the items moves
/// to the caller and the lock is held only for the swap.
#[derive(Debug)]
pub struct DrainQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for DrainQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T> DrainQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        lock(&self.items).push(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        lock(&self.items).extend(items);
    }

    /// Remove and return every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.items))
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`DrainQueue`] partitioned by key, drained one key at a time.
///
/// Each key buffers at most `max_per_key` items; pushing past the cap drops
/// the oldest item for that key.
#[derive(Debug)]
pub struct KeyedDrainQueue<K, T> {
    items: Mutex<HashMap<K, Vec<T>>>,
    max_per_key: usize,
}

impl<K, T> Default for KeyedDrainQueue<K, T> {
    fn default() -> Self {
        Self::with_max_per_key(usize::MAX)
    }
}

impl<K, T> KeyedDrainQueue<K, T> {
    pub fn with_max_per_key(max_per_key: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            max_per_key: max_per_key.max(1),
        }
    }
}

impl<K: Eq + Hash, T> KeyedDrainQueue<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item` under `key`. Returns `true` when an older item was dropped.
    pub fn push(&self, key: K, item: T) -> bool {
        let mut items = lock(&self.items);
        let queued = items.entry(key).or_default();
        queued.push(item);
        if queued.len() > self.max_per_key {
            queued.remove(0);
            return true;
        }
        false
    }

    /// Remove and return every item queued under `key`, oldest first.
    pub fn drain(&self, key: &K) -> Vec<T> {
        lock(&self.items).remove(key).unwrap_or_default()
    }

    pub fn len(&self, key: &K) -> usize {
        lock(&self.items).get(key).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn drain_returns_items_in_order_and_empties() {
        let queue = DrainQueue::new();
        queue.push(1);
        queue.extend([2, 3]);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn keyed_drain_only_touches_one_key() {
        let queue = KeyedDrainQueue::new();
        queue.push(10_i64, "a");
        queue.push(20_i64, "b");
        queue.push(10_i64, "c");

        assert_eq!(queue.drain(&10), vec!["a", "c"]);
        assert_eq!(queue.len(&10), 0);
        assert_eq!(queue.len(&20), 1);
        assert!(queue.drain(&30).is_empty());
    }

    #[test]
    fn undrained_key_keeps_only_newest_items() {
        let queue = KeyedDrainQueue::with_max_per_key(3);
        let dropped = (1..=5).filter(|n| queue.push(5_i64, *n)).count();
        queue.push(6_i64, 100);

        assert_eq!(dropped, 2);
        assert_eq!(queue.drain(&5), vec![3, 4, 5]);
        assert_eq!(queue.drain(&6), vec![100]);
    }

    #[test]
    fn concurrent_pushes_are_all_drained() {
        let queue = Arc::new(DrainQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        queue.push(worker * 1_000 + i);
                    }
                })
            })
            .collect();

        let mut collected = Vec::new();
        while producers.iter().any(|p| !p.is_finished()) {
            collected.extend(queue.drain());
        }
        for producer in producers {
            producer.join().expect("producer should finish");
        }
        collected.extend(queue.drain());

        collected.sort_unstable();
        collected.dedup();
        assert_eq!(collected.len(), 2_000);
    }
}
