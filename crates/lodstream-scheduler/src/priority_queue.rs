//! Indexed binary heap ordering queued work by a mutable priority.

use std::hash::Hash;

use rustc_hash::FxHashMap;

/// An entry in the heap.
#[derive(Clone, Debug)]
struct HeapEntry<K, P> {
    key: K,
    priority: P,
}

/// Min-priority queue with O(log n) priority updates and removals.
///
/// A position map tracks where every key lives in the heap array, so an update
/// sifts the entry in place instead of pushing a stale duplicate. The smallest
/// priority is popped first.
#[derive(Clone, Debug)]
pub struct IndexedPriorityQueue<K, P> {
    heap: Vec<HeapEntry<K, P>>,
    positions: FxHashMap<K, usize>,
}

impl<K, P> Default for IndexedPriorityQueue<K, P> {
    fn default() -> Self {
        Self {
            heap: Vec::new(),
            positions: FxHashMap::default(),
        }
    }
}

impl<K, P> IndexedPriorityQueue<K, P> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.positions.clear();
    }
}

impl<K, P> IndexedPriorityQueue<K, P>
where
    K: Clone + Eq + Hash,
    P: Ord,
{
    /// Create a new empty priority queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key or update its priority if it is already queued.
    ///
    /// Returns `true` if the key was newly inserted.
    pub fn push_or_update(&mut self, key: K, priority: P) -> bool {
        if let Some(&index) = self.positions.get(&key) {
            self.heap[index].priority = priority;
            self.restore(index);
            return false;
        }
        let index = self.heap.len();
        self.positions.insert(key.clone(), index);
        self.heap.push(HeapEntry { key, priority });
        self.sift_up(index);
        true
    }

    /// Update the priority of a queued key. Returns `false` if it is not queued.
    pub fn update(&mut self, key: &K, priority: P) -> bool {
        let Some(&index) = self.positions.get(key) else {
            return false;
        };
        self.heap[index].priority = priority;
        self.restore(index);
        true
    }

    /// Remove and return the key with the smallest priority.
    pub fn pop(&mut self) -> Option<(K, P)> {
        self.remove_at(0).map(|entry| (entry.key, entry.priority))
    }

    /// Remove a queued key. Returns its priority if it was queued.
    pub fn remove(&mut self, key: &K) -> Option<P> {
        let index = *self.positions.get(key)?;
        self.remove_at(index).map(|entry| entry.priority)
    }

    /// Smallest priority currently queued.
    #[must_use]
    pub fn peek(&self) -> Option<(&K, &P)> {
        self.heap.first().map(|entry| (&entry.key, &entry.priority))
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    #[must_use]
    pub fn priority(&self, key: &K) -> Option<&P> {
        self.positions.get(key).map(|&index| &self.heap[index].priority)
    }

    fn remove_at(&mut self, index: usize) -> Option<HeapEntry<K, P>> {
        if index >= self.heap.len() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(index, last);
        let entry = self.heap.pop()?;
        self.positions.remove(&entry.key);
        if index < self.heap.len() {
            self.restore(index);
        }
        Some(entry)
    }

    fn restore(&mut self, index: usize) {
        if index > 0 && self.heap[index].priority < self.heap[(index - 1) / 2].priority {
            self.sift_up(index);
        } else {
            self.sift_down(index);
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[index].priority >= self.heap[parent].priority {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < self.heap.len() && self.heap[left].priority < self.heap[smallest].priority {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].priority < self.heap[smallest].priority {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].key.clone(), a);
        self.positions.insert(self.heap[b].key.clone(), b);
    }
}
