//! Indexed Min-Heap Module
//!
//! Array-backed binary min-heap ordered by an `i64` sort key. Every entry
//! records its current offset in the backing array, and that offset is
//! shared with the outside world through a [`HeapHandle`]. Holding a handle
//! is enough to remove the entry later in O(log n) without searching.
//!
//! For a node at index `i` the parent is `(i - 1) / 2` and the children are
//! `2i + 1` and `2i + 2`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::HeapConfig;

/// Position stored in entries that are not currently in a heap.
pub const DETACHED: usize = usize::MAX;

// == Heap Handle ==
/// Shared read-only view of an entry's current position in its heap.
///
/// The heap rewrites the position on every swap, sift or relocation, so the
/// value read here is always current as long as the heap's lock is not held
/// by someone mutating it concurrently.
#[derive(Clone)]
pub struct HeapHandle(Arc<AtomicUsize>);

impl HeapHandle {
    /// Current offset of the entry, or [`DETACHED`] once it has been popped.
    pub fn position(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// True when both handles refer to the same entry.
    pub fn same_entry(&self, other: &HeapHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HeapHandle").field(&self.position()).finish()
    }
}

// == Heap Entry ==
/// One element of the heap: a sort key, the owner's key and a payload.
pub struct HeapEntry<K, P> {
    sort_key: i64,
    key: K,
    payload: P,
    position: Arc<AtomicUsize>,
}

impl<K, P> HeapEntry<K, P> {
    /// Creates a detached entry.
    pub fn new(sort_key: i64, key: K, payload: P) -> Self {
        Self {
            sort_key,
            key,
            payload,
            position: Arc::new(AtomicUsize::new(DETACHED)),
        }
    }

    pub fn sort_key(&self) -> i64 {
        self.sort_key
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Position last written by the heap.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Returns a handle that keeps tracking this entry across re-pushes.
    pub fn handle(&self) -> HeapHandle {
        HeapHandle(Arc::clone(&self.position))
    }

    /// Changes the sort key. Only reachable on detached entries, since the
    /// heap never hands out mutable access to stored ones.
    pub fn set_sort_key(&mut self, sort_key: i64) {
        self.sort_key = sort_key;
    }

    /// Replaces the payload, returning the previous one.
    pub fn replace_payload(&mut self, payload: P) -> P {
        std::mem::replace(&mut self.payload, payload)
    }

    pub fn into_parts(self) -> (i64, K, P) {
        (self.sort_key, self.key, self.payload)
    }

    fn set_position(&self, position: usize) {
        self.position.store(position, Ordering::Release);
    }
}

impl<K: fmt::Debug, P> fmt::Debug for HeapEntry<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapEntry")
            .field("sort_key", &self.sort_key)
            .field("key", &self.key)
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

// == Raw Heap ==
/// Unsynchronized heap state. Every method keeps positions current.
struct RawHeap<K, P> {
    storage: Vec<HeapEntry<K, P>>,
    config: HeapConfig,
}

impl<K, P> RawHeap<K, P> {
    fn with_config(config: HeapConfig) -> Self {
        Self {
            storage: Vec::with_capacity(config.initial_capacity),
            config,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.storage.swap(a, b);
        self.storage[a].set_position(a);
        self.storage[b].set_position(b);
    }

    /// Moves the entry at `i` towards the root while it is smaller than its
    /// parent. Returns its final index.
    fn sift_up(&mut self, mut i: usize) -> usize {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.storage[i].sort_key >= self.storage[parent].sort_key {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
        i
    }

    /// Moves the entry at `i` towards the leaves while it is larger than the
    /// smaller of its children.
    fn sift_down(&mut self, mut i: usize) {
        let len = self.storage.len();
        loop {
            let mut child = 2 * i + 1;
            if child >= len {
                break;
            }
            if child + 1 < len && self.storage[child + 1].sort_key < self.storage[child].sort_key
            {
                child += 1;
            }
            if self.storage[i].sort_key <= self.storage[child].sort_key {
                break;
            }
            self.swap(i, child);
            i = child;
        }
    }

    fn push(&mut self, entry: HeapEntry<K, P>) -> HeapHandle {
        let handle = entry.handle();
        let index = self.storage.len();
        entry.set_position(index);
        self.storage.push(entry);
        self.sift_up(index);
        handle
    }

    fn pop_at(&mut self, position: usize) -> Option<HeapEntry<K, P>> {
        if position >= self.storage.len() {
            return None;
        }

        let last = self.storage.len() - 1;
        self.storage.swap(position, last);
        let removed = self.storage.pop()?;
        removed.set_position(DETACHED);

        // The entry moved into the hole may belong above or below it.
        if position < self.storage.len() {
            self.storage[position].set_position(position);
            if self.sift_up(position) == position {
                self.sift_down(position);
            }
        }

        self.compact();
        Some(removed)
    }

    /// Releases retained capacity after bursts of removals.
    fn compact(&mut self) {
        let capacity = self.storage.capacity();
        let len = self.storage.len();
        if capacity > self.config.compact_threshold && capacity > 2 * len {
            self.storage
                .shrink_to(len.max(self.config.initial_capacity));
        }
    }

    fn heapify(&mut self) {
        for (i, entry) in self.storage.iter().enumerate() {
            entry.set_position(i);
        }
        for start in (0..self.storage.len() / 2).rev() {
            self.sift_down(start);
        }
    }

    fn check(&self) -> bool {
        self.storage.iter().enumerate().all(|(i, entry)| {
            let children_ok = [2 * i + 1, 2 * i + 2].iter().all(|&c| {
                c >= self.storage.len() || entry.sort_key <= self.storage[c].sort_key
            });
            children_ok && entry.position() == i
        })
    }
}

// == Heap ==
/// Thread-safe indexed min-heap.
///
/// Every public operation takes the heap's own lock and is atomic with
/// respect to other operations on the same heap.
pub struct Heap<K, P> {
    inner: Mutex<RawHeap<K, P>>,
}

impl<K, P> Heap<K, P> {
    // == Constructor ==
    /// Creates an empty heap with the given sizing policy.
    pub fn new(config: HeapConfig) -> Self {
        Self {
            inner: Mutex::new(RawHeap::with_config(config)),
        }
    }

    // == Bulk Build ==
    /// Builds a heap from existing entries in O(n).
    ///
    /// Handles taken from the entries before the call stay valid.
    pub fn from_entries(entries: Vec<HeapEntry<K, P>>, config: HeapConfig) -> Self {
        let mut raw = RawHeap {
            storage: entries,
            config,
        };
        raw.heapify();
        Self {
            inner: Mutex::new(raw),
        }
    }

    // == Push ==
    /// Inserts a new entry and returns a handle tracking its position.
    pub fn push(&self, sort_key: i64, key: K, payload: P) -> HeapHandle {
        self.push_entry(HeapEntry::new(sort_key, key, payload))
    }

    /// Inserts an entry, typically one previously removed with
    /// [`pop_at`](Self::pop_at). Existing handles to it keep working.
    pub fn push_entry(&self, entry: HeapEntry<K, P>) -> HeapHandle {
        self.inner.lock().push(entry)
    }

    // == Pop Min ==
    /// Removes and returns the entry with the smallest sort key.
    pub fn pop_min(&self) -> Option<HeapEntry<K, P>> {
        self.inner.lock().pop_at(0)
    }

    // == Pop At ==
    /// Removes and returns the entry currently stored at `position`.
    ///
    /// The last entry fills the vacated slot and is sifted up or down as
    /// needed, so the heap property holds afterwards.
    pub fn pop_at(&self, position: usize) -> Option<HeapEntry<K, P>> {
        self.inner.lock().pop_at(position)
    }

    /// Runs `f` on the entry stored at `position` while holding the lock.
    pub fn with_entry<R>(
        &self,
        position: usize,
        f: impl FnOnce(&HeapEntry<K, P>) -> R,
    ) -> Option<R> {
        self.inner.lock().storage.get(position).map(f)
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.inner.lock().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().storage.is_empty()
    }

    /// Allocated slots in the backing storage.
    pub fn capacity(&self) -> usize {
        self.inner.lock().storage.capacity()
    }

    // == Check ==
    /// Verifies the min-heap property and that every entry's recorded
    /// position matches its real offset. Meant for tests.
    pub fn check(&self) -> bool {
        self.inner.lock().check()
    }
}

impl<K: Clone, P> Heap<K, P> {
    // == Peek Min ==
    /// Returns the smallest sort key and its key without removing anything.
    pub fn peek_min(&self) -> Option<(i64, K)> {
        self.get(0)
    }

    // == Get ==
    /// Returns the sort key and key stored at `position`.
    pub fn get(&self, position: usize) -> Option<(i64, K)> {
        self.with_entry(position, |entry| (entry.sort_key, entry.key.clone()))
    }
}

impl<K, P> Default for Heap<K, P> {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl<K, P> fmt::Debug for Heap<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Heap")
            .field("len", &inner.storage.len())
            .field("capacity", &inner.storage.capacity())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn drain(heap: &Heap<&'static str, ()>) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(entry) = heap.pop_min() {
            out.push(entry.sort_key());
        }
        out
    }

    #[test]
    fn test_heap_new_is_empty() {
        let heap: Heap<String, ()> = Heap::default();
        assert!(heap.is_empty());
        assert_eq!(heap.len(), 0);
        assert!(heap.peek_min().is_none());
        assert!(heap.pop_min().is_none());
        assert!(heap.pop_at(0).is_none());
    }

    #[test]
    fn test_heap_pop_min_in_order() {
        let heap = Heap::default();
        for (k, v) in [(9, "a"), (3, "b"), (7, "c"), (1, "d"), (5, "e")] {
            heap.push(k, v, ());
            assert!(heap.check());
        }

        assert_eq!(heap.peek_min(), Some((1, "d")));
        assert_eq!(drain(&heap), vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_heap_handle_tracks_position() {
        let heap = Heap::default();
        let h9 = heap.push(9, "nine", ());
        let h1 = heap.push(1, "one", ());

        // "one" sifted up to the root and swapped with "nine"
        assert_eq!(h1.position(), 0);
        assert_eq!(h9.position(), 1);
        assert_eq!(heap.get(h9.position()), Some((9, "nine")));
    }

    #[test]
    fn test_heap_pop_at_handle() {
        let heap = Heap::default();
        let handles: Vec<_> = (0..20).map(|i| heap.push(i * 3 % 17, i, ())).collect();

        let target = &handles[7];
        let removed = heap.pop_at(target.position()).unwrap();
        assert_eq!(*removed.key(), 7);
        assert_eq!(target.position(), DETACHED);
        assert_eq!(heap.len(), 19);
        assert!(heap.check());

        for (i, handle) in handles.iter().enumerate() {
            if i != 7 {
                assert_eq!(heap.get(handle.position()).map(|(_, k)| k), Some(i as i64));
            }
        }
    }

    #[test]
    fn test_heap_pop_at_replacement_moves_up() {
        // The last entry (2) lands under 50 when 60 is removed, and must
        // rise above it.
        //
        //          0
        //      50     1
        //    60  70  2
        let heap = Heap::default();
        for (k, v) in [(0, "r"), (50, "a"), (1, "b"), (60, "c"), (70, "d"), (2, "e")] {
            heap.push(k, v, ());
        }
        let (_, key) = heap.get(3).unwrap();
        assert_eq!(key, "c");

        heap.pop_at(3).unwrap();
        assert!(heap.check());
        assert_eq!(heap.get(1), Some((2, "e")));
    }

    #[test]
    fn test_heap_pop_at_last_slot() {
        let heap = Heap::default();
        heap.push(1, "a", ());
        heap.push(2, "b", ());
        let removed = heap.pop_at(1).unwrap();
        assert_eq!(*removed.key(), "b");
        assert_eq!(heap.len(), 1);
        assert!(heap.check());
    }

    #[test]
    fn test_heap_pop_at_out_of_range() {
        let heap = Heap::default();
        heap.push(1, "a", ());
        assert!(heap.pop_at(1).is_none());
        assert!(heap.pop_at(DETACHED).is_none());
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_heap_push_entry_reuses_handle() {
        let heap = Heap::default();
        let handle = heap.push(10, "k", 1u32);
        heap.push(5, "other", 2u32);

        let mut entry = heap.pop_at(handle.position()).unwrap();
        entry.set_sort_key(1);
        entry.replace_payload(3);
        let returned = heap.push_entry(entry);

        assert!(returned.same_entry(&handle));
        assert_eq!(handle.position(), 0);
        let min = heap.pop_min().unwrap();
        assert_eq!(min.into_parts(), (1, "k", 3));
    }

    #[test]
    fn test_heap_equal_sort_keys() {
        let heap = Heap::default();
        for v in ["a", "b", "c", "d"] {
            heap.push(6, v, ());
        }
        heap.push(1, "x", ());
        assert!(heap.check());
        assert_eq!(drain(&heap), vec![1, 6, 6, 6, 6]);
    }

    #[test]
    fn test_heap_from_entries() {
        let entries: Vec<_> = [9, 9, 6, 19, 6, 60, 6]
            .iter()
            .enumerate()
            .map(|(i, &k)| HeapEntry::new(k, i, ()))
            .collect();
        let handles: Vec<_> = entries.iter().map(HeapEntry::handle).collect();

        let heap = Heap::from_entries(entries, HeapConfig::default());
        assert!(heap.check());
        assert_eq!(heap.len(), 7);
        assert_eq!(heap.peek_min().map(|(k, _)| k), Some(6));

        // Handles taken before the build follow their entries
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(heap.get(handle.position()).map(|(_, k)| k), Some(i));
        }

        heap.pop_at(handles[3].position()).unwrap();
        assert!(heap.check());

        let mut keys = Vec::new();
        while let Some(entry) = heap.pop_min() {
            keys.push(entry.sort_key());
        }
        assert_eq!(keys, vec![6, 6, 6, 9, 9, 60]);
    }

    #[test]
    fn test_heap_from_empty_entries() {
        let heap: Heap<u32, ()> = Heap::from_entries(Vec::new(), HeapConfig::default());
        assert!(heap.is_empty());
        assert!(heap.check());
    }

    #[test]
    fn test_heap_compacts_after_burst() {
        let config = HeapConfig {
            initial_capacity: 10,
            compact_threshold: 50,
        };
        let heap = Heap::new(config);
        for i in 0..1000 {
            heap.push(i, i, ());
        }
        assert!(heap.capacity() >= 1000);

        while heap.len() > 5 {
            heap.pop_min();
        }
        assert!(heap.capacity() <= 50);
        assert!(heap.check());
    }

    #[test]
    fn test_heap_no_compaction_below_threshold() {
        let heap = Heap::new(HeapConfig::default());
        for i in 0..100 {
            heap.push(i, i, ());
        }
        let before = heap.capacity();
        while heap.pop_min().is_some() {}
        assert_eq!(heap.capacity(), before);
    }
}
