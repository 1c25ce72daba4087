//! Algorithm Module
//!
//! The two ordered structures the cache is built from: an indexed min-heap
//! and a red-black ordered map. Both are usable on their own and guard
//! their state with their own lock.

mod heap;
mod rbtree;


pub use heap::{Heap, HeapEntry, HeapHandle, DETACHED};
pub use rbtree::{Comparator, Iter, OrderedMap};
