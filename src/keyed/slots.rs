//! Lock-striped key → slot map.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              SlotMap                                 │
//! │                                                                      │
//! │  hash(key) % N  ──▶  Segment Selection                               │
//! │                                                                      │
//! │  ┌──────────────┐ ┌──────────────┐     ┌──────────────┐              │
//! │  │  Segment 0   │ │  Segment 1   │ ... │  Segment N-1 │              │
//! │  │    Mutex     │ │    Mutex     │     │    Mutex     │              │
//! │  │  HashMap<K,  │ │  HashMap<K,  │     │  HashMap<K,  │              │
//! │  │   Arc<cell>> │ │   Arc<cell>> │     │   Arc<cell>> │              │
//! │  └──────────────┘ └──────────────┘     └──────────────┘              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A segment lock is held only for the map operation itself. Callers get an
//! `Arc` to the slot cell and lock the cell separately, so a slow fetch on one
//! key never blocks the segment it lives in.

use parking_lot::Mutex;
use std::hash::{BuildHasher, Hash};
use std::num::NonZeroUsize;
use std::sync::Arc;

#[cfg(feature = "hashbrown")]
use hashbrown::{DefaultHashBuilder, HashMap};

#[cfg(not(feature = "hashbrown"))]
use std::collections::{hash_map::RandomState as DefaultHashBuilder, HashMap};

type Segment<K, C> = HashMap<K, Arc<C>, DefaultHashBuilder>;

pub(crate) struct SlotMap<K, C> {
    segments: Box<[Mutex<Segment<K, C>>]>,
    hash_builder: DefaultHashBuilder,
}

impl<K, C> SlotMap<K, C>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(segment_count: NonZeroUsize) -> Self {
        let hash_builder = DefaultHashBuilder::default();
        let segments: Vec<_> = (0..segment_count.get())
            .map(|_| Mutex::new(HashMap::with_hasher(hash_builder.clone())))
            .collect();

        Self {
            segments: segments.into_boxed_slice(),
            hash_builder,
        }
    }

    #[inline]
    fn segment(&self, key: &K) -> &Mutex<Segment<K, C>> {
        let idx = (self.hash_builder.hash_one(key) as usize) % self.segments.len();
        &self.segments[idx]
    }

    /// Returns the cell for `key`, creating it if absent.
    ///
    /// Creation happens under the segment lock, so concurrent first callers
    /// all receive the same cell.
    pub(crate) fn get_or_create(&self, key: &K, create: impl FnOnce() -> C) -> Arc<C> {
        let mut segment = self.segment(key).lock();
        if let Some(cell) = segment.get(key) {
            return Arc::clone(cell);
        }
        let cell = Arc::new(create());
        segment.insert(key.clone(), Arc::clone(&cell));
        cell
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<C>> {
        self.segment(key).lock().get(key).cloned()
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<C>> {
        self.segment(key).lock().remove(key)
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.segment(key).lock().contains_key(key)
    }

    /// Removes every cell and returns how many there were.
    ///
    /// Segments are cleared one at a time; keys created concurrently in an
    /// already-cleared segment survive.
    pub(crate) fn clear(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| {
                let mut segment = segment.lock();
                let count = segment.len();
                segment.clear();
                count
            })
            .sum()
    }

    pub(crate) fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.lock().is_empty())
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }
}
