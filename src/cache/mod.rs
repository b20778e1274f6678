//! Per-worker LRU file cache.
//!
//! Two structures are kept in sync under one reader/writer lock: a
//! [`HashMap`] from path to slab index for O(1) lookup, and a doubly linked
//! list — most-recently-used at the head, least-recently-used at the tail —
//! threaded through a [`slab::Slab`] of stable indices rather than raw
//! pointers, which avoids self-referential structures entirely.
//!
//! An entry's payload is an `Arc<Vec<u8>>`, so `Arc::strong_count` doubles as
//! its refcount: [`Cache::release`] is a thin, explicitly-named wrapper
//! around dropping a handle, kept as a real method so callers that think in
//! terms of an explicit `release(handle)` operation have somewhere to call
//! it.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use slab::Slab;

/// Per-file cacheability ceiling: a payload larger than this is never
/// cached, regardless of how much total budget remains.
pub const DEFAULT_MAX_FILE_SIZE: usize = 1024 * 1024;

/// Total cache budget, matching `CACHE_SIZE_MB`'s documented default of 10.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 10 * 1024 * 1024;

/// An upper bound on entry count, independent of their total size. Not
/// separately configurable from the byte budget — a generous fixed value
/// exists purely as a backstop against pathologically small files filling
/// the index without ever approaching the byte budget.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// A borrowed cache payload. Cloning is cheap (an `Arc` bump); an entry's
/// refcount *is* this handle's strong count.
pub type CacheHandle = Arc<Vec<u8>>;

/// Failure to insert into the cache.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheError {
    /// The payload alone exceeds the per-file ceiling; the caller should
    /// fall back to serving it directly from disk.
    TooLarge { size: usize, limit: usize },
    /// Even after evicting every entry with no outstanding borrower, the
    /// payload still doesn't fit.
    WouldNotFit,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::TooLarge { size, limit } => {
                write!(f, "payload of {size} bytes exceeds the {limit}-byte cache ceiling")
            }
            CacheError::WouldNotFit => {
                write!(f, "insertion would not fit even after evicting all evictable entries")
            }
        }
    }
}

impl std::error::Error for CacheError {}

struct Node {
    key: PathBuf,
    data: Arc<Vec<u8>>,
    size: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Lru {
    slab: Slab<Node>,
    index: HashMap<PathBuf, usize>,
    /// Most-recently-used entry.
    head: Option<usize>,
    /// Least-recently-used entry.
    tail: Option<usize>,
    current_size_bytes: usize,
}

impl Lru {
    fn new() -> Self {
        Lru {
            slab: Slab::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            current_size_bytes: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = &self.slab[idx];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.slab[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slab[n].prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = &mut self.slab[idx];
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.slab[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    /// Removes the entry at `idx` from the index, list, and slab,
    /// regardless of refcount — callers are responsible for only calling
    /// this when eviction is actually permitted.
    fn remove_at(&mut self, idx: usize) -> Node {
        self.unlink(idx);
        let node = self.slab.remove(idx);
        self.index.remove(&node.key);
        self.current_size_bytes -= node.size;
        node
    }

    /// Evicts least-recently-used entries with no outstanding borrower
    /// until `needed` additional bytes fit under `max_size_bytes`, or until
    /// there is nothing left that can be evicted.
    fn make_room(&mut self, needed: usize, max_size_bytes: usize, max_entries: usize) -> bool {
        let mut cursor = self.tail;
        while self.current_size_bytes + needed > max_size_bytes
            || self.index.len() >= max_entries
        {
            let idx = match cursor {
                Some(idx) => idx,
                None => return false,
            };
            let next_cursor = self.slab[idx].prev;
            if Arc::strong_count(&self.slab[idx].data) > 1 {
                // Someone is still reading this entry; skip it without
                // waiting, and never evict it out of turn.
                cursor = next_cursor;
                continue;
            }
            self.remove_at(idx);
            cursor = self.tail;
        }
        true
    }
}

/// A size-bounded, reference-counted, least-recently-used file cache.
///
/// One instance per worker runtime (spec §4.3's "one instance per worker
/// process" — see `DESIGN.md` for the threads-not-processes rendering).
pub struct Cache {
    inner: RwLock<Lru>,
    max_size_bytes: usize,
    max_file_size: usize,
    max_entries: usize,
}

impl Cache {
    /// Creates a cache with the given byte budget and per-file ceiling.
    pub fn new(max_size_bytes: usize, max_file_size: usize) -> Self {
        Cache {
            inner: RwLock::new(Lru::new()),
            max_size_bytes,
            max_file_size,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// On hit, marks `key` most-recently-used and returns a cloned handle
    /// to its payload. On miss, returns `None`.
    pub fn get(&self, key: &Path) -> Option<CacheHandle> {
        let mut lru = self.inner.write().expect("cache lock poisoned");
        let idx = *lru.index.get(key)?;
        lru.touch(idx);
        Some(Arc::clone(&lru.slab[idx].data))
    }

    /// Inserts or replaces the entry for `key`. Evicts least-recently-used,
    /// unborrowed entries until the new payload fits; fails with
    /// [`CacheError::TooLarge`] if the payload alone exceeds the per-file
    /// ceiling, or [`CacheError::WouldNotFit`] if eviction alone can't make
    /// room (e.g. every other entry is still borrowed).
    pub fn put(&self, key: &Path, bytes: Vec<u8>) -> Result<(), CacheError> {
        let size = bytes.len();
        if size > self.max_file_size {
            return Err(CacheError::TooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        let mut lru = self.inner.write().expect("cache lock poisoned");

        if let Some(&idx) = lru.index.get(key) {
            lru.remove_at(idx);
        }

        if !lru.make_room(size, self.max_size_bytes, self.max_entries) {
            return Err(CacheError::WouldNotFit);
        }

        let node = Node {
            key: key.to_path_buf(),
            data: Arc::new(bytes),
            size,
            prev: None,
            next: None,
        };
        let idx = lru.slab.insert(node);
        lru.index.insert(key.to_path_buf(), idx);
        lru.push_front(idx);
        lru.current_size_bytes += size;
        Ok(())
    }

    /// Removes `key`. The underlying payload stays alive for as long as any
    /// handle obtained before removal is still held — `Arc`'s drop glue
    /// takes care of that automatically.
    pub fn remove(&self, key: &Path) {
        let mut lru = self.inner.write().expect("cache lock poisoned");
        if let Some(&idx) = lru.index.get(key) {
            lru.remove_at(idx);
        }
    }

    /// Removes every entry, returning the cache to its just-constructed
    /// state.
    pub fn invalidate(&self) {
        let mut lru = self.inner.write().expect("cache lock poisoned");
        *lru = Lru::new();
    }

    /// Explicitly drops a handle. Provided for API symmetry with spec
    /// §4.3's `release(handle)` operation; in this crate's `Arc`-based
    /// rendering, dropping the handle normally (letting it go out of scope)
    /// has the identical effect.
    pub fn release(&self, handle: CacheHandle) {
        drop(handle);
    }

    /// Current total size of cached payloads, in bytes.
    pub fn current_size_bytes(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").current_size_bytes
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> Cache {
        Cache::new(max_size, DEFAULT_MAX_FILE_SIZE)
    }

    #[test]
    fn put_then_get_round_trips_exact_bytes() {
        let c = cache(1024);
        c.put(Path::new("/a"), b"hello".to_vec()).unwrap();
        let handle = c.get(Path::new("/a")).unwrap();
        assert_eq!(&handle[..], b"hello");
    }

    #[test]
    fn get_on_missing_key_is_none() {
        let c = cache(1024);
        assert!(c.get(Path::new("/missing")).is_none());
    }

    #[test]
    fn second_put_replaces_first_and_size_reflects_only_latest() {
        let c = cache(1024);
        c.put(Path::new("/a"), vec![0u8; 10]).unwrap();
        c.put(Path::new("/a"), vec![0u8; 20]).unwrap();
        assert_eq!(c.current_size_bytes(), 20);
        assert_eq!(c.get(Path::new("/a")).unwrap().len(), 20);
    }

    #[test]
    fn invalidate_clears_everything() {
        let c = cache(1024);
        c.put(Path::new("/a"), vec![0u8; 10]).unwrap();
        c.put(Path::new("/b"), vec![0u8; 10]).unwrap();
        c.invalidate();
        assert_eq!(c.len(), 0);
        assert_eq!(c.current_size_bytes(), 0);
        assert!(c.get(Path::new("/a")).is_none());
    }

    #[test]
    fn payload_over_per_file_ceiling_is_rejected() {
        let c = Cache::new(1024 * 1024, 10);
        let err = c.put(Path::new("/big"), vec![0u8; 11]).unwrap_err();
        assert_eq!(err, CacheError::TooLarge { size: 11, limit: 10 });
    }

    #[test]
    fn inserting_past_capacity_evicts_least_recently_used() {
        let c = cache(20);
        c.put(Path::new("/a"), vec![0u8; 10]).unwrap();
        c.put(Path::new("/b"), vec![0u8; 10]).unwrap();
        // both present, exactly at budget
        assert_eq!(c.current_size_bytes(), 20);
        // touch /a so /b becomes LRU
        c.get(Path::new("/a"));
        c.put(Path::new("/c"), vec![0u8; 10]).unwrap();
        assert!(c.get(Path::new("/b")).is_none());
        assert!(c.get(Path::new("/a")).is_some());
        assert!(c.get(Path::new("/c")).is_some());
    }

    #[test]
    fn entry_with_live_borrower_is_skipped_during_eviction() {
        let c = cache(20);
        c.put(Path::new("/a"), vec![0u8; 10]).unwrap();
        let held = c.get(Path::new("/a")).unwrap(); // refcount now 2, still the only (and thus LRU) entry
        c.put(Path::new("/b"), vec![0u8; 10]).unwrap(); // /a stays tail: it's untouched since the borrow
        // inserting /c needs 10 more bytes than fit; /a is the LRU
        // candidate but is borrowed, so /b is evicted in its place.
        c.put(Path::new("/c"), vec![0u8; 10]).unwrap();
        assert!(c.get(Path::new("/a")).is_some());
        assert!(c.get(Path::new("/b")).is_none());
        assert!(c.get(Path::new("/c")).is_some());
        drop(held);
    }

    #[test]
    fn put_fails_when_nothing_evictable_and_it_still_does_not_fit() {
        let c = cache(10);
        c.put(Path::new("/a"), vec![0u8; 10]).unwrap();
        let _held = c.get(Path::new("/a")).unwrap();
        let err = c.put(Path::new("/b"), vec![0u8; 10]).unwrap_err();
        assert_eq!(err, CacheError::WouldNotFit);
    }

    #[test]
    fn list_traversal_visits_every_entry_exactly_once() {
        let c = cache(1024);
        for i in 0..5 {
            c.put(&PathBuf::from(format!("/f{i}")), vec![0u8; 4]).unwrap();
        }
        let lru = c.inner.read().unwrap();
        let mut seen = 0;
        let mut cursor = lru.head;
        while let Some(idx) = cursor {
            seen += 1;
            cursor = lru.slab[idx].next;
        }
        assert_eq!(seen, 5);
        assert_eq!(seen, lru.index.len());
    }
}
