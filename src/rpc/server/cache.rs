//! Cache of resolved values per lookup target, merged across get_peers replies.

use std::{
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;
use tracing::trace;

use crate::common::{Id, MAX_BUCKET_SIZE_K, PEER_SIZE};

pub const MAX_CACHED_TARGETS: usize = 2000;
/// Entries older than this are refreshed by an internal lookup.
pub const RENEW_AFTER: Duration = Duration::from_secs(5 * 60);
/// Entries not refreshed within this period are dropped.
pub const CACHE_LIFETIME: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct Entry {
    values: Vec<[u8; PEER_SIZE]>,
    updated_at: Instant,
    renewing: bool,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: LruCache<Id, Entry>,
}

impl ResponseCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Merge a compact list of values into the entry for `target`.
    ///
    /// Values are de-duplicated, the freshest come first, and at most
    /// [MAX_BUCKET_SIZE_K] are kept. Trailing bytes that do not form a whole
    /// value are ignored.
    pub fn merge(&mut self, target: Id, values: &[u8], now: Instant) {
        if values.len() < PEER_SIZE {
            return;
        }

        let incoming = values.chunks_exact(PEER_SIZE).map(|chunk| {
            let mut value = [0; PEER_SIZE];
            value.copy_from_slice(chunk);
            value
        });

        let mut merged: Vec<[u8; PEER_SIZE]> = Vec::with_capacity(MAX_BUCKET_SIZE_K);
        let previous = self
            .entries
            .pop(&target)
            .map(|entry| entry.values)
            .unwrap_or_default();

        for value in incoming.chain(previous) {
            if merged.len() >= MAX_BUCKET_SIZE_K {
                break;
            }
            if !merged.contains(&value) {
                merged.push(value);
            }
        }

        if merged.is_empty() {
            return;
        }

        self.entries.put(
            target,
            Entry {
                values: merged,
                updated_at: now,
                renewing: false,
            },
        );
    }

    /// The merged compact list for `target`, empty if nothing is cached.
    pub fn compact_list(&mut self, target: &Id) -> Vec<u8> {
        match self.entries.get(target) {
            Some(entry) => entry.values.concat(),
            None => Vec::new(),
        }
    }

    /// Targets whose entries are due for a refresh. Each is returned once
    /// until it is merged again.
    pub fn renew(&mut self, now: Instant) -> Vec<Id> {
        let mut due = Vec::new();

        for (target, entry) in self.entries.iter_mut() {
            if !entry.renewing && now.saturating_duration_since(entry.updated_at) > RENEW_AFTER {
                entry.renewing = true;
                due.push(*target);
            }
        }

        due
    }

    pub fn expire(&mut self, now: Instant) {
        let stale: Vec<Id> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.updated_at) > CACHE_LIFETIME)
            .map(|(target, _)| *target)
            .collect();

        for target in stale {
            trace!(?target, "Cached response expired");
            self.entries.pop(&target);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(MAX_CACHED_TARGETS).unwrap_or(NonZeroUsize::MIN))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn values(range: std::ops::Range<u8>) -> Vec<u8> {
        range.flat_map(|i| [10, 0, 0, i, 0x1f, 0x90]).collect()
    }

    #[test]
    fn merge_deduplicates() {
        let mut cache = ResponseCache::default();
        let target = Id::random();
        let now = Instant::now();

        cache.merge(target, &values(0..3), now);
        cache.merge(target, &values(2..5), now);

        let list = cache.compact_list(&target);
        assert_eq!(list.len(), 5 * PEER_SIZE);

        // Freshest values first.
        assert_eq!(&list[..3 * PEER_SIZE], values(2..5).as_slice());
    }

    #[test]
    fn capped_per_target() {
        let mut cache = ResponseCache::default();
        let target = Id::random();
        let now = Instant::now();

        cache.merge(target, &values(0..6), now);
        cache.merge(target, &values(6..12), now);

        assert_eq!(
            cache.compact_list(&target).len(),
            MAX_BUCKET_SIZE_K * PEER_SIZE
        );
    }

    #[test]
    fn empty_merge_is_ignored() {
        let mut cache = ResponseCache::default();
        let target = Id::random();

        cache.merge(target, &[], Instant::now());
        cache.merge(target, &[1, 2, 3], Instant::now());

        assert!(cache.is_empty());
        assert!(cache.compact_list(&target).is_empty());
    }

    #[test]
    fn renew_once_then_expire() {
        let mut cache = ResponseCache::default();
        let target = Id::random();
        let now = Instant::now();

        cache.merge(target, &values(0..1), now);

        assert!(cache.renew(now + Duration::from_secs(60)).is_empty());

        let later = now + RENEW_AFTER + Duration::from_secs(1);
        assert_eq!(cache.renew(later), vec![target]);
        assert!(cache.renew(later).is_empty());

        cache.expire(now + CACHE_LIFETIME + Duration::from_secs(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn merge_refreshes_entry() {
        let mut cache = ResponseCache::default();
        let target = Id::random();
        let now = Instant::now();

        cache.merge(target, &values(0..1), now);

        let later = now + RENEW_AFTER + Duration::from_secs(1);
        assert_eq!(cache.renew(later), vec![target]);

        cache.merge(target, &values(0..1), later);
        cache.expire(now + CACHE_LIFETIME + Duration::from_secs(1));

        assert_eq!(cache.len(), 1);
    }
}
