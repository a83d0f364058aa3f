//! LRU cache of decoded regions, gated by per-region lock counters.

use std::sync::Arc;

use lru::LruCache;

use super::block_pool::{BlockPool, BlockSpan};
use crate::error::{DataMgrError, Result};
use crate::types::{CacheStats, RegionKey};

struct Region {
    data: Arc<[f32]>,
    span: BlockSpan,
    lock_counter: u32,
}

/// Cache of decoded float regions keyed by `(ts, varname, level, lod, bmin, bmax)`.
///
/// Every resident region draws its memory from a [`BlockPool`]. A region
/// whose lock counter is non-zero is held by an outstanding grid and is
/// never evicted.
pub struct RegionCache {
    regions: LruCache<RegionKey, Region>,
    pool: BlockPool,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl RegionCache {
    /// Create a cache with a budget of `mem_size` bytes carved into
    /// `pool_block_size`-byte pool blocks.
    pub fn new(mem_size: usize, pool_block_size: usize) -> Self {
        let max_blocks = mem_size / pool_block_size.max(1);
        Self {
            regions: LruCache::unbounded(),
            pool: BlockPool::new(pool_block_size, max_blocks),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a region, promoting it to most recently used.
    ///
    /// Increments the lock counter when `lock` is set.
    pub fn acquire(&mut self, key: &RegionKey, lock: bool) -> Option<Arc<[f32]>> {
        match self.regions.get_mut(key) {
            Some(region) => {
                if lock {
                    region.lock_counter += 1;
                }
                self.hits += 1;
                tracing::trace!(varname = %key.varname, level = key.level, "Region cache hit");
                Some(region.data.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Allocate and fill a region of `len` values.
    ///
    /// If the key is already resident the existing buffer is returned and
    /// `fill` is not called. When `fill` fails the allocation is returned
    /// to the pool and the error is reported as a read failure.
    pub fn fill<F>(&mut self, key: RegionKey, len: usize, lock: bool, fill: F) -> Result<Arc<[f32]>>
    where
        F: FnOnce(&mut [f32]) -> Result<()>,
    {
        if self.regions.contains(&key) {
            if let Some(data) = self.acquire(&key, lock) {
                return Ok(data);
            }
        }

        let bytes = len * std::mem::size_of::<f32>();
        let span = self.alloc(bytes)?;

        let mut buf = vec![0.0f32; len];
        if let Err(e) = fill(&mut buf) {
            self.pool.free(span);
            return Err(match e {
                DataMgrError::ReadFailure(_) => e,
                other => DataMgrError::read_failure(other.to_string()),
            });
        }

        tracing::debug!(
            varname = %key.varname,
            ts = key.ts,
            level = key.level,
            lod = key.lod,
            bmin = ?key.bmin,
            bmax = ?key.bmax,
            blocks = span.len(),
            "Region filled"
        );

        let data: Arc<[f32]> = buf.into();
        self.regions.put(
            key,
            Region {
                data: data.clone(),
                span,
                lock_counter: u32::from(lock),
            },
        );
        Ok(data)
    }

    /// Decrement the lock counter of a region without freeing it.
    ///
    /// Returns false if the region is not resident or not locked.
    pub fn release(&mut self, key: &RegionKey) -> bool {
        match self.regions.peek_mut(key) {
            Some(region) if region.lock_counter > 0 => {
                region.lock_counter -= 1;
                true
            }
            _ => false,
        }
    }

    /// Current lock count of a resident region.
    pub fn lock_count(&self, key: &RegionKey) -> Option<u32> {
        self.regions.peek(key).map(|r| r.lock_counter)
    }

    /// Check if a region is resident without updating LRU order.
    pub fn contains(&self, key: &RegionKey) -> bool {
        self.regions.contains(key)
    }

    /// Evict the least recently used unlocked region.
    ///
    /// Returns false when every resident region is locked.
    pub fn evict_one(&mut self) -> bool {
        let victim = self
            .regions
            .iter()
            .rev()
            .find(|(_, region)| region.lock_counter == 0)
            .map(|(key, _)| key.clone());

        let Some(key) = victim else {
            return false;
        };
        if let Some(region) = self.regions.pop(&key) {
            self.pool.free(region.span);
            self.evictions += 1;
            tracing::debug!(varname = %key.varname, level = key.level, "Evicted region");
        }
        true
    }

    /// Allocate pool memory for `bytes`, evicting unlocked regions as needed.
    pub fn alloc(&mut self, bytes: usize) -> Result<BlockSpan> {
        let nblocks = self.pool.blocks_for_bytes(bytes);
        loop {
            if let Some(span) = self.pool.alloc(nblocks) {
                return Ok(span);
            }
            if !self.evict_one() {
                tracing::warn!(
                    bytes,
                    entries = self.regions.len(),
                    "Region cache exhausted, nothing evictable"
                );
                return Err(DataMgrError::AllocationFailure { bytes });
            }
        }
    }

    /// Drop every region of a variable, locked or not.
    pub fn free_var(&mut self, varname: &str) -> usize {
        let keys: Vec<RegionKey> = self
            .regions
            .iter()
            .filter(|(key, _)| key.varname == varname)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(region) = self.regions.pop(key) {
                self.pool.free(region.span);
            }
        }
        keys.len()
    }

    /// Drop every region.
    pub fn clear(&mut self) {
        self.regions.clear();
        self.pool.reset();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let block_size = self.pool.block_size() as u64;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.regions.len(),
            locked_entries: self.regions.iter().filter(|(_, r)| r.lock_counter > 0).count(),
            memory_bytes: self.pool.used_blocks() as u64 * block_size,
            pool_capacity_bytes: self.pool.capacity_blocks() as u64 * block_size,
            evictions: self.evictions,
        }
    }

    /// Get the number of resident regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str, b: usize) -> RegionKey {
        RegionKey::new(0, name, 0, 0, vec![b], vec![b])
    }

    fn fill_with(value: f32) -> impl FnOnce(&mut [f32]) -> Result<()> {
        move |buf| {
            buf.fill(value);
            Ok(())
        }
    }

    #[test]
    fn test_fill_and_acquire() {
        let mut cache = RegionCache::new(1024, 64);

        assert!(cache.acquire(&key("T", 0), false).is_none());
        let a = cache.fill(key("T", 0), 4, false, fill_with(2.0)).unwrap();
        assert_eq!(&*a, &[2.0, 2.0, 2.0, 2.0]);

        let b = cache.acquire(&key("T", 0), false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.memory_bytes, 64);
    }

    #[test]
    fn test_fill_existing_key_does_not_refill() {
        let mut cache = RegionCache::new(1024, 64);
        let a = cache.fill(key("T", 0), 4, false, fill_with(1.0)).unwrap();
        let b = cache
            .fill(key("T", 0), 4, false, |_| panic!("must not refill"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lock_counting() {
        let mut cache = RegionCache::new(1024, 64);
        cache.fill(key("T", 0), 4, true, fill_with(1.0)).unwrap();
        cache.acquire(&key("T", 0), true).unwrap();
        assert_eq!(cache.lock_count(&key("T", 0)), Some(2));

        assert!(cache.release(&key("T", 0)));
        assert!(cache.release(&key("T", 0)));
        assert!(!cache.release(&key("T", 0)));
        assert_eq!(cache.lock_count(&key("T", 0)), Some(0));
        assert!(cache.contains(&key("T", 0)));
    }

    #[test]
    fn test_evicts_lru_unlocked_region() {
        // Room for two single-block regions
        let mut cache = RegionCache::new(128, 64);
        cache.fill(key("T", 0), 4, false, fill_with(0.0)).unwrap();
        cache.fill(key("T", 1), 4, false, fill_with(1.0)).unwrap();

        // Touch block 0 so block 1 becomes least recently used
        cache.acquire(&key("T", 0), false).unwrap();
        cache.fill(key("T", 2), 4, false, fill_with(2.0)).unwrap();

        assert!(cache.contains(&key("T", 0)));
        assert!(!cache.contains(&key("T", 1)));
        assert!(cache.contains(&key("T", 2)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_locked_region_is_not_evicted() {
        let mut cache = RegionCache::new(64, 64);
        cache.fill(key("T", 0), 4, true, fill_with(0.0)).unwrap();

        let err = cache.fill(key("T", 1), 4, false, fill_with(1.0)).unwrap_err();
        assert!(matches!(err, DataMgrError::AllocationFailure { .. }));
        assert!(cache.contains(&key("T", 0)));

        cache.release(&key("T", 0));
        cache.fill(key("T", 1), 4, false, fill_with(1.0)).unwrap();
        assert!(!cache.contains(&key("T", 0)));
    }

    #[test]
    fn test_failed_fill_frees_allocation() {
        let mut cache = RegionCache::new(64, 64);
        let err = cache
            .fill(key("T", 0), 4, false, |_| {
                Err(DataMgrError::invalid_metadata("bad block"))
            })
            .unwrap_err();
        assert!(matches!(err, DataMgrError::ReadFailure(_)));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().memory_bytes, 0);

        // The single pool block is available again
        cache.fill(key("T", 1), 4, false, fill_with(1.0)).unwrap();
    }

    #[test]
    fn test_evict_one_empty() {
        let mut cache = RegionCache::new(64, 64);
        assert!(!cache.evict_one());
    }

    #[test]
    fn test_free_var_and_clear() {
        let mut cache = RegionCache::new(1024, 64);
        cache.fill(key("T", 0), 4, true, fill_with(0.0)).unwrap();
        cache.fill(key("T", 1), 4, false, fill_with(0.0)).unwrap();
        cache.fill(key("P", 0), 4, false, fill_with(0.0)).unwrap();

        assert_eq!(cache.free_var("T"), 2);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().memory_bytes, 0);
    }
}
