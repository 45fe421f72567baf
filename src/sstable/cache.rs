use super::block::Block;
use ahash::AHashMap;
use std::sync::Arc;

#[derive(Debug)]
struct Cached {
    block: Arc<Block>,
    hits: usize,
}

/// Decoded blocks kept for point lookups, keyed by block number. When the cache
/// is full the block with the fewest hits goes. Every eviction halves the hit
/// counters of the remaining blocks, so blocks that were popular long ago do
/// not stay forever.
#[derive(Debug)]
pub struct BlockCache {
    map: AHashMap<usize, Cached>,
    cap: usize,
}

impl BlockCache {
    pub fn new(cap: usize) -> Self {
        Self {
            map: AHashMap::with_capacity(cap),
            cap,
        }
    }

    pub fn get(&mut self, id: usize) -> Option<Arc<Block>> {
        self.map.get_mut(&id).map(|cached| {
            cached.hits += 1;
            cached.block.clone()
        })
    }

    pub fn insert(&mut self, id: usize, block: Arc<Block>) {
        if self.cap == 0 {
            return;
        }

        if !self.map.contains_key(&id) && self.map.len() >= self.cap {
            self.evict();
        }

        self.map.insert(id, Cached { block, hits: 1 });
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    fn evict(&mut self) {
        let coldest = self
            .map
            .iter()
            .min_by_key(|(id, cached)| (cached.hits, **id))
            .map(|(id, _)| *id);

        if let Some(id) = coldest {
            self.map.remove(&id);
        }

        for cached in self.map.values_mut() {
            cached.hits /= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::block::encode_block;
    use crate::Compression;
    use bytes::Bytes;

    fn block(key: &str) -> Arc<Block> {
        let raw = encode_block(&[(Bytes::from(key.to_string()), Bytes::from("v"))], Compression::None)
            .unwrap();
        Arc::new(Block::decode(&raw, Compression::None).unwrap())
    }

    #[test]
    fn test_get_insert() {
        let mut cache = BlockCache::new(2);
        assert!(cache.get(0).is_none());
        cache.insert(0, block("a"));
        assert_eq!(cache.get(0).unwrap().key(0), b"a");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_hit() {
        let mut cache = BlockCache::new(2);
        cache.insert(0, block("a"));
        cache.insert(1, block("b"));
        for _ in 0..3 {
            cache.get(0);
        }

        cache.insert(2, block("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(0).is_some());
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = BlockCache::new(2);
        cache.insert(0, block("a"));
        cache.insert(1, block("b"));
        cache.insert(1, block("b"));
        assert!(cache.get(0).is_some());
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn test_zero_capacity() {
        let mut cache = BlockCache::new(0);
        cache.insert(0, block("a"));
        assert_eq!(cache.len(), 0);
        assert!(cache.get(0).is_none());
    }
}
