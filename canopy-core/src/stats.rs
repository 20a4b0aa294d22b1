//! Chunk statistics over a reachable set.

use crate::chunk::ChunkStore;
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::gc::find_reachable;
use crate::hash::Hash;

/// Size and shape summary of the chunks reachable from a root set.
#[derive(Debug, Clone, Default)]
pub struct ChunkStats {
    pub chunks: usize,
    pub leaf_chunks: usize,
    pub meta_chunks: usize,
    /// Commits, schema chunks, and other non-sequence values.
    pub other_chunks: usize,
    pub total_bytes: u64,
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl ChunkStats {
    pub fn avg_bytes(&self) -> f64 {
        if self.chunks == 0 {
            0.0
        } else {
            self.total_bytes as f64 / self.chunks as f64
        }
    }
}

/// Walk the chunks reachable from `roots` and summarize them.
pub fn chunk_stats(store: &dyn ChunkStore, roots: &[Hash]) -> CoreResult<ChunkStats> {
    let mut stats = ChunkStats {
        min_bytes: u64::MAX,
        ..Default::default()
    };
    for hash in find_reachable(store, roots)? {
        let bytes = store
            .get(&hash)?
            .ok_or_else(|| CoreError::NotFound(format!("chunk {}", hash)))?;
        let size = bytes.len() as u64;
        stats.chunks += 1;
        stats.total_bytes += size;
        stats.min_bytes = stats.min_bytes.min(size);
        stats.max_bytes = stats.max_bytes.max(size);

        let value = encoding::decode_value(&bytes)?;
        match value.sequence() {
            Some(seq) if seq.node().level() > 0 => stats.meta_chunks += 1,
            Some(_) => stats.leaf_chunks += 1,
            None => stats.other_chunks += 1,
        }
    }
    if stats.chunks == 0 {
        stats.min_bytes = 0;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MemoryChunkStore;
    use crate::dataset::Dataset;
    use crate::gc::live_roots;
    use crate::rolling::ChunkConfig;
    use crate::value::Value;
    use crate::valuestore::ValueStore;
    use std::sync::Arc;

    #[test]
    fn test_stats_classify_chunks() {
        let store = Arc::new(MemoryChunkStore::new());
        let vs = ValueStore::new(store.clone(), ChunkConfig::small_test());
        let ds = Dataset::new(vs.clone(), "main").unwrap();
        let list = vs
            .new_list((0..1500).map(|i| Value::number(i as f64)).collect())
            .unwrap();
        ds.commit(list).unwrap();

        let roots = live_roots(store.as_ref()).unwrap();
        let stats = chunk_stats(store.as_ref(), &roots).unwrap();
        assert!(stats.leaf_chunks > 1, "large list should span leaves");
        assert!(stats.meta_chunks >= 1);
        // the commit struct and its schema at minimum
        assert!(stats.other_chunks >= 2);
        assert_eq!(
            stats.chunks,
            stats.leaf_chunks + stats.meta_chunks + stats.other_chunks
        );
        assert!(stats.min_bytes <= stats.max_bytes);
        assert!(stats.avg_bytes() > 0.0);
    }
}
