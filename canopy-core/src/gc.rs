//! Garbage identification for the chunk store.
//!
//! Walks the value graph from live dataset heads via `child_hashes` and
//! compares against everything stored. The core only identifies garbage and
//! deletes on explicit request; retention policy stays with the caller.

use std::collections::HashSet;

use crate::chunk::ChunkStore;
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::hash::Hash;

/// Statistics from a garbage collection pass.
#[derive(Debug, Clone)]
pub struct GcStats {
    pub total_chunks: usize,
    pub reachable_chunks: usize,
    pub garbage_chunks: usize,
}

impl GcStats {
    pub fn garbage_percent(&self) -> f64 {
        if self.total_chunks == 0 {
            0.0
        } else {
            (self.garbage_chunks as f64 / self.total_chunks as f64) * 100.0
        }
    }
}

/// All chunks reachable from the given roots, including the roots.
///
/// # Errors
///
/// [`CoreError::NotFound`] when a referenced chunk is absent; a dangling
/// edge under a live root means the store is incomplete.
pub fn find_reachable(store: &dyn ChunkStore, roots: &[Hash]) -> CoreResult<HashSet<Hash>> {
    let mut reachable: HashSet<Hash> = HashSet::new();
    let mut to_visit: Vec<Hash> = roots.to_vec();

    while let Some(hash) = to_visit.pop() {
        if !reachable.insert(hash) {
            continue;
        }
        let bytes = store
            .get(&hash)?
            .ok_or_else(|| CoreError::NotFound(format!("chunk {} under live root", hash)))?;
        let value = encoding::decode_value(&bytes)?;
        for child in value.child_hashes() {
            if !reachable.contains(&child) {
                to_visit.push(child);
            }
        }
    }

    Ok(reachable)
}

/// Current dataset heads: the GC root set.
pub fn live_roots(store: &dyn ChunkStore) -> CoreResult<Vec<Hash>> {
    Ok(store.list_roots()?.into_iter().map(|(_, h)| h).collect())
}

/// Chunks unreachable from the given roots.
pub fn find_garbage(store: &dyn ChunkStore, roots: &[Hash]) -> CoreResult<Vec<Hash>> {
    let reachable = find_reachable(store, roots)?;
    let mut garbage: Vec<Hash> = store
        .list_chunks()?
        .into_iter()
        .filter(|h| !reachable.contains(h))
        .collect();
    garbage.sort();
    Ok(garbage)
}

/// Report reachability statistics without deleting anything.
pub fn gc_stats(store: &dyn ChunkStore, roots: &[Hash]) -> CoreResult<GcStats> {
    let reachable = find_reachable(store, roots)?;
    let total = store.chunk_count()?;
    let reachable_count = store
        .list_chunks()?
        .into_iter()
        .filter(|h| reachable.contains(h))
        .count();
    Ok(GcStats {
        total_chunks: total,
        reachable_chunks: reachable_count,
        garbage_chunks: total - reachable_count,
    })
}

/// Delete everything unreachable from the given roots.
pub fn sweep(store: &dyn ChunkStore, roots: &[Hash]) -> CoreResult<GcStats> {
    let garbage = find_garbage(store, roots)?;
    let total = store.chunk_count()?;
    for hash in &garbage {
        store.delete(hash)?;
    }
    Ok(GcStats {
        total_chunks: total,
        reachable_chunks: total - garbage.len(),
        garbage_chunks: garbage.len(),
    })
}
