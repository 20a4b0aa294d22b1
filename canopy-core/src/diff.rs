//! Chunk-level diff between two value roots.
//!
//! Because chunk boundaries are content-defined, two versions of a large
//! value share almost all of their chunks; the diff of their reachable sets
//! measures exactly what an edit disturbed and what a sync would transfer.

use crate::chunk::ChunkStore;
use crate::error::CoreResult;
use crate::gc::find_reachable;
use crate::hash::Hash;

/// Result of comparing two reachable chunk sets.
#[derive(Debug, Clone)]
pub struct ChunkDiff {
    /// Present under `new` but not under `old`.
    pub added: Vec<Hash>,
    /// Present under `old` but not under `new`.
    pub removed: Vec<Hash>,
    /// Present under both.
    pub shared: usize,
}

impl ChunkDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare the chunks reachable from two roots.
pub fn diff_chunks(store: &dyn ChunkStore, old: &Hash, new: &Hash) -> CoreResult<ChunkDiff> {
    if old == new {
        let shared = find_reachable(store, &[*old])?.len();
        return Ok(ChunkDiff {
            added: Vec::new(),
            removed: Vec::new(),
            shared,
        });
    }
    let old_set = find_reachable(store, &[*old])?;
    let new_set = find_reachable(store, &[*new])?;

    let mut added: Vec<Hash> = new_set.difference(&old_set).copied().collect();
    let mut removed: Vec<Hash> = old_set.difference(&new_set).copied().collect();
    added.sort();
    removed.sort();
    let shared = new_set.intersection(&old_set).count();

    Ok(ChunkDiff {
        added,
        removed,
        shared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MemoryChunkStore;
    use crate::rolling::ChunkConfig;
    use crate::value::Value;
    use crate::valuestore::ValueStore;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryChunkStore>, ValueStore) {
        let store = Arc::new(MemoryChunkStore::new());
        let vs = ValueStore::new(store.clone(), ChunkConfig::small_test());
        (store, vs)
    }

    #[test]
    fn test_identical_roots_diff_empty() {
        let (store, vs) = setup();
        let list = vs
            .new_list((0..200).map(|i| Value::number(i as f64)).collect())
            .unwrap();
        let h = vs.write_value(&list).unwrap();
        let diff = diff_chunks(store.as_ref(), &h, &h).unwrap();
        assert!(diff.is_empty());
        assert!(diff.shared > 0);
    }

    #[test]
    fn test_single_edit_disturbs_few_chunks() {
        let (store, vs) = setup();
        let list = vs
            .new_list((0..2000).map(|i| Value::number(i as f64)).collect())
            .unwrap();
        let edited = vs.list_set(&list, 1000, Value::number(-1.0)).unwrap();
        let old_root = vs.write_value(&list).unwrap();
        let new_root = vs.write_value(&edited).unwrap();

        let diff = diff_chunks(store.as_ref(), &old_root, &new_root).unwrap();
        assert!(!diff.is_empty());
        // an edit touches the root-to-leaf path and at most a couple of
        // neighbours per level
        let total = diff.shared + diff.removed.len();
        assert!(
            diff.added.len() * 4 < total,
            "edit rewrote {} of {} chunks",
            diff.added.len(),
            total
        );
        assert!(diff.shared > 0, "edit must share structure");
    }

    #[test]
    fn test_disjoint_values_share_nothing() {
        let (store, vs) = setup();
        let a = vs.new_string("entirely one thing").unwrap();
        let b = vs.new_string("another thing entirely").unwrap();
        let ha = vs.write_value(&a).unwrap();
        let hb = vs.write_value(&b).unwrap();
        let diff = diff_chunks(store.as_ref(), &ha, &hb).unwrap();
        assert_eq!(diff.shared, 0);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed.len(), 1);
    }
}
