//! Streaming bottom-up prolly tree construction.
//!
//! The builder receives items in order. A leaf-level rolling hasher consumes
//! each item's encoding; on boundary the pending run becomes a stored chunk
//! whose meta tuple cascades one level up, where a hasher with the next
//! level's salt consumes tuple encodings, and so on. When the stream ends,
//! partial runs flush upward and the root is the unique chunk not folded
//! into a parent.

use crate::chunk::ChunkStore;
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::hash::Hash;
use crate::rolling::{ChunkConfig, RollingValueHasher};
use crate::sequence::{read_node, Item, LeafItems, MetaTuple, Node, Sequence};
use crate::value::Kind;
use std::sync::Arc;

/// One element of a per-level chunk stream: a leaf item at level 0, a meta
/// tuple above.
#[derive(Debug, Clone)]
pub(crate) enum StreamItem {
    Leaf(Item),
    Tuple(MetaTuple),
}

impl StreamItem {
    fn encode(&self) -> Vec<u8> {
        match self {
            StreamItem::Leaf(item) => encoding::encode_item(item),
            StreamItem::Tuple(t) => encoding::encode_tuple(t),
        }
    }
}

/// The run of items accumulated since the last boundary at one level.
#[derive(Debug)]
pub(crate) enum PendingRun {
    Items(Kind, LeafItems),
    Tuples(Kind, u8, Vec<MetaTuple>),
}

impl PendingRun {
    fn new(kind: Kind, level: u8) -> Self {
        if level == 0 {
            PendingRun::Items(kind, LeafItems::empty_for(kind))
        } else {
            PendingRun::Tuples(kind, level, Vec::new())
        }
    }

    fn push(&mut self, item: StreamItem) {
        match (self, item) {
            (PendingRun::Items(_, items), StreamItem::Leaf(i)) => items.push(i),
            (PendingRun::Tuples(_, _, ts), StreamItem::Tuple(t)) => ts.push(t),
            _ => unreachable!("stream item level does not match chunker level"),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            PendingRun::Items(_, items) => items.is_empty(),
            PendingRun::Tuples(_, _, ts) => ts.is_empty(),
        }
    }

    fn into_node(self) -> Node {
        match self {
            PendingRun::Items(kind, items) => Node::Leaf { kind, items },
            PendingRun::Tuples(kind, level, tuples) => Node::Meta {
                kind,
                level,
                tuples,
            },
        }
    }
}

/// Encode, hash, and persist a run as one chunk; return its meta tuple.
pub(crate) fn store_run(store: &dyn ChunkStore, run: PendingRun) -> CoreResult<MetaTuple> {
    let node = run.into_node();
    let key = node.max_key().ok_or_else(|| {
        CoreError::InvariantViolation("attempted to store an empty chunk".into())
    })?;
    let count = node.count();
    let bytes = encoding::encode_node(&node);
    let hash = Hash::of(&bytes);
    store.put(&hash, &bytes)?;
    Ok(MetaTuple {
        child: hash,
        key,
        count,
    })
}

/// Persist a node as a chunk, returning its hash.
pub(crate) fn put_node(store: &dyn ChunkStore, node: &Node) -> CoreResult<Hash> {
    let bytes = encoding::encode_node(node);
    let hash = Hash::of(&bytes);
    store.put(&hash, &bytes)?;
    Ok(hash)
}

/// A root that is a meta node with a single child collapses to that child,
/// repeatedly, so the canonical root carries real fan-out.
pub(crate) fn normalize_root(
    store: &dyn ChunkStore,
    mut node: Arc<Node>,
) -> CoreResult<Arc<Node>> {
    loop {
        let single = match &*node {
            Node::Meta { tuples, .. } if tuples.len() == 1 => Some(tuples[0].child),
            _ => None,
        };
        match single {
            Some(child) => node = read_node(store, &child)?,
            None => return Ok(node),
        }
    }
}

/// Chunker for a single tree level: accumulates a run, feeds the rolling
/// hasher, and emits stored chunks at content-defined boundaries.
///
/// Used standalone by the splice engine; [`SequenceChunker`] wires one per
/// level with cascade.
pub(crate) struct LevelChunker<'a> {
    store: &'a dyn ChunkStore,
    kind: Kind,
    level: u8,
    hasher: RollingValueHasher,
    pending: PendingRun,
    emitted: Vec<MetaTuple>,
}

impl<'a> LevelChunker<'a> {
    pub fn new(store: &'a dyn ChunkStore, config: ChunkConfig, kind: Kind, level: u8) -> Self {
        LevelChunker {
            store,
            kind,
            level,
            hasher: RollingValueHasher::new(config, level),
            pending: PendingRun::new(kind, level),
            emitted: Vec::new(),
        }
    }

    pub fn push(&mut self, item: StreamItem) -> CoreResult<()> {
        let bytes = item.encode();
        self.pending.push(item);
        if self.hasher.hash_bytes(&bytes) {
            self.close()?;
        }
        Ok(())
    }

    fn close(&mut self) -> CoreResult<()> {
        let run = std::mem::replace(&mut self.pending, PendingRun::new(self.kind, self.level));
        self.hasher.reset();
        let tuple = store_run(self.store, run)?;
        self.emitted.push(tuple);
        Ok(())
    }

    /// Close the trailing partial run, if any. The end of the stream
    /// terminates a chunk just as a boundary does.
    pub fn flush(&mut self) -> CoreResult<()> {
        if !self.pending.is_empty() {
            self.close()?;
        }
        Ok(())
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn emitted_is_empty(&self) -> bool {
        self.emitted.is_empty()
    }

    pub fn take_emitted(&mut self) -> Vec<MetaTuple> {
        std::mem::take(&mut self.emitted)
    }

    fn take_pending(&mut self) -> PendingRun {
        std::mem::replace(&mut self.pending, PendingRun::new(self.kind, self.level))
    }
}

/// Streaming builder for a whole sequence.
pub struct SequenceChunker<'a> {
    store: &'a dyn ChunkStore,
    config: ChunkConfig,
    kind: Kind,
    levels: Vec<LevelChunker<'a>>,
}

impl<'a> SequenceChunker<'a> {
    pub fn new(store: &'a dyn ChunkStore, config: ChunkConfig, kind: Kind) -> Self {
        debug_assert!(kind.is_sequence());
        SequenceChunker {
            store,
            config,
            kind,
            levels: vec![LevelChunker::new(store, config, kind, 0)],
        }
    }

    /// Append the next item of the sequence.
    pub fn append(&mut self, item: Item) -> CoreResult<()> {
        self.levels[0].push(StreamItem::Leaf(item))?;
        self.cascade()
    }

    fn ensure_level(&mut self, level: usize) {
        while self.levels.len() <= level {
            let l = self.levels.len() as u8;
            self.levels
                .push(LevelChunker::new(self.store, self.config, self.kind, l));
        }
    }

    /// Move freshly emitted chunk tuples up one level at a time.
    fn cascade(&mut self) -> CoreResult<()> {
        let mut i = 0;
        while i < self.levels.len() {
            let emitted = self.levels[i].take_emitted();
            if emitted.is_empty() {
                i += 1;
                continue;
            }
            self.ensure_level(i + 1);
            for t in emitted {
                self.levels[i + 1].push(StreamItem::Tuple(t))?;
            }
            i += 1;
        }
        Ok(())
    }

    /// Terminate the stream and return the finished sequence. Flushes
    /// partial runs bottom-up; the top level's pending run becomes the root.
    pub fn done(mut self) -> CoreResult<Sequence> {
        let mut i = 0;
        loop {
            let is_top = i == self.levels.len() - 1;
            if is_top && self.levels[i].emitted_is_empty() {
                break;
            }
            self.levels[i].flush()?;
            let emitted = self.levels[i].take_emitted();
            self.ensure_level(i + 1);
            for t in emitted {
                self.levels[i + 1].push(StreamItem::Tuple(t))?;
            }
            i += 1;
        }

        // Interior chunks are persisted as they are cut; the root itself is
        // only written when the value is (write_value, commit), so a value
        // embedded inline in a parent leaves no orphan behind.
        let top = self.levels.len() - 1;
        let run = self.levels[top].take_pending();
        if top == 0 {
            // Whole sequence fits in one leaf; an empty sequence encodes as
            // a single empty leaf chunk with a well-defined hash.
            return Ok(Sequence::new(run.into_node()));
        }
        if run.is_empty() {
            return Err(CoreError::InvariantViolation(
                "chunker top level lost its pending run".into(),
            ));
        }
        let node = normalize_root(self.store, Arc::new(run.into_node()))?;
        Ok(Sequence::from_arc(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MemoryChunkStore;
    use crate::cursor::SequenceCursor;
    use crate::value::Value;

    fn build_list(store: &MemoryChunkStore, config: ChunkConfig, n: u64) -> Sequence {
        let mut chunker = SequenceChunker::new(store, config, Kind::List);
        for i in 0..n {
            chunker.append(Item::Value(Value::number(i as f64))).unwrap();
        }
        chunker.done().unwrap()
    }

    #[test]
    fn test_empty_sequence_is_single_leaf() {
        let store = MemoryChunkStore::new();
        let chunker = SequenceChunker::new(&store, ChunkConfig::small_test(), Kind::List);
        let seq = chunker.done().unwrap();
        assert_eq!(seq.len(), 0);
        assert_eq!(seq.node().level(), 0);
        // the empty root is a well-defined hash
        let again = SequenceChunker::new(&store, ChunkConfig::small_test(), Kind::List);
        assert_eq!(seq.hash(), again.done().unwrap().hash());
    }

    #[test]
    fn test_small_sequence_stays_leaf() {
        let store = MemoryChunkStore::new();
        let seq = build_list(&store, ChunkConfig::production(), 3);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.node().level(), 0);
    }

    #[test]
    fn test_large_sequence_grows_levels() {
        let store = MemoryChunkStore::new();
        let seq = build_list(&store, ChunkConfig::small_test(), 2000);
        assert_eq!(seq.len(), 2000);
        assert!(seq.node().level() >= 1, "expected a multi-level tree");
        // exact counts all the way down
        assert_eq!(seq.node().validate(&store).unwrap(), 2000);
    }

    #[test]
    fn test_build_is_deterministic() {
        let s1 = MemoryChunkStore::new();
        let s2 = MemoryChunkStore::new();
        let a = build_list(&s1, ChunkConfig::small_test(), 1234);
        let b = build_list(&s2, ChunkConfig::small_test(), 1234);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_build_round_trips_items() {
        let store = MemoryChunkStore::new();
        let seq = build_list(&store, ChunkConfig::small_test(), 500);
        let cursor = SequenceCursor::new(&store, seq.node_arc()).unwrap();
        let items = cursor.collect_items().unwrap();
        assert_eq!(items.len(), 500);
        for (i, item) in items.into_iter().enumerate() {
            assert_eq!(item.into_value().unwrap().as_number(), Some(i as f64));
        }
    }

    #[test]
    fn test_chunking_params_change_root() {
        let s1 = MemoryChunkStore::new();
        let s2 = MemoryChunkStore::new();
        let a = build_list(&s1, ChunkConfig::small_test(), 2000);
        let b = build_list(&s2, ChunkConfig::production(), 2000);
        // parameters are part of the store's identity
        assert_ne!(a.hash(), b.hash());
    }
}
