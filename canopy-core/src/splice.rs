//! Incremental sequence edits.
//!
//! An edit rewrites the affected leaf, then re-runs the chunker from that
//! leaf's chunk start (a hasher reset point) forward until an emitted
//! boundary lines up with an original chunk boundary; from there the
//! original suffix of chunks is spliced in unchanged. The same procedure
//! recurses at each ancestor level, so an edit touches O(log n) chunks in
//! expectation while every untouched sibling keeps its hash.

use std::sync::Arc;

use crate::chunk::ChunkStore;
use crate::chunker::{put_node, LevelChunker, StreamItem};
use crate::error::{CoreError, CoreResult};
use crate::rolling::ChunkConfig;
use crate::sequence::{leaf_search, read_node, Item, MetaTuple, Node, Sequence};
use crate::value::{Kind, Value};

/// An edit against one sequence.
#[derive(Debug)]
pub(crate) enum SeqEdit {
    /// Positional splice: remove `remove` items at `at`, then insert.
    Splice {
        at: u64,
        remove: u64,
        insert: Vec<Item>,
    },
    /// Map upsert.
    MapSet { key: Value, value: Value },
    /// Set insert (no-op when present).
    SetPut { value: Value },
    /// Keyed removal for Map and Set (no-op when absent).
    KeyRemove { key: Value },
}

struct PathEntry {
    node: Arc<Node>,
    idx: usize,
}

/// Lazily yields the original stream that follows the modified region, at
/// one tree level. The stack tracks meta ancestors; `open` is a partially
/// consumed chunk at the target level. `open == None` means the stream is
/// positioned exactly at an original chunk boundary, which is the
/// convergence condition.
struct SuffixStream<'a> {
    store: &'a dyn ChunkStore,
    target: u8,
    stack: Vec<(Arc<Node>, usize)>,
    open: Option<(Arc<Node>, usize)>,
}

impl<'a> SuffixStream<'a> {
    fn from_path(store: &'a dyn ChunkStore, path: &[PathEntry]) -> Self {
        SuffixStream {
            store,
            target: 0,
            // idx+1: everything up to and including the followed child is
            // covered by the rewrite
            stack: path.iter().map(|e| (e.node.clone(), e.idx + 1)).collect(),
            open: None,
        }
    }

    fn at_chunk_start(&self) -> bool {
        self.open.is_none()
    }

    /// Next unconsumed tuple referencing a target-level chunk.
    fn next_tuple(&mut self) -> CoreResult<Option<MetaTuple>> {
        loop {
            let Some((node, idx)) = self.stack.last_mut() else {
                return Ok(None);
            };
            let tuples = node.tuples();
            if *idx >= tuples.len() {
                self.stack.pop();
                continue;
            }
            let t = tuples[*idx].clone();
            *idx += 1;
            if node.level() == self.target + 1 {
                return Ok(Some(t));
            }
            let child = read_node(self.store, &t.child)?;
            self.stack.push((child, 0));
        }
    }

    /// Next item at the target level, opening chunks as needed.
    fn next(&mut self) -> CoreResult<Option<StreamItem>> {
        loop {
            if let Some((node, pos)) = &mut self.open {
                let len = node.local_len();
                if *pos < len {
                    let item = match &**node {
                        Node::Leaf { items, .. } => StreamItem::Leaf(items.get(*pos)),
                        Node::Meta { tuples, .. } => StreamItem::Tuple(tuples[*pos].clone()),
                    };
                    *pos += 1;
                    if *pos == len {
                        self.open = None;
                    }
                    return Ok(Some(item));
                }
                self.open = None;
                continue;
            }
            match self.next_tuple()? {
                Some(t) => {
                    let node = read_node(self.store, &t.child)?;
                    self.open = Some((node, 0));
                }
                None => return Ok(None),
            }
        }
    }

    /// Move up one level: the reused chunks at the old target level become
    /// the tail items of their parent, which is the new target level.
    fn promote(mut self) -> SuffixStream<'a> {
        debug_assert!(self.open.is_none(), "promote mid-chunk");
        if let Some((node, _)) = self.stack.last() {
            if node.level() == self.target + 1 {
                // a fully spent parent is a chunk boundary, not an open chunk
                self.open = self.stack.pop().filter(|(n, i)| *i < n.local_len());
            }
        }
        self.target += 1;
        self
    }
}

/// Feed reused content until the rewritten stream re-aligns with an
/// original chunk boundary (or the sequence ends), then return the chunks
/// emitted at this level.
fn reconverge(lc: &mut LevelChunker, suffix: &mut SuffixStream) -> CoreResult<Vec<MetaTuple>> {
    loop {
        if lc.pending_is_empty() && suffix.at_chunk_start() {
            // an emitted boundary coincides with an original one; the rest
            // of the original chunks replay identically and are reused
            break;
        }
        match suffix.next()? {
            Some(item) => lc.push(item)?,
            None => {
                lc.flush()?;
                break;
            }
        }
    }
    Ok(lc.take_emitted())
}

/// Fold a run of same-level chunk tuples into a single canonical root.
pub(crate) fn reduce_to_root(
    store: &dyn ChunkStore,
    config: ChunkConfig,
    kind: Kind,
    mut tuples: Vec<MetaTuple>,
    mut level: u8,
) -> CoreResult<Sequence> {
    if tuples.is_empty() {
        let node = Node::empty_leaf(kind);
        put_node(store, &node)?;
        return Ok(Sequence::new(node));
    }
    while tuples.len() > 1 {
        if level == u8::MAX {
            return Err(CoreError::InvariantViolation(
                "tree depth limit exceeded".into(),
            ));
        }
        level += 1;
        let mut lc = LevelChunker::new(store, config, kind, level);
        for t in tuples {
            lc.push(StreamItem::Tuple(t))?;
        }
        lc.flush()?;
        tuples = lc.take_emitted();
    }
    let node = read_node(store, &tuples[0].child)?;
    let node = crate::chunker::normalize_root(store, node)?;
    Ok(Sequence::from_arc(node))
}

fn locate_index(
    store: &dyn ChunkStore,
    root: Arc<Node>,
    index: u64,
) -> CoreResult<(Vec<PathEntry>, Arc<Node>, usize)> {
    let mut path = Vec::new();
    let mut node = root;
    let mut i = index;
    loop {
        if node.is_leaf() {
            return Ok((path, node, i as usize));
        }
        let tuples = node.tuples();
        let mut chosen = None;
        let mut local = i;
        for (ti, t) in tuples.iter().enumerate() {
            if local < t.count {
                chosen = Some((ti, local));
                break;
            }
            local -= t.count;
        }
        // index == total count: descend rightmost for an end insert
        let (ti, local) = chosen.unwrap_or_else(|| {
            let last = tuples.len() - 1;
            (last, tuples[last].count)
        });
        let child = read_node(store, &tuples[ti].child)?;
        path.push(PathEntry {
            node: node.clone(),
            idx: ti,
        });
        node = child;
        i = local;
    }
}

fn locate_key(
    store: &dyn ChunkStore,
    root: Arc<Node>,
    key: &Value,
) -> CoreResult<(Vec<PathEntry>, Arc<Node>, usize, bool)> {
    let mut path = Vec::new();
    let mut node = root;
    loop {
        if let Some(items) = node.leaf_items() {
            let (pos, found) = leaf_search(items, key);
            return Ok((path, node, pos, found));
        }
        let tuples = node.tuples();
        let mut idx =
            tuples.partition_point(|t| t.key.compare_value(key) == std::cmp::Ordering::Less);
        if idx == tuples.len() {
            // key beyond the maximum: rightmost leaf takes the insert
            idx = tuples.len() - 1;
        }
        let child = read_node(store, &tuples[idx].child)?;
        path.push(PathEntry {
            node: node.clone(),
            idx,
        });
        node = child;
    }
}

/// Apply one edit, returning the new sequence. Unchanged subtrees are
/// shared with the original; the terminal state is a new root.
pub(crate) fn edit_sequence(
    store: &dyn ChunkStore,
    config: ChunkConfig,
    seq: &Sequence,
    edit: SeqEdit,
) -> CoreResult<Sequence> {
    let kind = seq.kind();
    let root = seq.node_arc();

    // Locating
    let (path, leaf, pos, remove, insert) = match edit {
        SeqEdit::Splice { at, remove, insert } => {
            let len = seq.len();
            if at > len {
                return Err(CoreError::OutOfBounds { index: at, len });
            }
            let remove = remove.min(len - at);
            let (path, leaf, pos) = locate_index(store, root, at)?;
            (path, leaf, pos, remove, insert)
        }
        SeqEdit::MapSet { key, value } => {
            let (path, leaf, pos, found) = locate_key(store, root, &key)?;
            if found {
                if let Some(items) = leaf.leaf_items() {
                    if let Item::Entry(_, existing) = items.get(pos) {
                        if existing.equals(&value) {
                            return Ok(seq.clone());
                        }
                    }
                }
            }
            (path, leaf, pos, found as u64, vec![Item::Entry(key, value)])
        }
        SeqEdit::SetPut { value } => {
            let (path, leaf, pos, found) = locate_key(store, root, &value)?;
            if found {
                return Ok(seq.clone());
            }
            (path, leaf, pos, 0, vec![Item::Value(value)])
        }
        SeqEdit::KeyRemove { key } => {
            let (path, leaf, pos, found) = locate_key(store, root, &key)?;
            if !found {
                return Ok(seq.clone());
            }
            (path, leaf, pos, 1, vec![])
        }
    };

    // Rewriting: re-chunk from the modified leaf's start.
    let items = leaf.leaf_items().ok_or_else(|| {
        CoreError::InvariantViolation("located a meta node instead of a leaf".into())
    })?;
    let mut lc = LevelChunker::new(store, config, kind, 0);
    for i in 0..pos {
        lc.push(StreamItem::Leaf(items.get(i)))?;
    }
    for it in insert {
        lc.push(StreamItem::Leaf(it))?;
    }
    let leaf_tail_skip = remove.min((items.len() - pos) as u64) as usize;
    let mut remaining_remove = remove - leaf_tail_skip as u64;
    for i in (pos + leaf_tail_skip)..items.len() {
        lc.push(StreamItem::Leaf(items.get(i)))?;
    }
    let mut suffix = SuffixStream::from_path(store, &path);
    while remaining_remove > 0 {
        if suffix.next()?.is_none() {
            break;
        }
        remaining_remove -= 1;
    }

    // Reconverging
    let mut repl = reconverge(&mut lc, &mut suffix)?;

    // Promoting: splice each ancestor level in turn.
    for entry in path.iter().rev() {
        suffix = suffix.promote();
        let mut lc = LevelChunker::new(store, config, kind, entry.node.level());
        for t in &entry.node.tuples()[..entry.idx] {
            lc.push(StreamItem::Tuple(t.clone()))?;
        }
        for t in repl {
            lc.push(StreamItem::Tuple(t))?;
        }
        repl = reconverge(&mut lc, &mut suffix)?;
    }

    let top_level = path.first().map(|e| e.node.level()).unwrap_or(0);
    reduce_to_root(store, config, kind, repl, top_level)
}
