//! Cursor for traversing sequences in order.
//!
//! Abstracts away the leaf/meta structure and yields items in sequence
//! order, reading child chunks lazily from the store.

use std::sync::Arc;

use crate::chunk::ChunkStore;
use crate::error::CoreResult;
use crate::sequence::{read_node, Item, Node};

/// In-order traversal over a sequence tree.
///
/// The stack holds `(node, index)` pairs; the index points at the next
/// unvisited item (leaf) or child tuple (meta).
pub struct SequenceCursor<'a> {
    store: &'a dyn ChunkStore,
    stack: Vec<(Arc<Node>, usize)>,
}

impl<'a> SequenceCursor<'a> {
    /// Position a cursor at the first item of the tree rooted at `root`.
    pub fn new(store: &'a dyn ChunkStore, root: Arc<Node>) -> CoreResult<Self> {
        let mut cursor = SequenceCursor {
            store,
            stack: Vec::new(),
        };
        cursor.descend_to_first(root)?;
        Ok(cursor)
    }

    fn descend_to_first(&mut self, node: Arc<Node>) -> CoreResult<()> {
        let mut node = node;
        loop {
            match &*node {
                Node::Leaf { .. } => {
                    self.stack.push((node, 0));
                    return Ok(());
                }
                Node::Meta { tuples, .. } => {
                    if tuples.is_empty() {
                        // decoder forbids this; tolerate for robustness
                        return Ok(());
                    }
                    let child = read_node(self.store, &tuples[0].child)?;
                    self.stack.push((node, 0));
                    node = child;
                }
            }
        }
    }

    /// Advance and return the next item, or None when exhausted.
    pub fn next(&mut self) -> CoreResult<Option<Item>> {
        loop {
            let (node, idx) = match self.stack.last() {
                Some((n, i)) => (n.clone(), *i),
                None => return Ok(None),
            };
            match &*node {
                Node::Leaf { items, .. } => {
                    if idx < items.len() {
                        let item = items.get(idx);
                        if let Some(top) = self.stack.last_mut() {
                            top.1 = idx + 1;
                        }
                        if idx + 1 == items.len() {
                            self.stack.pop();
                            self.advance_to_next_leaf()?;
                        }
                        return Ok(Some(item));
                    }
                    self.stack.pop();
                    self.advance_to_next_leaf()?;
                }
                Node::Meta { tuples, .. } => {
                    // Mid-traversal we only sit on metas transiently.
                    if idx < tuples.len() {
                        let child = read_node(self.store, &tuples[idx].child)?;
                        self.descend_to_first(child)?;
                    } else {
                        self.stack.pop();
                        self.advance_to_next_leaf()?;
                    }
                }
            }
        }
    }

    /// After exhausting a leaf, move to the first item of the next one.
    fn advance_to_next_leaf(&mut self) -> CoreResult<()> {
        while let Some((node, idx)) = self.stack.last().map(|(n, i)| (n.clone(), *i)) {
            match &*node {
                Node::Meta { tuples, .. } => {
                    let next_idx = idx + 1;
                    if next_idx < tuples.len() {
                        if let Some(top) = self.stack.last_mut() {
                            top.1 = next_idx;
                        }
                        let child = read_node(self.store, &tuples[next_idx].child)?;
                        self.descend_to_first(child)?;
                        return Ok(());
                    }
                    self.stack.pop();
                }
                Node::Leaf { .. } => {
                    self.stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Collect everything remaining. Convenience for tests and small trees.
    pub fn collect_items(mut self) -> CoreResult<Vec<Item>> {
        let mut out = Vec::new();
        while let Some(item) = self.next()? {
            out.push(item);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MemoryChunkStore;
    use crate::encoding;
    use crate::hash::Hash;
    use crate::sequence::{LeafItems, MetaTuple, OrderKey};
    use crate::value::{Kind, Value};

    fn store_leaf(store: &MemoryChunkStore, values: Vec<f64>) -> (Hash, u64) {
        let node = Node::Leaf {
            kind: Kind::List,
            items: LeafItems::Values(values.iter().map(|n| Value::number(*n)).collect()),
        };
        let bytes = encoding::encode_node(&node);
        let hash = Hash::of(&bytes);
        store.put(&hash, &bytes).unwrap();
        (hash, values.len() as u64)
    }

    #[test]
    fn test_cursor_single_leaf() {
        let store = MemoryChunkStore::new();
        let node = Arc::new(Node::Leaf {
            kind: Kind::List,
            items: LeafItems::Values(vec![Value::number(1.0), Value::number(2.0)]),
        });
        let mut cursor = SequenceCursor::new(&store, node).unwrap();
        assert_eq!(
            cursor.next().unwrap().unwrap().into_value().unwrap().as_number(),
            Some(1.0)
        );
        assert_eq!(
            cursor.next().unwrap().unwrap().into_value().unwrap().as_number(),
            Some(2.0)
        );
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn test_cursor_across_meta_node() {
        let store = MemoryChunkStore::new();
        let (left, lc) = store_leaf(&store, vec![1.0, 2.0]);
        let (right, rc) = store_leaf(&store, vec![3.0, 4.0, 5.0]);
        let meta = Arc::new(Node::Meta {
            kind: Kind::List,
            level: 1,
            tuples: vec![
                MetaTuple {
                    child: left,
                    key: OrderKey::Index(lc),
                    count: lc,
                },
                MetaTuple {
                    child: right,
                    key: OrderKey::Index(rc),
                    count: rc,
                },
            ],
        });

        let cursor = SequenceCursor::new(&store, meta).unwrap();
        let items = cursor.collect_items().unwrap();
        let numbers: Vec<f64> = items
            .into_iter()
            .map(|i| i.into_value().unwrap().as_number().unwrap())
            .collect();
        assert_eq!(numbers, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_cursor_empty_leaf() {
        let store = MemoryChunkStore::new();
        let node = Arc::new(Node::empty_leaf(Kind::List));
        let mut cursor = SequenceCursor::new(&store, node).unwrap();
        assert!(cursor.next().unwrap().is_none());
    }
}
