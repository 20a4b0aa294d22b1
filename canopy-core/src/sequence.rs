//! Sequence nodes: the tree representation shared by List, Map, Set, String,
//! and Blob.
//!
//! A node is either a leaf holding a contiguous run of items, or a meta node
//! holding `(childHash, orderingKey, subtreeCount)` tuples. Meta nodes are
//! strictly ordered by their contained keys and counts are exact: the sum of
//! children's counts equals the parent's total.

use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use crate::chunk::ChunkStore;
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::hash::Hash;
use crate::value::{Kind, Value};

/// Ordering key carried by a meta tuple: the subtree item count for
/// positional sequences, or the subtree's maximum key for keyed ones.
#[derive(Debug, Clone)]
pub enum OrderKey {
    Index(u64),
    ByValue(Value),
}

impl OrderKey {
    /// Compare a keyed tuple's key against a search key.
    pub(crate) fn compare_value(&self, target: &Value) -> Ordering {
        match self {
            OrderKey::ByValue(v) => v.compare(target),
            // Positional keys are never compared against values.
            OrderKey::Index(_) => Ordering::Less,
        }
    }

    pub(crate) fn compare(&self, other: &OrderKey) -> Ordering {
        match (self, other) {
            (OrderKey::Index(a), OrderKey::Index(b)) => a.cmp(b),
            (OrderKey::ByValue(a), OrderKey::ByValue(b)) => a.compare(b),
            (OrderKey::Index(_), OrderKey::ByValue(_)) => Ordering::Less,
            (OrderKey::ByValue(_), OrderKey::Index(_)) => Ordering::Greater,
        }
    }
}

/// One child reference inside a meta node.
#[derive(Debug, Clone)]
pub struct MetaTuple {
    pub child: Hash,
    pub key: OrderKey,
    pub count: u64,
}

/// A single sequence item, polymorphic over the sequence kind.
#[derive(Debug, Clone)]
pub enum Item {
    /// String/Blob content byte.
    Byte(u8),
    /// List element or Set member.
    Value(Value),
    /// Map entry.
    Entry(Value, Value),
}

impl Item {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Item::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_entry(self) -> Option<(Value, Value)> {
        match self {
            Item::Entry(k, v) => Some((k, v)),
            _ => None,
        }
    }

    /// The ordering key of this item within a keyed sequence.
    pub(crate) fn key_value(&self) -> Option<&Value> {
        match self {
            Item::Entry(k, _) => Some(k),
            Item::Value(v) => Some(v),
            Item::Byte(_) => None,
        }
    }
}

/// Leaf payload, stored per kind to keep byte sequences compact.
#[derive(Debug, Clone)]
pub enum LeafItems {
    Bytes(Vec<u8>),
    Values(Vec<Value>),
    Entries(Vec<(Value, Value)>),
}

impl LeafItems {
    pub(crate) fn empty_for(kind: Kind) -> LeafItems {
        match kind {
            Kind::String | Kind::Blob => LeafItems::Bytes(Vec::new()),
            Kind::List | Kind::Set => LeafItems::Values(Vec::new()),
            Kind::Map => LeafItems::Entries(Vec::new()),
            other => unreachable!("{} is not a sequence kind", other.name()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LeafItems::Bytes(b) => b.len(),
            LeafItems::Values(v) => v.len(),
            LeafItems::Entries(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&mut self, item: Item) {
        match (self, item) {
            (LeafItems::Bytes(b), Item::Byte(x)) => b.push(x),
            (LeafItems::Values(v), Item::Value(x)) => v.push(x),
            (LeafItems::Entries(e), Item::Entry(k, v)) => e.push((k, v)),
            _ => unreachable!("item kind does not match leaf payload"),
        }
    }

    pub(crate) fn get(&self, i: usize) -> Item {
        match self {
            LeafItems::Bytes(b) => Item::Byte(b[i]),
            LeafItems::Values(v) => Item::Value(v[i].clone()),
            LeafItems::Entries(e) => {
                let (k, v) = &e[i];
                Item::Entry(k.clone(), v.clone())
            }
        }
    }
}

/// Tree node: a leaf run of items or a meta node of child tuples.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf { kind: Kind, items: LeafItems },
    Meta { kind: Kind, level: u8, tuples: Vec<MetaTuple> },
}

impl Node {
    pub(crate) fn empty_leaf(kind: Kind) -> Node {
        Node::Leaf {
            kind,
            items: LeafItems::empty_for(kind),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Node::Leaf { kind, .. } | Node::Meta { kind, .. } => *kind,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Meta { level, .. } => *level,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Total leaf items beneath this node.
    pub fn count(&self) -> u64 {
        match self {
            Node::Leaf { items, .. } => items.len() as u64,
            Node::Meta { tuples, .. } => tuples.iter().map(|t| t.count).sum(),
        }
    }

    /// Number of items (leaf) or tuples (meta) held locally.
    pub(crate) fn local_len(&self) -> usize {
        match self {
            Node::Leaf { items, .. } => items.len(),
            Node::Meta { tuples, .. } => tuples.len(),
        }
    }

    pub(crate) fn tuples(&self) -> &[MetaTuple] {
        match self {
            Node::Meta { tuples, .. } => tuples,
            Node::Leaf { .. } => &[],
        }
    }

    pub(crate) fn leaf_items(&self) -> Option<&LeafItems> {
        match self {
            Node::Leaf { items, .. } => Some(items),
            Node::Meta { .. } => None,
        }
    }

    /// The ordering key this node contributes to its parent tuple: the
    /// maximum key beneath it for keyed sequences, the subtree item count
    /// for positional ones.
    pub(crate) fn max_key(&self) -> Option<OrderKey> {
        match self {
            Node::Leaf { kind, items } => {
                if items.is_empty() {
                    return None;
                }
                if kind.is_keyed() {
                    let last = items.get(items.len() - 1);
                    last.key_value().cloned().map(OrderKey::ByValue)
                } else {
                    Some(OrderKey::Index(items.len() as u64))
                }
            }
            Node::Meta { kind, tuples, .. } => {
                if tuples.is_empty() {
                    None
                } else if kind.is_keyed() {
                    tuples.last().map(|t| t.key.clone())
                } else {
                    Some(OrderKey::Index(self.count()))
                }
            }
        }
    }

    /// Hashes referenced by this chunk: meta children plus any references
    /// inside inline values.
    pub fn child_hashes(&self) -> Vec<Hash> {
        match self {
            Node::Leaf { items, .. } => match items {
                LeafItems::Bytes(_) => Vec::new(),
                LeafItems::Values(vs) => vs.iter().flat_map(|v| v.child_hashes()).collect(),
                LeafItems::Entries(es) => es
                    .iter()
                    .flat_map(|(k, v)| {
                        k.child_hashes().into_iter().chain(v.child_hashes())
                    })
                    .collect(),
            },
            Node::Meta { tuples, .. } => {
                let mut out = Vec::with_capacity(tuples.len());
                for t in tuples {
                    out.push(t.child);
                    if let OrderKey::ByValue(k) = &t.key {
                        out.extend(k.child_hashes());
                    }
                }
                out
            }
        }
    }

    /// Validate this node's subtree: exact counts, key ordering, and
    /// level monotonicity.
    ///
    /// Returns the actual leaf item count beneath this node.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvariantViolation`] on any mismatch; this indicates
    /// store corruption.
    pub fn validate(&self, store: &dyn ChunkStore) -> CoreResult<u64> {
        match self {
            Node::Leaf { kind, items } => {
                if kind.is_keyed() {
                    let mut prev: Option<Value> = None;
                    for i in 0..items.len() {
                        let item = items.get(i);
                        let key = item.key_value().cloned().ok_or_else(|| {
                            CoreError::InvariantViolation("keyed leaf without keys".into())
                        })?;
                        if let Some(p) = &prev {
                            if p.compare(&key) != Ordering::Less {
                                return Err(CoreError::InvariantViolation(format!(
                                    "leaf keys out of order at position {}",
                                    i
                                )));
                            }
                        }
                        prev = Some(key);
                    }
                }
                Ok(items.len() as u64)
            }
            Node::Meta { kind, level, tuples } => {
                if tuples.is_empty() {
                    return Err(CoreError::InvariantViolation(
                        "meta node with no children".into(),
                    ));
                }
                let mut total = 0u64;
                let mut prev_key: Option<&OrderKey> = None;
                for (i, t) in tuples.iter().enumerate() {
                    if kind.is_keyed() {
                        if let Some(p) = prev_key {
                            if p.compare(&t.key) != Ordering::Less {
                                return Err(CoreError::InvariantViolation(format!(
                                    "meta keys out of order at tuple {}",
                                    i
                                )));
                            }
                        }
                        prev_key = Some(&t.key);
                    }
                    let child = read_node(store, &t.child)?;
                    if child.level() + 1 != *level {
                        return Err(CoreError::InvariantViolation(format!(
                            "child at level {} under meta node at level {}",
                            child.level(),
                            level
                        )));
                    }
                    let actual = child.validate(store)?;
                    if actual != t.count {
                        return Err(CoreError::InvariantViolation(format!(
                            "tuple {} claims {} items, subtree holds {}",
                            i, t.count, actual
                        )));
                    }
                    total += actual;
                }
                Ok(total)
            }
        }
    }
}

/// Read and decode a sequence chunk.
pub(crate) fn read_node(store: &dyn ChunkStore, hash: &Hash) -> CoreResult<Arc<Node>> {
    let bytes = store
        .get(hash)?
        .ok_or_else(|| CoreError::NotFound(format!("chunk {}", hash)))?;
    Ok(Arc::new(encoding::decode_node(&bytes)?))
}

/// An immutable sequence value backed by a (possibly single-chunk) tree.
#[derive(Debug, Clone)]
pub struct Sequence {
    node: Arc<Node>,
    memo: Arc<OnceLock<Hash>>,
}

impl Sequence {
    pub(crate) fn new(node: Node) -> Sequence {
        Sequence::from_arc(Arc::new(node))
    }

    pub(crate) fn from_arc(node: Arc<Node>) -> Sequence {
        Sequence {
            node,
            memo: Arc::new(OnceLock::new()),
        }
    }

    pub fn kind(&self) -> Kind {
        self.node.kind()
    }

    pub fn len(&self) -> u64 {
        self.node.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn node_arc(&self) -> Arc<Node> {
        self.node.clone()
    }

    /// Hash of this sequence's root chunk encoding; memoised.
    pub fn hash(&self) -> Hash {
        *self
            .memo
            .get_or_init(|| Hash::of(&encoding::encode_node(&self.node)))
    }

    /// Content bytes when the whole String/Blob fits in one leaf.
    pub(crate) fn inline_bytes(&self) -> Option<&[u8]> {
        match &*self.node {
            Node::Leaf {
                items: LeafItems::Bytes(b),
                ..
            } => Some(b),
            _ => None,
        }
    }

    /// Random access by position, descending via subtree counts.
    pub fn get_index(&self, store: &dyn ChunkStore, index: u64) -> CoreResult<Option<Item>> {
        if index >= self.len() {
            return Ok(None);
        }
        let mut node = self.node.clone();
        let mut i = index;
        loop {
            match &*node {
                Node::Leaf { items, .. } => return Ok(Some(items.get(i as usize))),
                Node::Meta { tuples, .. } => {
                    let mut next = None;
                    for t in tuples {
                        if i < t.count {
                            next = Some(t.child);
                            break;
                        }
                        i -= t.count;
                    }
                    let child = next.ok_or_else(|| {
                        CoreError::InvariantViolation(
                            "subtree counts shorter than sequence length".into(),
                        )
                    })?;
                    node = read_node(store, &child)?;
                }
            }
        }
    }

    /// Keyed lookup for Map and Set: descend through the first tuple whose
    /// key is >= the target, then binary-search the leaf.
    pub fn get_key(&self, store: &dyn ChunkStore, key: &Value) -> CoreResult<Option<Item>> {
        if !self.kind().is_keyed() {
            return Err(CoreError::Schema(format!(
                "keyed lookup on {}",
                self.kind().name()
            )));
        }
        let mut node = self.node.clone();
        loop {
            match &*node {
                Node::Leaf { items, .. } => {
                    let (pos, found) = leaf_search(items, key);
                    return Ok(if found { Some(items.get(pos)) } else { None });
                }
                Node::Meta { tuples, .. } => {
                    let idx = tuples
                        .partition_point(|t| t.key.compare_value(key) == Ordering::Less);
                    if idx == tuples.len() {
                        return Ok(None);
                    }
                    let child = tuples[idx].child;
                    node = read_node(store, &child)?;
                }
            }
        }
    }

    /// Concatenate all leaf bytes of a String or Blob.
    pub fn read_bytes(&self, store: &dyn ChunkStore) -> CoreResult<Vec<u8>> {
        fn collect(store: &dyn ChunkStore, node: &Node, out: &mut Vec<u8>) -> CoreResult<()> {
            match node {
                Node::Leaf {
                    items: LeafItems::Bytes(b),
                    ..
                } => {
                    out.extend_from_slice(b);
                    Ok(())
                }
                Node::Leaf { kind, .. } => Err(CoreError::Schema(format!(
                    "read_bytes on {}",
                    kind.name()
                ))),
                Node::Meta { tuples, .. } => {
                    for t in tuples {
                        collect(store, &*read_node(store, &t.child)?, out)?;
                    }
                    Ok(())
                }
            }
        }
        let mut out = Vec::with_capacity(self.len() as usize);
        collect(store, &self.node, &mut out)?;
        Ok(out)
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Sequence) -> bool {
        self.kind() == other.kind() && self.hash() == other.hash()
    }
}

impl Eq for Sequence {}

/// Binary search a keyed leaf. Returns the insertion point and whether the
/// key is present there.
pub(crate) fn leaf_search(items: &LeafItems, key: &Value) -> (usize, bool) {
    let cmp = |i: usize| -> Ordering {
        match items.get(i).key_value() {
            Some(k) => k.compare(key),
            None => Ordering::Less,
        }
    };
    let mut lo = 0;
    let mut hi = items.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if cmp(mid) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let found = lo < items.len() && cmp(lo) == Ordering::Equal;
    (lo, found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MemoryChunkStore;

    fn leaf_of_values(kind: Kind, values: Vec<Value>) -> Node {
        Node::Leaf {
            kind,
            items: LeafItems::Values(values),
        }
    }

    #[test]
    fn test_empty_leaf_counts() {
        let node = Node::empty_leaf(Kind::List);
        assert!(node.is_leaf());
        assert_eq!(node.level(), 0);
        assert_eq!(node.count(), 0);
        assert!(node.max_key().is_none());
    }

    #[test]
    fn test_leaf_get_index() {
        let store = MemoryChunkStore::new();
        let node = leaf_of_values(
            Kind::List,
            vec![Value::number(10.0), Value::number(20.0), Value::number(30.0)],
        );
        let seq = Sequence::new(node);
        assert_eq!(seq.len(), 3);
        let item = seq.get_index(&store, 1).unwrap().unwrap();
        assert_eq!(item.into_value().unwrap().as_number(), Some(20.0));
        assert!(seq.get_index(&store, 3).unwrap().is_none());
    }

    #[test]
    fn test_leaf_search_positions() {
        let items = LeafItems::Values(vec![
            Value::number(1.0),
            Value::number(3.0),
            Value::number(5.0),
        ]);
        assert_eq!(leaf_search(&items, &Value::number(3.0)), (1, true));
        assert_eq!(leaf_search(&items, &Value::number(4.0)), (2, false));
        assert_eq!(leaf_search(&items, &Value::number(9.0)), (3, false));
        assert_eq!(leaf_search(&items, &Value::number(0.0)), (0, false));
    }

    #[test]
    fn test_validate_rejects_bad_counts() {
        let store = MemoryChunkStore::new();
        let child = leaf_of_values(Kind::List, vec![Value::number(1.0)]);
        let bytes = encoding::encode_node(&child);
        let child_hash = Hash::of(&bytes);
        store.put(&child_hash, &bytes).unwrap();

        let bad = Node::Meta {
            kind: Kind::List,
            level: 1,
            tuples: vec![MetaTuple {
                child: child_hash,
                key: OrderKey::Index(2),
                count: 2, // subtree actually holds 1
            }],
        };
        let err = bad.validate(&store).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));
    }

    #[test]
    fn test_validate_rejects_misordered_meta_keys() {
        let store = MemoryChunkStore::new();
        let a = leaf_of_values(Kind::Set, vec![Value::number(1.0)]);
        let b = leaf_of_values(Kind::Set, vec![Value::number(5.0)]);
        let mut hashes = Vec::new();
        for n in [&a, &b] {
            let bytes = encoding::encode_node(n);
            let h = Hash::of(&bytes);
            store.put(&h, &bytes).unwrap();
            hashes.push(h);
        }

        let bad = Node::Meta {
            kind: Kind::Set,
            level: 1,
            tuples: vec![
                MetaTuple {
                    child: hashes[1],
                    key: OrderKey::ByValue(Value::number(5.0)),
                    count: 1,
                },
                MetaTuple {
                    child: hashes[0],
                    key: OrderKey::ByValue(Value::number(1.0)),
                    count: 1,
                },
            ],
        };
        let err = bad.validate(&store).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));
    }
}
