//! High-level store façade.
//!
//! A [`ValueStore`] pairs a chunk store with the chunking configuration and
//! is the context object every constructor, read, and edit threads through.
//! Sequence constructors chunk their input and persist the resulting tree;
//! edit operations return new values sharing all unchanged subtrees.

use std::sync::Arc;

use crate::chunk::ChunkStore;
use crate::chunker::SequenceChunker;
use crate::cursor::SequenceCursor;
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::hash::Hash;
use crate::rolling::ChunkConfig;
use crate::sequence::Item;
use crate::splice::{edit_sequence, SeqEdit};
use crate::value::{Kind, Ref, Value};

/// Chunk store plus chunking parameters.
#[derive(Clone)]
pub struct ValueStore {
    chunks: Arc<dyn ChunkStore>,
    config: ChunkConfig,
}

impl ValueStore {
    pub fn new(chunks: Arc<dyn ChunkStore>, config: ChunkConfig) -> Self {
        ValueStore { chunks, config }
    }

    pub fn chunks(&self) -> &Arc<dyn ChunkStore> {
        &self.chunks
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    fn store(&self) -> &dyn ChunkStore {
        self.chunks.as_ref()
    }

    // ---- constructors ----

    pub fn new_string(&self, s: &str) -> CoreResult<Value> {
        let mut chunker = SequenceChunker::new(self.store(), self.config, Kind::String);
        for b in s.bytes() {
            chunker.append(Item::Byte(b))?;
        }
        Ok(Value::String(chunker.done()?))
    }

    pub fn new_blob(&self, data: &[u8]) -> CoreResult<Value> {
        let mut chunker = SequenceChunker::new(self.store(), self.config, Kind::Blob);
        for &b in data {
            chunker.append(Item::Byte(b))?;
        }
        Ok(Value::Blob(chunker.done()?))
    }

    pub fn new_list(&self, items: Vec<Value>) -> CoreResult<Value> {
        let mut chunker = SequenceChunker::new(self.store(), self.config, Kind::List);
        for v in items {
            chunker.append(Item::Value(v))?;
        }
        Ok(Value::List(chunker.done()?))
    }

    /// Build a set. Input order is irrelevant; duplicates coalesce to the
    /// only occurrence.
    pub fn new_set(&self, mut items: Vec<Value>) -> CoreResult<Value> {
        items.sort_by(|a, b| a.compare(b));
        items.dedup_by(|a, b| a.equals(b));
        let mut chunker = SequenceChunker::new(self.store(), self.config, Kind::Set);
        for v in items {
            chunker.append(Item::Value(v))?;
        }
        Ok(Value::Set(chunker.done()?))
    }

    /// Build a map. Input order is irrelevant; duplicate keys coalesce to
    /// the last occurrence.
    pub fn new_map(&self, mut entries: Vec<(Value, Value)>) -> CoreResult<Value> {
        entries.sort_by(|a, b| a.0.compare(&b.0));
        // stable sort keeps insertion order within equal keys, so the last
        // of each run wins
        let mut deduped: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            match deduped.last_mut() {
                Some((prev_k, prev_v)) if prev_k.equals(&k) => *prev_v = v,
                _ => deduped.push((k, v)),
            }
        }
        let mut chunker = SequenceChunker::new(self.store(), self.config, Kind::Map);
        for (k, v) in deduped {
            chunker.append(Item::Entry(k, v))?;
        }
        Ok(Value::Map(chunker.done()?))
    }

    /// Persist a value and return a Ref to it.
    pub fn new_ref(&self, v: &Value) -> CoreResult<Value> {
        let hash = self.write_value(v)?;
        Ok(Value::Ref(Ref::new(hash)))
    }

    // ---- value I/O ----

    /// Persist a value's own chunk. Sequence children are already stored by
    /// construction; struct schemas by instantiation.
    pub fn write_value(&self, v: &Value) -> CoreResult<Hash> {
        let bytes = encoding::encode_value(v);
        let hash = Hash::of(&bytes);
        self.chunks.put(&hash, &bytes)?;
        Ok(hash)
    }

    /// Read a value back by hash.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] when the chunk is absent.
    pub fn read_value(&self, hash: &Hash) -> CoreResult<Value> {
        let bytes = self
            .chunks
            .get(hash)?
            .ok_or_else(|| CoreError::NotFound(format!("chunk {}", hash)))?;
        encoding::decode_value(&bytes)
    }

    /// Dereference a Ref.
    pub fn deref(&self, r: &Ref) -> CoreResult<Value> {
        self.read_value(&r.target())
    }

    // ---- reads ----

    fn seq_of<'v>(&self, v: &'v Value, kind: Kind, op: &str) -> CoreResult<&'v crate::sequence::Sequence> {
        match v.sequence() {
            Some(s) if v.kind() == kind => Ok(s),
            _ => Err(CoreError::Schema(format!(
                "{} expects {}, got {}",
                op,
                kind.name(),
                v.kind().name()
            ))),
        }
    }

    pub fn list_len(&self, list: &Value) -> CoreResult<u64> {
        Ok(self.seq_of(list, Kind::List, "list_len")?.len())
    }

    pub fn list_get(&self, list: &Value, index: u64) -> CoreResult<Option<Value>> {
        let seq = self.seq_of(list, Kind::List, "list_get")?;
        Ok(seq
            .get_index(self.store(), index)?
            .and_then(|item| item.into_value()))
    }

    pub fn list_items(&self, list: &Value) -> CoreResult<Vec<Value>> {
        let seq = self.seq_of(list, Kind::List, "list_items")?;
        let items = SequenceCursor::new(self.store(), seq.node_arc())?.collect_items()?;
        Ok(items.into_iter().filter_map(Item::into_value).collect())
    }

    pub fn map_get(&self, map: &Value, key: &Value) -> CoreResult<Option<Value>> {
        let seq = self.seq_of(map, Kind::Map, "map_get")?;
        Ok(seq
            .get_key(self.store(), key)?
            .and_then(Item::into_entry)
            .map(|(_, v)| v))
    }

    pub fn map_entries(&self, map: &Value) -> CoreResult<Vec<(Value, Value)>> {
        let seq = self.seq_of(map, Kind::Map, "map_entries")?;
        let items = SequenceCursor::new(self.store(), seq.node_arc())?.collect_items()?;
        Ok(items.into_iter().filter_map(Item::into_entry).collect())
    }

    pub fn set_contains(&self, set: &Value, member: &Value) -> CoreResult<bool> {
        let seq = self.seq_of(set, Kind::Set, "set_contains")?;
        Ok(seq.get_key(self.store(), member)?.is_some())
    }

    pub fn set_items(&self, set: &Value) -> CoreResult<Vec<Value>> {
        let seq = self.seq_of(set, Kind::Set, "set_items")?;
        let items = SequenceCursor::new(self.store(), seq.node_arc())?.collect_items()?;
        Ok(items.into_iter().filter_map(Item::into_value).collect())
    }

    /// Reassemble a String rope. UTF-8 validity is checked here: chunk
    /// boundaries are byte-defined, so a child chunk alone need not hold
    /// complete codepoints.
    pub fn string_text(&self, s: &Value) -> CoreResult<String> {
        let seq = self.seq_of(s, Kind::String, "string_text")?;
        let bytes = seq.read_bytes(self.store())?;
        String::from_utf8(bytes).map_err(|_| CoreError::Encoding("non-UTF-8 string".into()))
    }

    pub fn blob_bytes(&self, b: &Value) -> CoreResult<Vec<u8>> {
        let seq = self.seq_of(b, Kind::Blob, "blob_bytes")?;
        seq.read_bytes(self.store())
    }

    // ---- edits ----

    pub fn list_set(&self, list: &Value, index: u64, value: Value) -> CoreResult<Value> {
        let seq = self.seq_of(list, Kind::List, "list_set")?;
        if index >= seq.len() {
            return Err(CoreError::OutOfBounds {
                index,
                len: seq.len(),
            });
        }
        let edit = SeqEdit::Splice {
            at: index,
            remove: 1,
            insert: vec![Item::Value(value)],
        };
        Ok(Value::List(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn list_insert(&self, list: &Value, index: u64, value: Value) -> CoreResult<Value> {
        let seq = self.seq_of(list, Kind::List, "list_insert")?;
        let edit = SeqEdit::Splice {
            at: index,
            remove: 0,
            insert: vec![Item::Value(value)],
        };
        Ok(Value::List(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn list_append(&self, list: &Value, value: Value) -> CoreResult<Value> {
        let seq = self.seq_of(list, Kind::List, "list_append")?;
        let at = seq.len();
        let edit = SeqEdit::Splice {
            at,
            remove: 0,
            insert: vec![Item::Value(value)],
        };
        Ok(Value::List(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn list_remove(&self, list: &Value, index: u64) -> CoreResult<Value> {
        let seq = self.seq_of(list, Kind::List, "list_remove")?;
        if index >= seq.len() {
            return Err(CoreError::OutOfBounds {
                index,
                len: seq.len(),
            });
        }
        let edit = SeqEdit::Splice {
            at: index,
            remove: 1,
            insert: vec![],
        };
        Ok(Value::List(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn map_set(&self, map: &Value, key: Value, value: Value) -> CoreResult<Value> {
        let seq = self.seq_of(map, Kind::Map, "map_set")?;
        let edit = SeqEdit::MapSet { key, value };
        Ok(Value::Map(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn map_remove(&self, map: &Value, key: &Value) -> CoreResult<Value> {
        let seq = self.seq_of(map, Kind::Map, "map_remove")?;
        let edit = SeqEdit::KeyRemove { key: key.clone() };
        Ok(Value::Map(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn set_insert(&self, set: &Value, member: Value) -> CoreResult<Value> {
        let seq = self.seq_of(set, Kind::Set, "set_insert")?;
        let edit = SeqEdit::SetPut { value: member };
        Ok(Value::Set(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn set_remove(&self, set: &Value, member: &Value) -> CoreResult<Value> {
        let seq = self.seq_of(set, Kind::Set, "set_remove")?;
        let edit = SeqEdit::KeyRemove {
            key: member.clone(),
        };
        Ok(Value::Set(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    /// Byte splice into a String. Offsets are byte positions; the result
    /// must still assemble to valid UTF-8, which `string_text` verifies.
    pub fn string_splice(
        &self,
        s: &Value,
        at: u64,
        remove: u64,
        insert: &str,
    ) -> CoreResult<Value> {
        let seq = self.seq_of(s, Kind::String, "string_splice")?;
        let edit = SeqEdit::Splice {
            at,
            remove,
            insert: insert.bytes().map(Item::Byte).collect(),
        };
        Ok(Value::String(edit_sequence(self.store(), self.config, seq, edit)?))
    }

    pub fn blob_splice(
        &self,
        b: &Value,
        at: u64,
        remove: u64,
        insert: &[u8],
    ) -> CoreResult<Value> {
        let seq = self.seq_of(b, Kind::Blob, "blob_splice")?;
        let edit = SeqEdit::Splice {
            at,
            remove,
            insert: insert.iter().copied().map(Item::Byte).collect(),
        };
        Ok(Value::Blob(edit_sequence(self.store(), self.config, seq, edit)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MemoryChunkStore;

    fn test_vs() -> ValueStore {
        ValueStore::new(Arc::new(MemoryChunkStore::new()), ChunkConfig::small_test())
    }

    #[test]
    fn test_list_build_and_get() {
        let vs = test_vs();
        let list = vs
            .new_list(vec![
                vs.new_string("a").unwrap(),
                vs.new_string("b").unwrap(),
                vs.new_string("c").unwrap(),
            ])
            .unwrap();
        assert_eq!(vs.list_len(&list).unwrap(), 3);
        let b = vs.list_get(&list, 1).unwrap().unwrap();
        assert_eq!(vs.string_text(&b).unwrap(), "b");
        assert!(vs.list_get(&list, 3).unwrap().is_none());
    }

    #[test]
    fn test_map_insertion_order_is_irrelevant() {
        let vs = test_vs();
        let x = vs.new_string("x").unwrap();
        let y = vs.new_string("y").unwrap();
        let m1 = vs
            .new_map(vec![
                (x.clone(), Value::number(1.0)),
                (y.clone(), Value::number(2.0)),
            ])
            .unwrap();
        let m2 = vs
            .new_map(vec![
                (y.clone(), Value::number(2.0)),
                (x.clone(), Value::number(1.0)),
            ])
            .unwrap();
        assert_eq!(m1.hash(), m2.hash());

        let m3 = vs
            .new_map(vec![
                (x.clone(), Value::number(1.0)),
                (y.clone(), Value::number(3.0)),
            ])
            .unwrap();
        assert_ne!(m1.hash(), m3.hash());
    }

    #[test]
    fn test_map_duplicate_keys_last_wins() {
        let vs = test_vs();
        let k = vs.new_string("k").unwrap();
        let m = vs
            .new_map(vec![
                (k.clone(), Value::number(1.0)),
                (k.clone(), Value::number(2.0)),
            ])
            .unwrap();
        assert_eq!(m.sequence_len(), Some(1));
        let got = vs.map_get(&m, &k).unwrap().unwrap();
        assert_eq!(got.as_number(), Some(2.0));
    }

    #[test]
    fn test_set_dedupes() {
        let vs = test_vs();
        let s = vs
            .new_set(vec![
                Value::number(2.0),
                Value::number(1.0),
                Value::number(2.0),
            ])
            .unwrap();
        assert_eq!(s.sequence_len(), Some(2));
        assert!(vs.set_contains(&s, &Value::number(1.0)).unwrap());
        assert!(!vs.set_contains(&s, &Value::number(3.0)).unwrap());
    }

    #[test]
    fn test_string_round_trip_through_chunks() {
        let vs = test_vs();
        let text: String = (0..10_000).map(|i| ((i % 26) as u8 + b'a') as char).collect();
        let s = vs.new_string(&text).unwrap();
        assert!(s.sequence().unwrap().node().level() >= 1);
        assert_eq!(vs.string_text(&s).unwrap(), text);
    }

    #[test]
    fn test_value_write_read_round_trip() {
        let vs = test_vs();
        let list = vs
            .new_list(vec![Value::number(1.0), Value::Bool(true)])
            .unwrap();
        let hash = vs.write_value(&list).unwrap();
        let back = vs.read_value(&hash).unwrap();
        assert!(back.equals(&list));
        assert_eq!(back.hash(), hash);
    }

    #[test]
    fn test_read_missing_value_is_not_found() {
        let vs = test_vs();
        let err = vs.read_value(&Hash::of(b"nope")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_kind_mismatch_is_schema_error() {
        let vs = test_vs();
        let list = vs.new_list(vec![]).unwrap();
        let err = vs.map_get(&list, &Value::number(1.0)).unwrap_err();
        assert!(matches!(err, CoreError::Schema(_)));
    }

    #[test]
    fn test_list_edits() {
        let vs = test_vs();
        let list = vs
            .new_list((0..100).map(|i| Value::number(i as f64)).collect())
            .unwrap();

        let set = vs.list_set(&list, 50, Value::number(-1.0)).unwrap();
        assert_eq!(
            vs.list_get(&set, 50).unwrap().unwrap().as_number(),
            Some(-1.0)
        );

        let appended = vs.list_append(&list, Value::number(100.0)).unwrap();
        assert_eq!(vs.list_len(&appended).unwrap(), 101);

        let removed = vs.list_remove(&appended, 100).unwrap();
        assert_eq!(removed.hash(), list.hash());

        let err = vs.list_set(&list, 100, Value::Bool(true)).unwrap_err();
        assert!(matches!(err, CoreError::OutOfBounds { .. }));
    }

    #[test]
    fn test_map_edits_share_structure() {
        let vs = test_vs();
        let keys: Vec<Value> = (0..200)
            .map(|i| vs.new_string(&format!("key{:04}", i)).unwrap())
            .collect();
        let map = vs
            .new_map(
                keys.iter()
                    .map(|k| (k.clone(), Value::number(0.0)))
                    .collect(),
            )
            .unwrap();

        let updated = vs
            .map_set(&map, keys[100].clone(), Value::number(1.0))
            .unwrap();
        assert_eq!(
            vs.map_get(&updated, &keys[100]).unwrap().unwrap().as_number(),
            Some(1.0)
        );
        let reverted = vs
            .map_set(&updated, keys[100].clone(), Value::number(0.0))
            .unwrap();
        assert_eq!(reverted.hash(), map.hash());
    }

    #[test]
    fn test_string_splice() {
        let vs = test_vs();
        let s = vs.new_string("hello world").unwrap();
        let edited = vs.string_splice(&s, 6, 5, "canopy").unwrap();
        assert_eq!(vs.string_text(&edited).unwrap(), "hello canopy");
    }
}
