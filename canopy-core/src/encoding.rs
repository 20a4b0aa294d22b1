//! Canonical binary encoding of values and sequence nodes.
//!
//! The stream is little-endian and self-describing: a one-byte kind tag
//! followed by a kind-specific body. Counts and levels are unsigned LEB128
//! varints (minimal form required); Numbers are IEEE-754 doubles. Two values
//! are equal iff their encodings are byte-identical, so the encoder must be
//! deterministic and the decoder rejects every non-canonical form it can
//! detect.
//!
//! Sequence nodes encode as `kind | level | count | payload`. A level-0
//! payload holds inline items; higher levels hold meta tuples
//! `hash(20) | orderingKey | subtreeCount`. Children are never embedded:
//! descending into a tuple requires a chunk-store read.

use crate::error::{CoreError, CoreResult};
use crate::hash::{Hash, HASH_LEN};
use crate::sequence::{Item, LeafItems, MetaTuple, Node, OrderKey, Sequence};
use crate::value::{Kind, Ref, StructDef, StructValue, Type, Value};

const MAX_DEPTH: usize = 128;

// Type descriptor tags, disjoint from kind tags for clarity when reading
// hexdumps.
const TYPE_BOOL: u8 = 0;
const TYPE_NUMBER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_BLOB: u8 = 3;
const TYPE_VALUE: u8 = 4;
const TYPE_TYPE: u8 = 5;
const TYPE_LIST: u8 = 6;
const TYPE_SET: u8 = 7;
const TYPE_MAP: u8 = 8;
const TYPE_REF: u8 = 9;
const TYPE_STRUCT: u8 = 10;
const TYPE_SCHEMA: u8 = 11;

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub fn varint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn f64(&mut self, n: f64) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    pub fn raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn str(&mut self, s: &str) {
        self.varint(s.len() as u64);
        self.raw(s.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn truncated() -> CoreError {
        CoreError::Encoding("truncated input".into())
    }

    pub fn u8(&mut self) -> CoreResult<u8> {
        let b = *self.data.get(self.pos).ok_or_else(Self::truncated)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn varint(&mut self) -> CoreResult<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 {
                return Err(CoreError::Encoding("varint overflow".into()));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                if byte == 0 && shift != 0 {
                    return Err(CoreError::Encoding("non-canonical varint".into()));
                }
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CoreError::Encoding("varint overflow".into()));
            }
        }
    }

    pub fn f64(&mut self) -> CoreResult<f64> {
        let bytes = self.raw(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(arr))
    }

    pub fn raw(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(Self::truncated());
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn str(&mut self) -> CoreResult<String> {
        let len = self.varint()? as usize;
        let bytes = self.raw(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::Encoding("non-UTF-8 string".into()))
    }

    pub fn hash(&mut self) -> CoreResult<Hash> {
        Hash::from_bytes(self.raw(HASH_LEN)?)
    }

    pub fn finish(&self) -> CoreResult<()> {
        if self.pos != self.data.len() {
            return Err(CoreError::Encoding(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

/// Canonical encoding of a value. For sequence kinds this is the encoding of
/// the root node.
pub fn encode_value(v: &Value) -> Vec<u8> {
    let mut w = Writer::new();
    write_value(&mut w, v);
    w.into_bytes()
}

/// Canonical encoding of a sequence node (one chunk's bytes).
pub fn encode_node(node: &Node) -> Vec<u8> {
    let mut w = Writer::new();
    write_node(&mut w, node);
    w.into_bytes()
}

/// The bytes a single leaf item contributes to its node payload; this is
/// exactly what the rolling hasher consumes per item.
pub(crate) fn encode_item(item: &Item) -> Vec<u8> {
    let mut w = Writer::new();
    match item {
        Item::Byte(b) => w.u8(*b),
        Item::Value(v) => write_value(&mut w, v),
        Item::Entry(k, v) => {
            write_value(&mut w, k);
            write_value(&mut w, v);
        }
    }
    w.into_bytes()
}

/// The bytes a meta tuple contributes to its node payload. Refs contribute
/// only their hash bytes; nothing is dereferenced.
pub(crate) fn encode_tuple(t: &MetaTuple) -> Vec<u8> {
    let mut w = Writer::new();
    write_tuple(&mut w, t);
    w.into_bytes()
}

pub(crate) fn write_value(w: &mut Writer, v: &Value) {
    match v {
        Value::Bool(b) => {
            w.u8(Kind::Bool.tag());
            w.u8(*b as u8);
        }
        Value::Number(n) => {
            w.u8(Kind::Number.tag());
            w.f64(*n);
        }
        Value::String(s)
        | Value::Blob(s)
        | Value::List(s)
        | Value::Map(s)
        | Value::Set(s) => write_node(w, s.node()),
        Value::Ref(r) => {
            w.u8(Kind::Ref.tag());
            w.raw(r.target().as_bytes());
        }
        Value::Struct(s) => {
            w.u8(Kind::Struct.tag());
            w.raw(s.schema().as_bytes());
            w.varint(s.field_count() as u64);
            for f in s.fields() {
                write_value(w, f);
            }
            match s.branch() {
                None => w.u8(0),
                Some((idx, val)) => {
                    w.u8(1);
                    w.varint(idx as u64);
                    write_value(w, val);
                }
            }
        }
        Value::Type(t) => {
            w.u8(Kind::Type.tag());
            write_type(w, t);
        }
    }
}

fn write_node(w: &mut Writer, node: &Node) {
    w.u8(node.kind().tag());
    w.varint(node.level() as u64);
    match node {
        Node::Leaf { items, .. } => {
            w.varint(items.len() as u64);
            match items {
                LeafItems::Bytes(b) => w.raw(b),
                LeafItems::Values(vs) => {
                    for v in vs {
                        write_value(w, v);
                    }
                }
                LeafItems::Entries(es) => {
                    for (k, v) in es {
                        write_value(w, k);
                        write_value(w, v);
                    }
                }
            }
        }
        Node::Meta { tuples, .. } => {
            w.varint(tuples.len() as u64);
            for t in tuples {
                write_tuple(w, t);
            }
        }
    }
}

fn write_tuple(w: &mut Writer, t: &MetaTuple) {
    w.raw(t.child.as_bytes());
    match &t.key {
        OrderKey::Index(c) => w.varint(*c),
        OrderKey::ByValue(v) => write_value(w, v),
    }
    w.varint(t.count);
}

fn write_type(w: &mut Writer, t: &Type) {
    match t {
        Type::Bool => w.u8(TYPE_BOOL),
        Type::Number => w.u8(TYPE_NUMBER),
        Type::String => w.u8(TYPE_STRING),
        Type::Blob => w.u8(TYPE_BLOB),
        Type::Value => w.u8(TYPE_VALUE),
        Type::Type => w.u8(TYPE_TYPE),
        Type::List(e) => {
            w.u8(TYPE_LIST);
            write_type(w, e);
        }
        Type::Set(e) => {
            w.u8(TYPE_SET);
            write_type(w, e);
        }
        Type::Map(k, v) => {
            w.u8(TYPE_MAP);
            write_type(w, k);
            write_type(w, v);
        }
        Type::Ref(e) => {
            w.u8(TYPE_REF);
            write_type(w, e);
        }
        Type::Struct(def) => {
            w.u8(TYPE_STRUCT);
            w.str(&def.name);
            w.varint(def.fields.len() as u64);
            for (name, ty) in &def.fields {
                w.str(name);
                write_type(w, ty);
            }
            w.varint(def.union.len() as u64);
            for (name, ty) in &def.union {
                w.str(name);
                write_type(w, ty);
            }
        }
        Type::Schema(h) => {
            w.u8(TYPE_SCHEMA);
            w.raw(h.as_bytes());
        }
    }
}

/// Decode a complete value. Total for well-formed input.
///
/// # Errors
///
/// [`CoreError::Encoding`] on truncation, unknown tags, non-canonical
/// numbers or varints, misordered or duplicate keys, or trailing bytes.
pub fn decode_value(data: &[u8]) -> CoreResult<Value> {
    let mut r = Reader::new(data);
    let v = read_value(&mut r, 0)?;
    r.finish()?;
    Ok(v)
}

/// Decode chunk bytes that must hold a sequence node.
pub fn decode_node(data: &[u8]) -> CoreResult<Node> {
    let mut r = Reader::new(data);
    let tag = r.u8()?;
    let kind = Kind::from_tag(tag)?;
    if !kind.is_sequence() {
        return Err(CoreError::Encoding(format!(
            "expected sequence chunk, found {}",
            kind.name()
        )));
    }
    let node = read_node_body(&mut r, kind, 0)?;
    r.finish()?;
    Ok(node)
}

fn read_value(r: &mut Reader, depth: usize) -> CoreResult<Value> {
    if depth > MAX_DEPTH {
        return Err(CoreError::Encoding("value nesting too deep".into()));
    }
    let kind = Kind::from_tag(r.u8()?)?;
    match kind {
        Kind::Bool => match r.u8()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            b => Err(CoreError::Encoding(format!("bad bool byte {}", b))),
        },
        Kind::Number => {
            let n = r.f64()?;
            if !n.is_finite() {
                return Err(CoreError::Encoding("non-finite number".into()));
            }
            if n == 0.0 && n.is_sign_negative() {
                return Err(CoreError::Encoding("non-canonical negative zero".into()));
            }
            Ok(Value::Number(n))
        }
        Kind::String | Kind::Blob | Kind::List | Kind::Map | Kind::Set => {
            let node = read_node_body(r, kind, depth)?;
            let seq = Sequence::new(node);
            Ok(match kind {
                Kind::String => Value::String(seq),
                Kind::Blob => Value::Blob(seq),
                Kind::List => Value::List(seq),
                Kind::Map => Value::Map(seq),
                Kind::Set => Value::Set(seq),
                _ => unreachable!(),
            })
        }
        Kind::Ref => Ok(Value::Ref(Ref::new(r.hash()?))),
        Kind::Struct => {
            let schema = r.hash()?;
            let nfields = r.varint()? as usize;
            let mut fields = Vec::new();
            for _ in 0..nfields {
                fields.push(read_value(r, depth + 1)?);
            }
            let union = match r.u8()? {
                0 => None,
                1 => {
                    let idx = r.varint()?;
                    if idx > u32::MAX as u64 {
                        return Err(CoreError::Encoding("branch index overflow".into()));
                    }
                    Some((idx as u32, read_value(r, depth + 1)?))
                }
                b => return Err(CoreError::Encoding(format!("bad union flag {}", b))),
            };
            Ok(Value::Struct(StructValue::from_parts(schema, fields, union)))
        }
        Kind::Type => Ok(Value::Type(read_type(r, depth)?)),
    }
}

fn read_node_body(r: &mut Reader, kind: Kind, depth: usize) -> CoreResult<Node> {
    let level = r.varint()?;
    if level > u8::MAX as u64 {
        return Err(CoreError::Encoding("node level overflow".into()));
    }
    let level = level as u8;
    let count = r.varint()? as usize;

    if level == 0 {
        let items = match kind {
            Kind::String | Kind::Blob => LeafItems::Bytes(r.raw(count)?.to_vec()),
            Kind::List => {
                let mut vs = Vec::new();
                for _ in 0..count {
                    vs.push(read_value(r, depth + 1)?);
                }
                LeafItems::Values(vs)
            }
            Kind::Set => {
                let mut vs: Vec<Value> = Vec::new();
                for i in 0..count {
                    let v = read_value(r, depth + 1)?;
                    if let Some(prev) = vs.last() {
                        if prev.compare(&v) != std::cmp::Ordering::Less {
                            return Err(CoreError::Encoding(format!(
                                "set elements misordered at {}",
                                i
                            )));
                        }
                    }
                    vs.push(v);
                }
                LeafItems::Values(vs)
            }
            Kind::Map => {
                let mut es: Vec<(Value, Value)> = Vec::new();
                for i in 0..count {
                    let k = read_value(r, depth + 1)?;
                    let v = read_value(r, depth + 1)?;
                    if let Some((prev, _)) = es.last() {
                        if prev.compare(&k) != std::cmp::Ordering::Less {
                            return Err(CoreError::Encoding(format!(
                                "map keys misordered or duplicated at {}",
                                i
                            )));
                        }
                    }
                    es.push((k, v));
                }
                LeafItems::Entries(es)
            }
            _ => unreachable!("non-sequence kind in node body"),
        };
        return Ok(Node::Leaf { kind, items });
    }

    if count == 0 {
        return Err(CoreError::Encoding("meta node with no children".into()));
    }
    let mut tuples: Vec<MetaTuple> = Vec::new();
    for i in 0..count {
        let child = r.hash()?;
        let key = if kind.is_keyed() {
            OrderKey::ByValue(read_value(r, depth + 1)?)
        } else {
            OrderKey::Index(r.varint()?)
        };
        let subtree = r.varint()?;
        if let OrderKey::Index(k) = &key {
            if *k != subtree {
                return Err(CoreError::Encoding(format!(
                    "positional tuple key {} disagrees with count {}",
                    k, subtree
                )));
            }
        }
        if let (Some(prev), OrderKey::ByValue(_)) = (tuples.last(), &key) {
            if prev.key.compare(&key) != std::cmp::Ordering::Less {
                return Err(CoreError::Encoding(format!(
                    "meta keys misordered at tuple {}",
                    i
                )));
            }
        }
        tuples.push(MetaTuple {
            child,
            key,
            count: subtree,
        });
    }
    Ok(Node::Meta {
        kind,
        level,
        tuples,
    })
}

fn read_type(r: &mut Reader, depth: usize) -> CoreResult<Type> {
    if depth > MAX_DEPTH {
        return Err(CoreError::Encoding("type nesting too deep".into()));
    }
    Ok(match r.u8()? {
        TYPE_BOOL => Type::Bool,
        TYPE_NUMBER => Type::Number,
        TYPE_STRING => Type::String,
        TYPE_BLOB => Type::Blob,
        TYPE_VALUE => Type::Value,
        TYPE_TYPE => Type::Type,
        TYPE_LIST => Type::List(Box::new(read_type(r, depth + 1)?)),
        TYPE_SET => Type::Set(Box::new(read_type(r, depth + 1)?)),
        TYPE_MAP => Type::Map(
            Box::new(read_type(r, depth + 1)?),
            Box::new(read_type(r, depth + 1)?),
        ),
        TYPE_REF => Type::Ref(Box::new(read_type(r, depth + 1)?)),
        TYPE_STRUCT => {
            let name = r.str()?;
            let nfields = r.varint()? as usize;
            let mut fields = Vec::new();
            for _ in 0..nfields {
                let fname = r.str()?;
                fields.push((fname, read_type(r, depth + 1)?));
            }
            let nunion = r.varint()? as usize;
            let mut union = Vec::new();
            for _ in 0..nunion {
                let bname = r.str()?;
                union.push((bname, read_type(r, depth + 1)?));
            }
            Type::Struct(StructDef {
                name,
                fields,
                union,
            })
        }
        TYPE_SCHEMA => Type::Schema(r.hash()?),
        tag => {
            return Err(CoreError::Encoding(format!(
                "unknown type descriptor tag {}",
                tag
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: &Value) -> Value {
        let bytes = encode_value(v);
        let back = decode_value(&bytes).unwrap();
        assert_eq!(bytes, encode_value(&back), "re-encode must be identical");
        back
    }

    #[test]
    fn test_round_trip_primitives() {
        for v in [
            Value::Bool(true),
            Value::Bool(false),
            Value::number(0.0),
            Value::number(-12.5),
            Value::number(1e300),
        ] {
            let back = round_trip(&v);
            assert!(back.equals(&v));
        }
    }

    #[test]
    fn test_round_trip_ref_and_type() {
        let h = Hash::of(b"target");
        round_trip(&Value::Ref(Ref::new(h)));
        round_trip(&Value::Type(Type::Map(
            Box::new(Type::String),
            Box::new(Type::List(Box::new(Type::Number))),
        )));
        round_trip(&Value::Type(Type::Struct(StructDef::new(
            "Commit",
            vec![("value".to_string(), Type::Value)],
            vec![("none".to_string(), Type::Value)],
        ))));
    }

    #[test]
    fn test_round_trip_struct_with_union() {
        let schema = Hash::of(b"schema");
        let v = Value::Struct(StructValue::from_parts(
            schema,
            vec![Value::number(1.0)],
            Some((1, Value::Bool(true))),
        ));
        let back = round_trip(&v);
        let s = back.as_struct().unwrap();
        assert_eq!(s.schema(), schema);
        assert_eq!(s.branch().unwrap().0, 1);
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = encode_value(&Value::number(7.0));
        for cut in 0..bytes.len() {
            assert!(decode_value(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode_value(&Value::Bool(true));
        bytes.push(0);
        assert!(decode_value(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        assert!(decode_value(&[200]).is_err());
    }

    #[test]
    fn test_decode_rejects_non_finite_number() {
        let mut w = Writer::new();
        w.u8(Kind::Number.tag());
        w.f64(f64::NAN);
        assert!(decode_value(&w.into_bytes()).is_err());

        let mut w = Writer::new();
        w.u8(Kind::Number.tag());
        w.f64(-0.0);
        assert!(decode_value(&w.into_bytes()).is_err());
    }

    #[test]
    fn test_decode_rejects_duplicate_map_keys() {
        // Hand-build a map leaf with a duplicated key.
        let mut w = Writer::new();
        w.u8(Kind::Map.tag());
        w.varint(0); // level
        w.varint(2); // count
        for _ in 0..2 {
            write_value(&mut w, &Value::number(1.0));
            write_value(&mut w, &Value::Bool(true));
        }
        assert!(decode_value(&w.into_bytes()).is_err());
    }

    #[test]
    fn test_decode_rejects_non_canonical_varint() {
        // 0x80 0x00 encodes zero in two bytes.
        let mut bytes = vec![Kind::List.tag()];
        bytes.extend_from_slice(&[0x80, 0x00]);
        bytes.push(0);
        assert!(decode_value(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_positional_key_count_mismatch() {
        let mut w = Writer::new();
        w.u8(Kind::List.tag());
        w.varint(1); // level
        w.varint(1); // one tuple
        w.raw(Hash::of(b"child").as_bytes());
        w.varint(3); // ordering key
        w.varint(4); // subtree count disagrees
        assert!(decode_value(&w.into_bytes()).is_err());
    }

    #[test]
    fn test_varint_round_trip() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut w = Writer::new();
            w.varint(v);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.varint().unwrap(), v);
            r.finish().unwrap();
        }
    }
}
