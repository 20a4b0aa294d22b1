//! The value algebra: the closed set of immutable value kinds.
//!
//! Every value is immutable once constructed; edit operations elsewhere in
//! the crate return new values sharing unchanged subtrees. Equality is kind
//! match plus hash equality, and hashes are memoised lazily for composite
//! kinds.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::chunk::ChunkStore;
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::hash::Hash;
use crate::sequence::Sequence;

/// Kind tags, in canonical encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Bool,
    Number,
    String,
    Blob,
    List,
    Map,
    Set,
    Ref,
    Struct,
    Type,
}

impl Kind {
    pub fn tag(self) -> u8 {
        match self {
            Kind::Bool => 0,
            Kind::Number => 1,
            Kind::String => 2,
            Kind::Blob => 3,
            Kind::List => 4,
            Kind::Map => 5,
            Kind::Set => 6,
            Kind::Ref => 7,
            Kind::Struct => 8,
            Kind::Type => 9,
        }
    }

    pub fn from_tag(tag: u8) -> CoreResult<Kind> {
        Ok(match tag {
            0 => Kind::Bool,
            1 => Kind::Number,
            2 => Kind::String,
            3 => Kind::Blob,
            4 => Kind::List,
            5 => Kind::Map,
            6 => Kind::Set,
            7 => Kind::Ref,
            8 => Kind::Struct,
            9 => Kind::Type,
            _ => return Err(CoreError::Encoding(format!("unknown kind tag {}", tag))),
        })
    }

    /// Kinds represented as chunked sequences.
    pub fn is_sequence(self) -> bool {
        matches!(
            self,
            Kind::String | Kind::Blob | Kind::List | Kind::Map | Kind::Set
        )
    }

    /// Sequence kinds ordered by a key rather than by position.
    pub fn is_keyed(self) -> bool {
        matches!(self, Kind::Map | Kind::Set)
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Bool => "Bool",
            Kind::Number => "Number",
            Kind::String => "String",
            Kind::Blob => "Blob",
            Kind::List => "List",
            Kind::Map => "Map",
            Kind::Set => "Set",
            Kind::Ref => "Ref",
            Kind::Struct => "Struct",
            Kind::Type => "Type",
        }
    }
}

/// Hash-reference to another value; the lazy child of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ref {
    target: Hash,
}

impl Ref {
    pub fn new(target: Hash) -> Self {
        Ref { target }
    }

    pub fn target(&self) -> Hash {
        self.target
    }
}

/// A value in the closed algebra.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(Sequence),
    Blob(Sequence),
    List(Sequence),
    Map(Sequence),
    Set(Sequence),
    Ref(Ref),
    Struct(StructValue),
    Type(Type),
}

impl Value {
    /// Construct a Number.
    ///
    /// Numbers are finite IEEE-754 doubles; negative zero canonicalizes to
    /// zero so equal numbers have equal encodings. A non-finite input is a
    /// caller bug and aborts.
    pub fn number(n: f64) -> Value {
        assert!(n.is_finite(), "Number must be finite, got {}", n);
        Value::Number(if n == 0.0 { 0.0 } else { n })
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Blob(_) => Kind::Blob,
            Value::List(_) => Kind::List,
            Value::Map(_) => Kind::Map,
            Value::Set(_) => Kind::Set,
            Value::Ref(_) => Kind::Ref,
            Value::Struct(_) => Kind::Struct,
            Value::Type(_) => Kind::Type,
        }
    }

    /// The identity of this value: the digest of its canonical encoding.
    pub fn hash(&self) -> Hash {
        match self {
            Value::String(s)
            | Value::Blob(s)
            | Value::List(s)
            | Value::Map(s)
            | Value::Set(s) => s.hash(),
            Value::Struct(s) => s.hash(),
            other => Hash::of(&encoding::encode_value(other)),
        }
    }

    /// Kind match plus hash equality.
    pub fn equals(&self, other: &Value) -> bool {
        self.kind() == other.kind() && self.hash() == other.hash()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    /// The backing sequence for the five sequence kinds.
    pub fn sequence(&self) -> Option<&Sequence> {
        match self {
            Value::String(s)
            | Value::Blob(s)
            | Value::List(s)
            | Value::Map(s)
            | Value::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Number of items for sequence kinds (bytes for String/Blob, entries
    /// for Map, elements otherwise).
    pub fn sequence_len(&self) -> Option<u64> {
        self.sequence().map(|s| s.len())
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Blob(_) => Type::Blob,
            Value::List(_) => Type::List(Box::new(Type::Value)),
            Value::Map(_) => Type::Map(Box::new(Type::Value), Box::new(Type::Value)),
            Value::Set(_) => Type::Set(Box::new(Type::Value)),
            Value::Ref(_) => Type::Ref(Box::new(Type::Value)),
            Value::Struct(s) => Type::Schema(s.schema()),
            Value::Type(_) => Type::Type,
        }
    }

    /// Hashes of children referenced (not embedded) by this value's chunk.
    /// These are the outgoing edges for reachability walks.
    pub fn child_hashes(&self) -> Vec<Hash> {
        match self {
            Value::Bool(_) | Value::Number(_) => Vec::new(),
            Value::String(s)
            | Value::Blob(s)
            | Value::List(s)
            | Value::Map(s)
            | Value::Set(s) => s.node().child_hashes(),
            Value::Ref(r) => vec![r.target()],
            Value::Struct(s) => {
                let mut out = vec![s.schema()];
                for f in s.fields() {
                    out.extend(f.child_hashes());
                }
                if let Some((_, v)) = s.branch() {
                    out.extend(v.child_hashes());
                }
                out
            }
            Value::Type(t) => t.child_hashes(),
        }
    }

    /// Total order used for map keys and set elements.
    ///
    /// Bool, Number, and String compare naturally and sort before every
    /// other kind; the rest order by kind tag, then by raw hash bytes.
    /// String and Blob content comparison applies while the bytes are held
    /// inline (the common case for keys); chunked ropes order after inline
    /// values, by hash. Inline-ness is a function of content under fixed
    /// chunking parameters, so the order stays total.
    pub fn compare(&self, other: &Value) -> Ordering {
        fn class(k: Kind) -> u8 {
            match k {
                Kind::Bool => 0,
                Kind::Number => 1,
                Kind::String => 2,
                _ => 3,
            }
        }
        fn byte_seq_cmp(a: &Value, b: &Value) -> Ordering {
            let (sa, sb) = match (a.sequence(), b.sequence()) {
                (Some(sa), Some(sb)) => (sa, sb),
                _ => return Ordering::Equal,
            };
            match (sa.inline_bytes(), sb.inline_bytes()) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.hash().cmp(&b.hash()),
            }
        }
        let (ca, cb) = (class(self.kind()), class(other.kind()));
        if ca != cb {
            return ca.cmp(&cb);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::String(_), Value::String(_)) => byte_seq_cmp(self, other),
            (Value::Blob(_), Value::Blob(_)) => byte_seq_cmp(self, other),
            // Refs order by the raw target hash bytes
            (Value::Ref(a), Value::Ref(b)) => a.target().cmp(&b.target()),
            _ => self
                .kind()
                .tag()
                .cmp(&other.kind().tag())
                .then_with(|| self.hash().cmp(&other.hash())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.equals(other)
    }
}

impl Eq for Value {}

/// Struct value: a schema reference plus fields in ordinal order, with an
/// optional inhabited union branch.
#[derive(Debug, Clone)]
pub struct StructValue(Arc<StructInner>);

#[derive(Debug)]
struct StructInner {
    schema: Hash,
    fields: Vec<Value>,
    union: Option<(u32, Value)>,
    memo: OnceLock<Hash>,
}

impl StructValue {
    pub(crate) fn from_parts(
        schema: Hash,
        fields: Vec<Value>,
        union: Option<(u32, Value)>,
    ) -> Self {
        StructValue(Arc::new(StructInner {
            schema,
            fields,
            union,
            memo: OnceLock::new(),
        }))
    }

    /// Hash of the Type chunk holding this struct's definition.
    pub fn schema(&self) -> Hash {
        self.0.schema
    }

    pub fn field_count(&self) -> usize {
        self.0.fields.len()
    }

    /// Field access is by ordinal; names live in the schema.
    pub fn field(&self, i: usize) -> Option<&Value> {
        self.0.fields.get(i)
    }

    pub fn fields(&self) -> &[Value] {
        &self.0.fields
    }

    /// The inhabited union branch, if any.
    pub fn branch(&self) -> Option<(u32, &Value)> {
        self.0.union.as_ref().map(|(i, v)| (*i, v))
    }

    /// The value of branch `i`; absent unless `i` is the inhabited branch.
    pub fn branch_value(&self, i: u32) -> Option<&Value> {
        match &self.0.union {
            Some((idx, v)) if *idx == i => Some(v),
            _ => None,
        }
    }

    pub fn hash(&self) -> Hash {
        *self
            .0
            .memo
            .get_or_init(|| Hash::of(&encoding::encode_value(&Value::Struct(self.clone()))))
    }
}

/// Type descriptors. Types are values themselves: a full struct definition
/// encodes as its own chunk, and struct values refer to it by hash.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Bool,
    Number,
    String,
    Blob,
    /// Any value.
    Value,
    /// The kind of type values.
    Type,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Ref(Box<Type>),
    /// A full struct definition (the schema chunk itself).
    Struct(StructDef),
    /// A by-hash reference to a struct definition.
    Schema(Hash),
}

impl Type {
    /// Whether `v` conforms to this descriptor.
    ///
    /// Conformance is kind-level for compound interiors: a `List(Number)`
    /// accepts any list. Deep element checks would require store access for
    /// chunked sequences and belong to callers that need them.
    pub fn check(&self, v: &Value) -> bool {
        match self {
            Type::Value => true,
            Type::Bool => v.kind() == Kind::Bool,
            Type::Number => v.kind() == Kind::Number,
            Type::String => v.kind() == Kind::String,
            Type::Blob => v.kind() == Kind::Blob,
            Type::Type => v.kind() == Kind::Type,
            Type::List(_) => v.kind() == Kind::List,
            Type::Set(_) => v.kind() == Kind::Set,
            Type::Map(_, _) => v.kind() == Kind::Map,
            Type::Ref(_) => v.kind() == Kind::Ref,
            Type::Struct(def) => match v {
                Value::Struct(s) => s.schema() == def.schema_hash(),
                _ => false,
            },
            Type::Schema(h) => match v {
                Value::Struct(s) => s.schema() == *h,
                _ => false,
            },
        }
    }

    pub fn child_hashes(&self) -> Vec<Hash> {
        match self {
            Type::Schema(h) => vec![*h],
            Type::List(t) | Type::Set(t) | Type::Ref(t) => t.child_hashes(),
            Type::Map(k, v) => {
                let mut out = k.child_hashes();
                out.extend(v.child_hashes());
                out
            }
            Type::Struct(def) => {
                let mut out = Vec::new();
                for (_, t) in def.fields.iter().chain(def.union.iter()) {
                    out.extend(t.child_hashes());
                }
                out
            }
            _ => Vec::new(),
        }
    }
}

/// A struct schema: ordered named fields plus tagged-union branches.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<(String, Type)>,
    pub union: Vec<(String, Type)>,
}

impl StructDef {
    pub fn new(
        name: impl Into<String>,
        fields: Vec<(String, Type)>,
        union: Vec<(String, Type)>,
    ) -> Self {
        StructDef {
            name: name.into(),
            fields,
            union,
        }
    }

    /// Hash of this definition's Type chunk; the schema reference carried by
    /// instances.
    pub fn schema_hash(&self) -> Hash {
        Hash::of(&encoding::encode_value(&Value::Type(Type::Struct(
            self.clone(),
        ))))
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn branch_index(&self, name: &str) -> Option<usize> {
        self.union.iter().position(|(n, _)| n == name)
    }

    /// Validate fields against the declared types, persist the schema chunk,
    /// and build the struct value.
    ///
    /// # Errors
    ///
    /// [`CoreError::Schema`] on arity mismatch, field type mismatch, or a
    /// bad union branch.
    pub fn instantiate(
        &self,
        store: &dyn ChunkStore,
        fields: Vec<Value>,
        union: Option<(u32, Value)>,
    ) -> CoreResult<Value> {
        if fields.len() != self.fields.len() {
            return Err(CoreError::Schema(format!(
                "struct {} expects {} fields, got {}",
                self.name,
                self.fields.len(),
                fields.len()
            )));
        }
        for (i, v) in fields.iter().enumerate() {
            let (name, ty) = &self.fields[i];
            if !ty.check(v) {
                return Err(CoreError::Schema(format!(
                    "struct {} field '{}' expects {:?}, got {}",
                    self.name,
                    name,
                    ty,
                    v.kind().name()
                )));
            }
        }
        match &union {
            None => {
                if !self.union.is_empty() {
                    return Err(CoreError::Schema(format!(
                        "struct {} requires one inhabited union branch",
                        self.name
                    )));
                }
            }
            Some((idx, v)) => {
                let (name, ty) = self.union.get(*idx as usize).ok_or_else(|| {
                    CoreError::Schema(format!(
                        "struct {} has no union branch {}",
                        self.name, idx
                    ))
                })?;
                if !ty.check(v) {
                    return Err(CoreError::Schema(format!(
                        "struct {} branch '{}' expects {:?}, got {}",
                        self.name,
                        name,
                        ty,
                        v.kind().name()
                    )));
                }
            }
        }

        // Persist the schema chunk so the reference resolves.
        let schema_value = Value::Type(Type::Struct(self.clone()));
        let bytes = encoding::encode_value(&schema_value);
        let schema = Hash::of(&bytes);
        store.put(&schema, &bytes)?;

        Ok(Value::Struct(StructValue::from_parts(schema, fields, union)))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Ref(r) => write!(f, "ref({})", r.target()),
            Value::Struct(s) => write!(f, "struct({})", s.schema()),
            Value::Type(t) => write!(f, "type({:?})", t),
            seq => write!(
                f,
                "{}({} items)",
                seq.kind().name(),
                seq.sequence_len().unwrap_or(0)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_canonicalizes_negative_zero() {
        let a = Value::number(0.0);
        let b = Value::number(-0.0);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_primitive_ordering() {
        let f = Value::Bool(false);
        let t = Value::Bool(true);
        let one = Value::number(1.0);
        let two = Value::number(2.0);
        assert_eq!(f.compare(&t), Ordering::Less);
        assert_eq!(one.compare(&two), Ordering::Less);
        // bools sort before numbers
        assert_eq!(t.compare(&one), Ordering::Less);
    }

    #[test]
    fn test_ref_orders_by_hash() {
        let lo = Ref::new(Hash::from_bytes(&[0u8; 20]).unwrap());
        let hi = Ref::new(Hash::from_bytes(&[9u8; 20]).unwrap());
        assert_eq!(
            Value::Ref(lo).compare(&Value::Ref(hi)),
            Ordering::Less
        );
    }

    #[test]
    fn test_equals_requires_kind_match() {
        let b = Value::Bool(false);
        let n = Value::number(0.0);
        assert!(!b.equals(&n));
        assert!(b.equals(&Value::Bool(false)));
    }

    #[test]
    fn test_struct_def_lookup() {
        let def = StructDef::new(
            "Point",
            vec![
                ("x".to_string(), Type::Number),
                ("y".to_string(), Type::Number),
            ],
            vec![],
        );
        assert_eq!(def.field_index("y"), Some(1));
        assert_eq!(def.field_index("z"), None);
        assert_eq!(def.schema_hash(), def.clone().schema_hash());
    }

    #[test]
    fn test_instantiate_validates() {
        let store = crate::chunk::MemoryChunkStore::new();
        let def = StructDef::new(
            "Point",
            vec![
                ("x".to_string(), Type::Number),
                ("y".to_string(), Type::Number),
            ],
            vec![],
        );

        let ok = def.instantiate(
            &store,
            vec![Value::number(1.0), Value::number(2.0)],
            None,
        );
        assert!(ok.is_ok());

        let wrong_arity = def.instantiate(&store, vec![Value::number(1.0)], None);
        assert!(matches!(wrong_arity, Err(CoreError::Schema(_))));

        let wrong_kind = def.instantiate(
            &store,
            vec![Value::number(1.0), Value::Bool(true)],
            None,
        );
        assert!(matches!(wrong_kind, Err(CoreError::Schema(_))));
    }

    #[test]
    fn test_union_branch_access() {
        let store = crate::chunk::MemoryChunkStore::new();
        let def = StructDef::new(
            "Shape",
            vec![],
            vec![
                ("circle".to_string(), Type::Number),
                ("name".to_string(), Type::String),
            ],
        );

        let v = def
            .instantiate(&store, vec![], Some((0, Value::number(3.14))))
            .unwrap();
        let s = v.as_struct().unwrap();
        let (idx, val) = s.branch().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(val.as_number(), Some(3.14));
        assert!(s.branch_value(0).is_some());
        assert!(s.branch_value(1).is_none());

        let bad_branch = def.instantiate(&store, vec![], Some((5, Value::number(1.0))));
        assert!(matches!(bad_branch, Err(CoreError::Schema(_))));

        let missing_branch = def.instantiate(&store, vec![], None);
        assert!(matches!(missing_branch, Err(CoreError::Schema(_))));
    }
}
