//! Datasets and commits.
//!
//! A dataset is a named pointer in the chunk store's root table, updated by
//! compare-and-set. A commit is a struct value `{value, parents}` where
//! parents is a set of refs to prior commits.

use crate::error::{CoreError, CoreResult};
use crate::hash::Hash;
use crate::value::{StructDef, Type, Value};
use crate::valuestore::ValueStore;

/// Ordinal of the payload field in a commit struct.
pub const COMMIT_VALUE_FIELD: usize = 0;
/// Ordinal of the parents field in a commit struct.
pub const COMMIT_PARENTS_FIELD: usize = 1;

/// The well-known commit schema.
pub fn commit_type() -> StructDef {
    StructDef::new(
        "Commit",
        vec![
            ("value".to_string(), Type::Value),
            (
                "parents".to_string(),
                Type::Set(Box::new(Type::Ref(Box::new(Type::Value)))),
            ),
        ],
        vec![],
    )
}

/// Dataset names are non-empty ASCII identifiers.
pub fn validate_dataset_name(name: &str) -> CoreResult<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        None => false,
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
    };
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidDatasetName(name.to_string()))
    }
}

/// A named head over the content-addressed store.
#[derive(Clone)]
pub struct Dataset {
    vs: ValueStore,
    name: String,
}

impl Dataset {
    pub fn new(vs: ValueStore, name: &str) -> CoreResult<Self> {
        validate_dataset_name(name)?;
        Ok(Dataset {
            vs,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_store(&self) -> &ValueStore {
        &self.vs
    }

    /// Current head commit hash, if any.
    pub fn head(&self) -> CoreResult<Option<Hash>> {
        self.vs.chunks().get_root(&self.name)
    }

    /// Current head commit value.
    pub fn head_commit(&self) -> CoreResult<Option<Value>> {
        match self.head()? {
            Some(h) => Ok(Some(self.vs.read_value(&h)?)),
            None => Ok(None),
        }
    }

    /// The payload of the current head commit.
    pub fn head_value(&self) -> CoreResult<Option<Value>> {
        match self.head_commit()? {
            Some(commit) => Ok(Some(commit_payload(&commit)?)),
            None => Ok(None),
        }
    }

    /// Commit a new value on top of the current head.
    ///
    /// Constructs `{value, parents: {head}}` (empty parents for the first
    /// commit), persists it, and compare-and-sets the head. A lost race
    /// surfaces as [`CoreError::Conflict`]; the caller decides whether to
    /// merge and retry.
    pub fn commit(&self, value: Value) -> CoreResult<Hash> {
        let expected = self.head()?;
        let parents: Vec<Value> = expected
            .iter()
            .map(|h| Value::Ref(crate::value::Ref::new(*h)))
            .collect();
        let parents_set = self.vs.new_set(parents)?;
        let commit = commit_type().instantiate(
            self.vs.chunks().as_ref(),
            vec![value, parents_set],
            None,
        )?;
        let commit_hash = self.vs.write_value(&commit)?;
        self.vs
            .chunks()
            .cas_root(&self.name, expected, commit_hash)?;
        Ok(commit_hash)
    }

    /// Parent commit hashes of a commit value.
    pub fn parents_of(&self, commit: &Value) -> CoreResult<Vec<Hash>> {
        let s = commit
            .as_struct()
            .ok_or_else(|| CoreError::Schema("commit is not a struct".into()))?;
        let parents = s
            .field(COMMIT_PARENTS_FIELD)
            .ok_or_else(|| CoreError::Schema("commit has no parents field".into()))?;
        let refs = self.vs.set_items(parents)?;
        refs.into_iter()
            .map(|v| {
                v.as_ref_value()
                    .map(|r| r.target())
                    .ok_or_else(|| CoreError::Schema("commit parent is not a ref".into()))
            })
            .collect()
    }
}

/// Extract the payload field from a commit struct.
pub fn commit_payload(commit: &Value) -> CoreResult<Value> {
    commit
        .as_struct()
        .and_then(|s| s.field(COMMIT_VALUE_FIELD).cloned())
        .ok_or_else(|| CoreError::Schema("commit is not a struct with a value field".into()))
}
