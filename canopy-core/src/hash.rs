//! Content hashes.
//!
//! A [`Hash`] is the identity of every stored value: the 20-byte digest of a
//! chunk's canonical encoding. Two values are equal iff their canonical
//! encodings are byte-identical, so hash equality is the equality contract for
//! the whole store.
//!
//! The printable form is `sha1-` followed by 32 characters of fixed-alphabet
//! base32 (160 bits / 5 bits per character).

use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Width of a digest in bytes.
pub const HASH_LEN: usize = 20;

const PREFIX: &str = "sha1-";
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
const ENCODED_LEN: usize = HASH_LEN * 8 / 5;

/// 20-byte content digest of a chunk's canonical bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Digest arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Hash(bytes)
    }

    /// Wrap a raw 20-byte digest.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != HASH_LEN {
            return Err(CoreError::Encoding(format!(
                "hash must be {} bytes, got {}",
                HASH_LEN,
                bytes.len()
            )));
        }
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(bytes);
        Ok(Hash(out))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// The base32 portion of the printable form, without the `sha1-` prefix.
    /// Used for filesystem fan-out paths.
    pub fn to_base32(&self) -> String {
        let mut out = String::with_capacity(ENCODED_LEN);
        let mut acc: u32 = 0;
        let mut bits = 0;
        for &b in &self.0 {
            acc = (acc << 8) | b as u32;
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
            }
        }
        // 160 bits divide evenly into 5-bit groups, nothing left over
        out
    }

    fn from_base32(s: &str) -> CoreResult<Self> {
        if s.len() != ENCODED_LEN {
            return Err(CoreError::Encoding(format!("bad hash length: {:?}", s)));
        }
        let mut acc: u32 = 0;
        let mut bits = 0;
        let mut bytes = Vec::with_capacity(HASH_LEN);
        for c in s.bytes() {
            let v = ALPHABET
                .iter()
                .position(|&a| a == c)
                .ok_or_else(|| CoreError::Encoding(format!("bad hash character: {:?}", c as char)))?;
            acc = (acc << 5) | v as u32;
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                bytes.push(((acc >> bits) & 0xff) as u8);
            }
        }
        Hash::from_bytes(&bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.to_base32())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for Hash {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let rest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| CoreError::Encoding(format!("hash missing '{}' prefix: {:?}", PREFIX, s)))?;
        Hash::from_base32(rest)
    }
}
