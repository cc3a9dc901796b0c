//! Opaque, order-preserving byte-string key encoding for the B+-tree
//! (§4.G). Every key starts with a one-byte discriminant so a single index
//! can hold heterogeneous key types with a well-defined total order:
//! discriminant first, then type-specific bytes, compared byte-lexically.

use serde::{Deserialize, Serialize};

use crate::document::{PolymorphicId, Value};
use crate::errors::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Discriminant {
    None = 0,
    ObjectId = 1,
    Int32 = 2,
    Int64 = 3,
    Utf8String = 4,
    Uuid128 = 5,
    Double = 6,
    Boolean = 7,
    DateTime = 8,
}

/// An encoded index key: an opaque byte string whose lexicographic order
/// equals the intended total order of the underlying typed value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexKey(pub Vec<u8>);

impl IndexKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn from_polymorphic_id(id: &PolymorphicId) -> Self {
        let mut buf = Vec::new();
        match id {
            PolymorphicId::None => buf.push(Discriminant::None as u8),
            PolymorphicId::ObjectId(oid) => {
                buf.push(Discriminant::ObjectId as u8);
                buf.extend_from_slice(oid.as_bytes());
            }
            PolymorphicId::Int32(v) => {
                buf.push(Discriminant::Int32 as u8);
                buf.extend_from_slice(&encode_i32(*v));
            }
            PolymorphicId::Int64(v) => {
                buf.push(Discriminant::Int64 as u8);
                buf.extend_from_slice(&encode_i64(*v));
            }
            PolymorphicId::Utf8String(s) => {
                buf.push(Discriminant::Utf8String as u8);
                buf.extend_from_slice(s.as_bytes());
            }
            PolymorphicId::Uuid128(u) => {
                buf.push(Discriminant::Uuid128 as u8);
                buf.extend_from_slice(u.as_bytes());
            }
        }
        Self(buf)
    }

    /// Encodes an arbitrary document value as a secondary-index key.
    /// Document/Array/Binary/Null-adjacent types that have no sensible
    /// total order for range queries are rejected with `Incompatible`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut buf = Vec::new();
        match value {
            Value::Null => buf.push(Discriminant::None as u8),
            Value::ObjectId(oid) => {
                buf.push(Discriminant::ObjectId as u8);
                buf.extend_from_slice(oid.as_bytes());
            }
            Value::Int32(v) => {
                buf.push(Discriminant::Int32 as u8);
                buf.extend_from_slice(&encode_i32(*v));
            }
            Value::Int64(v) => {
                buf.push(Discriminant::Int64 as u8);
                buf.extend_from_slice(&encode_i64(*v));
            }
            Value::String(s) => {
                buf.push(Discriminant::Utf8String as u8);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Double(v) => {
                buf.push(Discriminant::Double as u8);
                buf.extend_from_slice(&encode_f64(*v));
            }
            Value::Boolean(b) => {
                buf.push(Discriminant::Boolean as u8);
                buf.push(u8::from(*b));
            }
            Value::DateTime(ms) | Value::Timestamp(ms) => {
                buf.push(Discriminant::DateTime as u8);
                buf.extend_from_slice(&ms.to_be_bytes());
            }
            other => {
                return Err(DbError::Incompatible(format!(
                    "value of type tag 0x{:02x} is not indexable",
                    other.type_tag()
                )));
            }
        }
        Ok(Self(buf))
    }

    /// The smallest key strictly greater than every key with this prefix,
    /// or `None` if the prefix is all `0xFF` (no finite upper bound exists,
    /// the caller should use an unbounded upper end instead).
    #[must_use]
    pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
        let mut bound = prefix.to_vec();
        while let Some(&last) = bound.last() {
            if last == 0xFF {
                bound.pop();
            } else {
                *bound.last_mut().unwrap() += 1;
                return Some(bound);
            }
        }
        None
    }
}

fn encode_i32(v: i32) -> [u8; 4] {
    ((v as u32) ^ 0x8000_0000).to_be_bytes()
}

fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

/// Bijective transform so IEEE-754 bit patterns, compared as unsigned
/// big-endian integers, sort in the same order as the floats themselves.
fn encode_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let transformed = if v.is_sign_negative() { !bits } else { bits | 0x8000_0000_0000_0000 };
    transformed.to_be_bytes()
}

/// `%` (any run, possibly empty) and `_` (exactly one UTF-8 scalar value)
/// glob matching, as used by the `like` predicate.
#[must_use]
pub fn like_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    like_match_inner(&p, &c)
}

fn like_match_inner(p: &[char], c: &[char]) -> bool {
    match p.first() {
        None => c.is_empty(),
        Some('%') => like_match_inner(&p[1..], c) || (!c.is_empty() && like_match_inner(p, &c[1..])),
        Some('_') => !c.is_empty() && like_match_inner(&p[1..], &c[1..]),
        Some(ch) => c.first() == Some(ch) && like_match_inner(&p[1..], &c[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_int_order_preserved() {
        let a = IndexKey::from_value(&Value::Int32(-5)).unwrap();
        let b = IndexKey::from_value(&Value::Int32(5)).unwrap();
        assert!(a < b);
    }

    #[test]
    fn double_order_preserved_across_sign() {
        let a = IndexKey::from_value(&Value::Double(-1.5)).unwrap();
        let b = IndexKey::from_value(&Value::Double(0.0)).unwrap();
        let c = IndexKey::from_value(&Value::Double(2.25)).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn string_order_is_byte_lexicographic() {
        let a = IndexKey::from_value(&Value::String("alpha".into())).unwrap();
        let b = IndexKey::from_value(&Value::String("beta".into())).unwrap();
        assert!(a < b);
    }

    #[test]
    fn prefix_upper_bound_excludes_siblings() {
        let bound = IndexKey::prefix_upper_bound(b"ab").unwrap();
        assert_eq!(bound, b"ac".to_vec());
        assert!(b"abz".as_slice() < bound.as_slice());
        assert!(b"ac".as_slice() >= bound.as_slice());
    }

    #[test]
    fn like_percent_and_underscore() {
        assert!(like_match("a%c", "abc"));
        assert!(like_match("a_c", "abc"));
        assert!(!like_match("a_c", "abbc"));
        assert!(like_match("%", "anything"));
    }
}
