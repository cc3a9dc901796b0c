//! Decoded document values and the polymorphic primary key.

use super::object_id::ObjectId;
use std::cmp::Ordering;
use uuid::Uuid;

/// Type tags shared by the encoder and decoder (§6.1). Must not be renumbered.
pub mod tag {
    pub const END: u8 = 0x00;
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const ARRAY: u8 = 0x04;
    pub const BINARY: u8 = 0x05;
    pub const OBJECT_ID: u8 = 0x07;
    pub const BOOLEAN: u8 = 0x08;
    pub const DATE_TIME: u8 = 0x09;
    pub const NULL: u8 = 0x0A;
    pub const INT32: u8 = 0x10;
    pub const TIMESTAMP: u8 = 0x11;
    pub const INT64: u8 = 0x12;
    pub const DECIMAL128: u8 = 0x13;
}

/// A decoded document field value, owned.
///
/// `Decimal128`'s 16-byte layout is BLite's own fixed-point encoding; it is
/// round-trip-faithful within BLite only and is not IEEE-754-2008 conformant
/// (open question in spec §9, left unresolved upstream — interoperability
/// with other Decimal128 producers is out of scope here).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Vec<(String, Value)>),
    Array(Vec<Value>),
    Binary { subtype: u8, bytes: Vec<u8> },
    ObjectId(ObjectId),
    Boolean(bool),
    DateTime(u64),
    Null,
    Int32(i32),
    Timestamp(u64),
    Int64(i64),
    Decimal128([u8; 16]),
}

impl Value {
    #[must_use]
    pub const fn type_tag(&self) -> u8 {
        match self {
            Value::Double(_) => tag::DOUBLE,
            Value::String(_) => tag::STRING,
            Value::Document(_) => tag::DOCUMENT,
            Value::Array(_) => tag::ARRAY,
            Value::Binary { .. } => tag::BINARY,
            Value::ObjectId(_) => tag::OBJECT_ID,
            Value::Boolean(_) => tag::BOOLEAN,
            Value::DateTime(_) => tag::DATE_TIME,
            Value::Null => tag::NULL,
            Value::Int32(_) => tag::INT32,
            Value::Timestamp(_) => tag::TIMESTAMP,
            Value::Int64(_) => tag::INT64,
            Value::Decimal128(_) => tag::DECIMAL128,
        }
    }
}

/// Discriminated polymorphic primary key (§3).
///
/// Ordering is first by discriminant ordinal (the variant order below), then
/// by type-specific total order: lexicographic for `ObjectId`/`Uuid128`,
/// numeric for ints, codepoint-wise for strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PolymorphicId {
    None,
    ObjectId(ObjectId),
    Int32(i32),
    Int64(i64),
    Utf8String(String),
    Uuid128(Uuid),
}

impl PolymorphicId {
    const fn discriminant(&self) -> u8 {
        match self {
            PolymorphicId::None => 0,
            PolymorphicId::ObjectId(_) => 1,
            PolymorphicId::Int32(_) => 2,
            PolymorphicId::Int64(_) => 3,
            PolymorphicId::Utf8String(_) => 4,
            PolymorphicId::Uuid128(_) => 5,
        }
    }
}

impl PartialOrd for PolymorphicId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PolymorphicId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.discriminant().cmp(&other.discriminant()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (self, other) {
            (PolymorphicId::None, PolymorphicId::None) => Ordering::Equal,
            (PolymorphicId::ObjectId(a), PolymorphicId::ObjectId(b)) => a.cmp(b),
            (PolymorphicId::Int32(a), PolymorphicId::Int32(b)) => a.cmp(b),
            (PolymorphicId::Int64(a), PolymorphicId::Int64(b)) => a.cmp(b),
            (PolymorphicId::Utf8String(a), PolymorphicId::Utf8String(b)) => a.cmp(b),
            (PolymorphicId::Uuid128(a), PolymorphicId::Uuid128(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => unreachable!("discriminants already compared equal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminant_orders_before_value() {
        let a = PolymorphicId::ObjectId(ObjectId::from_bytes([0xFF; 12]));
        let b = PolymorphicId::Int32(i32::MIN);
        assert!(a < b, "ObjectId variant must sort before Int32 regardless of value");
    }

    #[test]
    fn numeric_order_within_variant() {
        assert!(PolymorphicId::Int64(-5) < PolymorphicId::Int64(5));
        assert!(PolymorphicId::Int32(1) < PolymorphicId::Int32(2));
    }

    #[test]
    fn string_order_is_codepoint_wise() {
        assert!(PolymorphicId::Utf8String("a".into()) < PolymorphicId::Utf8String("b".into()));
    }
}
