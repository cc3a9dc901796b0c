//! Document codec: self-describing binary records, the shared field-name
//! dictionary, the polymorphic primary key, and `ObjectId` (§3, §4.A, §6.1).

pub mod codec;
pub mod key_dict;
pub mod object_id;
pub mod value;

pub use key_dict::KeyDictionary;
pub use object_id::ObjectId;
pub use value::{PolymorphicId, Value, tag};

use crate::errors::{DbError, Result};

/// Extracts the `_id` field from an encoded document and converts it to a
/// `PolymorphicId`. Returns `PolymorphicId::None` if the document has no
/// `_id` field at all.
pub fn extract_id(buf: &[u8], dict: &KeyDictionary) -> Result<PolymorphicId> {
    match codec::find_field(buf, key_dict::ID_FIELD)? {
        None => Ok(PolymorphicId::None),
        Some(field) => value_to_id(codec::decode_scalar(field, dict)?),
    }
}

/// Converts a decoded `_id` value into the polymorphic key type.
pub fn value_to_id(value: Value) -> Result<PolymorphicId> {
    Ok(match value {
        Value::Null => PolymorphicId::None,
        Value::ObjectId(oid) => PolymorphicId::ObjectId(oid),
        Value::Int32(i) => PolymorphicId::Int32(i),
        Value::Int64(i) => PolymorphicId::Int64(i),
        Value::String(s) => PolymorphicId::Utf8String(s),
        Value::Binary { subtype: 4, bytes } if bytes.len() == 16 => {
            PolymorphicId::Uuid128(uuid::Uuid::from_slice(&bytes).map_err(|e| {
                DbError::Corrupt(format!("invalid uuid bytes for _id: {e}"))
            })?)
        }
        other => {
            return Err(DbError::Corrupt(format!(
                "unsupported _id value type tag 0x{:02x}",
                other.type_tag()
            )));
        }
    })
}

/// Converts a `PolymorphicId` back into an encodable `Value` for writing
/// `_id` into a document.
#[must_use]
pub fn id_to_value(id: &PolymorphicId) -> Value {
    match id {
        PolymorphicId::None => Value::Null,
        PolymorphicId::ObjectId(oid) => Value::ObjectId(*oid),
        PolymorphicId::Int32(i) => Value::Int32(*i),
        PolymorphicId::Int64(i) => Value::Int64(*i),
        PolymorphicId::Utf8String(s) => Value::String(s.clone()),
        PolymorphicId::Uuid128(u) => Value::Binary { subtype: 4, bytes: u.as_bytes().to_vec() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_id_round_trips_through_document() {
        let dict = KeyDictionary::new();
        let id = PolymorphicId::ObjectId(ObjectId::new());
        let fields = vec![("_id".to_string(), id_to_value(&id))];
        let encoded = codec::encode_document(&fields, &dict);
        let extracted = extract_id(&encoded, &dict).unwrap();
        assert_eq!(extracted, id);
    }

    #[test]
    fn missing_id_is_none() {
        let dict = KeyDictionary::new();
        let fields = vec![("name".to_string(), Value::String("x".into()))];
        let encoded = codec::encode_document(&fields, &dict);
        assert_eq!(extract_id(&encoded, &dict).unwrap(), PolymorphicId::None);
    }
}
