//! Self-describing binary document codec (§4.A, §6.1).
//!
//! Wire layout: `[ total_len: u32_le ] [ element* ] [ 0x00 ]`. Each element is
//! `[ type: u8 ] [ key_id: u16_le ] [ value ]`. Field lookup is a linear scan
//! over a borrowed byte slice — the reader never allocates per field and
//! never takes ownership of the buffer.

use super::key_dict::KeyDictionary;
use super::object_id::ObjectId;
use super::value::{Value, tag};
use crate::errors::{DbError, Result};

/// Length, in bytes, of the value payload for fixed-size types; for
/// variable-size types the length must be computed from an embedded prefix.
fn skip_len(type_tag: u8, rest: &[u8]) -> Result<usize> {
    Ok(match type_tag {
        tag::DOUBLE | tag::INT64 | tag::DATE_TIME | tag::TIMESTAMP => 8,
        tag::INT32 => 4,
        tag::BOOLEAN => 1,
        tag::NULL => 0,
        tag::OBJECT_ID => 12,
        tag::DECIMAL128 => 16,
        tag::STRING => {
            let len = read_u32_le(rest, 0)? as usize;
            4 + len
        }
        tag::BINARY => {
            let len = read_u32_le(rest, 0)? as usize;
            4 + 1 + len
        }
        tag::DOCUMENT | tag::ARRAY => read_u32_le(rest, 0)? as usize,
        other => return Err(DbError::Corrupt(format!("unknown type tag 0x{other:02x}"))),
    })
}

fn read_u32_le(buf: &[u8], at: usize) -> Result<u32> {
    let slice = buf
        .get(at..at + 4)
        .ok_or_else(|| DbError::Corrupt("truncated u32 length prefix".into()))?;
    Ok(u32::from_le_bytes(slice.try_into().expect("checked len")))
}

/// A single undecoded element borrowed from a document buffer.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    pub key_id: u16,
    pub type_tag: u8,
    pub raw: &'a [u8],
}

/// Iterates the top-level elements of a document or array envelope, stopping
/// at the `End` marker or on the first framing inconsistency.
pub struct FieldIter<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> FieldIter<'a> {
    /// `buf` must be the element region: everything between the 4-byte
    /// length prefix and the trailing `0x00`, inclusive of that trailing byte.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, done: false }
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<FieldRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(&type_tag) = self.buf.get(self.pos) else {
            self.done = true;
            return Some(Err(DbError::Corrupt("document missing End marker".into())));
        };
        if type_tag == tag::END {
            self.done = true;
            return None;
        }
        let key_start = self.pos + 1;
        let Some(key_bytes) = self.buf.get(key_start..key_start + 2) else {
            self.done = true;
            return Some(Err(DbError::Corrupt("truncated key id".into())));
        };
        let key_id = u16::from_le_bytes(key_bytes.try_into().expect("checked len"));
        let value_start = key_start + 2;
        let Some(rest) = self.buf.get(value_start..) else {
            self.done = true;
            return Some(Err(DbError::Corrupt("truncated element value".into())));
        };
        let len = match skip_len(type_tag, rest) {
            Ok(l) => l,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let Some(raw) = rest.get(..len) else {
            self.done = true;
            return Some(Err(DbError::Corrupt("element value runs past buffer end".into())));
        };
        self.pos = value_start + len;
        Some(Ok(FieldRef { key_id, type_tag, raw }))
    }
}

/// Returns the element region of a top-level document buffer: validates and
/// strips the 4-byte total-length prefix, and returns the slice up to (and
/// including) the trailing `0x00`.
pub fn envelope_body(buf: &[u8]) -> Result<&[u8]> {
    let total_len = read_u32_le(buf, 0)? as usize;
    let body = buf
        .get(4..total_len)
        .ok_or_else(|| DbError::Corrupt("total_len exceeds buffer".into()))?;
    if body.last() != Some(&tag::END) {
        return Err(DbError::Corrupt("document missing trailing End marker".into()));
    }
    Ok(body)
}

/// Zero-copy linear-scan field lookup at the top level of `buf`. Terminates
/// on first match or the `End` marker.
pub fn find_field<'a>(buf: &'a [u8], key_id: u16) -> Result<Option<FieldRef<'a>>> {
    let body = envelope_body(buf)?;
    for field in FieldIter::new(body) {
        let field = field?;
        if field.key_id == key_id {
            return Ok(Some(field));
        }
    }
    Ok(None)
}

/// Decodes a scalar `FieldRef` payload into an owned `Value`. `Document` and
/// `Array` recurse into nested envelopes.
pub fn decode_scalar(field: FieldRef<'_>, dict: &KeyDictionary) -> Result<Value> {
    Ok(match field.type_tag {
        tag::DOUBLE => Value::Double(f64::from_le_bytes(field.raw.try_into().unwrap())),
        tag::STRING => Value::String(decode_cstring(field.raw)?),
        tag::DOCUMENT => Value::Document(decode_fields(field.raw, dict, false)?),
        tag::ARRAY => {
            let pairs = decode_fields(field.raw, dict, true)?;
            Value::Array(pairs.into_iter().map(|(_, v)| v).collect())
        }
        tag::BINARY => {
            let len = u32::from_le_bytes(field.raw[0..4].try_into().unwrap()) as usize;
            let subtype = field.raw[4];
            let bytes = field.raw[5..5 + len].to_vec();
            Value::Binary { subtype, bytes }
        }
        tag::OBJECT_ID => {
            let arr: [u8; 12] = field.raw.try_into().unwrap();
            Value::ObjectId(ObjectId::from_bytes(arr))
        }
        tag::BOOLEAN => Value::Boolean(field.raw[0] != 0),
        tag::DATE_TIME => Value::DateTime(u64::from_le_bytes(field.raw.try_into().unwrap())),
        tag::NULL => Value::Null,
        tag::INT32 => Value::Int32(i32::from_le_bytes(field.raw.try_into().unwrap())),
        tag::TIMESTAMP => Value::Timestamp(u64::from_le_bytes(field.raw.try_into().unwrap())),
        tag::INT64 => Value::Int64(i64::from_le_bytes(field.raw.try_into().unwrap())),
        tag::DECIMAL128 => Value::Decimal128(field.raw.try_into().unwrap()),
        other => return Err(DbError::Corrupt(format!("unknown type tag 0x{other:02x}"))),
    })
}

fn decode_cstring(raw: &[u8]) -> Result<String> {
    let len = u32::from_le_bytes(
        raw.get(0..4).ok_or_else(|| DbError::Corrupt("truncated string length".into()))?.try_into().unwrap(),
    ) as usize;
    let body = raw.get(4..4 + len).ok_or_else(|| DbError::Corrupt("string runs past buffer".into()))?;
    if body.last() != Some(&0u8) {
        return Err(DbError::Corrupt("string missing NUL terminator".into()));
    }
    let text = &body[..body.len() - 1];
    String::from_utf8(text.to_vec()).map_err(|e| DbError::Corrupt(format!("invalid utf8: {e}")))
}

/// Decodes every element of an envelope body (top-level `buf` including the
/// trailing `0x00`) into owned `(name, Value)` pairs. When `positional` is
/// true (array context) keys are the raw decimal index rather than a
/// dictionary-resolved name.
fn decode_fields(buf: &[u8], dict: &KeyDictionary, positional: bool) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::new();
    for field in FieldIter::new(buf) {
        let field = field?;
        let name = if positional {
            field.key_id.to_string()
        } else {
            dict.resolve(field.key_id).unwrap_or_else(|| field.key_id.to_string())
        };
        let value = decode_scalar(field, dict)?;
        out.push((name, value));
    }
    Ok(out)
}

/// Decodes a full top-level document into owned `(name, Value)` pairs,
/// resolving field-name ids through `dict`. Unknown ids fall back to their
/// decimal string form so never-registered keys remain scannable.
pub fn decode_document(buf: &[u8], dict: &KeyDictionary) -> Result<Vec<(String, Value)>> {
    let body = envelope_body(buf)?;
    decode_fields(body, dict, false)
}

fn encode_cstring(out: &mut Vec<u8>, s: &str) {
    let len = u32::try_from(s.len() + 1).expect("string too long");
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn encode_value(out: &mut Vec<u8>, value: &Value, dict: &KeyDictionary) {
    match value {
        Value::Double(d) => out.extend_from_slice(&d.to_le_bytes()),
        Value::String(s) => encode_cstring(out, s),
        Value::Document(fields) => {
            let body = encode_document_body(fields, dict);
            out.extend_from_slice(&body);
        }
        Value::Array(items) => {
            let body = encode_array_body(items, dict);
            out.extend_from_slice(&body);
        }
        Value::Binary { subtype, bytes } => {
            let len = u32::try_from(bytes.len()).expect("blob too large");
            out.extend_from_slice(&len.to_le_bytes());
            out.push(*subtype);
            out.extend_from_slice(bytes);
        }
        Value::ObjectId(oid) => out.extend_from_slice(oid.as_bytes()),
        Value::Boolean(b) => out.push(u8::from(*b)),
        Value::DateTime(ms) => out.extend_from_slice(&ms.to_le_bytes()),
        Value::Null => {}
        Value::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Timestamp(t) => out.extend_from_slice(&t.to_le_bytes()),
        Value::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Decimal128(bytes) => out.extend_from_slice(bytes),
    }
}

fn encode_element(out: &mut Vec<u8>, key_id: u16, value: &Value, dict: &KeyDictionary) {
    out.push(value.type_tag());
    out.extend_from_slice(&key_id.to_le_bytes());
    encode_value(out, value, dict);
}

/// Encodes `fields` as a nested `Document` envelope body: `[len u32_le][elements][0x00]`.
/// Field names are resolved through `dict`, registering any never-seen name.
fn encode_document_body(fields: &[(String, Value)], dict: &KeyDictionary) -> Vec<u8> {
    let mut elements = Vec::new();
    for (name, value) in fields {
        let key_id = dict.register(name);
        encode_element(&mut elements, key_id, value, dict);
    }
    elements.push(tag::END);
    let total_len = u32::try_from(4 + elements.len()).expect("document too large");
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&total_len.to_le_bytes());
    out.extend_from_slice(&elements);
    out
}

/// Encodes `items` as a nested `Array` envelope body; element keys are the
/// raw positional index, never dictionary-resolved.
fn encode_array_body(items: &[Value], dict: &KeyDictionary) -> Vec<u8> {
    let mut elements = Vec::new();
    for (i, value) in items.iter().enumerate() {
        let key_id = u16::try_from(i).expect("array longer than 65535 elements");
        encode_element(&mut elements, key_id, value, dict);
    }
    elements.push(tag::END);
    let total_len = u32::try_from(4 + elements.len()).expect("array too large");
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&total_len.to_le_bytes());
    out.extend_from_slice(&elements);
    out
}

/// Encodes a top-level document. If an `_id` field is present anywhere in
/// `fields` it is moved to the front, per the invariant that `_id` appears
/// first when present.
#[must_use]
pub fn encode_document(fields: &[(String, Value)], dict: &KeyDictionary) -> Vec<u8> {
    let mut ordered: Vec<(String, Value)> = Vec::with_capacity(fields.len());
    if let Some(pos) = fields.iter().position(|(name, _)| name == super::key_dict::ID_FIELD_NAME) {
        ordered.push(fields[pos].clone());
        ordered.extend(fields.iter().enumerate().filter(|(i, _)| *i != pos).map(|(_, f)| f.clone()));
    } else {
        ordered.extend_from_slice(fields);
    }
    encode_document_body(&ordered, dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> KeyDictionary {
        KeyDictionary::new()
    }

    #[test]
    fn round_trips_scalars() {
        let dict = dict();
        let fields = vec![
            ("_id".to_string(), Value::ObjectId(ObjectId::from_bytes([1; 12]))),
            ("name".to_string(), Value::String("Ada".into())),
            ("age".to_string(), Value::Int32(30)),
            ("big".to_string(), Value::Int64(-9_000_000_000)),
            ("score".to_string(), Value::Double(1.5)),
            ("active".to_string(), Value::Boolean(true)),
            ("missing".to_string(), Value::Null),
            ("created".to_string(), Value::DateTime(42)),
            ("blob".to_string(), Value::Binary { subtype: 0, bytes: vec![1, 2, 3] }),
        ];
        let encoded = encode_document(&fields, &dict);
        let decoded = decode_document(&encoded, &dict).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn round_trips_nested_document_and_array() {
        let dict = dict();
        let fields = vec![
            (
                "address".to_string(),
                Value::Document(vec![
                    ("city".to_string(), Value::String("NYC".into())),
                    ("zip".to_string(), Value::Int32(10001)),
                ]),
            ),
            (
                "coords".to_string(),
                Value::Array(vec![Value::Double(40.7), Value::Double(-74.0)]),
            ),
        ];
        let encoded = encode_document(&fields, &dict);
        let decoded = decode_document(&encoded, &dict).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn id_field_is_moved_first() {
        let dict = dict();
        let fields = vec![
            ("name".to_string(), Value::String("X".into())),
            ("_id".to_string(), Value::Int32(1)),
        ];
        let encoded = encode_document(&fields, &dict);
        let body = envelope_body(&encoded).unwrap();
        let first = FieldIter::new(body).next().unwrap().unwrap();
        assert_eq!(first.key_id, super::super::key_dict::ID_FIELD);
    }

    #[test]
    fn unknown_key_id_falls_back_to_decimal_string() {
        let writer_dict = dict();
        let fields = vec![("custom".to_string(), Value::Int32(7))];
        let encoded = encode_document(&fields, &writer_dict);

        let reader_dict = KeyDictionary::new(); // never saw "custom"
        let decoded = decode_document(&encoded, &reader_dict).unwrap();
        let id = writer_dict.lookup("custom").unwrap();
        assert_eq!(decoded[0].0, id.to_string());
    }

    #[test]
    fn skip_table_lands_on_next_type_or_end() {
        let dict = dict();
        let fields = vec![
            ("a".to_string(), Value::Int32(1)),
            ("b".to_string(), Value::String("hello".into())),
            ("c".to_string(), Value::Boolean(false)),
        ];
        let encoded = encode_document(&fields, &dict);
        let body = envelope_body(&encoded).unwrap();
        let collected: Vec<_> = FieldIter::new(body).collect::<Result<_>>().unwrap();
        assert_eq!(collected.len(), 3);
    }

    #[test]
    fn corrupt_missing_end_marker_fails() {
        let dict = dict();
        // high byte of the LE encoding is non-zero so truncating the trailing
        // End marker doesn't coincidentally leave a zero byte in its place.
        let fields = vec![("a".to_string(), Value::Int32(0x0102_0304))];
        let mut encoded = encode_document(&fields, &dict);
        let last = encoded.len() - 1;
        encoded.truncate(last);
        encoded[0..4].copy_from_slice(&(u32::try_from(encoded.len()).unwrap()).to_le_bytes());
        assert!(matches!(decode_document(&encoded, &dict), Err(DbError::Corrupt(_))));
    }
}
