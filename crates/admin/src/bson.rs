//! The subset of BSON needed to send one command and read its reply.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

const TYPE_DOUBLE: u8 = 0x01;
const TYPE_STRING: u8 = 0x02;
const TYPE_DOCUMENT: u8 = 0x03;
const TYPE_ARRAY: u8 = 0x04;
const TYPE_BINARY: u8 = 0x05;
const TYPE_OBJECT_ID: u8 = 0x07;
const TYPE_BOOLEAN: u8 = 0x08;
const TYPE_DATE_TIME: u8 = 0x09;
const TYPE_NULL: u8 = 0x0A;
const TYPE_INT32: u8 = 0x10;
const TYPE_TIMESTAMP: u8 = 0x11;
const TYPE_INT64: u8 = 0x12;
const TYPE_DECIMAL128: u8 = 0x13;

/// Smallest possible document: length prefix plus terminator.
const MIN_DOCUMENT_LEN: usize = 5;

/// Deepest nesting of documents and arrays accepted when decoding.
pub const MAX_NESTING_DEPTH: usize = 100;

/// A BSON value.
#[derive(Clone, Debug, PartialEq)]
pub enum Bson {
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Embedded document.
    Document(Document),
    /// Array.
    Array(Vec<Bson>),
    /// Binary data with its subtype.
    Binary {
        /// Binary subtype.
        subtype: u8,
        /// Raw bytes.
        bytes: Vec<u8>,
    },
    /// Object id.
    ObjectId([u8; 12]),
    /// Boolean.
    Boolean(bool),
    /// Milliseconds since the epoch.
    DateTime(i64),
    /// Null.
    Null,
    /// 32-bit integer.
    Int32(i32),
    /// Internal replication timestamp.
    Timestamp {
        /// Seconds since the epoch.
        time: u32,
        /// Ordinal within the second.
        increment: u32,
    },
    /// 64-bit integer.
    Int64(i64),
    /// Decimal128, kept as raw little-endian bytes.
    Decimal128([u8; 16]),
}

impl Bson {
    const fn type_byte(&self) -> u8 {
        match self {
            Self::Double(_) => TYPE_DOUBLE,
            Self::String(_) => TYPE_STRING,
            Self::Document(_) => TYPE_DOCUMENT,
            Self::Array(_) => TYPE_ARRAY,
            Self::Binary { .. } => TYPE_BINARY,
            Self::ObjectId(_) => TYPE_OBJECT_ID,
            Self::Boolean(_) => TYPE_BOOLEAN,
            Self::DateTime(_) => TYPE_DATE_TIME,
            Self::Null => TYPE_NULL,
            Self::Int32(_) => TYPE_INT32,
            Self::Timestamp { .. } => TYPE_TIMESTAMP,
            Self::Int64(_) => TYPE_INT64,
            Self::Decimal128(_) => TYPE_DECIMAL128,
        }
    }

    /// Numeric value as an `i32`, if it is an integer or an integral double in
    /// range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            Self::Int64(v) => i32::try_from(*v).ok(),
            Self::Double(v)
                if v.fract() == 0.0 && *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX) =>
            {
                Some(*v as i32)
            }
            _ => None,
        }
    }

    /// String slice, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Embedded document, if this is one.
    #[must_use]
    pub const fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Truthiness as the server evaluates an `ok` field.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Double(v) => *v != 0.0,
            Self::Int32(v) => *v != 0,
            Self::Int64(v) => *v != 0,
            Self::Null => false,
            _ => true,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Double(v) => buf.put_f64_le(*v),
            Self::String(s) => put_string(buf, s),
            Self::Document(d) => d.encode(buf),
            Self::Array(items) => encode_array(items, buf),
            Self::Binary { subtype, bytes } => {
                put_len(buf, bytes.len());
                buf.put_u8(*subtype);
                buf.put_slice(bytes);
            }
            Self::ObjectId(id) => buf.put_slice(id),
            Self::Boolean(b) => buf.put_u8(u8::from(*b)),
            Self::DateTime(v) | Self::Int64(v) => buf.put_i64_le(*v),
            Self::Null => {}
            Self::Int32(v) => buf.put_i32_le(*v),
            Self::Timestamp { time, increment } => {
                buf.put_u32_le(*increment);
                buf.put_u32_le(*time);
            }
            Self::Decimal128(raw) => buf.put_slice(raw),
        }
    }

    fn decode(type_byte: u8, buf: &mut &[u8], depth: usize) -> Result<Self> {
        let value = match type_byte {
            TYPE_DOUBLE => Self::Double(take(buf, 8)?.get_f64_le()),
            TYPE_STRING => Self::String(get_string(buf)?),
            TYPE_DOCUMENT => Self::Document(Document::decode_at(buf, depth + 1)?),
            TYPE_ARRAY => Self::Array(
                Document::decode_at(buf, depth + 1)?
                    .into_iter()
                    .map(|(_, value)| value)
                    .collect(),
            ),
            TYPE_BINARY => {
                let len = get_len(buf)?;
                let subtype = take(buf, 1)?.get_u8();
                Self::Binary {
                    subtype,
                    bytes: take(buf, len)?.to_vec(),
                }
            }
            TYPE_OBJECT_ID => {
                let mut id = [0u8; 12];
                take(buf, 12)?.copy_to_slice(&mut id);
                Self::ObjectId(id)
            }
            TYPE_BOOLEAN => match take(buf, 1)?.get_u8() {
                0 => Self::Boolean(false),
                1 => Self::Boolean(true),
                other => return Err(Error::Protocol(format!("invalid boolean byte {other:#x}"))),
            },
            TYPE_DATE_TIME => Self::DateTime(take(buf, 8)?.get_i64_le()),
            TYPE_NULL => Self::Null,
            TYPE_INT32 => Self::Int32(take(buf, 4)?.get_i32_le()),
            TYPE_TIMESTAMP => {
                let mut raw = take(buf, 8)?;
                let increment = raw.get_u32_le();
                let time = raw.get_u32_le();
                Self::Timestamp { time, increment }
            }
            TYPE_INT64 => Self::Int64(take(buf, 8)?.get_i64_le()),
            TYPE_DECIMAL128 => {
                let mut raw = [0u8; 16];
                take(buf, 16)?.copy_to_slice(&mut raw);
                Self::Decimal128(raw)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unsupported element type {other:#x}"
                )));
            }
        };

        Ok(value)
    }
}

impl From<f64> for Bson {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i32> for Bson {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for Bson {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<bool> for Bson {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Bson {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Bson {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Document> for Bson {
    fn from(value: Document) -> Self {
        Self::Document(value)
    }
}

impl From<Vec<Bson>> for Bson {
    fn from(value: Vec<Bson>) -> Self {
        Self::Array(value)
    }
}

/// An ordered BSON document. Key order is significant: the first key of a
/// command document names the command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Bson)>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Sets `key`, replacing an existing value in place or appending.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) {
        let key = key.into();
        let value = value.into();

        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Builder form of [`Document::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.insert(key, value);
        self
    }

    /// Looks up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Name of the first key, which is the command name for command documents.
    #[must_use]
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    /// Iterates over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Appends the encoded document to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_i32_le(0);

        for (key, value) in &self.entries {
            buf.put_u8(value.type_byte());
            put_cstring(buf, key);
            value.encode(buf);
        }

        buf.put_u8(0);
        patch_len(buf, start);
    }

    /// Decodes one document from the front of `buf`, advancing past it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the bytes are not a well-formed document
    /// or nest deeper than [`MAX_NESTING_DEPTH`].
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        Self::decode_at(buf, 0)
    }

    fn decode_at(buf: &mut &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::Protocol(format!(
                "document nested deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }

        let len = get_len(buf)?;
        if len < MIN_DOCUMENT_LEN {
            return Err(Error::Protocol(format!("document length {len} too small")));
        }

        let mut body = take(buf, len - 4)?;
        let mut entries = Vec::new();

        loop {
            let type_byte = take(&mut body, 1)?.get_u8();
            if type_byte == 0 {
                break;
            }

            let key = get_cstring(&mut body)?;
            let value = Bson::decode(type_byte, &mut body, depth)?;
            entries.push((key, value));
        }

        if !body.is_empty() {
            return Err(Error::Protocol(format!(
                "{} trailing bytes after document terminator",
                body.len()
            )));
        }

        Ok(Self { entries })
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = std::vec::IntoIter<(String, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

fn encode_array(items: &[Bson], buf: &mut BytesMut) {
    let start = buf.len();
    buf.put_i32_le(0);

    for (index, item) in items.iter().enumerate() {
        buf.put_u8(item.type_byte());
        put_cstring(buf, &index.to_string());
        item.encode(buf);
    }

    buf.put_u8(0);
    patch_len(buf, start);
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn patch_len(buf: &mut BytesMut, start: usize) {
    let len = (buf.len() - start) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn put_len(buf: &mut BytesMut, len: usize) {
    buf.put_i32_le(len as i32);
}

fn put_cstring(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

fn put_string(buf: &mut BytesMut, value: &str) {
    put_len(buf, value.len() + 1);
    put_cstring(buf, value);
}

/// Splits `len` bytes off the front of `buf`.
fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(Error::Protocol(format!(
            "needed {len} bytes, {} remaining",
            buf.len()
        )));
    }

    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn get_len(buf: &mut &[u8]) -> Result<usize> {
    let len = take(buf, 4)?.get_i32_le();
    usize::try_from(len).map_err(|_| Error::Protocol(format!("negative length {len}")))
}

fn get_cstring(buf: &mut &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::Protocol("unterminated key".to_string()))?;
    let raw = take(buf, end + 1)?;

    String::from_utf8(raw[..end].to_vec())
        .map_err(|e| Error::Protocol(format!("key is not utf-8: {e}")))
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    let len = get_len(buf)?;
    if len == 0 {
        return Err(Error::Protocol("string length 0".to_string()));
    }

    let raw = take(buf, len)?;
    if raw[len - 1] != 0 {
        return Err(Error::Protocol("string missing terminator".to_string()));
    }

    String::from_utf8(raw[..len - 1].to_vec())
        .map_err(|e| Error::Protocol(format!("string is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_int32_document() {
        let mut buf = BytesMut::new();
        Document::new().with("a", 1).encode(&mut buf);

        assert_eq!(
            &buf[..],
            &[12, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 0][..]
        );
    }

    #[test]
    fn test_array_keys_are_positions() {
        let mut buf = BytesMut::new();
        Document::new()
            .with("m", vec![Bson::from("x"), Bson::from(true)])
            .encode(&mut buf);

        let mut slice = &buf[..];
        let decoded = Document::decode(&mut slice).unwrap();

        assert!(slice.is_empty());
        assert_eq!(
            decoded.get("m"),
            Some(&Bson::Array(vec![Bson::from("x"), Bson::from(true)]))
        );
        // "0" and "1" keys inside the embedded array document
        assert!(buf.windows(2).any(|w| w == [b'0', 0]));
        assert!(buf.windows(2).any(|w| w == [b'1', 0]));
    }

    #[test]
    fn test_decodes_server_reply_types() {
        let reply = Document::new()
            .with("ok", 1.0)
            .with(
                "$clusterTime",
                Document::new()
                    .with(
                        "clusterTime",
                        Bson::Timestamp {
                            time: 1_700_000_000,
                            increment: 3,
                        },
                    )
                    .with(
                        "signature",
                        Document::new().with(
                            "hash",
                            Bson::Binary {
                                subtype: 0,
                                bytes: vec![0; 20],
                            },
                        ),
                    ),
            )
            .with("electionId", Bson::ObjectId([7; 12]))
            .with("operationTime", Bson::DateTime(42))
            .with("keyId", Bson::Int64(-9));

        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        let decoded = Document::decode(&mut &buf[..]).unwrap();

        assert_eq!(decoded, reply);
        assert_eq!(decoded.first_key(), Some("ok"));
        assert!(decoded.get("ok").unwrap().is_truthy());
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut doc = Document::new().with("a", 1).with("b", 2);
        doc.insert("a", "changed");

        let keys: Vec<_> = doc.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(doc.get("a").and_then(Bson::as_str), Some("changed"));
    }

    #[test]
    fn test_rejects_truncated_document() {
        let mut buf = BytesMut::new();
        Document::new().with("a", "hello").encode(&mut buf);
        buf.truncate(buf.len() - 3);

        assert!(matches!(
            Document::decode(&mut &buf[..]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let raw = [8u8, 0, 0, 0, 0x7F, b'a', 0, 0];

        assert!(matches!(
            Document::decode(&mut &raw[..]),
            Err(Error::Protocol(_))
        ));
    }

    fn nested(depth: usize) -> Document {
        (0..depth).fold(Document::new().with("ok", 1), |inner, _| {
            Document::new().with("n", inner)
        })
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let mut buf = BytesMut::new();
        nested(MAX_NESTING_DEPTH).encode(&mut buf);
        assert!(Document::decode(&mut &buf[..]).is_ok());

        buf.clear();
        nested(MAX_NESTING_DEPTH + 1).encode(&mut buf);
        assert!(matches!(
            Document::decode(&mut &buf[..]),
            Err(Error::Protocol(msg)) if msg.contains("nested")
        ));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Bson::Double(23.0).as_i32(), Some(23));
        assert_eq!(Bson::Double(2.5).as_i32(), None);
        assert_eq!(Bson::Int64(23).as_i32(), Some(23));
        assert!(!Bson::Int32(0).is_truthy());
        assert!(!Bson::Double(0.0).is_truthy());
    }
}
