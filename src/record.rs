//! Certificate-transparency log records.
//!
//! Each input line is one JSON object. The only field the pipeline
//! interprets is the certificate fingerprint at `data.leaf_cert.fingerprint`;
//! everything else is carried through untouched. The original JSON text is
//! kept as a [`RawValue`], so writing a record back out reproduces the input
//! object byte for byte.
//!
//! # Example
//!
//! ```
//! use ctdupe::record::CertRecord;
//!
//! let line = r#"{"data":{"leaf_cert":{"fingerprint":"AB:CD"}},"seen":1}"#;
//! let record = CertRecord::decode(line).unwrap();
//!
//! assert_eq!(record.fingerprint(), "AB:CD");
//! assert_eq!(record.encode(), line);
//! ```

use std::fmt;
use std::io::{self, Write};

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, Visitor};
use serde_json::value::RawValue;

/// Errors produced while decoding a single input line.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The line is not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The line is not valid JSON.
    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    /// The line is valid JSON but not an object.
    #[error("expected a JSON object")]
    NotAnObject,

    /// The object has no `data.leaf_cert.fingerprint`.
    #[error("missing data.leaf_cert.fingerprint")]
    MissingFingerprint,

    /// The fingerprint exists but is not a string.
    #[error("data.leaf_cert.fingerprint is not a string")]
    InvalidFingerprint,
}

/// Looks up one member of a JSON object, left raw so a wrong type anywhere
/// on the path reads as a missing fingerprint rather than a syntax error.
/// A repeated key resolves to its last occurrence.
struct Member(&'static str);

impl<'de> DeserializeSeed<'de> for Member {
    type Value = Option<&'de RawValue>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for Member {
    type Value = Option<&'de RawValue>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut found = None;
        while let Some(matches) = map.next_key_seed(KeyIs(self.0))? {
            if matches {
                found = Some(map.next_value()?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }
}

/// Compares an object key against a name without allocating.
struct KeyIs(&'static str);

impl<'de> DeserializeSeed<'de> for KeyIs {
    type Value = bool;

    fn deserialize<D>(self, deserializer: D) -> Result<bool, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Visitor<'de> for KeyIs {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an object key")
    }

    fn visit_str<E: de::Error>(self, key: &str) -> Result<bool, E> {
        Ok(key == self.0)
    }
}

/// The raw value of `name` in `object`, which must be a JSON object.
fn member<'a>(
    object: &'a RawValue,
    name: &'static str,
) -> Result<Option<&'a RawValue>, DecodeError> {
    let mut deserializer = serde_json::Deserializer::from_str(object.get());
    Ok(Member(name).deserialize(&mut deserializer)?)
}

fn is_object(raw: &RawValue) -> bool {
    raw.get().starts_with('{')
}

/// A decoded log entry together with its sort key.
#[derive(Debug, Clone)]
pub struct CertRecord {
    fingerprint: String,
    raw: Box<RawValue>,
}

impl CertRecord {
    /// Decode one input line.
    ///
    /// A trailing line terminator (`\n` or `\r\n`) is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the line is not a JSON object or does not
    /// carry a string fingerprint at `data.leaf_cert.fingerprint`.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let line = trim_line_end(line);
        let raw: Box<RawValue> = serde_json::from_str(line)?;

        if !is_object(&raw) {
            return Err(DecodeError::NotAnObject);
        }

        let data = member(&raw, "data")?
            .filter(|d| is_object(d))
            .ok_or(DecodeError::MissingFingerprint)?;
        let leaf_cert = member(data, "leaf_cert")?
            .filter(|c| is_object(c))
            .ok_or(DecodeError::MissingFingerprint)?;
        let fingerprint =
            member(leaf_cert, "fingerprint")?.ok_or(DecodeError::MissingFingerprint)?;

        // An explicit `null` is as good as absent.
        if fingerprint.get() == "null" {
            return Err(DecodeError::MissingFingerprint);
        }
        if !fingerprint.get().starts_with('"') {
            return Err(DecodeError::InvalidFingerprint);
        }
        let fingerprint: String = serde_json::from_str(fingerprint.get())?;

        Ok(Self { fingerprint, raw })
    }

    /// Decode one input line read as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidUtf8`] if the line is not UTF-8, and
    /// otherwise fails as [`CertRecord::decode`] does.
    pub fn decode_bytes(line: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(std::str::from_utf8(line)?)
    }

    /// The sort key of this record.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The record as JSON text, without a line terminator.
    #[must_use]
    pub fn encode(&self) -> &str {
        self.raw.get()
    }

    /// Borrow the record as a raw JSON value for embedding in other documents.
    #[must_use]
    pub fn as_raw(&self) -> &RawValue {
        &self.raw
    }

    /// Give up the record, keeping only its JSON text.
    #[must_use]
    pub fn into_raw(self) -> Box<RawValue> {
        self.raw
    }

    /// Write the record followed by a newline.
    ///
    /// # Errors
    ///
    /// Propagates any error from the underlying writer.
    pub fn write_line<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.raw.get().as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// Strip one trailing `\n` or `\r\n`.
fn trim_line_end(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
