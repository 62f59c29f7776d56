// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};

use super::tag;

/// Incremental builder for a BSON document.
///
/// The buffer starts with a four-byte size placeholder; [`finish`] appends
/// the terminator and back-patches the size. Keys must not contain NUL
/// bytes (they are written as cstrings).
///
/// [`finish`]: DocumentBuilder::finish
#[derive(Debug)]
pub struct DocumentBuilder {
    buf: Vec<u8>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    /// Creates an empty document builder.
    pub fn new() -> Self {
        Self { buf: vec![0; 4] }
    }

    fn element(&mut self, tag: u8, key: &str) {
        debug_assert!(!key.as_bytes().contains(&0), "BSON keys cannot contain NUL");
        self.buf.push(tag);
        self.buf.extend_from_slice(key.as_bytes());
        self.buf.push(0);
    }

    /// Appends an IEEE-754 double, little-endian.
    pub fn append_double(&mut self, key: &str, value: f64) -> &mut Self {
        self.element(tag::DOUBLE, key);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a 32-bit integer, little-endian two's complement.
    pub fn append_int32(&mut self, key: &str, value: i32) -> &mut Self {
        self.element(tag::INT32, key);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a 64-bit integer, little-endian two's complement.
    pub fn append_int64(&mut self, key: &str, value: i64) -> &mut Self {
        self.element(tag::INT64, key);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a boolean as a single `0`/`1` byte.
    pub fn append_boolean(&mut self, key: &str, value: bool) -> &mut Self {
        self.element(tag::BOOLEAN, key);
        self.buf.push(u8::from(value));
        self
    }

    /// Appends a UTF-8 string: length including the trailing NUL, bytes, NUL.
    pub fn append_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.element(tag::STRING, key);
        let len = value.len() as i32 + 1;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        self
    }

    /// Appends a binary blob with the generic subtype `0x00`.
    pub fn append_binary(&mut self, key: &str, value: &[u8]) -> &mut Self {
        self.element(tag::BINARY, key);
        self.buf.extend_from_slice(&(value.len() as i32).to_le_bytes());
        self.buf.push(0x00);
        self.buf.extend_from_slice(value);
        self
    }

    /// Appends a UTC datetime as milliseconds since the epoch.
    pub fn append_datetime(&mut self, key: &str, value: DateTime<Utc>) -> &mut Self {
        self.element(tag::DATETIME, key);
        self.buf.extend_from_slice(&value.timestamp_millis().to_le_bytes());
        self
    }

    /// Appends an already-finalized document verbatim.
    pub fn append_document(&mut self, key: &str, document: &[u8]) -> &mut Self {
        self.element(tag::DOCUMENT, key);
        self.buf.extend_from_slice(document);
        self
    }

    /// Appends an already-finalized document as an array element.
    pub(crate) fn append_array_document(&mut self, key: &str, document: &[u8]) -> &mut Self {
        self.element(tag::ARRAY, key);
        self.buf.extend_from_slice(document);
        self
    }

    /// Appends an array of doubles.
    pub fn append_double_array(&mut self, key: &str, values: &[f64]) -> &mut Self {
        let sub = array_document(values.iter(), |sub, index, value| {
            sub.append_double(index, *value);
        });
        self.append_array_document(key, &sub)
    }

    /// Appends an array of 32-bit integers.
    pub fn append_int32_array(&mut self, key: &str, values: &[i32]) -> &mut Self {
        let sub = array_document(values.iter(), |sub, index, value| {
            sub.append_int32(index, *value);
        });
        self.append_array_document(key, &sub)
    }

    /// Appends an array of 64-bit integers.
    pub fn append_int64_array(&mut self, key: &str, values: &[i64]) -> &mut Self {
        let sub = array_document(values.iter(), |sub, index, value| {
            sub.append_int64(index, *value);
        });
        self.append_array_document(key, &sub)
    }

    /// Appends an array of booleans.
    pub fn append_boolean_array(&mut self, key: &str, values: &[bool]) -> &mut Self {
        let sub = array_document(values.iter(), |sub, index, value| {
            sub.append_boolean(index, *value);
        });
        self.append_array_document(key, &sub)
    }

    /// Appends an array of strings.
    pub fn append_string_array<S: AsRef<str>>(&mut self, key: &str, values: &[S]) -> &mut Self {
        let sub = array_document(values.iter(), |sub, index, value| {
            sub.append_string(index, value.as_ref());
        });
        self.append_array_document(key, &sub)
    }

    /// Appends an array of binary blobs.
    pub fn append_binary_array<B: AsRef<[u8]>>(&mut self, key: &str, values: &[B]) -> &mut Self {
        let sub = array_document(values.iter(), |sub, index, value| {
            sub.append_binary(index, value.as_ref());
        });
        self.append_array_document(key, &sub)
    }

    /// Appends an array of UTC datetimes.
    pub fn append_datetime_array(&mut self, key: &str, values: &[DateTime<Utc>]) -> &mut Self {
        let sub = array_document(values.iter(), |sub, index, value| {
            sub.append_datetime(index, *value);
        });
        self.append_array_document(key, &sub)
    }

    /// Finalizes the document: appends the terminator and patches the size
    /// prefix, returning the owned buffer.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(0);
        let size = self.buf.len() as i32;
        self.buf[..4].copy_from_slice(&size.to_le_bytes());
        self.buf
    }
}

/// Serializes an array's elements into a finalized sub-document whose keys
/// are the decimal representations of the ascending indices.
fn array_document<T>(
    values: impl Iterator<Item = T>,
    mut append: impl FnMut(&mut DocumentBuilder, &str, T),
) -> Vec<u8> {
    let mut sub = DocumentBuilder::new();
    for (i, value) in values.enumerate() {
        append(&mut sub, &i.to_string(), value);
    }
    sub.finish()
}
