// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, TimeZone, Utc};

use super::{tag, BsonError};

/// A borrowed view over a finalized BSON document.
///
/// Parsing validates the framing only; elements are interpreted lazily by
/// [`Elements`] and the typed accessors on [`Element`], without allocating.
#[derive(Clone, Copy, Debug)]
pub struct Document<'a> {
    /// The element list: everything between the size prefix and the
    /// terminator. Its length is the sole end-of-document authority for
    /// the element walk.
    list: &'a [u8],
}

impl<'a> Document<'a> {
    /// Parses the framing of a document: size prefix, bounds, terminator.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BsonError> {
        if bytes.len() < 5 {
            return Err(BsonError::Truncated);
        }
        let declared = i32::from_le_bytes(bytes[..4].try_into().expect("four bytes"));
        let declared = usize::try_from(declared).map_err(|_| BsonError::InvalidSize)?;
        if declared < 5 {
            return Err(BsonError::InvalidSize);
        }
        if declared > bytes.len() {
            return Err(BsonError::Truncated);
        }
        if bytes[declared - 1] != 0 {
            return Err(BsonError::MissingTerminator);
        }
        Ok(Self {
            list: &bytes[4..declared - 1],
        })
    }

    /// The cheap validity predicate used before routing inbound payloads.
    ///
    /// True iff the buffer frames correctly and, when non-empty, is big
    /// enough to hold at least one element whose type tag is recognized.
    /// Never panics.
    pub fn validates(bytes: &'a [u8]) -> bool {
        let Ok(doc) = Self::parse(bytes) else {
            return false;
        };
        if doc.list.is_empty() {
            return true;
        }
        // A non-empty document is at least size + tag + empty key + value.
        bytes.len() >= 8 && tag::is_recognized(doc.list[0])
    }

    /// Iterates the elements of the document in wire order.
    pub fn elements(&self) -> Elements<'a> {
        Elements {
            rest: self.list,
            failed: false,
        }
    }

    /// Linearly scans for the element with exactly the given key.
    pub fn lookup(&self, key: &str) -> Result<Option<Element<'a>>, BsonError> {
        for element in self.elements() {
            let element = element?;
            if element.key == key {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }
}

/// Iterator over the elements of a [`Document`].
///
/// An unrecognized tag yields its error and ends the walk without touching
/// the value bytes; a value running past the element list does the same.
#[derive(Clone, Debug)]
pub struct Elements<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for Elements<'a> {
    type Item = Result<Element<'a>, BsonError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match self.parse_next() {
            Ok(element) => Some(Ok(element)),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl<'a> Elements<'a> {
    fn parse_next(&mut self) -> Result<Element<'a>, BsonError> {
        let tag = self.rest[0];
        let key_bytes = &self.rest[1..];
        let nul = key_bytes
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(BsonError::InvalidKey)?;
        let key = std::str::from_utf8(&key_bytes[..nul]).map_err(|_| BsonError::InvalidKey)?;
        let value_rest = &key_bytes[nul + 1..];

        let value_size = match tag {
            tag::DOUBLE | tag::DATETIME | tag::INT64 => 8,
            tag::INT32 => 4,
            tag::BOOLEAN => 1,
            tag::STRING => 4usize
                .checked_add(length_prefix(value_rest)?)
                .ok_or(BsonError::InvalidSize)?,
            tag::BINARY => 5usize
                .checked_add(length_prefix(value_rest)?)
                .ok_or(BsonError::InvalidSize)?,
            tag::DOCUMENT | tag::ARRAY => length_prefix(value_rest)?,
            unknown => return Err(BsonError::UnknownTag(unknown)),
        };
        if value_size > value_rest.len() {
            return Err(BsonError::Truncated);
        }

        let element = Element {
            tag,
            key,
            value: &value_rest[..value_size],
        };
        self.rest = &value_rest[value_size..];
        Ok(element)
    }
}

fn length_prefix(bytes: &[u8]) -> Result<usize, BsonError> {
    let prefix = bytes.get(..4).ok_or(BsonError::Truncated)?;
    let length = i32::from_le_bytes(prefix.try_into().expect("four bytes"));
    usize::try_from(length).map_err(|_| BsonError::InvalidSize)
}

/// One typed element of a document: tag, key, and the raw value bytes.
#[derive(Clone, Copy, Debug)]
pub struct Element<'a> {
    tag: u8,
    key: &'a str,
    value: &'a [u8],
}

impl<'a> Element<'a> {
    /// The element's type tag.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// The element's key.
    pub fn key(&self) -> &'a str {
        self.key
    }

    fn expect_tag(&self, expected: u8) -> Result<(), BsonError> {
        if self.tag == expected {
            Ok(())
        } else {
            Err(BsonError::UnexpectedTag(self.tag))
        }
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N], BsonError> {
        self.value
            .try_into()
            .map_err(|_| BsonError::InvalidValue(self.tag))
    }

    /// Reads the element as a double.
    pub fn as_double(&self) -> Result<f64, BsonError> {
        self.expect_tag(tag::DOUBLE)?;
        Ok(f64::from_le_bytes(self.fixed()?))
    }

    /// Reads the element as a 32-bit integer.
    pub fn as_int32(&self) -> Result<i32, BsonError> {
        self.expect_tag(tag::INT32)?;
        Ok(i32::from_le_bytes(self.fixed()?))
    }

    /// Reads the element as a 64-bit integer.
    pub fn as_int64(&self) -> Result<i64, BsonError> {
        self.expect_tag(tag::INT64)?;
        Ok(i64::from_le_bytes(self.fixed()?))
    }

    /// Reads the element as a boolean.
    pub fn as_boolean(&self) -> Result<bool, BsonError> {
        self.expect_tag(tag::BOOLEAN)?;
        match self.value {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(BsonError::InvalidValue(self.tag)),
        }
    }

    /// Reads the element as a UTC datetime from milliseconds since the epoch.
    pub fn as_datetime(&self) -> Result<DateTime<Utc>, BsonError> {
        self.expect_tag(tag::DATETIME)?;
        let millis = i64::from_le_bytes(self.fixed()?);
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or(BsonError::DateTimeOutOfRange)
    }

    /// Reads the element as a string slice.
    pub fn as_str(&self) -> Result<&'a str, BsonError> {
        self.expect_tag(tag::STRING)?;
        let length = length_prefix(self.value)?;
        if length < 1 || 4 + length > self.value.len() {
            return Err(BsonError::InvalidValue(self.tag));
        }
        std::str::from_utf8(&self.value[4..4 + length - 1]).map_err(|_| BsonError::InvalidUtf8)
    }

    /// Reads the element as a binary blob, any subtype.
    pub fn as_binary(&self) -> Result<&'a [u8], BsonError> {
        self.expect_tag(tag::BINARY)?;
        let length = length_prefix(self.value)?;
        if 5 + length > self.value.len() {
            return Err(BsonError::InvalidValue(self.tag));
        }
        Ok(&self.value[5..5 + length])
    }

    /// Reads the element as an embedded document or array.
    pub fn as_document(&self) -> Result<Document<'a>, BsonError> {
        if self.tag != tag::DOCUMENT && self.tag != tag::ARRAY {
            return Err(BsonError::UnexpectedTag(self.tag));
        }
        Document::parse(self.value)
    }
}
