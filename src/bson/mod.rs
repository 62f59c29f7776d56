// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! BSON wire codec.
//!
//! Every payload exchanged with the broker is a BSON document wrapping the
//! value under the key `"v"` (plus an optional timestamp under `"t"`). This
//! module implements the subset of the format those payloads use: a
//! [`DocumentBuilder`] that produces finalized documents and a borrowed
//! [`Document`] walker that reads them without allocating.

mod de;
mod ser;

pub use self::{
    de::{Document, Element, Elements},
    ser::DocumentBuilder,
};

/// Element type tags recognized on the wire.
pub(crate) mod tag {
    pub(crate) const DOUBLE: u8 = 0x01;
    pub(crate) const STRING: u8 = 0x02;
    pub(crate) const DOCUMENT: u8 = 0x03;
    pub(crate) const ARRAY: u8 = 0x04;
    pub(crate) const BINARY: u8 = 0x05;
    pub(crate) const BOOLEAN: u8 = 0x08;
    pub(crate) const DATETIME: u8 = 0x09;
    pub(crate) const INT32: u8 = 0x10;
    pub(crate) const INT64: u8 = 0x12;

    pub(crate) fn is_recognized(tag: u8) -> bool {
        matches!(
            tag,
            DOUBLE | STRING | DOCUMENT | ARRAY | BINARY | BOOLEAN | DATETIME | INT32 | INT64
        )
    }
}

/// Errors of the BSON codec.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BsonError {
    #[error("document is truncated")]
    Truncated,
    #[error("document size prefix is invalid")]
    InvalidSize,
    #[error("document terminator is missing")]
    MissingTerminator,
    #[error("element key is not a valid cstring")]
    InvalidKey,
    #[error("unknown element tag {0:#04x}")]
    UnknownTag(u8),
    #[error("value is not valid for tag {0:#04x}")]
    InvalidValue(u8),
    #[error("element has unexpected tag {0:#04x}")]
    UnexpectedTag(u8),
    #[error("required key `{0}` is missing")]
    MissingKey(&'static str),
    #[error("string value is not valid UTF-8")]
    InvalidUtf8,
    #[error("arrays of arrays are not representable")]
    NestedArray,
    #[error("datetime value is out of range")]
    DateTimeOutOfRange,
}
