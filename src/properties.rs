// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Framing of the property-reconciliation control payloads.
//!
//! Both `/control/consumer/properties` and `/control/producer/properties`
//! carry the same frame: four big-endian bytes with the uncompressed size,
//! followed by a zlib stream of the semicolon-joined `interface+path`
//! concatenations.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use thiserror::Error;
use tracing::warn;

/// Errors of the purge payload framing.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum PropertiesError {
    #[error("payload is too short to carry the size prefix")]
    Truncated,
    #[error("zlib stream error: {0}")]
    Compression(#[from] std::io::Error),
}

/// Extracts the set-property entries from an inbound purge payload.
pub(crate) fn extract_set_properties(payload: &[u8]) -> Result<Vec<String>, PropertiesError> {
    let prefix = payload.get(..4).ok_or(PropertiesError::Truncated)?;
    let declared = u32::from_be_bytes(prefix.try_into().expect("four bytes")) as usize;

    let mut list = String::with_capacity(declared);
    ZlibDecoder::new(&payload[4..]).read_to_string(&mut list)?;
    if list.len() != declared {
        warn!(
            "purge payload declared {declared} bytes but decompressed to {}",
            list.len()
        );
    }

    if list.is_empty() {
        return Ok(Vec::new());
    }
    Ok(list.split(';').map(str::to_owned).collect())
}

/// Builds an outbound purge payload from set-property entries.
pub(crate) fn serialize_set_properties<S: AsRef<str>>(entries: &[S]) -> Result<Vec<u8>, PropertiesError> {
    let list = entries
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(";");

    let mut payload = Vec::with_capacity(4 + list.len());
    payload.extend_from_slice(&(list.len() as u32).to_be_bytes());

    let mut encoder = ZlibEncoder::new(payload, Compression::default());
    encoder.write_all(list.as_bytes())?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn roundtrip() {
        let entries = ["org.example.Dev/a", "org.example.Dev/b"];
        let payload = serialize_set_properties(&entries).unwrap();
        assert_eq!(extract_set_properties(&payload).unwrap(), entries);
    }

    #[test]
    fn prefix_is_the_uncompressed_length() {
        let entries = ["org.example.Dev/a"];
        let payload = serialize_set_properties(&entries).unwrap();
        let declared = u32::from_be_bytes(payload[..4].try_into().unwrap());
        assert_eq!(declared as usize, "org.example.Dev/a".len());
    }

    #[test]
    fn empty_list_has_zero_prefix() {
        let payload = serialize_set_properties::<&str>(&[]).unwrap();
        assert_eq!(&payload[..4], &[0, 0, 0, 0]);
        assert_eq!(extract_set_properties(&payload).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn known_empty_frame_decodes() {
        // Zero size prefix followed by the zlib stream of the empty string.
        let payload = [0x00, 0x00, 0x00, 0x00, 0x78, 0x9c, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(extract_set_properties(&payload).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(matches!(
            extract_set_properties(&[0, 0]),
            Err(PropertiesError::Truncated)
        ));
    }

    #[test]
    fn corrupt_stream_is_rejected() {
        assert!(matches!(
            extract_set_properties(&[0, 0, 0, 4, 0xde, 0xad, 0xbe, 0xef]),
            Err(PropertiesError::Compression(_))
        ));
    }
}
