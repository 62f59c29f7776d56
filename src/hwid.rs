// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Hardware identifier derivation.
//!
//! The platform identifies a device by a 16-byte identity, transmitted
//! base64url-encoded without padding. When the caller does not supply one,
//! the identity is derived from stable host features so the same machine
//! keeps the same id across restarts.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tracing::debug;
use uuid::Uuid;

/// Namespace for identities derived from host features.
const DEVICE_NAMESPACE: Uuid = Uuid::from_bytes([
    0xf7, 0x9a, 0xd0, 0x4d, 0x5c, 0x1e, 0x48, 0xa8, 0x96, 0xa1, 0x0e, 0x74, 0xcb, 0x32, 0x7f, 0x42,
]);

/// Encodes a 16-byte device identity as unpadded base64url.
pub fn encode_device_id(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Derives the encoded hardware id for this host.
///
/// Uses the machine id when the platform exposes one, hashed into the
/// device namespace; falls back to a random identity otherwise (which a
/// production device should avoid by configuring an explicit id).
pub fn derive_device_id() -> String {
    let id = match machine_id() {
        Some(machine_id) => Uuid::new_v5(&DEVICE_NAMESPACE, machine_id.as_bytes()),
        None => {
            debug!("no stable machine id found, falling back to a random device id");
            Uuid::new_v4()
        }
    };
    encode_device_id(id)
}

fn machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_owned());
            }
        }
    }
    None
}
