// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Device configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

fn default_keepalive_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    50
}

/// Construction-time configuration of a device.
///
/// The realm and the pairing base URL are required. The device id is
/// derived from host features when absent; the credentials secret is
/// obtained by registering (which requires the pairing JWT) when neither
/// configured nor persisted from an earlier registration.
#[must_use]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// The realm this device belongs to.
    pub realm: String,
    /// Base URL of the pairing API.
    pub pairing_url: Url,
    /// Directory holding the device key, CSR and certificate.
    pub credentials_dir: PathBuf,
    /// Encoded hardware id; derived when absent.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Per-device credentials secret; obtained by registering when absent.
    #[serde(default)]
    pub credentials_secret: Option<String>,
    /// Pairing JWT used only for registration.
    #[serde(default)]
    pub pairing_jwt: Option<String>,
    /// MQTT keep-alive interval in seconds.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Capacity of the command and event channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl DeviceConfig {
    /// Creates a configuration with the required fields and defaults for
    /// everything else.
    pub fn new(realm: impl Into<String>, pairing_url: Url, credentials_dir: impl Into<PathBuf>) -> Self {
        Self {
            realm: realm.into(),
            pairing_url,
            credentials_dir: credentials_dir.into(),
            device_id: None,
            credentials_secret: None,
            pairing_jwt: None,
            keepalive_secs: default_keepalive_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Sets the encoded hardware id.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Sets the credentials secret.
    pub fn with_credentials_secret(mut self, secret: impl Into<String>) -> Self {
        self.credentials_secret = Some(secret.into());
        self
    }

    /// Sets the pairing JWT used for registration.
    pub fn with_pairing_jwt(mut self, jwt: impl Into<String>) -> Self {
        self.pairing_jwt = Some(jwt.into());
        self
    }

    /// Sets the MQTT keep-alive interval in seconds.
    pub fn with_keepalive_secs(mut self, secs: u64) -> Self {
        self.keepalive_secs = secs;
        self
    }
}
