// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Pairing HTTP API client.
//!
//! Three stateless RPCs bootstrap a device: registration (JWT-authenticated,
//! yields the per-device credentials secret), the device status lookup
//! (yields the broker URL) and the certificate exchange (CSR in, signed
//! client certificate out). Responses come `{"data": …}`-enveloped.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Identifier of the MQTT transport in the pairing API.
const PROTOCOL: &str = "astarte_mqtt_v1";

/// Errors of the pairing client.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("networking error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("the pairing base URL cannot carry path segments")]
    InvalidBaseUrl,
    #[error("device `{device_id}` has no `astarte_mqtt_v1` transport")]
    UnsupportedTransport { device_id: String },
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    hw_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    credentials_secret: String,
}

#[derive(Debug, Deserialize)]
struct DeviceStatus {
    protocols: std::collections::HashMap<String, TransportStatus>,
}

#[derive(Debug, Deserialize)]
struct TransportStatus {
    broker_url: Url,
}

#[derive(Debug, Serialize)]
struct CredentialsRequest<'a> {
    csr: &'a str,
}

#[derive(Debug, Deserialize)]
struct CredentialsResponse {
    client_crt: String,
}

/// Client for the pairing HTTP API of one realm.
#[derive(Clone, Debug)]
pub struct PairingClient {
    http: reqwest::Client,
    base_url: Url,
    realm: String,
}

impl PairingClient {
    /// Creates a client for the given pairing base URL and realm.
    pub fn new(base_url: Url, realm: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            realm: realm.into(),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PairingError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PairingError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PairingError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PairingError::Api { status, body });
        }
        Ok(response.json::<ApiResponse<T>>().await?.data)
    }

    /// Registers the device, returning its credentials secret.
    ///
    /// Only used when no secret is configured; requires a pairing JWT.
    pub async fn register_device(&self, jwt: &str, device_id: &str) -> Result<String, PairingError> {
        let url = self.endpoint(&["v1", &self.realm, "agent", "devices"])?;
        debug!(%url, "registering device");

        let response = self
            .http
            .post(url)
            .bearer_auth(jwt)
            .json(&RegisterRequest { hw_id: device_id })
            .send()
            .await?;
        let data: RegisterResponse = Self::decode(response).await?;
        Ok(data.credentials_secret)
    }

    /// Fetches the broker URL for the device.
    pub async fn broker_url(&self, secret: &str, device_id: &str) -> Result<Url, PairingError> {
        let url = self.endpoint(&["v1", &self.realm, "devices", device_id])?;
        debug!(%url, "fetching device status");

        let response = self.http.get(url).bearer_auth(secret).send().await?;
        let mut status: DeviceStatus = Self::decode(response).await?;
        status
            .protocols
            .remove(PROTOCOL)
            .map(|transport| transport.broker_url)
            .ok_or_else(|| PairingError::UnsupportedTransport {
                device_id: device_id.to_owned(),
            })
    }

    /// Exchanges the CSR for a signed client certificate PEM.
    pub async fn obtain_certificate(
        &self,
        secret: &str,
        device_id: &str,
        csr: &str,
    ) -> Result<String, PairingError> {
        let url = self.endpoint(&[
            "v1",
            &self.realm,
            "devices",
            device_id,
            "protocols",
            PROTOCOL,
            "credentials",
        ])?;
        debug!(%url, "requesting client certificate");

        let response = self
            .http
            .post(url)
            .bearer_auth(secret)
            .json(&CredentialsRequest { csr })
            .send()
            .await?;
        let data: CredentialsResponse = Self::decode(response).await?;
        Ok(data.client_crt)
    }

    /// Whether the pairing host answers at all.
    ///
    /// Any HTTP response counts, error statuses included; only transport
    /// failures count as unreachable. Used to tell "certificate rejected"
    /// apart from "no network" before refreshing credentials.
    pub async fn network_is_reachable(&self) -> bool {
        let Ok(url) = self.endpoint(&["health"]) else {
            return false;
        };
        self.http.get(url).send().await.is_ok()
    }
}
