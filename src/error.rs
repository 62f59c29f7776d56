// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::{
    bson::BsonError, credentials::CredentialsError, interface::InterfaceError, pairing::PairingError,
    properties::PropertiesError, store::StoreError,
};

/// The errors of the device SDK.
#[allow(missing_docs)]
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("interface `{0}` is not registered")]
    InterfaceNotFound(String),
    #[error("no mapping matches `{path}` in interface `{interface}`")]
    MappingNotFound { interface: String, path: String },
    #[error("invalid path `{0}`, paths must begin with `/`")]
    InvalidPath(String),
    #[error("invalid interface: {0}")]
    Interface(#[from] InterfaceError),
    #[error("interface `{0}` conflicts with the installed version")]
    ConflictingInterface(String),
    #[error("interface `{0}` does not take object aggregates")]
    NotAnObject(String),
    #[error("mapping `{path}` of `{interface}` does not allow unset")]
    UnsetNotAllowed { interface: String, path: String },
    #[error("no credentials secret available and no pairing token configured")]
    MissingCredentials,
    #[error("broker URL `{0}` is not a valid MQTT endpoint")]
    InvalidBrokerUrl(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("request rejected by the MQTT client: {0}")]
    Publish(#[from] rumqttc::ClientError),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("BSON error: {0}")]
    Bson(#[from] BsonError),
    #[error("properties payload error: {0}")]
    Properties(#[from] PropertiesError),
    #[error("property store error: {0}")]
    Store(#[from] StoreError),
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),
    #[error("unexpected state: {0}")]
    Internal(&'static str),
}
