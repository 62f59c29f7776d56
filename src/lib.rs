// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Device-side SDK for Astarte-compatible telemetry and command platforms.
//!
//! A device declares a set of typed [`Interface`]s, obtains a client
//! certificate through the pairing HTTP API and talks to the broker over
//! MQTT/TLS: datastream samples and property updates go out as BSON
//! payloads, server-owned updates come back as [`DeviceEvent`]s, and
//! property state is kept consistent with the server across disconnects.
//!
//! ```no_run
//! use edgelink::{
//!     interface::{Interface, InterfaceKind, Mapping, MappingType, Ownership, Reliability},
//!     DeviceBuilder, DeviceConfig,
//! };
//!
//! # async fn example() -> Result<(), edgelink::Error> {
//! let config = DeviceConfig::new(
//!     "myrealm",
//!     "https://api.example.com/pairing".parse().unwrap(),
//!     "/var/lib/mydevice",
//! )
//! .with_pairing_jwt("…");
//!
//! let interface = Interface::new(
//!     "org.example.Sensors",
//!     0,
//!     1,
//!     InterfaceKind::Datastream,
//!     Ownership::Device,
//! )?
//! .with_mapping(Mapping::new("/temperature", MappingType::Double)?.with_reliability(Reliability::Guaranteed));
//!
//! let (client, connection) = DeviceBuilder::new(config).interface(interface)?.connect().await?;
//! tokio::spawn(connection.run());
//!
//! client.send("org.example.Sensors", "/temperature", 21.5).await?;
//! while let Some(event) = client.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod bson;
mod builder;
mod client;
pub mod config;
mod credentials;
mod error;
mod event;
mod hwid;
pub mod interface;
mod introspection;
#[cfg(test)]
pub(crate) mod mock;
mod pairing;
mod payload;
mod properties;
mod retry;
mod session;
pub mod store;
mod topic;
pub mod types;

pub use self::{
    builder::DeviceBuilder,
    client::DeviceClient,
    config::DeviceConfig,
    credentials::{Credentials, CredentialsError},
    error::Error,
    event::{Data, DeviceEvent},
    hwid::{derive_device_id, encode_device_id},
    interface::Interface,
    introspection::Introspection,
    pairing::{PairingClient, PairingError},
    properties::PropertiesError,
    session::DeviceConnection,
    store::{MemoryStore, PropertyStore, SqliteStore, StoredProp},
    types::Value,
};
