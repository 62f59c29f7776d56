// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Device bootstrap.
//!
//! The builder collects the configuration, the declared interfaces and the
//! property store, then [`connect`] runs the whole credential bootstrap:
//! secret (registering when needed), certificate (pairing when needed),
//! broker URL, TLS client and the engine/client pair.
//!
//! [`connect`]: DeviceBuilder::connect

use std::sync::{atomic::AtomicBool, Arc};

use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::{
    client::DeviceClient,
    config::DeviceConfig,
    credentials::Credentials,
    hwid,
    interface::Interface,
    introspection::Introspection,
    pairing::PairingClient,
    session::{DeviceConnection, SessionSetup, Shared},
    store::{MemoryStore, PropertyStore, StoreWrapper},
    Error,
};

/// Builder for a device session.
///
/// Without an explicit store the session keeps properties in memory only
/// and asks the broker for a clean session; configuring a store with
/// [`store`] turns on the full property-persistence protocol.
///
/// [`store`]: DeviceBuilder::store
#[must_use]
pub struct DeviceBuilder<S = MemoryStore> {
    config: DeviceConfig,
    interfaces: Introspection,
    store: StoreWrapper<S>,
}

impl<S> std::fmt::Debug for DeviceBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuilder").finish_non_exhaustive()
    }
}

impl DeviceBuilder<MemoryStore> {
    /// Creates a builder over the given configuration.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            interfaces: Introspection::new(),
            store: StoreWrapper::volatile(MemoryStore::new()),
        }
    }
}

impl<S: PropertyStore> DeviceBuilder<S> {
    /// Declares an interface.
    pub fn interface(mut self, interface: Interface) -> Result<Self, Error> {
        self.interfaces.add_or_replace(interface)?;
        Ok(self)
    }

    /// Uses the given store for durable property persistence.
    pub fn store<T: PropertyStore>(self, store: T) -> DeviceBuilder<T> {
        DeviceBuilder {
            config: self.config,
            interfaces: self.interfaces,
            store: StoreWrapper::durable(store),
        }
    }

    /// Bootstraps credentials and connects, returning the client handle
    /// and the engine task.
    ///
    /// Spawn [`DeviceConnection::run`] to drive the session.
    pub async fn connect(self) -> Result<(DeviceClient<S>, DeviceConnection<S>), Error> {
        let device_id = match self.config.device_id.clone() {
            Some(device_id) => device_id,
            None => {
                let device_id = hwid::derive_device_id();
                info!("derived device id `{device_id}`");
                device_id
            }
        };

        let credentials = Credentials::init(&self.config.credentials_dir).await?;
        let pairing = PairingClient::new(self.config.pairing_url.clone(), &self.config.realm);
        let channel_capacity = self.config.channel_capacity;

        let setup = SessionSetup {
            config: self.config,
            pairing,
            credentials,
            device_id: device_id.clone(),
        };

        let clean_session = !self.store.is_durable();
        let (client, eventloop, device_topic) = setup.establish(clean_session, channel_capacity).await?;

        let shared = Arc::new(Shared {
            device_topic,
            device_id,
            interfaces: RwLock::new(self.interfaces),
            store: self.store,
            connected: AtomicBool::new(false),
        });

        let (commands_tx, commands_rx) = mpsc::channel(channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(channel_capacity);

        let device_client = DeviceClient::new(Arc::clone(&shared), commands_tx, events_rx);
        let connection = DeviceConnection::new(shared, client, eventloop, commands_rx, events_tx, setup);
        Ok((device_client, connection))
    }
}

#[cfg(test)]
mod test {
    use url::Url;

    use super::*;
    use crate::interface::{InterfaceKind, Ownership};

    fn config(server: &mockito::ServerGuard, dir: &std::path::Path) -> DeviceConfig {
        DeviceConfig::new("test", Url::parse(&server.url()).unwrap(), dir)
            .with_device_id("u_device")
            .with_credentials_secret("SECRET")
    }

    fn certificate(common_name: &str) -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);
        params.self_signed(&key).unwrap().pem()
    }

    #[tokio::test]
    async fn connect_pairs_and_derives_the_device_topic() {
        let mut server = mockito::Server::new_async().await;
        let issue = server
            .mock("POST", "/v1/test/devices/u_device/protocols/astarte_mqtt_v1/credentials")
            .with_status(201)
            .with_body(format!(
                r#"{{"data":{{"client_crt":{}}}}}"#,
                serde_json::to_string(&certificate("test/u_device")).unwrap()
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/v1/test/devices/u_device")
            .with_status(200)
            .with_body(r#"{"data":{"protocols":{"astarte_mqtt_v1":{"broker_url":"mqtt://b:1883"}}}}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let interface =
            Interface::new("org.example.Srv", 0, 1, InterfaceKind::Datastream, Ownership::Server)
                .unwrap();

        let (client, _connection) = DeviceBuilder::new(config(&server, dir.path()))
            .interface(interface)
            .unwrap()
            .connect()
            .await
            .unwrap();

        issue.assert_async().await;
        assert_eq!(client.device_id(), "u_device");

        // The certificate survives for the next connect.
        let credentials = Credentials::init(dir.path()).await.unwrap();
        assert!(credentials.has_certificate().await);
    }

    #[tokio::test]
    async fn connect_registers_when_no_secret_is_available() {
        let mut server = mockito::Server::new_async().await;
        let register = server
            .mock("POST", "/v1/test/agent/devices")
            .with_status(201)
            .with_body(r#"{"data":{"credentials_secret":"FRESH"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v1/test/devices/u_device/protocols/astarte_mqtt_v1/credentials")
            .with_status(201)
            .with_body(format!(
                r#"{{"data":{{"client_crt":{}}}}}"#,
                serde_json::to_string(&certificate("test/u_device")).unwrap()
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/v1/test/devices/u_device")
            .with_status(200)
            .with_body(r#"{"data":{"protocols":{"astarte_mqtt_v1":{"broker_url":"mqtt://b:1883"}}}}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig::new("test", Url::parse(&server.url()).unwrap(), dir.path())
            .with_device_id("u_device")
            .with_pairing_jwt("JWT");

        let (_client, _connection) = DeviceBuilder::new(config).connect().await.unwrap();

        register.assert_async().await;
        // The secret is persisted for the next start.
        let credentials = Credentials::init(dir.path()).await.unwrap();
        assert_eq!(credentials.secret().await.unwrap(), "FRESH");
    }

    #[tokio::test]
    async fn connect_without_secret_or_jwt_fails() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig::new("test", Url::parse(&server.url()).unwrap(), dir.path())
            .with_device_id("u_device");

        let err = DeviceBuilder::new(config).connect().await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials));
    }

    #[test]
    fn conflicting_interface_is_rejected_at_build_time() {
        let server_url = Url::parse("http://127.0.0.1:1/").unwrap();
        let dir = std::env::temp_dir();
        let builder = DeviceBuilder::new(DeviceConfig::new("test", server_url, dir));

        let a = Interface::new("X", 0, 2, InterfaceKind::Datastream, Ownership::Device).unwrap();
        let b = Interface::new("X", 0, 1, InterfaceKind::Datastream, Ownership::Device).unwrap();

        let err = builder
            .interface(a)
            .unwrap()
            .interface(b)
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingInterface(_)));
    }
}
