// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The public operations facade.
//!
//! [`DeviceClient`] is a cheap, cloneable handle over the session engine.
//! Every send serializes through the BSON codec, applies the property
//! persistence rules when they apply, and forwards the publish to the
//! engine task, which owns the MQTT client exclusively.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::{
    event::DeviceEvent,
    interface::{Aggregation, Interface, InterfaceKind, Ownership},
    payload,
    session::{Command, Shared},
    store::{PropertyStore, StoredProp},
    types::Value,
    Error,
};

/// Handle to a connected device session.
///
/// Clones share the session. Events are consumed through [`recv`]; the
/// session ends when [`stop`] is called or every handle is dropped.
///
/// [`recv`]: DeviceClient::recv
/// [`stop`]: DeviceClient::stop
#[derive(Clone)]
pub struct DeviceClient<S> {
    shared: Arc<Shared<S>>,
    commands: mpsc::Sender<Command>,
    events: Arc<Mutex<mpsc::Receiver<DeviceEvent>>>,
}

impl<S> std::fmt::Debug for DeviceClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient").finish_non_exhaustive()
    }
}

impl<S: PropertyStore> DeviceClient<S> {
    pub(crate) fn new(
        shared: Arc<Shared<S>>,
        commands: mpsc::Sender<Command>,
        events: mpsc::Receiver<DeviceEvent>,
    ) -> Self {
        Self {
            shared,
            commands,
            events: Arc::new(Mutex::new(events)),
        }
    }

    /// The encoded hardware id of this device.
    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    /// Receives the next session event.
    ///
    /// Returns `None` once the engine has stopped and drained.
    pub async fn recv(&self) -> Option<DeviceEvent> {
        self.events.lock().await.recv().await
    }

    /// Sends an individual datastream value or sets a property.
    pub async fn send(
        &self,
        interface: &str,
        path: &str,
        data: impl Into<Value>,
    ) -> Result<(), Error> {
        self.send_individual(interface, path, data.into(), None).await
    }

    /// Sends an individual value with an explicit timestamp.
    pub async fn send_with_timestamp(
        &self,
        interface: &str,
        path: &str,
        data: impl Into<Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.send_individual(interface, path, data.into(), Some(timestamp)).await
    }

    /// Sets a property. Equivalent to [`send`] on a properties interface;
    /// redundant writes are deduplicated against the stored value.
    ///
    /// [`send`]: DeviceClient::send
    pub async fn set_property(
        &self,
        interface: &str,
        path: &str,
        data: impl Into<Value>,
    ) -> Result<(), Error> {
        self.send_individual(interface, path, data.into(), None).await
    }

    async fn send_individual(
        &self,
        interface: &str,
        path: &str,
        data: Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        validate_path(path)?;

        let (qos, property_major) = {
            let interfaces = self.shared.interfaces.read().await;
            let installed = interfaces
                .get(interface)
                .ok_or_else(|| Error::InterfaceNotFound(interface.to_owned()))?;
            let mapping = installed.mapping(path).ok_or_else(|| Error::MappingNotFound {
                interface: interface.to_owned(),
                path: path.to_owned(),
            })?;
            let property_major = (installed.kind() == InterfaceKind::Properties)
                .then(|| installed.version_major());
            (mapping.reliability().qos(), property_major)
        };

        let payload = payload::serialize_individual(&data, timestamp)?;

        // Persist before publishing, so a successful publish implies a
        // prior durable write; a redundant property set publishes nothing.
        if let Some(major) = property_major {
            if self.shared.store.is_durable() {
                let store = self.shared.store.store();
                if store.contains(interface, path, major, &payload).await? {
                    debug!("property {interface}{path} unchanged, skipping publish");
                    return Ok(());
                }
                store
                    .store_prop(StoredProp {
                        interface: interface.to_owned(),
                        path: path.to_owned(),
                        value: payload.clone(),
                        interface_major: major,
                    })
                    .await?;
            }
        }

        self.publish(self.data_topic(interface, path), qos, payload).await
    }

    /// Sends an object aggregate to the aggregate's path prefix.
    pub async fn send_object(
        &self,
        interface: &str,
        path: &str,
        data: HashMap<String, Value>,
    ) -> Result<(), Error> {
        self.send_object_inner(interface, path, data, None).await
    }

    /// Sends an object aggregate with an explicit timestamp.
    pub async fn send_object_with_timestamp(
        &self,
        interface: &str,
        path: &str,
        data: HashMap<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.send_object_inner(interface, path, data, Some(timestamp)).await
    }

    async fn send_object_inner(
        &self,
        interface: &str,
        path: &str,
        data: HashMap<String, Value>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        validate_path(path)?;

        let qos = {
            let interfaces = self.shared.interfaces.read().await;
            let installed = interfaces
                .get(interface)
                .ok_or_else(|| Error::InterfaceNotFound(interface.to_owned()))?;
            if installed.aggregation() != Aggregation::Object {
                return Err(Error::NotAnObject(interface.to_owned()));
            }
            if !installed.object_path_matches(path) {
                return Err(Error::MappingNotFound {
                    interface: interface.to_owned(),
                    path: path.to_owned(),
                });
            }
            installed.object_reliability().qos()
        };

        let payload = payload::serialize_object(&data, timestamp)?;
        self.publish(self.data_topic(interface, path), qos, payload).await
    }

    /// Unsets a property: deletes the stored row (absent rows are fine)
    /// and publishes a zero-byte payload.
    pub async fn unset_property(&self, interface: &str, path: &str) -> Result<(), Error> {
        validate_path(path)?;

        {
            let interfaces = self.shared.interfaces.read().await;
            let installed = interfaces
                .get(interface)
                .ok_or_else(|| Error::InterfaceNotFound(interface.to_owned()))?;
            let mapping = installed.mapping(path).ok_or_else(|| Error::MappingNotFound {
                interface: interface.to_owned(),
                path: path.to_owned(),
            })?;
            if !mapping.allow_unset() {
                return Err(Error::UnsetNotAllowed {
                    interface: interface.to_owned(),
                    path: path.to_owned(),
                });
            }
        }

        if self.shared.store.is_durable() {
            let existed = self.shared.store.store().delete_prop(interface, path).await?;
            if !existed {
                debug!("unset of already-absent property {interface}{path}");
            }
        }

        self.publish(self.data_topic(interface, path), rumqttc::QoS::ExactlyOnce, Vec::new())
            .await
    }

    /// Declares an additional interface on the running session.
    ///
    /// Extends the introspection (enforcing the replacement rules), then
    /// subscribes server-owned interfaces and republishes the
    /// introspection string when connected.
    pub async fn add_interface(&self, interface: Interface) -> Result<(), Error> {
        let (subscription, introspection) = {
            let mut interfaces = self.shared.interfaces.write().await;
            let subscription = (interface.ownership() == Ownership::Server)
                .then(|| format!("{}/{}/#", self.shared.device_topic, interface.name()));
            interfaces.add_or_replace(interface)?;
            (subscription, interfaces.to_string())
        };

        if !self.shared.connected.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(topic) = subscription {
            self.subscribe(topic).await?;
        }
        self.publish(
            self.shared.device_topic.clone(),
            rumqttc::QoS::ExactlyOnce,
            introspection.into_bytes(),
        )
        .await
    }

    /// Stops the session: disconnects from the broker and terminates the
    /// engine task. The disconnection event is synthesized.
    pub async fn stop(&self) -> Result<(), Error> {
        let (resp, ack) = oneshot::channel();
        self.commands
            .send(Command::Stop { resp })
            .await
            .map_err(|_| Error::Disconnected)?;
        ack.await.map_err(|_| Error::Disconnected)
    }

    fn data_topic(&self, interface: &str, path: &str) -> String {
        format!("{}/{}{}", self.shared.device_topic, interface, path)
    }

    async fn publish(&self, topic: String, qos: rumqttc::QoS, payload: Vec<u8>) -> Result<(), Error> {
        let (resp, result) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                topic,
                qos,
                payload,
                resp,
            })
            .await
            .map_err(|_| Error::Disconnected)?;
        result.await.map_err(|_| Error::Disconnected)?
    }

    async fn subscribe(&self, topic: String) -> Result<(), Error> {
        let (resp, result) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { topic, resp })
            .await
            .map_err(|_| Error::Disconnected)?;
        result.await.map_err(|_| Error::Disconnected)?
    }
}

fn validate_path(path: &str) -> Result<(), Error> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;

    use pretty_assertions::assert_eq;
    use rumqttc::QoS;
    use tokio::sync::RwLock;

    use super::*;
    use crate::{
        interface::{Mapping, MappingType, Reliability},
        introspection::Introspection,
        store::{MemoryStore, StoreWrapper},
    };

    fn client_with(
        interfaces: Introspection,
        durable: bool,
    ) -> (DeviceClient<MemoryStore>, mpsc::Receiver<Command>, MemoryStore) {
        let store = MemoryStore::new();
        let wrapper = if durable {
            StoreWrapper::durable(store.clone())
        } else {
            StoreWrapper::volatile(store.clone())
        };
        let shared = Arc::new(Shared {
            device_topic: "test/u_device".to_owned(),
            device_id: "u_device".to_owned(),
            interfaces: RwLock::new(interfaces),
            store: wrapper,
            connected: AtomicBool::new(false),
        });
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        (
            DeviceClient::new(shared, commands_tx, events_rx),
            commands_rx,
            store,
        )
    }

    fn properties_interface() -> Introspection {
        let mut interfaces = Introspection::new();
        interfaces
            .add_or_replace(
                Interface::new("Dev", 0, 1, InterfaceKind::Properties, Ownership::Device)
                    .unwrap()
                    .with_mapping(
                        Mapping::new("/%{any}", MappingType::Boolean)
                            .unwrap()
                            .with_reliability(Reliability::Unique)
                            .with_allow_unset(true),
                    ),
            )
            .unwrap();
        interfaces
    }

    fn datastream_interface() -> Introspection {
        let mut interfaces = Introspection::new();
        interfaces
            .add_or_replace(
                Interface::new("Ds", 0, 1, InterfaceKind::Datastream, Ownership::Device)
                    .unwrap()
                    .with_mapping(
                        Mapping::new("/value", MappingType::Double)
                            .unwrap()
                            .with_reliability(Reliability::Guaranteed),
                    ),
            )
            .unwrap();
        interfaces
    }

    #[tokio::test]
    async fn invalid_path_is_rejected() {
        let (client, mut commands, _store) = client_with(properties_interface(), true);

        let err = client.send("Dev", "foo", true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_interface_is_rejected() {
        let (client, mut commands, _store) = client_with(Introspection::new(), true);

        let err = client.send("Nope", "/a", true).await.unwrap_err();
        assert!(matches!(err, Error::InterfaceNotFound(_)));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn unmatched_path_is_rejected() {
        let (client, mut commands, _store) = client_with(datastream_interface(), false);

        let err = client.send("Ds", "/other", 1.0).await.unwrap_err();
        assert!(matches!(err, Error::MappingNotFound { .. }));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn datastream_publish_uses_mapping_qos() {
        let (client, mut commands, _store) = client_with(datastream_interface(), false);

        let send = tokio::spawn(async move { client.send("Ds", "/value", 4.2).await });
        let command = commands.recv().await.unwrap();
        match command {
            Command::Publish { topic, qos, payload, resp } => {
                assert_eq!(topic, "test/u_device/Ds/value");
                assert_eq!(qos, QoS::AtLeastOnce);
                assert_eq!(
                    payload,
                    payload::serialize_individual(&Value::Double(4.2), None).unwrap()
                );
                let _ = resp.send(Ok(()));
            }
            _ => panic!("expected a publish"),
        }
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn property_set_is_deduplicated() {
        let (client, mut commands, store) = client_with(properties_interface(), true);

        let responder = tokio::spawn(async move {
            let mut published = Vec::new();
            while let Some(command) = commands.recv().await {
                if let Command::Publish { topic, resp, .. } = command {
                    published.push(topic);
                    let _ = resp.send(Ok(()));
                }
            }
            published
        });

        client.set_property("Dev", "/a", true).await.unwrap();
        // The second identical set publishes nothing.
        client.set_property("Dev", "/a", true).await.unwrap();
        // A changed value publishes again.
        client.set_property("Dev", "/a", false).await.unwrap();
        drop(client);

        let published = responder.await.unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unset_is_idempotent() {
        let (client, mut commands, store) = client_with(properties_interface(), true);

        let responder = tokio::spawn(async move {
            let mut payloads = Vec::new();
            while let Some(command) = commands.recv().await {
                if let Command::Publish { qos, payload, resp, .. } = command {
                    assert_eq!(qos, QoS::ExactlyOnce);
                    payloads.push(payload);
                    let _ = resp.send(Ok(()));
                }
            }
            payloads
        });

        client.set_property("Dev", "/a", true).await.unwrap();
        client.unset_property("Dev", "/a").await.unwrap();
        // Unsetting an absent property is OK.
        client.unset_property("Dev", "/a").await.unwrap();
        drop(client);

        let payloads = responder.await.unwrap();
        assert_eq!(payloads.len(), 3);
        // Both unsets are zero-byte payloads.
        assert!(payloads[1].is_empty());
        assert!(payloads[2].is_empty());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unset_requires_allow_unset() {
        let (client, mut commands, _store) = client_with(datastream_interface(), true);

        let err = client.unset_property("Ds", "/value").await.unwrap_err();
        assert!(matches!(err, Error::UnsetNotAllowed { .. }));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn object_send_requires_an_object_interface() {
        let (client, _commands, _store) = client_with(datastream_interface(), false);

        let err = client
            .send_object("Ds", "/value", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAnObject(_)));
    }

    #[tokio::test]
    async fn object_send_publishes_to_the_base_path() {
        let mut interfaces = Introspection::new();
        interfaces
            .add_or_replace(
                Interface::new("Obj", 0, 1, InterfaceKind::Datastream, Ownership::Device)
                    .unwrap()
                    .with_aggregation(Aggregation::Object)
                    .with_mapping(
                        Mapping::new("/%{group}/lat", MappingType::Double)
                            .unwrap()
                            .with_reliability(Reliability::Unique),
                    )
                    .with_mapping(Mapping::new("/%{group}/lng", MappingType::Double).unwrap()),
            )
            .unwrap();

        let (client, mut commands, _store) = client_with(interfaces, false);

        let mut data = HashMap::new();
        data.insert("lat".to_owned(), Value::Double(45.0));
        data.insert("lng".to_owned(), Value::Double(11.0));

        let send = tokio::spawn(async move { client.send_object("Obj", "/g1", data).await });
        match commands.recv().await.unwrap() {
            Command::Publish { topic, qos, resp, .. } => {
                assert_eq!(topic, "test/u_device/Obj/g1");
                assert_eq!(qos, QoS::ExactlyOnce);
                let _ = resp.send(Ok(()));
            }
            _ => panic!("expected a publish"),
        }
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn add_interface_offline_only_updates_the_registry() {
        let (client, mut commands, _store) = client_with(Introspection::new(), false);

        client
            .add_interface(
                Interface::new("New", 0, 1, InterfaceKind::Datastream, Ownership::Server).unwrap(),
            )
            .await
            .unwrap();

        // Not connected: no subscription, no introspection publish.
        assert!(commands.try_recv().is_err());
        assert!(client.shared.interfaces.read().await.get("New").is_some());
    }

    #[tokio::test]
    async fn add_interface_online_subscribes_and_republishes() {
        let (client, mut commands, _store) = client_with(Introspection::new(), false);
        client
            .shared
            .connected
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let add = tokio::spawn(async move {
            client
                .add_interface(
                    Interface::new("New", 0, 1, InterfaceKind::Datastream, Ownership::Server)
                        .unwrap(),
                )
                .await
        });

        match commands.recv().await.unwrap() {
            Command::Subscribe { topic, resp } => {
                assert_eq!(topic, "test/u_device/New/#");
                let _ = resp.send(Ok(()));
            }
            _ => panic!("expected a subscribe"),
        }
        match commands.recv().await.unwrap() {
            Command::Publish { topic, payload, resp, .. } => {
                assert_eq!(topic, "test/u_device");
                assert_eq!(payload, b"New:0:1");
                let _ = resp.send(Ok(()));
            }
            _ => panic!("expected a publish"),
        }
        add.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn commands_after_engine_drop_report_disconnected() {
        let (client, mut commands, _store) = client_with(properties_interface(), false);
        commands.close();

        let err = client.set_property("Dev", "/a", true).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }
}
