// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The device session engine.
//!
//! One task owns the MQTT client and event loop exclusively. Client
//! handles reach it through a bounded command channel; inbound traffic and
//! lifecycle transitions leave it as [`DeviceEvent`]s. The engine performs
//! the post-connect handshake on fresh sessions, routes inbound messages,
//! keeps stored properties reconciled with the server and refreshes the
//! client certificate when the broker stops accepting it.

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{ConnectionError, Event, MqttOptions, Packet, Publish, QoS, TlsConfiguration, Transport};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, trace, warn};
use url::Url;

#[cfg(test)]
pub(crate) use crate::mock::{MockAsyncClient as AsyncClient, MockEventLoop as EventLoop};
#[cfg(not(test))]
pub(crate) use rumqttc::{AsyncClient, EventLoop};

use crate::{
    bson::Document,
    config::DeviceConfig,
    credentials::Credentials,
    event::DeviceEvent,
    interface::{InterfaceKind, Ownership},
    introspection::Introspection,
    pairing::PairingClient,
    payload, properties,
    retry::DelayedPoll,
    store::{PropertyStore, StoreWrapper, StoredProp},
    topic::{self, ParsedTopic},
    Error,
};

/// Fixed backoff between certificate-refresh attempts.
const REINIT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

const EMPTY_CACHE_PAYLOAD: &[u8] = b"1";

/// A request from a client handle to the engine task.
pub(crate) enum Command {
    Publish {
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
        resp: oneshot::Sender<Result<(), Error>>,
    },
    Subscribe {
        topic: String,
        resp: oneshot::Sender<Result<(), Error>>,
    },
    Stop {
        resp: oneshot::Sender<()>,
    },
}

/// State shared between the engine task and the client handles.
pub(crate) struct Shared<S> {
    pub(crate) device_topic: String,
    pub(crate) device_id: String,
    pub(crate) interfaces: RwLock<Introspection>,
    pub(crate) store: StoreWrapper<S>,
    pub(crate) connected: AtomicBool,
}

/// Everything needed to (re)initialize the MQTT connection.
pub(crate) struct SessionSetup {
    pub(crate) config: DeviceConfig,
    pub(crate) pairing: PairingClient,
    pub(crate) credentials: Credentials,
    pub(crate) device_id: String,
}

impl SessionSetup {
    /// Bootstraps credentials and builds the MQTT client.
    ///
    /// Ensures a credentials secret (registering when necessary) and a
    /// client certificate (pairing when necessary), then assembles the
    /// transport from the certificate, the key and the broker URL. The
    /// returned device topic is the certificate's common name.
    pub(crate) async fn establish(
        &self,
        clean_session: bool,
        channel_capacity: usize,
    ) -> Result<(AsyncClient, EventLoop, String), Error> {
        let secret = self.ensure_secret().await?;

        if !self.credentials.has_certificate().await {
            info!("no client certificate installed, pairing");
            let csr = self.credentials.csr().await?;
            let certificate = self
                .pairing
                .obtain_certificate(&secret, &self.device_id, &csr)
                .await?;
            self.credentials.save_certificate(&certificate).await?;
        }

        let certificate = self.credentials.certificate().await?;
        let key = self.credentials.key().await?;
        let device_topic = Credentials::common_name(&certificate)?;
        let broker_url = self.pairing.broker_url(&secret, &self.device_id).await?;

        let options = mqtt_options(
            &broker_url,
            &device_topic,
            &certificate,
            &key,
            self.config.keepalive_secs,
            clean_session,
        )?;
        let (client, eventloop) = mqtt_channel(options, channel_capacity);

        info!(broker_url = %broker_url, device_topic = %device_topic, "MQTT session configured");
        Ok((client, eventloop, device_topic))
    }

    async fn ensure_secret(&self) -> Result<String, Error> {
        if let Some(secret) = &self.config.credentials_secret {
            return Ok(secret.clone());
        }
        if let Some(secret) = self.credentials.secret().await {
            return Ok(secret);
        }

        let jwt = self
            .config
            .pairing_jwt
            .as_deref()
            .ok_or(Error::MissingCredentials)?;
        info!("registering device `{}`", self.device_id);
        let secret = self.pairing.register_device(jwt, &self.device_id).await?;
        self.credentials.store_secret(&secret).await?;
        Ok(secret)
    }
}

fn mqtt_options(
    broker_url: &Url,
    client_id: &str,
    certificate_pem: &str,
    key_pem: &str,
    keepalive_secs: u64,
    clean_session: bool,
) -> Result<MqttOptions, Error> {
    let host = broker_url
        .host_str()
        .ok_or_else(|| Error::InvalidBrokerUrl(broker_url.to_string()))?;
    let secure = match broker_url.scheme() {
        "mqtts" | "ssl" => true,
        "mqtt" | "tcp" => false,
        _ => return Err(Error::InvalidBrokerUrl(broker_url.to_string())),
    };
    let port = broker_url.port().unwrap_or(if secure { 8883 } else { 1883 });

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(keepalive_secs));
    // The broker keeps the session (and its subscriptions) across
    // reconnects only when properties are persisted on our side too.
    options.set_clean_session(clean_session);
    if secure {
        let tls = tls_config(certificate_pem, key_pem)?;
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(tls))));
    }
    Ok(options)
}

fn tls_config(certificate_pem: &str, key_pem: &str) -> Result<rustls::ClientConfig, Error> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs()? {
        // Unusable entries in the host store are skipped.
        let _ = roots.add(cert);
    }

    let certs = rustls_pemfile::certs(&mut certificate_pem.as_bytes()).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())?
        .ok_or(Error::Internal("credential key PEM holds no private key"))?;

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)?)
}

fn mqtt_channel(options: MqttOptions, capacity: usize) -> (AsyncClient, EventLoop) {
    #[cfg(not(test))]
    {
        AsyncClient::new(options, capacity)
    }
    #[cfg(test)]
    {
        let _ = (options, capacity);
        (AsyncClient::default(), EventLoop::default())
    }
}

enum Driven {
    Command(Option<Command>),
    Mqtt(Result<Event, ConnectionError>),
}

/// The engine task. Owns the MQTT client and event loop.
pub struct DeviceConnection<S> {
    shared: Arc<Shared<S>>,
    client: AsyncClient,
    eventloop: EventLoop,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<DeviceEvent>,
    setup: SessionSetup,
    backoff: DelayedPoll,
}

impl<S> std::fmt::Debug for DeviceConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection").finish_non_exhaustive()
    }
}

impl<S: PropertyStore> DeviceConnection<S> {
    pub(crate) fn new(
        shared: Arc<Shared<S>>,
        client: AsyncClient,
        eventloop: EventLoop,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<DeviceEvent>,
        setup: SessionSetup,
    ) -> Self {
        Self {
            shared,
            client,
            eventloop,
            commands,
            events,
            setup,
            backoff: DelayedPoll::new(),
        }
    }

    /// Drives the session until [`stop`] is called or every client handle
    /// is dropped.
    ///
    /// [`stop`]: crate::DeviceClient::stop
    pub async fn run(mut self) -> Result<(), Error> {
        debug!("session engine running");
        loop {
            let driven = tokio::select! {
                command = self.commands.recv() => Driven::Command(command),
                event = self.eventloop.poll() => Driven::Mqtt(event),
            };
            match driven {
                Driven::Command(None) => {
                    debug!("all client handles dropped, stopping");
                    self.shutdown().await;
                    return Ok(());
                }
                Driven::Command(Some(command)) => {
                    if self.handle_command(command).await.is_break() {
                        return Ok(());
                    }
                }
                Driven::Mqtt(event) => {
                    if let Err(err) = self.handle_mqtt_event(event).await {
                        error!("failed to handle event: {err}");
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Publish {
                topic,
                qos,
                payload,
                resp,
            } => {
                let result = self.client.publish(topic, qos, false, payload).await.map_err(Error::Publish);
                let _ = resp.send(result);
                ControlFlow::Continue(())
            }
            Command::Subscribe { topic, resp } => {
                let result = self
                    .client
                    .subscribe(topic, QoS::ExactlyOnce)
                    .await
                    .map_err(Error::Publish);
                let _ = resp.send(result);
                ControlFlow::Continue(())
            }
            Command::Stop { resp } => {
                self.shutdown().await;
                let _ = resp.send(());
                ControlFlow::Break(())
            }
        }
    }

    async fn handle_mqtt_event(&mut self, event: Result<Event, ConnectionError>) -> Result<(), Error> {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                info!(session_present = connack.session_present, "connected to the broker");
                self.backoff.reset();
                self.shared.connected.store(true, Ordering::SeqCst);
                if !connack.session_present {
                    self.handshake().await?;
                }
                self.emit(DeviceEvent::Connected {
                    session_present: connack.session_present,
                })
                .await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                self.route(publish).await?;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("broker disconnected the session");
                self.mark_disconnected().await;
            }
            Ok(event) => trace!(?event, "event ignored"),
            Err(ConnectionError::Tls(err)) => {
                error!("TLS failure while polling: {err}");
                self.mark_disconnected().await;
                self.reinit().await?;
            }
            Err(err) => {
                debug!("poll error: {err}");
                self.mark_disconnected().await;
                self.backoff.wait().await;
            }
        }
        Ok(())
    }

    /// The post-connect handshake, run only on fresh broker sessions:
    /// subscriptions, introspection, empty-cache, then property
    /// reconciliation for durable stores.
    async fn handshake(&self) -> Result<(), Error> {
        let (introspection, server_interfaces) = {
            let interfaces = self.shared.interfaces.read().await;
            (
                interfaces.to_string(),
                interfaces
                    .server_owned()
                    .map(|interface| interface.name().to_owned())
                    .collect::<Vec<_>>(),
            )
        };

        self.client
            .subscribe(
                format!("{}{}", self.shared.device_topic, topic::CONSUMER_PROPERTIES),
                QoS::ExactlyOnce,
            )
            .await?;
        for name in &server_interfaces {
            self.client
                .subscribe(format!("{}/{}/#", self.shared.device_topic, name), QoS::ExactlyOnce)
                .await?;
        }

        debug!("sending introspection `{introspection}`");
        self.client
            .publish(
                self.shared.device_topic.clone(),
                QoS::ExactlyOnce,
                false,
                introspection.into_bytes(),
            )
            .await?;

        debug!("sending empty cache");
        self.client
            .publish(
                format!("{}{}", self.shared.device_topic, topic::EMPTY_CACHE),
                QoS::ExactlyOnce,
                false,
                EMPTY_CACHE_PAYLOAD.to_vec(),
            )
            .await?;

        if self.shared.store.is_durable() {
            self.send_device_properties().await?;
        }
        Ok(())
    }

    /// Re-aligns the stored properties with the fresh session: stale rows
    /// are dropped, device-owned rows are republished and advertised with
    /// a producer purge message.
    async fn send_device_properties(&self) -> Result<(), Error> {
        enum Action {
            Delete(StoredProp),
            Publish(StoredProp),
            Keep,
        }

        let stored = self.shared.store.store().load_all().await?;
        let actions = {
            let interfaces = self.shared.interfaces.read().await;
            stored
                .into_iter()
                .map(|prop| match interfaces.get(&prop.interface) {
                    Some(interface) if interface.version_major() == prop.interface_major => {
                        if interface.ownership() == Ownership::Device {
                            Action::Publish(prop)
                        } else {
                            Action::Keep
                        }
                    }
                    _ => Action::Delete(prop),
                })
                .collect::<Vec<_>>()
        };

        let mut set_properties = Vec::new();
        for action in actions {
            match action {
                Action::Delete(prop) => {
                    debug!("dropping stale property {}{}", prop.interface, prop.path);
                    self.shared
                        .store
                        .store()
                        .delete_prop(&prop.interface, &prop.path)
                        .await?;
                }
                Action::Publish(prop) => {
                    debug!("republishing property {}{}", prop.interface, prop.path);
                    self.client
                        .publish(
                            format!("{}/{}{}", self.shared.device_topic, prop.interface, prop.path),
                            QoS::ExactlyOnce,
                            false,
                            prop.value,
                        )
                        .await?;
                    set_properties.push(format!("{}{}", prop.interface, prop.path));
                }
                Action::Keep => {}
            }
        }

        let payload = properties::serialize_set_properties(&set_properties)?;
        self.client
            .publish(
                format!("{}{}", self.shared.device_topic, topic::PRODUCER_PROPERTIES),
                QoS::ExactlyOnce,
                false,
                payload,
            )
            .await?;
        Ok(())
    }

    async fn route(&self, publish: Publish) -> Result<(), Error> {
        trace!("incoming publish on `{}`", publish.topic);
        match topic::parse_topic(&self.shared.device_topic, &publish.topic) {
            Ok(ParsedTopic::PurgeProperties) => self.purge_server_properties(&publish.payload).await,
            Ok(ParsedTopic::Data { interface, path }) => {
                self.handle_data(interface, path, &publish.payload).await
            }
            Err(err) => {
                warn!("dropping message on `{}`: {err}", publish.topic);
                Ok(())
            }
        }
    }

    /// Applies a server purge: stored rows that are server-owned, known to
    /// introspection and absent from the list go away, as do rows whose
    /// interface is gone or changed major version.
    async fn purge_server_properties(&self, payload: &[u8]) -> Result<(), Error> {
        if !self.shared.store.is_durable() {
            debug!("purge received without persistent properties, ignoring");
            return Ok(());
        }

        let keep = properties::extract_set_properties(payload)?
            .into_iter()
            .collect::<std::collections::HashSet<_>>();

        let stored = self.shared.store.store().load_all().await?;
        let doomed = {
            let interfaces = self.shared.interfaces.read().await;
            stored
                .into_iter()
                .filter(|prop| match interfaces.get(&prop.interface) {
                    Some(interface) if interface.version_major() == prop.interface_major => {
                        interface.ownership() == Ownership::Server
                            && !keep.contains(&format!("{}{}", prop.interface, prop.path))
                    }
                    _ => true,
                })
                .collect::<Vec<_>>()
        };

        for prop in doomed {
            debug!("purging property {}{}", prop.interface, prop.path);
            self.shared
                .store
                .store()
                .delete_prop(&prop.interface, &prop.path)
                .await?;
        }
        Ok(())
    }

    async fn handle_data(&self, interface: &str, path: &str, payload: &[u8]) -> Result<(), Error> {
        let property_major = {
            let interfaces = self.shared.interfaces.read().await;
            interfaces
                .get(interface)
                .filter(|i| i.kind() == InterfaceKind::Properties)
                .map(|i| i.version_major())
        };

        // An empty payload unsets a property.
        if payload.is_empty() {
            if self.shared.store.is_durable() && property_major.is_some() {
                let existed = self.shared.store.store().delete_prop(interface, path).await?;
                if !existed {
                    debug!("unset for already-absent property {interface}{path}");
                }
            }
            self.emit(DeviceEvent::Unset {
                interface: interface.to_owned(),
                path: path.to_owned(),
            })
            .await;
            return Ok(());
        }

        if !Document::validates(payload) {
            warn!("invalid BSON payload on `{interface}{path}`, dropping");
            return Ok(());
        }

        if let (true, Some(major)) = (self.shared.store.is_durable(), property_major) {
            let store = self.shared.store.store();
            if !store.contains(interface, path, major, payload).await? {
                store
                    .store_prop(StoredProp {
                        interface: interface.to_owned(),
                        path: path.to_owned(),
                        value: payload.to_vec(),
                        interface_major: major,
                    })
                    .await?;
            }
        }

        let (data, timestamp) = payload::deserialize(payload)?;
        self.emit(DeviceEvent::Data {
            interface: interface.to_owned(),
            path: path.to_owned(),
            data,
            timestamp,
        })
        .await;
        Ok(())
    }

    /// Refreshes the client certificate after the broker rejected it.
    ///
    /// Skipped when the pairing host is unreachable: a TLS failure without
    /// network connectivity is an outage, not a rejected certificate.
    async fn reinit(&mut self) -> Result<(), Error> {
        if !self.setup.pairing.network_is_reachable().await {
            info!("pairing host unreachable, treating the TLS failure as a network outage");
            self.backoff.wait().await;
            return Ok(());
        }

        info!("deleting the client certificate and reinitializing the connection");
        self.setup.credentials.delete_certificate().await?;

        loop {
            let clean_session = !self.shared.store.is_durable();
            match self
                .setup
                .establish(clean_session, self.setup.config.channel_capacity)
                .await
            {
                Ok((client, eventloop, device_topic)) => {
                    if device_topic != self.shared.device_topic {
                        warn!(
                            "pairing issued a certificate for `{device_topic}`, expected `{}`",
                            self.shared.device_topic
                        );
                    }
                    self.client = client;
                    self.eventloop = eventloop;
                    info!("connection reinitialized");
                    return Ok(());
                }
                Err(err) => {
                    error!("connection reinitialization failed: {err}");
                    tokio::time::sleep(REINIT_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.client.disconnect().await {
            debug!("disconnect failed: {err}");
        }
        // MQTT does not fire a callback for voluntary stops.
        self.mark_disconnected().await;
    }

    async fn mark_disconnected(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.emit(DeviceEvent::Disconnected).await;
        }
    }

    async fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}
