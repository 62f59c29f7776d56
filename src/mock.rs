// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the MQTT client and event loop.
//!
//! The session engine swaps these in for the `rumqttc` types under
//! `cfg(test)`, mirroring their inherent method signatures.

use mockall::mock;
use rumqttc::{ClientError, ConnectionError, Event, QoS};

mock! {
    pub AsyncClient {
        pub async fn publish<S, V>(
            &self,
            topic: S,
            qos: QoS,
            retain: bool,
            payload: V,
        ) -> Result<(), ClientError>
        where
            S: Into<String> + 'static,
            V: Into<Vec<u8>> + 'static;

        pub async fn subscribe<S: Into<String> + 'static>(&self, topic: S, qos: QoS) -> Result<(), ClientError>;

        pub async fn unsubscribe<S: Into<String> + 'static>(&self, topic: S) -> Result<(), ClientError>;

        pub async fn disconnect(&self) -> Result<(), ClientError>;
    }

    impl Clone for AsyncClient {
        fn clone(&self) -> Self;
    }
}

mock! {
    pub EventLoop {
        pub async fn poll(&mut self) -> Result<Event, ConnectionError>;
    }
}
