// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Events delivered to the application by the session engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::Value;

/// The payload of an inbound data event.
#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    /// A single mapping value.
    Individual(Value),
    /// An object aggregate, one entry per mapping of the aggregate.
    Object(HashMap<String, Value>),
}

/// An event emitted by the device session.
///
/// Events are delivered in broker order per topic and are never used to
/// carry errors; failures surface through the return values of the client
/// operations instead.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    /// The session connected to the broker.
    Connected {
        /// Whether the broker resumed a previous session. A fresh session
        /// (`false`) triggered the full post-connect handshake.
        session_present: bool,
    },
    /// The session disconnected, voluntarily or not.
    Disconnected,
    /// A value was received on a server-owned interface.
    Data {
        /// Name of the interface the value arrived on.
        interface: String,
        /// Mapping path, starting with `/`.
        path: String,
        /// The decoded payload.
        data: Data,
        /// Server-side timestamp, when the sender provided one.
        timestamp: Option<DateTime<Utc>>,
    },
    /// A property was unset by the server.
    Unset {
        /// Name of the interface the property belongs to.
        interface: String,
        /// Mapping path, starting with `/`.
        path: String,
    },
}
