// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Topic scheme of the device session.
//!
//! Every topic is prefixed with the device topic (the client certificate's
//! common name). The suffixes in use are the introspection publish on the
//! device topic itself, the `/control/*` channels and
//! `/<interface><path>` for data.

use thiserror::Error;

pub(crate) const CONSUMER_PROPERTIES: &str = "/control/consumer/properties";
pub(crate) const PRODUCER_PROPERTIES: &str = "/control/producer/properties";
pub(crate) const EMPTY_CACHE: &str = "/control/emptyCache";

/// Errors raised while parsing inbound topics. Messages on unparseable
/// topics are dropped and logged, never surfaced.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum TopicError {
    #[error("topic is not under the device topic")]
    ForeignTopic,
    #[error("unhandled control topic `{0}`")]
    UnhandledControl(String),
    #[error("topic is missing the interface or path")]
    Malformed,
}

/// An inbound topic, split into its route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParsedTopic<'a> {
    /// `/control/consumer/properties`: a server-to-device purge directive.
    PurgeProperties,
    /// `/<interface><path>`: a data or property message.
    Data { interface: &'a str, path: &'a str },
}

/// Splits a raw topic into its route, requiring the device-topic prefix.
pub(crate) fn parse_topic<'a>(device_topic: &str, topic: &'a str) -> Result<ParsedTopic<'a>, TopicError> {
    let rest = topic
        .strip_prefix(device_topic)
        .ok_or(TopicError::ForeignTopic)?;
    if !rest.starts_with('/') {
        return Err(TopicError::ForeignTopic);
    }

    if rest == CONSUMER_PROPERTIES {
        return Ok(ParsedTopic::PurgeProperties);
    }
    if rest.strip_prefix('/').is_some_and(|r| r.starts_with("control")) {
        return Err(TopicError::UnhandledControl(rest.to_owned()));
    }

    let interface_and_path = &rest[1..];
    let slash = interface_and_path.find('/').ok_or(TopicError::Malformed)?;
    let (interface, path) = interface_and_path.split_at(slash);
    if interface.is_empty() || path.len() < 2 {
        return Err(TopicError::Malformed);
    }
    Ok(ParsedTopic::Data { interface, path })
}
