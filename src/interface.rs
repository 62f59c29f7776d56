// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Interface and mapping model.
//!
//! An interface is a named, versioned schema describing the typed endpoints
//! a device may publish on or receive on. Interfaces are declared
//! programmatically; parsing them out of interface definition files is left
//! to the embedding application.

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing interfaces and mappings.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("`{0}` is not a valid interface name")]
    InvalidName(String),
    #[error("major and minor version cannot both be zero")]
    BothVersionsZero,
    #[error("`{0}` is not a valid endpoint")]
    InvalidEndpoint(String),
}

/// The two interface kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    /// Time-series samples.
    Datastream,
    /// Last-write-wins state with optional unset.
    Properties,
}

/// Which side is authoritative for publishes on an interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// The device publishes, the server consumes.
    Device,
    /// The server publishes, the device consumes.
    Server,
}

/// How the mappings of an interface are published.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Every mapping is sent on its own.
    Individual,
    /// All mappings are sent together as one object.
    Object,
}

/// Delivery guarantee of a mapping, mapped onto MQTT QoS.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// QoS 0.
    Unreliable,
    /// QoS 1.
    Guaranteed,
    /// QoS 2.
    Unique,
}

impl Reliability {
    /// The MQTT QoS this reliability maps to.
    pub fn qos(self) -> QoS {
        match self {
            Reliability::Unreliable => QoS::AtMostOnce,
            Reliability::Guaranteed => QoS::AtLeastOnce,
            Reliability::Unique => QoS::ExactlyOnce,
        }
    }
}

/// The value type a mapping carries.
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    Double,
    Integer,
    LongInteger,
    Boolean,
    String,
    BinaryBlob,
    DateTime,
    DoubleArray,
    IntegerArray,
    LongIntegerArray,
    BooleanArray,
    StringArray,
    BinaryBlobArray,
    DateTimeArray,
}

/// One endpoint of an interface.
///
/// Endpoint segments of the form `%{name}` are placeholders matching
/// exactly one path segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    endpoint: String,
    mapping_type: MappingType,
    reliability: Reliability,
    explicit_timestamp: bool,
    allow_unset: bool,
}

impl Mapping {
    /// Creates a mapping with unreliable delivery, no explicit timestamp
    /// and unset disallowed.
    pub fn new(endpoint: impl Into<String>, mapping_type: MappingType) -> Result<Self, InterfaceError> {
        let endpoint = endpoint.into();
        if !valid_endpoint(&endpoint) {
            return Err(InterfaceError::InvalidEndpoint(endpoint));
        }
        Ok(Self {
            endpoint,
            mapping_type,
            reliability: Reliability::Unreliable,
            explicit_timestamp: false,
            allow_unset: false,
        })
    }

    /// Sets the delivery guarantee.
    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    /// Marks the mapping as carrying caller-provided timestamps.
    pub fn with_explicit_timestamp(mut self, explicit_timestamp: bool) -> Self {
        self.explicit_timestamp = explicit_timestamp;
        self
    }

    /// Allows unsetting the property this mapping describes.
    pub fn with_allow_unset(mut self, allow_unset: bool) -> Self {
        self.allow_unset = allow_unset;
        self
    }

    /// The endpoint template.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The value type.
    pub fn mapping_type(&self) -> MappingType {
        self.mapping_type
    }

    /// The delivery guarantee.
    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    /// Whether publishes carry caller-provided timestamps.
    pub fn explicit_timestamp(&self) -> bool {
        self.explicit_timestamp
    }

    /// Whether the mapping allows unset.
    pub fn allow_unset(&self) -> bool {
        self.allow_unset
    }

    /// Whether a concrete path matches this mapping's endpoint template.
    pub fn matches(&self, path: &str) -> bool {
        template_matches(&self.endpoint, path)
    }
}

/// A declared schema the device presents to the platform.
#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    name: String,
    version_major: i32,
    version_minor: i32,
    kind: InterfaceKind,
    ownership: Ownership,
    aggregation: Aggregation,
    mappings: Vec<Mapping>,
}

impl Interface {
    /// Creates an interface with individual aggregation and no mappings.
    ///
    /// An interface whose versions are both zero is invalid.
    pub fn new(
        name: impl Into<String>,
        version_major: i32,
        version_minor: i32,
        kind: InterfaceKind,
        ownership: Ownership,
    ) -> Result<Self, InterfaceError> {
        let name = name.into();
        if !valid_name(&name) {
            return Err(InterfaceError::InvalidName(name));
        }
        if version_major == 0 && version_minor == 0 {
            return Err(InterfaceError::BothVersionsZero);
        }
        Ok(Self {
            name,
            version_major,
            version_minor,
            kind,
            ownership,
            aggregation: Aggregation::Individual,
            mappings: Vec::new(),
        })
    }

    /// Sets the aggregation.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Adds a mapping.
    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// The interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The major version.
    pub fn version_major(&self) -> i32 {
        self.version_major
    }

    /// The minor version.
    pub fn version_minor(&self) -> i32 {
        self.version_minor
    }

    /// The interface kind.
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// The ownership.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// The aggregation.
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// The declared mappings, in declaration order.
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Finds the mapping whose endpoint template matches the given path.
    pub fn mapping(&self, path: &str) -> Option<&Mapping> {
        self.mappings.iter().find(|mapping| mapping.matches(path))
    }

    /// For object aggregates, whether the path matches the mappings' common
    /// base (every endpoint minus its last segment).
    pub(crate) fn object_path_matches(&self, path: &str) -> bool {
        self.mappings.iter().any(|mapping| {
            mapping
                .endpoint
                .rsplit_once('/')
                .is_some_and(|(base, _)| template_matches(base, path))
        })
    }

    /// The delivery guarantee of an object aggregate, taken from its first
    /// mapping. Aggregates share one reliability across mappings.
    pub(crate) fn object_reliability(&self) -> Reliability {
        self.mappings
            .first()
            .map_or(Reliability::Unreliable, Mapping::reliability)
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

fn valid_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with('/')
        && endpoint
            .split('/')
            .skip(1)
            .all(|segment| !segment.is_empty())
}

fn template_matches(template: &str, path: &str) -> bool {
    let mut t = template.split('/');
    let mut p = path.split('/');
    loop {
        match (t.next(), p.next()) {
            (None, None) => return true,
            (Some(t), Some(p)) => {
                let placeholder = t.starts_with("%{") && t.ends_with('}');
                if !placeholder && t != p {
                    return false;
                }
                if placeholder && p.is_empty() {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn datastream(name: &str) -> Interface {
        Interface::new(name, 0, 1, InterfaceKind::Datastream, Ownership::Device).unwrap()
    }

    #[test]
    fn rejects_zero_zero_version() {
        let err = Interface::new("org.example.Test", 0, 0, InterfaceKind::Datastream, Ownership::Device)
            .unwrap_err();
        assert_eq!(err, InterfaceError::BothVersionsZero);
    }

    #[test]
    fn rejects_invalid_names() {
        for name in ["", ".starts.with.dot", "ends.with.dot.", "has space"] {
            assert!(matches!(
                Interface::new(name, 0, 1, InterfaceKind::Datastream, Ownership::Device),
                Err(InterfaceError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn rejects_invalid_endpoints() {
        assert!(Mapping::new("noslash", MappingType::Boolean).is_err());
        assert!(Mapping::new("/double//slash", MappingType::Boolean).is_err());
        assert!(Mapping::new("/ok/%{id}/value", MappingType::Boolean).is_ok());
    }

    #[test]
    fn mapping_lookup_literal() {
        let interface = datastream("org.example.Test")
            .with_mapping(Mapping::new("/enabled", MappingType::Boolean).unwrap());
        assert!(interface.mapping("/enabled").is_some());
        assert!(interface.mapping("/enable").is_none());
        assert!(interface.mapping("/enabled/deeper").is_none());
    }

    #[test]
    fn mapping_lookup_placeholder() {
        let interface = datastream("org.example.Test")
            .with_mapping(Mapping::new("/%{sensor}/value", MappingType::Double).unwrap());
        assert!(interface.mapping("/s1/value").is_some());
        assert!(interface.mapping("/s1/other").is_none());
        assert!(interface.mapping("/value").is_none());
    }

    #[test]
    fn object_path_matching() {
        let interface = datastream("org.example.Object")
            .with_aggregation(Aggregation::Object)
            .with_mapping(
                Mapping::new("/%{group}/lat", MappingType::Double)
                    .unwrap()
                    .with_reliability(Reliability::Unique),
            )
            .with_mapping(Mapping::new("/%{group}/lng", MappingType::Double).unwrap());

        assert!(interface.object_path_matches("/g1"));
        assert!(!interface.object_path_matches("/g1/lat"));
        assert_eq!(interface.object_reliability(), Reliability::Unique);
    }

    #[test]
    fn reliability_maps_to_qos() {
        assert_eq!(Reliability::Unreliable.qos(), QoS::AtMostOnce);
        assert_eq!(Reliability::Guaranteed.qos(), QoS::AtLeastOnce);
        assert_eq!(Reliability::Unique.qos(), QoS::ExactlyOnce);
    }
}
