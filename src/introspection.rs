// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The registry of declared interfaces.

use core::fmt;

use tracing::warn;

use crate::{
    interface::{Interface, Ownership},
    Error,
};

/// Ordered collection of the interfaces a device declares.
///
/// Lookup is by strict name equality. Rendering with [`fmt::Display`]
/// produces the introspection string published to the device topic at
/// connection time: semicolon-separated `name:major:minor` entries with no
/// trailing separator.
#[derive(Clone, Debug, Default)]
pub struct Introspection {
    interfaces: Vec<Interface>,
}

impl Introspection {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface, or replaces the installed version.
    ///
    /// A replacement is accepted only when ownership and kind match the
    /// installed entry and the version pair is greater or equal with at
    /// least one strict increase; anything else is a conflict.
    pub fn add_or_replace(&mut self, interface: Interface) -> Result<(), Error> {
        let Some(pos) = self
            .interfaces
            .iter()
            .position(|installed| installed.name() == interface.name())
        else {
            self.interfaces.push(interface);
            return Ok(());
        };

        let installed = &self.interfaces[pos];
        if installed.ownership() != interface.ownership() || installed.kind() != interface.kind() {
            return Err(Error::ConflictingInterface(interface.name().to_owned()));
        }
        let newer = interface.version_major() >= installed.version_major()
            && interface.version_minor() >= installed.version_minor()
            && (interface.version_major() > installed.version_major()
                || interface.version_minor() > installed.version_minor());
        if !newer {
            return Err(Error::ConflictingInterface(interface.name().to_owned()));
        }

        warn!(
            "overriding interface {} {}.{} with {}.{}",
            interface.name(),
            installed.version_major(),
            installed.version_minor(),
            interface.version_major(),
            interface.version_minor()
        );
        self.interfaces[pos] = interface;
        Ok(())
    }

    /// The installed interface with exactly the given name.
    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|interface| interface.name() == name)
    }

    /// Iterates interfaces in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    /// Iterates the server-owned interfaces.
    pub fn server_owned(&self) -> impl Iterator<Item = &Interface> {
        self.iter()
            .filter(|interface| interface.ownership() == Ownership::Server)
    }

    /// Number of installed interfaces.
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl fmt::Display for Introspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, interface) in self.interfaces.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(
                f,
                "{}:{}:{}",
                interface.name(),
                interface.version_major(),
                interface.version_minor()
            )?;
        }
        Ok(())
    }
}
