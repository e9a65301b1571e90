//! # Device Registry
//!
//! Holds the devices the gateway may address. Mutations replace the device
//! list wholesale (copy on write), so readers iterate a consistent snapshot
//! without holding the lock while they talk to the bus.

use super::{Device, DeviceKind, Parameter};
use crate::error::RegistryError;
use std::sync::{Arc, PoisonError, RwLock};

/// Known devices in insertion order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<Arc<Vec<Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device; fails when its address is already taken.
    pub fn register(&self, device: Device) -> Result<(), RegistryError> {
        let mut guard = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|d| d.address == device.address) {
            return Err(RegistryError::DuplicateAddress(device.address));
        }
        log::debug!("Registering {} ({} parameters)", device.label(), device.capabilities.len());
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(device);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn lookup(&self, address: u8) -> Result<Device, RegistryError> {
        self.snapshot()
            .iter()
            .find(|d| d.address == address)
            .cloned()
            .ok_or(RegistryError::NotFound(address))
    }

    /// Looks up a device and checks it supports `parameter`.
    pub fn lookup_parameter(
        &self,
        address: u8,
        parameter: Parameter,
    ) -> Result<Device, RegistryError> {
        let device = self.lookup(address)?;
        if device.supports(parameter) {
            Ok(device)
        } else {
            Err(RegistryError::UnsupportedParameter { address, parameter })
        }
    }

    /// Devices of `kind` (or all devices), lazily, in insertion order.
    pub fn list(&self, kind: Option<DeviceKind>) -> DeviceList {
        DeviceList {
            snapshot: self.snapshot(),
            kind,
        }
    }

    /// Removes and returns the device at `address`.
    pub fn remove(&self, address: u8) -> Result<Device, RegistryError> {
        let mut guard = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let position = guard
            .iter()
            .position(|d| d.address == address)
            .ok_or(RegistryError::NotFound(address))?;
        let mut next: Vec<Device> = guard.as_ref().clone();
        let removed = next.remove(position);
        *guard = Arc::new(next);
        log::debug!("Removed {}", removed.label());
        Ok(removed)
    }

    pub fn contains(&self, address: u8) -> bool {
        self.snapshot().iter().any(|d| d.address == address)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Device>> {
        Arc::clone(&self.devices.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A restartable view over a registry snapshot.
///
/// Later registry changes are not visible through an existing list.
#[derive(Debug, Clone)]
pub struct DeviceList {
    snapshot: Arc<Vec<Device>>,
    kind: Option<DeviceKind>,
}

impl DeviceList {
    pub fn iter(&self) -> impl Iterator<Item = &Device> + '_ {
        let kind = self.kind;
        self.snapshot
            .iter()
            .filter(move |d| kind.map_or(true, |k| d.kind == k))
    }

    pub fn addresses(&self) -> Vec<u8> {
        self.iter().map(|d| d.address).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a Device;
    type IntoIter = Box<dyn Iterator<Item = &'a Device> + Send + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
