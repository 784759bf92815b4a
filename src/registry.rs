//! The devices on the bus, by address.
//!
//! Devices are registered and enabled separately.  Only enabled devices are
//! dispatched to, and only an enabled device's address is acknowledged
//! under ATN - the engine passes [`DeviceRegistry::enabled_mask`] to the
//! port whenever it changes.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;
use heapless::Vec;

use crate::constants::{
    MAX_COMMAND_ADDRESS, MAX_DEVICE_ADDRESS, MAX_DEVICES, MIN_DEVICE_ADDRESS,
};
use crate::device::{Device, DeviceState};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::frame::CommandFrame;
use crate::protocol::BusPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// Outside the range of addresses a device may use.
    InvalidAddress,
    AddressInUse,
    Full,
    NotFound,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidAddress => write!(
                f,
                "device address must be {MIN_DEVICE_ADDRESS}-{MAX_DEVICE_ADDRESS}"
            ),
            RegistryError::AddressInUse => write!(f, "device address in use"),
            RegistryError::Full => write!(f, "no room for another device"),
            RegistryError::NotFound => write!(f, "no device at that address"),
        }
    }
}

/// Up to `N` devices, kept sorted by address.
pub struct DeviceRegistry<T: Device, const N: usize = MAX_DEVICES> {
    devices: Vec<(u8, T), N>,
    enabled: u32,
}

impl<T: Device, const N: usize> Default for DeviceRegistry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Device, const N: usize> DeviceRegistry<T, N> {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
            enabled: 0,
        }
    }

    fn position(&self, address: u8) -> Result<usize, usize> {
        self.devices.binary_search_by_key(&address, |(a, _)| *a)
    }

    /// Register a device.  It starts disabled.
    ///
    /// Any address from 4 to 30 is accepted, but LISTEN and TALK only
    /// address devices up to [`MAX_COMMAND_ADDRESS`], so a device above that
    /// is never dispatched a command.
    pub fn add(&mut self, address: u8, device: T) -> Result<(), RegistryError> {
        if !(MIN_DEVICE_ADDRESS..=MAX_DEVICE_ADDRESS).contains(&address) {
            return Err(RegistryError::InvalidAddress);
        }
        if address > MAX_COMMAND_ADDRESS {
            warn!("Device {} can't be addressed by LISTEN or TALK", address);
        }
        let index = match self.position(address) {
            Ok(_) => return Err(RegistryError::AddressInUse),
            Err(index) => index,
        };
        self.devices
            .insert(index, (address, device))
            .map_err(|_| RegistryError::Full)?;
        debug!("Device {} registered", address);
        Ok(())
    }

    /// Unregister a device, returning it.
    pub fn remove(&mut self, address: u8) -> Result<T, RegistryError> {
        let index = self.position(address).map_err(|_| RegistryError::NotFound)?;
        self.disable(address);
        let (_, device) = self.devices.remove(index);
        debug!("Device {} removed", address);
        Ok(device)
    }

    pub fn enable(&mut self, address: u8) -> Result<(), RegistryError> {
        self.position(address).map_err(|_| RegistryError::NotFound)?;
        self.enabled |= 1 << address;
        Ok(())
    }

    pub fn disable(&mut self, address: u8) {
        if address < 32 {
            self.enabled &= !(1 << address);
        }
    }

    pub fn is_enabled(&self, address: u8) -> bool {
        address < 32 && self.enabled & (1 << address) != 0
    }

    /// Bit n is set if device n is enabled.
    pub fn enabled_mask(&self) -> u32 {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registered addresses, in order.
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.devices.iter().map(|(a, _)| *a)
    }

    pub fn device_by_id(&self, address: u8) -> Option<&T> {
        self.position(address).ok().map(|i| &self.devices[i].1)
    }

    pub fn device_by_id_mut(&mut self, address: u8) -> Option<&mut T> {
        self.position(address)
            .ok()
            .map(move |i| &mut self.devices[i].1)
    }

    /// Reset every registered device, enabled or not.
    pub fn reset_all(&mut self) {
        for (_, device) in self.devices.iter_mut() {
            device.reset();
        }
    }

    /// Hand a completed frame to the addressed device.
    ///
    /// # Returns
    /// The device's state afterwards.  Idle if no enabled device is at the
    /// frame's address.
    pub async fn dispatch<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) -> DeviceState {
        if !self.is_enabled(frame.device) {
            trace!("No enabled device {}", frame.device);
            return DeviceState::Idle;
        }
        match self.device_by_id_mut(frame.device) {
            Some(device) => device.process(port, frame).await,
            None => DeviceState::Idle,
        }
    }
}
