//! The device ledger: every added device, in the order it was added.
use log::{debug, error};
use utils::vec::LockedVec;

use crate::{
    dev::{
        device::{Device, DeviceType},
        driver::DriverLedger,
        handle::Handle,
    },
    error::{Error, Result},
};

pub struct DeviceLedger {
    devices: LockedVec<Handle<Device>>,
}

/// Devices registered with the kernel.
pub static DEVICES: DeviceLedger = DeviceLedger::new();

impl DeviceLedger {
    pub const fn new() -> DeviceLedger {
        DeviceLedger {
            devices: LockedVec::new(),
        }
    }

    /// Make a constructed device discoverable and append it to its parent's children.
    ///
    /// The parent, if any, must be added already.
    pub fn add(&self, device: &Handle<Device>) -> Result<()> {
        debug!("add {}", device.name());
        device.claim_added(true)?;
        if let Some(parent) = device.parent() {
            if let Err(error) = parent.attach_child(device) {
                let _ = device.claim_added(false);
                return Err(error);
            }
        }
        self.devices.push(device.clone());
        Ok(())
    }

    /// Undo [DeviceLedger::add] for a stopped device.
    ///
    /// A device this ledger does not hold fails with [Error::NotFound] and keeps its parent
    /// link and added state.
    pub fn remove(&self, device: &Handle<Device>) -> Result<()> {
        debug!("remove {}", device.name());
        device.claim_added(false)?;
        let parent = device.parent();
        if let Some(parent) = &parent {
            parent.detach_child(device);
        }
        if self.devices.remove_first(|added| added.ptr_eq(device)).is_none() {
            if let Some(parent) = &parent {
                let _ = parent.attach_child(device);
            }
            let _ = device.claim_added(true);
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Visit every added device until `visitor` returns `false`.
    ///
    /// Runs under the ledger lock: the visitor must not add or remove devices.
    pub fn for_each(&self, visitor: impl FnMut(&Handle<Device>) -> bool) {
        self.devices.for_each(visitor);
    }

    /// Visit the started devices whose driver exposes `device_type`.
    ///
    /// Runs under the ledger lock: the visitor must not add or remove devices.
    pub fn for_each_of_type(&self, device_type: &DeviceType, mut visitor: impl FnMut(&Handle<Device>) -> bool) {
        self.devices.for_each(|device| {
            if is_started_of_type(device, device_type) {
                visitor(device)
            } else {
                true
            }
        });
    }

    pub fn exists_of_type(&self, device_type: &DeviceType) -> bool {
        self.devices.any(|device| is_started_of_type(device, device_type))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Handle<Device>> {
        self.devices.find(|device| device.name() == name)
    }

    pub fn find(&self, predicate: impl FnMut(&Handle<Device>) -> bool) -> Option<Handle<Device>> {
        self.devices.find(predicate)
    }

    pub fn contains(&self, device: &Handle<Device>) -> bool {
        self.devices.any(|added| added.ptr_eq(device))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Construct `device`, give it the first driver serving `compatible` and add it.
    ///
    /// Fails with [Error::Resource] when no driver is compatible. Nothing stays constructed
    /// on failure.
    pub fn construct_add(&self, device: &Handle<Device>, compatible: &str, drivers: &DriverLedger) -> Result<()> {
        let Some(driver) = drivers.find_compatible(compatible) else {
            error!("Can't find driver '{compatible}' for device '{}'", device.name());
            return Err(Error::Resource);
        };
        device.construct().inspect_err(|err| {
            error!("Failed to construct device {}: {err}", device.name());
        })?;
        let added = device.set_driver(Some(&driver)).and_then(|()| self.add(device));
        if let Err(err) = added {
            error!("Failed to add device {}: {err}", device.name());
            let _ = device.destruct();
            return Err(err);
        }
        Ok(())
    }

    /// [DeviceLedger::construct_add] followed by a start. A failed start removes and
    /// destructs the device again and returns the driver's error.
    pub fn construct_add_start(&self, device: &Handle<Device>, compatible: &str, drivers: &DriverLedger) -> Result<()> {
        self.construct_add(device, compatible, drivers)?;
        if let Err(err) = device.start() {
            error!("Failed to start device {}: {err}", device.name());
            let _ = self.remove(device);
            let _ = device.destruct();
            return Err(err);
        }
        Ok(())
    }
}

fn is_started_of_type(device: &Handle<Device>, device_type: &DeviceType) -> bool {
    device.is_started() && device.device_type().is_some_and(|candidate| candidate.is(device_type))
}

impl Default for DeviceLedger {
    fn default() -> Self {
        Self::new()
    }
}
