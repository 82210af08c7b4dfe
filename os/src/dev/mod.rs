//! Devices, drivers and the ledgers that track them.
//!
//! The free functions below operate on the kernel ledgers [DEVICES] and [DRIVERS]. Code that
//! needs an isolated registry (tests, simulators) builds its own [DeviceLedger] and
//! [DriverLedger] and calls the same operations on them.
pub mod device;
pub mod driver;
pub mod gpio;
pub mod handle;
pub mod ledger;

pub use device::{Device, DeviceConfig, DeviceType, DriverData};
pub use driver::{Binding, Driver, DriverBuilder, DriverLedger, UnbindError, DRIVERS};
pub use handle::{Handle, HandleRef};
pub use ledger::{DeviceLedger, DEVICES};

use crate::error::Result;

/// Add a constructed device to [DEVICES].
pub fn add(device: &Handle<Device>) -> Result<()> {
    DEVICES.add(device)
}

/// Remove a stopped device from [DEVICES].
pub fn remove(device: &Handle<Device>) -> Result<()> {
    DEVICES.remove(device)
}

/// Construct `device`, bind it to the first driver in [DRIVERS] serving `compatible` and add it.
pub fn construct_add(device: &Handle<Device>, compatible: &str) -> Result<()> {
    DEVICES.construct_add(device, compatible, &DRIVERS)
}

/// [construct_add] followed by a start, rolled back if the start fails.
pub fn construct_add_start(device: &Handle<Device>, compatible: &str) -> Result<()> {
    DEVICES.construct_add_start(device, compatible, &DRIVERS)
}

pub fn find_by_name(name: &str) -> Option<Handle<Device>> {
    DEVICES.find_by_name(name)
}

pub fn find_compatible_driver(compatible: &str) -> Option<Handle<Driver>> {
    DRIVERS.find_compatible(compatible)
}

/// Visit every started device of `device_type` in [DEVICES].
pub fn for_each_of_type(device_type: &DeviceType, visitor: impl FnMut(&Handle<Device>) -> bool) {
    DEVICES.for_each_of_type(device_type, visitor)
}
