//! Devices: kernel-tracked pieces of hardware.
//!
//! A [Device] moves through `constructed -> added -> started` and back again:
//! - [Device::construct] allocates the private bookkeeping, [Device::destruct] frees it.
//! - [DeviceLedger::add](super::DeviceLedger::add) makes it discoverable and links it to its
//!   parent, [DeviceLedger::remove](super::DeviceLedger::remove) undoes both.
//! - [Handle::start] binds the configured [Driver], [Handle::stop] unbinds it.
//!
//! Driver hooks always run without any device lock held, so a hook may query and update the
//! device it is starting.
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::{any::Any, fmt};

use log::{debug, info, warn};
use spin::RwLock;

use crate::{
    dev::{
        driver::{Binding, Driver, UnbindError},
        gpio::descriptor::DescriptorTable,
        handle::{Handle, HandleRef},
    },
    error::{Error, Result},
    mutex::{Mutex, MutexGuard},
    time::Tick,
};

/// Tag used to filter device discovery by kind, compared by identity.
#[derive(Debug)]
pub struct DeviceType {
    name: &'static str,
}

impl DeviceType {
    pub const fn new(name: &'static str) -> DeviceType {
        DeviceType { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is(&self, other: &DeviceType) -> bool {
        core::ptr::eq(self, other)
    }
}

/// Immutable, driver-specific configuration supplied at construction.
pub type DeviceConfig = Box<dyn Any + Send + Sync>;
/// State owned by the bound driver.
pub type DriverData = Arc<dyn Any + Send + Sync>;

struct DeviceInternal {
    driver: Option<Handle<Driver>>,
    driver_data: Option<DriverData>,
    binding: Option<Binding>,
    added: bool,
    started: bool,
    /// A start or stop is running the driver hook.
    busy: bool,
    start_result: Result<()>,
    children: Vec<Handle<Device>>,
}

impl DeviceInternal {
    fn new() -> DeviceInternal {
        DeviceInternal {
            driver: None,
            driver_data: None,
            binding: None,
            added: false,
            started: false,
            busy: false,
            start_result: Ok(()),
            children: Vec::new(),
        }
    }
}

pub struct Device {
    name: String,
    config: Option<DeviceConfig>,
    parent: RwLock<Option<HandleRef<Device>>>,
    /// [None] until constructed.
    internal: Mutex<Option<DeviceInternal>>,
    lock: Mutex<()>,
    pub(crate) gpio: Mutex<Option<Arc<DescriptorTable>>>,
}

impl Device {
    pub fn new(name: &str) -> Handle<Device> {
        Handle::new(Device::create(name, None))
    }

    pub fn with_config<C: Any + Send + Sync>(name: &str, config: C) -> Handle<Device> {
        Handle::new(Device::create(name, Some(Box::new(config))))
    }

    fn create(name: &str, config: Option<DeviceConfig>) -> Device {
        Device {
            name: String::from(name),
            config,
            parent: RwLock::new(None),
            internal: Mutex::new(None),
            lock: Mutex::new(()),
            gpio: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration, if one of type `C` was supplied.
    pub fn config<C: Any>(&self) -> Option<&C> {
        self.config.as_ref()?.downcast_ref::<C>()
    }

    /// Run `f` on the private state; [Error::InvalidState] until constructed.
    fn with_internal<R>(&self, f: impl FnOnce(&mut DeviceInternal) -> Result<R>) -> Result<R> {
        let mut internal = self.internal.lock();
        match internal.as_mut() {
            Some(internal) => f(internal),
            None => Err(Error::InvalidState),
        }
    }

    fn read_internal<R>(&self, f: impl FnOnce(&DeviceInternal) -> R) -> Option<R> {
        self.internal.lock().as_ref().map(f)
    }

    // region: lifecycle

    pub fn construct(&self) -> Result<()> {
        let mut internal = self.internal.lock();
        if internal.is_some() {
            return Err(Error::InvalidState);
        }
        *internal = Some(DeviceInternal::new());
        debug!("construct {}", self.name);
        Ok(())
    }

    /// Free the private state. Refused while added, started or parenting other devices.
    pub fn destruct(&self) -> Result<()> {
        let mut internal = self.internal.lock();
        let Some(state) = internal.as_ref() else {
            return Err(Error::InvalidState);
        };
        if state.started || state.added || state.busy || !state.children.is_empty() {
            return Err(Error::InvalidState);
        }
        *internal = None;
        debug!("destruct {}", self.name);
        Ok(())
    }

    pub fn is_constructed(&self) -> bool {
        self.internal.lock().is_some()
    }

    pub fn is_added(&self) -> bool {
        self.read_internal(|internal| internal.added).unwrap_or(false)
    }

    pub fn is_started(&self) -> bool {
        self.read_internal(|internal| internal.started).unwrap_or(false)
    }

    /// Started and usable.
    pub fn is_ready(&self) -> bool {
        self.is_started()
    }

    /// Outcome of the last start attempt; `Ok` while started or never started.
    pub fn start_result(&self) -> Result<()> {
        self.read_internal(|internal| internal.start_result).unwrap_or(Ok(()))
    }

    pub(crate) fn claim_added(&self, added: bool) -> Result<()> {
        self.with_internal(|internal| {
            if internal.started || internal.busy || internal.added == added {
                return Err(Error::InvalidState);
            }
            internal.added = added;
            Ok(())
        })
    }

    // endregion

    // region: tree

    /// Set the parent device. Only allowed before the device is added.
    pub fn set_parent(&self, parent: Option<&Handle<Device>>) -> Result<()> {
        // held across the write so a concurrent add sees either the old or the new parent
        let internal = self.internal.lock();
        if internal.as_ref().is_some_and(|internal| internal.added) {
            return Err(Error::InvalidState);
        }
        *self.parent.write() = parent.map(Handle::create_ref);
        Ok(())
    }

    pub fn parent(&self) -> Option<Handle<Device>> {
        self.parent.read().as_ref()?.get_handle()
    }

    pub(crate) fn attach_child(&self, child: &Handle<Device>) -> Result<()> {
        self.with_internal(|internal| {
            if !internal.added {
                return Err(Error::InvalidState);
            }
            internal.children.push(child.clone());
            Ok(())
        })
    }

    pub(crate) fn detach_child(&self, child: &Handle<Device>) {
        let _ = self.with_internal(|internal| {
            internal.children.retain(|existing| !existing.ptr_eq(child));
            Ok(())
        });
    }

    /// Visit the children in the order they were added until `visitor` returns `false`.
    ///
    /// Runs under this device's lock: the visitor must not add or remove children of it.
    pub fn for_each_child(&self, mut visitor: impl FnMut(&Handle<Device>) -> bool) {
        let internal = self.internal.lock();
        if let Some(internal) = internal.as_ref() {
            for child in &internal.children {
                if !visitor(child) {
                    break;
                }
            }
        }
    }

    pub fn child_count(&self) -> usize {
        self.read_internal(|internal| internal.children.len()).unwrap_or(0)
    }

    // endregion

    // region: driver

    /// Select the driver used by the next start. Refused while started.
    pub fn set_driver(&self, driver: Option<&Handle<Driver>>) -> Result<()> {
        self.with_internal(|internal| {
            if internal.started || internal.busy {
                return Err(Error::InvalidState);
            }
            internal.driver = driver.cloned();
            Ok(())
        })
    }

    pub fn driver(&self) -> Option<Handle<Driver>> {
        self.read_internal(|internal| internal.driver.clone()).flatten()
    }

    pub fn device_type(&self) -> Option<&'static DeviceType> {
        self.driver()?.device_type()
    }

    /// Store state for the bound driver. It is dropped again when the driver unbinds.
    pub fn set_driver_data<D: Any + Send + Sync>(&self, data: D) -> Result<()> {
        self.with_internal(|internal| {
            internal.driver_data = Some(Arc::new(data));
            Ok(())
        })
    }

    pub fn clear_driver_data(&self) {
        let _ = self.with_internal(|internal| {
            internal.driver_data = None;
            Ok(())
        });
    }

    pub fn driver_data<D: Any + Send + Sync>(&self) -> Option<Arc<D>> {
        let data = self.read_internal(|internal| internal.driver_data.clone()).flatten()?;
        data.downcast::<D>().ok()
    }

    // endregion

    // region: locking

    /// Serialize access to the hardware behind this device.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn try_lock(&self, timeout: Tick) -> Result<MutexGuard<'_, ()>> {
        self.lock.try_lock_for(timeout)
    }

    // endregion
}

impl Handle<Device> {
    /// Bind the configured driver.
    ///
    /// Starting a started device does nothing. A failed start keeps the device stopped and
    /// records the driver's error in [Device::start_result].
    pub fn start(&self) -> Result<()> {
        let driver = self.with_internal(|internal| {
            if !internal.added || internal.busy {
                return Err(Error::InvalidState);
            }
            if internal.started {
                return Ok(None);
            }
            let driver = internal.driver.clone().ok_or(Error::InvalidState)?;
            internal.busy = true;
            Ok(Some(driver))
        })?;
        let Some(driver) = driver else {
            return Ok(());
        };

        info!("start {}", self.name);
        let bound = driver.bind(self);
        self.with_internal(|internal| {
            internal.busy = false;
            internal.start_result = bound.as_ref().map(|_| ()).map_err(|error| *error);
            match bound {
                Ok(binding) => {
                    internal.binding = Some(binding);
                    internal.started = true;
                    Ok(())
                }
                Err(error) => {
                    internal.driver_data = None;
                    Err(error)
                }
            }
        })
    }

    /// Unbind the driver.
    ///
    /// Stopping a stopped device does nothing. If the driver refuses, the device stays
    /// started.
    pub fn stop(&self) -> Result<()> {
        let binding = self.with_internal(|internal| {
            if !internal.added || internal.busy {
                return Err(Error::InvalidState);
            }
            let binding = internal.binding.take();
            internal.busy = binding.is_some();
            Ok(binding)
        })?;
        let Some(binding) = binding else {
            return Ok(());
        };

        info!("stop {}", self.name);
        match binding.unbind(self) {
            Ok(()) => self.with_internal(|internal| {
                internal.busy = false;
                internal.started = false;
                internal.start_result = Ok(());
                internal.driver_data = None;
                Ok(())
            }),
            Err(UnbindError { binding, error }) => {
                warn!("{} refused to stop: {error}", self.name);
                // put the binding back so a later stop can retry
                let _ = self.with_internal(|internal| {
                    internal.busy = false;
                    internal.binding = Some(binding);
                    Ok(())
                });
                Err(error)
            }
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("added", &self.is_added())
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanelConfig {
        width: u16,
    }

    #[test]
    fn destruct_requires_construct() {
        let device = Device::new("display");
        assert_eq!(device.destruct(), Err(Error::InvalidState));
        device.construct().unwrap();
        assert_eq!(device.construct(), Err(Error::InvalidState));
        device.destruct().unwrap();
        assert!(!device.is_constructed());
    }

    #[test]
    fn start_needs_added_device_and_driver() {
        let device = Device::new("display");
        device.construct().unwrap();
        assert_eq!(device.start(), Err(Error::InvalidState));
        assert_eq!(device.stop(), Err(Error::InvalidState));
        device.claim_added(true).unwrap();
        assert_eq!(device.start(), Err(Error::InvalidState));
        assert!(!device.is_started());
    }

    #[test]
    fn config_is_typed() {
        let device = Device::with_config("display", PanelConfig { width: 320 });
        assert_eq!(device.config::<PanelConfig>().map(|c| c.width), Some(320));
        assert!(device.config::<u32>().is_none());
        assert!(Device::new("bare").config::<PanelConfig>().is_none());
    }

    #[test]
    fn driver_data_is_typed() {
        let device = Device::new("sdcard");
        assert_eq!(device.set_driver_data(1u8), Err(Error::InvalidState));
        device.construct().unwrap();
        device.set_driver_data(String::from("mounted")).unwrap();
        assert_eq!(device.driver_data::<String>().as_deref().map(String::as_str), Some("mounted"));
        assert!(device.driver_data::<u8>().is_none());
        device.clear_driver_data();
        assert!(device.driver_data::<String>().is_none());
    }

    #[test]
    fn parent_is_weak_and_fixed_once_added() {
        let parent = Device::new("i2c0");
        let child = Device::new("touch");
        child.construct().unwrap();
        child.set_parent(Some(&parent)).unwrap();
        assert!(child.parent().is_some_and(|p| p.ptr_eq(&parent)));
        child.claim_added(true).unwrap();
        assert_eq!(child.set_parent(None), Err(Error::InvalidState));
        drop(parent);
        assert!(child.parent().is_none());
    }

    #[test]
    fn device_type_identity() {
        static DISPLAY: DeviceType = DeviceType::new("display");
        static OTHER_DISPLAY: DeviceType = DeviceType::new("display");
        assert!(DISPLAY.is(&DISPLAY));
        assert!(!DISPLAY.is(&OTHER_DISPLAY));
    }
}
