//! Driver subsystem: registration, compatible-string discovery and binding.
//!
//! Responsibilities:
//! - Describe a driver through [Driver]: the compatible strings it serves, the hooks run when a
//!   device binds or unbinds, an optional api table and the [DeviceType] its devices expose.
//! - Keep registered drivers discoverable through a [DriverLedger]; [DRIVERS] is the one the
//!   kernel uses.
//! - Count bound devices. A [Binding] holds one use of its driver for as long as it lives, and
//!   a driver can only be destructed once every binding is gone.
//!
//! Ownership notes:
//! - A driver without an owning module belongs to the system and can never be removed or
//!   destructed. Module-owned drivers are torn down by their module's stop hook.
//! - Matching is first-registered-wins: when two drivers share a compatible string, the one
//!   added first is returned by [DriverLedger::find_compatible].
use alloc::{boxed::Box, string::String, vec::Vec};
use core::{any::Any, fmt};

use log::info;
use utils::vec::LockedVec;

use crate::{
    dev::{
        device::{Device, DeviceType},
        handle::{Handle, HandleRef},
    },
    error::{Error, Result},
    module::Module,
    mutex::Mutex,
};

/// Called with the device being bound or unbound.
pub type DeviceHook = Box<dyn Fn(&Handle<Device>) -> Result<()> + Send + Sync>;

struct DriverInternal {
    /// Bound devices, including binds whose start hook is still running.
    use_count: usize,
    destroying: bool,
    added: bool,
}

pub struct Driver {
    name: String,
    compatible: Vec<String>,
    start_device: Option<DeviceHook>,
    stop_device: Option<DeviceHook>,
    api: Option<Box<dyn Any + Send + Sync>>,
    device_type: Option<&'static DeviceType>,
    owner: Option<HandleRef<Module>>,
    /// [None] until constructed.
    internal: Mutex<Option<DriverInternal>>,
}

impl Driver {
    pub fn builder(name: &str) -> DriverBuilder {
        DriverBuilder {
            driver: Driver {
                name: String::from(name),
                compatible: Vec::new(),
                start_device: None,
                stop_device: None,
                api: None,
                device_type: None,
                owner: None,
                internal: Mutex::new(None),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compatible(&self) -> &[String] {
        &self.compatible
    }

    /// Exact match against any of the compatible strings.
    pub fn is_compatible(&self, compatible: &str) -> bool {
        self.compatible.iter().any(|candidate| candidate == compatible)
    }

    /// The api table, if one of type `A` was supplied.
    pub fn api<A: Any>(&self) -> Option<&A> {
        self.api.as_ref()?.downcast_ref::<A>()
    }

    pub fn device_type(&self) -> Option<&'static DeviceType> {
        self.device_type
    }

    pub fn owner(&self) -> Option<Handle<Module>> {
        self.owner.as_ref()?.get_handle()
    }

    pub fn is_system_owned(&self) -> bool {
        self.owner.is_none()
    }

    pub fn use_count(&self) -> usize {
        self.internal.lock().as_ref().map_or(0, |internal| internal.use_count)
    }

    pub fn is_constructed(&self) -> bool {
        self.internal.lock().is_some()
    }

    pub fn construct(&self) -> Result<()> {
        let mut internal = self.internal.lock();
        if internal.is_some() {
            return Err(Error::InvalidState);
        }
        *internal = Some(DriverInternal {
            use_count: 0,
            destroying: false,
            added: false,
        });
        debug_ex!("construct driver {}", self.name);
        Ok(())
    }

    /// Free the bookkeeping of a removed driver.
    ///
    /// System-owned drivers are never destructed ([Error::NotAllowed]); bound, registered or
    /// already destroying drivers are refused with [Error::InvalidState].
    pub fn destruct(&self) -> Result<()> {
        self.begin_destruct(false)?;
        *self.internal.lock() = None;
        debug_ex!("destruct driver {}", self.name);
        Ok(())
    }

    fn begin_destruct(&self, allow_added: bool) -> Result<()> {
        if self.is_system_owned() {
            return Err(Error::NotAllowed);
        }
        let mut internal = self.internal.lock();
        let state = internal.as_mut().ok_or(Error::InvalidState)?;
        if state.use_count != 0 || state.destroying || (state.added && !allow_added) {
            return Err(Error::InvalidState);
        }
        state.destroying = true;
        Ok(())
    }

    fn abort_destruct(&self) {
        if let Some(state) = self.internal.lock().as_mut() {
            state.destroying = false;
        }
    }

    fn set_added(&self, added: bool) -> Result<()> {
        let mut internal = self.internal.lock();
        let state = internal.as_mut().ok_or(Error::InvalidState)?;
        if state.added == added || state.destroying {
            return Err(Error::InvalidState);
        }
        state.added = added;
        Ok(())
    }

    fn release_use(&self) {
        if let Some(state) = self.internal.lock().as_mut() {
            state.use_count = state.use_count.saturating_sub(1);
        }
    }
}

impl Handle<Driver> {
    /// Run the start hook for `device` and take one use of this driver.
    ///
    /// Fails with [Error::InvalidState] if the device is not added or the driver is not
    /// constructed or being destructed. A failing hook's error is returned unchanged.
    pub fn bind(&self, device: &Handle<Device>) -> Result<Binding> {
        {
            let mut internal = self.internal.lock();
            let state = internal.as_mut().ok_or(Error::InvalidState)?;
            if state.destroying || !device.is_added() {
                return Err(Error::InvalidState);
            }
            // reserved while the hook runs so a destruct cannot slip in
            state.use_count += 1;
        }
        let binding = Binding { driver: self.clone() };
        if let Some(start_device) = &self.start_device {
            start_device(device)?;
        }
        info!("bound {} to {}", self.name, device.name());
        Ok(binding)
    }
}

/// One device bound to a driver. Dropping it gives the use back without running any hook;
/// [Binding::unbind] runs the stop hook first.
#[must_use]
pub struct Binding {
    driver: Handle<Driver>,
}

impl Binding {
    pub fn driver(&self) -> &Handle<Driver> {
        &self.driver
    }

    /// Run the stop hook for `device` and release the use.
    ///
    /// On failure the binding is handed back so the device stays bound.
    pub fn unbind(self, device: &Handle<Device>) -> core::result::Result<(), UnbindError> {
        let destroying = self.driver.internal.lock().as_ref().is_none_or(|state| state.destroying);
        if destroying || !device.is_added() {
            return Err(UnbindError {
                binding: self,
                error: Error::InvalidState,
            });
        }
        if let Some(stop_device) = &self.driver.stop_device {
            if let Err(error) = stop_device(device) {
                return Err(UnbindError { binding: self, error });
            }
        }
        info!("unbound {} from {}", self.driver.name, device.name());
        Ok(())
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.driver.release_use();
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").field("driver", &self.driver.name).finish()
    }
}

/// A refused unbind, carrying the still-valid binding back to the caller.
#[derive(Debug)]
pub struct UnbindError {
    pub binding: Binding,
    pub error: Error,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name)
            .field("compatible", &self.compatible)
            .field("use_count", &self.use_count())
            .finish()
    }
}

// region: Builder

pub struct DriverBuilder {
    driver: Driver,
}

impl DriverBuilder {
    pub fn compatible(mut self, compatible: &[&str]) -> Self {
        self.driver.compatible.extend(compatible.iter().map(|value| String::from(*value)));
        self
    }

    pub fn start_device<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Handle<Device>) -> Result<()> + Send + Sync + 'static,
    {
        self.driver.start_device = Some(Box::new(hook));
        self
    }

    pub fn stop_device<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Handle<Device>) -> Result<()> + Send + Sync + 'static,
    {
        self.driver.stop_device = Some(Box::new(hook));
        self
    }

    pub fn api<A: Any + Send + Sync>(mut self, api: A) -> Self {
        self.driver.api = Some(Box::new(api));
        self
    }

    pub fn device_type(mut self, device_type: &'static DeviceType) -> Self {
        self.driver.device_type = Some(device_type);
        self
    }

    pub fn owner(mut self, module: &Handle<Module>) -> Self {
        self.driver.owner = Some(module.create_ref());
        self
    }

    pub fn build(self) -> Handle<Driver> {
        Handle::new(self.driver)
    }
}

// endregion

// region: Ledger

/// Registered drivers in registration order.
pub struct DriverLedger {
    drivers: LockedVec<Handle<Driver>>,
}

/// Drivers registered with the kernel.
pub static DRIVERS: DriverLedger = DriverLedger::new();

impl DriverLedger {
    pub const fn new() -> DriverLedger {
        DriverLedger {
            drivers: LockedVec::new(),
        }
    }

    /// Register a constructed driver.
    pub fn add(&self, driver: &Handle<Driver>) -> Result<()> {
        info!("add {}", driver.name);
        driver.set_added(true)?;
        self.drivers.push(driver.clone());
        Ok(())
    }

    /// Unregister a driver. System-owned drivers stay registered.
    pub fn remove(&self, driver: &Handle<Driver>) -> Result<()> {
        info!("remove {}", driver.name);
        if driver.is_system_owned() {
            return Err(Error::NotAllowed);
        }
        self.drivers
            .remove_first(|registered| registered.ptr_eq(driver))
            .ok_or(Error::NotFound)?;
        // membership is what counts; the flag only guards destruct
        let _ = driver.set_added(false);
        Ok(())
    }

    pub fn construct_add(&self, driver: &Handle<Driver>) -> Result<()> {
        driver.construct()?;
        self.add(driver).inspect_err(|_| {
            *driver.internal.lock() = None;
        })
    }

    /// Unregister and destruct in one step, leaving the driver untouched if either is refused.
    pub fn remove_destruct(&self, driver: &Handle<Driver>) -> Result<()> {
        driver.begin_destruct(true)?;
        if self.drivers.remove_first(|registered| registered.ptr_eq(driver)).is_none() {
            driver.abort_destruct();
            return Err(Error::NotFound);
        }
        *driver.internal.lock() = None;
        info!("remove {}", driver.name);
        Ok(())
    }

    /// The first registered driver serving `compatible`.
    pub fn find_compatible(&self, compatible: &str) -> Option<Handle<Driver>> {
        self.drivers.find(|driver| driver.is_compatible(compatible))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Handle<Driver>> {
        self.drivers.find(|driver| driver.name == name)
    }

    pub fn contains(&self, driver: &Handle<Driver>) -> bool {
        self.drivers.any(|registered| registered.ptr_eq(driver))
    }

    /// Visit drivers in registration order until `visitor` returns `false`.
    ///
    /// Runs under the ledger lock: the visitor must not add or remove drivers.
    pub fn for_each(&self, visitor: impl FnMut(&Handle<Driver>) -> bool) {
        self.drivers.for_each(visitor);
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl Default for DriverLedger {
    fn default() -> Self {
        Self::new()
    }
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;

    fn module_owner() -> Handle<Module> {
        Module::builder("owner").build()
    }

    #[test]
    fn compatible_matching_is_exact() {
        let driver = Driver::builder("st7789").compatible(&["sitronix,st7789", "sitronix,st7789v"]).build();
        assert!(driver.is_compatible("sitronix,st7789v"));
        assert!(!driver.is_compatible("sitronix"));
        assert!(!driver.is_compatible(""));
    }

    #[test]
    fn first_registered_wins() {
        let ledger = DriverLedger::new();
        let first = Driver::builder("first").compatible(&["vendor,foo"]).build();
        let second = Driver::builder("second").compatible(&["vendor,bar", "vendor,foo"]).build();
        ledger.construct_add(&first).unwrap();
        ledger.construct_add(&second).unwrap();
        assert!(ledger.find_compatible("vendor,foo").is_some_and(|d| d.ptr_eq(&first)));
        assert!(ledger.find_compatible("vendor,bar").is_some_and(|d| d.ptr_eq(&second)));
        assert!(ledger.find_compatible("vendor,baz").is_none());
        assert!(ledger.find_by_name("second").is_some());
    }

    #[test]
    fn system_drivers_are_permanent() {
        let ledger = DriverLedger::new();
        let driver = Driver::builder("root").build();
        ledger.construct_add(&driver).unwrap();
        assert!(driver.is_system_owned());
        assert_eq!(ledger.remove(&driver), Err(Error::NotAllowed));
        assert_eq!(ledger.remove_destruct(&driver), Err(Error::NotAllowed));
        assert_eq!(driver.destruct(), Err(Error::NotAllowed));
        assert!(ledger.contains(&driver));
    }

    #[test]
    fn module_driver_teardown() {
        let ledger = DriverLedger::new();
        let owner = module_owner();
        let driver = Driver::builder("module-driver").owner(&owner).build();
        ledger.construct_add(&driver).unwrap();
        assert!(driver.owner().is_some_and(|m| m.ptr_eq(&owner)));
        assert_eq!(driver.destruct(), Err(Error::InvalidState));
        ledger.remove(&driver).unwrap();
        assert_eq!(ledger.remove(&driver), Err(Error::NotFound));
        driver.destruct().unwrap();
        assert_eq!(driver.destruct(), Err(Error::InvalidState));
        assert!(ledger.is_empty());
    }

    #[test]
    fn remove_destruct_of_unregistered_driver_changes_nothing() {
        let ledger = DriverLedger::new();
        let owner = module_owner();
        let driver = Driver::builder("stray").owner(&owner).build();
        driver.construct().unwrap();
        assert_eq!(ledger.remove_destruct(&driver), Err(Error::NotFound));
        assert!(driver.is_constructed());
        ledger.add(&driver).unwrap();
        ledger.remove_destruct(&driver).unwrap();
        assert!(!driver.is_constructed());
    }

    #[test]
    fn api_is_typed() {
        struct BacklightApi {
            max_level: u8,
        }
        let driver = Driver::builder("backlight").api(BacklightApi { max_level: 7 }).build();
        assert_eq!(driver.api::<BacklightApi>().map(|api| api.max_level), Some(7));
        assert!(driver.api::<u8>().is_none());
    }
}
