//! Kernel bring-up.
//!
//! [init] starts the built-in `kernel` module, which registers the system `root` driver and
//! exports the kernel's symbol table, then the board's platform and device modules, and
//! finally walks the board's device list in order.
use alloc::vec::Vec;

use lazy_static::lazy_static;
use log::{error, info};

use crate::{
    define_module_symbols,
    dev::{self, Device, Driver, DRIVERS, Handle, gpio},
    error::{Error, Result},
    module::{self, MODULES, Module, ModuleSymbol},
    task::{Dispatcher, Thread, Timer},
};

/// Compatible string served by [struct@ROOT_DRIVER].
pub const ROOT_COMPATIBLE: &str = "root";

lazy_static! {
    /// Driver of the board's root device. Owned by the system, so it is never torn down.
    pub static ref ROOT_DRIVER: Handle<Driver> = Driver::builder("root").compatible(&[ROOT_COMPATIBLE]).build();
    static ref KERNEL_MODULE: Handle<Module> = Module::builder("kernel")
        .start(start_kernel)
        .symbols(kernel_symbols())
        .build();
}

fn start_kernel() -> Result<()> {
    if DRIVERS.contains(&ROOT_DRIVER) {
        return Ok(());
    }
    DRIVERS.construct_add(&ROOT_DRIVER).map_err(|_| Error::Resource)
}

fn kernel_symbols() -> Vec<ModuleSymbol> {
    define_module_symbols![
        device_construct => Device::construct,
        device_destruct => Device::destruct,
        device_add => dev::add,
        device_remove => dev::remove,
        device_start => Handle::<Device>::start,
        device_stop => Handle::<Device>::stop,
        device_construct_add => dev::construct_add,
        device_construct_add_start => dev::construct_add_start,
        device_set_parent => Device::set_parent,
        device_get_parent => Device::parent,
        device_set_driver => Device::set_driver,
        device_get_driver => Device::driver,
        device_is_added => Device::is_added,
        device_is_ready => Device::is_ready,
        device_get_type => Device::device_type,
        device_find_by_name => dev::find_by_name,
        driver_construct => Driver::construct,
        driver_destruct => Driver::destruct,
        driver_bind => Handle::<Driver>::bind,
        driver_is_compatible => Driver::is_compatible,
        driver_find_compatible => dev::find_compatible_driver,
        driver_get_device_type => Driver::device_type,
        gpio_descriptor_acquire => gpio::acquire,
        gpio_controller_get_pin_count => gpio::controller_pin_count,
        gpio_descriptor_set_level => gpio::GpioDescriptor::set_level,
        gpio_descriptor_get_level => gpio::GpioDescriptor::get_level,
        gpio_descriptor_set_flags => gpio::GpioDescriptor::set_flags,
        gpio_descriptor_get_flags => gpio::GpioDescriptor::get_flags,
        dispatcher_consume_timed => Dispatcher::consume_timed,
        thread_start => Thread::start,
        thread_join => Thread::join,
        thread_get_current => Thread::current,
        thread_get_return_code => Thread::return_code,
        timer_start => Timer::start,
        timer_stop => Timer::stop,
        timer_reset => Timer::reset,
        timer_reset_with_interval => Timer::reset_with_interval,
        timer_is_running => Timer::is_running,
        timer_get_expiry_time => Timer::expiry_time,
        module_construct => Module::construct,
        module_destruct => Module::destruct,
        module_start => Module::start,
        module_stop => Module::stop,
        module_is_started => Module::is_started,
        module_resolve_symbol => Module::resolve_symbol,
        module_resolve_symbol_global => module::resolve_symbol_global,
    ]
}

/// The built-in module exporting the kernel's symbols.
pub fn kernel_module() -> Handle<Module> {
    KERNEL_MODULE.clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Constructed, added and started at boot.
    Okay,
    /// Constructed and added, left for someone else to start.
    Disabled,
}

/// One entry of the board's device list.
#[derive(Debug, Clone)]
pub struct BoardDevice {
    pub device: Handle<Device>,
    pub compatible: &'static str,
    pub status: DeviceStatus,
}

impl BoardDevice {
    pub fn new(device: Handle<Device>, compatible: &'static str, status: DeviceStatus) -> BoardDevice {
        BoardDevice {
            device,
            compatible,
            status,
        }
    }
}

/// Bring the kernel up for a board.
///
/// Module failures and devices that cannot be constructed abort with [Error::Resource].
/// A device that fails to start is logged and stays added, so it can still be found by name.
pub fn init(platform_module: &Handle<Module>, device_module: Option<&Handle<Module>>, devices: &[BoardDevice]) -> Result<()> {
    info!("init");

    if let Err(err) = MODULES.construct_add_start(&KERNEL_MODULE) {
        error!("kernel module init failed: {err}");
        return Err(Error::Resource);
    }
    if let Err(err) = MODULES.construct_add_start(platform_module) {
        error!("platform module init failed: {err}");
        return Err(Error::Resource);
    }
    if let Some(device_module) = device_module {
        if let Err(err) = MODULES.construct_add_start(device_module) {
            error!("device module init failed: {err}");
            return Err(Error::Resource);
        }
    }

    for entry in devices {
        if let Err(err) = dev::construct_add(&entry.device, entry.compatible) {
            error!("failed to construct device {} ({}): {err}", entry.device.name(), entry.compatible);
            return Err(Error::Resource);
        }
        if entry.status == DeviceStatus::Okay {
            if let Err(err) = entry.device.start() {
                error!("failed to start device {} ({}): {err}", entry.device.name(), entry.compatible);
            }
        }
    }

    info!("init done");
    Ok(())
}
