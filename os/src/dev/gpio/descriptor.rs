//! Per-controller pin descriptors and their leases.
use alloc::{sync::Arc, vec::Vec};
use core::{
    any::Any,
    fmt,
    ops::Deref,
    sync::atomic::{AtomicBool, AtomicU16, Ordering},
};

use log::{debug, warn};

use crate::{
    dev::{
        Device, Handle, HandleRef,
        gpio::{GpioControllerApi, GpioFlags, GpioOwnerType, GpioPin, GpioPinSpec},
    },
    error::{Error, Result},
    mutex::Mutex,
};

/// Controller state shared by all descriptors of one controller.
pub type ControllerContext = Arc<dyn Any + Send + Sync>;

/// Pins addressable through [GpioPin].
const MAX_PIN_COUNT: usize = GpioPin::MAX as usize + 1;

/// One physical pin of a controller.
pub struct GpioDescriptor {
    controller: HandleRef<Device>,
    pin: GpioPin,
    controller_context: Option<ControllerContext>,
    level: AtomicBool,
    flags: AtomicU16,
}

#[derive(Clone, Copy)]
struct Slot {
    owner: GpioOwnerType,
    /// Bumped by every lease so a stale lease cannot release its successor.
    generation: u64,
}

struct Leases {
    /// Set once the table is deinitialized.
    retired: bool,
    slots: Vec<Slot>,
}

pub(crate) struct DescriptorTable {
    descriptors: Vec<GpioDescriptor>,
    leases: Mutex<Leases>,
}

impl DescriptorTable {
    fn release(&self, pin: GpioPin, generation: u64) -> Result<()> {
        let mut leases = self.leases.lock();
        let slot = leases.slots.get_mut(pin as usize).ok_or(Error::InvalidArgument)?;
        if slot.owner == GpioOwnerType::None || slot.generation != generation {
            return Err(Error::InvalidState);
        }
        slot.owner = GpioOwnerType::None;
        Ok(())
    }
}

// region: controller side

/// Publish `pin_count` free descriptors for `controller`. Called from the controller's start.
pub fn init_descriptors(
    controller: &Handle<Device>,
    pin_count: usize,
    controller_context: Option<ControllerContext>,
) -> Result<()> {
    if pin_count == 0 || pin_count > MAX_PIN_COUNT {
        return Err(Error::InvalidArgument);
    }
    let mut table = controller.gpio.lock();
    if table.is_some() {
        return Err(Error::InvalidState);
    }
    let descriptors = (0..pin_count)
        .map(|pin| GpioDescriptor {
            controller: controller.create_ref(),
            pin: pin as GpioPin,
            controller_context: controller_context.clone(),
            level: AtomicBool::new(false),
            flags: AtomicU16::new(GpioFlags::empty().bits()),
        })
        .collect();
    let slots = vec![
        Slot {
            owner: GpioOwnerType::None,
            generation: 0,
        };
        pin_count
    ];
    *table = Some(Arc::new(DescriptorTable {
        descriptors,
        leases: Mutex::new(Leases { retired: false, slots }),
    }));
    debug!("{} publishes {pin_count} gpio descriptors", controller.name());
    Ok(())
}

/// Withdraw the descriptors of `controller`. Refused while any pin is still leased.
pub fn deinit_descriptors(controller: &Handle<Device>) -> Result<()> {
    let mut table = controller.gpio.lock();
    let current = table.as_ref().ok_or(Error::InvalidState)?;
    {
        let mut leases = current.leases.lock();
        if leases.slots.iter().any(|slot| slot.owner != GpioOwnerType::None) {
            return Err(Error::InvalidState);
        }
        leases.retired = true;
    }
    *table = None;
    Ok(())
}

fn table_of(controller: &Device) -> Result<Arc<DescriptorTable>> {
    controller.gpio.lock().clone().ok_or(Error::Resource)
}

/// Number of descriptors published by `controller`.
pub fn controller_pin_count(controller: &Handle<Device>) -> Result<usize> {
    Ok(table_of(controller)?.descriptors.len())
}

/// Current owner of a pin.
pub fn pin_owner(controller: &Handle<Device>, pin: GpioPin) -> Result<GpioOwnerType> {
    let table = table_of(controller)?;
    let leases = table.leases.lock();
    leases.slots.get(pin as usize).map(|slot| slot.owner).ok_or(Error::InvalidArgument)
}

// endregion

// region: consumer side

/// Lease `pin` of `controller` for `owner`.
///
/// Fails with [Error::InvalidArgument] for [GpioOwnerType::None] or a pin the controller
/// does not have, [Error::InvalidState] when the pin is already leased, and
/// [Error::Resource] when the controller publishes no descriptors.
pub fn acquire(controller: &Handle<Device>, pin: GpioPin, owner: GpioOwnerType) -> Result<GpioLease> {
    if owner == GpioOwnerType::None {
        return Err(Error::InvalidArgument);
    }
    let table = table_of(controller)?;
    let generation = {
        let mut leases = table.leases.lock();
        if leases.retired {
            return Err(Error::Resource);
        }
        let slot = leases.slots.get_mut(pin as usize).ok_or(Error::InvalidArgument)?;
        if slot.owner != GpioOwnerType::None {
            warn!("{} pin {pin} is already owned by {:?}", controller.name(), slot.owner);
            return Err(Error::InvalidState);
        }
        slot.owner = owner;
        slot.generation += 1;
        slot.generation
    };
    Ok(GpioLease {
        table,
        pin,
        owner,
        generation,
        released: false,
    })
}

/// Lease the pin named by `spec`. Applying `spec.flags` is left to the caller.
pub fn acquire_pin_spec(spec: &GpioPinSpec, owner: GpioOwnerType) -> Result<GpioLease> {
    acquire(&spec.controller, spec.pin, owner)
}

/// Exclusive use of one pin. Dropping the lease returns the pin.
#[must_use]
pub struct GpioLease {
    table: Arc<DescriptorTable>,
    pin: GpioPin,
    owner: GpioOwnerType,
    generation: u64,
    released: bool,
}

impl GpioLease {
    pub fn owner_type(&self) -> GpioOwnerType {
        self.owner
    }

    /// Return the pin now, reporting [Error::InvalidState] if the lease no longer held it.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.table.release(self.pin, self.generation)
    }
}

impl Deref for GpioLease {
    type Target = GpioDescriptor;

    fn deref(&self) -> &GpioDescriptor {
        &self.table.descriptors[self.pin as usize]
    }
}

impl Drop for GpioLease {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.table.release(self.pin, self.generation);
        }
    }
}

impl fmt::Debug for GpioLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioLease")
            .field("pin", &self.pin)
            .field("owner", &self.owner)
            .finish()
    }
}

// endregion

// region: pin operations

impl GpioDescriptor {
    pub fn pin(&self) -> GpioPin {
        self.pin
    }

    pub fn controller(&self) -> Option<Handle<Device>> {
        self.controller.get_handle()
    }

    pub fn controller_context<C: Any>(&self) -> Option<&C> {
        self.controller_context.as_deref()?.downcast_ref::<C>()
    }

    fn api(&self) -> Result<GpioControllerApi> {
        let controller = self.controller().ok_or(Error::Resource)?;
        let driver = controller.driver().ok_or(Error::InvalidState)?;
        driver.api::<GpioControllerApi>().copied().ok_or(Error::NotSupported)
    }

    pub fn set_level(&self, high: bool) -> Result<()> {
        (self.api()?.set_level)(self, high)?;
        self.level.store(high, Ordering::Release);
        Ok(())
    }

    pub fn get_level(&self) -> Result<bool> {
        let high = (self.api()?.get_level)(self)?;
        self.level.store(high, Ordering::Release);
        Ok(high)
    }

    pub fn set_flags(&self, flags: GpioFlags) -> Result<()> {
        (self.api()?.set_flags)(self, flags)?;
        self.flags.store(flags.bits(), Ordering::Release);
        Ok(())
    }

    pub fn get_flags(&self) -> Result<GpioFlags> {
        let flags = (self.api()?.get_flags)(self)?;
        self.flags.store(flags.bits(), Ordering::Release);
        Ok(flags)
    }

    pub fn get_native_pin_number(&self) -> Result<u32> {
        (self.api()?.get_native_pin_number)(self)
    }

    /// Level seen by the last successful level operation.
    pub fn cached_level(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    /// Flags seen by the last successful flag operation.
    pub fn cached_flags(&self) -> GpioFlags {
        GpioFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }
}

impl fmt::Debug for GpioDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioDescriptor").field("pin", &self.pin).finish()
    }
}

// endregion
