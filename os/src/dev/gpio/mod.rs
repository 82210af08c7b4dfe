//! GPIO pins: flags, owner kinds and the controller api.
//!
//! A GPIO controller device publishes one descriptor per pin when it starts
//! ([init_descriptors]). Bus and peripheral drivers then lease the pins they wire up with
//! [acquire]; a pin leased by one consumer cannot be leased by another until the
//! [GpioLease] is released or dropped.
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::dev::{Device, DeviceType, Handle};

pub mod descriptor;

pub use descriptor::{
    GpioDescriptor, GpioLease, acquire, acquire_pin_spec, controller_pin_count, deinit_descriptors,
    init_descriptors,
};

/// Pin index local to one controller.
pub type GpioPin = u8;

/// Discovery tag for GPIO controller devices.
pub static GPIO_CONTROLLER_TYPE: DeviceType = DeviceType::new("gpio-controller");

bitflags! {
    /// Pin configuration. Bits 5..=7 hold a [GpioInterrupt].
    #[derive(Default)]
    pub struct GpioFlags: u16 {
        const ACTIVE_LOW = 1 << 0;
        const DIRECTION_INPUT = 1 << 1;
        const DIRECTION_OUTPUT = 1 << 2;
        const DIRECTION_INPUT_OUTPUT = Self::DIRECTION_INPUT.bits | Self::DIRECTION_OUTPUT.bits;
        const PULL_UP = 1 << 3;
        const PULL_DOWN = 1 << 4;
        const INTERRUPT_MASK = 0b111 << 5;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum GpioInterrupt {
    Disable = 0,
    PosEdge = 1,
    NegEdge = 2,
    AnyEdge = 3,
    LowLevel = 4,
    HighLevel = 5,
}

impl GpioFlags {
    const INTERRUPT_SHIFT: u16 = 5;

    /// The interrupt trigger; unknown encodings read as [GpioInterrupt::Disable].
    pub fn interrupt(&self) -> GpioInterrupt {
        let raw = (self.bits() & Self::INTERRUPT_MASK.bits()) >> Self::INTERRUPT_SHIFT;
        GpioInterrupt::try_from(raw as u8).unwrap_or(GpioInterrupt::Disable)
    }

    pub fn with_interrupt(self, interrupt: GpioInterrupt) -> GpioFlags {
        let bits = u16::from(u8::from(interrupt)) << Self::INTERRUPT_SHIFT;
        (self - GpioFlags::INTERRUPT_MASK) | GpioFlags::from_bits_truncate(bits)
    }
}

/// Who holds a pin.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum GpioOwnerType {
    /// Free. Never a valid owner for a lease.
    None,
    /// Claimed at boot and kept in a fixed state.
    Hog,
    Gpio,
    I2c,
    Spi,
}

/// A pin as named by board configuration: controller, pin and the flags to apply.
#[derive(Debug, Clone)]
pub struct GpioPinSpec {
    pub controller: Handle<Device>,
    pub pin: GpioPin,
    pub flags: GpioFlags,
}

/// Operations a GPIO controller driver exposes through its api table.
///
/// Each receives the descriptor of the pin it acts on; controller state travels in
/// [GpioDescriptor::controller_context].
#[derive(Debug, Clone, Copy)]
pub struct GpioControllerApi {
    pub set_level: fn(&GpioDescriptor, bool) -> crate::Result<()>,
    pub get_level: fn(&GpioDescriptor) -> crate::Result<bool>,
    pub set_flags: fn(&GpioDescriptor, GpioFlags) -> crate::Result<()>,
    pub get_flags: fn(&GpioDescriptor) -> crate::Result<GpioFlags>,
    pub get_native_pin_number: fn(&GpioDescriptor) -> crate::Result<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_bits_round_trip_without_touching_other_flags() {
        let flags = (GpioFlags::DIRECTION_INPUT | GpioFlags::PULL_UP).with_interrupt(GpioInterrupt::AnyEdge);
        assert_eq!(flags.interrupt(), GpioInterrupt::AnyEdge);
        assert!(flags.contains(GpioFlags::PULL_UP));
        let flags = flags.with_interrupt(GpioInterrupt::Disable);
        assert_eq!(flags, GpioFlags::DIRECTION_INPUT | GpioFlags::PULL_UP);
    }

    #[test]
    fn unknown_interrupt_encoding_reads_as_disabled() {
        let flags = GpioFlags::from_bits_truncate(7 << 5);
        assert_eq!(flags.interrupt(), GpioInterrupt::Disable);
    }
}
