//! tactile: a device, driver and module kernel for embedded boards.
//!
//! The kernel keeps ledgers of devices and drivers, binds them by compatible string,
//! arbitrates GPIO pins between bus drivers, resolves symbols across modules and provides
//! the thread, timer and lock primitives the rest of the system is written against.
extern crate alloc;

#[macro_use]
pub mod logging;

pub mod dev;
pub mod error;
pub mod init;
pub mod interrupt;
pub mod module;
pub mod mutex;
pub mod task;
pub mod time;

pub use error::{Error, Result};
