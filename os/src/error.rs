//! Kernel error codes.
//!
//! Every fallible kernel operation returns [Result]. The numeric values are the codes handed
//! to dynamically loaded units, which only see plain integers: `0` means success and
//! the variants below map 1:1 onto the remaining codes.
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error, IntoPrimitive, TryFromPrimitive)]
pub enum Error {
    #[error("undefined")]
    Undefined = 1,
    /// A lifecycle precondition is violated.
    #[error("invalid state")]
    InvalidState = 2,
    #[error("invalid argument")]
    InvalidArgument = 3,
    #[error("missing parameter")]
    MissingParameter = 4,
    #[error("not found")]
    NotFound = 5,
    /// A blocking call was attempted from interrupt context.
    #[error("ISR status")]
    IsrStatus = 6,
    /// A dependency (compatible driver, controller device, ...) could not be satisfied.
    #[error("resource")]
    Resource = 7,
    #[error("timeout")]
    Timeout = 8,
    #[error("out of memory")]
    OutOfMemory = 9,
    #[error("not supported")]
    NotSupported = 10,
    /// The operation is permanently forbidden, e.g. destructing a system-owned driver.
    #[error("not allowed")]
    NotAllowed = 11,
}

pub type Result<T> = core::result::Result<T, Error>;

/// The code for "no error".
pub const ERROR_NONE: i32 = 0;

/// Flatten a result into its integer code.
pub fn to_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => ERROR_NONE,
        Err(err) => i32::from(*err),
    }
}

/// Rebuild a result from an integer code. Unknown codes become [Error::Undefined].
pub fn from_code(code: i32) -> Result<()> {
    if code == ERROR_NONE {
        return Ok(());
    }
    Err(Error::try_from(code).unwrap_or(Error::Undefined))
}
