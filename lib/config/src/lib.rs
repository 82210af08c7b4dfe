//! Configurations for the kernel.
//! The values live in `flags.json` at the workspace root and are turned into
//! constants by the build script, so every crate sees the same numbers.

#![no_std]
#![deny(missing_docs)]

/// Constants generated from `flags.json`.
#[allow(missing_docs)]
pub mod build_flags {
    include!(concat!(env!("OUT_DIR"), "/build_flags.rs"));
}

pub use build_flags::*;

