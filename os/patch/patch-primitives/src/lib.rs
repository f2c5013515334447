//! # Binary Patching Primitives
//!
//! The low-level building blocks a pre-OS component needs to find and modify
//! fixed code regions of an image that was loaded by the firmware:
//!
//! * [`pattern`]: byte signature scanning with a single wildcard value.
//! * [`pe`] and [`unwind`]: recovering the start of the function that contains
//!   an arbitrary code address, using the image's exception directory.
//! * [`wp`]: copies and fills into memory guarded by `CR0.WP`.
//! * [`patch_log`]: a fixed-capacity message log describing applied patches.
//!
//! None of these know what is being patched; they only find and write bytes.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod patch_log;
pub mod pattern;
pub mod pe;
pub mod unwind;
pub mod wp;

pub use patch_log::PatchLog;
pub use pattern::{Pattern, ScanError, ScanReport, find_pattern, find_pattern_verbose};
pub use unwind::{FunctionTable, RuntimeFunction, UnwindError, backtrack_to_function_start};
pub use wp::{WpGuard, WriteProtect};
