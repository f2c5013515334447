//! # Boot Chain Selection
//!
//! Firmware-independent core of the chain loader: the model of persisted boot
//! options and device paths, the state machine that walks the boot order the
//! way the platform boot manager would, and the bootstrap handshake with the
//! privileged patch driver.
//!
//! Everything that touches firmware goes through the [`selector::BootFirmware`]
//! and [`bootstrap::DriverHost`] traits, so the policy in here runs unchanged
//! under unit tests.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod bootstrap;
pub mod config;
pub mod device_path;
pub mod load_option;
pub mod selector;

pub use bootstrap::{
    BootstrapError, BootstrapOutcome, DriverHost, KeyPrompt, candidate_paths, prompt_configuration,
    start_and_configure,
};
pub use config::{BOOT_WATCHDOG_TIMEOUT_SECS, BypassStrategy, DriverConfig, RawDriverConfig};
pub use device_path::{DevicePathBuf, DevicePathError};
pub use load_option::{
    BootOption, LoadOptionAttributes, LoadOptionError, parse_boot_order, raw_load_options,
};
pub use selector::{BootFirmware, LoadFailure, Pass, StartOutcome, boot_chain, try_in_order};
