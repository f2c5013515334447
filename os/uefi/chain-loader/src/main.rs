//! # UEFI Chain Loader
//!
//! A UEFI application that is installed as a boot option of its own. It
//! starts the patch driver, then takes the place of the platform boot manager
//! and boots Windows exactly the way the firmware would have, so the driver's
//! hooks are in place when the Windows boot manager is loaded.
//!
//! ## Boot Flow
//!
//! ```text
//! Firmware boot manager
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │              Chain Loader                   │
//! ├─────────────────────────────────────────────┤
//! │  1. Environment Setup                       │
//! │     • Connect all controllers               │
//! │     • Largest text mode, watchdog off       │
//! │  2. Driver Bootstrap                        │
//! │     • Already running? Skip loading         │
//! │     • Locate, load and start the driver     │
//! │     • Optional interactive configuration    │
//! │  3. Boot Selection                          │
//! │     • Read BootCurrent, BootOrder, Boot#### │
//! │     • Strict pass: Windows entries only     │
//! │     • Relaxed pass: any boot entry          │
//! └─────────────────────────────────────────────┘
//!         ↓
//! Windows Boot Manager (patched by the driver)
//! ```
//!
//! If nothing boots, the operator is told so and control returns to the
//! firmware.
//!
//! ## Build Options
//!
//! * `configure-driver`: prompt for the driver's bypass strategy instead of
//!   using its defaults.
//! * `qemu`: mirror log output to the QEMU debug console.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![no_main]
#![allow(unsafe_code)]
extern crate alloc;

mod boot_options;
mod config;
mod console;
mod driver;
mod file_system;
mod firmware;
mod logger;
mod protocols;

use crate::boot_options::{read_boot_current, read_boot_options};
use crate::config::{
    CONFIGURE_DRIVER, DRIVER_FILE_NAME, LOG_LEVEL, PATCH_LOG_UNITS, UNKNOWN_BOOT_OPTION, WATCHDOG_CODE,
};
use crate::console::{ConsolePrompt, set_highest_available_text_mode, wait_for_key};
use crate::driver::UefiDriverHost;
use crate::firmware::{UefiFirmware, connect_all, exit_data_text};
use crate::logger::UefiLogger;
use boot_chain::{BootOption, BootstrapOutcome, KeyPrompt, boot_chain, start_and_configure};
use log::{debug, info, warn};
use patch_primitives::PatchLog;
use uefi::prelude::*;
use uefi::system;

#[entry]
fn efi_main() -> Status {
    if uefi::helpers::init().is_err() {
        return Status::UNSUPPORTED;
    }
    if UefiLogger::new(LOG_LEVEL).init().is_err() {
        return Status::ABORTED;
    }

    connect_all();

    if let Err(e) = set_highest_available_text_mode() {
        debug!("Failed to set the text mode: {:?}", e.status());
    }
    if let Err(e) = boot::set_watchdog_timer(0, WATCHDOG_CODE, None) {
        warn!("Failed to disable the watchdog: {:?}", e.status());
    }

    log_paging_mode();

    if let Err(status) = bootstrap_driver() {
        uefi::println!(
            "\nERROR: driver load failed with status {status:?}.\n\
             Press any key to continue, or press ESC to return to the firmware or shell."
        );
        if !wait_for_key() {
            return status;
        }
    }

    let current = match read_boot_current() {
        Ok(current) => current,
        Err(status) => {
            debug!("BootCurrent: {status:?}");
            uefi::println!(
                "WARNING: failed to query the current boot option index variable.\n\
                 This could lead to the current device being booted recursively.\n\
                 If you booted from a removable device, it is recommended that you remove it now.\n\
                 \nPress any key to continue..."
            );
            wait_for_key();
            UNKNOWN_BOOT_OPTION
        }
    };
    info!("Started from boot option {current:04X}");

    let mut options = read_boot_options();
    let booted = boot_chain(&mut UefiFirmware, &mut options, Some(current));
    if booted {
        return Status::SUCCESS;
    }
    report_failures(&options);
    drop(options);

    uefi::println!(
        "No boot option could be started.\n\
         Press any key to return to the firmware or shell."
    );
    wait_for_key();
    Status::SUCCESS
}

/// Starts the patch driver and shows what it did.
fn bootstrap_driver() -> Result<(), Status> {
    let mut log = PatchLog::<PATCH_LOG_UNITS>::new();
    let mut prompt = ConsolePrompt;
    let prompt: Option<&mut dyn KeyPrompt> = if CONFIGURE_DRIVER {
        Some(&mut prompt)
    } else {
        None
    };

    uefi::println!("Locating and loading driver file {DRIVER_FILE_NAME}...");
    let outcome = start_and_configure(&mut UefiDriverHost, DRIVER_FILE_NAME, prompt, &mut log);

    log.flush(|line| {
        system::with_stdout(|out| {
            let _ = out.output_string(line);
        });
    });

    match outcome {
        Ok(BootstrapOutcome::AlreadyStarted) => {
            uefi::println!("The driver is already loaded.");
            Ok(())
        }
        Ok(BootstrapOutcome::Started) => Ok(()),
        Err(error) => {
            warn!("{error}");
            Err(error.into())
        }
    }
}

fn report_failures(options: &[BootOption]) {
    for option in options {
        let Some(status) = option.status else {
            continue;
        };
        match option.exit_data.as_deref().map(exit_data_text) {
            Some(text) if !text.is_empty() => {
                warn!("Boot{:04X} ({}): {status:?}: {text}", option.id, option.description);
            }
            _ => warn!("Boot{:04X} ({}): {status:?}", option.id, option.description),
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn log_paging_mode() {
    use cpu_registers::paging::PagingMode;

    // SAFETY: UEFI applications run at CPL 0.
    let mode = unsafe { PagingMode::current() };
    info!("Paging mode: {mode:?}");
}

#[cfg(not(target_arch = "x86_64"))]
fn log_paging_mode() {}
