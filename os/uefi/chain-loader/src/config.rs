//! Compile-time configuration.

use log::LevelFilter;
use uefi::{Guid, guid};

/// File name of the patch driver image.
pub const DRIVER_FILE_NAME: &str = "EfiGuardDxe.efi";

/// Whether to prompt for the driver configuration.
pub const CONFIGURE_DRIVER: bool = cfg!(feature = "configure-driver");

pub const LOG_LEVEL: LevelFilter = if cfg!(debug_assertions) {
    LevelFilter::Debug
} else {
    LevelFilter::Info
};

/// `EFI_EVENT_GROUP_READY_TO_BOOT`
pub const READY_TO_BOOT_EVENT_GROUP: Guid = guid!("7ce88fb3-4bd7-4679-87a8-a8d8dee50d2b");

/// Loader appended to device-only boot option paths, per the removable media convention.
pub const REMOVABLE_MEDIA_LOADER: &str = "\\EFI\\BOOT\\BOOTX64.EFI";

/// Watchdog code for timers we arm; codes up to `0xFFFF` belong to the firmware.
pub const WATCHDOG_CODE: u64 = 0x1_0000;

/// `BootCurrent` placeholder when the variable cannot be read.
pub const UNKNOWN_BOOT_OPTION: u16 = 0xFFFF;

/// Units in the patch message log.
pub const PATCH_LOG_UNITS: usize = 2048;
