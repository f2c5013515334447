//! # Boot Chain Selection
//!
//! Walks the firmware boot order and boots the first option that starts,
//! performing the same handshake the platform boot manager would: record the
//! option in `BootCurrent`, signal ReadyToBoot, connect the device path, then
//! load and start the image with the option's load data attached.
//!
//! The selection runs in two passes. The strict pass only considers options
//! that look like the Windows boot manager; the relaxed pass takes anything
//! active in the boot category, legacy BIOS entries included.

use crate::config::BOOT_WATCHDOG_TIMEOUT_SECS;
use crate::device_path::{DevicePathBuf, ends_with_ignore_ascii_case};
use crate::load_option::BootOption;
use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;
use log::{debug, info, warn};
use uefi::Status;

/// Description of the entries the Windows installer creates.
pub const WINDOWS_BOOT_MANAGER: &str = "Windows Boot Manager";

/// Loader file names a Windows entry may point at. `bootx64.efi` also matches
/// other removable-media loaders; some Windows installs can only be found this way.
pub const WINDOWS_LOADER_FILES: [&str; 2] = ["bootmgfw.efi", "bootx64.efi"];

/// A failed `LoadImage`. The firmware may hand out a handle even on failure.
#[derive(Debug)]
pub struct LoadFailure<I> {
    pub status: Status,
    pub image: Option<I>,
}

/// Result of `StartImage`, once the image returned control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub status: Status,
    pub exit_data: Option<Vec<u16>>,
}

/// The firmware services the selector needs.
pub trait BootFirmware {
    type Image;

    /// Expands a short-form load option path to the path of a loadable file.
    /// `None` if no expansion applies.
    fn expand_full_path(&mut self, path: &DevicePathBuf) -> Option<DevicePathBuf>;

    fn device_path_text(&mut self, path: &DevicePathBuf) -> Option<String>;

    /// Writes `BootCurrent`.
    ///
    /// # Errors
    /// If the variable could not be written.
    fn set_boot_current(&mut self, id: u16) -> Result<(), Status>;

    /// Deletes `BootCurrent`.
    ///
    /// # Errors
    /// If the variable could not be deleted.
    fn clear_boot_current(&mut self) -> Result<(), Status>;

    fn signal_ready_to_boot(&mut self);

    /// Dispatches whatever drivers the path needs.
    ///
    /// # Errors
    /// If the path could not be connected end to end.
    fn connect_device_path(&mut self, path: &DevicePathBuf) -> Result<(), Status>;

    /// Tells the operator what is about to boot.
    fn announce_boot(&mut self, path_text: &str, legacy: bool);

    /// Called before handing off to a legacy BIOS boot.
    fn confirm_legacy_boot(&mut self, option: &BootOption);

    /// Boots a BBS entry through the legacy BIOS protocol.
    fn legacy_boot(&mut self, option: &BootOption) -> Status;

    /// Loads an image as the boot manager would (`BootPolicy = TRUE`).
    ///
    /// # Errors
    /// The load status, plus the handle if the firmware created one.
    fn load_image(&mut self, path: &DevicePathBuf) -> Result<Self::Image, LoadFailure<Self::Image>>;

    /// # Errors
    /// If the firmware refused to unload the image.
    fn unload_image(&mut self, image: Self::Image) -> Result<(), Status>;

    /// Attaches `load_options` to the loaded image and clears its parent handle.
    ///
    /// # Errors
    /// If the loaded image protocol could not be opened.
    fn prepare_image(&mut self, image: &Self::Image, load_options: &[u8]) -> Result<(), Status>;

    /// Arms the watchdog, or disarms it for a zero timeout.
    ///
    /// # Errors
    /// If the timer could not be set.
    fn set_watchdog(&mut self, seconds: usize) -> Result<(), Status>;

    fn start_image(&mut self, image: Self::Image) -> StartOutcome;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Pass {
    /// Windows boot manager entries only, no legacy entries.
    Strict,
    /// Every active boot-category entry.
    Relaxed,
}

impl Pass {
    #[must_use]
    pub const fn only_windows(self) -> bool {
        matches!(self, Self::Strict)
    }
}

enum Attempt {
    Skipped,
    Failed,
    Booted,
    /// Legacy boot ends the pass either way.
    Legacy { success: bool },
}

/// Whether a device path text names a Windows loader.
#[must_use]
pub fn is_windows_loader_path(text: &str) -> bool {
    WINDOWS_LOADER_FILES
        .iter()
        .any(|file| ends_with_ignore_ascii_case(text, file))
}

/// Tries every option in order and stops at the first one that boots.
///
/// `current` is the option this loader was started from, if known; it is
/// never chained to. Each attempted option has its status recorded.
///
/// Returns `true` if an image started successfully, or the outcome of a
/// legacy boot, which ends the pass regardless.
pub fn try_in_order<F: BootFirmware>(
    firmware: &mut F,
    options: &mut [BootOption],
    current: Option<u16>,
    pass: Pass,
) -> bool {
    for option in options.iter_mut() {
        match attempt(firmware, option, current, pass) {
            Attempt::Skipped | Attempt::Failed => {}
            Attempt::Booted => return true,
            Attempt::Legacy { success } => return success,
        }
    }
    false
}

/// Runs the strict pass, then the relaxed pass if nothing booted.
pub fn boot_chain<F: BootFirmware>(
    firmware: &mut F,
    options: &mut [BootOption],
    current: Option<u16>,
) -> bool {
    for pass in [Pass::Strict, Pass::Relaxed] {
        info!("Trying {} boot options ({pass:?} pass)", options.len());
        if try_in_order(firmware, options, current, pass) {
            return true;
        }
    }
    false
}

fn attempt<F: BootFirmware>(
    firmware: &mut F,
    option: &mut BootOption,
    current: Option<u16>,
    pass: Pass,
) -> Attempt {
    if current == Some(option.id) {
        return Attempt::Skipped;
    }
    if !option.is_bootable() {
        debug!("Boot{:04X} is inactive or not a boot entry", option.id);
        return Attempt::Skipped;
    }

    let legacy = option.file_path.is_legacy();
    if legacy && pass.only_windows() {
        return Attempt::Skipped;
    }

    // Falls back to the option's own path when there is nothing to expand.
    let full_path = firmware
        .expand_full_path(&option.file_path)
        .map_or(Cow::Borrowed(&option.file_path), Cow::Owned);
    let path_text = firmware.device_path_text(&full_path);

    let windows = option.description.contains(WINDOWS_BOOT_MANAGER)
        || path_text.as_deref().is_some_and(is_windows_loader_path);
    if pass.only_windows() && !windows {
        debug!("Boot{:04X} ({}) does not look like Windows", option.id, option.description);
        return Attempt::Skipped;
    }

    if let Some(text) = &path_text {
        firmware.announce_boot(text, legacy);
    }

    if let Err(status) = firmware.set_boot_current(option.id) {
        warn!("Failed to set BootCurrent to {:04X}: {status:?}", option.id);
    }
    firmware.signal_ready_to_boot();

    if let Err(status) = firmware.connect_device_path(&option.file_path) {
        debug!("Connecting the path of Boot{:04X} failed: {status:?}", option.id);
    }

    if legacy {
        firmware.confirm_legacy_boot(option);
        let status = firmware.legacy_boot(option);
        option.status = Some(status);
        return Attempt::Legacy {
            success: !status.is_error(),
        };
    }

    let image = match firmware.load_image(&full_path) {
        Ok(image) => image,
        Err(LoadFailure { status, image }) => {
            warn!("LoadImage of Boot{:04X} failed: {status:?}", option.id);
            option.status = Some(status);
            // The image was rejected by policy rather than deferred; its handle stays valid.
            if status == Status::SECURITY_VIOLATION
                && let Some(image) = image
                && let Err(status) = firmware.unload_image(image)
            {
                warn!("UnloadImage failed: {status:?}");
            }
            return Attempt::Failed;
        }
    };

    if let Err(status) = firmware.prepare_image(&image, &option.optional_data) {
        warn!("Failed to set up the loaded image of Boot{:04X}: {status:?}", option.id);
        option.status = Some(status);
        if let Err(status) = firmware.unload_image(image) {
            warn!("UnloadImage failed: {status:?}");
        }
        return Attempt::Failed;
    }

    if let Err(status) = firmware.set_watchdog(BOOT_WATCHDOG_TIMEOUT_SECS) {
        warn!("Failed to arm the watchdog: {status:?}");
    }

    let outcome = firmware.start_image(image);
    option.status = Some(outcome.status);
    option.exit_data = outcome.exit_data;
    if outcome.status.is_error() {
        warn!("StartImage of Boot{:04X} failed: {:?}", option.id, outcome.status);
        return Attempt::Failed;
    }

    // Only reached if the image returns.
    if let Err(status) = firmware.set_watchdog(0) {
        warn!("Failed to disarm the watchdog: {status:?}");
    }
    if let Err(status) = firmware.clear_boot_current() {
        warn!("Failed to clear BootCurrent: {status:?}");
    }

    if outcome.status.is_success() {
        Attempt::Booted
    } else {
        Attempt::Failed
    }
}
