//! # Firmware Adapter
//!
//! Boot services as the boot chain selector sees them.
//!
//! `LoadImage` and `StartImage` are called through the raw boot services
//! table: the safe wrappers drop the image handle the firmware returns along
//! with `EFI_SECURITY_VIOLATION`, and do not hand out `StartImage` exit data.

use crate::config::{READY_TO_BOOT_EVENT_GROUP, REMOVABLE_MEDIA_LOADER, WATCHDOG_CODE};
use crate::console::wait_for_key;
use crate::file_system::volume_has_file;
use crate::protocols::LegacyBios;
use alloc::string::String;
use alloc::vec::Vec;
use boot_chain::selector::{BootFirmware, LoadFailure, StartOutcome};
use boot_chain::{BootOption, DevicePathBuf, raw_load_options};
use core::ffi::c_void;
use core::ptr::{self, NonNull};
use log::{debug, info, trace, warn};
use uefi::boot::{self, EventType, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol, SearchType, Tpl};
use uefi::proto::device_path::text::{AllowShortcuts, DisplayOnly};
use uefi::proto::device_path::DevicePath;
use uefi::proto::loaded_image::LoadedImage;
use uefi::proto::media::fs::SimpleFileSystem;
use uefi::proto::ProtocolPointer;
use uefi::runtime::{self, VariableAttributes, VariableVendor};
use uefi::{CString16, Event, Handle, Identify, Status, cstr16};
use uefi_raw::protocol::loaded_image::LoadedImageProtocol;
use uefi_raw::table::boot::BootServices;

/// Views an owned device path as the firmware type.
fn as_device_path(path: &DevicePathBuf) -> &DevicePath {
    // SAFETY: `DevicePathBuf` is always terminated by an end-entire node.
    unsafe { DevicePath::from_ffi_ptr(path.as_ptr().cast()) }
}

/// Opens `P` on `handle` without claiming it.
pub(crate) fn get_protocol<P: ProtocolPointer + ?Sized>(handle: Handle) -> uefi::Result<ScopedProtocol<P>> {
    let params = OpenProtocolParams {
        handle,
        agent: boot::image_handle(),
        controller: None,
    };
    unsafe { boot::open_protocol::<P>(params, OpenProtocolAttributes::GetProtocol) }
}

#[must_use]
pub fn device_path_text(path: &DevicePathBuf) -> Option<String> {
    as_device_path(path)
        .to_string(DisplayOnly(false), AllowShortcuts(false))
        .ok()
        .map(|text| String::from(&*text))
}

/// Copies the device path installed on `handle`.
#[must_use]
pub fn device_path_of(handle: Handle) -> Option<DevicePathBuf> {
    let path = get_protocol::<DevicePath>(handle).ok()?;
    unsafe { DevicePathBuf::from_raw(path.as_ffi_ptr().cast()) }.ok()
}

/// Connects every driver to every controller, recursively.
pub fn connect_all() {
    let Ok(handles) = boot::locate_handle_buffer(SearchType::AllHandles) else {
        warn!("Failed to enumerate handles");
        return;
    };
    // Most handles are not controllers, so failures are expected.
    let failed = handles
        .iter()
        .filter(|&&handle| boot::connect_controller(handle, None, None, true).is_err())
        .count();
    trace!("Connecting controllers: {failed} of {} handles failed", handles.len());
}

fn boot_services() -> Result<NonNull<BootServices>, Status> {
    let system_table = uefi::table::system_table_raw().ok_or(Status::NOT_READY)?;
    NonNull::new(unsafe { system_table.as_ref() }.boot_services).ok_or(Status::NOT_READY)
}

/// `LoadImage` from a device path.
///
/// # Errors
/// The load status, with the image handle if the firmware created one.
pub fn load_image(boot_policy: bool, path: &DevicePathBuf) -> Result<Handle, LoadFailure<Handle>> {
    let services = boot_services().map_err(|status| LoadFailure { status, image: None })?;

    let mut raw_handle: uefi_raw::Handle = ptr::null_mut();
    let status = unsafe {
        (services.as_ref().load_image)(
            boot_policy.into(),
            boot::image_handle().as_ptr(),
            path.as_ptr().cast(),
            ptr::null(),
            0,
            &raw mut raw_handle,
        )
    };
    let image = unsafe { Handle::from_ptr(raw_handle) };

    match image {
        Some(image) if !status.is_error() => Ok(image),
        _ => Err(LoadFailure {
            status: if status.is_error() { status } else { Status::LOAD_ERROR },
            image,
        }),
    }
}

/// `StartImage`, collecting whatever exit data the image returns.
pub fn start_image(image: Handle) -> StartOutcome {
    let services = match boot_services() {
        Ok(services) => services,
        Err(status) => {
            return StartOutcome {
                status,
                exit_data: None,
            };
        }
    };

    let mut exit_data_size = 0usize;
    let mut exit_data: *mut uefi_raw::Char16 = ptr::null_mut();
    let status = unsafe {
        (services.as_ref().start_image)(image.as_ptr(), &raw mut exit_data_size, &raw mut exit_data)
    };

    let exit_data = NonNull::new(exit_data).map(|data| {
        let units = exit_data_size / size_of::<u16>();
        let copy = unsafe { core::slice::from_raw_parts(data.as_ptr().cast::<u16>(), units) }.to_vec();
        // The caller owns exit data.
        let _ = unsafe { boot::free_pool(data.cast()) };
        copy
    });

    StartOutcome { status, exit_data }
}

fn log_loaded_image(loaded: &LoadedImage) {
    let (base, size) = loaded.info();
    let path = loaded
        .file_path()
        .and_then(|path| path.to_string(DisplayOnly(false), AllowShortcuts(false)).ok())
        .map(|text| String::from(&*text));
    match path {
        Some(path) => info!("Loaded image {path} at {base:p}, {size:#x} bytes"),
        None => info!("Loaded image at {base:p}, {size:#x} bytes"),
    }
}

unsafe extern "efiapi" fn ready_to_boot_notify(_event: Event, _context: Option<NonNull<c_void>>) {}

/// The live firmware.
pub struct UefiFirmware;

impl UefiFirmware {
    /// Prefixes a path starting at a partition with the full path of the
    /// partition that carries the same hard drive node.
    fn expand_partition_path(path: &DevicePathBuf) -> Option<DevicePathBuf> {
        let partition = path.first_node()?;
        let handles = boot::locate_handle_buffer(SearchType::ByProtocol(&SimpleFileSystem::GUID)).ok()?;

        handles.iter().find_map(|&handle| {
            let volume = device_path_of(handle)?;
            let matches = volume.last_node().is_some_and(|node| node.bytes == partition.bytes);
            matches.then(|| volume.join(&path.without_first_node()))
        })
    }

    /// Appends the removable media loader to a path naming only a device.
    fn expand_removable_media_path(path: &DevicePathBuf) -> Option<DevicePathBuf> {
        let mut remaining = as_device_path(path);
        let handle = boot::locate_device_path::<SimpleFileSystem>(&mut remaining).ok()?;

        let loader = CString16::try_from(REMOVABLE_MEDIA_LOADER).ok()?;
        if !volume_has_file(handle, &loader) {
            return None;
        }
        Some(device_path_of(handle)?.join_file_path(REMOVABLE_MEDIA_LOADER))
    }
}

impl BootFirmware for UefiFirmware {
    type Image = Handle;

    fn expand_full_path(&mut self, path: &DevicePathBuf) -> Option<DevicePathBuf> {
        if path.starts_with_hard_drive() {
            Self::expand_partition_path(path)
        } else if !path.has_file_path() && !path.is_legacy() && !path.is_end() {
            Self::expand_removable_media_path(path)
        } else {
            None
        }
    }

    fn device_path_text(&mut self, path: &DevicePathBuf) -> Option<String> {
        device_path_text(path)
    }

    fn set_boot_current(&mut self, id: u16) -> Result<(), Status> {
        runtime::set_variable(
            cstr16!("BootCurrent"),
            &VariableVendor::GLOBAL_VARIABLE,
            VariableAttributes::BOOTSERVICE_ACCESS | VariableAttributes::RUNTIME_ACCESS,
            &id.to_le_bytes(),
        )
        .map_err(|e| e.status())
    }

    fn clear_boot_current(&mut self) -> Result<(), Status> {
        runtime::delete_variable(cstr16!("BootCurrent"), &VariableVendor::GLOBAL_VARIABLE)
            .map_err(|e| e.status())
    }

    fn signal_ready_to_boot(&mut self) {
        let mut group = READY_TO_BOOT_EVENT_GROUP;
        let event = unsafe {
            boot::create_event_ex(
                EventType::NOTIFY_SIGNAL,
                Tpl::CALLBACK,
                Some(ready_to_boot_notify),
                None,
                Some(NonNull::from(&mut group)),
            )
        };
        match event {
            Ok(event) => {
                if let Err(e) = boot::signal_event(&event) {
                    warn!("Failed to signal ReadyToBoot: {:?}", e.status());
                }
                let _ = boot::close_event(event);
            }
            Err(e) => warn!("Failed to create the ReadyToBoot event: {:?}", e.status()),
        }
    }

    fn connect_device_path(&mut self, path: &DevicePathBuf) -> Result<(), Status> {
        let full = as_device_path(path);
        let mut previous_remaining = usize::MAX;
        loop {
            let mut remaining = full;
            let handle = boot::locate_device_path::<DevicePath>(&mut remaining).map_err(|e| e.status())?;

            let remaining_nodes = remaining.node_iter().count();
            if remaining_nodes == 0 {
                return Ok(());
            }
            // No driver produced a deeper handle last round.
            if remaining_nodes >= previous_remaining {
                return Err(Status::NOT_FOUND);
            }
            previous_remaining = remaining_nodes;

            boot::connect_controller(handle, None, Some(remaining), false).map_err(|e| e.status())?;
        }
    }

    fn announce_boot(&mut self, path_text: &str, legacy: bool) {
        uefi::println!("Booting {}device path {path_text}...", if legacy { "legacy " } else { "" });
    }

    fn confirm_legacy_boot(&mut self, _option: &BootOption) {
        uefi::println!(
            "\nNOTE: Legacy (non-UEFI) Windows installations are not patched.\n\
             The legacy OS will be booted, but without the driver.\n\
             Press any key to acknowledge..."
        );
        wait_for_key();
    }

    fn legacy_boot(&mut self, option: &BootOption) -> Status {
        let bios = boot::get_handle_for_protocol::<LegacyBios>().and_then(get_protocol::<LegacyBios>);
        match bios {
            Ok(mut bios) => bios.legacy_boot(&option.file_path, &option.optional_data),
            Err(e) => {
                warn!("Legacy BIOS protocol not available: {:?}", e.status());
                e.status()
            }
        }
    }

    fn load_image(&mut self, path: &DevicePathBuf) -> Result<Handle, LoadFailure<Handle>> {
        load_image(true, path)
    }

    fn unload_image(&mut self, image: Handle) -> Result<(), Status> {
        boot::unload_image(image).map_err(|e| e.status())
    }

    fn prepare_image(&mut self, image: &Handle, load_options: &[u8]) -> Result<(), Status> {
        let mut loaded = get_protocol::<LoadedImage>(*image).map_err(|e| e.status())?;
        let (options, size) = raw_load_options(load_options).ok_or(Status::INVALID_PARAMETER)?;
        unsafe { loaded.set_load_options(options, size) };

        // The image was loaded by the boot manager, not by us.
        let raw = ptr::from_mut::<LoadedImage>(&mut *loaded).cast::<LoadedImageProtocol>();
        unsafe { (*raw).parent_handle = ptr::null_mut() };

        log_loaded_image(&loaded);
        Ok(())
    }

    fn set_watchdog(&mut self, seconds: usize) -> Result<(), Status> {
        debug!("Setting the watchdog to {seconds} s");
        boot::set_watchdog_timer(seconds, WATCHDOG_CODE, None).map_err(|e| e.status())
    }

    fn start_image(&mut self, image: Handle) -> StartOutcome {
        start_image(image)
    }
}

/// Collects the exit data of an image as text, for diagnostics.
#[must_use]
pub fn exit_data_text(exit_data: &[u16]) -> String {
    let text: Vec<u16> = exit_data.iter().copied().take_while(|&c| c != 0).collect();
    String::from_utf16_lossy(&text)
}
