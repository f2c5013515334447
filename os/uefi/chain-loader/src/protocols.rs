//! Protocols that the `uefi` crate does not define.

use boot_chain::DevicePathBuf;
use boot_chain::config::RawDriverConfig;
use core::ffi::c_void;
use uefi::Status;
use uefi::proto::unsafe_protocol;

/// `EFI_LEGACY_BIOS_PROTOCOL`, as far as needed to boot a BBS entry.
#[repr(C)]
#[unsafe_protocol("db9a1e3d-45cb-4abb-853b-e5387fdb2e2d")]
pub struct LegacyBios {
    _int86: usize,
    _far_call86: usize,
    _check_pci_rom: usize,
    _install_pci_rom: usize,
    legacy_boot: unsafe extern "efiapi" fn(
        this: *mut Self,
        boot_option: *const u8,
        load_options_size: u32,
        load_options: *const c_void,
    ) -> Status,
    _update_keyboard_led_status: usize,
    _get_bbs_info: usize,
    _shadow_all_legacy_oproms: usize,
    _prepare_to_boot_efi: usize,
    _get_legacy_region: usize,
    _copy_legacy_region: usize,
    _boot_unconventional_device: usize,
}

impl LegacyBios {
    /// Boots the BBS device `path` describes. Only returns on failure.
    pub fn legacy_boot(&mut self, path: &DevicePathBuf, load_options: &[u8]) -> Status {
        let Ok(size) = u32::try_from(load_options.len()) else {
            return Status::INVALID_PARAMETER;
        };
        unsafe { (self.legacy_boot)(self, path.as_ptr(), size, load_options.as_ptr().cast()) }
    }
}

/// The patch driver's protocol. `Configure` takes no `This` pointer.
#[repr(C)]
#[unsafe_protocol("51e4785b-b1e4-4fda-af5f-942ec015f107")]
pub struct PatchDriver {
    configure: unsafe extern "efiapi" fn(config: *const RawDriverConfig) -> Status,
}

impl PatchDriver {
    pub fn configure(&self, config: &RawDriverConfig) -> Status {
        unsafe { (self.configure)(config) }
    }
}
