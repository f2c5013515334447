//! # Boot Options
//!
//! Decoding of the `Boot####` variables the firmware persists for each boot
//! target, in `EFI_LOAD_OPTION` layout:
//!
//! ```text
//! u32   Attributes
//! u16   FilePathListLength
//! u16[] Description (NUL terminated)
//! u8[]  FilePathList (FilePathListLength bytes)
//! u8[]  OptionalData (rest of the variable)
//! ```

use crate::device_path::{DevicePathBuf, DevicePathError};
use alloc::string::String;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use uefi::Status;

/// `EFI_LOAD_OPTION.Attributes`.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct LoadOptionAttributes {
    /// Bit 0 — `LOAD_OPTION_ACTIVE`.
    pub active: bool,

    /// Bit 1 — `LOAD_OPTION_FORCE_RECONNECT`.
    pub force_reconnect: bool,

    /// Bit 2 — Reserved.
    #[bits(default = false)]
    _reserved_2: bool,

    /// Bit 3 — `LOAD_OPTION_HIDDEN`.
    pub hidden: bool,

    /// Bits 4–7 — Reserved.
    #[bits(4, default = 0)]
    _reserved_4_7: u8,

    /// Bits 8–12 — `LOAD_OPTION_CATEGORY`.
    #[bits(5)]
    pub category: u8,

    /// Bits 13–31 — Reserved.
    #[bits(19, default = 0)]
    _reserved_13_31: u32,
}

impl LoadOptionAttributes {
    pub const CATEGORY_BOOT: u8 = 0x00;
    pub const CATEGORY_APP: u8 = 0x01;

    /// Boot-category options are candidates for automatic booting;
    /// application-category ones (setup utilities, shells) are not.
    #[must_use]
    pub const fn is_boot_category(&self) -> bool {
        self.category() == Self::CATEGORY_BOOT
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadOptionError {
    #[error("load option is truncated")]
    Truncated,
    #[error("load option description is not terminated")]
    UnterminatedDescription,
    #[error("load option file path is invalid: {0}")]
    InvalidFilePath(#[from] DevicePathError),
}

impl From<LoadOptionError> for Status {
    fn from(_: LoadOptionError) -> Self {
        Self::LOAD_ERROR
    }
}

/// One boot target, plus the outcome of trying to boot it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOption {
    /// The `####` of `Boot####`.
    pub id: u16,
    pub attributes: LoadOptionAttributes,
    pub description: String,
    pub file_path: DevicePathBuf,
    /// Passed to the image as its load options.
    pub optional_data: Vec<u8>,
    /// Status of the last boot attempt, if any.
    pub status: Option<Status>,
    /// Exit data returned by the image, if it returned any.
    pub exit_data: Option<Vec<u16>>,
}

impl BootOption {
    #[must_use]
    pub const fn new(
        id: u16,
        attributes: LoadOptionAttributes,
        description: String,
        file_path: DevicePathBuf,
        optional_data: Vec<u8>,
    ) -> Self {
        Self {
            id,
            attributes,
            description,
            file_path,
            optional_data,
            status: None,
            exit_data: None,
        }
    }

    /// Decodes the contents of a `Boot####` variable.
    ///
    /// # Errors
    /// If the record is truncated or its file path list is not a valid device path.
    pub fn parse(id: u16, bytes: &[u8]) -> Result<Self, LoadOptionError> {
        let header = bytes.get(..6).ok_or(LoadOptionError::Truncated)?;
        let attributes =
            LoadOptionAttributes::from_bits(u32::from_le_bytes([header[0], header[1], header[2], header[3]]));
        let path_len = usize::from(u16::from_le_bytes([header[4], header[5]]));

        let rest = &bytes[6..];
        let description_units = rest
            .chunks_exact(2)
            .position(|c| c == [0, 0])
            .ok_or(LoadOptionError::UnterminatedDescription)?;
        let description = char::decode_utf16(
            rest.chunks_exact(2)
                .take(description_units)
                .map(|c| u16::from_le_bytes([c[0], c[1]])),
        )
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();

        let path_start = 6 + (description_units + 1) * 2;
        let path_end = path_start.checked_add(path_len).ok_or(LoadOptionError::Truncated)?;
        let path_bytes = bytes.get(path_start..path_end).ok_or(LoadOptionError::Truncated)?;
        let file_path = DevicePathBuf::from_bytes(path_bytes)?;

        Ok(Self::new(
            id,
            attributes,
            description,
            file_path,
            bytes[path_end..].to_vec(),
        ))
    }

    /// Option is active and of the boot category.
    #[must_use]
    pub const fn is_bootable(&self) -> bool {
        self.attributes.active() && self.attributes.is_boot_category()
    }
}

/// Decodes the `BootOrder` variable into option numbers.
#[must_use]
pub fn parse_boot_order(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Pointer and size to install as a loaded image's `LoadOptions`.
///
/// An empty blob is passed as a null pointer with size zero, as the firmware
/// boot manager does. `None` if the blob is too large for the `u32` size field.
#[must_use]
pub fn raw_load_options(data: &[u8]) -> Option<(*const u8, u32)> {
    if data.is_empty() {
        return Some((core::ptr::null(), 0));
    }
    let size = u32::try_from(data.len()).ok()?;
    Some((data.as_ptr(), size))
}

/// Name of the variable holding option `id`, e.g. `Boot0003`.
#[must_use]
pub fn variable_name(id: u16) -> String {
    alloc::format!("Boot{id:04X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(attributes: u32, description: &str, path: &DevicePathBuf, data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&attributes.to_le_bytes());
        bytes.extend_from_slice(&u16::try_from(path.as_bytes().len()).unwrap().to_le_bytes());
        for unit in description.encode_utf16().chain([0]) {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(path.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn parses_windows_boot_manager_option() {
        let path = DevicePathBuf::file_path("\\EFI\\Microsoft\\Boot\\bootmgfw.efi");
        let bytes = encode(0x1, "Windows Boot Manager", &path, b"WINDOWS\0\x01");
        let option = BootOption::parse(0x0002, &bytes).expect("valid option");

        assert_eq!(option.id, 2);
        assert!(option.attributes.active());
        assert!(option.attributes.is_boot_category());
        assert!(option.is_bootable());
        assert_eq!(option.description, "Windows Boot Manager");
        assert_eq!(option.file_path, path);
        assert_eq!(option.optional_data, b"WINDOWS\0\x01");
        assert_eq!(option.status, None);
    }

    #[test]
    fn app_category_and_inactive_options_are_not_bootable() {
        let path = DevicePathBuf::file_path("\\setup.efi");
        let app = BootOption::parse(1, &encode(0x101, "Setup", &path, &[])).expect("valid");
        assert!(app.attributes.active());
        assert_eq!(app.attributes.category(), LoadOptionAttributes::CATEGORY_APP);
        assert!(!app.is_bootable());

        let inactive = BootOption::parse(1, &encode(0x0, "Off", &path, &[])).expect("valid");
        assert!(!inactive.is_bootable());
    }

    #[test]
    fn hidden_attribute_is_decoded() {
        let attributes = LoadOptionAttributes::from_bits(0x9);
        assert!(attributes.active());
        assert!(attributes.hidden());
        assert!(!attributes.force_reconnect());
    }

    #[test]
    fn truncated_options_are_rejected() {
        let path = DevicePathBuf::file_path("\\a.efi");
        let bytes = encode(0x1, "A", &path, &[]);
        assert_eq!(BootOption::parse(1, &bytes[..4]), Err(LoadOptionError::Truncated));
        assert_eq!(
            BootOption::parse(1, &bytes[..9]),
            Err(LoadOptionError::UnterminatedDescription)
        );
        assert_eq!(
            BootOption::parse(1, &bytes[..bytes.len() - 1]),
            Err(LoadOptionError::Truncated)
        );
    }

    #[test]
    fn empty_load_options_are_passed_as_null() {
        assert_eq!(raw_load_options(&[]), Some((core::ptr::null(), 0)));

        let data = b"WINDOWS\0";
        assert_eq!(raw_load_options(data), Some((data.as_ptr(), 8)));
    }

    #[test]
    fn boot_order_and_names() {
        assert_eq!(parse_boot_order(&[0x02, 0x00, 0x01, 0x00, 0x0A, 0x00, 0xFF]), [2, 1, 10]);
        assert_eq!(variable_name(0x1F), "Boot001F");
    }
}
