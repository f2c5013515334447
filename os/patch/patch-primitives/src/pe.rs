//! # PE Header Lookup
//!
//! Just enough of the PE/COFF format to find a data directory of an image
//! that the firmware already mapped: DOS header → `e_lfanew` → NT headers →
//! optional header → data directory array. Sections, relocations and
//! everything else are out of scope.

use core::ptr::read_unaligned;

const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const OPTIONAL_HDR32_MAGIC: u16 = 0x10B;
const OPTIONAL_HDR64_MAGIC: u16 = 0x20B;

const E_LFANEW_OFFSET: usize = 0x3C;
const FILE_HEADER_SIZE: usize = 20;
const SIZE_OF_IMAGE_OFFSET: usize = 56;

/// Index of the exception (`.pdata`) directory.
pub const IMAGE_DIRECTORY_ENTRY_EXCEPTION: usize = 3;

/// An `IMAGE_DATA_DIRECTORY` entry: an RVA and a size in bytes.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

/// The fields of the NT headers this crate cares about.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NtHeaders {
    pub is_64bit: bool,
    pub size_of_image: u32,
    pub number_of_rva_and_sizes: u32,
    directories_offset: usize,
}

fn read<T: Copy>(bytes: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(size_of::<T>())?;
    if end > bytes.len() {
        return None;
    }
    // SAFETY: bounds checked above; PE fields carry no alignment guarantee.
    Some(unsafe { read_unaligned(bytes.as_ptr().add(offset).cast::<T>()) })
}

impl NtHeaders {
    /// Parses the DOS and NT headers at the start of a mapped image.
    #[must_use]
    pub fn parse(image: &[u8]) -> Option<Self> {
        if read::<u16>(image, 0)? != IMAGE_DOS_SIGNATURE {
            return None;
        }

        let nt = read::<u32>(image, E_LFANEW_OFFSET)? as usize;
        if read::<u32>(image, nt)? != IMAGE_NT_SIGNATURE {
            return None;
        }

        let optional = nt.checked_add(4 + FILE_HEADER_SIZE)?;
        let (is_64bit, count_offset) = match read::<u16>(image, optional)? {
            OPTIONAL_HDR32_MAGIC => (false, 92),
            OPTIONAL_HDR64_MAGIC => (true, 108),
            _ => return None,
        };

        Some(Self {
            is_64bit,
            size_of_image: read(image, optional + SIZE_OF_IMAGE_OFFSET)?,
            number_of_rva_and_sizes: read(image, optional + count_offset)?,
            directories_offset: optional + count_offset + 4,
        })
    }

    /// Returns the data directory at `index`, if the image declares it.
    #[must_use]
    pub fn data_directory(&self, image: &[u8], index: usize) -> Option<DataDirectory> {
        if index >= self.number_of_rva_and_sizes as usize {
            return None;
        }
        read(image, self.directories_offset + index * size_of::<DataDirectory>())
    }
}

/// Returns the exception directory of a mapped image, or `None` when the
/// image has none or it is empty. 32-bit images normally carry none.
#[must_use]
pub fn exception_directory(image: &[u8]) -> Option<DataDirectory> {
    NtHeaders::parse(image)?
        .data_directory(image, IMAGE_DIRECTORY_ENTRY_EXCEPTION)
        .filter(|dir| dir.size != 0)
}

/// Views a mapped image as a byte slice spanning `SizeOfImage`.
///
/// # Safety
/// `base` must point to the start of an image mapped by the firmware loader,
/// readable for at least its headers and for `SizeOfImage` bytes, and must
/// stay mapped for `'a`.
#[must_use]
pub unsafe fn mapped_image<'a>(base: *const u8) -> Option<&'a [u8]> {
    if base.is_null() {
        return None;
    }

    // Headers first, then the full extent they declare.
    let dos = unsafe { core::slice::from_raw_parts(base, E_LFANEW_OFFSET + 4) };
    let nt = read::<u32>(dos, E_LFANEW_OFFSET)? as usize;
    // Up to and including `NumberOfRvaAndSizes` of a PE32+ optional header.
    let headers_len = nt + 4 + FILE_HEADER_SIZE + 112;
    let headers = unsafe { core::slice::from_raw_parts(base, headers_len) };
    let size = NtHeaders::parse(headers)?.size_of_image as usize;
    Some(unsafe { core::slice::from_raw_parts(base, size) })
}
