//! # Function Boundary Resolution
//!
//! x64 PE images describe every non-leaf function in their exception
//! directory: an array of `RUNTIME_FUNCTION` entries sorted by begin address,
//! each covering a disjoint `[begin, end)` range of image-relative offsets.
//! A binary search over that array turns any address inside a function into
//! the function's entry point, which is the unit that is safe to patch.
//!
//! Functions split into chained fragments carry an indirect entry: bit 0 of
//! `UnwindData` is set and the remaining bits are the RVA of the primary
//! entry that owns the real begin address.

use crate::pe::{self, DataDirectory};
use core::ptr::read_unaligned;
use log::warn;
use uefi::Status;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnwindError {
    #[error("the image has no exception directory")]
    NoExceptionData,
    #[error("the exception directory lies outside the image")]
    DirectoryOutOfBounds,
}

impl From<UnwindError> for Status {
    fn from(value: UnwindError) -> Self {
        match value {
            UnwindError::NoExceptionData => Self::NOT_FOUND,
            UnwindError::DirectoryOutOfBounds => Self::LOAD_ERROR,
        }
    }
}

/// An `IMAGE_RUNTIME_FUNCTION_ENTRY`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RuntimeFunction {
    pub begin_address: u32,
    pub end_address: u32,
    pub unwind_data: u32,
}

impl RuntimeFunction {
    /// `UnwindData` flag marking a chained entry.
    pub const INDIRECT: u32 = 0x1;

    #[must_use]
    pub const fn is_indirect(&self) -> bool {
        self.unwind_data & Self::INDIRECT != 0
    }

    /// RVA of the primary entry an indirect entry points to.
    #[must_use]
    pub const fn primary_entry_rva(&self) -> u32 {
        self.unwind_data & !Self::INDIRECT
    }

    #[must_use]
    pub const fn contains(&self, rva: u32) -> bool {
        self.begin_address <= rva && rva < self.end_address
    }
}

/// The exception directory of a mapped image.
#[derive(Debug, Copy, Clone)]
pub struct FunctionTable<'a> {
    image: &'a [u8],
    table_offset: usize,
    len: usize,
}

impl<'a> FunctionTable<'a> {
    /// Wraps the table described by `directory` inside `image`.
    ///
    /// # Errors
    /// * [`UnwindError::NoExceptionData`] if the directory is empty.
    /// * [`UnwindError::DirectoryOutOfBounds`] if it does not fit the image.
    pub fn new(image: &'a [u8], directory: DataDirectory) -> Result<Self, UnwindError> {
        let len = directory.size as usize / size_of::<RuntimeFunction>();
        if len == 0 {
            return Err(UnwindError::NoExceptionData);
        }

        let table_offset = directory.virtual_address as usize;
        let end = table_offset
            .checked_add(len * size_of::<RuntimeFunction>())
            .ok_or(UnwindError::DirectoryOutOfBounds)?;
        if end > image.len() {
            return Err(UnwindError::DirectoryOutOfBounds);
        }

        Ok(Self {
            image,
            table_offset,
            len,
        })
    }

    /// Locates the exception directory through the image's PE headers.
    ///
    /// # Errors
    /// See [`FunctionTable::new`].
    pub fn from_image(image: &'a [u8]) -> Result<Self, UnwindError> {
        let directory = pe::exception_directory(image).ok_or(UnwindError::NoExceptionData)?;
        Self::new(image, directory)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns entry `index` of the table.
    ///
    /// # Panics
    /// If `index` is out of range.
    #[must_use]
    pub fn entry(&self, index: usize) -> RuntimeFunction {
        assert!(index < self.len, "function table index {index} out of range");
        let offset = self.table_offset + index * size_of::<RuntimeFunction>();
        // SAFETY: the whole table was bounds checked in `new`.
        unsafe { read_unaligned(self.image.as_ptr().add(offset).cast()) }
    }

    /// Reads an entry addressed by RVA, as indirect entries do.
    fn entry_at_rva(&self, rva: u32) -> Option<RuntimeFunction> {
        let offset = rva as usize;
        let end = offset.checked_add(size_of::<RuntimeFunction>())?;
        if end > self.image.len() {
            return None;
        }
        // SAFETY: bounds checked above.
        Some(unsafe { read_unaligned(self.image.as_ptr().add(offset).cast()) })
    }

    /// Binary search for the entry whose range covers `rva`.
    #[must_use]
    pub fn lookup(&self, rva: u32) -> Option<RuntimeFunction> {
        let mut low = 0;
        let mut high = self.len;
        while low < high {
            let middle = low + (high - low) / 2;
            let entry = self.entry(middle);
            if rva < entry.begin_address {
                high = middle;
            } else if rva >= entry.end_address {
                low = middle + 1;
            } else {
                return Some(entry);
            }
        }
        None
    }

    /// Returns the RVA of the start of the function containing `rva`.
    ///
    /// Follows at most one indirection; a primary entry that is itself
    /// indirect means the table is corrupt and nothing is returned.
    #[must_use]
    pub fn function_start(&self, rva: u32) -> Option<u32> {
        let entry = self.lookup(rva)?;
        if !entry.is_indirect() {
            return Some(entry.begin_address);
        }

        let Some(primary) = self.entry_at_rva(entry.primary_entry_rva()) else {
            warn!(
                "Indirect function entry {:#x} points outside the image ({:#x})",
                entry.begin_address,
                entry.primary_entry_rva()
            );
            return None;
        };
        if primary.is_indirect() {
            warn!(
                "Function entry {:#x} chains through more than one indirection",
                entry.begin_address
            );
            return None;
        }
        Some(primary.begin_address)
    }
}

/// Returns the start address of the function containing `address`.
///
/// `image` is the mapped image, starting at its base. A null `address`
/// yields `None`, so the result of a failed signature scan can be passed in
/// directly. Images without exception data yield `None` as well.
#[must_use]
pub fn backtrack_to_function_start(image: &[u8], address: *const u8) -> Option<*const u8> {
    if address.is_null() {
        return None;
    }

    let base = image.as_ptr();
    let rva = (address as usize).checked_sub(base as usize)?;
    if rva >= image.len() {
        warn!("Address {address:p} is outside the image at {base:p}");
        return None;
    }

    let table = FunctionTable::from_image(image).ok()?;
    let start = table.function_start(u32::try_from(rva).ok()?)?;
    Some(base.wrapping_add(start as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::tests::synthetic_image;

    const TABLE_RVA: u32 = 0x400;
    const IMAGE_SIZE: usize = 0x4000;

    fn image_with(entries: &[RuntimeFunction]) -> Vec<u8> {
        let directory = DataDirectory {
            virtual_address: TABLE_RVA,
            size: u32::try_from(entries.len() * size_of::<RuntimeFunction>()).unwrap(),
        };
        let mut image = synthetic_image(IMAGE_SIZE, directory, 16);
        for (i, entry) in entries.iter().enumerate() {
            write_entry(&mut image, TABLE_RVA as usize + i * 12, *entry);
        }
        image
    }

    fn write_entry(image: &mut [u8], offset: usize, entry: RuntimeFunction) {
        image[offset..offset + 4].copy_from_slice(&entry.begin_address.to_le_bytes());
        image[offset + 4..offset + 8].copy_from_slice(&entry.end_address.to_le_bytes());
        image[offset + 8..offset + 12].copy_from_slice(&entry.unwind_data.to_le_bytes());
    }

    fn function(begin: u32, end: u32) -> RuntimeFunction {
        RuntimeFunction {
            begin_address: begin,
            end_address: end,
            unwind_data: 0x3000,
        }
    }

    fn ranges() -> Vec<RuntimeFunction> {
        (0..9u32)
            .map(|i| function(0x1000 + i * 0x100, 0x1000 + i * 0x100 + 0x80))
            .collect()
    }

    #[test]
    fn every_inner_address_resolves_to_its_range_start() {
        let entries = ranges();
        let image = image_with(&entries);
        let table = FunctionTable::from_image(&image).expect("table");
        assert_eq!(table.len(), entries.len());

        for entry in &entries {
            for rva in entry.begin_address..entry.end_address {
                assert_eq!(table.function_start(rva), Some(entry.begin_address));
            }
        }
    }

    #[test]
    fn addresses_between_ranges_are_not_found() {
        let entries = ranges();
        let image = image_with(&entries);
        let table = FunctionTable::from_image(&image).expect("table");

        assert_eq!(table.function_start(0), None);
        assert_eq!(table.function_start(0x0FFF), None);
        for entry in &entries {
            assert_eq!(table.function_start(entry.end_address), None);
            assert_eq!(table.function_start(entry.end_address + 0x7F), None);
        }
    }

    #[test]
    fn indirect_entry_resolves_to_primary_entry() {
        let mut entries = ranges();
        // Entry 6 is a fragment of the function described by entry 2.
        let primary_rva = TABLE_RVA + 2 * 12;
        entries[6].unwind_data = primary_rva | RuntimeFunction::INDIRECT;
        let image = image_with(&entries);
        let table = FunctionTable::from_image(&image).expect("table");

        assert_eq!(table.function_start(entries[6].begin_address + 0x10), Some(0x1200));
    }

    #[test]
    fn double_indirection_is_rejected() {
        let mut entries = ranges();
        entries[2].unwind_data = (TABLE_RVA + 3 * 12) | RuntimeFunction::INDIRECT;
        entries[6].unwind_data = (TABLE_RVA + 2 * 12) | RuntimeFunction::INDIRECT;
        let image = image_with(&entries);
        let table = FunctionTable::from_image(&image).expect("table");

        assert_eq!(table.function_start(entries[6].begin_address), None);
    }

    #[test]
    fn indirection_outside_the_image_is_rejected() {
        let mut entries = ranges();
        entries[0].unwind_data = 0xFFFF_FFF0 | RuntimeFunction::INDIRECT;
        let image = image_with(&entries);
        let table = FunctionTable::from_image(&image).expect("table");

        assert_eq!(table.function_start(entries[0].begin_address), None);
    }

    #[test]
    fn backtrack_works_on_absolute_addresses() {
        let image = image_with(&ranges());
        let inside = image.as_ptr().wrapping_add(0x1345);
        assert_eq!(
            backtrack_to_function_start(&image, inside),
            Some(image.as_ptr().wrapping_add(0x1300))
        );
    }

    #[test]
    fn backtrack_of_null_is_none() {
        let image = image_with(&ranges());
        assert_eq!(backtrack_to_function_start(&image, core::ptr::null()), None);
    }

    #[test]
    fn image_without_exception_directory_is_not_found() {
        let image = synthetic_image(IMAGE_SIZE, DataDirectory::default(), 16);
        assert_eq!(
            FunctionTable::from_image(&image).err(),
            Some(UnwindError::NoExceptionData)
        );
        let inside = image.as_ptr().wrapping_add(0x1010);
        assert_eq!(backtrack_to_function_start(&image, inside), None);
    }

    #[test]
    fn directory_past_the_image_end_is_rejected() {
        let directory = DataDirectory {
            virtual_address: 0x3FF0,
            size: 0x30,
        };
        let image = synthetic_image(IMAGE_SIZE, directory, 16);
        assert_eq!(
            FunctionTable::from_image(&image).err(),
            Some(UnwindError::DirectoryOutOfBounds)
        );
    }
}
