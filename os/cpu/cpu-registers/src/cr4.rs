use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// CR4, reduced to the paging-related bits.
///
/// Everything else is kept opaque; the loader only ever reads this register.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Cr4 {
    #[bits(4, default = 0)]
    _reserved_0_3: u8,

    /// Bit 4 — PSE: 4 MiB pages in 32-bit paging.
    pub pse: bool,

    /// Bit 5 — PAE: Physical Address Extension. Required for long mode.
    pub pae: bool,

    #[bits(default = false)]
    _reserved_6: bool,

    /// Bit 7 — PGE: global pages.
    pub pge: bool,

    #[bits(4, default = 0)]
    _reserved_8_11: u8,

    /// Bit 12 — LA57: 57-bit linear addresses (5-level paging).
    pub la57: bool,

    #[bits(4, default = 0)]
    _reserved_13_16: u8,

    /// Bit 17 — PCIDE: process-context identifiers.
    pub pcide: bool,

    #[bits(2, default = 0)]
    _reserved_18_19: u8,

    /// Bit 20 — SMEP: supervisor mode execution prevention.
    pub smep: bool,

    /// Bit 21 — SMAP: supervisor mode access prevention.
    pub smap: bool,

    #[bits(42, default = 0)]
    _reserved_22_63: u64,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let cr4: u64;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}
