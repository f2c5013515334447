use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// CR0 as far as the loader cares: protection, write protection and paging.
///
/// The remaining control bits (FPU and cache control) are carried through
/// untouched, so a load, `with_wp(false)`, store sequence changes exactly one bit.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Cr0 {
    /// Bit 0 — PE: protected mode.
    pub pe: bool,

    /// Bits 1–15 — MP, EM, TS, ET, NE and reserved bits.
    #[bits(15)]
    _fpu_1_15: u16,

    /// Bit 16 — WP: supervisor writes honor read-only pages.
    pub wp: bool,

    /// Bits 17–28 — AM and reserved bits.
    #[bits(12)]
    _alignment_17_28: u16,

    /// Bit 29 — NW: not write-through.
    pub nw: bool,

    /// Bit 30 — CD: cache disable.
    pub cd: bool,

    /// Bit 31 — PG: paging.
    pub pg: bool,

    #[bits(32, default = 0)]
    _reserved_32_63: u32,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let cr0: u64;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_protect_is_bit_16() {
        assert_eq!(Cr0::new().with_wp(true).into_bits(), 1 << 16);
    }

    #[test]
    fn clearing_wp_keeps_every_other_bit() {
        // PE | MP | ET | NE | WP | AM | PG
        let cr0 = Cr0::from_bits(0x8005_0033);
        assert!(cr0.pe());
        assert!(cr0.wp());
        assert!(cr0.pg());
        assert!(!cr0.cd());
        assert_eq!(cr0.with_wp(false).into_bits(), 0x8004_0033);
    }
}
