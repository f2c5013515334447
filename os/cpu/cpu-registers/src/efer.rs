use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// `IA32_EFER`, read to tell long mode from legacy paging.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Efer {
    /// Bit 0 — SCE: `SYSCALL`/`SYSRET` enabled.
    pub sce: bool,

    #[bits(7, default = 0)]
    _reserved_1_7: u8,

    /// Bit 8 — LME: Long Mode Enable.
    pub lme: bool,

    #[bits(default = false)]
    _reserved_9: bool,

    /// Bit 10 — LMA: Long Mode Active. Set by the CPU once paging is on with LME.
    pub lma: bool,

    /// Bit 11 — NXE: No-Execute Enable.
    pub nxe: bool,

    #[bits(52, default = 0)]
    _reserved_12_63: u64,
}

impl Efer {
    pub const MSR: u32 = 0xC000_0080;
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Efer {
    unsafe fn load_unsafe() -> Self {
        let (lo, hi): (u32, u32);
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") Self::MSR,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        Self::from_bits(u64::from(hi) << 32 | u64::from(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_mode_bits() {
        // A typical value under UEFI: LME | LMA | NXE.
        let efer = Efer::from_bits(0xD00);
        assert!(efer.lme());
        assert!(efer.lma());
        assert!(efer.nxe());
        assert!(!efer.sce());
    }
}
