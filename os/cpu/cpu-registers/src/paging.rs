//! # Paging mode queries

use crate::cr0::Cr0;
use crate::cr4::Cr4;
use crate::efer::Efer;

/// The paging mode the processor is currently running in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PagingMode {
    /// Paging is disabled, or the CPU is not in long mode.
    Legacy,
    /// 4-level paging (48-bit linear addresses).
    FourLevel,
    /// 5-level paging (57-bit linear addresses, `CR4.LA57`).
    FiveLevel,
}

impl PagingMode {
    /// Derives the paging mode from register snapshots.
    #[must_use]
    pub const fn from_registers(cr0: Cr0, efer: Efer, cr4: Cr4) -> Self {
        if !cr0.pg() || !efer.lma() {
            Self::Legacy
        } else if cr4.la57() {
            Self::FiveLevel
        } else {
            Self::FourLevel
        }
    }

    /// Reads `CR0`, `EFER` and `CR4` and derives the active paging mode.
    ///
    /// # Safety
    /// Must run at CPL 0; `rdmsr` and control register reads fault otherwise.
    #[cfg(all(feature = "asm", target_arch = "x86_64"))]
    #[must_use]
    pub unsafe fn current() -> Self {
        use crate::LoadRegisterUnsafe;
        unsafe { Self::from_registers(Cr0::load_unsafe(), Efer::load_unsafe(), Cr4::load_unsafe()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_disabled_is_legacy() {
        let cr4 = Cr4::new().with_la57(true);
        let efer = Efer::new().with_lma(true);
        assert_eq!(PagingMode::from_registers(Cr0::new(), efer, cr4), PagingMode::Legacy);
    }

    #[test]
    fn la57_requires_long_mode() {
        let cr0 = Cr0::new().with_pg(true);
        let cr4 = Cr4::new().with_la57(true);
        assert_eq!(PagingMode::from_registers(cr0, Efer::new(), cr4), PagingMode::Legacy);
        assert_eq!(
            PagingMode::from_registers(cr0, Efer::new().with_lma(true), cr4),
            PagingMode::FiveLevel
        );
        assert_eq!(
            PagingMode::from_registers(cr0, Efer::new().with_lma(true), Cr4::new()),
            PagingMode::FourLevel
        );
    }
}
