//! # Typed `x86_64` Control Registers
//!
//! Bitfield models of the control registers a pre-OS component needs to
//! inspect or flip: `CR0` (write protection, paging), `CR4` (5-level paging)
//! and `EFER` (long mode). Loading and storing the live registers requires
//! CPL 0 and is therefore `unsafe`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr0;
pub mod cr4;
pub mod efer;
pub mod paging;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
