//! # Writes to Write-Protected Memory
//!
//! Code pages of a loaded image are usually mapped read-only. With `CR0.WP`
//! set, that also binds ring 0. [`WpGuard`] clears the bit for the duration of
//! a scope and restores the value it observed on drop; it never enables write
//! protection that was off to begin with.
//!
//! The guarded body runs without any fault handler. If it faults, the drop
//! never runs and the machine is gone anyway, so the guard only covers normal
//! exits. Callers are responsible for passing mapped destination ranges.

use cpu_registers::cr0::Cr0;
use log::trace;

/// Access to the register holding the write protection bit.
pub trait WriteProtect {
    /// # Safety
    /// Requires CPL 0.
    unsafe fn load_cr0(&mut self) -> Cr0;

    /// # Safety
    /// Requires CPL 0. Storing an invalid `CR0` value is undefined behavior.
    unsafe fn store_cr0(&mut self, cr0: Cr0);
}

/// The live `CR0` register.
#[derive(Debug, Default, Copy, Clone)]
pub struct HardwareCr0;

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl WriteProtect for HardwareCr0 {
    unsafe fn load_cr0(&mut self) -> Cr0 {
        use cpu_registers::LoadRegisterUnsafe;
        unsafe { Cr0::load_unsafe() }
    }

    unsafe fn store_cr0(&mut self, cr0: Cr0) {
        use cpu_registers::StoreRegisterUnsafe;
        unsafe { cr0.store_unsafe() }
    }
}

/// Scoped guard that disables `CR0.WP` while alive.
///
/// `CR0` is read exactly once, on construction. On drop the original value is
/// written back only if write protection had been enabled.
pub struct WpGuard<'a, W: WriteProtect> {
    control: &'a mut W,
    original: Cr0,
}

impl<'a, W: WriteProtect> WpGuard<'a, W> {
    /// # Safety
    /// Requires CPL 0. The guard must not be leaked; `mem::forget` would leave
    /// write protection disabled.
    #[must_use]
    pub unsafe fn new(control: &'a mut W) -> Self {
        let original = unsafe { control.load_cr0() };
        if original.wp() {
            unsafe { control.store_cr0(original.with_wp(false)) };
        }
        Self { control, original }
    }

    /// Whether write protection was enabled when the guard was created.
    #[must_use]
    pub const fn was_enabled(&self) -> bool {
        self.original.wp()
    }
}

impl<W: WriteProtect> Drop for WpGuard<'_, W> {
    fn drop(&mut self) {
        if self.original.wp() {
            unsafe { self.control.store_cr0(self.original) };
        }
    }
}

/// Copies `len` bytes from `src` to `dst` with write protection lifted.
///
/// # Safety
/// Requires CPL 0. `src` must be readable and `dst` mapped for `len` bytes,
/// and the two ranges must not overlap. Nothing else may run concurrently.
pub unsafe fn copy_wp_mem_with<W: WriteProtect>(
    control: &mut W,
    dst: *mut u8,
    src: *const u8,
    len: usize,
) -> *mut u8 {
    trace!("Patching {len} bytes at {dst:p}");
    let _guard = unsafe { WpGuard::new(control) };
    unsafe { core::ptr::copy_nonoverlapping(src, dst, len) };
    dst
}

/// Fills `len` bytes at `dst` with `value` with write protection lifted.
///
/// # Safety
/// Requires CPL 0. `dst` must be mapped for `len` bytes. Nothing else may run
/// concurrently.
pub unsafe fn set_wp_mem_with<W: WriteProtect>(
    control: &mut W,
    dst: *mut u8,
    len: usize,
    value: u8,
) -> *mut u8 {
    trace!("Filling {len} bytes at {dst:p} with {value:#04x}");
    let _guard = unsafe { WpGuard::new(control) };
    unsafe { core::ptr::write_bytes(dst, value, len) };
    dst
}

/// [`copy_wp_mem_with`] on the live `CR0`.
///
/// # Safety
/// See [`copy_wp_mem_with`].
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
pub unsafe fn copy_wp_mem(dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
    unsafe { copy_wp_mem_with(&mut HardwareCr0, dst, src, len) }
}

/// [`set_wp_mem_with`] on the live `CR0`.
///
/// # Safety
/// See [`set_wp_mem_with`].
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
pub unsafe fn set_wp_mem(dst: *mut u8, len: usize, value: u8) -> *mut u8 {
    unsafe { set_wp_mem_with(&mut HardwareCr0, dst, len, value) }
}
