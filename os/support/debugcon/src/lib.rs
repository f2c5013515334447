//! # QEMU Debug Console Output
//!
//! Best-effort, allocation-free trace output to QEMU's debug console
//! (`-debugcon stdio`, I/O port `0x402`). Firmware consoles are slow and
//! disappear once the chain-loaded OS takes over the screen; the debug port
//! keeps working until the very last instruction the loader executes.
//!
//! ```rust,ignore
//! use debugcon::qemu_trace;
//!
//! qemu_trace!("boot option {:04X}: {}\n", id, description);
//! ```
//!
//! On real hardware the port is normally unused and writes are dropped.
//! Disabling the `enabled` feature turns every trace into a no-op.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    /// An I/O port that swallows bytes, one `out` per byte.
    #[derive(Debug, Copy, Clone)]
    pub struct DebugConsole {
        port: u16,
    }

    impl DebugConsole {
        /// QEMU's `isa-debugcon` default.
        pub const QEMU: Self = Self { port: 0x402 };

        #[allow(clippy::inline_always)]
        #[inline(always)]
        pub fn write_byte(self, byte: u8) {
            #[cfg(target_arch = "x86_64")]
            unsafe {
                core::arch::asm!(
                    "out dx, al",
                    in("dx") self.port,
                    in("al") byte,
                    options(nomem, nostack, preserves_flags)
                );
            }
            #[cfg(not(target_arch = "x86_64"))]
            let _ = (self.port, byte);
        }
    }

    impl fmt::Write for DebugConsole {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(|b| self.write_byte(b));
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Nobody is listening on real hardware.
        let _ = fmt::write(&mut DebugConsole::QEMU, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// Writes `format!`-style arguments to the QEMU debug console.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
