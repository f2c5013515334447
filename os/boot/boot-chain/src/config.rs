//! # Patch Driver Configuration
//!
//! The record sent to the driver's configuration entry point, and the timing
//! constants of the boot handshake.

/// Watchdog armed around `StartImage`, as the platform boot manager does.
pub const BOOT_WATCHDOG_TIMEOUT_SECS: usize = 5 * 60;

/// How the driver hides from kernel integrity checks.
#[repr(u32)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum BypassStrategy {
    /// Leave integrity checks alone.
    None = 0,
    /// Disable checks during boot only; they come back once the kernel
    /// initializes its own protection.
    BootTimeOnly = 1,
    /// Hook `SetVariable` at runtime to disable checks persistently.
    #[default]
    RuntimeHook = 2,
}

impl BypassStrategy {
    /// Maps the operator's menu choice (`'1'`..`'3'`) to a strategy.
    #[must_use]
    pub const fn from_choice(choice: char) -> Option<Self> {
        match choice {
            '1' => Some(Self::None),
            '2' => Some(Self::BootTimeOnly),
            '3' => Some(Self::RuntimeHook),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub bypass: BypassStrategy,
    /// Wait for a key after each patching stage.
    pub pause_after_each_stage: bool,
}

/// The in-memory layout the driver's `Configure` entry point expects.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RawDriverConfig {
    pub bypass: u32,
    pub wait_for_key_press: bool,
}

impl From<DriverConfig> for RawDriverConfig {
    fn from(value: DriverConfig) -> Self {
        Self {
            bypass: value.bypass as u32,
            wait_for_key_press: value.pause_after_each_stage,
        }
    }
}
