use debugcon::qemu_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Writes log records to the QEMU debug console and the firmware text console.
pub struct UefiLogger {
    max_level: LevelFilter,
}

impl UefiLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Installs the logger. Call once, before anything logs.
    ///
    /// # Errors
    /// If a logger was already installed.
    #[allow(static_mut_refs)]
    pub fn init(self) -> Result<(), SetLoggerError> {
        // No allocation needed; the loader is single threaded.
        static mut LOGGER: Option<UefiLogger> = None;

        let max_level = self.max_level;
        unsafe {
            let logger: &'static UefiLogger = LOGGER.insert(self);
            log::set_logger(logger)?;
        }
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        qemu_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        uefi::println!(
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // no-op for qemu debug port
    }
}
