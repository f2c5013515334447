//! # Patch Message Log
//!
//! A fixed-capacity UCS-2 buffer collecting one line per applied patch, to be
//! printed in bulk once patching is done. Messages are stored as consecutive
//! NUL-terminated segments followed by an empty segment, like a Win32
//! environment block. Firmware `OutputString` implementations tend to drop
//! output after a few lines per call, so [`PatchLog::flush`] hands out one
//! segment at a time.
//!
//! Overflowing the buffer is a bug in the caller's sizing and panics.

use core::fmt::{self, Write};
use uefi::CStr16;

/// Units reserved for the terminator of the last segment and the empty
/// end-of-log segment.
const TERMINATOR_UNITS: usize = 2;

pub struct PatchLog<const N: usize> {
    buffer: [u16; N],
    /// Units in use, including each segment's terminator.
    used: usize,
}

impl<const N: usize> Default for PatchLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PatchLog<N> {
    #[must_use]
    pub const fn new() -> Self {
        const { assert!(N > TERMINATOR_UNITS, "patch log needs room for its terminators") };
        Self {
            buffer: [0; N],
            used: 0,
        }
    }

    /// Largest number of text units a single message can hold when the log is empty.
    pub const MAX_TEXT_UNITS: usize = N - TERMINATOR_UNITS;

    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0);
        self.used = 0;
    }

    /// Formats a message into the tail of the log as a new segment.
    ///
    /// An empty message adds nothing, since it would read as the end marker.
    ///
    /// # Panics
    /// If the message does not fit in the remaining capacity.
    pub fn append(&mut self, args: fmt::Arguments<'_>) {
        let mut writer = SegmentWriter {
            buffer: &mut self.buffer[..N - TERMINATOR_UNITS],
            pos: self.used,
            overflow: false,
        };
        // Any other error comes from a Display impl; keep the partial text.
        let _ = writer.write_fmt(args);
        assert!(
            !writer.overflow,
            "patch log overflow: {} of {} units used",
            self.used,
            N
        );

        let end = writer.pos;
        if end == self.used {
            return;
        }
        self.buffer[end] = 0;
        self.used = end + 1;
        self.buffer[self.used] = 0;
    }

    /// Emits every stored message in append order, one call per message.
    ///
    /// The walk is capped by the buffer capacity regardless of the recorded
    /// usage, and the double terminator is re-established before reading.
    pub fn flush(&mut self, mut emit: impl FnMut(&CStr16)) {
        let limit = self.used.min(N - TERMINATOR_UNITS);
        self.buffer[limit] = 0;
        self.buffer[limit + 1] = 0;

        let mut start = 0;
        while start < N {
            let Some(len) = self.buffer[start..].iter().position(|&c| c == 0) else {
                break;
            };
            if len == 0 {
                break;
            }
            if let Ok(segment) = CStr16::from_u16_with_nul(&self.buffer[start..=start + len]) {
                emit(segment);
            }
            start += len + 1;
        }
    }

    /// Iterates the stored messages without emitting them.
    pub fn segments(&self) -> impl Iterator<Item = &[u16]> {
        self.buffer[..self.used.min(N)]
            .split(|&c| c == 0)
            .take_while(|segment| !segment.is_empty())
    }

    #[cfg(test)]
    fn corrupt_used(&mut self, used: usize) {
        self.used = used;
    }
}

struct SegmentWriter<'a> {
    buffer: &'a mut [u16],
    pos: usize,
    overflow: bool,
}

impl Write for SegmentWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            // The console is UCS-2; NUL would split the segment.
            let unit = match u16::try_from(u32::from(c)) {
                Ok(0) => continue,
                Ok(unit) => unit,
                Err(_) => 0xFFFD,
            };
            let Some(slot) = self.buffer.get_mut(self.pos) else {
                self.overflow = true;
                return Err(fmt::Error);
            };
            *slot = unit;
            self.pos += 1;
        }
        Ok(())
    }
}

/// Appends a formatted message to a [`PatchLog`].
#[macro_export]
macro_rules! patch_log {
    ($log:expr, $($arg:tt)*) => {
        $log.append(core::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flushed<const N: usize>(log: &mut PatchLog<N>) -> Vec<String> {
        let mut lines = Vec::new();
        log.flush(|segment| lines.push(segment.to_string()));
        lines
    }

    #[test]
    fn flush_emits_messages_in_append_order() {
        let mut log = PatchLog::<256>::new();
        for stage in 1..=5 {
            patch_log!(log, "Patched stage {stage} at {:#x}\r\n", stage * 0x100);
        }

        let lines = flushed(&mut log);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Patched stage 1 at 0x100\r\n");
        assert_eq!(lines[4], "Patched stage 5 at 0x500\r\n");
        assert_eq!(log.segments().count(), 5);
    }

    #[test]
    fn flush_of_empty_log_emits_nothing() {
        let mut log = PatchLog::<16>::new();
        assert!(flushed(&mut log).is_empty());
    }

    #[test]
    fn flush_is_repeatable() {
        let mut log = PatchLog::<64>::new();
        patch_log!(log, "one");
        patch_log!(log, "two");
        assert_eq!(flushed(&mut log), ["one", "two"]);
        assert_eq!(flushed(&mut log), ["one", "two"]);
    }

    #[test]
    fn empty_messages_are_ignored() {
        let mut log = PatchLog::<32>::new();
        patch_log!(log, "a");
        patch_log!(log, "");
        patch_log!(log, "b");
        assert_eq!(flushed(&mut log), ["a", "b"]);
    }

    #[test]
    fn message_filling_capacity_minus_terminators_fits() {
        let mut log = PatchLog::<10>::new();
        assert_eq!(PatchLog::<10>::MAX_TEXT_UNITS, 8);
        patch_log!(log, "{}", "x".repeat(8));
        assert_eq!(log.used(), 9);
        assert_eq!(flushed(&mut log), ["xxxxxxxx"]);
    }

    #[test]
    fn consecutive_messages_up_to_capacity_fit() {
        let mut log = PatchLog::<10>::new();
        patch_log!(log, "abc");
        patch_log!(log, "defg");
        assert_eq!(log.used(), 9);
        assert_eq!(flushed(&mut log), ["abc", "defg"]);
    }

    #[test]
    #[should_panic(expected = "patch log overflow")]
    fn message_exceeding_capacity_panics() {
        let mut log = PatchLog::<10>::new();
        patch_log!(log, "{}", "x".repeat(9));
    }

    #[test]
    #[should_panic(expected = "patch log overflow")]
    fn append_to_full_log_panics() {
        let mut log = PatchLog::<10>::new();
        patch_log!(log, "abc");
        patch_log!(log, "defgh");
    }

    #[test]
    fn flush_clamps_corrupted_usage() {
        let mut log = PatchLog::<8>::new();
        patch_log!(log, "abc");
        log.corrupt_used(usize::MAX);
        assert_eq!(flushed(&mut log), ["abc"]);
    }

    #[test]
    fn non_ucs2_characters_are_replaced() {
        let mut log = PatchLog::<16>::new();
        patch_log!(log, "ok \u{1F600}");
        assert_eq!(flushed(&mut log), ["ok \u{FFFD}"]);
    }
}
