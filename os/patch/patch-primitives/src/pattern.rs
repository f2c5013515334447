//! # Signature Scanning
//!
//! Linear search for a byte signature in which one byte value acts as a
//! wildcard. The wildcard is a property of the pattern, not of the data: a
//! data byte equal to the wildcard value only matches where the pattern holds
//! the wildcard or that same literal value.

use log::{debug, info};
use uefi::Status;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("pattern or scan region is null or empty")]
    InvalidParameter,
    #[error("pattern not found")]
    NotFound,
}

impl From<ScanError> for Status {
    fn from(value: ScanError) -> Self {
        match value {
            ScanError::InvalidParameter => Self::INVALID_PARAMETER,
            ScanError::NotFound => Self::NOT_FOUND,
        }
    }
}

/// A byte signature with an explicit length and a wildcard value.
#[derive(Debug, Copy, Clone)]
pub struct Pattern<'a> {
    bytes: &'a [u8],
    wildcard: u8,
}

impl<'a> Pattern<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8], wildcard: u8) -> Self {
        Self { bytes, wildcard }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub const fn wildcard(&self) -> u8 {
        self.wildcard
    }

    /// Number of leading pattern bytes that match `window`.
    fn matched_prefix(&self, window: &[u8]) -> usize {
        self.bytes
            .iter()
            .zip(window)
            .take_while(|&(&p, &b)| p == self.wildcard || p == b)
            .count()
    }

    /// Start offsets that are scanned in a region of `size` bytes.
    ///
    /// The last offset at which the pattern would end flush with the region
    /// is not scanned; `size == len` therefore never matches.
    fn scan_range(&self, size: usize) -> core::ops::Range<usize> {
        0..size.saturating_sub(self.len())
    }
}

/// Returns the offset of the first (lowest) full match of `pattern` in `haystack`.
///
/// # Errors
/// * [`ScanError::InvalidParameter`] for an empty pattern.
/// * [`ScanError::NotFound`] if no window matches, including when the
///   region is shorter than the pattern.
pub fn find_pattern(pattern: &Pattern<'_>, haystack: &[u8]) -> Result<usize, ScanError> {
    if pattern.is_empty() {
        return Err(ScanError::InvalidParameter);
    }

    let len = pattern.len();
    pattern
        .scan_range(haystack.len())
        .find(|&offset| pattern.matched_prefix(&haystack[offset..offset + len]) == len)
        .ok_or(ScanError::NotFound)
}

/// Raw-pointer variant of [`find_pattern`] for scanning loaded images.
///
/// Returns the address of the first match.
///
/// # Errors
/// [`ScanError::InvalidParameter`] if `pattern` or `base` is null,
/// otherwise see [`find_pattern`].
///
/// # Safety
/// `pattern` must be readable for `pattern_len` bytes and `base` for `size`
/// bytes for the duration of the call.
pub unsafe fn find_pattern_raw(
    pattern: *const u8,
    wildcard: u8,
    pattern_len: u32,
    base: *const u8,
    size: u32,
) -> Result<*const u8, ScanError> {
    if pattern.is_null() || base.is_null() {
        return Err(ScanError::InvalidParameter);
    }

    let pattern = unsafe { core::slice::from_raw_parts(pattern, pattern_len as usize) };
    let haystack = unsafe { core::slice::from_raw_parts(base, size as usize) };
    let offset = find_pattern(&Pattern::new(pattern, wildcard), haystack)?;
    Ok(base.wrapping_add(offset))
}

/// The longest partial match seen by [`find_pattern_verbose`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PartialMatch {
    pub offset: usize,
    pub matched: usize,
}

/// Diagnostic outcome of a verbose scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Offset of the first full match.
    pub first_match: Option<usize>,
    /// Number of full matches in the region. A usable signature has exactly one.
    pub match_count: usize,
    /// The window with the longest matching prefix.
    pub best: Option<PartialMatch>,
}

impl ScanReport {
    /// # Errors
    /// [`ScanError::NotFound`] if the scan saw no full match.
    pub const fn found(&self) -> Result<usize, ScanError> {
        match self.first_match {
            Some(offset) => Ok(offset),
            None => Err(ScanError::NotFound),
        }
    }
}

/// Scans the whole region and reports the best partial match.
///
/// Meant for debugging signatures that stopped matching after an OS update;
/// it never stops early and logs a byte-by-byte comparison, so keep it off
/// any path that runs on every boot.
#[must_use]
pub fn find_pattern_verbose(pattern: &Pattern<'_>, haystack: &[u8]) -> ScanReport {
    let mut report = ScanReport {
        first_match: None,
        match_count: 0,
        best: None,
    };
    if pattern.is_empty() {
        return report;
    }

    let len = pattern.len();
    for offset in pattern.scan_range(haystack.len()) {
        let matched = pattern.matched_prefix(&haystack[offset..offset + len]);
        if report.best.is_none_or(|best| matched > best.matched) {
            report.best = Some(PartialMatch { offset, matched });
        }
        if matched == len {
            report.match_count += 1;
            report.first_match.get_or_insert(offset);
        }
    }

    let Some(best) = report.best else {
        info!("Region of {} bytes is too small for a {len} byte pattern", haystack.len());
        return report;
    };

    info!(
        "Best match: {}/{len} matched at offset {:#x} ({} full matches)",
        best.matched, best.offset, report.match_count
    );
    for (i, &expected) in pattern.bytes.iter().enumerate() {
        let actual = haystack[best.offset + i];
        if expected == pattern.wildcard {
            debug!("[{i}] [ ] {actual:02X}");
        } else if expected == actual {
            debug!("[{i}] [v] {expected:02X}");
        } else {
            debug!("[{i}] [X] {actual:02X} != {expected:02X}");
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const WC: u8 = 0xCC;

    #[test]
    fn region_shorter_than_pattern_is_not_found() {
        let pattern = Pattern::new(&[1, 2, 3, 4], WC);
        assert_eq!(find_pattern(&pattern, &[1, 2, 3]), Err(ScanError::NotFound));
        assert_eq!(find_pattern(&pattern, &[]), Err(ScanError::NotFound));
    }

    #[test]
    fn returns_lowest_offset() {
        let haystack = [0, 0x48, 0x8B, 0x05, 0, 0x48, 0x8B, 0x05, 0, 0];
        let pattern = Pattern::new(&[0x48, 0x8B, 0x05], WC);
        assert_eq!(find_pattern(&pattern, &haystack), Ok(1));
    }

    #[test]
    fn wildcard_matches_any_value_including_itself() {
        let pattern = Pattern::new(&[0xE8, WC, WC, 0x90], WC);
        assert_eq!(find_pattern(&pattern, &[0, 0xE8, 0x12, 0x34, 0x90, 0]), Ok(1));
        assert_eq!(find_pattern(&pattern, &[0, 0xE8, WC, WC, 0x90, 0]), Ok(1));
    }

    #[test]
    fn literal_wildcard_value_in_data_does_not_match_other_bytes() {
        let pattern = Pattern::new(&[0x01, 0x02], WC);
        assert_eq!(find_pattern(&pattern, &[WC, WC, WC, WC]), Err(ScanError::NotFound));
    }

    #[test]
    fn window_ending_at_region_end_is_not_scanned() {
        let pattern = Pattern::new(&[7, 8], WC);
        assert_eq!(find_pattern(&pattern, &[0, 0, 7, 8]), Err(ScanError::NotFound));
        assert_eq!(find_pattern(&pattern, &[0, 7, 8, 0]), Ok(1));
    }

    #[test]
    fn empty_pattern_is_invalid() {
        let pattern = Pattern::new(&[], WC);
        assert_eq!(find_pattern(&pattern, &[1, 2, 3]), Err(ScanError::InvalidParameter));
    }

    #[test]
    fn raw_scan_rejects_null_pointers() {
        let data = [1u8, 2, 3, 4];
        let pattern = [2u8];
        let result = unsafe { find_pattern_raw(core::ptr::null(), WC, 1, data.as_ptr(), 4) };
        assert_eq!(result, Err(ScanError::InvalidParameter));
        let result = unsafe { find_pattern_raw(pattern.as_ptr(), WC, 1, core::ptr::null(), 4) };
        assert_eq!(result, Err(ScanError::InvalidParameter));
    }

    #[test]
    fn raw_scan_returns_address() {
        let data = [9u8, 9, 5, 6, 9, 9];
        let pattern = [5u8, 6];
        let found = unsafe { find_pattern_raw(pattern.as_ptr(), WC, 2, data.as_ptr(), 6) };
        assert_eq!(found, Ok(data.as_ptr().wrapping_add(2)));
    }

    #[test]
    fn verbose_scan_reports_best_partial_match() {
        let haystack = [0x48, 0x00, 0x00, 0x48, 0x8B, 0x00, 0x00, 0x00];
        let pattern = Pattern::new(&[0x48, 0x8B, 0x05], WC);
        let report = find_pattern_verbose(&pattern, &haystack);
        assert_eq!(report.found(), Err(ScanError::NotFound));
        assert_eq!(report.match_count, 0);
        assert_eq!(report.best, Some(PartialMatch { offset: 3, matched: 2 }));
    }

    #[test]
    fn verbose_scan_counts_every_match_and_keeps_the_first() {
        let haystack = [1, 2, 0, 1, 2, 0, 1, 2, 0];
        let pattern = Pattern::new(&[1, 2], WC);
        let report = find_pattern_verbose(&pattern, &haystack);
        assert_eq!(report.found(), Ok(0));
        assert_eq!(report.match_count, 3);
        assert_eq!(find_pattern(&pattern, &haystack), Ok(0));
    }
}
