use crate::{AddressRange, HeapKind};
use core::fmt;

/// Accounting snapshot of one heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapKindReport {
    pub kind: HeapKind,
    pub window: AddressRange,
    pub page_size: u64,
    /// Window bytes reserved, including power-of-two padding.
    pub reserved_bytes: u64,
    /// Bytes handed out to callers.
    pub in_use_bytes: u64,
    pub peak_in_use_bytes: u64,
    /// Bytes with physical memory behind them.
    pub committed_bytes: u64,
    pub physical_budget: Option<u64>,
    /// Unreserved window bytes.
    pub free_bytes: u64,
    /// Disjoint free ranges in the window.
    pub free_runs: usize,
    pub largest_free_run_bytes: u64,
    pub live_allocations: u64,
    pub fallbacks_out: u64,
    pub fallbacks_in: u64,
    pub failures: u64,
    pub lock_contention: usize,
}

/// Per-heap accounting, as produced by
/// [`HeapManager::report`](crate::HeapManager::report).
///
/// `Display` renders one row per heap kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapReport {
    heaps: [HeapKindReport; HeapKind::COUNT],
}

impl HeapReport {
    #[must_use]
    pub const fn new(heaps: [HeapKindReport; HeapKind::COUNT]) -> Self {
        Self { heaps }
    }

    #[must_use]
    pub const fn kind(&self, kind: HeapKind) -> &HeapKindReport {
        &self.heaps[kind.index()]
    }

    pub fn iter(&self) -> core::slice::Iter<'_, HeapKindReport> {
        self.heaps.iter()
    }

    #[must_use]
    pub fn total_committed(&self) -> u64 {
        self.heaps.iter().map(|h| h.committed_bytes).sum()
    }

    #[must_use]
    pub fn total_in_use(&self) -> u64 {
        self.heaps.iter().map(|h| h.in_use_bytes).sum()
    }
}

impl<'a> IntoIterator for &'a HeapReport {
    type Item = &'a HeapKindReport;
    type IntoIter = core::slice::Iter<'a, HeapKindReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.heaps.iter()
    }
}

/// Byte count rendered with a binary unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Bytes(pub u64);

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
        let mut unit = 0;
        let mut value = self.0;
        while value >= 1024 && value.is_multiple_of(1024) && unit < UNITS.len() - 1 {
            value /= 1024;
            unit += 1;
        }
        if unit == 0 && self.0 >= 1024 {
            // Not a whole number of KiB; show one decimal of the largest unit.
            let mut scaled = self.0;
            let mut unit = 0;
            while scaled >= 1024 * 1024 && unit < UNITS.len() - 2 {
                scaled /= 1024;
                unit += 1;
            }
            let tenths = scaled * 10 / 1024;
            return f.pad(&format!("{}.{} {}", tenths / 10, tenths % 10, UNITS[unit + 1]));
        }
        f.pad(&format!("{value} {}", UNITS[unit]))
    }
}

impl fmt::Display for HeapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<13} {:>9} {:>10} {:>10} {:>10} {:>10} {:>10} {:>6} {:>7} {:>9} {:>5}",
            "heap", "page", "in use", "committed", "budget", "free", "largest", "runs", "live", "fallback", "fail"
        )?;
        for h in &self.heaps {
            let budget = h
                .physical_budget
                .map_or_else(|| String::from("-"), |b| Bytes(b).to_string());
            writeln!(
                f,
                "{:<13} {:>9} {:>10} {:>10} {:>10} {:>10} {:>10} {:>6} {:>7} {:>4}/{:<4} {:>5}",
                h.kind,
                Bytes(h.page_size),
                Bytes(h.in_use_bytes),
                Bytes(h.committed_bytes),
                budget,
                Bytes(h.free_bytes),
                Bytes(h.largest_free_run_bytes),
                h.free_runs,
                h.live_allocations,
                h.fallbacks_out,
                h.fallbacks_in,
                h.failures,
            )?;
        }
        write!(
            f,
            "total: {} in use, {} committed",
            Bytes(self.total_in_use()),
            Bytes(self.total_committed())
        )
    }
}
