#![allow(dead_code)]

use heap_alloc::{HeapConfig, HeapKind, HeapKindConfig};

pub const PAGE: u64 = 4096;

pub const CPU_BASE: u64 = 0x1000_0000;
pub const GPU_PRIMARY_BASE: u64 = 0x2000_0000;
pub const GPU_COHERENT_BASE: u64 = 0x3000_0000;
pub const FRAME_BUFFER_BASE: u64 = 0x4000_0000;
pub const FLEXIBLE_BASE: u64 = 0x5000_0000;

/// Small windows with 4 KiB pages everywhere; the CPU heap has `cpu_pages`
/// pages, every other heap 64. GPU heaps are budgeted to 16 pages.
pub fn small_config(cpu_pages: u64) -> HeapConfig {
    HeapConfig::default()
        .with_kind(
            HeapKind::Cpu,
            HeapKindConfig::new(CPU_BASE, cpu_pages * PAGE, PAGE, None),
        )
        .with_kind(
            HeapKind::GpuPrimary,
            HeapKindConfig::new(GPU_PRIMARY_BASE, 64 * PAGE, PAGE, Some(16 * PAGE)),
        )
        .with_kind(
            HeapKind::GpuCoherent,
            HeapKindConfig::new(GPU_COHERENT_BASE, 64 * PAGE, PAGE, Some(16 * PAGE)),
        )
        .with_kind(
            HeapKind::FrameBuffer,
            HeapKindConfig::new(FRAME_BUFFER_BASE, 64 * PAGE, PAGE, Some(64 * PAGE)),
        )
        .with_kind(
            HeapKind::Flexible,
            HeapKindConfig::new(FLEXIBLE_BASE, 64 * PAGE, PAGE, None),
        )
}

/// Deterministic xorshift64.
pub struct Rng(u64);

impl Rng {
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

/// Panics if any two `(start, len)` ranges overlap.
pub fn assert_disjoint(ranges: &mut [(u64, u64)]) {
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        let (a, a_len) = pair[0];
        let (b, _) = pair[1];
        assert!(a + a_len <= b, "{a:#x}+{a_len:#x} overlaps {b:#x}");
    }
}
