//! # Default heap layout
//!
//! ```text
//! 0x1_0000_0000  +---------------------+
//!                | cpu           1 GiB |  16 KiB pages
//! 0x1_4000_0000  +---------------------+
//!                :                     :
//! 0x2_0000_0000  +---------------------+
//!                | gpu-primary   4 GiB |  64 KiB pages
//! 0x3_0000_0000  +---------------------+
//!                | gpu-coherent  1 GiB |  16 KiB pages
//! 0x3_4000_0000  +---------------------+
//!                | frame-buffer 256 MiB|  64 KiB pages, pre-mapped
//! 0x3_5000_0000  +---------------------+
//!                :                     :
//! 0x4_0000_0000  +---------------------+
//!                | flexible      2 GiB |  16 KiB pages
//! 0x4_8000_0000  +---------------------+
//! ```
//!
//! Every window is a power of two in size and aligned to its own size, so a
//! window's page index is a shift of the address offset.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

pub const CPU_BASE: u64 = 0x1_0000_0000;
pub const CPU_WINDOW: u64 = GIB;
pub const CPU_PAGE: u64 = 16 * KIB;
pub const CPU_BUDGET: u64 = 512 * MIB;

pub const GPU_PRIMARY_BASE: u64 = 0x2_0000_0000;
pub const GPU_PRIMARY_WINDOW: u64 = 4 * GIB;
pub const GPU_PRIMARY_PAGE: u64 = 64 * KIB;
pub const GPU_PRIMARY_BUDGET: u64 = 2 * GIB;

pub const GPU_COHERENT_BASE: u64 = 0x3_0000_0000;
pub const GPU_COHERENT_WINDOW: u64 = GIB;
pub const GPU_COHERENT_PAGE: u64 = 16 * KIB;
pub const GPU_COHERENT_BUDGET: u64 = 256 * MIB;

/// The frame buffer is committed in full at boot; its budget is its window.
pub const FRAME_BUFFER_BASE: u64 = 0x3_4000_0000;
pub const FRAME_BUFFER_WINDOW: u64 = 256 * MIB;
pub const FRAME_BUFFER_PAGE: u64 = 64 * KIB;

/// No budget of its own; the backing reports exhaustion.
pub const FLEXIBLE_BASE: u64 = 0x4_0000_0000;
pub const FLEXIBLE_WINDOW: u64 = 2 * GIB;
pub const FLEXIBLE_PAGE: u64 = 16 * KIB;

/// Page size of the small-block pool's backing pages.
pub const SMALL_BLOCK_PAGE: u64 = MIB;
/// Largest request served from a size class rather than whole pages.
pub const SMALL_BLOCK_CEILING: u64 = MIB;
/// Smallest size class.
pub const SMALL_BLOCK_MIN: u64 = 8;

const fn window_ok(base: u64, window: u64, page: u64) -> bool {
    window.is_power_of_two()
        && page.is_power_of_two()
        && page <= window
        && base.is_multiple_of(window)
        && window / page <= heap_buddy::MAX_SLOTS as u64
}

const _: () = {
    assert!(window_ok(CPU_BASE, CPU_WINDOW, CPU_PAGE));
    assert!(window_ok(GPU_PRIMARY_BASE, GPU_PRIMARY_WINDOW, GPU_PRIMARY_PAGE));
    assert!(window_ok(GPU_COHERENT_BASE, GPU_COHERENT_WINDOW, GPU_COHERENT_PAGE));
    assert!(window_ok(FRAME_BUFFER_BASE, FRAME_BUFFER_WINDOW, FRAME_BUFFER_PAGE));
    assert!(window_ok(FLEXIBLE_BASE, FLEXIBLE_WINDOW, FLEXIBLE_PAGE));

    // Ascending and disjoint.
    assert!(CPU_BASE + CPU_WINDOW <= GPU_PRIMARY_BASE);
    assert!(GPU_PRIMARY_BASE + GPU_PRIMARY_WINDOW <= GPU_COHERENT_BASE);
    assert!(GPU_COHERENT_BASE + GPU_COHERENT_WINDOW <= FRAME_BUFFER_BASE);
    assert!(FRAME_BUFFER_BASE + FRAME_BUFFER_WINDOW <= FLEXIBLE_BASE);

    assert!(CPU_BUDGET <= CPU_WINDOW);
    assert!(GPU_PRIMARY_BUDGET <= GPU_PRIMARY_WINDOW);
    assert!(GPU_COHERENT_BUDGET <= GPU_COHERENT_WINDOW);

    assert!(SMALL_BLOCK_PAGE.is_power_of_two());
    assert!(SMALL_BLOCK_CEILING.is_power_of_two());
    assert!(SMALL_BLOCK_CEILING <= SMALL_BLOCK_PAGE);
    assert!(SMALL_BLOCK_MIN <= SMALL_BLOCK_CEILING);
    assert!(SMALL_BLOCK_PAGE.is_multiple_of(GPU_PRIMARY_PAGE));
    assert!(SMALL_BLOCK_PAGE.is_multiple_of(CPU_PAGE));
};
