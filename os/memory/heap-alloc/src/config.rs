use crate::layout::{
    CPU_BASE, CPU_BUDGET, CPU_PAGE, CPU_WINDOW, FLEXIBLE_BASE, FLEXIBLE_PAGE, FLEXIBLE_WINDOW,
    FRAME_BUFFER_BASE, FRAME_BUFFER_PAGE, FRAME_BUFFER_WINDOW, GPU_COHERENT_BASE,
    GPU_COHERENT_BUDGET, GPU_COHERENT_PAGE, GPU_COHERENT_WINDOW, GPU_PRIMARY_BASE,
    GPU_PRIMARY_BUDGET, GPU_PRIMARY_PAGE, GPU_PRIMARY_WINDOW, SMALL_BLOCK_CEILING,
    SMALL_BLOCK_MIN, SMALL_BLOCK_PAGE,
};
use crate::{AddressRange, HeapAddress, HeapKind};
use heap_buddy::MAX_SLOTS;

/// Window and budget of one heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapKindConfig {
    pub base: HeapAddress,
    /// Power of two; `base` must be a multiple of it.
    pub window_size: u64,
    /// Power of two no larger than the window.
    pub page_size: u64,
    /// Bytes that may be committed at once; `None` leaves the limit to the backing.
    pub physical_budget: Option<u64>,
}

impl HeapKindConfig {
    #[must_use]
    pub const fn new(base: u64, window_size: u64, page_size: u64, physical_budget: Option<u64>) -> Self {
        Self {
            base: HeapAddress::new(base),
            window_size,
            page_size,
            physical_budget,
        }
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> AddressRange {
        AddressRange::new(self.base, self.window_size)
    }

    #[inline]
    #[must_use]
    pub const fn num_pages(&self) -> u64 {
        self.window_size / self.page_size
    }

    fn validate(&self, kind: HeapKind) -> Result<(), ConfigError> {
        if !self.window_size.is_power_of_two() {
            return Err(ConfigError::WindowNotPowerOfTwo(kind));
        }
        if !self.base.is_aligned(self.window_size)
            || self.base.checked_add(self.window_size).is_none()
        {
            return Err(ConfigError::WindowMisaligned(kind));
        }
        if !self.page_size.is_power_of_two()
            || self.page_size > self.window_size
            || self.num_pages() > u64::from(MAX_SLOTS)
        {
            return Err(ConfigError::PageSizeInvalid(kind));
        }
        Ok(())
    }
}

/// Windows of every heap kind.
///
/// ```rust
/// # use heap_alloc::{HeapConfig, HeapKind, HeapKindConfig};
/// let config = HeapConfig::default()
///     .with_kind(HeapKind::Cpu, HeapKindConfig::new(0x1_0000_0000, 8 * 4096, 4096, None));
/// assert!(config.validate().is_ok());
/// assert_eq!(config.kind(HeapKind::Cpu).num_pages(), 8);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    kinds: [HeapKindConfig; HeapKind::COUNT],
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            kinds: [
                HeapKindConfig::new(CPU_BASE, CPU_WINDOW, CPU_PAGE, Some(CPU_BUDGET)),
                HeapKindConfig::new(
                    GPU_PRIMARY_BASE,
                    GPU_PRIMARY_WINDOW,
                    GPU_PRIMARY_PAGE,
                    Some(GPU_PRIMARY_BUDGET),
                ),
                HeapKindConfig::new(
                    GPU_COHERENT_BASE,
                    GPU_COHERENT_WINDOW,
                    GPU_COHERENT_PAGE,
                    Some(GPU_COHERENT_BUDGET),
                ),
                HeapKindConfig::new(
                    FRAME_BUFFER_BASE,
                    FRAME_BUFFER_WINDOW,
                    FRAME_BUFFER_PAGE,
                    Some(FRAME_BUFFER_WINDOW),
                ),
                HeapKindConfig::new(FLEXIBLE_BASE, FLEXIBLE_WINDOW, FLEXIBLE_PAGE, None),
            ],
        }
    }
}

impl HeapConfig {
    #[must_use]
    pub const fn with_kind(mut self, kind: HeapKind, config: HeapKindConfig) -> Self {
        self.kinds[kind.index()] = config;
        self
    }

    /// Convenience for changing only the budget of one heap.
    #[must_use]
    pub const fn with_budget(mut self, kind: HeapKind, budget: Option<u64>) -> Self {
        self.kinds[kind.index()].physical_budget = budget;
        self
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self, kind: HeapKind) -> &HeapKindConfig {
        &self.kinds[kind.index()]
    }

    /// Checks every window on its own, then that no two windows overlap.
    ///
    /// # Errors
    /// The first violation found, in [`HeapKind::ALL`] order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in HeapKind::ALL {
            self.kind(kind).validate(kind)?;
        }

        for (i, a) in HeapKind::ALL.iter().enumerate() {
            for b in &HeapKind::ALL[i + 1..] {
                if self.kind(*a).window().overlaps(&self.kind(*b).window()) {
                    return Err(ConfigError::WindowsOverlap(*a, *b));
                }
            }
        }
        Ok(())
    }

    /// The heap whose window contains `address`.
    #[must_use]
    pub fn kind_of(&self, address: HeapAddress) -> Option<HeapKind> {
        HeapKind::ALL
            .into_iter()
            .find(|kind| self.kind(*kind).window().contains(address))
    }
}

/// Geometry of the small-block pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SmallBlockConfig {
    /// Size of each backing page requested from the heap manager.
    pub page_size: u64,
    /// Largest size class. Larger requests get whole heap pages.
    pub max_block_size: u64,
}

impl Default for SmallBlockConfig {
    fn default() -> Self {
        Self {
            page_size: SMALL_BLOCK_PAGE,
            max_block_size: SMALL_BLOCK_CEILING,
        }
    }
}

impl SmallBlockConfig {
    pub const MIN_BLOCK_SIZE: u64 = SMALL_BLOCK_MIN;

    /// Number of power-of-two classes from [`MIN_BLOCK_SIZE`](Self::MIN_BLOCK_SIZE)
    /// up to `max_block_size`.
    #[must_use]
    pub const fn class_count(&self) -> usize {
        (self.max_block_size.trailing_zeros() - Self::MIN_BLOCK_SIZE.trailing_zeros() + 1) as usize
    }

    /// # Errors
    /// [`ConfigError::PoolPageTooSmall`] if the page cannot hold one minimum
    /// block, [`ConfigError::BlockCeilingInvalid`] if the ceiling is not a
    /// power of two between the minimum class and the page size.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two() || self.page_size < Self::MIN_BLOCK_SIZE {
            return Err(ConfigError::PoolPageTooSmall);
        }
        if !self.max_block_size.is_power_of_two()
            || self.max_block_size < Self::MIN_BLOCK_SIZE
            || self.max_block_size > self.page_size
        {
            return Err(ConfigError::BlockCeilingInvalid);
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} heap window size is not a power of two")]
    WindowNotPowerOfTwo(HeapKind),
    #[error("{0} heap window base is not aligned to its size")]
    WindowMisaligned(HeapKind),
    #[error("{0} heap page size is not a power of two dividing its window")]
    PageSizeInvalid(HeapKind),
    #[error("{0} and {1} heap windows overlap")]
    WindowsOverlap(HeapKind, HeapKind),
    #[error("small-block page size is too small or not a multiple of the heap page size")]
    PoolPageTooSmall,
    #[error("small-block ceiling must be a power of two between the minimum class and the page size")]
    BlockCeilingInvalid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        assert_eq!(HeapConfig::default().validate(), Ok(()));
        assert_eq!(SmallBlockConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_windows() {
        let bad = HeapConfig::default().with_kind(
            HeapKind::Cpu,
            HeapKindConfig::new(CPU_BASE, 3 * 4096, 4096, None),
        );
        assert_eq!(bad.validate(), Err(ConfigError::WindowNotPowerOfTwo(HeapKind::Cpu)));

        let bad = HeapConfig::default().with_kind(
            HeapKind::Flexible,
            HeapKindConfig::new(FLEXIBLE_BASE + 4096, FLEXIBLE_WINDOW, FLEXIBLE_PAGE, None),
        );
        assert_eq!(bad.validate(), Err(ConfigError::WindowMisaligned(HeapKind::Flexible)));

        let bad = HeapConfig::default().with_kind(
            HeapKind::Cpu,
            HeapKindConfig::new(CPU_BASE, CPU_WINDOW, 3000, None),
        );
        assert_eq!(bad.validate(), Err(ConfigError::PageSizeInvalid(HeapKind::Cpu)));
    }

    #[test]
    fn rejects_overlap() {
        let bad = HeapConfig::default().with_kind(
            HeapKind::FrameBuffer,
            HeapKindConfig::new(GPU_COHERENT_BASE, FRAME_BUFFER_WINDOW, FRAME_BUFFER_PAGE, None),
        );
        assert_eq!(
            bad.validate(),
            Err(ConfigError::WindowsOverlap(HeapKind::GpuCoherent, HeapKind::FrameBuffer))
        );
    }

    #[test]
    fn kind_of_finds_window() {
        let config = HeapConfig::default();
        assert_eq!(config.kind_of(HeapAddress::new(CPU_BASE)), Some(HeapKind::Cpu));
        assert_eq!(
            config.kind_of(HeapAddress::new(FRAME_BUFFER_BASE + FRAME_BUFFER_WINDOW - 1)),
            Some(HeapKind::FrameBuffer)
        );
        assert_eq!(config.kind_of(HeapAddress::new(0x1000)), None);
    }

    #[test]
    fn small_block_classes() {
        let c = SmallBlockConfig { page_size: 4096, max_block_size: 64 };
        assert_eq!(c.validate(), Ok(()));
        // 8, 16, 32, 64
        assert_eq!(c.class_count(), 4);
        assert_eq!(SmallBlockConfig::default().class_count(), 18);

        let c = SmallBlockConfig { page_size: 4096, max_block_size: 8192 };
        assert_eq!(c.validate(), Err(ConfigError::BlockCeilingInvalid));
        let c = SmallBlockConfig { page_size: 4, max_block_size: 4 };
        assert_eq!(c.validate(), Err(ConfigError::PoolPageTooSmall));
    }
}
