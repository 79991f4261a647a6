use core::fmt;

/// The fixed set of memory heaps.
///
/// | Kind | Visible to | Backing | Fallback on physical exhaustion |
/// |------|------------|---------|---------------------------------|
/// | [`Cpu`](Self::Cpu) | CPU | pooled commit | none |
/// | [`GpuPrimary`](Self::GpuPrimary) | GPU | pooled commit | [`FrameBuffer`](Self::FrameBuffer) |
/// | [`GpuCoherent`](Self::GpuCoherent) | CPU + GPU | pooled commit | [`Flexible`](Self::Flexible) |
/// | [`FrameBuffer`](Self::FrameBuffer) | GPU, scanout | pre-mapped | none |
/// | [`Flexible`](Self::Flexible) | CPU + GPU | OS-managed | none |
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HeapKind {
    Cpu = 0,
    GpuPrimary = 1,
    GpuCoherent = 2,
    FrameBuffer = 3,
    Flexible = 4,
}

/// How a heap's virtual window gets physical memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BackingPolicy {
    /// Pages are committed on allocate and decommitted on free, against a
    /// per-heap physical budget.
    Pooled,
    /// The whole window is committed once at construction; allocate only
    /// hands out ranges of it.
    PreMapped,
    /// Commit is delegated to the backing page by page; the backing decides
    /// when memory runs out.
    OsManaged,
}

impl HeapKind {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Cpu,
        Self::GpuPrimary,
        Self::GpuCoherent,
        Self::FrameBuffer,
        Self::Flexible,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The heap retried once when this one runs out of physical memory.
    #[inline]
    #[must_use]
    pub const fn fallback(self) -> Option<Self> {
        match self {
            Self::GpuCoherent => Some(Self::Flexible),
            Self::GpuPrimary => Some(Self::FrameBuffer),
            Self::Cpu | Self::FrameBuffer | Self::Flexible => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn policy(self) -> BackingPolicy {
        match self {
            Self::Cpu | Self::GpuPrimary | Self::GpuCoherent => BackingPolicy::Pooled,
            Self::FrameBuffer => BackingPolicy::PreMapped,
            Self::Flexible => BackingPolicy::OsManaged,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::GpuPrimary => "gpu-primary",
            Self::GpuCoherent => "gpu-coherent",
            Self::FrameBuffer => "frame-buffer",
            Self::Flexible => "flexible",
        }
    }
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_match_all() {
        for (i, kind) in HeapKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn fallback_chain_is_one_hop() {
        for kind in HeapKind::ALL {
            if let Some(next) = kind.fallback() {
                assert_eq!(next.fallback(), None, "{kind} -> {next} must not chain");
            }
        }
        assert_eq!(HeapKind::GpuCoherent.fallback(), Some(HeapKind::Flexible));
        assert_eq!(HeapKind::GpuPrimary.fallback(), Some(HeapKind::FrameBuffer));
        assert_eq!(HeapKind::Cpu.fallback(), None);
    }

    #[test]
    fn display_pads() {
        assert_eq!(format!("{:>8}", HeapKind::Cpu), "     cpu");
    }
}
