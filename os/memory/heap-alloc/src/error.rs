use crate::{HeapAddress, HeapKind};

/// Failures of heap-level allocate and free.
///
/// Only [`OutOfPhysicalMemory`](Self::OutOfPhysicalMemory) is ever recovered
/// from, and only by the single fallback hop of the heap that raised it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("{kind} heap: out of virtual address space for {requested} bytes")]
    OutOfVirtualAddressSpace { kind: HeapKind, requested: u64 },
    #[error("{kind} heap: out of physical memory for {requested} bytes")]
    OutOfPhysicalMemory { kind: HeapKind, requested: u64 },
    #[error("{kind} heap: commit failed: {reason}")]
    CommitFailed { kind: HeapKind, reason: BackingError },
    #[error("{kind} heap: decommit failed: {reason}")]
    DecommitFailed { kind: HeapKind, reason: BackingError },
    #[error("invalid allocation size {0}")]
    InvalidSize(u64),
    #[error("invalid alignment {0}")]
    InvalidAlignment(u64),
    #[error("address {0} is not inside any heap window")]
    UnknownAddress(HeapAddress),
    #[error("block was not handed out by this pool")]
    InvalidBlock,
}

impl HeapError {
    /// The heap the failure happened in, if it is tied to one.
    #[must_use]
    pub const fn kind(&self) -> Option<HeapKind> {
        match self {
            Self::OutOfVirtualAddressSpace { kind, .. }
            | Self::OutOfPhysicalMemory { kind, .. }
            | Self::CommitFailed { kind, .. }
            | Self::DecommitFailed { kind, .. } => Some(*kind),
            Self::InvalidSize(_)
            | Self::InvalidAlignment(_)
            | Self::UnknownAddress(_)
            | Self::InvalidBlock => None,
        }
    }

    /// Whether the heap manager may retry against a fallback heap.
    #[must_use]
    pub const fn is_physical_exhaustion(&self) -> bool {
        matches!(self, Self::OutOfPhysicalMemory { .. })
    }
}

/// Failures reported by a [`PhysicalBacking`](crate::PhysicalBacking).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackingError {
    #[error("physical memory exhausted")]
    Exhausted,
    #[error("{0}")]
    Failed(&'static str),
    #[error("os error {0}")]
    Os(i32),
}

/// Failures while constructing a [`HeapManager`](crate::HeapManager).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] crate::ConfigError),
    #[error("{kind} window reservation failed: {reason}")]
    Reserve { kind: HeapKind, reason: BackingError },
    #[error("{kind} window pre-mapping failed: {reason}")]
    PreMap { kind: HeapKind, reason: BackingError },
}
