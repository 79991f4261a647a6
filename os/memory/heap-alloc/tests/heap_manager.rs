mod common;

use common::{CPU_BASE, FRAME_BUFFER_BASE, PAGE, Rng, assert_disjoint, small_config};
use heap_alloc::{
    BackingError, ConfigError, HeapAddress, HeapConfig, HeapError, HeapKind, HeapKindConfig,
    HeapManager, InitError, PhysicalBacking, SimulatedBacking,
};

fn cpu_page(n: u64) -> HeapAddress {
    HeapAddress::new(CPU_BASE + n * PAGE)
}

#[test]
fn eight_page_window_fills_and_reuses() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();

    let first = heaps.allocate(HeapKind::Cpu, 3 * PAGE, PAGE).unwrap();
    assert_eq!(first, cpu_page(0));
    assert_eq!(heaps.allocate(HeapKind::Cpu, 2 * PAGE, PAGE).unwrap(), cpu_page(4));
    assert_eq!(heaps.allocate(HeapKind::Cpu, 2 * PAGE, PAGE).unwrap(), cpu_page(6));

    assert_eq!(
        heaps.allocate(HeapKind::Cpu, PAGE, PAGE),
        Err(HeapError::OutOfVirtualAddressSpace {
            kind: HeapKind::Cpu,
            requested: PAGE
        })
    );

    heaps.free(first, 3 * PAGE).unwrap();
    assert_eq!(heaps.allocate(HeapKind::Cpu, 4 * PAGE, PAGE).unwrap(), cpu_page(0));
}

#[test]
fn sizes_round_up_to_whole_pages() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    let a = heaps.allocate(HeapKind::Cpu, 100, 0).unwrap();
    assert!(heaps.backing().is_committed(HeapKind::Cpu, a, PAGE));
    assert_eq!(heaps.report().kind(HeapKind::Cpu).in_use_bytes, PAGE);

    heaps.free(a, 100).unwrap();
    assert_eq!(heaps.backing().committed_bytes(HeapKind::Cpu), 0);
    assert_eq!(heaps.allocate(HeapKind::Cpu, 0, 0), Err(HeapError::InvalidSize(0)));
}

#[test]
fn commit_happens_with_reservation_and_decommit_with_free() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(16)).unwrap();
    let a = heaps.allocate(HeapKind::Cpu, 2 * PAGE, 0).unwrap();
    let b = heaps.allocate(HeapKind::Cpu, 5 * PAGE, 0).unwrap();
    assert!(heaps.backing().is_committed(HeapKind::Cpu, a, 2 * PAGE));
    assert!(heaps.backing().is_committed(HeapKind::Cpu, b, 5 * PAGE));
    assert_eq!(heaps.backing().committed_bytes(HeapKind::Cpu), 7 * PAGE);

    heaps.free(a, 2 * PAGE).unwrap();
    assert!(!heaps.backing().is_committed(HeapKind::Cpu, a, 2 * PAGE));
    heaps.free(b, 5 * PAGE).unwrap();
    assert_eq!(heaps.backing().committed_bytes(HeapKind::Cpu), 0);
}

#[test]
fn gpu_coherent_falls_back_to_flexible() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    heaps.backing().set_exhausted(HeapKind::GpuCoherent, true);

    let a = heaps.allocate(HeapKind::GpuCoherent, PAGE, 0).unwrap();
    assert_eq!(heaps.kind_of(a), Some(HeapKind::Flexible));

    let report = heaps.report();
    assert_eq!(report.kind(HeapKind::GpuCoherent).fallbacks_out, 1);
    assert_eq!(report.kind(HeapKind::GpuCoherent).live_allocations, 0);
    assert_eq!(report.kind(HeapKind::GpuCoherent).free_bytes, 64 * PAGE);
    assert_eq!(report.kind(HeapKind::Flexible).fallbacks_in, 1);
    assert_eq!(report.kind(HeapKind::Flexible).live_allocations, 1);

    heaps.free(a, PAGE).unwrap();
    assert_eq!(heaps.report().kind(HeapKind::Flexible).live_allocations, 0);
}

#[test]
fn gpu_primary_falls_back_to_frame_buffer_when_over_budget() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();

    // The budget is 16 pages.
    let big = heaps.allocate(HeapKind::GpuPrimary, 16 * PAGE, 0).unwrap();
    assert_eq!(heaps.kind_of(big), Some(HeapKind::GpuPrimary));

    let spill = heaps.allocate(HeapKind::GpuPrimary, PAGE, 0).unwrap();
    assert_eq!(heaps.kind_of(spill), Some(HeapKind::FrameBuffer));
    assert!(spill.as_u64() >= FRAME_BUFFER_BASE);

    // Pre-mapped: the only commit is the one made at construction.
    assert_eq!(heaps.backing().commit_count(HeapKind::FrameBuffer), 1);
    assert_eq!(heaps.report().kind(HeapKind::FrameBuffer).committed_bytes, 64 * PAGE);

    heaps.free(spill, PAGE).unwrap();
    heaps.free(big, 16 * PAGE).unwrap();
    assert_eq!(heaps.allocate(HeapKind::GpuPrimary, PAGE, 0).map(|a| heaps.kind_of(a)), Ok(Some(HeapKind::GpuPrimary)));
}

#[test]
fn heaps_without_fallback_fail_hard() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    heaps.backing().set_exhausted(HeapKind::Cpu, true);

    assert_eq!(
        heaps.allocate(HeapKind::Cpu, PAGE, 0),
        Err(HeapError::OutOfPhysicalMemory {
            kind: HeapKind::Cpu,
            requested: PAGE
        })
    );

    let report = heaps.report();
    let cpu = report.kind(HeapKind::Cpu);
    assert_eq!(cpu.failures, 1);
    assert_eq!(cpu.fallbacks_out, 0);
    // The virtual reservation was rolled back.
    assert_eq!(cpu.free_bytes, 8 * PAGE);
    assert_eq!(cpu.free_runs, 1);
}

#[test]
fn exhausted_fallback_reports_the_fallback_heap() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    heaps.backing().set_exhausted(HeapKind::GpuCoherent, true);
    heaps.backing().set_exhausted(HeapKind::Flexible, true);

    assert_eq!(
        heaps.allocate(HeapKind::GpuCoherent, PAGE, 0),
        Err(HeapError::OutOfPhysicalMemory {
            kind: HeapKind::Flexible,
            requested: PAGE
        })
    );
    assert_eq!(heaps.report().kind(HeapKind::Flexible).failures, 1);
}

#[test]
fn commit_failure_does_not_fall_back() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    heaps.backing().fail_next_commit(HeapKind::GpuCoherent);

    assert!(matches!(
        heaps.allocate(HeapKind::GpuCoherent, PAGE, 0),
        Err(HeapError::CommitFailed {
            kind: HeapKind::GpuCoherent,
            reason: BackingError::Failed(_)
        })
    ));
    assert_eq!(heaps.report().kind(HeapKind::Flexible).fallbacks_in, 0);
    assert!(heaps.allocate(HeapKind::GpuCoherent, PAGE, 0).is_ok());
}

#[test]
fn virtual_exhaustion_does_not_fall_back() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    let err = heaps.allocate(HeapKind::GpuPrimary, 128 * PAGE, 0).unwrap_err();
    assert_eq!(
        err,
        HeapError::OutOfVirtualAddressSpace {
            kind: HeapKind::GpuPrimary,
            requested: 128 * PAGE
        }
    );
}

#[test]
fn free_rejects_foreign_and_unallocated_addresses() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    let outside = HeapAddress::new(0x10);
    assert_eq!(heaps.free(outside, PAGE), Err(HeapError::UnknownAddress(outside)));

    let never = cpu_page(2);
    assert_eq!(heaps.free(never, PAGE), Err(HeapError::UnknownAddress(never)));
    assert_eq!(heaps.backing().committed_bytes(HeapKind::Cpu), 0);
}

#[test]
fn alignment_holds_for_every_power_of_two() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(256)).unwrap();
    // Offset the window so alignment actually matters.
    heaps.allocate(HeapKind::Cpu, PAGE, 0).unwrap();

    let mut alignment = 1;
    while alignment <= 64 * PAGE {
        let a = heaps.allocate(HeapKind::Cpu, PAGE, alignment).unwrap();
        assert!(a.is_aligned(alignment), "{a} not aligned to {alignment:#x}");
        heaps.free(a, PAGE).unwrap();
        alignment <<= 1;
    }
    assert_eq!(heaps.allocate(HeapKind::Cpu, PAGE, 3 * PAGE), Err(HeapError::InvalidAlignment(3 * PAGE)));
}

#[test]
fn free_then_allocate_same_size_succeeds() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(8)).unwrap();
    let a = heaps.allocate(HeapKind::Cpu, 8 * PAGE, 0).unwrap();
    heaps.free(a, 8 * PAGE).unwrap();
    let b = heaps.allocate(HeapKind::Cpu, 8 * PAGE, 0).unwrap();
    assert_eq!(a, b);
}

#[test]
fn random_workload_never_overlaps_and_drains_to_empty() {
    let heaps = HeapManager::new(SimulatedBacking::new(), small_config(512)).unwrap();
    let mut rng = Rng::new(0x9E37_79B9_7F4A_7C15);
    let mut live: Vec<(HeapAddress, u64)> = Vec::new();

    for _ in 0..3_000 {
        if rng.below(5) < 3 || live.is_empty() {
            let size = (rng.below(9) + 1) * PAGE;
            if let Ok(a) = heaps.allocate(HeapKind::Cpu, size, 0) {
                live.push((a, size));
            }
        } else {
            let (a, size) = live.swap_remove(rng.below(live.len() as u64) as usize);
            heaps.free(a, size).unwrap();
        }

        if live.len() % 64 == 0 {
            let mut ranges: Vec<_> = live.iter().map(|(a, s)| (a.as_u64(), *s)).collect();
            assert_disjoint(&mut ranges);
        }
    }

    let mut ranges: Vec<_> = live.iter().map(|(a, s)| (a.as_u64(), *s)).collect();
    assert_disjoint(&mut ranges);

    for (a, size) in live.drain(..) {
        heaps.free(a, size).unwrap();
    }
    let report = heaps.report();
    let cpu = report.kind(HeapKind::Cpu);
    assert_eq!(cpu.live_allocations, 0);
    assert_eq!(cpu.free_bytes, 512 * PAGE);
    assert_eq!(cpu.free_runs, 1);
    assert_eq!(heaps.backing().committed_bytes(HeapKind::Cpu), 0);
}

#[test]
fn report_renders_every_heap() {
    let heaps = HeapManager::new(SimulatedBacking::new(), HeapConfig::default()).unwrap();
    heaps.allocate(HeapKind::GpuPrimary, 1 << 20, 0).unwrap();
    let text = heaps.report().to_string();
    for kind in HeapKind::ALL {
        assert!(text.contains(kind.name()), "missing {kind} in\n{text}");
    }
    assert!(text.contains("1 MiB"), "{text}");
}

#[test]
fn drop_releases_every_window() {
    let backing = SimulatedBacking::new();
    {
        let heaps = HeapManager::new(&backing, small_config(8)).unwrap();
        heaps.allocate(HeapKind::Cpu, PAGE, 0).unwrap();
        for kind in HeapKind::ALL {
            assert!(backing.is_reserved(kind));
        }
    }
    for kind in HeapKind::ALL {
        assert!(!backing.is_reserved(kind));
        assert_eq!(backing.committed_bytes(kind), 0);
    }
}

#[test]
fn failed_construction_releases_reserved_windows() {
    let backing = SimulatedBacking::new();
    let fb = small_config(8).kind(HeapKind::FrameBuffer).window();
    backing
        .reserve_window(HeapKind::FrameBuffer, fb.start, fb.length)
        .unwrap();

    let err = HeapManager::new(&backing, small_config(8)).err();
    assert_eq!(
        err,
        Some(InitError::Reserve {
            kind: HeapKind::FrameBuffer,
            reason: BackingError::Failed("window already reserved")
        })
    );
    assert!(!backing.is_reserved(HeapKind::Cpu));
    assert!(!backing.is_reserved(HeapKind::GpuCoherent));
}

#[test]
fn invalid_configuration_is_rejected() {
    let config = small_config(8).with_kind(
        HeapKind::Flexible,
        HeapKindConfig::new(CPU_BASE, 8 * PAGE, PAGE, None),
    );
    let err = HeapManager::new(SimulatedBacking::new(), config).err();
    assert_eq!(
        err,
        Some(InitError::Config(ConfigError::WindowsOverlap(
            HeapKind::Cpu,
            HeapKind::Flexible
        )))
    );
}
