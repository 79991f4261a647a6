mod common;

use common::{PAGE, assert_disjoint, small_config};
use heap_alloc::{
    Block, ConfigError, HeapConfig, HeapError, HeapKind, HeapManager, SimulatedBacking,
    SmallBlockConfig, SmallBlockPool,
};
use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;

const POOL: SmallBlockConfig = SmallBlockConfig {
    page_size: PAGE,
    max_block_size: 1024,
};

fn heaps() -> HeapManager<SimulatedBacking> {
    HeapManager::new(SimulatedBacking::new(), small_config(64)).unwrap()
}

#[test]
fn sixty_five_small_blocks_need_two_pages() {
    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();

    let blocks: Vec<Block> = (0..65)
        .map(|_| pool.allocate(60, HeapKind::GpuPrimary).unwrap())
        .collect();

    assert_eq!(pool.page_count(HeapKind::GpuPrimary, 60), 2);
    assert!(blocks.iter().all(|b| b.padded_size() == 64 && b.requested_size() == 60));

    let distinct: HashSet<_> = blocks.iter().map(Block::address).collect();
    assert_eq!(distinct.len(), 65);

    let mut ranges: Vec<_> = blocks
        .iter()
        .map(|b| (b.address().as_u64(), b.padded_size()))
        .collect();
    assert_disjoint(&mut ranges);

    // One 4 KiB pool page per 64 blocks, each a live heap allocation.
    let report = heaps.report();
    assert_eq!(report.kind(HeapKind::GpuPrimary).live_allocations, 2);
    assert_eq!(report.kind(HeapKind::GpuPrimary).in_use_bytes, 2 * PAGE);
}

#[test]
fn freeing_into_a_full_page_relinks_it_first() {
    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();

    let first_page: Vec<Block> = (0..64)
        .map(|_| pool.allocate(64, HeapKind::Cpu).unwrap())
        .collect();
    let second = pool.allocate(64, HeapKind::Cpu).unwrap();
    assert_eq!(pool.page_count(HeapKind::Cpu, 64), 2);

    // The first page was full and unlinked; freeing puts it at the head.
    pool.free(first_page[10]).unwrap();
    let again = pool.allocate(64, HeapKind::Cpu).unwrap();
    assert_eq!(again.address(), first_page[10].address());
    assert_eq!(again.page(), first_page[10].page());

    // The first page is full again; the next block comes from the second page.
    let next = pool.allocate(64, HeapKind::Cpu).unwrap();
    assert_eq!(next.page(), second.page());
    assert_eq!(pool.page_count(HeapKind::Cpu, 64), 2);
}

#[test]
fn empty_pages_are_retained() {
    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();

    let b = pool.allocate(200, HeapKind::GpuCoherent).unwrap();
    assert_eq!(b.padded_size(), 256);
    pool.free(b).unwrap();

    assert_eq!(pool.page_count(HeapKind::GpuCoherent, 200), 1);
    let stats = pool.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].kind, HeapKind::GpuCoherent);
    assert_eq!(stats[0].block_size, 256);
    assert_eq!(stats[0].live_blocks, 0);
    assert_eq!(stats[0].pages_with_space, 1);
    assert_eq!(heaps.report().kind(HeapKind::GpuCoherent).live_allocations, 1);

    // The retained page is reused rather than a new one requested.
    let c = pool.allocate(256, HeapKind::GpuCoherent).unwrap();
    assert_eq!(c.address(), b.address());
    assert_eq!(heaps.report().kind(HeapKind::GpuCoherent).live_allocations, 1);
}

#[test]
fn classes_and_kinds_do_not_share_pages() {
    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();

    let a = pool.allocate(8, HeapKind::Cpu).unwrap();
    let b = pool.allocate(16, HeapKind::Cpu).unwrap();
    let c = pool.allocate(8, HeapKind::Flexible).unwrap();
    assert_eq!(a.padded_size(), 8);
    assert_eq!(b.padded_size(), 16);
    assert_eq!(heaps.kind_of(c.address()), Some(HeapKind::Flexible));
    assert_eq!(pool.stats().len(), 3);

    // Sub-minimum requests use the smallest class.
    assert_eq!(pool.allocate(1, HeapKind::Cpu).unwrap().padded_size(), 8);
}

#[test]
fn requests_above_the_ceiling_use_whole_pages() {
    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();

    let big = pool.allocate(5000, HeapKind::GpuPrimary).unwrap();
    assert_eq!(big.page(), None);
    assert_eq!(big.padded_size(), 2 * PAGE);
    assert!(heaps.backing().is_committed(HeapKind::GpuPrimary, big.address(), 2 * PAGE));
    assert!(pool.stats().is_empty());

    pool.free(big).unwrap();
    assert_eq!(heaps.report().kind(HeapKind::GpuPrimary).live_allocations, 0);
}

#[test]
fn null_blocks_are_inert() {
    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();

    let null = pool.allocate(0, HeapKind::Cpu).unwrap();
    assert!(null.is_null());
    assert_eq!(null, Block::null(HeapKind::Cpu));
    assert_eq!(pool.resolve(&null), None);
    pool.free(null).unwrap();
    assert!(pool.stats().is_empty());
}

#[test]
fn double_free_is_detected() {
    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();

    let keep = pool.allocate(32, HeapKind::Cpu).unwrap();
    let b = pool.allocate(32, HeapKind::Cpu).unwrap();
    pool.free(b).unwrap();
    assert_eq!(pool.free(b), Err(HeapError::InvalidBlock));
    pool.free(keep).unwrap();
}

#[test]
fn dropping_the_pool_returns_its_pages() {
    let heaps = heaps();
    {
        let pool = SmallBlockPool::new(&heaps, POOL).unwrap();
        for size in [8, 64, 512, 1024] {
            pool.allocate(size, HeapKind::GpuPrimary).unwrap();
        }
        assert_eq!(heaps.report().kind(HeapKind::GpuPrimary).live_allocations, 4);
    }
    assert_eq!(heaps.report().kind(HeapKind::GpuPrimary).live_allocations, 0);
    assert_eq!(heaps.backing().committed_bytes(HeapKind::GpuPrimary), 0);
}

#[test]
fn pool_page_must_cover_heap_pages() {
    let heaps = HeapManager::new(SimulatedBacking::new(), HeapConfig::default()).unwrap();
    assert!(matches!(
        SmallBlockPool::new(&heaps, POOL),
        Err(ConfigError::PoolPageTooSmall)
    ));
    assert!(SmallBlockPool::new(&heaps, SmallBlockConfig::default()).is_ok());
}

#[test]
fn concurrent_allocations_are_unique() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let heaps = heaps();
    let pool = SmallBlockPool::new(&heaps, POOL).unwrap();
    let start = Barrier::new(THREADS);

    let all: Vec<Block> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = &pool;
                let start = &start;
                s.spawn(move || {
                    start.wait();
                    let mut mine = Vec::with_capacity(PER_THREAD);
                    for i in 0..PER_THREAD {
                        let b = pool.allocate(16 + (t as u64 % 3) * 16, HeapKind::Cpu).unwrap();
                        // Churn: give every other block straight back.
                        if i % 2 == 0 {
                            pool.free(b).unwrap();
                        } else {
                            mine.push(b);
                        }
                    }
                    mine
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(all.len(), THREADS * PER_THREAD / 2);
    let mut ranges: Vec<_> = all
        .iter()
        .map(|b| (b.address().as_u64(), b.padded_size()))
        .collect();
    assert_disjoint(&mut ranges);

    for b in all {
        pool.free(b).unwrap();
    }
    assert!(pool.stats().iter().all(|s| s.live_blocks == 0));
}
