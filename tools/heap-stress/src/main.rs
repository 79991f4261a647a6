use heap_alloc::{
    AtomicFence, Bytes, DeferredFreeQueue, FenceValue, HeapConfig, HeapKind, HeapManager,
    PhysicalBacking, SimulatedBacking, SmallBlockConfig, SmallBlockPool,
};
use heap_logger::StderrLogger;
use log::{LevelFilter, info, warn};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use std::{env, thread};

/// Frames the simulated GPU runs behind the producers.
const GPU_LAG: u64 = 2;

const KINDS: [HeapKind; 4] = [
    HeapKind::Cpu,
    HeapKind::GpuPrimary,
    HeapKind::GpuCoherent,
    HeapKind::Flexible,
];

struct Options {
    threads: usize,
    frames: usize,
    blocks_per_frame: usize,
    simulated: bool,
}

impl Options {
    // args: [threads] [frames] [blocks-per-frame] [--simulated]
    fn from_args() -> Result<Self, Box<dyn Error>> {
        let mut simulated = false;
        let mut numbers = Vec::new();
        for arg in env::args().skip(1) {
            if arg == "--simulated" {
                simulated = true;
            } else {
                numbers.push(arg.parse::<usize>().map_err(|e| format!("{arg}: {e}"))?);
            }
        }
        let mut numbers = numbers.into_iter();
        Ok(Self {
            threads: numbers.next().unwrap_or(4),
            frames: numbers.next().unwrap_or(200),
            blocks_per_frame: numbers.next().unwrap_or(256),
            simulated,
        })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    StderrLogger::from_env(LevelFilter::Info).init()?;
    let options = Options::from_args()?;

    if options.simulated {
        run(SimulatedBacking::new(), &options)
    } else {
        run_host(&options)
    }
}

#[cfg(unix)]
fn run_host(options: &Options) -> Result<(), Box<dyn Error>> {
    run(heap_alloc::OsBacking::new(), options)
}

#[cfg(not(unix))]
fn run_host(options: &Options) -> Result<(), Box<dyn Error>> {
    warn!("no host backing on this platform, using the simulated one");
    run(SimulatedBacking::new(), options)
}

fn run<B: PhysicalBacking>(backing: B, options: &Options) -> Result<(), Box<dyn Error>> {
    let heaps = HeapManager::new(backing, HeapConfig::default())?;
    let pool = SmallBlockPool::new(&heaps, SmallBlockConfig::default())?;
    let deferred = DeferredFreeQueue::new(&pool);
    let gpu = AtomicFence::new();
    let running = AtomicUsize::new(options.threads);

    info!(
        "{} threads x {} frames x {} blocks",
        options.threads, options.frames, options.blocks_per_frame
    );
    let started = Instant::now();

    let reaped = thread::scope(|s| -> Result<usize, heap_alloc::HeapError> {
        let workers: Vec<_> = (0..options.threads)
            .map(|t| {
                let (pool, deferred, gpu, running) = (&pool, &deferred, &gpu, &running);
                s.spawn(move || {
                    let result = produce(pool, deferred, gpu, options, t as u64);
                    running.fetch_sub(1, Ordering::Release);
                    result
                })
            })
            .collect();

        // The GPU: finish work a few frames late and reap what it finished.
        let mut reaped = 0;
        while running.load(Ordering::Acquire) > 0 {
            let submitted = gpu.submit();
            // Fence 0 is never handed out, so the lag floors at "nothing done".
            gpu.signal(FenceValue::new(submitted.as_u64().saturating_sub(GPU_LAG)));
            reaped += deferred.reap_from(&gpu)?;
            thread::sleep(Duration::from_millis(1));
        }

        for worker in workers {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => warn!("worker thread panicked"),
            }
        }
        Ok(reaped)
    })?;

    let remaining = deferred.drain_all()?;
    let elapsed = started.elapsed();
    let total = options.threads * options.frames * options.blocks_per_frame;
    info!(
        "{total} blocks in {elapsed:.2?}; {reaped} reaped behind the fence, {remaining} drained at the end"
    );

    let report = heaps.report();
    println!("{report}");
    println!(
        "committed {} / in use {}",
        Bytes(report.total_committed()),
        Bytes(report.total_in_use())
    );
    Ok(())
}

/// One producer thread: every frame allocates a batch across the heap kinds
/// and releases last frame's batch behind the current fence.
fn produce<B: PhysicalBacking>(
    pool: &SmallBlockPool<'_, B>,
    deferred: &DeferredFreeQueue<'_, '_, B>,
    gpu: &AtomicFence,
    options: &Options,
    seed: u64,
) -> Result<(), heap_alloc::HeapError> {
    let mut rng = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let mut previous = Vec::with_capacity(options.blocks_per_frame);

    for _ in 0..options.frames {
        let fence = gpu.current();
        for block in previous.drain(..) {
            deferred.enqueue(block, fence);
        }

        for _ in 0..options.blocks_per_frame {
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;

            let kind = KINDS[(rng % 4) as usize];
            // Mostly small blocks with the occasional multi-page one.
            let size = if rng % 256 == 0 {
                64 * 1024 + (rng >> 8) % (1024 * 1024)
            } else {
                1 + (rng >> 8) % 4096
            };
            previous.push(pool.allocate(size, kind)?);
        }
    }

    for block in previous {
        deferred.enqueue(block, gpu.current());
    }
    Ok(())
}
