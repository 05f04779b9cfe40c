/// cfrac-style workload: the allocation pattern of continued fraction
/// factorization, with many short-lived bignum-sized blocks that grow by
/// small steps. Runs on a private single-threaded heap.
///
/// Usage: cfrac [iterations]
use slotmalloc::{Config, Heap};
use std::ptr::NonNull;
use std::time::Instant;

const DEFAULT_ITERATIONS: usize = 5_000_000;

fn main() {
    let iterations: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_ITERATIONS);

    println!("cfrac-style workload: {} iterations", iterations);

    let heap = Heap::new(Config {
        single_threaded: true,
        ..Config::DEFAULT
    });
    let start = Instant::now();
    let mut active: Vec<(NonNull<u8>, usize)> = Vec::new();
    let mut rng: u64 = 12345;
    let mut in_place = 0usize;

    for i in 0..iterations {
        let op = next_random(&mut rng) % 100;

        if op < 40 || active.is_empty() {
            let size = 16 + (next_random(&mut rng) as usize % 112);
            if let Ok(p) = heap.allocate(size) {
                unsafe { std::ptr::write_bytes(p.as_ptr(), 0, size) };
                active.push((p, size));
            }
        } else if op < 60 {
            let idx = next_random(&mut rng) as usize % active.len();
            let (p, _) = active.swap_remove(idx);
            unsafe { heap.deallocate(p.as_ptr()) };
        } else if op < 80 {
            let idx = next_random(&mut rng) as usize % active.len();
            let (p, old_size) = active[idx];
            let new_size = old_size + 16 + (next_random(&mut rng) as usize % 64);
            if let Ok(q) = unsafe { heap.reallocate(p.as_ptr(), new_size) } {
                if q == p {
                    in_place += 1;
                }
                active[idx] = (q, new_size);
            }
        } else {
            let size = 32 + (next_random(&mut rng) as usize % 96);
            if let Ok(p) = heap.allocate_zeroed(1, size) {
                active.push((p, size));
            }
        }

        if i % 50000 == 49999 {
            for (p, _) in active.drain(..) {
                unsafe { heap.deallocate(p.as_ptr()) };
            }
        }
    }

    for (p, _) in active {
        unsafe { heap.deallocate(p.as_ptr()) };
    }

    let elapsed = start.elapsed();
    let ops_sec = iterations as f64 / elapsed.as_secs_f64();
    println!(
        "Elapsed: {:.3}s ({:.2} Mops/sec), {} resizes in place",
        elapsed.as_secs_f64(),
        ops_sec / 1_000_000.0,
        in_place
    );
    let stats = heap.stats();
    println!(
        "Groups left: {}, free records: {}, record areas: {}",
        stats.ring_len_by_class.iter().sum::<usize>(),
        stats.free_metas,
        stats.meta_areas
    );
}

fn next_random(rng: &mut u64) -> u64 {
    *rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    *rng >> 33
}
