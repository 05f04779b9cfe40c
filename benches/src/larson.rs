/// Larson-style workload: every thread keeps a window of live allocations
/// and replaces random members of it, while a share of the window is handed
/// to the next thread so that releases cross threads.
///
/// Usage: larson [threads] [seconds]
use slotmalloc::Heap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_DURATION_SECS: u64 = 5;
const WINDOW: usize = 1000;
const HANDOFF: usize = 64;
const MIN_SIZE: usize = 8;
const MAX_SIZE: usize = 512;

struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}

type Mailbox = Mutex<Vec<SendPtr>>;

fn main() {
    let num_threads: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4)
        .max(1);
    let duration_secs: u64 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_DURATION_SECS);

    println!("Larson workload: {} threads, {} seconds", num_threads, duration_secs);

    let heap = slotmalloc::init::heap();
    let running = Arc::new(AtomicBool::new(true));
    let total_ops = Arc::new(AtomicUsize::new(0));
    let mailboxes: Arc<Vec<Mailbox>> =
        Arc::new((0..num_threads).map(|_| Mutex::new(Vec::new())).collect());

    let handles: Vec<_> = (0..num_threads)
        .map(|tid| {
            let running = Arc::clone(&running);
            let total_ops = Arc::clone(&total_ops);
            let mailboxes = Arc::clone(&mailboxes);
            std::thread::spawn(move || worker(heap, tid, &running, &total_ops, &mailboxes))
        })
        .collect();

    let start = Instant::now();
    std::thread::sleep(Duration::from_secs(duration_secs));
    running.store(false, Ordering::Release);

    for h in handles {
        h.join().unwrap();
    }
    for mailbox in mailboxes.iter() {
        for p in mailbox.lock().unwrap().drain(..) {
            unsafe { heap.deallocate(p.0) };
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    let ops = total_ops.load(Ordering::Relaxed);
    let mops = ops as f64 / elapsed / 1_000_000.0;

    println!("Total operations: {}", ops);
    println!("Throughput: {:.2} Mops/sec", mops);
    println!("Per-thread: {:.2} Mops/sec", mops / num_threads as f64);
    let stats = heap.stats();
    println!(
        "Mapped after run: {} ({} bytes), {} retained",
        stats.counters.mapped_count, stats.counters.mapped_bytes, stats.retained_maps
    );
}

fn worker(heap: &Heap, tid: usize, running: &AtomicBool, total_ops: &AtomicUsize, mailboxes: &[Mailbox]) {
    let mut rng = (tid as u64).wrapping_mul(6364136223846793005).wrapping_add(1);
    let next = &mailboxes[(tid + 1) % mailboxes.len()];
    let mut window: Vec<*mut u8> = (0..WINDOW).map(|_| fresh(heap, &mut rng, 0xAB)).collect();
    let mut ops = 0usize;
    let mut round = 0usize;

    while running.load(Ordering::Relaxed) {
        round += 1;
        let idx = next_random(&mut rng) as usize % window.len();
        unsafe { heap.deallocate(window[idx]) };
        window[idx] = fresh(heap, &mut rng, 0xCD);
        ops += 2;

        if round % 1024 == 0 {
            // Pass some live blocks on and release whatever was passed to us.
            let outgoing: Vec<SendPtr> = (0..HANDOFF)
                .map(|i| {
                    let p = window[i];
                    window[i] = fresh(heap, &mut rng, 0xEF);
                    SendPtr(p)
                })
                .collect();
            next.lock().unwrap().extend(outgoing);
            let incoming: Vec<SendPtr> = mailboxes[tid].lock().unwrap().drain(..).collect();
            ops += HANDOFF + incoming.len();
            for p in incoming {
                unsafe { heap.deallocate(p.0) };
            }
        }
        if ops >= 10000 {
            total_ops.fetch_add(ops, Ordering::Relaxed);
            ops = 0;
        }
    }
    total_ops.fetch_add(ops, Ordering::Relaxed);

    for p in window {
        unsafe { heap.deallocate(p) };
    }
}

fn fresh(heap: &Heap, rng: &mut u64, fill: u8) -> *mut u8 {
    let size = MIN_SIZE + next_random(rng) as usize % (MAX_SIZE - MIN_SIZE);
    match heap.allocate(size) {
        Ok(p) => {
            unsafe { std::ptr::write_bytes(p.as_ptr(), fill, size.min(16)) };
            p.as_ptr()
        }
        Err(e) => panic!("allocation of {} bytes failed: {}", size, e),
    }
}

fn next_random(rng: &mut u64) -> u64 {
    *rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    *rng >> 33
}
