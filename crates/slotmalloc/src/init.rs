use crate::allocator::Heap;
use crate::config::Config;
use crate::hardening::fork;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

pub static INIT_STATE: AtomicU8 = AtomicU8::new(UNINIT);

/// The heap behind the C entry points and [`SlotMalloc`](crate::SlotMalloc).
static HEAP: Heap = Heap::new(Config::DEFAULT);

/// Library constructor -- called before main().
#[used]
#[cfg_attr(target_os = "linux", link_section = ".init_array")]
static CTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        slotmalloc_init();
    }
    init
};

/// Apply the environment configuration to the process heap, once.
///
/// # Safety
/// Reads the environment with `getenv`.
pub unsafe fn slotmalloc_init() {
    match INIT_STATE.compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {}
        Err(INITIALIZING) => {
            while INIT_STATE.load(Ordering::Acquire) == INITIALIZING {
                core::hint::spin_loop();
            }
            return;
        }
        Err(_) => return,
    }

    let config = Config::from_env();
    HEAP.configure(&config);
    INIT_STATE.store(READY, Ordering::Release);

    // Registration may allocate, so the heap must already be usable.
    fork::register_atfork();
}

#[cold]
#[inline(never)]
pub unsafe fn ensure_initialized() {
    slotmalloc_init();
}

/// The process heap, initialized on first use.
#[inline(always)]
pub fn heap() -> &'static Heap {
    if INIT_STATE.load(Ordering::Acquire) != READY {
        unsafe { ensure_initialized() };
    }
    &HEAP
}

/// The process heap without the initialization check, for fork handlers.
#[inline(always)]
pub(crate) fn heap_unchecked() -> &'static Heap {
    &HEAP
}
