extern crate libc;

pub mod allocator;
pub mod api;
pub mod config;
pub mod global_alloc;
pub mod hardening;
pub mod init;
pub mod large;
pub mod platform;
pub mod slab;
pub mod sync;
pub mod util;

pub use allocator::{AllocError, Heap, HeapStats};
pub use config::Config;
pub use global_alloc::SlotMalloc;
pub use platform::{PageSource, Protection, SystemPages};
pub use slab::context::Counters;
