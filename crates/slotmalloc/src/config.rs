/// Tunables for a [`Heap`](crate::Heap).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Freed mappings kept for reuse by later requests of the same length.
    /// Zero disables the retention cache.
    pub map_cache_depth: usize,
    /// Run without locking and with plain mask updates. Only sound while a
    /// single thread uses the heap.
    pub single_threaded: bool,
    /// Give whole pages inside large freed slots back to the OS.
    pub release_free_pages: bool,
}

impl Config {
    pub const DEFAULT: Config = Config {
        map_cache_depth: 8,
        single_threaded: false,
        release_free_pages: true,
    };

    /// Read configuration from environment variables.
    /// Must be called during init, before any allocations.
    ///
    /// # Safety
    /// Calls libc::getenv, which is not thread-safe.
    pub unsafe fn from_env() -> Config {
        let mut config = Config::DEFAULT;
        if let Some(val) = getenv_usize(b"SLOTMALLOC_MAP_CACHE\0") {
            config.map_cache_depth = val.min(crate::large::cache::MAX_DEPTH);
        }
        if is_set(b"SLOTMALLOC_SINGLE_THREADED\0") {
            config.single_threaded = true;
        }
        if is_set(b"SLOTMALLOC_NO_PAGE_RELEASE\0") {
            config.release_free_pages = false;
        }
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}

unsafe fn is_set(key: &[u8]) -> bool {
    !libc::getenv(key.as_ptr() as *const libc::c_char).is_null()
}

/// Parse an environment variable as a usize.
///
/// # Safety
/// Calls libc::getenv.
unsafe fn getenv_usize(key: &[u8]) -> Option<usize> {
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return None;
    }
    parse_usize(val as *const u8)
}

/// Parse a NUL-terminated decimal string without allocating.
unsafe fn parse_usize(mut ptr: *const u8) -> Option<usize> {
    let mut result: usize = 0;
    let mut digits = 0;
    loop {
        let byte = *ptr;
        if byte == 0 {
            break;
        }
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
        digits += 1;
        ptr = ptr.add(1);
    }
    if digits == 0 {
        None
    } else {
        Some(result)
    }
}
