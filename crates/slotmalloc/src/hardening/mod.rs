pub mod fork;

/// Abort with a diagnostic message to stderr.
/// This is used when unrecoverable corruption is detected.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    unsafe {
        // Write directly to stderr fd (2) -- no allocation needed
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}

/// Abort with `slotmalloc: <msg>` unless `cond` holds.
macro_rules! heap_check {
    ($cond:expr, $msg:literal) => {
        if !$cond {
            $crate::hardening::abort_with_message(concat!("slotmalloc: ", $msg, "\n"));
        }
    };
}
pub(crate) use heap_check;

/// A `fmt::Write` sink that writes straight to stderr without buffering.
pub struct StderrSink;

impl core::fmt::Write for StderrSink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            let n = unsafe { libc::write(2, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
            if n <= 0 {
                return Err(core::fmt::Error);
            }
            bytes = &bytes[n as usize..];
        }
        Ok(())
    }
}
