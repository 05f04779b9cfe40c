//! Misuse detection tests for slotmalloc.
//!
//! Every check that fires aborts the process, so each misuse runs in a
//! subprocess: we spawn the test binary with a scenario name and check that
//! the child dies and prints the expected diagnostic.

use slotmalloc::api::{free, malloc, malloc_usable_size, realloc};
use std::ffi::c_void;

/// Run the current test binary with `SLOTMALLOC_HARDENING_SCENARIO` set to
/// `scenario_name` and check that it fails with `expected_msg` on stderr.
fn expect_abort_subprocess(scenario_name: &str, expected_msg: &str) {
    let exe = std::env::current_exe().expect("cannot determine test binary path");

    let output = std::process::Command::new(&exe)
        .env("SLOTMALLOC_HARDENING_SCENARIO", scenario_name)
        .arg("--exact")
        .arg("scenario_driver")
        .arg("--nocapture")
        .env("RUST_TEST_THREADS", "1")
        .output()
        .expect("failed to spawn subprocess");

    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        !output.status.success(),
        "subprocess for scenario '{}' should have aborted, but exited successfully. stderr:\n{}",
        scenario_name,
        stderr
    );
    assert!(
        stderr.contains(expected_msg),
        "subprocess for scenario '{}' stderr does not contain '{}'. Full stderr:\n{}",
        scenario_name,
        expected_msg,
        stderr
    );
}

// ---------------------------------------------------------------------------
// Scenario driver: when SLOTMALLOC_HARDENING_SCENARIO is set, run the
// requested misuse instead of normal test assertions.
// ---------------------------------------------------------------------------

#[test]
fn scenario_driver() {
    let scenario = match std::env::var("SLOTMALLOC_HARDENING_SCENARIO") {
        Ok(s) => s,
        Err(_) => return,
    };

    match scenario.as_str() {
        "double_free" => scenario_double_free(),
        "overflow" => scenario_overflow(),
        "overflow_into_next" => scenario_overflow_into_next(),
        "invalid_free_garbage" => scenario_invalid_free_garbage(),
        "invalid_free_stack" => scenario_invalid_free_stack(),
        "invalid_free_interior" => scenario_invalid_free_interior(),
        "realloc_after_free" => scenario_realloc_after_free(),
        _ => panic!("unknown scenario: {}", scenario),
    }
}

/// Allocate, free, free again. A second live allocation keeps the group
/// from being released in between.
fn scenario_double_free() {
    unsafe {
        let keep = malloc(64);
        let p = malloc(64);
        assert!(!p.is_null() && !keep.is_null());
        free(p);
        free(p);
    }
    unreachable!("double free was not detected");
}

/// Write one byte past a 20-byte request. The slot has 8 bytes of tail, so
/// the byte lands on the zero marker checked at free.
fn scenario_overflow() {
    unsafe {
        let p = malloc(20) as *mut u8;
        assert!(!p.is_null());
        p.add(20).write(0x41);
        free(p as *mut c_void);
    }
    unreachable!("overflow was not detected");
}

/// Fill a slot exactly and run over its end into the next slot's header.
fn scenario_overflow_into_next() {
    unsafe {
        let p = malloc(28) as *mut u8;
        assert!(!p.is_null());
        std::ptr::write_bytes(p, 0x41, 29);
        free(p as *mut c_void);
    }
    unreachable!("overflow was not detected");
}

#[allow(clippy::manual_dangling_ptr)]
fn scenario_invalid_free_garbage() {
    unsafe {
        free(0x1 as *mut c_void);
    }
    unreachable!("invalid free of garbage pointer was not detected");
}

/// Free an aligned, zero-filled stack buffer that looks like a header.
fn scenario_invalid_free_stack() {
    #[repr(C, align(16))]
    struct Fake([u8; 64]);
    unsafe {
        let mut fake = Fake([0; 64]);
        free(fake.0.as_mut_ptr().add(32) as *mut c_void);
        std::hint::black_box(&mut fake);
    }
    unreachable!("invalid free of stack pointer was not detected");
}

/// Free a pointer into the middle of a live allocation.
fn scenario_invalid_free_interior() {
    unsafe {
        let p = malloc(64) as *mut u8;
        std::ptr::write_bytes(p, 0, 64);
        free(p.add(16) as *mut c_void);
    }
    unreachable!("interior free was not detected");
}

fn scenario_realloc_after_free() {
    unsafe {
        let keep = malloc(100);
        let p = malloc(100);
        assert!(!keep.is_null());
        free(p);
        realloc(p, 200);
    }
    unreachable!("realloc after free was not detected");
}

// ---------------------------------------------------------------------------
// Aborting misuse (subprocess)
// ---------------------------------------------------------------------------

#[test]
fn double_free_detected() {
    expect_abort_subprocess("double_free", "double free detected");
}

#[test]
fn overflow_into_tail_detected() {
    expect_abort_subprocess("overflow", "heap overflow detected");
}

#[test]
fn overflow_past_slot_end_detected() {
    expect_abort_subprocess("overflow_into_next", "heap overflow detected");
}

#[test]
fn invalid_free_garbage_detected() {
    expect_abort_subprocess("invalid_free_garbage", "invalid pointer");
}

#[test]
fn invalid_free_stack_detected() {
    expect_abort_subprocess("invalid_free_stack", "invalid pointer");
}

#[test]
fn invalid_free_interior_detected() {
    expect_abort_subprocess("invalid_free_interior", "invalid pointer");
}

#[test]
fn realloc_after_free_detected() {
    expect_abort_subprocess("realloc_after_free", "double free detected");
}

// ---------------------------------------------------------------------------
// Correct use never trips a check
// ---------------------------------------------------------------------------

#[test]
fn writing_the_whole_request_is_fine() {
    unsafe {
        for size in [1usize, 12, 13, 20, 28, 29, 100, 1000, 50_000, 200_000] {
            let p = malloc(size) as *mut u8;
            std::ptr::write_bytes(p, 0xFF, size);
            assert_eq!(malloc_usable_size(p as *mut c_void), size);
            free(p as *mut c_void);
        }
    }
}

#[test]
fn shrinking_then_growing_keeps_the_tail_consistent() {
    unsafe {
        let p = malloc(28) as *mut u8;
        std::ptr::write_bytes(p, 0xFF, 28);
        let q = realloc(p as *mut c_void, 13) as *mut u8;
        assert_eq!(p, q);
        let r = realloc(q as *mut c_void, 28) as *mut u8;
        assert_eq!(q, r);
        std::ptr::write_bytes(r, 0xEE, 28);
        free(r as *mut c_void);
    }
}
