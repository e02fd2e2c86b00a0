//! A bad release must stop the process. Each test re-runs itself in a child
//! process that does the bad release, and checks that the child died instead
//! of carrying on.

use std::{env, process::Command};

use heapalloc::{Allocator, HEADER_SIZE, Region};

/// Set in the child so the test knows which side it is running on.
const CHILD: &str = "HEAPALLOC_INTEGRITY_CHILD";

/// Marker the child prints if it survived the bad call.
const SURVIVED: &str = "survived bad release";

fn run_in_child(test: &str, body: impl FnOnce()) {
    if env::var_os(CHILD).is_some() {
        body();
        println!("{SURVIVED}");
        return;
    }

    let exe = env::current_exe().unwrap();
    let output = Command::new(exe)
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD, "1")
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "child exited cleanly:\n{stdout}\n{stderr}");
    assert!(!stdout.contains(SURVIVED), "child kept running:\n{stdout}");
    assert!(stderr.contains("MEMORY CORRUPTION DETECTED"), "no report on stderr:\n{stderr}");
}

fn allocator() -> Allocator<Region<'static>> {
    let memory = Box::leak(vec![0u8; 4096].into_boxed_slice());
    Allocator::new(Region::new(memory))
}

#[test]
fn double_release_aborts() {
    run_in_child("double_release_aborts", || {
        let mut allocator = allocator();
        let ptr = allocator.allocate(64).unwrap();

        unsafe {
            allocator.release(ptr.as_ptr());
            allocator.release(ptr.as_ptr());
        }
    });
}

#[test]
fn foreign_pointer_aborts() {
    run_in_child("foreign_pointer_aborts", || {
        let mut allocator = allocator();
        let ptr = allocator.allocate(128).unwrap();

        // Aligned, inside our heap, but not the start of a payload.
        unsafe { allocator.release(ptr.as_ptr().add(64)) };
    });
}

#[test]
fn corrupted_header_aborts_resize() {
    run_in_child("corrupted_header_aborts_resize", || {
        let mut allocator = allocator();
        let ptr = allocator.allocate(32).unwrap();

        unsafe {
            // Scribble over the whole header, as a buffer underflow would.
            ptr.as_ptr().sub(HEADER_SIZE).write_bytes(0x41, HEADER_SIZE);
            let _ = allocator.resize(ptr.as_ptr(), 256);
        }
    });
}

#[test]
fn misaligned_pointer_aborts() {
    run_in_child("misaligned_pointer_aborts", || {
        let mut allocator = allocator();
        let ptr = allocator.allocate(32).unwrap();

        unsafe { allocator.release(ptr.as_ptr().add(1)) };
    });
}

#[test]
fn valid_release_does_not_abort() {
    let mut allocator = allocator();
    let ptr = allocator.allocate(64).unwrap();

    unsafe {
        assert!(allocator.usable_size(ptr).is_ok());
        allocator.release(ptr.as_ptr());
        assert!(allocator.usable_size(ptr).is_err());
    }
}
