//! Common test utilities for the trace-loop integration tests.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};
use optrace::config::TraceConfig;
use optrace::tracer::{spawn_tracee, TraceReport, Tracer};

/// Fork a tracee that performs the traceme/SIGSTOP handshake and then runs
/// `body`, and trace it to completion.
///
/// `body` runs between fork and exit in a process whose sibling test
/// threads may hold allocator locks, so it must not allocate: prepare every
/// CString before calling this and stick to raw libc calls inside.
pub fn trace_child<F: FnOnce()>(cfg: TraceConfig, body: F) -> TraceReport {
    let child = spawn_tracee(move || {
        let _ = ptrace::traceme();
        let _ = raise(Signal::SIGSTOP);
        body();
    })
    .expect("fork failed");
    Tracer::new(child, cfg).run()
}

pub fn cpath(path: &Path) -> CString {
    CString::new(path.as_os_str().as_bytes()).expect("path contains a NUL byte")
}

/// access(2) by number, bypassing whatever the platform libc would route
/// the wrapper through.
pub fn raw_access(path: &CString) {
    unsafe {
        libc::syscall(libc::SYS_access, path.as_ptr(), libc::F_OK);
    }
}

/// open(2) by number; returns the raw result (negative on failure).
pub fn raw_open(path: &CString) -> i64 {
    unsafe { libc::syscall(libc::SYS_open, path.as_ptr(), libc::O_RDONLY) as i64 }
}
