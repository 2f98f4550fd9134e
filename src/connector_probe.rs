//! The child side of a trace: load the connector and walk it through the
//! init/options/connect sequence that makes it read its option files.
//!
//! The probe never interprets the connector's results beyond pass/fail of
//! its own steps; the point of each call is the file-access syscalls it
//! provokes, which the parent observes from outside. Every call into the
//! connector goes through a dynamically resolved function pointer, which
//! the optimizer cannot see through or elide.

use std::ffi::{c_char, c_int, c_uint, c_ulong, c_void, CString};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process;
use std::ptr;

use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};

use crate::config::SENTINEL_PREFIX;

/// Opaque connector handle; the probe only ever passes it back into the
/// library.
#[repr(C)]
pub struct Mysql {
    _opaque: [u8; 0],
}

/// `mysql_option` discriminant selecting "read the default option-file
/// group". MySQL and MariaDB agree on the early values of that enum.
const MYSQL_READ_DEFAULT_GROUP: c_int = 5;

/// Connect target chosen so the attempt fails fast with no handshake, which
/// keeps plugin code paths out of the traced sequence.
const DEAD_HOST: &str = "localhost";
const DEAD_PORT: c_uint = 3309;

type MysqlInitFn = unsafe extern "C" fn(*mut Mysql) -> *mut Mysql;
type MysqlOptionsFn = unsafe extern "C" fn(*mut Mysql, c_int, *const c_void) -> c_int;
type MysqlRealConnectFn = unsafe extern "C" fn(
    *mut Mysql,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    c_uint,
    *const c_char,
    c_ulong,
) -> *mut Mysql;

/// Run the probe sequence and exit; this never returns control.
///
/// With `traced` set the probe opens with the traceme/SIGSTOP handshake the
/// trace loop expects. Without it the same sequence runs bare, so it can be
/// cross-checked under an external syscall logger.
pub fn run(library: &Path, traced: bool) -> ! {
    if traced {
        if ptrace::traceme().is_err() {
            report_failure("ptrace traceme failed.", traced);
        }
        if raise(Signal::SIGSTOP).is_err() {
            report_failure("raise sigstop failed.", traced);
        }
    }

    let Ok(lib_path) = CString::new(library.as_os_str().as_bytes()) else {
        report_failure("library path contains a NUL byte.", traced);
    };
    let handle = unsafe { libc::dlopen(lib_path.as_ptr(), libc::RTLD_LAZY) };
    if handle.is_null() {
        report_failure(
            "dlopen() failed -- does the library exist and is it Connector C?",
            traced,
        );
    }

    let mysql_init: MysqlInitFn = unsafe { mem::transmute(resolve(handle, "mysql_init", traced)) };
    let mysql_options: MysqlOptionsFn =
        unsafe { mem::transmute(resolve(handle, "mysql_options", traced)) };
    let mysql_real_connect: MysqlRealConnectFn =
        unsafe { mem::transmute(resolve(handle, "mysql_real_connect", traced)) };

    let mysql = unsafe { mysql_init(ptr::null_mut()) };
    if mysql.is_null() {
        report_failure("mysql_init() failed -- out of memory?", traced);
    }

    // Asking for any default group makes the connector consider every
    // default option file; the group name itself does not matter.
    let group = CString::new("client").unwrap();
    if unsafe { mysql_options(mysql, MYSQL_READ_DEFAULT_GROUP, group.as_ptr().cast()) } == 1 {
        report_failure(
            "mysql_options() failed -- bad syntax in an option file?",
            traced,
        );
    }

    // The files are actually read in here; the connect itself is built to
    // fail before any handshake, so success is the suspicious outcome.
    let host = CString::new(DEAD_HOST).unwrap();
    let empty = CString::new("").unwrap();
    let connected = unsafe {
        mysql_real_connect(
            mysql,
            host.as_ptr(),
            empty.as_ptr(),
            empty.as_ptr(),
            empty.as_ptr(),
            DEAD_PORT,
            ptr::null(),
            0,
        )
    };
    if !connected.is_null() {
        report_failure(
            "mysql_real_connect() succeeded -- this is probably harmless.",
            traced,
        );
    }

    // No mysql_close and no dlclose: the process is about to go away, and
    // unloading the library mid-trace is riskier than leaking it.
    process::exit(0);
}

fn resolve(handle: *mut c_void, name: &str, traced: bool) -> *mut c_void {
    let symbol = CString::new(name).unwrap();
    let address = unsafe { libc::dlsym(handle, symbol.as_ptr()) };
    if address.is_null() {
        report_failure(
            &format!("dlsym() failed for {name}() -- is this a Connector C library?"),
            traced,
        );
    }
    address
}

/// Report a probe failure and exit.
///
/// There is no shared memory and no other channel back to the tracer, so
/// the message travels as the path argument of a file-access syscall the
/// tracer already watches. Both an open and an access are issued so the
/// message is seen whichever call the platform libc emits; neither can hit
/// a real file, since real paths never start with the sentinel prefix.
fn report_failure(message: &str, traced: bool) -> ! {
    if !traced {
        eprintln!("{SENTINEL_PREFIX}{message}");
        process::exit(1);
    }
    let tagged = format!("{SENTINEL_PREFIX}{message}");
    let _ = std::fs::File::open(&tagged);
    if let Ok(path) = CString::new(tagged) {
        unsafe { libc::access(path.as_ptr(), libc::F_OK) };
    }
    process::exit(1);
}
