//! Option-file discovery for MySQL and MariaDB Connector C libraries.
//!
//! Which option files a connector reads depends on its build-time
//! SYSCONFDIR, its version and the runtime environment, none of which are
//! visible from outside. Instead of re-deriving those rules, this crate
//! observes ground truth: it forks a child that walks the connector through
//! a harmless init/options/connect sequence, steps the child by syscall,
//! and collects every path the connector hands to a file-access syscall.
//!
//! # Modules
//!
//! - [`config`] - construction-time knobs for the trace loop
//! - [`connector_probe`] - the child side: load the connector and drive it
//! - [`tracer`] - the parent side: the syscall-stepping trace loop
//! - [`tracee_mem`] - string reconstruction out of the tracee's memory
//! - [`file_list`] - the deduplicated, delimiter-joined result list
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use optrace::connector_probe;
//! use optrace::{spawn_tracee, TraceConfig, Tracer};
//!
//! let library = PathBuf::from("/usr/lib/x86_64-linux-gnu/libmariadb.so");
//! let child = spawn_tracee(move || connector_probe::run(&library, true))
//!     .expect("failed to fork the probe");
//! let report = Tracer::new(child, TraceConfig::default()).run();
//! println!("{}", report.files);
//! ```

pub mod config;
pub mod connector_probe;
pub mod file_list;
pub mod tracee_mem;
pub mod tracer;

pub use config::{MonitoredSyscall, SyscallTable, TraceConfig};
pub use file_list::{Append, FileList};
pub use tracer::{spawn_tracee, TraceError, TraceReport, Tracer};
