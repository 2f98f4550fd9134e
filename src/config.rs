//! Construction-time configuration for the trace loop.
//!
//! Everything the loop needs to know (which syscalls to watch, where their
//! path argument lives, size ceilings, the output delimiter) is gathered
//! into [`TraceConfig`] and passed in at construction, so tests can
//! substitute their own tables and limits.

use syscalls::Sysno;

/// Prefix reserved for messages the child smuggles out over the monitored
/// syscall channel. No real filesystem path starts with it.
pub const SENTINEL_PREFIX: &str = "Error: ";

/// Substring every interesting path carries: option files are always named
/// `my.cnf` or `.my.cnf`.
pub const OPTION_FILE_MARKER: &str = "my.cnf";

/// Ceiling on the serialized result list, in bytes.
pub const DEFAULT_MAX_LIST_SIZE: usize = 65_536;

/// One monitored syscall: its number and which argument carries the path.
#[derive(Debug, Clone, Copy)]
pub struct MonitoredSyscall {
    pub sysno: Sysno,
    pub path_arg: usize,
}

/// The set of file-access syscalls the trace loop inspects.
#[derive(Debug, Clone)]
pub struct SyscallTable {
    entries: Vec<MonitoredSyscall>,
}

impl SyscallTable {
    pub fn new(entries: Vec<MonitoredSyscall>) -> Self {
        SyscallTable { entries }
    }

    /// The five calls a connector reaches its option files through.
    ///
    /// Connector C opens its default files with fopen (so openat) and probes
    /// them with access or stat; open and lstat see no use today but are
    /// watched in case that changes. fstat shows up too but is redundant, it
    /// never carries a path.
    pub fn file_access_defaults() -> Self {
        SyscallTable::new(vec![
            MonitoredSyscall {
                sysno: Sysno::open,
                path_arg: 0,
            },
            MonitoredSyscall {
                sysno: Sysno::stat,
                path_arg: 0,
            },
            MonitoredSyscall {
                sysno: Sysno::lstat,
                path_arg: 0,
            },
            MonitoredSyscall {
                sysno: Sysno::access,
                path_arg: 0,
            },
            MonitoredSyscall {
                sysno: Sysno::openat,
                path_arg: 1,
            },
        ])
    }

    /// Index of the path argument for `sysno`, or None if it is not watched.
    pub fn path_arg(&self, sysno: Sysno) -> Option<usize> {
        self.entries
            .iter()
            .find(|m| m.sysno == sysno)
            .map(|m| m.path_arg)
    }
}

/// Knobs for one traced run.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub syscalls: SyscallTable,
    /// Substring a candidate path must contain to be kept.
    pub filter: String,
    /// Prefix marking a candidate as a child-reported error instead.
    pub sentinel_prefix: String,
    /// Separator between entries in the serialized result.
    pub delimiter: char,
    pub max_list_size: usize,
    /// Ceiling on a single extracted path, in bytes.
    pub max_path_len: usize,
    /// Redirect matching syscalls so the files are never actually opened.
    pub suppress_open: bool,
    /// Poll the tracee with a bounded backoff instead of blocking forever.
    pub poll_timeout: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            syscalls: SyscallTable::file_access_defaults(),
            filter: OPTION_FILE_MARKER.to_string(),
            sentinel_prefix: SENTINEL_PREFIX.to_string(),
            delimiter: '\n',
            max_list_size: DEFAULT_MAX_LIST_SIZE,
            max_path_len: libc::PATH_MAX as usize,
            suppress_open: true,
            poll_timeout: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_the_file_access_calls() {
        let table = SyscallTable::file_access_defaults();
        assert_eq!(table.path_arg(Sysno::open), Some(0));
        assert_eq!(table.path_arg(Sysno::stat), Some(0));
        assert_eq!(table.path_arg(Sysno::lstat), Some(0));
        assert_eq!(table.path_arg(Sysno::access), Some(0));
        assert_eq!(table.path_arg(Sysno::openat), Some(1));
    }

    #[test]
    fn unwatched_syscalls_miss() {
        let table = SyscallTable::file_access_defaults();
        assert_eq!(table.path_arg(Sysno::write), None);
        assert_eq!(table.path_arg(Sysno::close), None);
    }

    #[test]
    fn mock_tables_are_honored() {
        let table = SyscallTable::new(vec![MonitoredSyscall {
            sysno: Sysno::write,
            path_arg: 1,
        }]);
        assert_eq!(table.path_arg(Sysno::write), Some(1));
        assert_eq!(table.path_arg(Sysno::openat), None);
    }

    #[test]
    fn defaults_suppress_reads_and_join_with_newlines() {
        let cfg = TraceConfig::default();
        assert!(cfg.suppress_open);
        assert!(!cfg.poll_timeout);
        assert_eq!(cfg.delimiter, '\n');
        assert_eq!(cfg.max_path_len, libc::PATH_MAX as usize);
    }
}
