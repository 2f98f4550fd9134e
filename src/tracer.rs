//! The syscall-stepping trace loop.
//!
//! The tracer owns the forked child for its whole lifetime: it waits for the
//! child's self-initiated SIGSTOP, then bounces it from syscall boundary to
//! syscall boundary with PTRACE_SYSCALL, reading path arguments out of the
//! stopped child's registers and memory at every entry stop. The two
//! processes share no memory; the stop/resume protocol and the syscall
//! arguments themselves are the only channel between them.

use std::thread;
use std::time::Duration;

use libc::user_regs_struct;
use nix::errno::Errno;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use syscalls::Sysno;
use tracing::{debug, warn};

use crate::config::TraceConfig;
use crate::file_list::{Append, FileList};
use crate::tracee_mem;

/// Failure classes for one traced run. Each class carries its own exit code
/// so callers can tell spawn, protocol, timeout and child-reported failures
/// apart without parsing the output line.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("fork() failed: {0}")]
    Spawn(#[source] Errno),

    #[error("ptrace failed: {0}")]
    Ptrace(#[source] Errno),

    #[error("waitpid failed: {0}")]
    Wait(#[source] Errno),

    #[error("unexpected stop status: {0:?}")]
    MalformedStop(WaitStatus),

    #[error("waitpid timeout")]
    Timeout,

    /// A failure the child reported over the sentinel channel. The message
    /// is whatever followed the sentinel prefix.
    #[error("{0}")]
    Reported(String),
}

impl TraceError {
    pub fn exit_code(&self) -> i32 {
        match self {
            TraceError::Spawn(_) => -1,
            TraceError::Ptrace(_) | TraceError::Wait(_) => -2,
            TraceError::MalformedStop(_) => -3,
            TraceError::Timeout => -4,
            TraceError::Reported(_) => -6,
        }
    }
}

/// Outcome of a traced run: the serialized file list plus the failure, if
/// any. The list survives a failure; whatever was collected before it is
/// still returned.
#[derive(Debug)]
pub struct TraceReport {
    pub files: String,
    pub error: Option<TraceError>,
}

/// Fork the tracee. The child runs `child_body` and never returns to the
/// caller; the parent gets the child's pid. `child_body` is responsible for
/// the traceme/SIGSTOP handshake the trace loop expects as its first stop.
pub fn spawn_tracee<F: FnOnce()>(child_body: F) -> Result<Pid, TraceError> {
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child),
        Ok(ForkResult::Child) => {
            child_body();
            unsafe { libc::_exit(0) }
        }
        Err(errno) => Err(TraceError::Spawn(errno)),
    }
}

enum Flow {
    Continue,
    ListFull,
}

/// Drives one child through the trace protocol.
pub struct Tracer {
    pid: Pid,
    cfg: TraceConfig,
}

impl Tracer {
    pub fn new(pid: Pid, cfg: TraceConfig) -> Self {
        Tracer { pid, cfg }
    }

    /// Run the child to completion and return what was observed. The child
    /// is reaped on every path out of here.
    pub fn run(mut self) -> TraceReport {
        let mut list = FileList::new(&self.cfg);
        let error = self.trace(&mut list).err();
        TraceReport {
            files: list.finish(),
            error,
        }
    }

    fn trace(&mut self, list: &mut FileList) -> Result<(), TraceError> {
        self.await_initial_stop()?;
        // TRACESYSGOOD makes syscall stops distinguishable from
        // signal-delivery stops, so a stray signal cannot shift the
        // entry/exit parity. EXITKILL keeps the child from outliving a
        // crashed tracer in a stop it can never leave.
        ptrace::setoptions(
            self.pid,
            Options::PTRACE_O_TRACESYSGOOD | Options::PTRACE_O_EXITKILL,
        )
        .map_err(|e| self.abort(TraceError::Ptrace(e)))?;

        let mut at_entry = true;
        let mut pending: Option<Signal> = None;
        loop {
            ptrace::syscall(self.pid, pending.take())
                .map_err(|e| self.abort(TraceError::Ptrace(e)))?;
            match self.next_stop()? {
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => return Ok(()),
                WaitStatus::PtraceSyscall(_) => {
                    // Entry and exit stops strictly alternate; only entries
                    // carry arguments worth reading.
                    if at_entry {
                        if let Flow::ListFull = self.on_syscall_entry(list)? {
                            warn!("result list is full, ending the trace early");
                            self.kill_and_reap();
                            return Ok(());
                        }
                    }
                    at_entry = !at_entry;
                }
                // A plain signal for the child, not a syscall boundary.
                // Hand it back on the next resume; parity is untouched.
                WaitStatus::Stopped(_, sig) => pending = Some(sig),
                status => return Err(self.abort(TraceError::MalformedStop(status))),
            }
        }
    }

    /// The first stop must be the SIGSTOP the child raised against itself
    /// right after traceme; anything else means the child never became a
    /// tracee.
    fn await_initial_stop(&mut self) -> Result<(), TraceError> {
        match self.next_stop()? {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {
                debug!(pid = self.pid.as_raw(), "tracee reached its initial stop");
                Ok(())
            }
            status => Err(self.abort(TraceError::MalformedStop(status))),
        }
    }

    fn next_stop(&mut self) -> Result<WaitStatus, TraceError> {
        if !self.cfg.poll_timeout {
            return waitpid(self.pid, None).map_err(|e| self.abort(TraceError::Wait(e)));
        }
        // Bounded poll: back off exponentially from 125us. A child that has
        // not stopped by the time the budget runs out is assumed hung.
        let mut delay_us: u64 = 125;
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => return Ok(status),
                Err(e) => return Err(self.abort(TraceError::Wait(e))),
            }
            if delay_us >= 4_096_000 {
                self.kill_and_reap();
                return Err(TraceError::Timeout);
            }
            thread::sleep(Duration::from_micros(delay_us));
            delay_us *= 2;
        }
    }

    fn on_syscall_entry(&mut self, list: &mut FileList) -> Result<Flow, TraceError> {
        let mut regs =
            ptrace::getregs(self.pid).map_err(|e| self.abort(TraceError::Ptrace(e)))?;
        let Some(sysno) = Sysno::new(regs.orig_rax as usize) else {
            return Ok(Flow::Continue);
        };
        let Some(arg_index) = self.cfg.syscalls.path_arg(sysno) else {
            return Ok(Flow::Continue);
        };

        let addr = syscall_arg(&regs, arg_index);
        let candidate = tracee_mem::read_string(self.pid, addr, self.cfg.max_path_len);
        if candidate.len == 0 {
            return Ok(Flow::Continue);
        }
        if let Some(message) = list.sentinel(&candidate.text) {
            let message = message.to_string();
            return Err(self.abort(TraceError::Reported(message)));
        }
        if !list.relevant(&candidate.text) {
            return Ok(Flow::Continue);
        }

        debug!(
            syscall = sysno.name(),
            path = %candidate.text,
            "option file considered"
        );
        if self.cfg.suppress_open {
            // Point the path argument at its own trailing NUL before the
            // kernel runs the call: the empty path fails with ENOENT and
            // the file is never touched. This happens ahead of duplicate
            // detection; every sighting must be redirected, not just the
            // first. The argument registers are caller-saved in the sysv
            // ABI, so the tracee's own code never sees the rewrite.
            set_syscall_arg(&mut regs, arg_index, addr + candidate.len as u64);
            ptrace::setregs(self.pid, regs).map_err(|e| self.abort(TraceError::Ptrace(e)))?;
        }

        match list.append(&candidate.text) {
            Append::Added | Append::Duplicate => Ok(Flow::Continue),
            Append::Full => Ok(Flow::ListFull),
        }
    }

    /// Kill and reap the child, passing the error through. Every fatal path
    /// funnels through here so the child is never left behind in a stop it
    /// cannot leave.
    fn abort(&mut self, err: TraceError) -> TraceError {
        self.kill_and_reap();
        err
    }

    fn kill_and_reap(&mut self) {
        // SIGKILL ends even a ptrace-stopped child without a resume.
        let _ = signal::kill(self.pid, Signal::SIGKILL);
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(_) => break,
                Ok(_) => {
                    let _ = signal::kill(self.pid, Signal::SIGKILL);
                }
            }
        }
    }
}

// Linux x86-64 syscall arguments, in calling order.
fn syscall_arg(regs: &user_regs_struct, index: usize) -> u64 {
    match index {
        0 => regs.rdi,
        1 => regs.rsi,
        2 => regs.rdx,
        3 => regs.r10,
        4 => regs.r8,
        _ => regs.r9,
    }
}

fn set_syscall_arg(regs: &mut user_regs_struct, index: usize, value: u64) {
    match index {
        0 => regs.rdi = value,
        1 => regs.rsi = value,
        2 => regs.rdx = value,
        3 => regs.r10 = value,
        4 => regs.r8 = value,
        _ => regs.r9 = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_args_map_to_the_sysv_registers() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        for index in 0..6 {
            set_syscall_arg(&mut regs, index, 100 + index as u64);
        }
        assert_eq!(regs.rdi, 100);
        assert_eq!(regs.rsi, 101);
        assert_eq!(regs.rdx, 102);
        assert_eq!(regs.r10, 103);
        assert_eq!(regs.r8, 104);
        assert_eq!(regs.r9, 105);
        for index in 0..6 {
            assert_eq!(syscall_arg(&regs, index), 100 + index as u64);
        }
    }

    #[test]
    fn exit_codes_are_nonzero_and_distinct_per_class() {
        let codes = [
            TraceError::Spawn(Errno::EAGAIN).exit_code(),
            TraceError::Ptrace(Errno::ESRCH).exit_code(),
            TraceError::MalformedStop(WaitStatus::StillAlive).exit_code(),
            TraceError::Timeout.exit_code(),
            TraceError::Reported("boom".to_string()).exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        // Wait failures share the Ptrace class.
        assert_eq!(
            TraceError::Wait(Errno::ECHILD).exit_code(),
            TraceError::Ptrace(Errno::ESRCH).exit_code()
        );
    }

    #[test]
    fn reported_errors_display_the_bare_message() {
        let err = TraceError::Reported("mysql_init() failed -- out of memory?".to_string());
        assert_eq!(err.to_string(), "mysql_init() failed -- out of memory?");
    }
}
