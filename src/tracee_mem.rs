//! String reconstruction across the process boundary.
//!
//! The tracee's registers only give us an address in *its* address space; the
//! bytes behind it have to be fetched through the debugger peek interface,
//! one word per call.

use std::ffi::c_void;
use std::mem;

use nix::sys::ptrace;
use nix::unistd::Pid;

/// A path argument pulled out of the tracee, with the byte count actually
/// read. The decoded text can differ in length when the bytes were not
/// UTF-8, so register arithmetic must use `len`, never `text.len()`.
pub struct PathCandidate {
    pub text: String,
    pub len: usize,
}

/// Copy the NUL-terminated string at `addr` in the tracee's address space.
///
/// A null `addr` yields an empty candidate. A peek failure mid-string ends
/// the copy and whatever was read so far is returned. At most `max_len - 1`
/// bytes are kept, matching the longest path the platform can hand to a
/// syscall.
pub fn read_string(pid: Pid, addr: u64, max_len: usize) -> PathCandidate {
    let mut bytes = Vec::new();
    if addr != 0 {
        let ceiling = max_len.saturating_sub(1);
        'words: for word_index in 0u64.. {
            let word_addr = addr + word_index * mem::size_of::<libc::c_long>() as u64;
            let Ok(word) = ptrace::read(pid, word_addr as *mut c_void) else {
                break;
            };
            for byte in word.to_ne_bytes() {
                if byte == 0 || bytes.len() >= ceiling {
                    break 'words;
                }
                bytes.push(byte);
            }
        }
    }
    PathCandidate {
        len: bytes.len(),
        text: String::from_utf8_lossy(&bytes).into_owned(),
    }
}
