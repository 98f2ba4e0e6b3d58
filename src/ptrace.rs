//! Attaching to a thread with `ptrace(2)` and driving it while stopped.

use crate::{
    Result,
    arch::{self, Registers},
    error::{ptrace_errno, ptrace_error},
};
use libc::{c_int, c_long, pid_t};

const WORD: u64 = size_of::<c_long>() as u64;

/// Why a tracee stopped running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Signal-delivery stop.
    Signal(c_int),
    /// The process exited with this status.
    Exited(c_int),
    /// The process was killed by this signal.
    Killed(c_int),
}

/// A thread attached with `PTRACE_ATTACH`. Dropping it detaches.
#[derive(Debug)]
pub struct Tracee {
    pid: pid_t,
    attached: bool,
    /// Signals that arrived while we held the thread and that it should
    /// still receive.
    pending_signals: Vec<c_int>,
}

impl Tracee {
    /// Attaches to `pid` and waits until it is stopped.
    pub fn attach(pid: pid_t) -> Result<Tracee> {
        ptrace!(PTRACE_ATTACH, pid, 0usize, 0usize)?;
        let mut tracee = Tracee {
            pid,
            attached: true,
            pending_signals: Vec::new(),
        };
        loop {
            match tracee.wait_stop()? {
                StopReason::Signal(libc::SIGSTOP) => break,
                StopReason::Signal(sig) => {
                    log::debug!("pid {pid}: signal {sig} while attaching, deferring it");
                    tracee.pending_signals.push(sig);
                    tracee.cont(0)?;
                }
                reason => {
                    tracee.attached = false;
                    return Err(ptrace_error(format!(
                        "process {pid} went away while attaching: {reason:?}"
                    )));
                }
            }
        }
        log::info!("attached to process {pid}");
        Ok(tracee)
    }

    #[inline]
    pub fn pid(&self) -> pid_t {
        self.pid
    }

    pub fn regs(&self) -> Result<Registers> {
        arch::read_registers(self.pid)
    }

    pub fn set_regs(&self, regs: &Registers) -> Result<()> {
        arch::write_registers(self.pid, regs)
    }

    fn peek(&self, addr: u64) -> Result<u64> {
        Ok(ptrace!(PTRACE_PEEKDATA, self.pid, addr, 0usize)? as u64)
    }

    fn poke(&self, addr: u64, word: u64) -> Result<()> {
        ptrace!(PTRACE_POKEDATA, self.pid, addr, word)?;
        Ok(())
    }

    /// Reads `buf.len()` bytes at `addr` of the tracee.
    pub fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let cur = addr + done as u64;
            let aligned = cur & !(WORD - 1);
            let skip = (cur - aligned) as usize;
            let word = self.peek(aligned)?.to_ne_bytes();
            let n = (WORD as usize - skip).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&word[skip..skip + n]);
            done += n;
        }
        Ok(())
    }

    /// Writes `data` at `addr` of the tracee. Works on read-only mappings
    /// such as `.text`.
    pub fn write_memory(&self, addr: u64, data: &[u8]) -> Result<()> {
        let mut done = 0usize;
        while done < data.len() {
            let cur = addr + done as u64;
            let aligned = cur & !(WORD - 1);
            let skip = (cur - aligned) as usize;
            let n = (WORD as usize - skip).min(data.len() - done);
            let mut word = if skip == 0 && n == WORD as usize {
                [0u8; WORD as usize]
            } else {
                // Partial word: keep the bytes we are not writing.
                self.peek(aligned)?.to_ne_bytes()
            };
            word[skip..skip + n].copy_from_slice(&data[done..done + n]);
            self.poke(aligned, u64::from_ne_bytes(word))?;
            done += n;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string of at most `limit` bytes.
    pub fn read_c_string(&self, addr: u64, limit: usize) -> Result<String> {
        let mut bytes = Vec::new();
        let mut cur = addr;
        while bytes.len() < limit {
            let mut word = [0u8; WORD as usize];
            self.read_memory(cur, &mut word)?;
            match word.iter().position(|&b| b == 0) {
                Some(end) => {
                    bytes.extend_from_slice(&word[..end]);
                    break;
                }
                None => bytes.extend_from_slice(&word),
            }
            cur += WORD;
        }
        bytes.truncate(limit);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Resumes the tracee, delivering `signal` (0 for none).
    pub fn cont(&self, signal: c_int) -> Result<()> {
        ptrace!(PTRACE_CONT, self.pid, 0usize, signal as usize)?;
        Ok(())
    }

    /// Blocks until the tracee changes state.
    pub fn wait_stop(&self) -> Result<StopReason> {
        let mut status: c_int = 0;
        loop {
            let r = unsafe { libc::waitpid(self.pid, &mut status, libc::__WALL) };
            if r == -1 {
                if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ptrace_errno(format_args!("waitpid({})", self.pid)));
            }
            break;
        }
        let reason = if libc::WIFSTOPPED(status) {
            StopReason::Signal(libc::WSTOPSIG(status))
        } else if libc::WIFEXITED(status) {
            StopReason::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            StopReason::Killed(libc::WTERMSIG(status))
        } else {
            return Err(ptrace_error(format!(
                "unexpected wait status {status:#x} for {}",
                self.pid
            )));
        };
        log::trace!("pid {}: {reason:?}", self.pid);
        Ok(reason)
    }

    /// Remembers a signal to be delivered when the tracee is released.
    pub(crate) fn defer_signal(&mut self, signal: c_int) {
        self.pending_signals.push(signal);
    }

    /// Marks the tracee as gone, e.g. after it exited during a call.
    pub(crate) fn mark_detached(&mut self) {
        self.attached = false;
    }

    /// Lets the tracee run again, handing back the first signal it missed.
    pub fn detach(mut self) -> Result<()> {
        self.detach_inner()
    }

    fn detach_inner(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        let signal = self
            .pending_signals
            .iter()
            .copied()
            .find(|&sig| sig != libc::SIGSTOP)
            .unwrap_or(0);
        if self.pending_signals.len() > 1 {
            log::warn!(
                "pid {}: dropping deferred signals {:?} on detach",
                self.pid,
                &self.pending_signals
            );
        }
        ptrace!(PTRACE_DETACH, self.pid, 0usize, signal as usize)?;
        log::info!("detached from process {}", self.pid);
        Ok(())
    }
}

impl Drop for Tracee {
    fn drop(&mut self) {
        if let Err(e) = self.detach_inner() {
            log::error!("failed to detach from {}: {e}", self.pid);
        }
    }
}
