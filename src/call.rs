//! Making a stopped tracee call a function of our choosing.
//!
//! The tracee's registers are saved, a call frame is built whose return
//! address is [`RETURN_ADDRESS`], and the tracee is resumed. When the callee
//! returns it jumps to that address and faults, which stops it again so the
//! result can be read. The saved registers are written back when the
//! [`RemoteCall`] is dropped, and the tracee continues as if nothing happened.

use crate::{
    Result,
    arch::{self, RED_ZONE, RETURN_ADDRESS, Registers, align_down},
    error::remote_call_error,
    ptrace::{StopReason, Tracee},
};

/// Tunables for injected calls.
#[derive(Clone, Copy, Debug)]
pub struct CallOptions {
    /// Bytes of the tracee's stack, below its red zone, available for
    /// arguments such as strings.
    pub scratch_size: u64,
    /// Unrelated signal stops tolerated while waiting for one call to return.
    pub max_stops: usize,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            scratch_size: 64 * 1024,
            max_stops: 16,
        }
    }
}

/// A sequence of calls made on behalf of the tracer. Restores the tracee's
/// registers on drop.
pub struct RemoteCall<'t> {
    tracee: &'t mut Tracee,
    saved: Registers,
    options: CallOptions,
    /// Lowest address handed out from the scratch area so far.
    cursor: u64,
    scratch_floor: u64,
    restored: bool,
}

impl<'t> RemoteCall<'t> {
    pub fn new(tracee: &'t mut Tracee, options: CallOptions) -> Result<RemoteCall<'t>> {
        let saved = tracee.regs()?;
        log::debug!("saved registers of {}: {saved:?}", tracee.pid());
        let cursor = align_down(saved.sp() - RED_ZONE, 16);
        Ok(RemoteCall {
            tracee,
            saved,
            options,
            cursor,
            scratch_floor: cursor.saturating_sub(options.scratch_size),
            restored: false,
        })
    }

    #[inline]
    pub fn tracee(&self) -> &Tracee {
        &*self.tracee
    }

    /// Copies `bytes` into the scratch area and returns their address in
    /// the tracee. Valid until this `RemoteCall` is dropped.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        let addr = align_down(self.cursor - bytes.len() as u64, 16);
        if addr < self.scratch_floor {
            return Err(remote_call_error(format!(
                "{} bytes do not fit in the {} byte scratch area",
                bytes.len(),
                self.options.scratch_size
            )));
        }
        self.tracee.write_memory(addr, bytes)?;
        self.cursor = addr;
        Ok(addr)
    }

    /// Copies `s` with a terminating NUL into the scratch area.
    pub fn push_c_string(&mut self, s: &str) -> Result<u64> {
        if s.as_bytes().contains(&0) {
            return Err(remote_call_error(format!("{s:?} contains a NUL byte")));
        }
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.push_bytes(&bytes)
    }

    /// Calls `func(args...)` in the tracee and returns the raw integer
    /// return register.
    pub fn call(&mut self, func: u64, args: &[u64]) -> Result<u64> {
        if func == 0 {
            return Err(remote_call_error("refusing to call a null function pointer"));
        }
        let setup = arch::prepare_call(&self.saved, func, args, self.cursor)?;
        if let Some(slot) = setup.return_slot {
            self.tracee.write_memory(slot, &RETURN_ADDRESS.to_ne_bytes())?;
        }
        self.tracee.set_regs(&setup.regs)?;
        log::debug!("calling {func:#x}{args:x?} in {}", self.tracee.pid());

        let mut stops = 0usize;
        self.tracee.cont(0)?;
        loop {
            match self.tracee.wait_stop()? {
                StopReason::Signal(libc::SIGSEGV) => {
                    let regs = self.tracee.regs()?;
                    if regs.pc() == RETURN_ADDRESS {
                        let ret = regs.return_value();
                        log::debug!("{func:#x} returned {ret:#x}");
                        return Ok(ret);
                    }
                    return Err(remote_call_error(format!(
                        "process {} faulted at {:#x} while calling {func:#x}",
                        self.tracee.pid(),
                        regs.pc()
                    )));
                }
                StopReason::Signal(sig) => {
                    stops += 1;
                    if stops > self.options.max_stops {
                        return Err(remote_call_error(format!(
                            "gave up on {func:#x} after {stops} unrelated signal stops"
                        )));
                    }
                    log::debug!("signal {sig} during call to {func:#x}, deferring it");
                    self.tracee.defer_signal(sig);
                    self.tracee.cont(0)?;
                }
                reason => {
                    self.restored = true;
                    self.tracee.mark_detached();
                    return Err(remote_call_error(format!(
                        "process {} terminated while calling {func:#x}: {reason:?}",
                        self.tracee.pid()
                    )));
                }
            }
        }
    }

    /// Puts the saved registers back.
    pub fn finish(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        self.tracee.set_regs(&self.saved)?;
        log::debug!("restored registers of {}", self.tracee.pid());
        Ok(())
    }
}

impl Drop for RemoteCall<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            log::error!("failed to restore registers of {}: {e}", self.tracee.pid());
        }
    }
}
