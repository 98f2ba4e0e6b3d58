//! x86-64 System V calling convention.

use super::{CallSetup, align_down};
use crate::{Result, error::remote_call_error};
use core::fmt::Debug;
use libc::{pid_t, user_regs_struct};

/// The ELF machine type for x86-64 architecture.
pub const EM_ARCH: u16 = elf::abi::EM_X86_64;

/// Integer arguments passed in `rdi, rsi, rdx, rcx, r8, r9`.
pub const MAX_CALL_ARGS: usize = 6;

/// Bytes below `rsp` that leaf functions may use without adjusting it.
pub const RED_ZONE: u64 = 128;

/// Size of the sequence produced by [`encode_absolute_jump`].
pub const JUMP_SIZE: usize = 13;

/// General purpose registers of a stopped thread.
#[derive(Clone, Copy)]
pub struct Registers {
    raw: user_regs_struct,
}

impl Default for Registers {
    fn default() -> Self {
        // SAFETY: plain integer fields, all-zero is a valid value.
        Registers {
            raw: unsafe { core::mem::zeroed() },
        }
    }
}

impl Registers {
    #[inline]
    pub fn pc(&self) -> u64 {
        self.raw.rip
    }

    #[inline]
    pub fn sp(&self) -> u64 {
        self.raw.rsp
    }

    #[inline]
    pub fn return_value(&self) -> u64 {
        self.raw.rax
    }
}

impl Debug for Registers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registers")
            .field("rip", &format_args!("{:#x}", self.raw.rip))
            .field("rsp", &format_args!("{:#x}", self.raw.rsp))
            .field("rax", &format_args!("{:#x}", self.raw.rax))
            .field("orig_rax", &format_args!("{:#x}", self.raw.orig_rax))
            .finish()
    }
}

pub(crate) fn read_registers(pid: pid_t) -> Result<Registers> {
    let mut regs = Registers::default();
    ptrace!(PTRACE_GETREGS, pid, 0usize, &mut regs.raw as *mut user_regs_struct)?;
    Ok(regs)
}

pub(crate) fn write_registers(pid: pid_t, regs: &Registers) -> Result<()> {
    ptrace!(PTRACE_SETREGS, pid, 0usize, &regs.raw as *const user_regs_struct)?;
    Ok(())
}

/// Builds the register state for calling `func(args...)` with the stack
/// pointer at or below `sp`.
///
/// The return address is pushed by the tracer, so after the write of
/// `return_slot` the callee sees `rsp + 8` aligned to 16 as the ABI requires.
/// `orig_rax` is set to -1 so a thread stopped inside a syscall does not get
/// its instruction pointer rewound for a restart.
pub fn prepare_call(saved: &Registers, func: u64, args: &[u64], sp: u64) -> Result<CallSetup> {
    if args.len() > MAX_CALL_ARGS {
        return Err(remote_call_error(format!(
            "{} arguments given, x86_64 passes at most {MAX_CALL_ARGS} in registers",
            args.len()
        )));
    }
    let mut raw = saved.raw;
    let slots = [
        &mut raw.rdi,
        &mut raw.rsi,
        &mut raw.rdx,
        &mut raw.rcx,
        &mut raw.r8,
        &mut raw.r9,
    ];
    for (slot, arg) in slots.into_iter().zip(args) {
        *slot = *arg;
    }
    let sp = align_down(sp, 16) - 8;
    raw.rsp = sp;
    raw.rip = func;
    // Number of vector registers used by a variadic callee.
    raw.rax = 0;
    raw.orig_rax = u64::MAX;
    Ok(CallSetup {
        regs: Registers { raw },
        return_slot: Some(sp),
    })
}

/// `movabs r11, target; jmp r11`
///
/// r11 is caller-saved and never carries arguments, so the jump is
/// transparent to the patched function's callers.
pub fn encode_absolute_jump(target: u64) -> Vec<u8> {
    let mut code = Vec::with_capacity(JUMP_SIZE);
    code.extend_from_slice(&[0x49, 0xbb]);
    code.extend_from_slice(&target.to_le_bytes());
    code.extend_from_slice(&[0x41, 0xff, 0xe3]);
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_go_to_sysv_registers() {
        let setup = prepare_call(&Registers::default(), 0x1000, &[1, 2, 3, 4, 5, 6], 0x7ff0).unwrap();
        let raw = setup.regs.raw;
        assert_eq!(
            [raw.rdi, raw.rsi, raw.rdx, raw.rcx, raw.r8, raw.r9],
            [1, 2, 3, 4, 5, 6]
        );
        assert_eq!(raw.rip, 0x1000);
        assert_eq!(raw.orig_rax, u64::MAX);
        assert_eq!(raw.rsp, 0x7fe8);
        assert_eq!(setup.return_slot, Some(0x7fe8));
    }

    #[test]
    fn misaligned_stack_is_realigned() {
        let setup = prepare_call(&Registers::default(), 0x1000, &[], 0x7ff7).unwrap();
        assert_eq!((setup.regs.sp() + 8) % 16, 0);
    }

    #[test]
    fn jump_encoding() {
        assert_eq!(
            encode_absolute_jump(0x1122_3344_5566_7788),
            [0x49, 0xbb, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x41, 0xff, 0xe3]
        );
    }
}
