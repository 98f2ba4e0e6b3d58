//! AArch64 procedure call standard.

use super::{CallSetup, align_down};
use crate::{Result, error::remote_call_error};
use core::fmt::Debug;
use libc::{iovec, pid_t, user_regs_struct};

/// The ELF machine type for AArch64 architecture.
pub const EM_ARCH: u16 = elf::abi::EM_AARCH64;

/// Integer arguments passed in `x0..x7`.
pub const MAX_CALL_ARGS: usize = 8;

/// AAPCS64 has no red zone, but signal frames and leaf code of some
/// toolchains still assume a little slack below `sp`.
pub const RED_ZONE: u64 = 128;

/// Size of the sequence produced by [`encode_absolute_jump`].
pub const JUMP_SIZE: usize = 16;

const NT_PRSTATUS: usize = 1;
const NT_ARM_SYSTEM_CALL: usize = 0x404;
const LR: usize = 30;

/// General purpose registers of a stopped thread, plus the syscall number
/// the kernel would use for a restart.
#[derive(Clone, Copy)]
pub struct Registers {
    raw: user_regs_struct,
    syscallno: i32,
}

impl Default for Registers {
    fn default() -> Self {
        // SAFETY: plain integer fields, all-zero is a valid value.
        Registers {
            raw: unsafe { core::mem::zeroed() },
            syscallno: -1,
        }
    }
}

impl Registers {
    #[inline]
    pub fn pc(&self) -> u64 {
        self.raw.pc
    }

    #[inline]
    pub fn sp(&self) -> u64 {
        self.raw.sp
    }

    #[inline]
    pub fn return_value(&self) -> u64 {
        self.raw.regs[0]
    }
}

impl Debug for Registers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registers")
            .field("pc", &format_args!("{:#x}", self.raw.pc))
            .field("sp", &format_args!("{:#x}", self.raw.sp))
            .field("x0", &format_args!("{:#x}", self.raw.regs[0]))
            .field("lr", &format_args!("{:#x}", self.raw.regs[LR]))
            .field("syscallno", &self.syscallno)
            .finish()
    }
}

fn regset<T>(value: &mut T) -> iovec {
    iovec {
        iov_base: value as *mut T as *mut libc::c_void,
        iov_len: size_of::<T>(),
    }
}

pub(crate) fn read_registers(pid: pid_t) -> Result<Registers> {
    let mut regs = Registers::default();
    let mut iov = regset(&mut regs.raw);
    ptrace!(PTRACE_GETREGSET, pid, NT_PRSTATUS, &mut iov as *mut iovec)?;
    let mut iov = regset(&mut regs.syscallno);
    ptrace!(PTRACE_GETREGSET, pid, NT_ARM_SYSTEM_CALL, &mut iov as *mut iovec)?;
    Ok(regs)
}

pub(crate) fn write_registers(pid: pid_t, regs: &Registers) -> Result<()> {
    let mut regs = *regs;
    let mut iov = regset(&mut regs.raw);
    ptrace!(PTRACE_SETREGSET, pid, NT_PRSTATUS, &mut iov as *mut iovec)?;
    let mut iov = regset(&mut regs.syscallno);
    ptrace!(PTRACE_SETREGSET, pid, NT_ARM_SYSTEM_CALL, &mut iov as *mut iovec)?;
    Ok(())
}

/// Builds the register state for calling `func(args...)` with the stack
/// pointer at or below `sp`.
///
/// The link register is the fault address, and the syscall number is set to
/// -1 so a thread stopped inside a syscall is not restarted on resume.
pub fn prepare_call(saved: &Registers, func: u64, args: &[u64], sp: u64) -> Result<CallSetup> {
    if args.len() > MAX_CALL_ARGS {
        return Err(remote_call_error(format!(
            "{} arguments given, aarch64 passes at most {MAX_CALL_ARGS} in registers",
            args.len()
        )));
    }
    let mut regs = *saved;
    regs.raw.regs[..args.len()].copy_from_slice(args);
    regs.raw.regs[LR] = super::RETURN_ADDRESS;
    regs.raw.sp = align_down(sp, 16);
    regs.raw.pc = func;
    regs.syscallno = -1;
    Ok(CallSetup {
        regs,
        return_slot: None,
    })
}

/// `ldr x17, #8; br x17; .quad target`
pub fn encode_absolute_jump(target: u64) -> Vec<u8> {
    let mut code = Vec::with_capacity(JUMP_SIZE);
    code.extend_from_slice(&0x5800_0051u32.to_le_bytes());
    code.extend_from_slice(&0xd61f_0220u32.to_le_bytes());
    code.extend_from_slice(&target.to_le_bytes());
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_go_to_x_registers() {
        let setup = prepare_call(&Registers::default(), 0x1000, &[7, 8, 9], 0x7ff8).unwrap();
        assert_eq!(&setup.regs.raw.regs[..3], &[7, 8, 9]);
        assert_eq!(setup.regs.raw.regs[LR], 0);
        assert_eq!(setup.regs.sp(), 0x7ff0);
        assert_eq!(setup.regs.syscallno, -1);
        assert_eq!(setup.return_slot, None);
    }

    #[test]
    fn jump_encoding() {
        assert_eq!(
            encode_absolute_jump(0x1122_3344_5566_7788),
            [
                0x51, 0x00, 0x00, 0x58, 0x20, 0x02, 0x1f, 0xd6, 0x88, 0x77, 0x66, 0x55, 0x44,
                0x33, 0x22, 0x11
            ]
        );
    }
}
