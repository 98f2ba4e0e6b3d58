//! Architecture specific calling conventions, register access and jump encoding.
//!
//! Every architecture module provides the same surface:
//! * [`Registers`] with `pc`, `sp` and `return_value` accessors
//! * `read_registers` / `write_registers` for a stopped tracee
//! * [`prepare_call`] to turn saved registers into a call frame
//! * [`encode_absolute_jump`] used when patching function entries

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")]{
        mod x86_64;
        pub use x86_64::*;
    }else if #[cfg(target_arch = "aarch64")]{
        mod aarch64;
        pub use aarch64::*;
    }else {
        compile_error!("dlinject supports only x86_64 and aarch64");
    }
}

/// The address injected calls return to. Jumping there faults, which hands
/// control back to the tracer.
pub const RETURN_ADDRESS: u64 = 0;

/// Registers and stack writes needed to start an injected call.
#[derive(Debug, Clone, Copy)]
pub struct CallSetup {
    pub regs: Registers,
    /// Stack slot that must hold [`RETURN_ADDRESS`] before resuming, on
    /// architectures that pass the return address on the stack.
    pub return_slot: Option<u64>,
}

#[inline]
pub(crate) const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_down_rounds_to_boundary() {
        assert_eq!(align_down(0x7fff_1238, 16), 0x7fff_1230);
        assert_eq!(align_down(0x7fff_1230, 16), 0x7fff_1230);
        assert_eq!(align_down(0x1fff, 0x1000), 0x1000);
    }

    #[test]
    fn jump_has_fixed_size() {
        let jump = encode_absolute_jump(0x7f12_3456_7890);
        assert_eq!(jump.len(), JUMP_SIZE);
    }

    #[test]
    fn too_many_arguments_are_rejected() {
        let args = vec![0u64; MAX_CALL_ARGS + 1];
        assert!(prepare_call(&Registers::default(), 0x1000, &args, 0x7000).is_err());
    }

    #[test]
    fn call_returns_to_the_fault_address() {
        let setup = prepare_call(&Registers::default(), 0x4000, &[1, 2], 0x7fff_0010).unwrap();
        assert_eq!(setup.regs.pc(), 0x4000);
        assert_eq!(setup.regs.sp() % 8, 0);
        assert!(setup.regs.sp() < 0x7fff_0010);
    }
}
