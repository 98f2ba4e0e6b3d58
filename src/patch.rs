//! Redirecting a function of the debuggee to a replacement.
//!
//! The entry of the original function is overwritten with an absolute jump
//! to the replacement, typically a function of a library just loaded with
//! [`Injector::dlopen`](crate::Injector::dlopen). The overwritten bytes are
//! kept so the patch can be reverted.

use crate::{
    Result,
    arch::{JUMP_SIZE, encode_absolute_jump},
    error::patch_error,
    ptrace::Tracee,
};

/// A jump written over the entry of a function in the debuggee.
#[derive(Debug, Clone)]
pub struct FunctionPatch {
    target: u64,
    replacement: u64,
    original: Vec<u8>,
    installed: bool,
}

impl FunctionPatch {
    /// Makes calls to `target` land in `replacement`.
    ///
    /// `target_size` is the size of the original function when known (0
    /// otherwise); functions shorter than the jump cannot be patched.
    pub fn install(
        tracee: &Tracee,
        target: u64,
        target_size: u64,
        replacement: u64,
    ) -> Result<FunctionPatch> {
        if target == 0 || replacement == 0 {
            return Err(patch_error("cannot patch from or to a null address"));
        }
        if target == replacement {
            return Err(patch_error(format!(
                "{target:#x} would jump to itself"
            )));
        }
        if target_size != 0 && target_size < JUMP_SIZE as u64 {
            return Err(patch_error(format!(
                "function at {target:#x} is {target_size} bytes, the jump needs {JUMP_SIZE}"
            )));
        }
        let jump = encode_absolute_jump(replacement);
        let mut original = vec![0u8; jump.len()];
        tracee.read_memory(target, &mut original)?;
        tracee.write_memory(target, &jump)?;

        let mut written = vec![0u8; jump.len()];
        tracee.read_memory(target, &mut written)?;
        if written != jump {
            tracee.write_memory(target, &original)?;
            return Err(patch_error(format!(
                "jump at {target:#x} did not stick"
            )));
        }
        log::info!("patched {target:#x} -> {replacement:#x}");
        Ok(FunctionPatch {
            target,
            replacement,
            original,
            installed: true,
        })
    }

    /// Restores the original entry bytes.
    pub fn revert(&mut self, tracee: &Tracee) -> Result<()> {
        if !self.installed {
            return Ok(());
        }
        tracee.write_memory(self.target, &self.original)?;
        self.installed = false;
        log::info!("reverted patch at {:#x}", self.target);
        Ok(())
    }

    #[inline]
    pub fn target(&self) -> u64 {
        self.target
    }

    #[inline]
    pub fn replacement(&self) -> u64 {
        self.replacement
    }

    /// The bytes the jump replaced.
    #[inline]
    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    #[inline]
    pub fn is_installed(&self) -> bool {
        self.installed
    }
}
