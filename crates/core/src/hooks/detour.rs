//! Inline detours built with iced-x86
//!
//! A prepared detour owns three pieces: the patch (a rel32 `jmp` plus NOP
//! padding, covering whole instructions), a near stub that absolute-jumps
//! to the replacement, and a trampoline holding the relocated prologue
//! followed by a jump back into the target. Preparing writes only the stub
//! and trampoline; the target itself is untouched until `enable`.

use std::ptr::NonNull;

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};

use super::trampoline::{alloc_slot, SLOT_SIZE};

/// Length of the `jmp rel32` written over the target.
pub const PATCH_LEN: usize = 5;

/// Length of an absolute `jmp [rip+0]` plus its 8-byte slot.
const ABS_JMP_LEN: usize = 14;

/// Offset of the trampoline within a slot; the stub occupies the front.
const TRAMPOLINE_OFFSET: usize = 16;

/// Bytes of target prologue read for decoding.
const PROLOGUE_SCAN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("target {0:#x} is not decodable x86_64 code")]
    DecodeFailed(usize),

    #[error("target {0:#x} ends before a {PATCH_LEN}-byte patch fits")]
    TargetTooSmall(usize),

    #[error("no executable slot within rel32 reach of {0:#x}")]
    OutOfNearMemory(usize),

    #[error("stub at {stub:#x} unreachable by rel32 from {target:#x}")]
    OutOfReach { target: usize, stub: usize },

    #[error("prologue relocation failed: {0}")]
    Relocation(String),

    #[error("relocated prologue does not fit a {SLOT_SIZE}-byte slot")]
    PrologueTooLarge,

    #[error("memory protection change failed: {0}")]
    MemoryProtection(String),

    #[error("target {0:#x} is already hooked")]
    AlreadyHooked(usize),

    #[error("hook not found")]
    NotFound,

    #[error("swap-chain vtable resolution failed: {0}")]
    Vtable(String),

    #[error("engine is {0}, operation needs {1}")]
    BadState(&'static str, &'static str),
}

/// Decode whole instructions from `code` until at least [`PATCH_LEN`] bytes
/// are covered.
fn decode_prologue(code: &[u8], ip: u64) -> Result<(Vec<Instruction>, usize), HookError> {
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut stolen = Vec::new();
    let mut covered = 0usize;

    while covered < PATCH_LEN {
        if !decoder.can_decode() {
            return Err(HookError::DecodeFailed(ip as usize));
        }
        let instr = decoder.decode();
        if instr.is_invalid() {
            return Err(HookError::DecodeFailed(ip as usize));
        }
        // A return or interrupt inside the patch window means the function
        // is shorter than the patch.
        if matches!(
            instr.flow_control(),
            FlowControl::Return | FlowControl::Interrupt | FlowControl::Exception
        ) {
            return Err(HookError::TargetTooSmall(ip as usize));
        }
        covered += instr.len();
        stolen.push(instr);
    }
    Ok((stolen, covered))
}

/// `jmp [rip+0]` followed by the destination, 14 bytes total.
fn encode_abs_jmp(dest: u64) -> [u8; ABS_JMP_LEN] {
    let mut out = [0u8; ABS_JMP_LEN];
    out[..6].copy_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
    out[6..].copy_from_slice(&dest.to_le_bytes());
    out
}

/// `jmp rel32` to `stub`, NOP-padded to `stolen` bytes.
fn encode_patch(target: usize, stub: usize, stolen: usize) -> Result<Vec<u8>, HookError> {
    let displacement = (stub as i64).wrapping_sub(target as i64 + PATCH_LEN as i64);
    let rel32 =
        i32::try_from(displacement).map_err(|_| HookError::OutOfReach { target, stub })?;
    let mut patch = Vec::with_capacity(stolen);
    patch.push(0xE9);
    patch.extend_from_slice(&rel32.to_le_bytes());
    patch.resize(stolen, 0x90);
    Ok(patch)
}

/// A prepared (and possibly live) inline hook on one function.
pub struct Detour {
    name: &'static str,
    target: *mut u8,
    stolen: usize,
    original: Vec<u8>,
    patch: Vec<u8>,
    trampoline: *const (),
    enabled: bool,
}

// SAFETY: the raw pointers are code addresses; all mutation goes through
// &mut self and the engine serializes access.
unsafe impl Send for Detour {}

impl Detour {
    /// Build the stub, trampoline and patch for hooking `target` with
    /// `replacement`. The target's bytes are left untouched.
    ///
    /// # Safety
    ///
    /// `target` must be the entry of a function at least [`PATCH_LEN`]
    /// decodable bytes long, and `replacement` must share its signature and
    /// calling convention.
    pub unsafe fn prepare(
        name: &'static str,
        target: *const (),
        replacement: *const (),
    ) -> Result<Self, HookError> {
        let target_addr = target as usize;
        let prologue = std::slice::from_raw_parts(target as *const u8, PROLOGUE_SCAN);
        let (stolen_instrs, stolen) = decode_prologue(prologue, target_addr as u64)?;

        let slot: NonNull<u8> =
            alloc_slot(target_addr).ok_or(HookError::OutOfNearMemory(target_addr))?;
        let stub_addr = slot.as_ptr() as usize;
        let trampoline_addr = stub_addr + TRAMPOLINE_OFFSET;

        // Relocate the stolen prologue to its new address; rip-relative
        // operands and short branches get rewritten by the block encoder.
        let block = InstructionBlock::new(&stolen_instrs, trampoline_addr as u64);
        let relocated = BlockEncoder::encode(64, block, BlockEncoderOptions::NONE)
            .map_err(|e| HookError::Relocation(e.to_string()))?
            .code_buffer;
        if TRAMPOLINE_OFFSET + relocated.len() + ABS_JMP_LEN > SLOT_SIZE {
            return Err(HookError::PrologueTooLarge);
        }

        let stub = encode_abs_jmp(replacement as u64);
        let back = encode_abs_jmp((target_addr + stolen) as u64);
        std::ptr::copy_nonoverlapping(stub.as_ptr(), slot.as_ptr(), stub.len());
        let tramp_ptr = slot.as_ptr().add(TRAMPOLINE_OFFSET);
        std::ptr::copy_nonoverlapping(relocated.as_ptr(), tramp_ptr, relocated.len());
        std::ptr::copy_nonoverlapping(back.as_ptr(), tramp_ptr.add(relocated.len()), back.len());

        let patch = encode_patch(target_addr, stub_addr, stolen)?;
        let original = prologue[..stolen].to_vec();

        tracing::debug!(
            name,
            target = format_args!("{target_addr:#x}"),
            stub = format_args!("{stub_addr:#x}"),
            stolen,
            "detour prepared"
        );

        Ok(Detour {
            name,
            target: target as *mut u8,
            stolen,
            original,
            patch,
            trampoline: tramp_ptr as *const (),
            enabled: false,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target_addr(&self) -> usize {
        self.target as usize
    }

    /// Entry point that runs the original function.
    pub fn trampoline(&self) -> *const () {
        self.trampoline
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write the patch over the target. Idempotent.
    pub fn enable(&mut self) -> Result<(), HookError> {
        if self.enabled {
            return Ok(());
        }
        self.splice(&self.patch.clone())?;
        self.enabled = true;
        tracing::info!(name = self.name, target = format_args!("{:#x}", self.target_addr()), "hook enabled");
        Ok(())
    }

    /// Restore the original bytes. Idempotent.
    pub fn disable(&mut self) -> Result<(), HookError> {
        if !self.enabled {
            return Ok(());
        }
        self.splice(&self.original.clone())?;
        self.enabled = false;
        tracing::info!(name = self.name, target = format_args!("{:#x}", self.target_addr()), "hook disabled");
        Ok(())
    }

    fn splice(&mut self, bytes: &[u8]) -> Result<(), HookError> {
        debug_assert_eq!(bytes.len(), self.stolen);
        unsafe {
            let guard = region::protect_with_handle(
                self.target,
                self.stolen,
                region::Protection::READ_WRITE_EXECUTE,
            )
            .map_err(|e| HookError::MemoryProtection(e.to_string()))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.target, bytes.len());
            drop(guard);
        }
        Ok(())
    }
}

impl Drop for Detour {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = self.disable() {
                tracing::error!(name = self.name, error = %e, "failed to restore target on drop");
            }
        }
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    fn test_decode_prologue_whole_instructions() {
        // sub rsp, 0x28 (4 bytes) then nop: patch must cover 5 bytes.
        let code = [0x48, 0x83, 0xEC, 0x28, 0x90, 0xC3, 0x00, 0x00];
        let (instrs, stolen) = decode_prologue(&code, 0x1000).unwrap();
        assert_eq!(instrs.len(), 2);
        assert_eq!(stolen, 5);
    }

    #[test]
    fn test_decode_rejects_early_return() {
        // ret lands inside the patch window.
        let code = [0x90, 0xC3, 0x90, 0x90, 0x90, 0x90];
        assert!(matches!(
            decode_prologue(&code, 0x1000),
            Err(HookError::TargetTooSmall(_))
        ));
    }

    #[test]
    fn test_encode_patch_layout() {
        let patch = encode_patch(0x1000, 0x2000, 7).unwrap();
        assert_eq!(patch.len(), 7);
        assert_eq!(patch[0], 0xE9);
        assert_eq!(i32::from_le_bytes(patch[1..5].try_into().unwrap()), 0xFFB);
        assert_eq!(&patch[5..], &[0x90, 0x90]);
    }

    #[test]
    fn test_encode_patch_rejects_far_stub() {
        let err = encode_patch(0, usize::MAX / 2, 5).unwrap_err();
        assert!(matches!(err, HookError::OutOfReach { .. }));
    }

    #[test]
    fn test_abs_jmp_bytes() {
        let jmp = encode_abs_jmp(0x1122_3344_5566_7788);
        assert_eq!(&jmp[..6], &[0xFF, 0x25, 0, 0, 0, 0]);
        assert_eq!(u64::from_le_bytes(jmp[6..].try_into().unwrap()), 0x1122_3344_5566_7788);
    }

    /// Emit a tiny `mov eax, imm32; ret` function into an executable slot.
    fn emit_const_fn(value: u32) -> *const () {
        let slot = alloc_slot(emit_const_fn as usize).unwrap();
        let mut code = vec![0xB8u8];
        code.extend_from_slice(&value.to_le_bytes());
        code.push(0xC3);
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), slot.as_ptr(), code.len());
        }
        slot.as_ptr() as *const ()
    }

    #[test]
    fn test_detour_end_to_end() {
        let target = emit_const_fn(7);
        let replacement = emit_const_fn(9);
        let call = |p: *const ()| unsafe {
            let f: extern "C" fn() -> u32 = std::mem::transmute(p);
            f()
        };

        let mut detour = unsafe { Detour::prepare("const_fn", target, replacement) }.unwrap();
        // Prepared but not enabled: target unchanged.
        assert_eq!(call(target), 7);

        detour.enable().unwrap();
        assert_eq!(call(target), 9);
        assert_eq!(call(detour.trampoline()), 7);

        detour.disable().unwrap();
        assert_eq!(call(target), 7);
    }
}
