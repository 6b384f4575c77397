//! Raw VMX instructions
//!
//! Thin wrappers around VMXON, VMXOFF, VMCLEAR, VMPTRLD, VMREAD and VMWRITE translating the
//! VMsucceed / VMfailInvalid / VMfailValid conventions into a `Result`. Nothing is validated
//! here: the region lifecycle in the crate root and the field descriptors of [`crate::fields`]
//! are the typed layers on top.

use core::arch::asm;

use utils::HostPhysAddr;
use x86::bits64::rflags::RFlags;

use crate::errors::{VmxError, VmxInstructionError};
use crate::fields::exit::vm_instruction_error;

/// Executes VMXON with the given VMXON region.
///
/// # Safety
///
/// The region must be a page-aligned frame stamped with the VMCS revision identifier, CR4.VMXE
/// must be set.
pub unsafe fn vmxon(region: HostPhysAddr) -> Result<(), VmxError> {
    let addr = region.as_u64();
    asm!("vmxon ({0})", in(reg) &addr, options(att_syntax));
    status()
}

/// Executes VMXOFF.
///
/// # Safety
///
/// The processor must be in VMX operation.
pub unsafe fn vmxoff() -> Result<(), VmxError> {
    asm!("vmxoff");
    status()
}

/// Executes VMCLEAR on the given VMCS region, flushing its content to memory.
///
/// # Safety
///
/// The processor must be in VMX operation and the region must not be the VMXON region.
pub unsafe fn vmclear(region: HostPhysAddr) -> Result<(), VmxError> {
    let addr = region.as_u64();
    asm!("vmclear ({0})", in(reg) &addr, options(att_syntax));
    status()
}

/// Executes VMPTRLD, the region becomes the current VMCS.
///
/// # Safety
///
/// The processor must be in VMX operation and the region must be stamped with the revision
/// identifier.
pub unsafe fn vmptrld(region: HostPhysAddr) -> Result<(), VmxError> {
    let addr = region.as_u64();
    asm!("vmptrld ({0})", in(reg) &addr, options(att_syntax));
    status()
}

/// Executes VMREAD on the current VMCS.
///
/// # Safety
///
/// A VMCS must be current.
pub unsafe fn vmread(encoding: u32) -> Result<u64, VmxError> {
    let value: u64;
    asm!("vmread {0}, {1}", in(reg) encoding as u64, out(reg) value, options(att_syntax));
    status().and(Ok(value))
}

/// Executes VMWRITE on the current VMCS.
///
/// # Safety
///
/// A VMCS must be current, and the write must not break invariants the host relies on (host
/// state, EPT pointer...).
pub unsafe fn vmwrite(encoding: u32, value: u64) -> Result<(), VmxError> {
    asm!("vmwrite {1}, {0}", in(reg) encoding as u64, in(reg) value, options(att_syntax));
    status()
}

/// Decodes RFLAGS after a VMX instruction, see Intel SDM Vol 3C Section 30.2.
//  Must stay inlined: a function prologue between the instruction and the RFLAGS read could
//  clobber the flags, see https://github.com/gz/rust-x86/pull/50.
#[inline(always)]
unsafe fn status() -> Result<(), VmxError> {
    let flags = rflags_read();
    if flags.contains(RFlags::FLAGS_ZF) {
        Err(VmxError::VmFailValid(instruction_error()))
    } else if flags.contains(RFlags::FLAGS_CF) {
        Err(VmxError::VmFailInvalid)
    } else {
        Ok(())
    }
}

/// Reads the VM-instruction error field of the current VMCS, after a VMfailValid.
#[inline(always)]
unsafe fn instruction_error() -> VmxInstructionError {
    let encoding = vm_instruction_error::FIELD.encoding() as u64;
    let err: u64;
    asm!("vmread {0}, {1}", in(reg) encoding, out(reg) err, options(att_syntax));
    if rflags_read().intersects(RFlags::FLAGS_ZF | RFlags::FLAGS_CF) {
        VmxInstructionError::Unknown
    } else {
        VmxInstructionError::from_u64(err)
    }
}

#[inline(always)]
fn rflags_read() -> RFlags {
    let r: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags));
    }
    RFlags::from_bits_truncate(r)
}
