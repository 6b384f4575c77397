//! VMCS field access and VM-entry checks
//!
//! Typed access to the fields of a VMCS ([`fields`], [`access`]), gated by a snapshot of the VMX
//! capabilities of the processor ([`capabilities`]), and a software implementation of the checks
//! the processor performs on VM entry ([`check`]).
//!
//! The VMX operation lifecycle (VMXON, VMCLEAR, VMPTRLD, VMXOFF) is wrapped by [`Vmxon`],
//! [`VmcsRegion`] and [`ActiveVmcs`], the latter being the hardware [`VmcsBackend`].
#![cfg_attr(not(test), no_std)]

pub mod access;
pub mod bitmaps;
pub mod capabilities;
pub mod check;
pub mod dump;
pub mod errors;
pub mod fields;
pub mod msr;
pub mod raw;

#[cfg(test)]
mod fake;

use core::arch;
use core::arch::asm;
use core::marker::PhantomData;

pub use utils::{Frame, GuestPhysAddr, GuestVirtAddr, HostPhysAddr, HostVirtAddr, FRAME_SIZE};

pub use crate::access::{Vmcs, VmcsBackend};
pub use crate::capabilities::Capabilities;
pub use crate::check::{CheckError, CheckResult, Checker, Collect, FailFast, PhysMemory, Violation};
pub use crate::errors::{VmxError, VmxInstructionError};

/// CPUID mask for VMX support
const CPUID_ECX_VMX_MASK: u32 = 1 << 5;

/// CR4.VMXE
const CR4_VMX_ENABLE: u64 = 1 << 13;

// ————————————————————————————— VMX Operations ————————————————————————————— //

/// Returns Ok if VMX is available, otherwise returns the reason it's not.
///
/// If VMX is available but not enabled in CR4, CR4.VMXE is set.
pub fn vmx_available() -> Result<(), VmxError> {
    // CPUID is not supported under SGX, we assume that this function is never executed under SGX.
    let cpuid = arch::x86_64::__cpuid(0x01);
    if (cpuid.ecx & CPUID_ECX_VMX_MASK) == 0 {
        return Err(VmxError::VmxNotSupported);
    }

    let cr4 = read_cr4();
    if (cr4 & CR4_VMX_ENABLE) == 0 {
        // SAFETY: setting CR4.VMXE is always possible when VMX is supported, clearing it during VMX
        // operation causes #UD.
        unsafe { write_cr4(cr4 | CR4_VMX_ENABLE) };
    }

    // See manual 3C Section 23.7
    // SAFETY: IA32_FEATURE_CONTROL exists on processors supporting VMX.
    let feature_control = unsafe { msr::FEATURE_CONTROL.read() };
    if feature_control & msr::FEATURE_CONTROL_LOCKED == 0
        || feature_control & msr::FEATURE_CONTROL_VMXON == 0
    {
        return Err(VmxError::VmxNotEnabled);
    }

    Ok(())
}

// ————————————————————————————————— VMXON —————————————————————————————————— //

/// The processor is in VMX operation.
pub struct Vmxon {
    frame: Frame,
    caps: Capabilities,
    // This field makes Vmxon !Sync and !Send, therefore it can't be sent or shared with another
    // core.
    _not_sync: PhantomData<*const ()>,
}

/// Enter VMX operations.
///
/// # Safety
///
/// VMX must be available, see [`vmx_available`], and the frame must be exclusively owned by the
/// VMXON region until [`Vmxon::vmxoff`].
//  NOTE: see Intel SDM Vol 3C Section 24.11.5
pub unsafe fn vmxon(mut frame: Frame) -> Result<Vmxon, VmxError> {
    let caps = *capabilities::boot_snapshot();
    check_region_size(&caps)?;
    frame.stamp_revision(caps.revision());
    raw::vmxon(frame.phys_addr)?;
    log::info!("VMXON region at {:#x}", frame.phys_addr.as_u64());
    Ok(Vmxon {
        frame,
        caps,
        _not_sync: PhantomData,
    })
}

impl Vmxon {
    /// Turns off VMX mode, giving back the VMXON region.
    ///
    /// # Safety
    ///
    /// No VMCS region created by this `Vmxon` may be used afterward.
    pub unsafe fn vmxoff(self) -> Result<Frame, VmxError> {
        raw::vmxoff()?;
        Ok(self.frame)
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    /// Creates a new VM control structure from the given frame.
    ///
    /// The frame is stamped with the VMCS revision identifier and cleared with VMCLEAR.
    ///
    /// # Safety
    ///
    /// The frame must be exclusively owned by the VMCS region.
    pub unsafe fn create_vm(&self, mut frame: Frame) -> Result<VmcsRegion<'_>, VmxError> {
        frame.stamp_revision(self.caps.revision());
        raw::vmclear(frame.phys_addr)?;

        Ok(VmcsRegion {
            frame,
            caps: self.caps,
            _lifetime: PhantomData,
            _not_sync: PhantomData,
        })
    }
}

// —————————————————————————————————— VMCS —————————————————————————————————— //

/// A region containing information about a VM.
pub struct VmcsRegion<'vmx> {
    /// The frame used by the region.
    frame: Frame,
    caps: Capabilities,
    /// This fields ties the region to the VMX operation it was created in.
    _lifetime: PhantomData<&'vmx Vmxon>,
    /// This field makes VmcsRegion !Sync and !Send, therefore it can't be sent or shared with
    /// another core.
    _not_sync: PhantomData<*const ()>,
}

impl<'vmx> VmcsRegion<'vmx> {
    /// Makes this region the current active region.
    pub fn set_as_active(self) -> Result<Vmcs<ActiveVmcs<'vmx>>, VmxError> {
        // SAFETY: the region was stamped and cleared by `Vmxon::create_vm`.
        unsafe { raw::vmptrld(self.frame.phys_addr)? };
        let caps = self.caps;
        Ok(Vmcs::new(ActiveVmcs { region: self }, caps))
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

/// The current VMCS of the processor, accessed with VMREAD and VMWRITE.
pub struct ActiveVmcs<'vmx> {
    region: VmcsRegion<'vmx>,
}

impl<'vmx> ActiveVmcs<'vmx> {
    /// Deactivates the region with VMCLEAR, its content is flushed to memory.
    pub fn deactivate(self) -> Result<VmcsRegion<'vmx>, VmxError> {
        // SAFETY: the region is the current VMCS.
        unsafe { raw::vmclear(self.region.frame.phys_addr)? };
        Ok(self.region)
    }

    pub fn frame(&self) -> &Frame {
        self.region.frame()
    }
}

impl<'vmx> VmcsBackend for ActiveVmcs<'vmx> {
    fn vmread(&self, encoding: u32) -> Result<u64, VmxError> {
        // SAFETY: the region is the current VMCS, and the accessors only read fields that exist.
        unsafe { raw::vmread(encoding) }
    }

    fn vmwrite(&mut self, encoding: u32, value: u64) -> Result<(), VmxError> {
        // SAFETY: the region is the current VMCS, and the accessors only write fields that exist.
        unsafe { raw::vmwrite(encoding, value) }
    }
}

impl<'vmx> Vmcs<ActiveVmcs<'vmx>> {
    /// Deactivates the region, see [`ActiveVmcs::deactivate`].
    pub fn deactivate(self) -> Result<VmcsRegion<'vmx>, VmxError> {
        self.into_inner().deactivate()
    }
}

// ————————————————————————————————— Utils —————————————————————————————————— //

/// VMXON and VMCS regions are carved out of a single frame.
fn check_region_size(caps: &Capabilities) -> Result<(), VmxError> {
    if caps.vmcs_size() as usize > FRAME_SIZE {
        log::error!("VMCS regions of {} bytes do not fit in a frame", caps.vmcs_size());
        return Err(VmxError::FeatureNotSupported);
    }
    Ok(())
}

fn read_cr4() -> u64 {
    let cr4: u64;
    unsafe {
        asm! {
            "mov {}, cr4",
            out(reg) cr4,
            options(nomem, nostack, preserves_flags),
        };
    }
    cr4
}

unsafe fn write_cr4(cr4: u64) {
    asm! {
        "mov cr4, {}",
        in(reg) cr4,
        options(nomem, nostack, preserves_flags),
    };
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn region_size() {
        let mut caps = Capabilities::new().with_revision(0x12);
        caps.basic |= 0x1000u64 << 32;
        assert_eq!(check_region_size(&caps), Ok(()));

        caps.basic = (caps.basic & !(0x1FFFu64 << 32)) | (0x1008u64 << 32);
        assert_eq!(check_region_size(&caps), Err(VmxError::FeatureNotSupported));
    }
}
