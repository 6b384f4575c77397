//! VMX Model Specific Registers
//!
//! The capability MSRs read when building a [`Capabilities`](crate::Capabilities) snapshot.

use crate::capabilities::Ctls;

// ——————————————————————————————— Known MSRs ——————————————————————————————— //

pub const FEATURE_CONTROL: Msr = Msr::new(0x3A);
pub const VMX_BASIC: Msr = Msr::new(0x480);
pub const VMX_PINBASED_CTLS: Msr = Msr::new(0x481);
pub const VMX_PROCBASED_CTLS: Msr = Msr::new(0x482);
pub const VMX_EXIT_CTLS: Msr = Msr::new(0x483);
pub const VMX_ENTRY_CTLS: Msr = Msr::new(0x484);
pub const VMX_MISC: Msr = Msr::new(0x485);
pub const VMX_CR0_FIXED0: Msr = Msr::new(0x486);
pub const VMX_CR0_FIXED1: Msr = Msr::new(0x487);
pub const VMX_CR4_FIXED0: Msr = Msr::new(0x488);
pub const VMX_CR4_FIXED1: Msr = Msr::new(0x489);
pub const VMX_VMCS_ENUM: Msr = Msr::new(0x48A);
pub const VMX_PROCBASED_CTLS2: Msr = Msr::new(0x48B); // if VMX_PROCBASED_CTLS.[63] = 1
pub const VMX_EPT_VPID_CAP: Msr = Msr::new(0x48C);
pub const VMX_TRUE_PINBASED_CTLS: Msr = Msr::new(0x48D); // if VMX_BASIC.[55] = 1
pub const VMX_TRUE_PROCBASED_CTLS: Msr = Msr::new(0x48E);
pub const VMX_TRUE_EXIT_CTLS: Msr = Msr::new(0x48F);
pub const VMX_TRUE_ENTRY_CTLS: Msr = Msr::new(0x490);
pub const VMX_VMFUNC: Msr = Msr::new(0x491);
pub const IA32_EFER: Msr = Msr::new(0xC000_0080);

/// IA32_FEATURE_CONTROL lock bit.
pub const FEATURE_CONTROL_LOCKED: u64 = 1 << 0;
/// IA32_FEATURE_CONTROL bits enabling VMXON inside and outside SMX operation.
pub const FEATURE_CONTROL_VMXON: u64 = 0b110;

// ——————————————————————————————— MSR Access ——————————————————————————————— //

/// A model specific register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Msr(u32);

impl Msr {
    pub const fn new(reg: u32) -> Self {
        Self(reg)
    }

    pub const fn address(self) -> u32 {
        self.0
    }

    /// The capability MSR reporting the allowed settings of a control field.
    ///
    /// The "true" MSRs are used when IA32_VMX_BASIC.[55] is set, the secondary controls have no
    /// such variant.
    pub const fn for_ctls(ctls: Ctls, true_ctls: bool) -> Msr {
        match (ctls, true_ctls) {
            (Ctls::Pinbased, false) => VMX_PINBASED_CTLS,
            (Ctls::Pinbased, true) => VMX_TRUE_PINBASED_CTLS,
            (Ctls::Primary, false) => VMX_PROCBASED_CTLS,
            (Ctls::Primary, true) => VMX_TRUE_PROCBASED_CTLS,
            (Ctls::Secondary, _) => VMX_PROCBASED_CTLS2,
            (Ctls::Exit, false) => VMX_EXIT_CTLS,
            (Ctls::Exit, true) => VMX_TRUE_EXIT_CTLS,
            (Ctls::Entry, false) => VMX_ENTRY_CTLS,
            (Ctls::Entry, true) => VMX_TRUE_ENTRY_CTLS,
        }
    }

    /// Reads the MSR.
    ///
    /// ## Safety
    ///
    /// The caller must ensure that the MSR exists on the current processor, otherwise RDMSR
    /// raises #GP.
    #[inline]
    pub unsafe fn read(&self) -> u64 {
        x86::msr::rdmsr(self.0)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
