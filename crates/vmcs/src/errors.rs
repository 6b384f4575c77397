//! VMX Errors

/// An error that occured during VMX operations or while accessing a VMCS field.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum VmxError {
    /// VMCS pointer is valid, but some other error was encountered. Read VM-instruction error
    /// field of VMCS for more details.
    VmFailValid(VmxInstructionError),

    /// VMCS pointer is invalid.
    VmFailInvalid,

    /// VMX is not supported by the current CPU.
    VmxNotSupported,

    /// VMX is supported by the CPU but not enabled. See IA_32_FEATURE_CONTROL MSR.
    VmxNotEnabled,

    /// A particular feature is not supported.
    FeatureNotSupported,

    /// The field is not implemented by the processor, according to the capability snapshot.
    UnsupportedField(&'static str),

    /// Value 0 is not supported for one of the control bits for which it was requested.
    Disallowed0(&'static str, u8),

    /// Value 1 is not supported for one of the control bits for which it was requested.
    Disallowed1(&'static str, u8),
}

/// An error resulting from the execution of a VMX instruction.
///
/// See Intel Manual 3C Section 30.4.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum VmxInstructionError {
    /// VMCALL executed in VMX-root operation.
    VmCallRoot,
    /// VMCLEAR with invalid physical address.
    VmClearInvalid,
    /// VMCLEAR with VMXON pointer.
    VmClearVmxon,
    /// VMLAUNCH with non-clear VMCS.
    VmLaunchNonClear,
    /// VMRESUME with non-launched VMCS.
    VmResumeNonLaunched,
    /// VMRESUME after VMXOFF.
    VmResumeAfterVmxoff,
    /// VM entry with invalid control fields.
    VmEntryInvalidCtrlFields,
    /// VM entry with invalid host state.
    VmEntryInvalidHostState,
    /// VMPTRLD with invalid physical address.
    VmPtrldInvalidPhysAddr,
    /// VMPTRLD with VMXON pointer.
    VmPtrldVmxon,
    /// VMPTRLD with incorrect VMCS revision identifier.
    VmPtrldInvalidRevId,
    /// VMREAD/VMWRITE to unsupported component.
    VmAccessUnsupportedField,
    /// VMWRITE to read-only component.
    VmWriteToReadOnly,
    /// VMXON executed in VMX root operation.
    VmxonDuringVmxRoot,
    /// VM entry with invalid executive-VMCS pointer.
    VmEntryInvalidVmcs,
    /// VM entry with non-launched executive VMCS.
    VmEntryNonLaunched,
    /// VM entry with executive-VMCS pointer not VMXON pointer.
    VmEntryVmcsNotVmxon,
    /// VMCALL with non-clear VMCS.
    VmCallNonClearVmcs,
    /// VMCALL with invalid VM-exit control fields.
    VmCallInvalidExitCtrlFields,
    /// VMCALL with incorrect MSEG revision identifier.
    VmCallInvalidRevId,
    /// VMXOFF under dual-monitor treatment of SMIs and SMM.
    VmxoffDualMonitor,
    /// VMCALL with invalid SMM-monitor features.
    VmCallInvalidSmmFeatures,
    /// VM entry with invalid VM-execution control fields in executive VMCS.
    VmEntryInvalidExecCtrlFields,
    /// VM entry with events blocked by MOV SS.
    VmEntryBlockedMovSS,
    /// Invalid operand to INVEPT/INVVPID.
    InvalidInvEptInvPid,
    /// Unknown error.
    Unknown,
}

impl VmxInstructionError {
    /// Decodes the content of the VM-instruction error field.
    pub fn from_u64(err: u64) -> VmxInstructionError {
        match err {
            1 => Self::VmCallRoot,
            2 => Self::VmClearInvalid,
            3 => Self::VmClearVmxon,
            4 => Self::VmLaunchNonClear,
            5 => Self::VmResumeNonLaunched,
            6 => Self::VmResumeAfterVmxoff,
            7 => Self::VmEntryInvalidCtrlFields,
            8 => Self::VmEntryInvalidHostState,
            9 => Self::VmPtrldInvalidPhysAddr,
            10 => Self::VmPtrldVmxon,
            11 => Self::VmPtrldInvalidRevId,
            12 => Self::VmAccessUnsupportedField,
            13 => Self::VmWriteToReadOnly,
            15 => Self::VmxonDuringVmxRoot,
            16 => Self::VmEntryInvalidVmcs,
            17 => Self::VmEntryNonLaunched,
            18 => Self::VmEntryVmcsNotVmxon,
            19 => Self::VmCallNonClearVmcs,
            20 => Self::VmCallInvalidExitCtrlFields,
            22 => Self::VmCallInvalidRevId,
            23 => Self::VmxoffDualMonitor,
            24 => Self::VmCallInvalidSmmFeatures,
            25 => Self::VmEntryInvalidExecCtrlFields,
            26 => Self::VmEntryBlockedMovSS,
            28 => Self::InvalidInvEptInvPid,
            _ => Self::Unknown,
        }
    }

    /// Returns the error number, as stored in the VM-instruction error field.
    pub fn as_u64(self) -> u64 {
        match self {
            Self::VmCallRoot => 1,
            Self::VmClearInvalid => 2,
            Self::VmClearVmxon => 3,
            Self::VmLaunchNonClear => 4,
            Self::VmResumeNonLaunched => 5,
            Self::VmResumeAfterVmxoff => 6,
            Self::VmEntryInvalidCtrlFields => 7,
            Self::VmEntryInvalidHostState => 8,
            Self::VmPtrldInvalidPhysAddr => 9,
            Self::VmPtrldVmxon => 10,
            Self::VmPtrldInvalidRevId => 11,
            Self::VmAccessUnsupportedField => 12,
            Self::VmWriteToReadOnly => 13,
            Self::VmxonDuringVmxRoot => 15,
            Self::VmEntryInvalidVmcs => 16,
            Self::VmEntryNonLaunched => 17,
            Self::VmEntryVmcsNotVmxon => 18,
            Self::VmCallNonClearVmcs => 19,
            Self::VmCallInvalidExitCtrlFields => 20,
            Self::VmCallInvalidRevId => 22,
            Self::VmxoffDualMonitor => 23,
            Self::VmCallInvalidSmmFeatures => 24,
            Self::VmEntryInvalidExecCtrlFields => 25,
            Self::VmEntryBlockedMovSS => 26,
            Self::InvalidInvEptInvPid => 28,
            Self::Unknown => 0,
        }
    }
}

impl core::fmt::Display for VmxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::VmFailValid(err) => write!(f, "VMfailValid: {:?}", err),
            Self::VmFailInvalid => write!(f, "VMfailInvalid"),
            Self::VmxNotSupported => write!(f, "VMX is not supported"),
            Self::VmxNotEnabled => write!(f, "VMX is not enabled"),
            Self::FeatureNotSupported => write!(f, "feature not supported"),
            Self::UnsupportedField(name) => write!(f, "{} is not supported", name),
            Self::Disallowed0(name, bit) => write!(f, "{} (bit {}) cannot be 0", name, bit),
            Self::Disallowed1(name, bit) => write!(f, "{} (bit {}) cannot be 1", name, bit),
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn instruction_error_codes() {
        for code in 0..32 {
            let err = VmxInstructionError::from_u64(code);
            if err != VmxInstructionError::Unknown {
                assert_eq!(err.as_u64(), code);
            }
        }
        assert_eq!(VmxInstructionError::from_u64(14), VmxInstructionError::Unknown);
        assert_eq!(
            VmxInstructionError::from_u64(13),
            VmxInstructionError::VmWriteToReadOnly
        );
    }
}
