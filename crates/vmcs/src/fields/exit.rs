//! VM-exit information fields
//!
//! These fields are read-only, see Intel SDM, Volume 3C, Section 24.9.

use super::exists::always;
use crate::access::{Bits, Field, Flag};

macro_rules! field {
    ($module:ident, $encoding:literal, $name:literal) => {
        pub mod $module {
            use super::*;

            pub const FIELD: Field = Field::new($encoding, $name, always);
        }
    };
}

field!(vm_instruction_error, 0x4400, "vm_instruction_error");

pub mod exit_reason {
    use super::*;

    pub const FIELD: Field = Field::new(0x4402, "exit_reason", always);

    pub const BASIC_EXIT_REASON: Bits = FIELD.bits("basic_exit_reason", 0x0000_FFFF);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0x47FF_0000);
    pub const VM_EXIT_INCIDENT_TO_ENCLAVE_MODE: Flag =
        FIELD.flag("vm_exit_incident_to_enclave_mode", 27);
    pub const PENDING_MTF_VM_EXIT: Flag = FIELD.flag("pending_mtf_vm_exit", 28);
    pub const VM_EXIT_FROM_VMX_ROOT_OPERATION: Flag =
        FIELD.flag("vm_exit_from_vmx_root_operation", 29);
    pub const VM_ENTRY_FAILURE: Flag = FIELD.flag("vm_entry_failure", 31);
}

pub mod vm_exit_interruption_information {
    use super::*;

    pub const FIELD: Field = Field::new(0x4404, "vm_exit_interruption_information", always);

    pub const VECTOR: Bits = FIELD.bits("vector", 0x0000_00FF);
    pub const INTERRUPTION_TYPE: Bits = FIELD.bits("interruption_type", 0x0000_0700);
    pub const ERROR_CODE_VALID: Flag = FIELD.flag("error_code_valid", 11);
    pub const NMI_UNBLOCKING_DUE_TO_IRET: Flag = FIELD.flag("nmi_unblocking_due_to_iret", 12);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0x7FFF_E000);
    pub const VALID_BIT: Flag = FIELD.flag("valid_bit", 31);
}

field!(vm_exit_interruption_error_code, 0x4406, "vm_exit_interruption_error_code");

pub mod idt_vectoring_information {
    use super::*;

    pub const FIELD: Field = Field::new(0x4408, "idt_vectoring_information", always);

    pub const VECTOR: Bits = FIELD.bits("vector", 0x0000_00FF);
    pub const INTERRUPTION_TYPE: Bits = FIELD.bits("interruption_type", 0x0000_0700);
    pub const ERROR_CODE_VALID: Flag = FIELD.flag("error_code_valid", 11);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0x7FFF_F000);
    pub const VALID_BIT: Flag = FIELD.flag("valid_bit", 31);
}

field!(idt_vectoring_error_code, 0x440A, "idt_vectoring_error_code");
field!(vm_exit_instruction_length, 0x440C, "vm_exit_instruction_length");
field!(vm_exit_instruction_information, 0x440E, "vm_exit_instruction_information");
field!(exit_qualification, 0x6400, "exit_qualification");
field!(io_rcx, 0x6402, "io_rcx");
field!(io_rsi, 0x6404, "io_rsi");
field!(io_rdi, 0x6406, "io_rdi");
field!(io_rip, 0x6408, "io_rip");
field!(guest_linear_address, 0x640A, "guest_linear_address");
field!(guest_physical_address, 0x2400, "guest_physical_address");

/// Every VM-exit information field, in encoding order within each width.
pub const FIELDS: &[Field] = &[
    guest_physical_address::FIELD,
    vm_instruction_error::FIELD,
    exit_reason::FIELD,
    vm_exit_interruption_information::FIELD,
    vm_exit_interruption_error_code::FIELD,
    idt_vectoring_information::FIELD,
    idt_vectoring_error_code::FIELD,
    vm_exit_instruction_length::FIELD,
    vm_exit_instruction_information::FIELD,
    exit_qualification::FIELD,
    io_rcx::FIELD,
    io_rsi::FIELD,
    io_rdi::FIELD,
    io_rip::FIELD,
    guest_linear_address::FIELD,
];
