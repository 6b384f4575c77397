//! VM-execution, VM-exit and VM-entry control fields
//!
//! See Intel SDM, Volume 3C, Sections 24.6 to 24.8.

use super::exists::*;
use crate::access::{Bits, Control, Field, Flag, Vmcs, VmcsBackend};
use crate::bitmaps::{
    EntryControls, ExitControls, PinbasedControls, PrimaryControls, SecondaryControls,
};
use crate::capabilities::Ctls;
use crate::errors::VmxError;

macro_rules! field {
    ($module:ident, $encoding:literal, $name:literal) => {
        field!($module, $encoding, $name, always);
    };
    ($module:ident, $encoding:literal, $name:literal, $exists:ident) => {
        pub mod $module {
            use super::*;

            pub const FIELD: Field = Field::new($encoding, $name, $exists);
        }
    };
}

/// A control field: one [`Control`] per bit, plus accessors for the whole field as a bitflags set.
macro_rules! controls {
    (
        $module:ident, $encoding:literal, $name:literal, $exists:ident, $ctls:expr, $set:ty,
        { $($control:ident = $bit:literal, $control_name:literal;)* }
    ) => {
        pub mod $module {
            use super::*;

            pub const FIELD: Field = Field::new($encoding, $name, $exists);

            $(pub const $control: Control = FIELD.control($control_name, $bit, $ctls);)*

            pub const CONTROLS: &[Control] = &[$($control),*];

            /// Reads the whole control field.
            pub fn get<B: VmcsBackend>(vmcs: &Vmcs<B>) -> Result<$set, VmxError> {
                Ok(<$set>::from_bits_truncate(FIELD.get(vmcs)? as u32))
            }

            /// Writes the whole control field.
            pub fn set<B: VmcsBackend>(vmcs: &mut Vmcs<B>, controls: $set) -> Result<(), VmxError> {
                FIELD.set(vmcs, controls.bits())
            }
        }
    };
}

// ——————————————————————————— Execution Controls ——————————————————————————— //

#[rustfmt::skip]
controls!(pin_based, 0x4000, "pin_based_vm_execution_controls", always, Ctls::Pinbased, PinbasedControls, {
    EXTERNAL_INTERRUPT_EXITING    = 0, "external_interrupt_exiting";
    NMI_EXITING                   = 3, "nmi_exiting";
    VIRTUAL_NMIS                  = 5, "virtual_nmis";
    ACTIVATE_VMX_PREEMPTION_TIMER = 6, "activate_vmx_preemption_timer";
    PROCESS_POSTED_INTERRUPTS     = 7, "process_posted_interrupts";
});

#[rustfmt::skip]
controls!(primary, 0x4002, "primary_processor_based_vm_execution_controls", always, Ctls::Primary, PrimaryControls, {
    INTERRUPT_WINDOW_EXITING    = 2,  "interrupt_window_exiting";
    USE_TSC_OFFSETTING          = 3,  "use_tsc_offsetting";
    HLT_EXITING                 = 7,  "hlt_exiting";
    INVLPG_EXITING              = 9,  "invlpg_exiting";
    MWAIT_EXITING               = 10, "mwait_exiting";
    RDPMC_EXITING               = 11, "rdpmc_exiting";
    RDTSC_EXITING               = 12, "rdtsc_exiting";
    CR3_LOAD_EXITING            = 15, "cr3_load_exiting";
    CR3_STORE_EXITING           = 16, "cr3_store_exiting";
    CR8_LOAD_EXITING            = 19, "cr8_load_exiting";
    CR8_STORE_EXITING           = 20, "cr8_store_exiting";
    USE_TPR_SHADOW              = 21, "use_tpr_shadow";
    NMI_WINDOW_EXITING          = 22, "nmi_window_exiting";
    MOV_DR_EXITING              = 23, "mov_dr_exiting";
    UNCONDITIONAL_IO_EXITING    = 24, "unconditional_io_exiting";
    USE_IO_BITMAPS              = 25, "use_io_bitmaps";
    MONITOR_TRAP_FLAG           = 27, "monitor_trap_flag";
    USE_MSR_BITMAPS             = 28, "use_msr_bitmap";
    MONITOR_EXITING             = 29, "monitor_exiting";
    PAUSE_EXITING               = 30, "pause_exiting";
    ACTIVATE_SECONDARY_CONTROLS = 31, "activate_secondary_controls";
});

#[rustfmt::skip]
controls!(secondary, 0x401E, "secondary_processor_based_vm_execution_controls", secondary_controls, Ctls::Secondary, SecondaryControls, {
    VIRTUALIZE_APIC_ACCESSES     = 0,  "virtualize_apic_accesses";
    ENABLE_EPT                   = 1,  "enable_ept";
    DESCRIPTOR_TABLE_EXITING     = 2,  "descriptor_table_exiting";
    ENABLE_RDTSCP                = 3,  "enable_rdtscp";
    VIRTUALIZE_X2APIC_MODE       = 4,  "virtualize_x2apic_mode";
    ENABLE_VPID                  = 5,  "enable_vpid";
    WBINVD_EXITING               = 6,  "wbinvd_exiting";
    UNRESTRICTED_GUEST           = 7,  "unrestricted_guest";
    APIC_REGISTER_VIRTUALIZATION = 8,  "apic_register_virtualization";
    VIRTUAL_INTERRUPT_DELIVERY   = 9,  "virtual_interrupt_delivery";
    PAUSE_LOOP_EXITING           = 10, "pause_loop_exiting";
    RDRAND_EXITING               = 11, "rdrand_exiting";
    ENABLE_INVPCID               = 12, "enable_invpcid";
    ENABLE_VM_FUNCTIONS          = 13, "enable_vm_functions";
    VMCS_SHADOWING               = 14, "vmcs_shadowing";
    ENCLS_EXITING                = 15, "encls_exiting";
    RDSEED_EXITING               = 16, "rdseed_exiting";
    ENABLE_PML                   = 17, "enable_pml";
    EPT_VIOLATION_VE             = 18, "ept_violation_ve";
    CONCEAL_VMX_FROM_PT          = 19, "conceal_vmx_from_pt";
    ENABLE_XSAVES_XRSTORS        = 20, "enable_xsaves_xrstors";
    MODE_BASED_EPT               = 22, "mode_based_execute_control_for_ept";
    USE_TSC_SCALING              = 25, "use_tsc_scaling";
});

field!(exception_bitmap, 0x4004, "exception_bitmap");
field!(page_fault_error_code_mask, 0x4006, "page_fault_error_code_mask");
field!(page_fault_error_code_match, 0x4008, "page_fault_error_code_match");
field!(cr3_target_count, 0x400A, "cr3_target_count");
field!(cr3_target_value0, 0x6008, "cr3_target_value0");
field!(cr3_target_value1, 0x600A, "cr3_target_value1");
field!(cr3_target_value2, 0x600C, "cr3_target_value2");
field!(cr3_target_value3, 0x600E, "cr3_target_value3");
field!(cr0_guest_host_mask, 0x6000, "cr0_guest_host_mask");
field!(cr4_guest_host_mask, 0x6002, "cr4_guest_host_mask");
field!(cr0_read_shadow, 0x6004, "cr0_read_shadow");
field!(cr4_read_shadow, 0x6006, "cr4_read_shadow");

field!(address_of_io_bitmap_a, 0x2000, "address_of_io_bitmap_a");
field!(address_of_io_bitmap_b, 0x2002, "address_of_io_bitmap_b");
field!(address_of_msr_bitmaps, 0x2004, "address_of_msr_bitmaps", msr_bitmaps);
field!(executive_vmcs_pointer, 0x200C, "executive_vmcs_pointer");
field!(tsc_offset, 0x2010, "tsc_offset");
field!(tsc_multiplier, 0x2032, "tsc_multiplier", tsc_scaling);

field!(tpr_threshold, 0x401C, "tpr_threshold", tpr_shadow);
field!(virtual_apic_address, 0x2012, "virtual_apic_address", tpr_shadow);
field!(apic_access_address, 0x2014, "apic_access_address", apic_access);
field!(eoi_exit_bitmap_0, 0x201C, "eoi_exit_bitmap_0", virtual_interrupt_delivery);
field!(eoi_exit_bitmap_1, 0x201E, "eoi_exit_bitmap_1", virtual_interrupt_delivery);
field!(eoi_exit_bitmap_2, 0x2020, "eoi_exit_bitmap_2", virtual_interrupt_delivery);
field!(eoi_exit_bitmap_3, 0x2022, "eoi_exit_bitmap_3", virtual_interrupt_delivery);

field!(posted_interrupt_notification_vector, 0x0002, "posted_interrupt_notification_vector", posted_interrupts);
field!(posted_interrupt_descriptor_address, 0x2016, "posted_interrupt_descriptor_address", posted_interrupts);

field!(vpid, 0x0000, "vpid", vpid);
field!(ple_gap, 0x4020, "ple_gap", pause_loop_exiting);
field!(ple_window, 0x4022, "ple_window", pause_loop_exiting);
field!(pml_address, 0x200E, "pml_address", pml);
field!(eptp_list_address, 0x2024, "eptp_list_address", eptp_list);
field!(vmread_bitmap_address, 0x2026, "vmread_bitmap_address", vmcs_shadowing);
field!(vmwrite_bitmap_address, 0x2028, "vmwrite_bitmap_address", vmcs_shadowing);
field!(eptp_index, 0x0004, "eptp_index", ept_violation_ve);
field!(
    virtualization_exception_information_address,
    0x202A,
    "virtualization_exception_information_address",
    ept_violation_ve
);
field!(xss_exiting_bitmap, 0x202C, "xss_exiting_bitmap", xsaves);
field!(encls_exiting_bitmap, 0x202E, "encls_exiting_bitmap", encls_exiting);

pub mod vm_function_controls {
    use super::*;

    pub const FIELD: Field = Field::new(0x2018, "vm_function_controls", vm_functions);

    pub const EPTP_SWITCHING: Flag = FIELD.flag("eptp_switching", 0);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFFF_FFFF_FFFE);
}

pub mod ept_pointer {
    use super::*;

    pub const FIELD: Field = Field::new(0x201A, "ept_pointer", ept);

    pub const MEMORY_TYPE: Bits = FIELD.bits("memory_type", 0x0000_0000_0000_0007);
    pub const PAGE_WALK_LENGTH_MINUS_ONE: Bits =
        FIELD.bits("page_walk_length_minus_one", 0x0000_0000_0000_0038);
    pub const ACCESSED_AND_DIRTY_FLAGS: Flag = FIELD.flag("accessed_and_dirty_flags", 6);
    pub const PHYS_ADDR: Bits = FIELD.bits("phys_addr", 0x0000_FFFF_FFFF_F000);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_0000_0000_0F80);

    pub const MEMORY_TYPE_UNCACHEABLE: u64 = 0;
    pub const MEMORY_TYPE_WRITE_BACK: u64 = 6;
}

// ————————————————————————————— Exit Controls —————————————————————————————— //

#[rustfmt::skip]
controls!(vm_exit, 0x400C, "vm_exit_controls", always, Ctls::Exit, ExitControls, {
    SAVE_DEBUG_CONTROLS             = 2,  "save_debug_controls";
    HOST_ADDRESS_SPACE_SIZE         = 9,  "host_address_space_size";
    LOAD_IA32_PERF_GLOBAL_CTRL      = 12, "load_ia32_perf_global_ctrl";
    ACKNOWLEDGE_INTERRUPT_ON_EXIT   = 15, "acknowledge_interrupt_on_exit";
    SAVE_IA32_PAT                   = 18, "save_ia32_pat";
    LOAD_IA32_PAT                   = 19, "load_ia32_pat";
    SAVE_IA32_EFER                  = 20, "save_ia32_efer";
    LOAD_IA32_EFER                  = 21, "load_ia32_efer";
    SAVE_VMX_PREEMPTION_TIMER_VALUE = 22, "save_vmx_preemption_timer_value";
    CLEAR_IA32_BNDCFGS              = 23, "clear_ia32_bndcfgs";
});

field!(vm_exit_msr_store_count, 0x400E, "vm_exit_msr_store_count");
field!(vm_exit_msr_load_count, 0x4010, "vm_exit_msr_load_count");
field!(vm_exit_msr_store_address, 0x2006, "vm_exit_msr_store_address");
field!(vm_exit_msr_load_address, 0x2008, "vm_exit_msr_load_address");

// ————————————————————————————— Entry Controls ————————————————————————————— //

#[rustfmt::skip]
controls!(vm_entry, 0x4012, "vm_entry_controls", always, Ctls::Entry, EntryControls, {
    LOAD_DEBUG_CONTROLS               = 2,  "load_debug_controls";
    IA_32E_MODE_GUEST                 = 9,  "ia_32e_mode_guest";
    ENTRY_TO_SMM                      = 10, "entry_to_smm";
    DEACTIVATE_DUAL_MONITOR_TREATMENT = 11, "deactivate_dual_monitor_treatment";
    LOAD_IA32_PERF_GLOBAL_CTRL        = 13, "load_ia32_perf_global_ctrl";
    LOAD_IA32_PAT                     = 14, "load_ia32_pat";
    LOAD_IA32_EFER                    = 15, "load_ia32_efer";
    LOAD_IA32_BNDCFGS                 = 16, "load_ia32_bndcfgs";
});

field!(vm_entry_msr_load_count, 0x4014, "vm_entry_msr_load_count");
field!(vm_entry_msr_load_address, 0x200A, "vm_entry_msr_load_address");

pub mod vm_entry_interruption_information {
    use super::*;

    pub const FIELD: Field =
        Field::new(0x4016, "vm_entry_interruption_information_field", always);

    pub const VECTOR: Bits = FIELD.bits("vector", 0x0000_00FF);
    pub const INTERRUPTION_TYPE: Bits = FIELD.bits("interruption_type", 0x0000_0700);
    pub const DELIVER_ERROR_CODE_BIT: Flag = FIELD.flag("deliver_error_code_bit", 11);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0x7FFF_F000);
    pub const VALID_BIT: Flag = FIELD.flag("valid_bit", 31);

    pub mod interruption_type {
        pub const EXTERNAL_INTERRUPT: u64 = 0;
        pub const RESERVED: u64 = 1;
        pub const NON_MASKABLE_INTERRUPT: u64 = 2;
        pub const HARDWARE_EXCEPTION: u64 = 3;
        pub const SOFTWARE_INTERRUPT: u64 = 4;
        pub const PRIVILEGED_SOFTWARE_EXCEPTION: u64 = 5;
        pub const SOFTWARE_EXCEPTION: u64 = 6;
        pub const OTHER_EVENT: u64 = 7;
    }
}

field!(vm_entry_exception_error_code, 0x4018, "vm_entry_exception_error_code");
field!(vm_entry_instruction_length, 0x401A, "vm_entry_instruction_length");

/// Every control field, in encoding order within each width.
pub const FIELDS: &[Field] = &[
    vpid::FIELD,
    posted_interrupt_notification_vector::FIELD,
    eptp_index::FIELD,
    address_of_io_bitmap_a::FIELD,
    address_of_io_bitmap_b::FIELD,
    address_of_msr_bitmaps::FIELD,
    vm_exit_msr_store_address::FIELD,
    vm_exit_msr_load_address::FIELD,
    vm_entry_msr_load_address::FIELD,
    executive_vmcs_pointer::FIELD,
    pml_address::FIELD,
    tsc_offset::FIELD,
    virtual_apic_address::FIELD,
    apic_access_address::FIELD,
    posted_interrupt_descriptor_address::FIELD,
    vm_function_controls::FIELD,
    ept_pointer::FIELD,
    eoi_exit_bitmap_0::FIELD,
    eoi_exit_bitmap_1::FIELD,
    eoi_exit_bitmap_2::FIELD,
    eoi_exit_bitmap_3::FIELD,
    eptp_list_address::FIELD,
    vmread_bitmap_address::FIELD,
    vmwrite_bitmap_address::FIELD,
    virtualization_exception_information_address::FIELD,
    xss_exiting_bitmap::FIELD,
    encls_exiting_bitmap::FIELD,
    tsc_multiplier::FIELD,
    pin_based::FIELD,
    primary::FIELD,
    exception_bitmap::FIELD,
    page_fault_error_code_mask::FIELD,
    page_fault_error_code_match::FIELD,
    cr3_target_count::FIELD,
    vm_exit::FIELD,
    vm_exit_msr_store_count::FIELD,
    vm_exit_msr_load_count::FIELD,
    vm_entry::FIELD,
    vm_entry_msr_load_count::FIELD,
    vm_entry_interruption_information::FIELD,
    vm_entry_exception_error_code::FIELD,
    vm_entry_instruction_length::FIELD,
    tpr_threshold::FIELD,
    secondary::FIELD,
    ple_gap::FIELD,
    ple_window::FIELD,
    cr0_guest_host_mask::FIELD,
    cr4_guest_host_mask::FIELD,
    cr0_read_shadow::FIELD,
    cr4_read_shadow::FIELD,
    cr3_target_value0::FIELD,
    cr3_target_value1::FIELD,
    cr3_target_value2::FIELD,
    cr3_target_value3::FIELD,
];

// ————————————————————————————————— Tests —————————————————————————————————— //
