//! Guest-state area
//!
//! See Intel SDM, Volume 3C, Section 24.4.

use super::exists::*;
use super::{AccessRights, PatEntry, Segment, Selector};
use crate::access::{Bits, Field, Flag};

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

macro_rules! segment {
    ($module:ident, $name:literal, $selector:literal, $base:literal, $limit:literal, $ar:literal) => {
        pub mod $module {
            use super::*;

            pub const SEGMENT: Segment = Segment {
                name: $name,
                selector: Selector::new(Field::new($selector, concat!("guest_", $name, "_selector"), always)),
                base: Field::new($base, concat!("guest_", $name, "_base"), always),
                limit: Field::new($limit, concat!("guest_", $name, "_limit"), always),
                access_rights: AccessRights::new(Field::new($ar, concat!("guest_", $name, "_access_rights"), always)),
            };

            pub const SELECTOR: Field = SEGMENT.selector.field;
            pub const RPL: Bits = SEGMENT.selector.rpl;
            pub const TI: Flag = SEGMENT.selector.ti;
            pub const INDEX: Bits = SEGMENT.selector.index;
            pub const BASE: Field = SEGMENT.base;
            pub const LIMIT: Field = SEGMENT.limit;
            pub const ACCESS_RIGHTS: AccessRights = SEGMENT.access_rights;
        }
    };
}

// ——————————————————————————— Segment Registers ———————————————————————————— //

#[rustfmt::skip]
segment!(es,   "es",   0x0800, 0x6806, 0x4800, 0x4814);
#[rustfmt::skip]
segment!(cs,   "cs",   0x0802, 0x6808, 0x4802, 0x4816);
#[rustfmt::skip]
segment!(ss,   "ss",   0x0804, 0x680A, 0x4804, 0x4818);
#[rustfmt::skip]
segment!(ds,   "ds",   0x0806, 0x680C, 0x4806, 0x481A);
#[rustfmt::skip]
segment!(fs,   "fs",   0x0808, 0x680E, 0x4808, 0x481C);
#[rustfmt::skip]
segment!(gs,   "gs",   0x080A, 0x6810, 0x480A, 0x481E);
#[rustfmt::skip]
segment!(ldtr, "ldtr", 0x080C, 0x6812, 0x480C, 0x4820);
#[rustfmt::skip]
segment!(tr,   "tr",   0x080E, 0x6814, 0x480E, 0x4822);

pub mod gdtr {
    use super::*;

    pub const BASE: Field = Field::new(0x6816, "guest_gdtr_base", always);
    pub const LIMIT: Field = Field::new(0x4810, "guest_gdtr_limit", always);
}

pub mod idtr {
    use super::*;

    pub const BASE: Field = Field::new(0x6818, "guest_idtr_base", always);
    pub const LIMIT: Field = Field::new(0x4812, "guest_idtr_limit", always);
}

// ——————————————————————————— Control Registers ———————————————————————————— //

pub mod cr0 {
    use super::*;

    pub const FIELD: Field = Field::new(0x6800, "guest_cr0", always);

    pub const PROTECTION_ENABLE: Flag = FIELD.flag("protection_enable", 0);
    pub const MONITOR_COPROCESSOR: Flag = FIELD.flag("monitor_coprocessor", 1);
    pub const EMULATION: Flag = FIELD.flag("emulation", 2);
    pub const TASK_SWITCHED: Flag = FIELD.flag("task_switched", 3);
    pub const EXTENSION_TYPE: Flag = FIELD.flag("extension_type", 4);
    pub const NUMERIC_ERROR: Flag = FIELD.flag("numeric_error", 5);
    pub const WRITE_PROTECT: Flag = FIELD.flag("write_protect", 16);
    pub const ALIGNMENT_MASK: Flag = FIELD.flag("alignment_mask", 18);
    pub const NOT_WRITE_THROUGH: Flag = FIELD.flag("not_write_through", 29);
    pub const CACHE_DISABLE: Flag = FIELD.flag("cache_disable", 30);
    pub const PAGING: Flag = FIELD.flag("paging", 31);
}

field!(cr3, 0x6802, "guest_cr3");

pub mod cr4 {
    use super::*;

    pub const FIELD: Field = Field::new(0x6804, "guest_cr4", always);

    pub const V8086_MODE_EXTENSIONS: Flag = FIELD.flag("v8086_mode_extensions", 0);
    pub const PROTECTED_MODE_VIRTUAL_INTERRUPTS: Flag =
        FIELD.flag("protected_mode_virtual_interrupts", 1);
    pub const TIME_STAMP_DISABLE: Flag = FIELD.flag("time_stamp_disable", 2);
    pub const DEBUGGING_EXTENSIONS: Flag = FIELD.flag("debugging_extensions", 3);
    pub const PAGE_SIZE_EXTENSIONS: Flag = FIELD.flag("page_size_extensions", 4);
    pub const PHYSICAL_ADDRESS_EXTENSIONS: Flag = FIELD.flag("physical_address_extensions", 5);
    pub const MACHINE_CHECK_ENABLE: Flag = FIELD.flag("machine_check_enable", 6);
    pub const PAGE_GLOBAL_ENABLE: Flag = FIELD.flag("page_global_enable", 7);
    pub const PERFORMANCE_MONITOR_COUNTER_ENABLE: Flag =
        FIELD.flag("performance_monitor_counter_enable", 8);
    pub const OSFXSR: Flag = FIELD.flag("osfxsr", 9);
    pub const OSXMMEXCPT: Flag = FIELD.flag("osxmmexcpt", 10);
    pub const VMX_ENABLE_BIT: Flag = FIELD.flag("vmx_enable_bit", 13);
    pub const SMX_ENABLE_BIT: Flag = FIELD.flag("smx_enable_bit", 14);
    pub const FSGSBASE_ENABLE_BIT: Flag = FIELD.flag("fsgsbase_enable_bit", 16);
    pub const PCID_ENABLE_BIT: Flag = FIELD.flag("pcid_enable_bit", 17);
    pub const OSXSAVE: Flag = FIELD.flag("osxsave", 18);
    pub const SMEP_ENABLE_BIT: Flag = FIELD.flag("smep_enable_bit", 20);
    pub const SMAP_ENABLE_BIT: Flag = FIELD.flag("smap_enable_bit", 21);
    pub const PROTECTION_KEY_ENABLE_BIT: Flag = FIELD.flag("protection_key_enable_bit", 22);
}

field!(dr7, 0x681A, "guest_dr7");

// ———————————————————————————— RIP, RSP, RFLAGS ———————————————————————————— //

field!(rsp, 0x681C, "guest_rsp");
field!(rip, 0x681E, "guest_rip");

pub mod rflags {
    use super::*;

    pub const FIELD: Field = Field::new(0x6820, "guest_rflags", always);

    pub const CARRY_FLAG: Flag = FIELD.flag("carry_flag", 0);
    pub const ALWAYS_ENABLED: Flag = FIELD.flag("always_enabled", 1);
    pub const PARITY_FLAG: Flag = FIELD.flag("parity_flag", 2);
    pub const AUXILIARY_CARRY_FLAG: Flag = FIELD.flag("auxiliary_carry_flag", 4);
    pub const ZERO_FLAG: Flag = FIELD.flag("zero_flag", 6);
    pub const SIGN_FLAG: Flag = FIELD.flag("sign_flag", 7);
    pub const TRAP_FLAG: Flag = FIELD.flag("trap_flag", 8);
    pub const INTERRUPT_ENABLE_FLAG: Flag = FIELD.flag("interrupt_enable_flag", 9);
    pub const DIRECTION_FLAG: Flag = FIELD.flag("direction_flag", 10);
    pub const OVERFLOW_FLAG: Flag = FIELD.flag("overflow_flag", 11);
    pub const PRIVILEGE_LEVEL: Bits = FIELD.bits("privilege_level", 0x3000);
    pub const NESTED_TASK: Flag = FIELD.flag("nested_task", 14);
    pub const RESUME_FLAG: Flag = FIELD.flag("resume_flag", 16);
    pub const VIRTUAL_8086_MODE: Flag = FIELD.flag("virtual_8086_mode", 17);
    pub const ALIGNMENT_CHECK_ACCESS_CONTROL: Flag =
        FIELD.flag("alignment_check_access_control", 18);
    pub const VIRTUAL_INTERRUPT_FLAG: Flag = FIELD.flag("virtual_interrupt_flag", 19);
    pub const VIRTUAL_INTERRUPT_PENDING: Flag = FIELD.flag("virtual_interrupt_pending", 20);
    pub const ID_FLAG: Flag = FIELD.flag("id_flag", 21);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFFF_FFC0_8028);
}

// ————————————————————————————————— MSRs ——————————————————————————————————— //

pub mod ia32_debugctl {
    use super::*;

    pub const FIELD: Field = Field::new(0x2802, "guest_ia32_debugctl", always);

    pub const LBR: Flag = FIELD.flag("lbr", 0);
    pub const BTF: Flag = FIELD.flag("btf", 1);
    pub const TR: Flag = FIELD.flag("tr", 6);
    pub const BTS: Flag = FIELD.flag("bts", 7);
    pub const BTINT: Flag = FIELD.flag("btint", 8);
    pub const BT_OFF_OS: Flag = FIELD.flag("bt_off_os", 9);
    pub const BT_OFF_USER: Flag = FIELD.flag("bt_off_user", 10);
    pub const FREEZE_LBRS_ON_PMI: Flag = FIELD.flag("freeze_lbrs_on_pmi", 11);
    pub const FREEZE_PERFMON_ON_PMI: Flag = FIELD.flag("freeze_perfmon_on_pmi", 12);
    pub const ENABLE_UNCORE_PMI: Flag = FIELD.flag("enable_uncore_pmi", 13);
    pub const FREEZE_WHILE_SMM: Flag = FIELD.flag("freeze_while_smm", 14);
    pub const RTM_DEBUG: Flag = FIELD.flag("rtm_debug", 15);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFFF_FFFF_003C);
}

field!(ia32_sysenter_cs, 0x482A, "guest_ia32_sysenter_cs");
field!(ia32_sysenter_esp, 0x6824, "guest_ia32_sysenter_esp");
field!(ia32_sysenter_eip, 0x6826, "guest_ia32_sysenter_eip");

pub mod ia32_perf_global_ctrl {
    use super::*;

    pub const FIELD: Field =
        Field::new(0x2808, "guest_ia32_perf_global_ctrl", guest_ia32_perf_global_ctrl);

    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFF8_FFFF_FFFC);
}

pub mod ia32_pat {
    use super::*;

    pub const FIELD: Field = Field::new(0x2804, "guest_ia32_pat", guest_ia32_pat);

    pub const PA0: PatEntry = PatEntry::new(FIELD, "pa0", 0);
    pub const PA1: PatEntry = PatEntry::new(FIELD, "pa1", 1);
    pub const PA2: PatEntry = PatEntry::new(FIELD, "pa2", 2);
    pub const PA3: PatEntry = PatEntry::new(FIELD, "pa3", 3);
    pub const PA4: PatEntry = PatEntry::new(FIELD, "pa4", 4);
    pub const PA5: PatEntry = PatEntry::new(FIELD, "pa5", 5);
    pub const PA6: PatEntry = PatEntry::new(FIELD, "pa6", 6);
    pub const PA7: PatEntry = PatEntry::new(FIELD, "pa7", 7);

    pub const ENTRIES: [PatEntry; 8] = [PA0, PA1, PA2, PA3, PA4, PA5, PA6, PA7];
}

pub mod ia32_efer {
    use super::*;

    pub const FIELD: Field = Field::new(0x2806, "guest_ia32_efer", guest_ia32_efer);

    pub const SCE: Flag = FIELD.flag("sce", 0);
    pub const LME: Flag = FIELD.flag("lme", 8);
    pub const LMA: Flag = FIELD.flag("lma", 10);
    pub const NXE: Flag = FIELD.flag("nxe", 11);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFFF_FFFF_F2FE);
}

pub mod ia32_bndcfgs {
    use super::*;

    pub const FIELD: Field = Field::new(0x2812, "guest_ia32_bndcfgs", guest_ia32_bndcfgs);

    pub const EN: Flag = FIELD.flag("en", 0);
    pub const BNDPRESERVE: Flag = FIELD.flag("bndpreserve", 1);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0x0000_0000_0000_0FFC);
    pub const BASE_ADDR_OF_BND_DIRECTORY: Bits =
        FIELD.bits("base_addr_of_bnd_directory", 0xFFFF_FFFF_FFFF_F000);
}

field!(smbase, 0x4828, "guest_smbase");

// ——————————————————————————— Non-Register State ——————————————————————————— //

pub mod activity_state {
    use super::*;

    pub const FIELD: Field = Field::new(0x4826, "guest_activity_state", always);

    pub const ACTIVE: u64 = 0;
    pub const HLT: u64 = 1;
    pub const SHUTDOWN: u64 = 2;
    pub const WAIT_FOR_SIPI: u64 = 3;
}

pub mod interruptibility_state {
    use super::*;

    pub const FIELD: Field = Field::new(0x4824, "guest_interruptibility_state", always);

    pub const BLOCKING_BY_STI: Flag = FIELD.flag("blocking_by_sti", 0);
    pub const BLOCKING_BY_MOV_SS: Flag = FIELD.flag("blocking_by_mov_ss", 1);
    pub const BLOCKING_BY_SMI: Flag = FIELD.flag("blocking_by_smi", 2);
    pub const BLOCKING_BY_NMI: Flag = FIELD.flag("blocking_by_nmi", 3);
    pub const ENCLAVE_INTERRUPTION: Flag = FIELD.flag("enclave_interruption", 4);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFE0);
}

pub mod pending_debug_exceptions {
    use super::*;

    pub const FIELD: Field = Field::new(0x6822, "guest_pending_debug_exceptions", always);

    pub const B0: Flag = FIELD.flag("b0", 0);
    pub const B1: Flag = FIELD.flag("b1", 1);
    pub const B2: Flag = FIELD.flag("b2", 2);
    pub const B3: Flag = FIELD.flag("b3", 3);
    pub const ENABLED_BREAKPOINT: Flag = FIELD.flag("enabled_breakpoint", 12);
    pub const BS: Flag = FIELD.flag("bs", 14);
    pub const RTM: Flag = FIELD.flag("rtm", 16);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFFF_FFFE_AFF0);
}

field!(vmcs_link_pointer, 0x2800, "vmcs_link_pointer");
field!(vmx_preemption_timer_value, 0x482E, "vmx_preemption_timer_value", preemption_timer);

pub mod pdpte {
    use super::*;

    pub const PDPTE0: Field = Field::new(0x280A, "guest_pdpte0", ept);
    pub const PDPTE1: Field = Field::new(0x280C, "guest_pdpte1", ept);
    pub const PDPTE2: Field = Field::new(0x280E, "guest_pdpte2", ept);
    pub const PDPTE3: Field = Field::new(0x2810, "guest_pdpte3", ept);

    pub const ALL: [Field; 4] = [PDPTE0, PDPTE1, PDPTE2, PDPTE3];

    /// Bits of a PDPTE that are always reserved, regardless of MAXPHYADDR.
    pub const RESERVED_LOW: u64 = 0x1E6;
    pub const PRESENT: u64 = 1 << 0;
}

field!(interrupt_status, 0x0810, "guest_interrupt_status", virtual_interrupt_delivery);
field!(pml_index, 0x0812, "guest_pml_index", pml);

/// Every guest-state field, in encoding order within each width.
pub const FIELDS: &[Field] = &[
    es::SELECTOR,
    cs::SELECTOR,
    ss::SELECTOR,
    ds::SELECTOR,
    fs::SELECTOR,
    gs::SELECTOR,
    ldtr::SELECTOR,
    tr::SELECTOR,
    interrupt_status::FIELD,
    pml_index::FIELD,
    vmcs_link_pointer::FIELD,
    ia32_debugctl::FIELD,
    ia32_pat::FIELD,
    ia32_efer::FIELD,
    ia32_perf_global_ctrl::FIELD,
    pdpte::PDPTE0,
    pdpte::PDPTE1,
    pdpte::PDPTE2,
    pdpte::PDPTE3,
    ia32_bndcfgs::FIELD,
    es::LIMIT,
    cs::LIMIT,
    ss::LIMIT,
    ds::LIMIT,
    fs::LIMIT,
    gs::LIMIT,
    ldtr::LIMIT,
    tr::LIMIT,
    gdtr::LIMIT,
    idtr::LIMIT,
    es::ACCESS_RIGHTS.field,
    cs::ACCESS_RIGHTS.field,
    ss::ACCESS_RIGHTS.field,
    ds::ACCESS_RIGHTS.field,
    fs::ACCESS_RIGHTS.field,
    gs::ACCESS_RIGHTS.field,
    ldtr::ACCESS_RIGHTS.field,
    tr::ACCESS_RIGHTS.field,
    interruptibility_state::FIELD,
    activity_state::FIELD,
    smbase::FIELD,
    ia32_sysenter_cs::FIELD,
    vmx_preemption_timer_value::FIELD,
    cr0::FIELD,
    cr3::FIELD,
    cr4::FIELD,
    es::BASE,
    cs::BASE,
    ss::BASE,
    ds::BASE,
    fs::BASE,
    gs::BASE,
    ldtr::BASE,
    tr::BASE,
    gdtr::BASE,
    idtr::BASE,
    dr7::FIELD,
    rsp::FIELD,
    rip::FIELD,
    rflags::FIELD,
    pending_debug_exceptions::FIELD,
    ia32_sysenter_esp::FIELD,
    ia32_sysenter_eip::FIELD,
];
