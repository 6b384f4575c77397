//! Host-state area
//!
//! See Intel SDM, Volume 3C, Section 24.5.

use super::exists::*;
use super::{PatEntry, Selector};
use crate::access::{Bits, Field, Flag};

macro_rules! field {
    ($module:ident, $encoding:literal, $name:literal) => {
        pub mod $module {
            use super::*;

            pub const FIELD: Field = Field::new($encoding, $name, always);
        }
    };
}

macro_rules! selector {
    ($module:ident, $encoding:literal, $name:literal) => {
        pub mod $module {
            use super::*;

            pub const SELECTOR: Selector = Selector::new(Field::new($encoding, $name, always));

            pub const FIELD: Field = SELECTOR.field;
            pub const RPL: Bits = SELECTOR.rpl;
            pub const TI: Flag = SELECTOR.ti;
            pub const INDEX: Bits = SELECTOR.index;
        }
    };
}

// ———————————————————————————————— Selectors ——————————————————————————————— //

selector!(es_selector, 0x0C00, "host_es_selector");
selector!(cs_selector, 0x0C02, "host_cs_selector");
selector!(ss_selector, 0x0C04, "host_ss_selector");
selector!(ds_selector, 0x0C06, "host_ds_selector");
selector!(fs_selector, 0x0C08, "host_fs_selector");
selector!(gs_selector, 0x0C0A, "host_gs_selector");
selector!(tr_selector, 0x0C0C, "host_tr_selector");

// ————————————————————————————— Base Addresses ————————————————————————————— //

field!(fs_base, 0x6C06, "host_fs_base");
field!(gs_base, 0x6C08, "host_gs_base");
field!(tr_base, 0x6C0A, "host_tr_base");
field!(gdtr_base, 0x6C0C, "host_gdtr_base");
field!(idtr_base, 0x6C0E, "host_idtr_base");

// ——————————————————————————— Control Registers ———————————————————————————— //

pub mod cr0 {
    use super::*;

    pub const FIELD: Field = Field::new(0x6C00, "host_cr0", always);

    pub const PROTECTION_ENABLE: Flag = FIELD.flag("protection_enable", 0);
    pub const PAGING: Flag = FIELD.flag("paging", 31);
}

field!(cr3, 0x6C02, "host_cr3");

pub mod cr4 {
    use super::*;

    pub const FIELD: Field = Field::new(0x6C04, "host_cr4", always);

    pub const PHYSICAL_ADDRESS_EXTENSIONS: Flag = FIELD.flag("physical_address_extensions", 5);
    pub const VMX_ENABLE_BIT: Flag = FIELD.flag("vmx_enable_bit", 13);
    pub const PCID_ENABLE_BIT: Flag = FIELD.flag("pcid_enable_bit", 17);
}

field!(rsp, 0x6C14, "host_rsp");
field!(rip, 0x6C16, "host_rip");

// ————————————————————————————————— MSRs ——————————————————————————————————— //

field!(ia32_sysenter_cs, 0x4C00, "host_ia32_sysenter_cs");
field!(ia32_sysenter_esp, 0x6C10, "host_ia32_sysenter_esp");
field!(ia32_sysenter_eip, 0x6C12, "host_ia32_sysenter_eip");

pub mod ia32_pat {
    use super::*;

    pub const FIELD: Field = Field::new(0x2C00, "host_ia32_pat", host_ia32_pat);

    pub const ENTRIES: [PatEntry; 8] = [
        PatEntry::new(FIELD, "pa0", 0),
        PatEntry::new(FIELD, "pa1", 1),
        PatEntry::new(FIELD, "pa2", 2),
        PatEntry::new(FIELD, "pa3", 3),
        PatEntry::new(FIELD, "pa4", 4),
        PatEntry::new(FIELD, "pa5", 5),
        PatEntry::new(FIELD, "pa6", 6),
        PatEntry::new(FIELD, "pa7", 7),
    ];
}

pub mod ia32_efer {
    use super::*;

    pub const FIELD: Field = Field::new(0x2C02, "host_ia32_efer", host_ia32_efer);

    pub const SCE: Flag = FIELD.flag("sce", 0);
    pub const LME: Flag = FIELD.flag("lme", 8);
    pub const LMA: Flag = FIELD.flag("lma", 10);
    pub const NXE: Flag = FIELD.flag("nxe", 11);
    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFFF_FFFF_F2FE);
}

pub mod ia32_perf_global_ctrl {
    use super::*;

    pub const FIELD: Field =
        Field::new(0x2C04, "host_ia32_perf_global_ctrl", host_ia32_perf_global_ctrl);

    pub const RESERVED: Bits = FIELD.bits("reserved", 0xFFFF_FFF8_FFFF_FFFC);
}

pub const SELECTORS: [Selector; 7] = [
    es_selector::SELECTOR,
    cs_selector::SELECTOR,
    ss_selector::SELECTOR,
    ds_selector::SELECTOR,
    fs_selector::SELECTOR,
    gs_selector::SELECTOR,
    tr_selector::SELECTOR,
];

/// Every host-state field, in encoding order within each width.
pub const FIELDS: &[Field] = &[
    es_selector::FIELD,
    cs_selector::FIELD,
    ss_selector::FIELD,
    ds_selector::FIELD,
    fs_selector::FIELD,
    gs_selector::FIELD,
    tr_selector::FIELD,
    ia32_pat::FIELD,
    ia32_efer::FIELD,
    ia32_perf_global_ctrl::FIELD,
    ia32_sysenter_cs::FIELD,
    cr0::FIELD,
    cr3::FIELD,
    cr4::FIELD,
    fs_base::FIELD,
    gs_base::FIELD,
    tr_base::FIELD,
    gdtr_base::FIELD,
    idtr_base::FIELD,
    ia32_sysenter_esp::FIELD,
    ia32_sysenter_eip::FIELD,
    rsp::FIELD,
    rip::FIELD,
];
