//! VMCS fields
//!
//! One module per field, holding the field descriptor (`FIELD`) and its sub-fields. Encodings are
//! taken from Intel SDM, Volume 3D, Appendix B, bit layouts from Volume 3C, Chapter 24.

pub mod control;
pub mod exit;
pub mod guest;
pub mod host;

use crate::access::{Bits, Field, Flag};

// ——————————————————————————————— Existence ———————————————————————————————— //

/// Existence predicates, evaluated against a capability snapshot.
pub(crate) mod exists {
    use crate::capabilities::{Capabilities, Ctls};

    pub fn always(_: &Capabilities) -> bool {
        true
    }

    fn secondary(caps: &Capabilities, bit: u8) -> bool {
        secondary_controls(caps) && caps.is_allowed1(Ctls::Secondary, bit)
    }

    pub fn secondary_controls(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Primary, 31)
    }

    pub fn tpr_shadow(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Primary, 21)
    }

    pub fn msr_bitmaps(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Primary, 28)
    }

    pub fn preemption_timer(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Pinbased, 6)
    }

    pub fn posted_interrupts(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Pinbased, 7)
    }

    pub fn apic_access(caps: &Capabilities) -> bool {
        secondary(caps, 0)
    }

    pub fn ept(caps: &Capabilities) -> bool {
        secondary(caps, 1)
    }

    pub fn vpid(caps: &Capabilities) -> bool {
        secondary(caps, 5)
    }

    pub fn virtual_interrupt_delivery(caps: &Capabilities) -> bool {
        secondary(caps, 9)
    }

    pub fn pause_loop_exiting(caps: &Capabilities) -> bool {
        secondary(caps, 10)
    }

    pub fn vm_functions(caps: &Capabilities) -> bool {
        secondary(caps, 13)
    }

    pub fn eptp_list(caps: &Capabilities) -> bool {
        vm_functions(caps) && caps.vmfunc & 1 != 0
    }

    pub fn vmcs_shadowing(caps: &Capabilities) -> bool {
        secondary(caps, 14)
    }

    pub fn encls_exiting(caps: &Capabilities) -> bool {
        secondary(caps, 15)
    }

    pub fn pml(caps: &Capabilities) -> bool {
        secondary(caps, 17)
    }

    pub fn ept_violation_ve(caps: &Capabilities) -> bool {
        secondary(caps, 18)
    }

    pub fn xsaves(caps: &Capabilities) -> bool {
        secondary(caps, 20)
    }

    pub fn tsc_scaling(caps: &Capabilities) -> bool {
        secondary(caps, 25)
    }

    pub fn guest_ia32_pat(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Entry, 14) || caps.is_allowed1(Ctls::Exit, 18)
    }

    pub fn guest_ia32_efer(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Entry, 15) || caps.is_allowed1(Ctls::Exit, 20)
    }

    pub fn guest_ia32_perf_global_ctrl(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Entry, 13)
    }

    pub fn guest_ia32_bndcfgs(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Entry, 16) || caps.is_allowed1(Ctls::Exit, 23)
    }

    pub fn host_ia32_perf_global_ctrl(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Exit, 12)
    }

    pub fn host_ia32_pat(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Exit, 19)
    }

    pub fn host_ia32_efer(caps: &Capabilities) -> bool {
        caps.is_allowed1(Ctls::Exit, 21)
    }
}

// ———————————————————————————— Segment Registers ——————————————————————————— //

/// Segment selector sub-fields.
#[derive(Clone, Copy, Debug)]
pub struct Selector {
    pub field: Field,
    pub rpl: Bits,
    pub ti: Flag,
    pub index: Bits,
}

impl Selector {
    pub const fn new(field: Field) -> Self {
        Self {
            field,
            rpl: field.bits("rpl", 0x0003),
            ti: field.flag("ti", 2),
            index: field.bits("index", 0xFFF8),
        }
    }
}

/// Guest segment access rights, see Intel SDM, Volume 3C, Table 24-2.
#[derive(Clone, Copy, Debug)]
pub struct AccessRights {
    pub field: Field,
    pub type_: Bits,
    pub s: Flag,
    pub dpl: Bits,
    pub present: Flag,
    /// Bits 11:8.
    pub reserved: Bits,
    pub avl: Flag,
    pub l: Flag,
    pub db: Flag,
    pub granularity: Flag,
    pub unusable: Flag,
    /// Bits 31:17.
    pub reserved_high: Bits,
}

impl AccessRights {
    pub const fn new(field: Field) -> Self {
        Self {
            field,
            type_: field.bits("type", 0x0000F),
            s: field.flag("s", 4),
            dpl: field.bits("dpl", 0x00060),
            present: field.flag("present", 7),
            reserved: field.bits("reserved", 0x00F00),
            avl: field.flag("avl", 12),
            l: field.flag("l", 13),
            db: field.flag("db", 14),
            granularity: field.flag("granularity", 15),
            unusable: field.flag("unusable", 16),
            reserved_high: field.bits("reserved", 0xFFFF_FFFF_FFFE_0000),
        }
    }
}

/// All the guest fields describing one segment register.
#[derive(Clone, Copy, Debug)]
pub struct Segment {
    pub name: &'static str,
    pub selector: Selector,
    pub base: Field,
    pub limit: Field,
    pub access_rights: AccessRights,
}

/// Guest PAT entry, see Intel SDM, Volume 3A, Section 11.12.2.
#[derive(Clone, Copy, Debug)]
pub struct PatEntry {
    pub name: &'static str,
    pub pa: Bits,
    pub memory_type: Bits,
    pub reserved: Bits,
}

impl PatEntry {
    pub const fn new(field: Field, name: &'static str, index: u32) -> Self {
        let shift = 8 * index;
        Self {
            name,
            pa: field.bits(name, 0xFF << shift),
            memory_type: field.bits("memory_type", 0x07 << shift),
            reserved: field.bits("reserved", 0xF8 << shift),
        }
    }
}

/// Memory types, see Intel SDM, Volume 3A, Table 11-10.
pub mod memory_type {
    pub const UNCACHEABLE: u64 = 0;
    pub const WRITE_COMBINING: u64 = 1;
    pub const WRITE_THROUGH: u64 = 4;
    pub const WRITE_PROTECTED: u64 = 5;
    pub const WRITE_BACK: u64 = 6;
    pub const UNCACHEABLE_MINUS: u64 = 7;

    /// Returns true if the memory type encoding is reserved (2, 3 and above 7).
    pub const fn is_reserved(memory_type: u64) -> bool {
        !matches!(
            memory_type,
            UNCACHEABLE
                | WRITE_COMBINING
                | WRITE_THROUGH
                | WRITE_PROTECTED
                | WRITE_BACK
                | UNCACHEABLE_MINUS
        )
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
