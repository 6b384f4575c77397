//! Checks on the guest segment registers.
//!
//! See Intel SDM, Volume 3C, Section 26.3.1.2. Most rules apply to every data segment register
//! and are generated per register by the macros below. Checks on SS, DS, ES, FS, GS and LDTR are
//! skipped when the register is marked unusable, CS and TR are always usable.

use super::{check, fail, phase, run, Check, CheckResult, Checker, Report};
use crate::access::VmcsBackend;
use crate::errors::VmxError;
use crate::fields::guest::{self, cr0, cs, ldtr, ss, tr};
use crate::fields::AccessRights;

/// Segment descriptor types used by the checks, see Intel SDM, Volume 3A, Table 3-1.
mod segment_type {
    pub const READ_ONLY_ACCESSED: u64 = 1;
    pub const READ_WRITE: u64 = 2;
    pub const READ_WRITE_ACCESSED: u64 = 3;
    pub const READ_ONLY_EXPAND_DOWN_ACCESSED: u64 = 5;
    pub const READ_WRITE_EXPAND_DOWN_ACCESSED: u64 = 7;
    pub const EXECUTE_ONLY_ACCESSED: u64 = 9;
    pub const READ_EXECUTE_ACCESSED: u64 = 11;
    pub const EXECUTE_ONLY_CONFORMING: u64 = 12;
    pub const EXECUTE_ONLY_CONFORMING_ACCESSED: u64 = 13;
    pub const READ_EXECUTE_CONFORMING_ACCESSED: u64 = 15;

    /// Busy 16-bit and 64-bit task-state segments.
    pub const BUSY_TSS_16: u64 = 3;
    pub const BUSY_TSS_64: u64 = 11;
}

/// Access rights required in virtual-8086 mode: present, DPL 3, accessed read/write data.
const V8086_ACCESS_RIGHTS: u64 = 0xF3;

/// Limit required in virtual-8086 mode.
const V8086_LIMIT: u64 = 0xFFFF;

phase!(
    /// Checks on the guest segment registers (SDM 26.3.1.2).
    guest_segment_registers_all,
    [
        guest_tr_ti_bit_equals_0,
        guest_ldtr_ti_bit_equals_0,
        guest_ss_and_cs_rpl_are_the_same,
        guest_cs_base_is_shifted,
        guest_ss_base_is_shifted,
        guest_ds_base_is_shifted,
        guest_es_base_is_shifted,
        guest_fs_base_is_shifted,
        guest_gs_base_is_shifted,
        guest_tr_base_is_canonical,
        guest_fs_base_is_canonical,
        guest_gs_base_is_canonical,
        guest_ldtr_base_is_canonical,
        guest_cs_base_upper_dword_0,
        guest_ss_base_upper_dword_0,
        guest_ds_base_upper_dword_0,
        guest_es_base_upper_dword_0,
        guest_cs_limit,
        guest_ss_limit,
        guest_ds_limit,
        guest_es_limit,
        guest_gs_limit,
        guest_fs_limit,
        guest_v8086_cs_access_rights,
        guest_v8086_ss_access_rights,
        guest_v8086_ds_access_rights,
        guest_v8086_es_access_rights,
        guest_v8086_fs_access_rights,
        guest_v8086_gs_access_rights,
        guest_cs_access_rights_type,
        guest_ss_access_rights_type,
        guest_ds_access_rights_type,
        guest_es_access_rights_type,
        guest_fs_access_rights_type,
        guest_gs_access_rights_type,
        guest_cs_is_not_a_system_descriptor,
        guest_ss_is_not_a_system_descriptor,
        guest_ds_is_not_a_system_descriptor,
        guest_es_is_not_a_system_descriptor,
        guest_fs_is_not_a_system_descriptor,
        guest_gs_is_not_a_system_descriptor,
        guest_cs_type_not_equal_3,
        guest_cs_dpl_adheres_to_ss_dpl,
        guest_ss_dpl_must_equal_rpl,
        guest_ss_dpl_must_equal_zero,
        guest_ds_dpl,
        guest_es_dpl,
        guest_fs_dpl,
        guest_gs_dpl,
        guest_cs_must_be_present,
        guest_ss_must_be_present_if_usable,
        guest_ds_must_be_present_if_usable,
        guest_es_must_be_present_if_usable,
        guest_fs_must_be_present_if_usable,
        guest_gs_must_be_present_if_usable,
        guest_cs_access_rights_reserved_must_be_0,
        guest_ss_access_rights_reserved_must_be_0,
        guest_ds_access_rights_reserved_must_be_0,
        guest_es_access_rights_reserved_must_be_0,
        guest_fs_access_rights_reserved_must_be_0,
        guest_gs_access_rights_reserved_must_be_0,
        guest_cs_db_must_be_0_if_l_equals_1,
        guest_cs_granularity,
        guest_ss_granularity,
        guest_ds_granularity,
        guest_es_granularity,
        guest_fs_granularity,
        guest_gs_granularity,
        guest_cs_access_rights_remaining_reserved_bit_0,
        guest_ss_access_rights_remaining_reserved_bit_0,
        guest_ds_access_rights_remaining_reserved_bit_0,
        guest_es_access_rights_remaining_reserved_bit_0,
        guest_fs_access_rights_remaining_reserved_bit_0,
        guest_gs_access_rights_remaining_reserved_bit_0,
        guest_tr_type_must_be_11,
        guest_tr_must_be_a_system_descriptor,
        guest_tr_must_be_present,
        guest_tr_access_rights_reserved_must_be_0,
        guest_tr_granularity,
        guest_tr_must_be_usable,
        guest_tr_access_rights_remaining_reserved_bit_0,
        guest_ldtr_type_must_be_2,
        guest_ldtr_must_be_a_system_descriptor,
        guest_ldtr_must_be_present,
        guest_ldtr_access_rights_reserved_must_be_0,
        guest_ldtr_granularity,
        guest_ldtr_access_rights_remaining_reserved_bit_0,
    ]
);

// ————————————————————————————————— Helpers ———————————————————————————————— //

fn unusable<B: VmcsBackend>(cx: &Checker<'_, B>, ar: &AccessRights) -> Result<bool, VmxError> {
    ar.unusable.is_enabled(cx.vmcs())
}

/// Consistency of a segment limit with the granularity flag: if any of bits 11:0 is 0 G must be
/// 0, if any of bits 31:20 is 1 G must be 1.
enum Granularity {
    Valid,
    MustBeClear,
    MustBeSet,
}

fn granularity<B: VmcsBackend>(
    cx: &Checker<'_, B>,
    limit: u64,
    ar: &AccessRights,
) -> Result<Granularity, VmxError> {
    let g = ar.granularity.is_enabled(cx.vmcs())?;
    if limit & 0x0000_0FFF != 0x0000_0FFF && g {
        Ok(Granularity::MustBeClear)
    } else if limit & 0xFFF0_0000 != 0 && !g {
        Ok(Granularity::MustBeSet)
    } else {
        Ok(Granularity::Valid)
    }
}

// ——————————————————————————— Selectors and Bases —————————————————————————— //

check! {
    fn guest_tr_ti_bit_equals_0(cx) {
        if tr::TI.is_enabled(cx.vmcs())? {
            fail!("guest tr's ti flag must be zero");
        }
    }
}

check! {
    fn guest_ldtr_ti_bit_equals_0(cx) {
        if unusable(cx, &ldtr::ACCESS_RIGHTS)? {
            return Ok(());
        }
        if ldtr::TI.is_enabled(cx.vmcs())? {
            fail!("guest ldtr's ti flag must be zero");
        }
    }
}

check! {
    fn guest_ss_and_cs_rpl_are_the_same(cx) {
        if cx.v8086()? || cx.unrestricted_guest()? {
            return Ok(());
        }
        let ss_rpl = ss::RPL.get(cx.vmcs())?;
        let cs_rpl = cs::RPL.get(cx.vmcs())?;
        if ss_rpl != cs_rpl {
            fail!("ss and cs rpl must be the same", "ss_rpl" => ss_rpl, "cs_rpl" => cs_rpl);
        }
    }
}

macro_rules! base_is_shifted {
    ($($name:ident => $seg:ident),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if !cx.v8086()? {
                    return Ok(());
                }
                let selector = guest::$seg::SELECTOR.get(cx.vmcs())?;
                let base = guest::$seg::BASE.get(cx.vmcs())?;
                if selector << 4 != base {
                    fail!(
                        concat!(
                            "if virtual 8086 mode is enabled, ", stringify!($seg),
                            " base must be ", stringify!($seg), " shifted 4 bits"
                        ),
                        "selector" => selector,
                        "base" => base,
                    );
                }
            }
        }
    )*};
}

base_is_shifted!(
    guest_cs_base_is_shifted => cs,
    guest_ss_base_is_shifted => ss,
    guest_ds_base_is_shifted => ds,
    guest_es_base_is_shifted => es,
    guest_fs_base_is_shifted => fs,
    guest_gs_base_is_shifted => gs,
);

macro_rules! base_is_canonical {
    ($($name:ident => $seg:ident, $may_be_unusable:literal),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if $may_be_unusable && unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                let base = guest::$seg::BASE.get(cx.vmcs())?;
                if !cx.caps().is_address_canonical(base) {
                    fail!(concat!("guest ", stringify!($seg), " base non-canonical"), "base" => base);
                }
            }
        }
    )*};
}

base_is_canonical!(
    guest_tr_base_is_canonical => tr, false,
    guest_fs_base_is_canonical => fs, false,
    guest_gs_base_is_canonical => gs, false,
    guest_ldtr_base_is_canonical => ldtr, true,
);

macro_rules! base_upper_dword_0 {
    ($($name:ident => $seg:ident, $may_be_unusable:literal),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if $may_be_unusable && unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                let base = guest::$seg::BASE.get(cx.vmcs())?;
                if base & 0xFFFF_FFFF_0000_0000 != 0 {
                    fail!(concat!("guest ", stringify!($seg), " base bits 63:32 must be 0"), "base" => base);
                }
            }
        }
    )*};
}

base_upper_dword_0!(
    guest_cs_base_upper_dword_0 => cs, false,
    guest_ss_base_upper_dword_0 => ss, true,
    guest_ds_base_upper_dword_0 => ds, true,
    guest_es_base_upper_dword_0 => es, true,
);

// —————————————————————————— Virtual-8086 Mode ————————————————————————————— //

macro_rules! v8086_limit {
    ($($name:ident => $seg:ident),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if !cx.v8086()? {
                    return Ok(());
                }
                let limit = guest::$seg::LIMIT.get(cx.vmcs())?;
                if limit != V8086_LIMIT {
                    fail!(
                        concat!("if virtual 8086 mode is enabled, ", stringify!($seg), " limit must be 0xffff"),
                        "limit" => limit,
                    );
                }
            }
        }
    )*};
}

v8086_limit!(
    guest_cs_limit => cs,
    guest_ss_limit => ss,
    guest_ds_limit => ds,
    guest_es_limit => es,
    guest_gs_limit => gs,
    guest_fs_limit => fs,
);

macro_rules! v8086_access_rights {
    ($($name:ident => $seg:ident),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if !cx.v8086()? {
                    return Ok(());
                }
                let ar = guest::$seg::ACCESS_RIGHTS.field.get(cx.vmcs())?;
                if ar != V8086_ACCESS_RIGHTS {
                    fail!(
                        concat!("if virtual 8086 mode is enabled, ", stringify!($seg), " access rights must be 0x00f3"),
                        "access_rights" => ar,
                    );
                }
            }
        }
    )*};
}

v8086_access_rights!(
    guest_v8086_cs_access_rights => cs,
    guest_v8086_ss_access_rights => ss,
    guest_v8086_ds_access_rights => ds,
    guest_v8086_es_access_rights => es,
    guest_v8086_fs_access_rights => fs,
    guest_v8086_gs_access_rights => gs,
);

// ———————————————————————————— Descriptor Types ———————————————————————————— //

check! {
    /// CS must be an accessed code segment, or an accessed read/write data segment for an
    /// unrestricted guest.
    fn guest_cs_access_rights_type(cx) {
        use segment_type::*;

        if cx.v8086()? {
            return Ok(());
        }
        let ty = cs::ACCESS_RIGHTS.type_.get(cx.vmcs())?;
        match ty {
            EXECUTE_ONLY_ACCESSED
            | READ_EXECUTE_ACCESSED
            | EXECUTE_ONLY_CONFORMING_ACCESSED
            | READ_EXECUTE_CONFORMING_ACCESSED => {}
            READ_WRITE_ACCESSED if cx.unrestricted_guest()? => {}
            _ => fail!(
                "guest cs type must be 9, 11, 13, 15, or 3 (if unrestricted guest support is enabled)",
                "type" => ty,
            ),
        }
    }
}

check! {
    fn guest_ss_access_rights_type(cx) {
        use segment_type::*;

        if cx.v8086()? || unusable(cx, &ss::ACCESS_RIGHTS)? {
            return Ok(());
        }
        let ty = ss::ACCESS_RIGHTS.type_.get(cx.vmcs())?;
        if !matches!(ty, READ_WRITE_ACCESSED | READ_WRITE_EXPAND_DOWN_ACCESSED) {
            fail!("guest ss type must be 3 or 7", "type" => ty);
        }
    }
}

macro_rules! data_access_rights_type {
    ($($name:ident => $seg:ident),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                use segment_type::*;

                if cx.v8086()? || unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                let ty = guest::$seg::ACCESS_RIGHTS.type_.get(cx.vmcs())?;
                let valid = matches!(
                    ty,
                    READ_ONLY_ACCESSED
                        | READ_WRITE_ACCESSED
                        | READ_ONLY_EXPAND_DOWN_ACCESSED
                        | READ_WRITE_EXPAND_DOWN_ACCESSED
                        | READ_EXECUTE_ACCESSED
                        | READ_EXECUTE_CONFORMING_ACCESSED
                );
                if !valid {
                    fail!(
                        concat!("guest ", stringify!($seg), " type must be 1, 3, 5, 7, 11, or 15"),
                        "type" => ty,
                    );
                }
            }
        }
    )*};
}

data_access_rights_type!(
    guest_ds_access_rights_type => ds,
    guest_es_access_rights_type => es,
    guest_fs_access_rights_type => fs,
    guest_gs_access_rights_type => gs,
);

macro_rules! is_not_a_system_descriptor {
    ($($name:ident => $seg:ident, $may_be_unusable:literal),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if cx.v8086()? {
                    return Ok(());
                }
                if $may_be_unusable && unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                if guest::$seg::ACCESS_RIGHTS.s.is_disabled(cx.vmcs())? {
                    fail!(concat!(stringify!($seg), " must be a code/data descriptor, s should equal 1"));
                }
            }
        }
    )*};
}

is_not_a_system_descriptor!(
    guest_cs_is_not_a_system_descriptor => cs, false,
    guest_ss_is_not_a_system_descriptor => ss, true,
    guest_ds_is_not_a_system_descriptor => ds, true,
    guest_es_is_not_a_system_descriptor => es, true,
    guest_fs_is_not_a_system_descriptor => fs, true,
    guest_gs_is_not_a_system_descriptor => gs, true,
);

// ————————————————————————————— Privilege Levels ——————————————————————————— //

check! {
    fn guest_cs_type_not_equal_3(cx) {
        if cx.v8086()? {
            return Ok(());
        }
        if cs::ACCESS_RIGHTS.type_.get(cx.vmcs())? != segment_type::READ_WRITE_ACCESSED {
            return Ok(());
        }
        let dpl = cs::ACCESS_RIGHTS.dpl.get(cx.vmcs())?;
        if dpl != 0 {
            fail!("cs dpl must be 0 if type == 3", "cs_dpl" => dpl);
        }
    }
}

check! {
    /// For non-conforming code segments CS.DPL must equal SS.DPL, for conforming ones it must not
    /// be greater.
    fn guest_cs_dpl_adheres_to_ss_dpl(cx) {
        use segment_type::*;

        if cx.v8086()? {
            return Ok(());
        }
        let ty = cs::ACCESS_RIGHTS.type_.get(cx.vmcs())?;
        let cs_dpl = cs::ACCESS_RIGHTS.dpl.get(cx.vmcs())?;
        let ss_dpl = ss::ACCESS_RIGHTS.dpl.get(cx.vmcs())?;
        match ty {
            EXECUTE_ONLY_ACCESSED | READ_EXECUTE_ACCESSED if cs_dpl != ss_dpl => fail!(
                "if cs access rights type is 9, 11 cs dpl must equal ss dpl",
                "cs_dpl" => cs_dpl,
                "ss_dpl" => ss_dpl,
            ),
            EXECUTE_ONLY_CONFORMING_ACCESSED | READ_EXECUTE_CONFORMING_ACCESSED
                if cs_dpl > ss_dpl =>
            {
                fail!(
                    "if cs access rights type is 13, 15 cs dpl must not be greater than ss dpl",
                    "cs_dpl" => cs_dpl,
                    "ss_dpl" => ss_dpl,
                )
            }
            _ => {}
        }
    }
}

check! {
    fn guest_ss_dpl_must_equal_rpl(cx) {
        if cx.v8086()? || cx.unrestricted_guest()? {
            return Ok(());
        }
        let rpl = ss::RPL.get(cx.vmcs())?;
        let dpl = ss::ACCESS_RIGHTS.dpl.get(cx.vmcs())?;
        if dpl != rpl {
            fail!(
                "if unrestricted guest mode is disabled ss dpl must equal ss rpl",
                "ss_dpl" => dpl,
                "ss_rpl" => rpl,
            );
        }
    }
}

check! {
    /// If the CS type is 3 or CR0.PE is 0, SS.DPL must be 0.
    fn guest_ss_dpl_must_equal_zero(cx) {
        if cx.v8086()? {
            return Ok(());
        }
        let cs_type_3 = cs::ACCESS_RIGHTS.type_.get(cx.vmcs())? == segment_type::READ_WRITE_ACCESSED;
        if !cs_type_3 && cr0::PROTECTION_ENABLE.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        let dpl = ss::ACCESS_RIGHTS.dpl.get(cx.vmcs())?;
        if dpl != 0 {
            fail!("if cs type is 3 or protected mode is disabled, ss dpl must be 0", "ss_dpl" => dpl);
        }
    }
}

macro_rules! data_dpl {
    ($($name:ident => $seg:ident),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if cx.v8086()? || cx.unrestricted_guest()? {
                    return Ok(());
                }
                if unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                if guest::$seg::ACCESS_RIGHTS.type_.get(cx.vmcs())? >= segment_type::EXECUTE_ONLY_CONFORMING {
                    return Ok(());
                }
                let rpl = guest::$seg::RPL.get(cx.vmcs())?;
                let dpl = guest::$seg::ACCESS_RIGHTS.dpl.get(cx.vmcs())?;
                if dpl < rpl {
                    fail!(
                        concat!(
                            "if unrestricted guest mode is disabled, and ", stringify!($seg),
                            " is usable, and the access rights type is in the range 0-11, dpl cannot be less than rpl"
                        ),
                        "dpl" => dpl,
                        "rpl" => rpl,
                    );
                }
            }
        }
    )*};
}

data_dpl!(
    guest_ds_dpl => ds,
    guest_es_dpl => es,
    guest_fs_dpl => fs,
    guest_gs_dpl => gs,
);

// —————————————————————— Presence, Reserved Bits and Limits ————————————————————— //

check! {
    fn guest_cs_must_be_present(cx) {
        if cx.v8086()? {
            return Ok(());
        }
        if cs::ACCESS_RIGHTS.present.is_disabled(cx.vmcs())? {
            fail!("cs access rights present flag must be 1");
        }
    }
}

macro_rules! must_be_present_if_usable {
    ($($name:ident => $seg:ident),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if cx.v8086()? || unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                if guest::$seg::ACCESS_RIGHTS.present.is_disabled(cx.vmcs())? {
                    fail!(concat!(
                        stringify!($seg), " access rights present flag must be 1 if ",
                        stringify!($seg), " is usable"
                    ));
                }
            }
        }
    )*};
}

must_be_present_if_usable!(
    guest_ss_must_be_present_if_usable => ss,
    guest_ds_must_be_present_if_usable => ds,
    guest_es_must_be_present_if_usable => es,
    guest_fs_must_be_present_if_usable => fs,
    guest_gs_must_be_present_if_usable => gs,
);

macro_rules! access_rights_reserved_must_be_0 {
    ($($name:ident => $seg:ident, $may_be_unusable:literal),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if cx.v8086()? {
                    return Ok(());
                }
                if $may_be_unusable && unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                let reserved = guest::$seg::ACCESS_RIGHTS.reserved.get(cx.vmcs())?;
                if reserved != 0 {
                    fail!(
                        concat!(stringify!($seg), " access rights bits 11:8 must be 0"),
                        "reserved" => reserved,
                    );
                }
            }
        }
    )*};
}

access_rights_reserved_must_be_0!(
    guest_cs_access_rights_reserved_must_be_0 => cs, false,
    guest_ss_access_rights_reserved_must_be_0 => ss, true,
    guest_ds_access_rights_reserved_must_be_0 => ds, true,
    guest_es_access_rights_reserved_must_be_0 => es, true,
    guest_fs_access_rights_reserved_must_be_0 => fs, true,
    guest_gs_access_rights_reserved_must_be_0 => gs, true,
);

check! {
    fn guest_cs_db_must_be_0_if_l_equals_1(cx) {
        if cx.v8086()? || !cx.ia_32e_mode_guest()? {
            return Ok(());
        }
        if cs::ACCESS_RIGHTS.l.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if cs::ACCESS_RIGHTS.db.is_enabled(cx.vmcs())? {
            fail!("d/b for guest cs must be 0 if in ia 32e mode and l == 1");
        }
    }
}

macro_rules! segment_granularity {
    ($($name:ident => $seg:ident, $may_be_unusable:literal, $skip_v8086:literal),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if $skip_v8086 && cx.v8086()? {
                    return Ok(());
                }
                if $may_be_unusable && unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                let limit = guest::$seg::LIMIT.get(cx.vmcs())?;
                match granularity(cx, limit, &guest::$seg::ACCESS_RIGHTS)? {
                    Granularity::Valid => {}
                    Granularity::MustBeClear => fail!(
                        concat!("guest ", stringify!($seg), " granularity must be 0 if any bit 11:0 is 0"),
                        "limit" => limit,
                    ),
                    Granularity::MustBeSet => fail!(
                        concat!("guest ", stringify!($seg), " granularity must be 1 if any bit 31:20 is 1"),
                        "limit" => limit,
                    ),
                }
            }
        }
    )*};
}

segment_granularity!(
    guest_cs_granularity => cs, false, true,
    guest_ss_granularity => ss, true, true,
    guest_ds_granularity => ds, true, true,
    guest_es_granularity => es, true, true,
    guest_fs_granularity => fs, true, true,
    guest_gs_granularity => gs, true, true,
    guest_tr_granularity => tr, false, false,
    guest_ldtr_granularity => ldtr, true, false,
);

macro_rules! access_rights_remaining_reserved_bit_0 {
    ($($name:ident => $seg:ident, $may_be_unusable:literal, $skip_v8086:literal),* $(,)?) => {$(
        check! {
            fn $name(cx) {
                if $skip_v8086 && cx.v8086()? {
                    return Ok(());
                }
                if $may_be_unusable && unusable(cx, &guest::$seg::ACCESS_RIGHTS)? {
                    return Ok(());
                }
                let reserved = guest::$seg::ACCESS_RIGHTS.reserved_high.get(cx.vmcs())?;
                if reserved != 0 {
                    fail!(
                        concat!("guest ", stringify!($seg), " access rights bits 31:17 must be 0"),
                        "reserved" => reserved,
                    );
                }
            }
        }
    )*};
}

access_rights_remaining_reserved_bit_0!(
    guest_cs_access_rights_remaining_reserved_bit_0 => cs, false, true,
    guest_ss_access_rights_remaining_reserved_bit_0 => ss, true, true,
    guest_ds_access_rights_remaining_reserved_bit_0 => ds, true, true,
    guest_es_access_rights_remaining_reserved_bit_0 => es, true, true,
    guest_fs_access_rights_remaining_reserved_bit_0 => fs, true, true,
    guest_gs_access_rights_remaining_reserved_bit_0 => gs, true, true,
    guest_tr_access_rights_remaining_reserved_bit_0 => tr, false, false,
    guest_ldtr_access_rights_remaining_reserved_bit_0 => ldtr, true, false,
);

// ————————————————————————————————— TR —————————————————————————————————— //

check! {
    /// TR must hold a busy TSS, a 16-bit one only outside of IA-32e mode.
    fn guest_tr_type_must_be_11(cx) {
        let ty = tr::ACCESS_RIGHTS.type_.get(cx.vmcs())?;
        match ty {
            segment_type::BUSY_TSS_64 => {}
            segment_type::BUSY_TSS_16 => {
                if cx.ia_32e_mode_guest()? {
                    fail!("tr type cannot be 3 if ia 32e mode guest is enabled");
                }
            }
            _ => fail!("tr type must be 3 or 11", "type" => ty),
        }
    }
}

check! {
    fn guest_tr_must_be_a_system_descriptor(cx) {
        if tr::ACCESS_RIGHTS.s.is_enabled(cx.vmcs())? {
            fail!("tr must be a system descriptor, s should equal 0");
        }
    }
}

check! {
    fn guest_tr_must_be_present(cx) {
        if tr::ACCESS_RIGHTS.present.is_disabled(cx.vmcs())? {
            fail!("tr access rights present flag must be 1");
        }
    }
}

check! {
    fn guest_tr_access_rights_reserved_must_be_0(cx) {
        let reserved = tr::ACCESS_RIGHTS.reserved.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("tr access rights bits 11:8 must be 0", "reserved" => reserved);
        }
    }
}

check! {
    fn guest_tr_must_be_usable(cx) {
        if unusable(cx, &tr::ACCESS_RIGHTS)? {
            fail!("tr must be usable");
        }
    }
}

// ————————————————————————————————— LDTR ——————————————————————————————————— //

check! {
    fn guest_ldtr_type_must_be_2(cx) {
        if unusable(cx, &ldtr::ACCESS_RIGHTS)? {
            return Ok(());
        }
        let ty = ldtr::ACCESS_RIGHTS.type_.get(cx.vmcs())?;
        if ty != segment_type::READ_WRITE {
            fail!("guest ldtr type must be 2", "type" => ty);
        }
    }
}

check! {
    fn guest_ldtr_must_be_a_system_descriptor(cx) {
        if unusable(cx, &ldtr::ACCESS_RIGHTS)? {
            return Ok(());
        }
        if ldtr::ACCESS_RIGHTS.s.is_enabled(cx.vmcs())? {
            fail!("ldtr must be a system descriptor, s should equal 0");
        }
    }
}

check! {
    fn guest_ldtr_must_be_present(cx) {
        if unusable(cx, &ldtr::ACCESS_RIGHTS)? {
            return Ok(());
        }
        if ldtr::ACCESS_RIGHTS.present.is_disabled(cx.vmcs())? {
            fail!("ldtr access rights present flag must be 1 if ldtr is usable");
        }
    }
}

check! {
    fn guest_ldtr_access_rights_reserved_must_be_0(cx) {
        if unusable(cx, &ldtr::ACCESS_RIGHTS)? {
            return Ok(());
        }
        let reserved = ldtr::ACCESS_RIGHTS.reserved.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("ldtr access rights bits 11:8 must be 0", "reserved" => reserved);
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use crate::access::Vmcs;
    use crate::check::{CheckError, FailFast, NoMemory, Violation};
    use crate::fake::{self, FakeVmcs};
    use crate::fields::control::{primary, secondary, vm_entry};
    use crate::fields::guest::{ds, es, fs, gs, rflags};

    fn setup() -> Vmcs<FakeVmcs> {
        let mut vmcs = Vmcs::new(FakeVmcs::new(), fake::capabilities());
        fake::baseline(&mut vmcs);
        vmcs
    }

    fn expect_violation(result: CheckResult) -> Violation {
        match result {
            Err(CheckError::Violation(violation)) => violation,
            other => panic!("expected a violation, got {:?}", other),
        }
    }

    /// Turns the baseline guest into a virtual-8086 guest.
    #[rustfmt::skip]
    fn v8086_guest(vmcs: &mut Vmcs<FakeVmcs>) {
        vm_entry::IA_32E_MODE_GUEST.disable(vmcs).unwrap();
        rflags::VIRTUAL_8086_MODE.enable(vmcs).unwrap();
        for (segment, selector) in [(cs::SEGMENT, 0x1234u16), (ss::SEGMENT, 0x2000), (ds::SEGMENT, 0x3000),
                                    (es::SEGMENT, 0x3000), (fs::SEGMENT, 0), (gs::SEGMENT, 0)] {
            segment.selector.field.set(vmcs, selector).unwrap();
            segment.base.set(vmcs, (selector as u64) << 4).unwrap();
            segment.limit.set(vmcs, 0xFFFFu32).unwrap();
            segment.access_rights.field.set(vmcs, 0xF3u32).unwrap();
        }
    }

    #[test]
    fn baseline_segments() {
        let vmcs = setup();
        let cx = Checker::new(&vmcs, &NoMemory);
        assert_eq!(guest_segment_registers_all(&cx, &mut FailFast), Ok(()));
    }

    #[test]
    fn v8086_cs_base_shift() {
        let mut vmcs = setup();
        v8086_guest(&mut vmcs);
        assert_eq!(guest_segment_registers_all(&Checker::new(&vmcs, &NoMemory), &mut FailFast), Ok(()));

        cs::BASE.set(&mut vmcs, 0x12340u64).unwrap();
        assert_eq!(guest_cs_base_is_shifted(&Checker::new(&vmcs, &NoMemory)), Ok(()));

        cs::BASE.set(&mut vmcs, 0x12341u64).unwrap();
        let violation = expect_violation(guest_cs_base_is_shifted(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.rule, "guest_cs_base_is_shifted");
        assert_eq!(
            violation.message,
            "if virtual 8086 mode is enabled, cs base must be cs shifted 4 bits"
        );
        assert_eq!(violation.values(), &[("selector", 0x1234), ("base", 0x12341)]);

        // Only relevant in virtual-8086 mode.
        rflags::VIRTUAL_8086_MODE.disable(&mut vmcs).unwrap();
        assert_eq!(guest_cs_base_is_shifted(&Checker::new(&vmcs, &NoMemory)), Ok(()));
    }

    #[test]
    fn v8086_limits_and_access_rights() {
        let mut vmcs = setup();
        v8086_guest(&mut vmcs);

        gs::LIMIT.set(&mut vmcs, 0xFFFFFu32).unwrap();
        let violation = expect_violation(guest_segment_registers_all(&Checker::new(&vmcs, &NoMemory), &mut FailFast));
        assert_eq!(violation.rule, "guest_gs_limit");

        gs::LIMIT.set(&mut vmcs, 0xFFFFu32).unwrap();
        ds::ACCESS_RIGHTS.field.set(&mut vmcs, 0xF1u32).unwrap();
        let violation = expect_violation(guest_segment_registers_all(&Checker::new(&vmcs, &NoMemory), &mut FailFast));
        assert_eq!(violation.rule, "guest_v8086_ds_access_rights");
        assert_eq!(violation.message, "if virtual 8086 mode is enabled, ds access rights must be 0x00f3");
    }

    #[test]
    fn tr_must_be_usable() {
        let mut vmcs = setup();
        tr::ACCESS_RIGHTS.unusable.enable(&mut vmcs).unwrap();
        let violation = expect_violation(guest_tr_must_be_usable(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "tr must be usable");

        // Whatever the other TR fields hold.
        tr::ACCESS_RIGHTS.field.set(&mut vmcs, 0x1_0000u32).unwrap();
        tr::BASE.set(&mut vmcs, 0u64).unwrap();
        tr::LIMIT.set(&mut vmcs, 0u32).unwrap();
        assert!(guest_tr_must_be_usable(&Checker::new(&vmcs, &NoMemory)).is_err());
    }

    #[test]
    fn tr_type() {
        let mut vmcs = setup();
        tr::ACCESS_RIGHTS.type_.set(&mut vmcs, 3u64).unwrap();
        let violation = expect_violation(guest_tr_type_must_be_11(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "tr type cannot be 3 if ia 32e mode guest is enabled");

        vm_entry::IA_32E_MODE_GUEST.disable(&mut vmcs).unwrap();
        assert_eq!(guest_tr_type_must_be_11(&Checker::new(&vmcs, &NoMemory)), Ok(()));

        tr::ACCESS_RIGHTS.type_.set(&mut vmcs, 9u64).unwrap();
        let violation = expect_violation(guest_tr_type_must_be_11(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.values(), &[("type", 9)]);
    }

    #[test]
    fn unusable_segments_are_skipped() {
        let mut vmcs = setup();

        // Garbage access rights, but marked unusable.
        for ar in [ss::ACCESS_RIGHTS, ds::ACCESS_RIGHTS, es::ACCESS_RIGHTS, fs::ACCESS_RIGHTS, gs::ACCESS_RIGHTS] {
            ar.field.set(&mut vmcs, 0x1_0F00u32).unwrap();
        }
        ldtr::ACCESS_RIGHTS.field.set(&mut vmcs, 0x1_0F1Fu32).unwrap();
        ldtr::BASE.set(&mut vmcs, 0x0000_8000_0000_0000u64).unwrap();
        assert_eq!(guest_segment_registers_all(&Checker::new(&vmcs, &NoMemory), &mut FailFast), Ok(()));

        // Once usable, the same values are rejected.
        ldtr::ACCESS_RIGHTS.unusable.disable(&mut vmcs).unwrap();
        let violation = expect_violation(guest_segment_registers_all(&Checker::new(&vmcs, &NoMemory), &mut FailFast));
        assert_eq!(violation.rule, "guest_ldtr_base_is_canonical");
    }

    #[test]
    fn access_rights_types() {
        let mut vmcs = setup();

        cs::ACCESS_RIGHTS.type_.set(&mut vmcs, 3u64).unwrap();
        let violation = expect_violation(guest_cs_access_rights_type(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.values(), &[("type", 3)]);

        // Type 3 is allowed for unrestricted guests.
        primary::ACTIVATE_SECONDARY_CONTROLS.enable(&mut vmcs).unwrap();
        secondary::UNRESTRICTED_GUEST.enable(&mut vmcs).unwrap();
        assert_eq!(guest_cs_access_rights_type(&Checker::new(&vmcs, &NoMemory)), Ok(()));

        ss::ACCESS_RIGHTS.type_.set(&mut vmcs, 1u64).unwrap();
        let violation = expect_violation(guest_ss_access_rights_type(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "guest ss type must be 3 or 7");

        fs::ACCESS_RIGHTS.type_.set(&mut vmcs, 9u64).unwrap();
        let violation = expect_violation(guest_fs_access_rights_type(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "guest fs type must be 1, 3, 5, 7, 11, or 15");

        es::ACCESS_RIGHTS.s.disable(&mut vmcs).unwrap();
        let violation = expect_violation(guest_es_is_not_a_system_descriptor(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.rule, "guest_es_is_not_a_system_descriptor");
    }

    #[test]
    fn privilege_levels() {
        let mut vmcs = setup();

        // Non-conforming code: CS.DPL == SS.DPL.
        cs::ACCESS_RIGHTS.dpl.set(&mut vmcs, 3u64).unwrap();
        let violation = expect_violation(guest_cs_dpl_adheres_to_ss_dpl(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.values(), &[("cs_dpl", 3), ("ss_dpl", 0)]);

        // Conforming code: CS.DPL <= SS.DPL.
        cs::ACCESS_RIGHTS.type_.set(&mut vmcs, 15u64).unwrap();
        assert!(guest_cs_dpl_adheres_to_ss_dpl(&Checker::new(&vmcs, &NoMemory)).is_err());
        ss::ACCESS_RIGHTS.dpl.set(&mut vmcs, 3u64).unwrap();
        assert_eq!(guest_cs_dpl_adheres_to_ss_dpl(&Checker::new(&vmcs, &NoMemory)), Ok(()));

        let violation = expect_violation(guest_ss_dpl_must_equal_rpl(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.values(), &[("ss_dpl", 3), ("ss_rpl", 0)]);

        // SS.DPL must be 0 when CS type is 3 or CR0.PE is 0.
        cr0::FIELD.set(&mut vmcs, 0u64).unwrap();
        let violation = expect_violation(guest_ss_dpl_must_equal_zero(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "if cs type is 3 or protected mode is disabled, ss dpl must be 0");

        ds::RPL.set(&mut vmcs, 3u64).unwrap();
        let violation = expect_violation(guest_ds_dpl(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.values(), &[("dpl", 0), ("rpl", 3)]);
        primary::ACTIVATE_SECONDARY_CONTROLS.enable(&mut vmcs).unwrap();
        secondary::UNRESTRICTED_GUEST.enable(&mut vmcs).unwrap();
        assert_eq!(guest_ds_dpl(&Checker::new(&vmcs, &NoMemory)), Ok(()));
    }

    #[rustfmt::skip]
    #[test]
    fn granularity_and_reserved_bits() {
        let mut vmcs = setup();

        ds::LIMIT.set(&mut vmcs, 0x000F_F000u32).unwrap();
        let violation = expect_violation(guest_ds_granularity(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "guest ds granularity must be 0 if any bit 11:0 is 0");
        ds::LIMIT.set(&mut vmcs, 0xFFFF_FFFFu32).unwrap();

        tr::LIMIT.set(&mut vmcs, 0x0010_0067u32).unwrap();
        let violation = expect_violation(guest_tr_granularity(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "guest tr granularity must be 1 if any bit 31:20 is 1");
        tr::LIMIT.set(&mut vmcs, 0x67u32).unwrap();

        cs::ACCESS_RIGHTS.field.set(&mut vmcs, 0xA09Bu32 | 1 << 8).unwrap();
        let violation = expect_violation(guest_cs_access_rights_reserved_must_be_0(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "cs access rights bits 11:8 must be 0");

        cs::ACCESS_RIGHTS.field.set(&mut vmcs, 0xA09Bu32 | 1 << 20).unwrap();
        let violation = expect_violation(guest_cs_access_rights_remaining_reserved_bit_0(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "guest cs access rights bits 31:17 must be 0");

        cs::ACCESS_RIGHTS.field.set(&mut vmcs, 0xE09Bu32).unwrap();
        let violation = expect_violation(guest_cs_db_must_be_0_if_l_equals_1(&Checker::new(&vmcs, &NoMemory)));
        assert_eq!(violation.message, "d/b for guest cs must be 0 if in ia 32e mode and l == 1");
    }
}
