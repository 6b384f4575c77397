//! Checks on the host-state area.
//!
//! See Intel SDM, Volume 3C, Section 26.2.2 to 26.2.4.

use super::{check, fail, phase, run, Check, CheckResult, Checker, Report};
use crate::access::VmcsBackend;
use crate::fields::control::{vm_entry, vm_exit};
use crate::fields::host::{
    cr0, cr3, cr4, cs_selector, ds_selector, es_selector, fs_base, fs_selector, gdtr_base,
    gs_base, gs_selector, ia32_efer, ia32_pat, ia32_perf_global_ctrl, ia32_sysenter_eip,
    ia32_sysenter_esp, idtr_base, rip, ss_selector, tr_base, tr_selector,
};
use crate::fields::memory_type;

use super::guest::PAT_MESSAGES;

/// Runs the three host-state phases.
pub fn host_state_all<B: VmcsBackend>(cx: &Checker<'_, B>, report: &mut dyn Report) -> CheckResult {
    host_control_registers_and_msrs_all(cx, report)?;
    host_segment_and_descriptor_table_registers_all(cx, report)?;
    host_address_space_size_all(cx, report)
}

phase!(
    /// Checks on host control registers and MSRs (SDM 26.2.2).
    host_control_registers_and_msrs_all,
    [
        host_cr0_for_unsupported_bits,
        host_cr4_for_unsupported_bits,
        host_cr3_for_unsupported_bits,
        host_ia32_sysenter_esp_canonical_address,
        host_ia32_sysenter_eip_canonical_address,
        host_verify_load_ia32_perf_global_ctrl,
        host_verify_load_ia32_pat,
        host_verify_load_ia32_efer,
    ]
);

phase!(
    /// Checks on host segment and descriptor-table registers (SDM 26.2.3).
    host_segment_and_descriptor_table_registers_all,
    [
        host_es_selector_rpl_ti_equal_zero,
        host_cs_selector_rpl_ti_equal_zero,
        host_ss_selector_rpl_ti_equal_zero,
        host_ds_selector_rpl_ti_equal_zero,
        host_fs_selector_rpl_ti_equal_zero,
        host_gs_selector_rpl_ti_equal_zero,
        host_tr_selector_rpl_ti_equal_zero,
        host_cs_not_equal_zero,
        host_tr_not_equal_zero,
        host_ss_not_equal_zero,
        host_fs_canonical_base_address,
        host_gs_canonical_base_address,
        host_gdtr_canonical_base_address,
        host_idtr_canonical_base_address,
        host_tr_canonical_base_address,
    ]
);

phase!(
    /// Checks related to the host address-space size (SDM 26.2.4).
    host_address_space_size_all,
    [
        host_if_outside_ia32e_mode,
        host_address_space_size_exit_ctl_is_set,
        host_address_space_disabled,
        host_address_space_enabled,
    ]
);

// ——————————————————————— Control Registers and MSRs ——————————————————————— //

check! {
    /// Unlike the guest, the host has no relaxation of the CR0 fixed bits.
    fn host_cr0_for_unsupported_bits(cx) {
        let value = cr0::FIELD.get(cx.vmcs())?;
        let fixed0 = cx.caps().cr0_fixed0;
        let fixed1 = cx.caps().cr0_fixed1;

        if (!value & fixed0) | (value & !fixed1) != 0 {
            fail!(
                "invalid cr0",
                "ia32_vmx_cr0_fixed0" => fixed0,
                "ia32_vmx_cr0_fixed1" => fixed1,
                "cr0" => value,
            );
        }
    }
}

check! {
    fn host_cr4_for_unsupported_bits(cx) {
        let value = cr4::FIELD.get(cx.vmcs())?;
        let fixed0 = cx.caps().cr4_fixed0;
        let fixed1 = cx.caps().cr4_fixed1;

        if (!value & fixed0) | (value & !fixed1) != 0 {
            fail!(
                "invalid cr4",
                "ia32_vmx_cr4_fixed0" => fixed0,
                "ia32_vmx_cr4_fixed1" => fixed1,
                "cr4" => value,
            );
        }
    }
}

check! {
    fn host_cr3_for_unsupported_bits(cx) {
        let value = cr3::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_physical_address_valid(value) {
            fail!("host cr3 too large", "cr3" => value);
        }
    }
}

check! {
    fn host_ia32_sysenter_esp_canonical_address(cx) {
        let esp = ia32_sysenter_esp::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_address_canonical(esp) {
            fail!("host sysenter esp must be canonical", "sysenter_esp" => esp);
        }
    }
}

check! {
    fn host_ia32_sysenter_eip_canonical_address(cx) {
        let eip = ia32_sysenter_eip::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_address_canonical(eip) {
            fail!("host sysenter eip must be canonical", "sysenter_eip" => eip);
        }
    }
}

check! {
    fn host_verify_load_ia32_perf_global_ctrl(cx) {
        if vm_exit::LOAD_IA32_PERF_GLOBAL_CTRL.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let reserved = ia32_perf_global_ctrl::RESERVED.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("host perf global ctrl msr reserved bits must be 0", "reserved" => reserved);
        }
    }
}

check! {
    fn host_verify_load_ia32_pat(cx) {
        if vm_exit::LOAD_IA32_PAT.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let pat = ia32_pat::FIELD.get(cx.vmcs())?;
        for (entry, message) in ia32_pat::ENTRIES.iter().zip(PAT_MESSAGES) {
            let ty = entry.memory_type.decode(pat);
            if memory_type::is_reserved(ty) {
                fail!(message, "memory_type" => ty, "pat" => pat);
            }
        }
    }
}

check! {
    /// With "load IA32_EFER", LMA must match "host address-space size", and LME too if the host
    /// enables paging.
    fn host_verify_load_ia32_efer(cx) {
        if vm_exit::LOAD_IA32_EFER.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let efer = ia32_efer::FIELD.get(cx.vmcs())?;
        if ia32_efer::RESERVED.decode(efer) != 0 {
            fail!(
                "host_ia32_efer reserved bits must be 0 if load_ia32_efer exit control is enabled",
                "efer" => efer,
            );
        }

        let lma = ia32_efer::LMA.is_set_in(efer);
        let lme = ia32_efer::LME.is_set_in(efer);
        let address_space = vm_exit::HOST_ADDRESS_SPACE_SIZE.is_enabled(cx.vmcs())?;
        if !address_space && lma {
            fail!("host addr space is 0, but efer.lma is 1", "efer" => efer);
        }
        if address_space && !lma {
            fail!("host addr space is 1, but efer.lma is 0", "efer" => efer);
        }

        if cr0::PAGING.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if !lme && lma {
            fail!("efer.lme is 0, but efer.lma is 1", "efer" => efer);
        }
        if lme && !lma {
            fail!("efer.lme is 1, but efer.lma is 0", "efer" => efer);
        }
    }
}

// ———————————————————— Segment and Descriptor-Table Registers ————————————————————— //

/// The RPL and TI fields of every host selector must be 0.
macro_rules! selector_rpl_ti_equal_zero {
    ($($name:ident => $selector:ident, $seg:literal;)*) => {
        $(
            check! {
                fn $name(cx) {
                    let selector = $selector::FIELD.get(cx.vmcs())?;
                    if $selector::TI.is_set_in(selector) {
                        fail!(concat!("host ", $seg, " ti flag must be 0"), "selector" => selector);
                    }
                    if $selector::RPL.decode(selector) != 0 {
                        fail!(concat!("host ", $seg, " rpl flag must be 0"), "selector" => selector);
                    }
                }
            }
        )*
    };
}

selector_rpl_ti_equal_zero! {
    host_es_selector_rpl_ti_equal_zero => es_selector, "es";
    host_cs_selector_rpl_ti_equal_zero => cs_selector, "cs";
    host_ss_selector_rpl_ti_equal_zero => ss_selector, "ss";
    host_ds_selector_rpl_ti_equal_zero => ds_selector, "ds";
    host_fs_selector_rpl_ti_equal_zero => fs_selector, "fs";
    host_gs_selector_rpl_ti_equal_zero => gs_selector, "gs";
    host_tr_selector_rpl_ti_equal_zero => tr_selector, "tr";
}

check! {
    fn host_cs_not_equal_zero(cx) {
        if cs_selector::FIELD.get(cx.vmcs())? == 0 {
            fail!("host cs cannot equal 0");
        }
    }
}

check! {
    fn host_tr_not_equal_zero(cx) {
        if tr_selector::FIELD.get(cx.vmcs())? == 0 {
            fail!("host tr cannot equal 0");
        }
    }
}

check! {
    /// A null SS is allowed for a 64-bit host.
    fn host_ss_not_equal_zero(cx) {
        if vm_exit::HOST_ADDRESS_SPACE_SIZE.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        if ss_selector::FIELD.get(cx.vmcs())? == 0 {
            fail!("host ss cannot equal 0");
        }
    }
}

macro_rules! canonical_base_address {
    ($($name:ident => $base:ident, $reg:literal;)*) => {
        $(
            check! {
                fn $name(cx) {
                    let base = $base::FIELD.get(cx.vmcs())?;
                    if !cx.caps().is_address_canonical(base) {
                        fail!(concat!("host ", $reg, " base must be canonical"), "base" => base);
                    }
                }
            }
        )*
    };
}

canonical_base_address! {
    host_fs_canonical_base_address => fs_base, "fs";
    host_gs_canonical_base_address => gs_base, "gs";
    host_gdtr_canonical_base_address => gdtr_base, "gdtr";
    host_idtr_canonical_base_address => idtr_base, "idtr";
    host_tr_canonical_base_address => tr_base, "tr";
}

// ——————————————————————————— Address-Space Size ——————————————————————————— //

check! {
    /// A host outside of IA-32e mode can neither return to a 64-bit host nor launch a 64-bit
    /// guest.
    fn host_if_outside_ia32e_mode(cx) {
        if cx.caps().host_efer_lma() {
            return Ok(());
        }
        if vm_entry::IA_32E_MODE_GUEST.is_enabled(cx.vmcs())? {
            fail!("ia 32e mode must be 0 if efer.lma == 0");
        }
        if vm_exit::HOST_ADDRESS_SPACE_SIZE.is_enabled(cx.vmcs())? {
            fail!("host addr space must be 0 if efer.lma == 0");
        }
    }
}

check! {
    fn host_address_space_size_exit_ctl_is_set(cx) {
        if !cx.caps().host_efer_lma() {
            return Ok(());
        }
        if vm_exit::HOST_ADDRESS_SPACE_SIZE.is_disabled(cx.vmcs())? {
            fail!("host addr space must be 1 if efer.lma == 1");
        }
    }
}

check! {
    fn host_address_space_disabled(cx) {
        if vm_exit::HOST_ADDRESS_SPACE_SIZE.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        if vm_entry::IA_32E_MODE_GUEST.is_enabled(cx.vmcs())? {
            fail!("ia 32e mode must be disabled if host addr space is disabled");
        }
        if cr4::PCID_ENABLE_BIT.is_enabled(cx.vmcs())? {
            fail!("cr4 pcide must be disabled if host addr space is disabled");
        }
        let host_rip = rip::FIELD.get(cx.vmcs())?;
        if host_rip >> 32 != 0 {
            fail!("rip bits 63:32 must be 0 if host addr space is disabled", "rip" => host_rip);
        }
    }
}

check! {
    fn host_address_space_enabled(cx) {
        if vm_exit::HOST_ADDRESS_SPACE_SIZE.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if cr4::PHYSICAL_ADDRESS_EXTENSIONS.is_disabled(cx.vmcs())? {
            fail!("cr4 pae must be enabled if host addr space is enabled");
        }
        let host_rip = rip::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_address_canonical(host_rip) {
            fail!("host rip must be canonical", "rip" => host_rip);
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
