//! Checks on the guest control registers, MSRs, descriptor tables, RIP, RFLAGS and PDPTEs.
//!
//! See Intel SDM, Volume 3C, Sections 26.3.1.1, 26.3.1.3, 26.3.1.4 and 26.3.1.5.

use super::{check, fail, phase, run, Check, CheckResult, Checker, Report};
use crate::access::VmcsBackend;
use crate::errors::VmxError;
use crate::fields::control::{secondary, vm_entry, vm_entry_interruption_information as entry_info};
use crate::fields::guest::{
    cr0, cr3, cr4, cs, dr7, gdtr, ia32_bndcfgs, ia32_debugctl, ia32_efer, ia32_pat,
    ia32_perf_global_ctrl, ia32_sysenter_eip, ia32_sysenter_esp, idtr, pdpte, rflags, rip,
};
use crate::fields::memory_type;

pub(super) const PAT_MESSAGES: [&str; 8] = [
    "pat0 has a reserved memory type",
    "pat1 has a reserved memory type",
    "pat2 has a reserved memory type",
    "pat3 has a reserved memory type",
    "pat4 has a reserved memory type",
    "pat5 has a reserved memory type",
    "pat6 has a reserved memory type",
    "pat7 has a reserved memory type",
];

const PDPTE_EPT_DISABLED_MESSAGES: [&str; 4] = [
    "pdpte0 reserved bits set with ept disabled and pae paging enabled",
    "pdpte1 reserved bits set with ept disabled and pae paging enabled",
    "pdpte2 reserved bits set with ept disabled and pae paging enabled",
    "pdpte3 reserved bits set with ept disabled and pae paging enabled",
];

const PDPTE_EPT_ENABLED_MESSAGES: [&str; 4] = [
    "pdpte0 reserved bits set with ept and pae paging enabled",
    "pdpte1 reserved bits set with ept and pae paging enabled",
    "pdpte2 reserved bits set with ept and pae paging enabled",
    "pdpte3 reserved bits set with ept and pae paging enabled",
];

// ———————————————————— Control Registers, Debug Registers and MSRs ————————————————————— //

phase!(
    /// Checks on guest control registers, debug registers and MSRs (SDM 26.3.1.1).
    guest_control_registers_debug_registers_and_msrs_all,
    [
        guest_cr0_for_unsupported_bits,
        guest_cr0_verify_paging_enabled,
        guest_cr4_for_unsupported_bits,
        guest_load_debug_controls_verify_reserved,
        guest_verify_ia_32e_mode_enabled,
        guest_verify_ia_32e_mode_disabled,
        guest_cr3_for_unsupported_bits,
        guest_load_debug_controls_verify_dr7,
        guest_ia32_sysenter_esp_canonical_address,
        guest_ia32_sysenter_eip_canonical_address,
        guest_verify_load_ia32_perf_global_ctrl,
        guest_verify_load_ia32_pat,
        guest_verify_load_ia32_efer,
        guest_verify_load_ia32_bndcfgs,
    ]
);

check! {
    /// CR0 must honor IA32_VMX_CR0_FIXED0 and IA32_VMX_CR0_FIXED1, PG and PE may be 0 for an
    /// unrestricted guest.
    fn guest_cr0_for_unsupported_bits(cx) {
        let value = cr0::FIELD.get(cx.vmcs())?;
        let mut fixed0 = cx.caps().cr0_fixed0;
        let fixed1 = cx.caps().cr0_fixed1;

        if cx.unrestricted_guest()? {
            fixed0 &= !(cr0::PAGING.mask() | cr0::PROTECTION_ENABLE.mask());
        }

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
    fn guest_cr0_verify_paging_enabled(cx) {
        if cr0::PAGING.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if cr0::PROTECTION_ENABLE.is_disabled(cx.vmcs())? {
            fail!("pe must be enabled in cr0 if pg is enabled");
        }
    }
}

check! {
    fn guest_cr4_for_unsupported_bits(cx) {
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
    fn guest_load_debug_controls_verify_reserved(cx) {
        if vm_entry::LOAD_DEBUG_CONTROLS.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let reserved = ia32_debugctl::RESERVED.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("debug ctrl msr reserved bits must be 0", "reserved" => reserved);
        }
    }
}

check! {
    fn guest_verify_ia_32e_mode_enabled(cx) {
        if !cx.ia_32e_mode_guest()? {
            return Ok(());
        }
        if cr0::PAGING.is_disabled(cx.vmcs())? {
            fail!("paging must be enabled if ia 32e guest mode is enabled");
        }
        if cr4::PHYSICAL_ADDRESS_EXTENSIONS.is_disabled(cx.vmcs())? {
            fail!("pae must be enabled if ia 32e guest mode is enabled");
        }
    }
}

check! {
    fn guest_verify_ia_32e_mode_disabled(cx) {
        if cx.ia_32e_mode_guest()? {
            return Ok(());
        }
        if cr4::PCID_ENABLE_BIT.is_enabled(cx.vmcs())? {
            fail!("pcide in cr4 must be disabled if ia 32e guest mode is disabled");
        }
    }
}

check! {
    fn guest_cr3_for_unsupported_bits(cx) {
        let value = cr3::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_physical_address_valid(value) {
            fail!("guest cr3 too large", "cr3" => value);
        }
    }
}

check! {
    fn guest_load_debug_controls_verify_dr7(cx) {
        if vm_entry::LOAD_DEBUG_CONTROLS.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let value = dr7::FIELD.get(cx.vmcs())?;
        if value & 0xFFFF_FFFF_0000_0000 != 0 {
            fail!("bits 63:32 of dr7 must be 0 if load debug controls is 1", "dr7" => value);
        }
    }
}

check! {
    fn guest_ia32_sysenter_esp_canonical_address(cx) {
        let esp = ia32_sysenter_esp::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_address_canonical(esp) {
            fail!("guest sysenter esp must be canonical", "esp" => esp);
        }
    }
}

check! {
    fn guest_ia32_sysenter_eip_canonical_address(cx) {
        let eip = ia32_sysenter_eip::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_address_canonical(eip) {
            fail!("guest sysenter eip must be canonical", "eip" => eip);
        }
    }
}

check! {
    fn guest_verify_load_ia32_perf_global_ctrl(cx) {
        if vm_entry::LOAD_IA32_PERF_GLOBAL_CTRL.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let reserved = ia32_perf_global_ctrl::RESERVED.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("perf global ctrl msr reserved bits must be 0", "reserved" => reserved);
        }
    }
}

check! {
    /// Each PAT entry must hold a valid memory type (2 and 3 are reserved).
    fn guest_verify_load_ia32_pat(cx) {
        if vm_entry::LOAD_IA32_PAT.is_disabled(cx.vmcs())? {
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
    /// EFER.LMA must match "IA-32e mode guest", and EFER.LME if CR0.PG is set.
    fn guest_verify_load_ia32_efer(cx) {
        if vm_entry::LOAD_IA32_EFER.is_disabled(cx.vmcs())? {
            return Ok(());
        }

        let efer = ia32_efer::FIELD.get(cx.vmcs())?;
        if ia32_efer::RESERVED.decode(efer) != 0 {
            fail!(
                "ia32 efer msr reserved bits must be 0 if load ia32 efer entry is enabled",
                "efer" => efer,
            );
        }

        let lma = ia32_efer::LMA.is_set_in(efer);
        let lme = ia32_efer::LME.is_set_in(efer);
        let ia_32e_mode = cx.ia_32e_mode_guest()?;

        if !ia_32e_mode && lma {
            fail!("ia 32e mode is 0, but efer.lma is 1", "efer" => efer);
        }
        if ia_32e_mode && !lma {
            fail!("ia 32e mode is 1, but efer.lma is 0", "efer" => efer);
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

check! {
    fn guest_verify_load_ia32_bndcfgs(cx) {
        if vm_entry::LOAD_IA32_BNDCFGS.is_disabled(cx.vmcs())? {
            return Ok(());
        }

        let bndcfgs = ia32_bndcfgs::FIELD.get(cx.vmcs())?;
        if ia32_bndcfgs::RESERVED.decode(bndcfgs) != 0 {
            fail!(
                "ia32 bndcfgs msr reserved bits must be 0 if load ia32 bndcfgs entry is enabled",
                "bndcfgs" => bndcfgs,
            );
        }

        let bound_addr = bndcfgs & ia32_bndcfgs::BASE_ADDR_OF_BND_DIRECTORY.mask();
        if !cx.caps().is_address_canonical(bound_addr) {
            fail!(
                "bound address in ia32 bndcfgs msr must be canonical if load ia32 bndcfgs entry is enabled",
                "bndcfgs" => bndcfgs,
            );
        }
    }
}

// ———————————————————————————— Descriptor Tables ——————————————————————————— //

phase!(
    /// Checks on GDTR and IDTR (SDM 26.3.1.3).
    guest_descriptor_table_registers_all,
    [
        guest_gdtr_base_must_be_canonical,
        guest_idtr_base_must_be_canonical,
        guest_gdtr_limit_reserved_bits,
        guest_idtr_limit_reserved_bits,
    ]
);

check! {
    fn guest_gdtr_base_must_be_canonical(cx) {
        let base = gdtr::BASE.get(cx.vmcs())?;
        if !cx.caps().is_address_canonical(base) {
            fail!("gdtr base is non-canonical", "base" => base);
        }
    }
}

check! {
    fn guest_idtr_base_must_be_canonical(cx) {
        let base = idtr::BASE.get(cx.vmcs())?;
        if !cx.caps().is_address_canonical(base) {
            fail!("idtr base is non-canonical", "base" => base);
        }
    }
}

check! {
    fn guest_gdtr_limit_reserved_bits(cx) {
        let limit = gdtr::LIMIT.get(cx.vmcs())?;
        if limit & 0xFFFF_0000 != 0 {
            fail!("gdtr limit bits 31:16 must be 0", "limit" => limit);
        }
    }
}

check! {
    fn guest_idtr_limit_reserved_bits(cx) {
        let limit = idtr::LIMIT.get(cx.vmcs())?;
        if limit & 0xFFFF_0000 != 0 {
            fail!("idtr limit bits 31:16 must be 0", "limit" => limit);
        }
    }
}

// ————————————————————————————— RIP and RFLAGS ————————————————————————————— //

phase!(
    /// Checks on RIP and RFLAGS (SDM 26.3.1.4).
    guest_rip_and_rflags_all,
    [
        guest_rip_upper_bits,
        guest_rip_valid_addr,
        guest_rflags_reserved_bits,
        guest_rflags_vm_bit,
        guest_rflag_interrupt_enable,
    ]
);

/// Returns true if the guest executes 64-bit code on entry.
fn long_mode_code<B: VmcsBackend>(cx: &Checker<'_, B>) -> Result<bool, VmxError> {
    Ok(cx.ia_32e_mode_guest()? && cs::ACCESS_RIGHTS.l.is_enabled(cx.vmcs())?)
}

check! {
    fn guest_rip_upper_bits(cx) {
        if long_mode_code(cx)? {
            return Ok(());
        }
        let value = rip::FIELD.get(cx.vmcs())?;
        if value & 0xFFFF_FFFF_0000_0000 != 0 {
            fail!(
                "rip bits 63:32 must be 0 if ia 32e mode is disabled or cs l is disabled",
                "rip" => value,
            );
        }
    }
}

check! {
    fn guest_rip_valid_addr(cx) {
        if !long_mode_code(cx)? {
            return Ok(());
        }
        let value = rip::FIELD.get(cx.vmcs())?;
        if !cx.caps().is_linear_address_valid(value) {
            fail!("rip bits must be canonical", "rip" => value);
        }
    }
}

check! {
    fn guest_rflags_reserved_bits(cx) {
        let value = rflags::FIELD.get(cx.vmcs())?;
        if rflags::RESERVED.decode(value) != 0 {
            fail!("reserved bits in rflags must be 0", "rflags" => value);
        }
        if !rflags::ALWAYS_ENABLED.is_set_in(value) {
            fail!("always enabled bits in rflags must be 1", "rflags" => value);
        }
    }
}

check! {
    fn guest_rflags_vm_bit(cx) {
        if !cx.ia_32e_mode_guest()? && cr0::PROTECTION_ENABLE.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        if cx.v8086()? {
            fail!("rflags vm must be 0 if ia 32e mode is 1 or pe is 0");
        }
    }
}

check! {
    fn guest_rflag_interrupt_enable(cx) {
        if entry_info::VALID_BIT.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if entry_info::INTERRUPTION_TYPE.get(cx.vmcs())?
            != entry_info::interruption_type::EXTERNAL_INTERRUPT
        {
            return Ok(());
        }
        if rflags::INTERRUPT_ENABLE_FLAG.is_disabled(cx.vmcs())? {
            fail!("rflags if must be 1 if the valid bit is 1 and interrupt type is external");
        }
    }
}

// ————————————————————————————————— PDPTEs ————————————————————————————————— //

phase!(
    /// Checks on the PAE page-directory-pointer-table entries (SDM 26.3.1.6).
    guest_pdptes_all,
    [guest_valid_pdpte_with_ept_disabled, guest_valid_pdpte_with_ept_enabled]
);

/// Returns true if the guest uses PAE paging on entry.
fn pae_paging<B: VmcsBackend>(cx: &Checker<'_, B>) -> Result<bool, VmxError> {
    Ok(cr0::PAGING.is_enabled(cx.vmcs())?
        && cr4::PHYSICAL_ADDRESS_EXTENSIONS.is_enabled(cx.vmcs())?
        && !cx.ia_32e_mode_guest()?)
}

/// Bits of a present PDPTE that must be 0.
fn pdpte_reserved_mask<B: VmcsBackend>(cx: &Checker<'_, B>) -> u64 {
    u64::MAX.checked_shl(cx.caps().phys_addr_bits).unwrap_or(0) | pdpte::RESERVED_LOW
}

check! {
    /// Without EPT the processor loads the PDPTEs from the table referenced by CR3.
    fn guest_valid_pdpte_with_ept_disabled(cx) {
        if !pae_paging(cx)? || cx.secondary_enabled(secondary::ENABLE_EPT)? {
            return Ok(());
        }

        let value = cr3::FIELD.get(cx.vmcs())?;
        let pdpt_addr = value & 0xFFFF_FFE0;
        let entries: [u64; 4] = match cx.read_phys(pdpt_addr) {
            Some(entries) => entries,
            None => fail!("pdpt address could not be mapped", "cr3" => value),
        };

        let reserved = pdpte_reserved_mask(cx);
        for (entry, message) in entries.iter().zip(PDPTE_EPT_DISABLED_MESSAGES) {
            if entry & pdpte::PRESENT != 0 && entry & reserved != 0 {
                fail!(message, "pdpte" => *entry, "cr3" => value);
            }
        }
    }
}

check! {
    /// With EPT the processor loads the PDPTEs from the guest-state area.
    fn guest_valid_pdpte_with_ept_enabled(cx) {
        if !pae_paging(cx)? || !cx.secondary_enabled(secondary::ENABLE_EPT)? {
            return Ok(());
        }

        let reserved = pdpte_reserved_mask(cx);
        for (field, message) in pdpte::ALL.iter().zip(PDPTE_EPT_ENABLED_MESSAGES) {
            let entry = field.get(cx.vmcs())?;
            if entry & pdpte::PRESENT != 0 && entry & reserved != 0 {
                fail!(message, "pdpte" => entry);
            }
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use crate::access::Vmcs;
    use crate::check::{CheckError, FailFast, NoMemory, Violation};
    use crate::fake::{self, FakeMemory, FakeVmcs};
    use crate::fields::control::primary;

    fn setup() -> Vmcs<FakeVmcs> {
        let mut vmcs = Vmcs::new(FakeVmcs::new(), fake::capabilities());
        fake::baseline(&mut vmcs);
        vmcs
    }

    fn rule_of(result: CheckResult) -> Option<Violation> {
        match result {
            Err(CheckError::Violation(violation)) => Some(violation),
            _ => None,
        }
    }

    /// Switches the baseline guest to 32-bit protected mode with PAE paging.
    fn pae_guest(vmcs: &mut Vmcs<FakeVmcs>) {
        vm_entry::IA_32E_MODE_GUEST.disable(vmcs).unwrap();
        ia32_efer::FIELD.set(vmcs, 0u64).unwrap();
        cs::ACCESS_RIGHTS.l.disable(vmcs).unwrap();
        cr3::FIELD.set(vmcs, 0x3000u64).unwrap();
    }

    #[test]
    fn cr0_fixed_bits() {
        let mut vmcs = setup();
        let mem = NoMemory;

        // PG, NE, ET and PE: FIXED0 (0x8000_0021) satisfied, nothing outside FIXED1.
        cr0::FIELD.set(&mut vmcs, 0x8000_0031u64).unwrap();
        assert_eq!(guest_cr0_for_unsupported_bits(&Checker::new(&vmcs, &mem)), Ok(()));

        cr0::NUMERIC_ERROR.disable(&mut vmcs).unwrap();
        cr0::PROTECTION_ENABLE.disable(&mut vmcs).unwrap();
        let violation = rule_of(guest_cr0_for_unsupported_bits(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.rule, "guest_cr0_for_unsupported_bits");
        assert_eq!(violation.message, "invalid cr0");
        assert_eq!(
            violation.values(),
            &[
                ("ia32_vmx_cr0_fixed0", 0x8000_0021),
                ("ia32_vmx_cr0_fixed1", 0xFFFF_FFFF),
                ("cr0", 0x8000_0010),
            ]
        );

        // Unrestricted guests may run with paging and protection disabled.
        primary::ACTIVATE_SECONDARY_CONTROLS.enable(&mut vmcs).unwrap();
        secondary::UNRESTRICTED_GUEST.enable(&mut vmcs).unwrap();
        cr0::FIELD.set(&mut vmcs, 0x20u64).unwrap();
        assert_eq!(guest_cr0_for_unsupported_bits(&Checker::new(&vmcs, &mem)), Ok(()));

        // Only if secondary controls are active.
        primary::ACTIVATE_SECONDARY_CONTROLS.disable(&mut vmcs).unwrap();
        assert!(guest_cr0_for_unsupported_bits(&Checker::new(&vmcs, &mem)).is_err());

        // Bits beyond FIXED1 are never allowed.
        cr0::FIELD.set(&mut vmcs, 0x1_8000_0031u64).unwrap();
        assert!(guest_cr0_for_unsupported_bits(&Checker::new(&vmcs, &mem)).is_err());
    }

    #[test]
    fn cr4_and_ia_32e_mode() {
        let mut vmcs = setup();
        let mem = NoMemory;

        cr4::VMX_ENABLE_BIT.disable(&mut vmcs).unwrap();
        let violation = rule_of(guest_cr4_for_unsupported_bits(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.message, "invalid cr4");
        cr4::VMX_ENABLE_BIT.enable(&mut vmcs).unwrap();

        cr4::PHYSICAL_ADDRESS_EXTENSIONS.disable(&mut vmcs).unwrap();
        let violation = rule_of(guest_verify_ia_32e_mode_enabled(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.message, "pae must be enabled if ia 32e guest mode is enabled");

        vm_entry::IA_32E_MODE_GUEST.disable(&mut vmcs).unwrap();
        assert_eq!(guest_verify_ia_32e_mode_enabled(&Checker::new(&vmcs, &mem)), Ok(()));
        cr4::PCID_ENABLE_BIT.enable(&mut vmcs).unwrap();
        let violation = rule_of(guest_verify_ia_32e_mode_disabled(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.rule, "guest_verify_ia_32e_mode_disabled");
    }

    #[test]
    fn pat_reserved_memory_type() {
        let mut vmcs = setup();
        let mem = NoMemory;
        let pa0 = ia32_pat::ENTRIES[0];

        pa0.memory_type.set(&mut vmcs, 2u64).unwrap();
        let violation = rule_of(guest_verify_load_ia32_pat(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.rule, "guest_verify_load_ia32_pat");
        assert_eq!(violation.message, "pat0 has a reserved memory type");

        pa0.memory_type.set(&mut vmcs, memory_type::UNCACHEABLE).unwrap();
        assert_eq!(guest_verify_load_ia32_pat(&Checker::new(&vmcs, &mem)), Ok(()));

        ia32_pat::ENTRIES[5].memory_type.set(&mut vmcs, 3u64).unwrap();
        let violation = rule_of(guest_verify_load_ia32_pat(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.message, "pat5 has a reserved memory type");

        // Not loaded on entry, not checked.
        vm_entry::LOAD_IA32_PAT.disable(&mut vmcs).unwrap();
        assert_eq!(guest_verify_load_ia32_pat(&Checker::new(&vmcs, &mem)), Ok(()));
    }

    #[test]
    fn efer_lma_without_ia_32e_mode() {
        let mut vmcs = setup();
        let mem = NoMemory;

        vm_entry::IA_32E_MODE_GUEST.disable(&mut vmcs).unwrap();
        ia32_efer::LMA.enable(&mut vmcs).unwrap();
        let violation = rule_of(guest_verify_load_ia32_efer(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.rule, "guest_verify_load_ia32_efer");
        assert_eq!(violation.message, "ia 32e mode is 0, but efer.lma is 1");

        vm_entry::IA_32E_MODE_GUEST.enable(&mut vmcs).unwrap();
        ia32_efer::LME.disable(&mut vmcs).unwrap();
        let violation = rule_of(guest_verify_load_ia32_efer(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.message, "efer.lme is 0, but efer.lma is 1");

        // LME only has to match LMA with paging enabled.
        cr0::PAGING.disable(&mut vmcs).unwrap();
        assert_eq!(guest_verify_load_ia32_efer(&Checker::new(&vmcs, &mem)), Ok(()));

        ia32_efer::FIELD.set(&mut vmcs, 0x0D01u64 | 1 << 2).unwrap();
        let violation = rule_of(guest_verify_load_ia32_efer(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(
            violation.message,
            "ia32 efer msr reserved bits must be 0 if load ia32 efer entry is enabled"
        );
    }

    #[test]
    fn bndcfgs() {
        let mut vmcs = setup();
        let mem = NoMemory;

        vm_entry::LOAD_IA32_BNDCFGS.enable(&mut vmcs).unwrap();
        ia32_bndcfgs::FIELD.set(&mut vmcs, 0xFFFF_8000_0000_1003u64).unwrap();
        assert_eq!(guest_verify_load_ia32_bndcfgs(&Checker::new(&vmcs, &mem)), Ok(()));

        ia32_bndcfgs::FIELD.set(&mut vmcs, 0x0000_8000_0000_1000u64).unwrap();
        let violation = rule_of(guest_verify_load_ia32_bndcfgs(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(
            violation.message,
            "bound address in ia32 bndcfgs msr must be canonical if load ia32 bndcfgs entry is enabled"
        );

        ia32_bndcfgs::FIELD.set(&mut vmcs, 0x1004u64).unwrap();
        let violation = rule_of(guest_verify_load_ia32_bndcfgs(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(
            violation.message,
            "ia32 bndcfgs msr reserved bits must be 0 if load ia32 bndcfgs entry is enabled"
        );
    }

    #[test]
    fn rip_and_rflags() {
        let mut vmcs = setup();
        let mem = NoMemory;

        rip::FIELD.set(&mut vmcs, 0xFFFF_8000_0000_0000u64).unwrap();
        assert_eq!(guest_rip_and_rflags_all(&Checker::new(&vmcs, &mem), &mut FailFast), Ok(()));

        rip::FIELD.set(&mut vmcs, 0x0000_8000_0000_0000u64).unwrap();
        let violation = rule_of(guest_rip_valid_addr(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.message, "rip bits must be canonical");

        cs::ACCESS_RIGHTS.l.disable(&mut vmcs).unwrap();
        assert_eq!(guest_rip_valid_addr(&Checker::new(&vmcs, &mem)), Ok(()));
        let violation = rule_of(guest_rip_upper_bits(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.rule, "guest_rip_upper_bits");

        rflags::FIELD.set(&mut vmcs, 0x8u64).unwrap();
        let violation = rule_of(guest_rflags_reserved_bits(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.message, "reserved bits in rflags must be 0");
        rflags::FIELD.set(&mut vmcs, 0u64).unwrap();
        let violation = rule_of(guest_rflags_reserved_bits(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.message, "always enabled bits in rflags must be 1");

        rflags::FIELD.set(&mut vmcs, 0x2u64 | 1 << 17).unwrap();
        let violation = rule_of(guest_rflags_vm_bit(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.rule, "guest_rflags_vm_bit");

        rflags::FIELD.set(&mut vmcs, 0x2u64).unwrap();
        entry_info::FIELD.set(&mut vmcs, 0x8000_0020u32).unwrap();
        let violation = rule_of(guest_rflag_interrupt_enable(&Checker::new(&vmcs, &mem))).unwrap();
        assert_eq!(violation.rule, "guest_rflag_interrupt_enable");
        rflags::INTERRUPT_ENABLE_FLAG.enable(&mut vmcs).unwrap();
        assert_eq!(guest_rflag_interrupt_enable(&Checker::new(&vmcs, &mem)), Ok(()));
    }

    #[test]
    fn descriptor_tables() {
        let mut vmcs = setup();
        let mem = NoMemory;

        gdtr::LIMIT.set(&mut vmcs, 0xFFFFu32).unwrap();
        assert_eq!(
            guest_descriptor_table_registers_all(&Checker::new(&vmcs, &mem), &mut FailFast),
            Ok(())
        );

        idtr::BASE.set(&mut vmcs, 0x0000_8000_0000_0000u64).unwrap();
        let violation = rule_of(guest_descriptor_table_registers_all(
            &Checker::new(&vmcs, &mem),
            &mut FailFast,
        ))
        .unwrap();
        assert_eq!(violation.rule, "guest_idtr_base_must_be_canonical");
    }

    #[test]
    fn pdptes_from_memory() {
        let mut vmcs = setup();
        pae_guest(&mut vmcs);
        let mut mem = FakeMemory::new();

        // PDPT at 0x3000: one valid entry, one not present entry with reserved bits.
        mem.write(0x3000, 0x0000_0000_0000_5001u64);
        mem.write(0x3008, 0xFFFF_FFFF_FFFF_FFFEu64);
        assert_eq!(guest_pdptes_all(&Checker::new(&vmcs, &mem), &mut FailFast), Ok(()));

        mem.write(0x3010, 0x0000_0000_0000_6003u64);
        let violation = rule_of(guest_pdptes_all(&Checker::new(&vmcs, &mem), &mut FailFast)).unwrap();
        assert_eq!(violation.rule, "guest_valid_pdpte_with_ept_disabled");
        assert_eq!(
            violation.message,
            "pdpte2 reserved bits set with ept disabled and pae paging enabled"
        );

        // Above MAXPHYADDR (46 bits).
        mem.write(0x3010, 0x0000_4000_0000_6001u64);
        let violation = rule_of(guest_pdptes_all(&Checker::new(&vmcs, &mem), &mut FailFast)).unwrap();
        assert_eq!(violation.values()[0], ("pdpte", 0x0000_4000_0000_6001));

        let violation =
            rule_of(guest_valid_pdpte_with_ept_disabled(&Checker::new(&vmcs, &NoMemory))).unwrap();
        assert_eq!(violation.message, "pdpt address could not be mapped");
    }

    #[test]
    fn pdptes_from_vmcs() {
        let mut vmcs = setup();
        pae_guest(&mut vmcs);
        primary::ACTIVATE_SECONDARY_CONTROLS.enable(&mut vmcs).unwrap();
        secondary::ENABLE_EPT.enable(&mut vmcs).unwrap();
        let mem = NoMemory;

        pdpte::PDPTE0.set(&mut vmcs, 0x5001u64).unwrap();
        pdpte::PDPTE3.set(&mut vmcs, 0x1E6u64).unwrap();
        assert_eq!(guest_pdptes_all(&Checker::new(&vmcs, &mem), &mut FailFast), Ok(()));

        pdpte::PDPTE3.set(&mut vmcs, 0x1E7u64).unwrap();
        let violation = rule_of(guest_pdptes_all(&Checker::new(&vmcs, &mem), &mut FailFast)).unwrap();
        assert_eq!(violation.rule, "guest_valid_pdpte_with_ept_enabled");
        assert_eq!(violation.message, "pdpte3 reserved bits set with ept and pae paging enabled");

        // Not checked in IA-32e mode.
        vm_entry::IA_32E_MODE_GUEST.enable(&mut vmcs).unwrap();
        assert_eq!(guest_pdptes_all(&Checker::new(&vmcs, &mem), &mut FailFast), Ok(()));
    }
}
