//! Checks on the guest non-register state: activity state, interruptibility state, pending debug
//! exceptions and the VMCS link pointer.
//!
//! See Intel SDM, Volume 3C, Section 26.3.1.5.

use super::{check, fail, phase, run, Check, CheckResult, Checker, Report};
use crate::access::VmcsBackend;
use crate::errors::VmxError;
use crate::fields::control::{
    pin_based, secondary, vm_entry, vm_entry_interruption_information as entry_info,
};
use crate::fields::guest::{
    activity_state, ia32_debugctl, interruptibility_state as interruptibility,
    pending_debug_exceptions as pending_dbg, rflags, ss, vmcs_link_pointer,
};

use entry_info::interruption_type;

/// Value of the VMCS link pointer meaning "no shadow VMCS".
const LINK_POINTER_UNUSED: u64 = u64::MAX;

/// Bit 31 of the first dword of a VMCS region, set for shadow VMCSs.
const SHADOW_VMCS_INDICATOR: u32 = 1 << 31;

/// Pending debug exception bits that must be 0 when the RTM bit is set: the reserved bits plus
/// B3:B0.
const PENDING_DBG_RTM_MUST_BE_ZERO: u64 = 0xFFFF_FFFF_FFFE_AFFF;

const VECTOR_DEBUG_EXCEPTION: u64 = 1;
const VECTOR_MACHINE_CHECK: u64 = 18;
const VECTOR_PENDING_MTF: u64 = 0;

phase!(
    /// Checks on the guest non-register state (SDM 26.3.1.5).
    guest_non_register_state_all,
    [
        guest_valid_activity_state,
        guest_activity_state_not_hlt_when_dpl_not_0,
        guest_must_be_active_if_injecting_blocking_state,
        guest_hlt_valid_interrupts,
        guest_shutdown_valid_interrupts,
        guest_sipi_valid_interrupts,
        guest_valid_activity_state_and_smm,
        guest_interruptibility_state_reserved,
        guest_interruptibility_state_sti_mov_ss,
        guest_interruptibility_state_sti,
        guest_interruptibility_state_external_interrupt,
        guest_interruptibility_state_nmi,
        guest_interruptibility_not_in_smm,
        guest_interruptibility_entry_to_smm,
        guest_interruptibility_state_sti_and_nmi,
        guest_interruptibility_state_virtual_nmi,
        guest_interruptibility_state_enclave_interrupt,
        guest_pending_debug_exceptions_reserved,
        guest_pending_debug_exceptions_dbg_ctl,
        guest_pending_debug_exceptions_rtm,
        guest_vmcs_link_pointer_bits_11_0,
        guest_vmcs_link_pointer_valid_addr,
        guest_vmcs_link_pointer_first_word,
        guest_vmcs_link_pointer_not_in_smm,
        guest_vmcs_link_pointer_in_smm,
    ]
);

/// The event injected on VM entry, if any.
struct Injection {
    ty: u64,
    vector: u64,
}

fn injection<B: VmcsBackend>(cx: &Checker<'_, B>) -> Result<Option<Injection>, VmxError> {
    let raw = entry_info::FIELD.get(cx.vmcs())?;
    if !entry_info::VALID_BIT.is_set_in(raw) {
        return Ok(None);
    }
    Ok(Some(Injection {
        ty: entry_info::INTERRUPTION_TYPE.decode(raw),
        vector: entry_info::VECTOR.decode(raw),
    }))
}

fn injected_type<B: VmcsBackend>(cx: &Checker<'_, B>, ty: u64) -> Result<bool, VmxError> {
    Ok(matches!(injection(cx)?, Some(injection) if injection.ty == ty))
}

fn link_pointer<B: VmcsBackend>(cx: &Checker<'_, B>) -> Result<Option<u64>, VmxError> {
    let pointer = vmcs_link_pointer::FIELD.get(cx.vmcs())?;
    if pointer == LINK_POINTER_UNUSED {
        Ok(None)
    } else {
        Ok(Some(pointer))
    }
}

// ————————————————————————————— Activity State ————————————————————————————— //

check! {
    fn guest_valid_activity_state(cx) {
        let state = activity_state::FIELD.get(cx.vmcs())?;
        if state > activity_state::WAIT_FOR_SIPI {
            fail!("activity state must be 0 - 3", "activity_state" => state);
        }
    }
}

check! {
    fn guest_activity_state_not_hlt_when_dpl_not_0(cx) {
        if activity_state::FIELD.get(cx.vmcs())? != activity_state::HLT {
            return Ok(());
        }
        let dpl = ss::ACCESS_RIGHTS.dpl.get(cx.vmcs())?;
        if dpl != 0 {
            fail!("ss.dpl must be 0 if activity state is hlt", "ss_dpl" => dpl);
        }
    }
}

check! {
    fn guest_must_be_active_if_injecting_blocking_state(cx) {
        if activity_state::FIELD.get(cx.vmcs())? == activity_state::ACTIVE {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_STI.is_enabled(cx.vmcs())? {
            fail!("activity state must be active if interruptibility state is sti");
        }
        if interruptibility::BLOCKING_BY_MOV_SS.is_enabled(cx.vmcs())? {
            fail!("activity state must be active if interruptibility state is mov-ss");
        }
    }
}

check! {
    /// In HLT, only external interrupts, NMIs, #DB, #MC and pending MTF VM exits can be injected.
    fn guest_hlt_valid_interrupts(cx) {
        use interruption_type::*;

        let Some(injection) = injection(cx)? else {
            return Ok(());
        };
        if activity_state::FIELD.get(cx.vmcs())? != activity_state::HLT {
            return Ok(());
        }
        let valid = match injection.ty {
            EXTERNAL_INTERRUPT | NON_MASKABLE_INTERRUPT => true,
            HARDWARE_EXCEPTION => {
                matches!(injection.vector, VECTOR_DEBUG_EXCEPTION | VECTOR_MACHINE_CHECK)
            }
            OTHER_EVENT => injection.vector == VECTOR_PENDING_MTF,
            _ => false,
        };
        if !valid {
            fail!(
                "invalid interruption combination for guest hlt",
                "type" => injection.ty,
                "vector" => injection.vector,
            );
        }
    }
}

check! {
    /// In shutdown, only NMIs and #MC can be injected.
    fn guest_shutdown_valid_interrupts(cx) {
        use interruption_type::*;

        let Some(injection) = injection(cx)? else {
            return Ok(());
        };
        if activity_state::FIELD.get(cx.vmcs())? != activity_state::SHUTDOWN {
            return Ok(());
        }
        let valid = match injection.ty {
            NON_MASKABLE_INTERRUPT => true,
            HARDWARE_EXCEPTION => injection.vector == VECTOR_MACHINE_CHECK,
            _ => false,
        };
        if !valid {
            fail!(
                "invalid interruption combination for guest shutdown",
                "type" => injection.ty,
                "vector" => injection.vector,
            );
        }
    }
}

check! {
    fn guest_sipi_valid_interrupts(cx) {
        let Some(injection) = injection(cx)? else {
            return Ok(());
        };
        if activity_state::FIELD.get(cx.vmcs())? == activity_state::WAIT_FOR_SIPI {
            fail!(
                "invalid interruption combination for guest wait for sipi",
                "type" => injection.ty,
                "vector" => injection.vector,
            );
        }
    }
}

check! {
    fn guest_valid_activity_state_and_smm(cx) {
        if vm_entry::ENTRY_TO_SMM.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if activity_state::FIELD.get(cx.vmcs())? == activity_state::WAIT_FOR_SIPI {
            fail!("activity state must not equal wait for sipi if entry to smm is enabled");
        }
    }
}

// ————————————————————————— Interruptibility State ————————————————————————— //

check! {
    fn guest_interruptibility_state_reserved(cx) {
        let reserved = interruptibility::RESERVED.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("interruptibility state reserved bits 31:5 must be 0", "reserved" => reserved);
        }
    }
}

check! {
    fn guest_interruptibility_state_sti_mov_ss(cx) {
        let state = interruptibility::FIELD.get(cx.vmcs())?;
        if interruptibility::BLOCKING_BY_STI.is_set_in(state)
            && interruptibility::BLOCKING_BY_MOV_SS.is_set_in(state)
        {
            fail!("interruptibility state sti and mov ss cannot both be 1", "state" => state);
        }
    }
}

check! {
    fn guest_interruptibility_state_sti(cx) {
        if rflags::INTERRUPT_ENABLE_FLAG.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_STI.is_enabled(cx.vmcs())? {
            fail!("interruptibility state sti must be 0 if rflags interrupt enabled is 0");
        }
    }
}

check! {
    fn guest_interruptibility_state_external_interrupt(cx) {
        if !injected_type(cx, interruption_type::EXTERNAL_INTERRUPT)? {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_STI.is_enabled(cx.vmcs())? {
            fail!("interruptibility state sti must be 0 if interrupt type is external and valid");
        }
        if interruptibility::BLOCKING_BY_MOV_SS.is_enabled(cx.vmcs())? {
            fail!("interruptibility state mov_ss must be 0 if interrupt type is external and valid");
        }
    }
}

check! {
    fn guest_interruptibility_state_nmi(cx) {
        if !injected_type(cx, interruption_type::NON_MASKABLE_INTERRUPT)? {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_MOV_SS.is_enabled(cx.vmcs())? {
            fail!("valid interrupt type must not be nmi if interruptibility state is mov-ss");
        }
    }
}

check! {
    /// Blocking by SMI must be 0 if the processor is not in SMM.
    fn guest_interruptibility_not_in_smm(cx) {
        // TODO: track whether the logical processor runs in SMM (dual-monitor treatment) and
        // require BLOCKING_BY_SMI to be 0 outside of it.
        let _ = cx;
        log::trace!("{}: skipped, smm state is not tracked", RULE);
    }
}

check! {
    fn guest_interruptibility_entry_to_smm(cx) {
        if vm_entry::ENTRY_TO_SMM.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_SMI.is_disabled(cx.vmcs())? {
            fail!("interruptibility state smi must be enabled if entry to smm is enabled");
        }
    }
}

check! {
    fn guest_interruptibility_state_sti_and_nmi(cx) {
        if !injected_type(cx, interruption_type::NON_MASKABLE_INTERRUPT)? {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_STI.is_enabled(cx.vmcs())? {
            fail!("some processors require sti to be 0 if the interruption type is nmi");
        }
    }
}

check! {
    fn guest_interruptibility_state_virtual_nmi(cx) {
        if pin_based::VIRTUAL_NMIS.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if !injected_type(cx, interruption_type::NON_MASKABLE_INTERRUPT)? {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_NMI.is_enabled(cx.vmcs())? {
            fail!("if virtual nmi is enabled, and the interruption type is nmi, blocking by nmi must be disabled");
        }
    }
}

check! {
    fn guest_interruptibility_state_enclave_interrupt(cx) {
        if interruptibility::ENCLAVE_INTERRUPTION.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if interruptibility::BLOCKING_BY_MOV_SS.is_enabled(cx.vmcs())? {
            fail!("blocking by mov ss is enabled but enclave interrupt is also enabled in interruptibility state");
        }
        if !cx.caps().sgx {
            fail!("enclave interrupt is 1 in interruptibility state but the processor does not support sgx");
        }
    }
}

// ———————————————————————— Pending Debug Exceptions ———————————————————————— //

check! {
    fn guest_pending_debug_exceptions_reserved(cx) {
        let reserved = pending_dbg::RESERVED.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("pending debug exception reserved bits must be 0", "reserved" => reserved);
        }
    }
}

check! {
    /// When blocking by STI or MOV SS, or in HLT, BS must reflect single stepping: set if
    /// RFLAGS.TF is 1 and DEBUGCTL.BTF is 0, clear if RFLAGS.TF is 0 and DEBUGCTL.BTF is 1.
    fn guest_pending_debug_exceptions_dbg_ctl(cx) {
        let sti = interruptibility::BLOCKING_BY_STI.is_enabled(cx.vmcs())?;
        let mov_ss = interruptibility::BLOCKING_BY_MOV_SS.is_enabled(cx.vmcs())?;
        let hlt = activity_state::FIELD.get(cx.vmcs())? == activity_state::HLT;
        if !sti && !mov_ss && !hlt {
            return Ok(());
        }

        let bs = pending_dbg::BS.is_enabled(cx.vmcs())?;
        let tf = rflags::TRAP_FLAG.is_enabled(cx.vmcs())?;
        let btf = ia32_debugctl::BTF.is_enabled(cx.vmcs())?;
        if !bs && tf && !btf {
            fail!("pending debug exception bs must be 1 if rflags tf is 1 and debugctl btf is 0");
        }
        if bs && !tf && btf {
            fail!("pending debug exception bs must be 0 if rflags tf is 0 and debugctl btf is 1");
        }
    }
}

check! {
    fn guest_pending_debug_exceptions_rtm(cx) {
        let pending = pending_dbg::FIELD.get(cx.vmcs())?;
        if !pending_dbg::RTM.is_set_in(pending) {
            return Ok(());
        }
        if pending & PENDING_DBG_RTM_MUST_BE_ZERO != 0 {
            fail!(
                "pending debug exception reserved bits and bits 3:0 must be 0 if rtm is 1",
                "pending_debug_exceptions" => pending,
            );
        }
        if !pending_dbg::ENABLED_BREAKPOINT.is_set_in(pending) {
            fail!("pending debug exception bit 12 must be 1 if rtm is 1");
        }
        if !cx.caps().rtm {
            fail!("rtm is set in pending debug exception but rtm is unsupported by the processor");
        }
        if interruptibility::BLOCKING_BY_MOV_SS.is_enabled(cx.vmcs())? {
            fail!("interruptibility-state field indicates blocking by mov ss but rtm is set in pending debug exceptions field");
        }
    }
}

// ——————————————————————————— VMCS Link Pointer ———————————————————————————— //

check! {
    fn guest_vmcs_link_pointer_bits_11_0(cx) {
        let Some(pointer) = link_pointer(cx)? else {
            return Ok(());
        };
        if pointer & 0xFFF != 0 {
            fail!("vmcs link pointer bits 11:0 must be 0", "vmcs_link_pointer" => pointer);
        }
    }
}

check! {
    fn guest_vmcs_link_pointer_valid_addr(cx) {
        let Some(pointer) = link_pointer(cx)? else {
            return Ok(());
        };
        if !cx.caps().is_physical_address_valid(pointer) {
            fail!("vmcs link pointer invalid physical address", "vmcs_link_pointer" => pointer);
        }
    }
}

check! {
    /// The VMCS referenced by the link pointer must carry the revision identifier of the
    /// processor, and be a shadow VMCS if VMCS shadowing is enabled.
    fn guest_vmcs_link_pointer_first_word(cx) {
        let Some(pointer) = link_pointer(cx)? else {
            return Ok(());
        };
        let Some(first_word) = cx.read_phys::<u32>(pointer) else {
            fail!("invalid vmcs physical address", "vmcs_link_pointer" => pointer);
        };

        let revision = first_word & !SHADOW_VMCS_INDICATOR;
        if revision != cx.caps().revision() {
            fail!(
                "shadow vmcs must contain cpu's revision id",
                "revision" => revision,
                "expected" => cx.caps().revision(),
            );
        }
        if cx.secondary_enabled(secondary::VMCS_SHADOWING)?
            && first_word & SHADOW_VMCS_INDICATOR == 0
        {
            fail!("shadow vmcs bit must be enabled if vmcs shadowing is enabled");
        }
    }
}

check! {
    /// Outside of SMM the link pointer must not be the VMXON pointer.
    fn guest_vmcs_link_pointer_not_in_smm(cx) {
        // TODO: compare against the VMXON pointer once the check engine knows about the VMXON
        // region and whether the processor runs in SMM.
        let _ = cx;
        log::trace!("{}: skipped, the vmxon pointer is not known", RULE);
    }
}

check! {
    /// In SMM the link pointer must not be the executive VMCS pointer.
    fn guest_vmcs_link_pointer_in_smm(cx) {
        // TODO: compare against the executive-VMCS pointer when entering SMM with dual-monitor
        // treatment.
        let _ = cx;
        log::trace!("{}: skipped, the executive vmcs pointer is not known", RULE);
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
