//! Checks on the VM-execution, VM-exit and VM-entry control fields.
//!
//! See Intel SDM, Volume 3C, Section 26.2.1.

use super::{check, fail, phase, run, Check, CheckResult, Checker, Report, Violation};
use crate::access::VmcsBackend;
use crate::capabilities::Ctls;
use crate::errors::VmxError;
use crate::fields::control::{
    address_of_io_bitmap_a, address_of_io_bitmap_b, address_of_msr_bitmaps, apic_access_address,
    cr3_target_count, ept_pointer, eptp_list_address, pin_based, pml_address,
    posted_interrupt_descriptor_address, posted_interrupt_notification_vector, primary, secondary,
    tpr_threshold, virtual_apic_address, virtualization_exception_information_address,
    vm_entry, vm_entry_exception_error_code, vm_entry_instruction_length,
    vm_entry_interruption_information as entry_info, vm_entry_msr_load_address,
    vm_entry_msr_load_count, vm_exit, vm_exit_msr_load_address, vm_exit_msr_load_count,
    vm_exit_msr_store_address, vm_exit_msr_store_count, vm_function_controls,
    vmread_bitmap_address, vmwrite_bitmap_address, vpid,
};
use crate::fields::guest;

use entry_info::interruption_type;

/// Offset of the VTPR register within the virtual-APIC page.
const VIRTUAL_APIC_VTPR_OFFSET: u64 = 0x80;

/// Size of an entry in the VM-exit and VM-entry MSR areas.
const MSR_AREA_ENTRY_SIZE: u64 = 16;

/// Maximum number of CR3-target values supported by all processors.
const MAX_CR3_TARGETS: u64 = 4;

/// Maximum length of an x86 instruction.
const MAX_INSTRUCTION_LENGTH: u64 = 15;

/// Exceptions delivering an error code: #DF, #TS, #NP, #SS, #GP, #PF and #AC.
const EXCEPTIONS_WITH_ERROR_CODE: [u64; 7] = [8, 10, 11, 12, 13, 14, 17];

const PAGE_OFFSET_MASK: u64 = 0xFFF;

/// Runs the checks on the three groups of control fields.
pub fn control_vmx_controls_all<B: VmcsBackend>(
    cx: &Checker<'_, B>,
    report: &mut dyn Report,
) -> CheckResult {
    control_vm_execution_control_fields_all(cx, report)?;
    control_vm_exit_control_fields_all(cx, report)?;
    control_vm_entry_control_fields_all(cx, report)
}

phase!(
    /// Checks on the VM-execution control fields (SDM 26.2.1.1).
    control_vm_execution_control_fields_all,
    [
        control_pin_based_ctls_reserved_properly_set,
        control_proc_based_ctls_reserved_properly_set,
        control_proc_based_ctls2_reserved_properly_set,
        control_cr3_count_less_then_4,
        control_io_bitmap_address_bits,
        control_msr_bitmap_address_bits,
        control_tpr_shadow_and_virtual_apic,
        control_nmi_exiting_and_virtual_nmi,
        control_virtual_nmi_and_nmi_window,
        control_virtual_apic_address_bits,
        control_x2apic_mode_and_virtual_apic_access,
        control_virtual_interrupt_and_external_interrupt,
        control_process_posted_interrupt_checks,
        control_vpid_checks,
        control_enable_ept_checks,
        control_unrestricted_guests,
        control_enable_vm_functions,
        control_enable_vmcs_shadowing,
        control_enable_ept_violation_checks,
        control_enable_pml_checks,
    ]
);

phase!(
    /// Checks on the VM-exit control fields (SDM 26.2.1.2).
    control_vm_exit_control_fields_all,
    [
        control_vm_exit_ctls_reserved_properly_set,
        control_activate_and_save_preemption_timer_must_be_0,
        control_exit_msr_store_address,
        control_exit_msr_load_address,
    ]
);

phase!(
    /// Checks on the VM-entry control fields (SDM 26.2.1.3).
    control_vm_entry_control_fields_all,
    [
        control_vm_entry_ctls_reserved_properly_set,
        control_event_injection_type_vector_checks,
        control_event_injection_delivery_ec_checks,
        control_event_injection_reserved_bits_checks,
        control_event_injection_ec_checks,
        control_event_injection_instr_length_checks,
        control_entry_msr_load_address,
    ]
);

// ———————————————————————————————— Helpers ————————————————————————————————— //

/// Checks a control field value against the allowed settings of its capability MSR: every
/// allowed-0 bit must be set and no bit outside of the allowed-1 bits may be set.
///
/// Allowed-1 failures of the secondary controls only count if "activate secondary controls" is
/// enabled.
pub fn control_reserved_properly_set<B: VmcsBackend>(
    cx: &Checker<'_, B>,
    ctls: Ctls,
    value: u64,
    rule: &'static str,
    message: &'static str,
) -> CheckResult {
    let msr = cx.caps().ctls(ctls);
    let allowed0 = msr & 0xFFFF_FFFF;
    let allowed1 = msr >> 32;
    let value = value & 0xFFFF_FFFF;

    if allowed0 & value != allowed0 {
        return Err(Violation::new(rule, message)
            .with(ctls.name(), msr)
            .with("allowed0", allowed0)
            .with("ctls", value)
            .into());
    }

    let mut allowed1_failed = value & !allowed1 != 0;
    if ctls == Ctls::Secondary {
        allowed1_failed &= primary::ACTIVATE_SECONDARY_CONTROLS.is_enabled(cx.vmcs())?;
    }
    if allowed1_failed {
        return Err(Violation::new(rule, message)
            .with(ctls.name(), msr)
            .with("allowed1", allowed1)
            .with("ctls", value)
            .into());
    }
    Ok(())
}

/// Returns true if a physical address is 4KiB aligned.
fn page_aligned(addr: u64) -> bool {
    addr & PAGE_OFFSET_MASK == 0
}

/// Validates a VM-exit or VM-entry MSR area: 16-byte aligned, and both ends within the physical
/// address width. Returns the failure message, if any.
fn msr_area<B: VmcsBackend>(
    cx: &Checker<'_, B>,
    count: u64,
    addr: u64,
    messages: [&'static str; 3],
) -> Option<&'static str> {
    if addr & 0xF != 0 {
        return Some(messages[0]);
    }
    if !cx.caps().is_physical_address_valid(addr) {
        return Some(messages[1]);
    }
    let end = addr.wrapping_add(count * MSR_AREA_ENTRY_SIZE).wrapping_sub(1);
    if end < addr || !cx.caps().is_physical_address_valid(end) {
        return Some(messages[2]);
    }
    None
}

fn injection_valid<B: VmcsBackend>(cx: &Checker<'_, B>) -> Result<bool, VmxError> {
    entry_info::VALID_BIT.is_enabled(cx.vmcs())
}

// ——————————————————————————— Execution Controls ——————————————————————————— //

check! {
    fn control_pin_based_ctls_reserved_properly_set(cx) {
        let value = pin_based::FIELD.get(cx.vmcs())?;
        control_reserved_properly_set(
            cx,
            Ctls::Pinbased,
            value,
            RULE,
            "invalid pin_based_vm_execution_controls",
        )?;
    }
}

check! {
    fn control_proc_based_ctls_reserved_properly_set(cx) {
        let value = primary::FIELD.get(cx.vmcs())?;
        control_reserved_properly_set(
            cx,
            Ctls::Primary,
            value,
            RULE,
            "invalid primary_processor_based_vm_execution_controls",
        )?;
    }
}

check! {
    fn control_proc_based_ctls2_reserved_properly_set(cx) {
        if !secondary::FIELD.exists(cx.caps()) {
            fail!("the secondary controls field doesn't exist");
        }
        let value = secondary::FIELD.get(cx.vmcs())?;
        control_reserved_properly_set(
            cx,
            Ctls::Secondary,
            value,
            RULE,
            "invalid secondary_processor_based_vm_execution_controls",
        )?;
    }
}

check! {
    fn control_cr3_count_less_then_4(cx) {
        let count = cr3_target_count::FIELD.get(cx.vmcs())?;
        if count > MAX_CR3_TARGETS {
            fail!("cr3 target count > 4", "cr3_target_count" => count);
        }
    }
}

check! {
    fn control_io_bitmap_address_bits(cx) {
        if primary::USE_IO_BITMAPS.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let addr_a = address_of_io_bitmap_a::FIELD.get(cx.vmcs())?;
        let addr_b = address_of_io_bitmap_b::FIELD.get(cx.vmcs())?;

        if !page_aligned(addr_a) {
            fail!("io bitmap a addr not page aligned", "addr" => addr_a);
        }
        if !page_aligned(addr_b) {
            fail!("io bitmap b addr not page aligned", "addr" => addr_b);
        }
        if !cx.caps().is_physical_address_valid(addr_a) {
            fail!("io bitmap a addr too large", "addr" => addr_a);
        }
        if !cx.caps().is_physical_address_valid(addr_b) {
            fail!("io bitmap b addr too large", "addr" => addr_b);
        }
    }
}

check! {
    fn control_msr_bitmap_address_bits(cx) {
        if primary::USE_MSR_BITMAPS.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let addr = address_of_msr_bitmaps::FIELD.get(cx.vmcs())?;
        if !page_aligned(addr) {
            fail!("msr bitmap addr not page aligned", "addr" => addr);
        }
        if !cx.caps().is_physical_address_valid(addr) {
            fail!("msr bitmap addr too large", "addr" => addr);
        }
    }
}

check! {
    /// With "use TPR shadow", the virtual-APIC page must be valid and the TPR threshold must not
    /// exceed VTPR[7:4]. Without it, the controls building on the TPR shadow must be 0.
    fn control_tpr_shadow_and_virtual_apic(cx) {
        let secondary_active = primary::ACTIVATE_SECONDARY_CONTROLS.is_enabled(cx.vmcs())?;

        if primary::USE_TPR_SHADOW.is_disabled(cx.vmcs())? {
            if !secondary_active {
                return Ok(());
            }
            if secondary::VIRTUALIZE_X2APIC_MODE.is_enabled_if_exists(cx.vmcs())? {
                fail!("virtualize_x2apic_mode must be disabled if tpr shadow is disabled");
            }
            if secondary::APIC_REGISTER_VIRTUALIZATION.is_enabled_if_exists(cx.vmcs())? {
                fail!("apic_register_virtualization must be disabled if tpr shadow is disabled");
            }
            if secondary::VIRTUAL_INTERRUPT_DELIVERY.is_enabled_if_exists(cx.vmcs())? {
                fail!("virtual_interrupt_delivery must be disabled if tpr shadow is disabled");
            }
            return Ok(());
        }

        let addr = virtual_apic_address::FIELD.get(cx.vmcs())?;
        if addr == 0 {
            fail!("virtual apic physical addr is NULL");
        }
        if !page_aligned(addr) {
            fail!("virtual apic addr not 4k aligned", "addr" => addr);
        }
        if !cx.caps().is_physical_address_valid(addr) {
            fail!("virtual apic addr too large", "addr" => addr);
        }
        if secondary_active && secondary::VIRTUAL_INTERRUPT_DELIVERY.is_enabled_if_exists(cx.vmcs())? {
            fail!("tpr_shadow is enabled, but virtual interrupt delivery is enabled");
        }

        let threshold = tpr_threshold::FIELD.get(cx.vmcs())?;
        if threshold & 0xFFFF_FFF0 != 0 {
            fail!("bits 31:4 of the tpr threshold must be 0", "tpr_threshold" => threshold);
        }
        if secondary_active && secondary::VIRTUALIZE_APIC_ACCESSES.is_enabled_if_exists(cx.vmcs())? {
            fail!("tpr_shadow is enabled, but virtual apic is enabled");
        }

        let Some(vtpr) = cx.read_phys::<u8>(addr + VIRTUAL_APIC_VTPR_OFFSET) else {
            fail!("virtual apic page could not be mapped", "addr" => addr);
        };
        let vtpr_7_4 = (vtpr as u64 & 0xF0) >> 4;
        if threshold & 0xF > vtpr_7_4 {
            fail!("invalid TPR threshold", "tpr_threshold" => threshold, "vtpr" => vtpr);
        }
    }
}

check! {
    fn control_nmi_exiting_and_virtual_nmi(cx) {
        if pin_based::NMI_EXITING.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        if pin_based::VIRTUAL_NMIS.is_enabled(cx.vmcs())? {
            fail!("virtual NMI must be 0 if NMI exiting is 0");
        }
    }
}

check! {
    fn control_virtual_nmi_and_nmi_window(cx) {
        if pin_based::VIRTUAL_NMIS.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        if primary::NMI_WINDOW_EXITING.is_enabled(cx.vmcs())? {
            fail!("NMI window exiting must be 0 if virtual NMI is 0");
        }
    }
}

check! {
    fn control_virtual_apic_address_bits(cx) {
        if !cx.secondary_enabled(secondary::VIRTUALIZE_APIC_ACCESSES)? {
            return Ok(());
        }
        let addr = apic_access_address::FIELD.get_if_exists(cx.vmcs())?;
        if addr == 0 {
            fail!("apic access physical addr is NULL");
        }
        if !page_aligned(addr) {
            fail!("apic access addr not 4k aligned", "addr" => addr);
        }
        if !cx.caps().is_physical_address_valid(addr) {
            fail!("apic access addr too large", "addr" => addr);
        }
    }
}

check! {
    fn control_x2apic_mode_and_virtual_apic_access(cx) {
        if !cx.secondary_enabled(secondary::VIRTUALIZE_X2APIC_MODE)? {
            return Ok(());
        }
        if secondary::VIRTUALIZE_APIC_ACCESSES.is_enabled_if_exists(cx.vmcs())? {
            fail!("apic accesses must be 0 if x2 apic mode is 1");
        }
    }
}

check! {
    fn control_virtual_interrupt_and_external_interrupt(cx) {
        if !cx.secondary_enabled(secondary::VIRTUAL_INTERRUPT_DELIVERY)? {
            return Ok(());
        }
        if pin_based::EXTERNAL_INTERRUPT_EXITING.is_disabled(cx.vmcs())? {
            fail!("external_interrupt_exiting must be 1 if virtual_interrupt_delivery is 1");
        }
    }
}

check! {
    fn control_process_posted_interrupt_checks(cx) {
        if pin_based::PROCESS_POSTED_INTERRUPTS.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        if !cx.secondary_enabled(secondary::VIRTUAL_INTERRUPT_DELIVERY)? {
            fail!("virtual interrupt delivery must be 1 if posted interrupts is 1");
        }
        if vm_exit::ACKNOWLEDGE_INTERRUPT_ON_EXIT.is_disabled(cx.vmcs())? {
            fail!("ack interrupt on exit must be 1 if posted interrupts is 1");
        }

        let vector = posted_interrupt_notification_vector::FIELD.get(cx.vmcs())?;
        if vector & 0xFF00 != 0 {
            fail!(
                "bits 15:8 of the notification vector must be 0 if posted interrupts is 1",
                "vector" => vector,
            );
        }

        let addr = posted_interrupt_descriptor_address::FIELD.get(cx.vmcs())?;
        if addr & 0x3F != 0 {
            fail!(
                "bits 5:0 of the interrupt descriptor addr must be 0 if posted interrupts is 1",
                "addr" => addr,
            );
        }
        if !cx.caps().is_physical_address_valid(addr) {
            fail!("interrupt descriptor addr too large", "addr" => addr);
        }
    }
}

check! {
    fn control_vpid_checks(cx) {
        if !cx.secondary_enabled(secondary::ENABLE_VPID)? {
            return Ok(());
        }
        if vpid::FIELD.get_if_exists(cx.vmcs())? == 0 {
            fail!("vpid cannot equal 0");
        }
    }
}

check! {
    /// The EPT pointer must use a supported memory type, a 4-level walk, and accessed/dirty flags
    /// only if supported.
    fn control_enable_ept_checks(cx) {
        if !cx.secondary_enabled(secondary::ENABLE_EPT)? {
            return Ok(());
        }
        let caps = cx.caps();
        let eptp = ept_pointer::FIELD.get_if_exists(cx.vmcs())?;

        let memory_type = ept_pointer::MEMORY_TYPE.decode(eptp);
        match memory_type {
            ept_pointer::MEMORY_TYPE_UNCACHEABLE if !caps.ept_uncacheable_supported() => {
                fail!("hardware does not support ept memory type: uncachable")
            }
            ept_pointer::MEMORY_TYPE_WRITE_BACK if !caps.ept_write_back_supported() => {
                fail!("hardware does not support ept memory type: write-back")
            }
            ept_pointer::MEMORY_TYPE_UNCACHEABLE | ept_pointer::MEMORY_TYPE_WRITE_BACK => {}
            _ => fail!("unknown eptp memory type", "memory_type" => memory_type),
        }

        let walk_length = ept_pointer::PAGE_WALK_LENGTH_MINUS_ONE.decode(eptp);
        if walk_length != 3 {
            fail!(
                "the ept walk-through length must be 1 less than 4, i.e. 3",
                "page_walk_length_minus_one" => walk_length,
            );
        }
        if ept_pointer::ACCESSED_AND_DIRTY_FLAGS.is_set_in(eptp) && !caps.ept_accessed_dirty_supported() {
            fail!("hardware does not support dirty / accessed flags for ept");
        }
        if ept_pointer::RESERVED.decode(eptp) != 0 {
            fail!("bits 11:7 and 63:48 of the eptp must be 0", "eptp" => eptp);
        }
    }
}

check! {
    fn control_unrestricted_guests(cx) {
        if !cx.unrestricted_guest()? {
            return Ok(());
        }
        if secondary::ENABLE_EPT.is_disabled_if_exists(cx.vmcs())? {
            fail!("enable ept must be 1 if unrestricted guest is 1");
        }
    }
}

check! {
    /// Only VM functions reported by IA32_VMX_VMFUNC may be enabled, EPTP switching requires EPT
    /// and a valid EPTP list.
    fn control_enable_vm_functions(cx) {
        if !cx.secondary_enabled(secondary::ENABLE_VM_FUNCTIONS)? {
            return Ok(());
        }
        if !vm_function_controls::FIELD.exists(cx.caps()) {
            return Ok(());
        }

        let controls = vm_function_controls::FIELD.get(cx.vmcs())?;
        if !cx.caps().vmfunc & controls != 0 {
            fail!(
                "unsupported vm function control bit set",
                "vm_function_controls" => controls,
                "ia32_vmx_vmfunc" => cx.caps().vmfunc,
            );
        }
        if !vm_function_controls::EPTP_SWITCHING.is_set_in(controls) {
            return Ok(());
        }
        if secondary::ENABLE_EPT.is_disabled_if_exists(cx.vmcs())? {
            fail!("enable ept must be 1 if eptp switching is 1");
        }

        let list = eptp_list_address::FIELD.get_if_exists(cx.vmcs())?;
        if !page_aligned(list) {
            fail!("bits 11:0 must be 0 for eptp list address", "addr" => list);
        }
        if !cx.caps().is_physical_address_valid(list) {
            fail!("eptp list address addr too large", "addr" => list);
        }
    }
}

check! {
    fn control_enable_vmcs_shadowing(cx) {
        if !cx.secondary_enabled(secondary::VMCS_SHADOWING)? {
            return Ok(());
        }
        let vmread = vmread_bitmap_address::FIELD.get_if_exists(cx.vmcs())?;
        let vmwrite = vmwrite_bitmap_address::FIELD.get_if_exists(cx.vmcs())?;

        if !page_aligned(vmread) {
            fail!("bits 11:0 must be 0 for the vmcs read bitmap address", "addr" => vmread);
        }
        if !page_aligned(vmwrite) {
            fail!("bits 11:0 must be 0 for the vmcs write bitmap address", "addr" => vmwrite);
        }
        if !cx.caps().is_physical_address_valid(vmread) {
            fail!("vmcs read bitmap address addr too large", "addr" => vmread);
        }
        if !cx.caps().is_physical_address_valid(vmwrite) {
            fail!("vmcs write bitmap address addr too large", "addr" => vmwrite);
        }
    }
}

check! {
    fn control_enable_ept_violation_checks(cx) {
        if !cx.secondary_enabled(secondary::EPT_VIOLATION_VE)? {
            return Ok(());
        }
        let addr = virtualization_exception_information_address::FIELD.get_if_exists(cx.vmcs())?;
        if !page_aligned(addr) {
            fail!("bits 11:0 must be 0 for the vmcs virt except info address", "addr" => addr);
        }
        if !cx.caps().is_physical_address_valid(addr) {
            fail!("vmcs virt except info address addr too large", "addr" => addr);
        }
    }
}

check! {
    fn control_enable_pml_checks(cx) {
        if !cx.secondary_enabled(secondary::ENABLE_PML)? {
            return Ok(());
        }
        let addr = pml_address::FIELD.get_if_exists(cx.vmcs())?;
        if secondary::ENABLE_EPT.is_disabled_if_exists(cx.vmcs())? {
            fail!("ept must be enabled if pml is enabled");
        }
        if !cx.caps().is_physical_address_valid(addr) {
            fail!("pml address must be a valid physical address", "addr" => addr);
        }
        if !page_aligned(addr) {
            fail!("bits 11:0 of the pml address must be 0", "addr" => addr);
        }
    }
}

// ————————————————————————————— Exit Controls —————————————————————————————— //

check! {
    fn control_vm_exit_ctls_reserved_properly_set(cx) {
        let value = vm_exit::FIELD.get(cx.vmcs())?;
        control_reserved_properly_set(cx, Ctls::Exit, value, RULE, "invalid vm_exit_controls")?;
    }
}

check! {
    fn control_activate_and_save_preemption_timer_must_be_0(cx) {
        if pin_based::ACTIVATE_VMX_PREEMPTION_TIMER.is_enabled(cx.vmcs())? {
            return Ok(());
        }
        if vm_exit::SAVE_VMX_PREEMPTION_TIMER_VALUE.is_enabled(cx.vmcs())? {
            fail!("save vmx preemption timer must be 0 if activate vmx preemption timer is 0");
        }
    }
}

check! {
    fn control_exit_msr_store_address(cx) {
        let count = vm_exit_msr_store_count::FIELD.get(cx.vmcs())?;
        if count == 0 {
            return Ok(());
        }
        let addr = vm_exit_msr_store_address::FIELD.get(cx.vmcs())?;
        let messages = [
            "bits 3:0 must be 0 for the exit msr store address",
            "exit msr store addr too large",
            "end of exit msr store area too large",
        ];
        if let Some(message) = msr_area(cx, count, addr, messages) {
            fail!(message, "addr" => addr, "count" => count);
        }
    }
}

check! {
    fn control_exit_msr_load_address(cx) {
        let count = vm_exit_msr_load_count::FIELD.get(cx.vmcs())?;
        if count == 0 {
            return Ok(());
        }
        let addr = vm_exit_msr_load_address::FIELD.get(cx.vmcs())?;
        let messages = [
            "bits 3:0 must be 0 for the exit msr load address",
            "exit msr load addr too large",
            "end of exit msr load area too large",
        ];
        if let Some(message) = msr_area(cx, count, addr, messages) {
            fail!(message, "addr" => addr, "count" => count);
        }
    }
}

// ————————————————————————————— Entry Controls ————————————————————————————— //

check! {
    fn control_vm_entry_ctls_reserved_properly_set(cx) {
        let value = vm_entry::FIELD.get(cx.vmcs())?;
        control_reserved_properly_set(cx, Ctls::Entry, value, RULE, "invalid vm_entry_controls")?;
    }
}

check! {
    fn control_event_injection_type_vector_checks(cx) {
        use interruption_type::*;

        if !injection_valid(cx)? {
            return Ok(());
        }
        let ty = entry_info::INTERRUPTION_TYPE.get(cx.vmcs())?;
        let vector = entry_info::VECTOR.get(cx.vmcs())?;

        if ty == RESERVED {
            fail!("interrupt information field type of 1 is reserved");
        }
        if ty == OTHER_EVENT && !primary::MONITOR_TRAP_FLAG.is_allowed1(cx.caps()) {
            fail!("interrupt information field type of 7 is reserved on this hardware");
        }
        if ty == NON_MASKABLE_INTERRUPT && vector != 2 {
            fail!(
                "interrupt information field vector must be 2 if the type field is 2 (NMI)",
                "vector" => vector,
            );
        }
        if ty == HARDWARE_EXCEPTION && vector > 31 {
            fail!(
                "interrupt information field vector must be at most 31 if the type field is 3 (HE)",
                "vector" => vector,
            );
        }
        if ty == OTHER_EVENT && vector != 0 {
            fail!(
                "interrupt information field vector must be 0 if the type field is 7 (other)",
                "vector" => vector,
            );
        }
    }
}

check! {
    /// "Deliver error code" must be set exactly for the hardware exceptions that push an error
    /// code, and never for a real-mode unrestricted guest.
    fn control_event_injection_delivery_ec_checks(cx) {
        if !injection_valid(cx)? {
            return Ok(());
        }
        let ty = entry_info::INTERRUPTION_TYPE.get(cx.vmcs())?;
        let vector = entry_info::VECTOR.get(cx.vmcs())?;
        let deliver = entry_info::DELIVER_ERROR_CODE_BIT.is_enabled(cx.vmcs())?;

        if deliver && cx.unrestricted_guest()? && guest::cr0::PROTECTION_ENABLE.is_disabled(cx.vmcs())? {
            fail!("unrestricted guest must be 0 or PE must be enabled in cr0 if deliver_error_code_bit is set");
        }
        if ty != interruption_type::HARDWARE_EXCEPTION {
            if deliver {
                fail!("interrupt information field type must be 3 if deliver_error_code_bit is set", "type" => ty);
            }
            return Ok(());
        }

        let pushes_error_code = EXCEPTIONS_WITH_ERROR_CODE.contains(&vector);
        if pushes_error_code && !deliver {
            fail!("deliver_error_code_bit must be 1", "vector" => vector);
        }
        if !pushes_error_code && deliver {
            fail!(
                "vector must indicate exception that would normally deliver an error code if deliver_error_code_bit is set",
                "vector" => vector,
            );
        }
    }
}

check! {
    fn control_event_injection_reserved_bits_checks(cx) {
        if !injection_valid(cx)? {
            return Ok(());
        }
        let reserved = entry_info::RESERVED.get(cx.vmcs())?;
        if reserved != 0 {
            fail!("reserved bits of the interrupt info field must be 0", "reserved" => reserved);
        }
    }
}

check! {
    fn control_event_injection_ec_checks(cx) {
        if !injection_valid(cx)? {
            return Ok(());
        }
        if entry_info::DELIVER_ERROR_CODE_BIT.is_disabled(cx.vmcs())? {
            return Ok(());
        }
        let error_code = vm_entry_exception_error_code::FIELD.get(cx.vmcs())?;
        if error_code & 0xFFFF_8000 != 0 {
            fail!(
                "bits 31:15 of the exception error code field must be 0 if deliver error code bit is set in the interrupt info field",
                "error_code" => error_code,
            );
        }
    }
}

check! {
    /// Software interrupts and exceptions need an instruction length of 1 to 15 (0 is allowed
    /// if IA32_VMX_MISC says so).
    fn control_event_injection_instr_length_checks(cx) {
        use interruption_type::*;

        if !injection_valid(cx)? {
            return Ok(());
        }
        let ty = entry_info::INTERRUPTION_TYPE.get(cx.vmcs())?;
        if !matches!(ty, SOFTWARE_INTERRUPT | PRIVILEGED_SOFTWARE_EXCEPTION | SOFTWARE_EXCEPTION) {
            return Ok(());
        }

        let length = vm_entry_instruction_length::FIELD.get(cx.vmcs())?;
        if length == 0 && !cx.caps().injection_with_zero_length() {
            fail!("instruction length must be greater than zero");
        }
        if length > MAX_INSTRUCTION_LENGTH {
            fail!(
                "instruction length must be in the range of 0-15 if type is 4, 5, 6",
                "length" => length,
            );
        }
    }
}

check! {
    fn control_entry_msr_load_address(cx) {
        let count = vm_entry_msr_load_count::FIELD.get(cx.vmcs())?;
        if count == 0 {
            return Ok(());
        }
        let addr = vm_entry_msr_load_address::FIELD.get(cx.vmcs())?;
        let messages = [
            "bits 3:0 must be 0 for the entry msr load address",
            "entry msr load addr too large",
            "end of entry msr load area too large",
        ];
        if let Some(message) = msr_area(cx, count, addr, messages) {
            fail!(message, "addr" => addr, "count" => count);
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
