//! In-memory stand-ins for the hardware, used by the tests.
//!
//! [`FakeVmcs`] behaves like VMREAD/VMWRITE on a VMCS: values are truncated to the field width and
//! VM-exit information fields can not be written. [`FakeMemory`] serves the physical pages a test
//! wrote to. [`baseline`] programs a 64-bit guest and host that pass every VM-entry check.

use std::collections::BTreeMap;

use utils::{HostPhysAddr, HostVirtAddr, FRAME_SIZE};

use crate::access::{Field, Vmcs, VmcsBackend};
use crate::bitmaps::{
    EntryControls, ExitControls, PinbasedControls, PrimaryControls, SecondaryControls,
};
use crate::capabilities::Capabilities;
use crate::check::PhysMemory;
use crate::errors::{VmxError, VmxInstructionError};
use crate::fields::{control, guest, host};

// ——————————————————————————————— Fake VMCS ———————————————————————————————— //

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FakeVmcs {
    fields: BTreeMap<u32, u64>,
    fail_reads: bool,
}

impl FakeVmcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a field, bypassing width and read-only checks.
    pub fn poke(&mut self, encoding: u32, value: u64) {
        self.fields.insert(encoding, value);
    }

    /// Returns the raw content of a field, `None` if it was never written.
    pub fn peek(&self, encoding: u32) -> Option<u64> {
        self.fields.get(&encoding).copied()
    }

    /// Makes every subsequent VMREAD fail with VMfailInvalid.
    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }
}

fn describe(encoding: u32) -> Field {
    Field::new(encoding, "fake", |_| true)
}

impl VmcsBackend for FakeVmcs {
    fn vmread(&self, encoding: u32) -> Result<u64, VmxError> {
        if self.fail_reads {
            return Err(VmxError::VmFailInvalid);
        }
        Ok(self.peek(encoding).unwrap_or(0))
    }

    fn vmwrite(&mut self, encoding: u32, value: u64) -> Result<(), VmxError> {
        let field = describe(encoding);
        if field.is_read_only() {
            return Err(VmxError::VmFailValid(VmxInstructionError::VmWriteToReadOnly));
        }
        self.poke(encoding, value & field.width().mask());
        Ok(())
    }
}

// —————————————————————————————— Fake Memory ——————————————————————————————— //

/// Physical memory made of the pages a test wrote to, every other page is unmapped.
#[derive(Default)]
pub struct FakeMemory {
    // u64 words keep the pages 8-byte aligned.
    pages: BTreeMap<u64, Box<[u64; 512]>>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` at a physical address, mapping zeroed pages as needed.
    pub fn write<T: Copy>(&mut self, addr: u64, value: T) {
        let offset = addr as usize % FRAME_SIZE;
        assert!(offset + core::mem::size_of::<T>() <= FRAME_SIZE);

        let page = self
            .pages
            .entry(addr - offset as u64)
            .or_insert_with(|| Box::new([0; 512]));
        // SAFETY: the write stays within the page, checked above.
        unsafe {
            let ptr = (page.as_mut_ptr() as *mut u8).add(offset);
            core::ptr::write_unaligned(ptr as *mut T, value);
        }
    }
}

unsafe impl PhysMemory for FakeMemory {
    fn phys_to_virt(&self, addr: HostPhysAddr) -> Option<HostVirtAddr> {
        let frame = addr.align_down(FRAME_SIZE);
        let page = self.pages.get(&frame.as_u64())?;
        let virt = HostVirtAddr::new(page.as_ptr() as usize);
        Some(virt.offset(addr.as_usize() - frame.as_usize()))
    }
}

// —————————————————————————————— Capabilities —————————————————————————————— //

/// A processor where every control can be toggled, with fixed bits and address widths of a
/// recent server part.
pub fn capabilities() -> Capabilities {
    Capabilities::new()
        .with_revision(0x12)
        .with_true_ctls(true)
        .with_allowed1(PinbasedControls::all())
        .with_allowed1(PrimaryControls::all())
        .with_allowed1(SecondaryControls::all())
        .with_allowed1(ExitControls::all())
        .with_allowed1(EntryControls::all())
        // Zero-length injection, HLT, shutdown and wait-for-SIPI.
        .with_misc(1 << 30 | 0x1C0)
        .with_cr0_fixed(0x8000_0021, 0xFFFF_FFFF)
        .with_cr4_fixed(0x2000, 0x0077_77FF)
        // 4-level walks, UC and WB memory types, accessed and dirty flags.
        .with_ept_vpid_cap(1 << 6 | 1 << 8 | 1 << 14 | 1 << 21)
        .with_vmfunc(1)
        .with_host_efer(0xD01)
        .with_phys_addr_bits(46)
        .with_linear_addr_bits(48)
        .with_sgx(true)
        .with_rtm(true)
}

// ———————————————————————————————— Baseline ———————————————————————————————— //

const STANDARD_PAT: u64 = 0x0007_0406_0007_0406;
const EFER_LONG_MODE: u64 = 0xD01;

/// Programs a 64-bit guest and host passing every check.
///
/// Fields that do not exist with the VMCS capabilities are skipped, every other field is written
/// so tests start from a known state.
pub fn baseline<B: VmcsBackend>(vmcs: &mut Vmcs<B>) {
    baseline_controls(vmcs);
    baseline_host(vmcs);
    baseline_guest(vmcs);
}

fn baseline_controls<B: VmcsBackend>(vmcs: &mut Vmcs<B>) {
    control::pin_based::FIELD.set(vmcs, 0u32).unwrap();
    control::primary::FIELD.set(vmcs, 0u32).unwrap();
    control::secondary::FIELD.set_if_exists(vmcs, 0u32).unwrap();
    control::cr3_target_count::FIELD.set(vmcs, 0u32).unwrap();

    let exit = ExitControls::HOST_ADDRESS_SPACE_SIZE
        | ExitControls::LOAD_IA32_EFER
        | ExitControls::LOAD_IA32_PAT;
    let exit = exit & vmcs.caps().allowed1::<ExitControls>();
    control::vm_exit::set(vmcs, exit).unwrap();
    control::vm_exit_msr_store_count::FIELD.set(vmcs, 0u32).unwrap();
    control::vm_exit_msr_load_count::FIELD.set(vmcs, 0u32).unwrap();

    let entry = EntryControls::IA32E_MODE_GUEST
        | EntryControls::LOAD_DEBUG_CONTROLS
        | EntryControls::LOAD_IA32_EFER
        | EntryControls::LOAD_IA32_PAT;
    let entry = entry & vmcs.caps().allowed1::<EntryControls>();
    control::vm_entry::set(vmcs, entry).unwrap();
    control::vm_entry_msr_load_count::FIELD.set(vmcs, 0u32).unwrap();
    control::vm_entry_interruption_information::FIELD.set(vmcs, 0u32).unwrap();
    control::vm_entry_exception_error_code::FIELD.set(vmcs, 0u32).unwrap();
    control::vm_entry_instruction_length::FIELD.set(vmcs, 0u32).unwrap();
}

fn baseline_host<B: VmcsBackend>(vmcs: &mut Vmcs<B>) {
    host::cr0::FIELD.set(vmcs, 0x8000_0031u64).unwrap();
    host::cr3::FIELD.set(vmcs, 0x2000u64).unwrap();
    host::cr4::FIELD.set(vmcs, 0x2020u64).unwrap();

    for selector in host::SELECTORS {
        selector.field.set(vmcs, 0x10u16).unwrap();
    }
    host::cs_selector::FIELD.set(vmcs, 0x8u16).unwrap();
    host::tr_selector::FIELD.set(vmcs, 0x18u16).unwrap();

    for base in [
        host::fs_base::FIELD,
        host::gs_base::FIELD,
        host::tr_base::FIELD,
        host::gdtr_base::FIELD,
        host::idtr_base::FIELD,
    ] {
        base.set(vmcs, 0u64).unwrap();
    }

    host::ia32_sysenter_cs::FIELD.set(vmcs, 0u32).unwrap();
    host::ia32_sysenter_esp::FIELD.set(vmcs, 0u64).unwrap();
    host::ia32_sysenter_eip::FIELD.set(vmcs, 0u64).unwrap();
    host::ia32_pat::FIELD.set_if_exists(vmcs, STANDARD_PAT).unwrap();
    host::ia32_efer::FIELD.set_if_exists(vmcs, EFER_LONG_MODE).unwrap();
    host::rsp::FIELD.set(vmcs, 0xFFFF_8000_0010_0000u64).unwrap();
    host::rip::FIELD.set(vmcs, 0xFFFF_8000_0000_1000u64).unwrap();
}

fn baseline_guest<B: VmcsBackend>(vmcs: &mut Vmcs<B>) {
    // PG, NE, ET and PE.
    guest::cr0::FIELD.set(vmcs, 0x8000_0031u64).unwrap();
    guest::cr3::FIELD.set(vmcs, 0x1000u64).unwrap();
    // VMXE and PAE.
    guest::cr4::FIELD.set(vmcs, 0x2020u64).unwrap();
    guest::dr7::FIELD.set(vmcs, 0x400u64).unwrap();
    guest::ia32_debugctl::FIELD.set(vmcs, 0u64).unwrap();
    guest::ia32_sysenter_esp::FIELD.set(vmcs, 0u64).unwrap();
    guest::ia32_sysenter_eip::FIELD.set(vmcs, 0u64).unwrap();
    guest::ia32_pat::FIELD.set_if_exists(vmcs, STANDARD_PAT).unwrap();
    guest::ia32_efer::FIELD.set_if_exists(vmcs, EFER_LONG_MODE).unwrap();

    // Flat 64-bit code, data and TSS descriptors, no LDT.
    let flat = [
        (guest::cs::SEGMENT, 0x08u16, 0xFFFF_FFFFu32, 0xA09Bu32),
        (guest::ss::SEGMENT, 0x10, 0xFFFF_FFFF, 0xC093),
        (guest::ds::SEGMENT, 0x10, 0xFFFF_FFFF, 0xC093),
        (guest::es::SEGMENT, 0x10, 0xFFFF_FFFF, 0xC093),
        (guest::fs::SEGMENT, 0x10, 0xFFFF_FFFF, 0xC093),
        (guest::gs::SEGMENT, 0x10, 0xFFFF_FFFF, 0xC093),
        (guest::tr::SEGMENT, 0x18, 0x67, 0x008B),
        (guest::ldtr::SEGMENT, 0x00, 0, 0x1_0000),
    ];
    for (segment, selector, limit, access_rights) in flat {
        segment.selector.field.set(vmcs, selector).unwrap();
        segment.base.set(vmcs, 0u64).unwrap();
        segment.limit.set(vmcs, limit).unwrap();
        segment.access_rights.field.set(vmcs, access_rights).unwrap();
    }
    guest::gdtr::BASE.set(vmcs, 0u64).unwrap();
    guest::gdtr::LIMIT.set(vmcs, 0x27u32).unwrap();
    guest::idtr::BASE.set(vmcs, 0u64).unwrap();
    guest::idtr::LIMIT.set(vmcs, 0xFFFu32).unwrap();

    guest::rip::FIELD.set(vmcs, 0x1000u64).unwrap();
    guest::rsp::FIELD.set(vmcs, 0x8000u64).unwrap();
    guest::rflags::FIELD.set(vmcs, 0x2u64).unwrap();

    guest::activity_state::FIELD.set(vmcs, 0u32).unwrap();
    guest::interruptibility_state::FIELD.set(vmcs, 0u32).unwrap();
    guest::pending_debug_exceptions::FIELD.set(vmcs, 0u64).unwrap();
    guest::vmcs_link_pointer::FIELD.set(vmcs, u64::MAX).unwrap();
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use crate::fields::exit;

    #[test]
    fn fake_vmcs() {
        let mut fake = FakeVmcs::new();
        assert_eq!(fake.vmread(guest::rip::FIELD.encoding()), Ok(0));

        // 16-bit field.
        fake.vmwrite(guest::cs::SELECTOR.encoding(), 0x1_0008).unwrap();
        assert_eq!(fake.peek(guest::cs::SELECTOR.encoding()), Some(0x8));

        assert_eq!(
            fake.vmwrite(exit::exit_reason::FIELD.encoding(), 1),
            Err(VmxError::VmFailValid(VmxInstructionError::VmWriteToReadOnly))
        );

        fake.fail_reads(true);
        assert_eq!(fake.vmread(guest::cs::SELECTOR.encoding()), Err(VmxError::VmFailInvalid));
    }

    #[test]
    fn fake_memory() {
        let mut mem = FakeMemory::new();
        assert!(mem.phys_to_virt(HostPhysAddr::new(0x4000)).is_none());

        mem.write(0x4ff8, 0xdead_beefu64);
        let virt = mem.phys_to_virt(HostPhysAddr::new(0x4ff8)).unwrap();
        assert_eq!(unsafe { *(virt.as_usize() as *const u64) }, 0xdead_beef);
        let virt = mem.phys_to_virt(HostPhysAddr::new(0x4000)).unwrap();
        assert_eq!(unsafe { *(virt.as_usize() as *const u64) }, 0);
    }
}
