//! Capability snapshot
//!
//! VMX capability MSRs and the few CPUID facts the field accessors and checks depend on. The
//! snapshot is read once per boot with [`Capabilities::probe`] and never changes afterward, tests
//! build synthetic snapshots with the `with_*` methods instead.

use core::arch::x86_64::{__cpuid, __cpuid_count};

use spin::Once;

use crate::bitmaps::ControlSet;
use crate::msr::{self, Msr};

/// Default physical address width, used when CPUID leaf 0x8000_0008 is not available.
const DEFAULT_PHYS_ADDR_BITS: u32 = 36;

/// Default linear address width (4-level paging).
const DEFAULT_LINEAR_ADDR_BITS: u32 = 48;

/// Bit of IA32_VMX_BASIC reporting the IA32_VMX_TRUE_*_CTLS MSRs.
const BASIC_TRUE_CTLS: u64 = 1 << 55;

/// Bit of IA32_VMX_MISC allowing event injection with an instruction length of 0.
const MISC_INJECTION_WITH_ZERO_LENGTH: u64 = 1 << 30;

const EPT_MEMORY_TYPE_UC: u64 = 1 << 8;
const EPT_MEMORY_TYPE_WB: u64 = 1 << 14;
const EPT_ACCESSED_DIRTY: u64 = 1 << 21;

const EFER_LMA: u64 = 1 << 10;

const CPUID_EBX_SGX: u32 = 1 << 2;
const CPUID_EBX_RTM: u32 = 1 << 11;

/// The control capability MSRs, one per control field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ctls {
    Pinbased,
    Primary,
    Secondary,
    Exit,
    Entry,
}

impl Ctls {
    pub const fn name(self) -> &'static str {
        match self {
            Ctls::Pinbased => "ia32_vmx_true_pinbased_ctls",
            Ctls::Primary => "ia32_vmx_true_procbased_ctls",
            Ctls::Secondary => "ia32_vmx_procbased_ctls2",
            Ctls::Exit => "ia32_vmx_true_exit_ctls",
            Ctls::Entry => "ia32_vmx_true_entry_ctls",
        }
    }
}

/// An immutable snapshot of the VMX capabilities of the current processor.
///
/// For the control MSRs the low 32 bits are the allowed-0 settings (a bit set there must be 1 in
/// the control field) and the high 32 bits the allowed-1 settings (a bit cleared there must be 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// IA32_VMX_BASIC.
    pub basic: u64,
    pinbased: u64,
    primary: u64,
    secondary: u64,
    exit: u64,
    entry: u64,
    /// IA32_VMX_MISC.
    pub misc: u64,
    pub cr0_fixed0: u64,
    pub cr0_fixed1: u64,
    pub cr4_fixed0: u64,
    pub cr4_fixed1: u64,
    /// IA32_VMX_VMCS_ENUM.
    pub vmcs_enum: u64,
    /// IA32_VMX_EPT_VPID_CAP, zero if neither EPT nor VPID can be enabled.
    pub ept_vpid_cap: u64,
    /// IA32_VMX_VMFUNC, zero if VM functions can not be enabled.
    pub vmfunc: u64,
    /// IA32_EFER of the host at the time of the snapshot.
    pub host_efer: u64,
    /// MAXPHYADDR.
    pub phys_addr_bits: u32,
    /// Linear address width.
    pub linear_addr_bits: u32,
    /// CPUID.(EAX=07H, ECX=0):EBX.SGX
    pub sgx: bool,
    /// CPUID.(EAX=07H, ECX=0):EBX.RTM
    pub rtm: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl Capabilities {
    /// A processor supporting no optional VMX feature: every control may be 0 and none may be 1,
    /// and CR0/CR4 have no fixed bits.
    pub const fn new() -> Self {
        Self {
            basic: 0,
            pinbased: 0,
            primary: 0,
            secondary: 0,
            exit: 0,
            entry: 0,
            misc: 0,
            cr0_fixed0: 0,
            cr0_fixed1: u64::MAX,
            cr4_fixed0: 0,
            cr4_fixed1: u64::MAX,
            vmcs_enum: 0,
            ept_vpid_cap: 0,
            vmfunc: 0,
            host_efer: 0,
            phys_addr_bits: DEFAULT_PHYS_ADDR_BITS,
            linear_addr_bits: DEFAULT_LINEAR_ADDR_BITS,
            sgx: false,
            rtm: false,
        }
    }

    /// Reads the capability MSRs and CPUID leaves of the current processor.
    ///
    /// # Safety
    ///
    /// VMX must be supported by the processor, otherwise reading the capability MSRs raises #GP.
    pub unsafe fn probe() -> Self {
        let basic = msr::VMX_BASIC.read();
        let true_ctls = basic & BASIC_TRUE_CTLS != 0;
        let read_ctls = |ctls: Ctls| Msr::for_ctls(ctls, true_ctls).read();

        let mut caps = Self::new();
        caps.basic = basic;
        caps.pinbased = read_ctls(Ctls::Pinbased);
        caps.primary = read_ctls(Ctls::Primary);
        caps.exit = read_ctls(Ctls::Exit);
        caps.entry = read_ctls(Ctls::Entry);
        caps.misc = msr::VMX_MISC.read();
        caps.cr0_fixed0 = msr::VMX_CR0_FIXED0.read();
        caps.cr0_fixed1 = msr::VMX_CR0_FIXED1.read();
        caps.cr4_fixed0 = msr::VMX_CR4_FIXED0.read();
        caps.cr4_fixed1 = msr::VMX_CR4_FIXED1.read();
        caps.vmcs_enum = msr::VMX_VMCS_ENUM.read();
        caps.host_efer = msr::IA32_EFER.read();

        // SAFETY: the MSRs below exist only if the corresponding controls can be set.
        if caps.is_allowed1(Ctls::Primary, 31) {
            caps.secondary = read_ctls(Ctls::Secondary);
        }
        if caps.is_allowed1(Ctls::Secondary, 1) || caps.is_allowed1(Ctls::Secondary, 5) {
            caps.ept_vpid_cap = msr::VMX_EPT_VPID_CAP.read();
        }
        if caps.is_allowed1(Ctls::Secondary, 13) {
            caps.vmfunc = msr::VMX_VMFUNC.read();
        }

        // SAFETY: the CPUID instruction is not supported under SGX, we assume that this function
        // is never executed under SGX.
        if __cpuid(0x8000_0000).eax >= 0x8000_0008 {
            let sizes = __cpuid(0x8000_0008).eax;
            caps.phys_addr_bits = sizes & 0xFF;
            caps.linear_addr_bits = (sizes >> 8) & 0xFF;
        }
        if __cpuid(0).eax >= 7 {
            let features = __cpuid_count(7, 0).ebx;
            caps.sgx = features & CPUID_EBX_SGX != 0;
            caps.rtm = features & CPUID_EBX_RTM != 0;
        }

        log::info!(
            "VMX capabilities: revision {:#x}, true ctls {}, maxphyaddr {}, linear {}",
            caps.revision(),
            true_ctls,
            caps.phys_addr_bits,
            caps.linear_addr_bits
        );
        caps
    }

    /// The 31-bits VMCS revision identifier used by the CPU.
    pub const fn revision(&self) -> u32 {
        (self.basic & 0x7FFF_FFFF) as u32
    }

    /// Minimum required size in bytes for VMCS and VMXON regions.
    pub const fn vmcs_size(&self) -> u32 {
        ((self.basic >> 32) & 0x1FFF) as u32
    }

    /// Raw value of a control capability MSR.
    pub const fn ctls(&self, ctls: Ctls) -> u64 {
        match ctls {
            Ctls::Pinbased => self.pinbased,
            Ctls::Primary => self.primary,
            Ctls::Secondary => self.secondary,
            Ctls::Exit => self.exit,
            Ctls::Entry => self.entry,
        }
    }

    fn ctls_mut(&mut self, ctls: Ctls) -> &mut u64 {
        match ctls {
            Ctls::Pinbased => &mut self.pinbased,
            Ctls::Primary => &mut self.primary,
            Ctls::Secondary => &mut self.secondary,
            Ctls::Exit => &mut self.exit,
            Ctls::Entry => &mut self.entry,
        }
    }

    /// Returns true if the control bit may be 0.
    pub const fn is_allowed0(&self, ctls: Ctls, bit: u8) -> bool {
        self.ctls(ctls) & (1 << bit) == 0
    }

    /// Returns true if the control bit may be 1.
    pub const fn is_allowed1(&self, ctls: Ctls, bit: u8) -> bool {
        (self.ctls(ctls) >> 32) & (1 << bit) != 0
    }

    /// The controls that may be set to 1.
    pub fn allowed1<C: ControlSet>(&self) -> C {
        C::from_raw((self.ctls(C::CTLS) >> 32) as u32)
    }

    /// The controls that must be set to 1.
    pub fn required<C: ControlSet>(&self) -> C {
        C::from_raw(self.ctls(C::CTLS) as u32)
    }

    pub const fn true_ctls_supported(&self) -> bool {
        self.basic & BASIC_TRUE_CTLS != 0
    }

    pub const fn injection_with_zero_length(&self) -> bool {
        self.misc & MISC_INJECTION_WITH_ZERO_LENGTH != 0
    }

    pub const fn ept_uncacheable_supported(&self) -> bool {
        self.ept_vpid_cap & EPT_MEMORY_TYPE_UC != 0
    }

    pub const fn ept_write_back_supported(&self) -> bool {
        self.ept_vpid_cap & EPT_MEMORY_TYPE_WB != 0
    }

    pub const fn ept_accessed_dirty_supported(&self) -> bool {
        self.ept_vpid_cap & EPT_ACCESSED_DIRTY != 0
    }

    /// EFER.LMA of the host, i.e. whether the host runs in IA-32e mode.
    pub const fn host_efer_lma(&self) -> bool {
        self.host_efer & EFER_LMA != 0
    }

    pub const fn is_physical_address_valid(&self, addr: u64) -> bool {
        utils::is_physical_address_valid(addr, self.phys_addr_bits)
    }

    pub const fn is_address_canonical(&self, addr: u64) -> bool {
        utils::is_address_canonical(addr, self.linear_addr_bits)
    }

    pub const fn is_linear_address_valid(&self, addr: u64) -> bool {
        utils::is_linear_address_valid(addr, self.linear_addr_bits)
    }

    // ———————————————————————————————— Builder ————————————————————————————————— //

    /// Replaces a control capability MSR.
    pub fn with_ctls(mut self, ctls: Ctls, value: u64) -> Self {
        *self.ctls_mut(ctls) = value;
        self
    }

    /// Allows the given controls to be set to 1.
    pub fn with_allowed1<C: ControlSet>(mut self, set: C) -> Self {
        *self.ctls_mut(C::CTLS) |= (set.raw() as u64) << 32;
        self
    }

    /// Forbids the given controls to be set to 1, they are no longer required either.
    pub fn without_allowed1<C: ControlSet>(mut self, set: C) -> Self {
        let mask = set.raw() as u64;
        *self.ctls_mut(C::CTLS) &= !((mask << 32) | mask);
        self
    }

    /// Requires the given controls to be set to 1.
    pub fn with_required<C: ControlSet>(mut self, set: C) -> Self {
        let mask = set.raw() as u64;
        *self.ctls_mut(C::CTLS) |= (mask << 32) | mask;
        self
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.basic = (self.basic & !0x7FFF_FFFF) | (revision & 0x7FFF_FFFF) as u64;
        self
    }

    pub fn with_true_ctls(mut self, supported: bool) -> Self {
        if supported {
            self.basic |= BASIC_TRUE_CTLS;
        } else {
            self.basic &= !BASIC_TRUE_CTLS;
        }
        self
    }

    pub fn with_misc(mut self, misc: u64) -> Self {
        self.misc = misc;
        self
    }

    pub fn with_cr0_fixed(mut self, fixed0: u64, fixed1: u64) -> Self {
        self.cr0_fixed0 = fixed0;
        self.cr0_fixed1 = fixed1;
        self
    }

    pub fn with_cr4_fixed(mut self, fixed0: u64, fixed1: u64) -> Self {
        self.cr4_fixed0 = fixed0;
        self.cr4_fixed1 = fixed1;
        self
    }

    pub fn with_ept_vpid_cap(mut self, cap: u64) -> Self {
        self.ept_vpid_cap = cap;
        self
    }

    pub fn with_vmfunc(mut self, vmfunc: u64) -> Self {
        self.vmfunc = vmfunc;
        self
    }

    pub fn with_host_efer(mut self, efer: u64) -> Self {
        self.host_efer = efer;
        self
    }

    pub fn with_phys_addr_bits(mut self, bits: u32) -> Self {
        self.phys_addr_bits = bits;
        self
    }

    pub fn with_linear_addr_bits(mut self, bits: u32) -> Self {
        self.linear_addr_bits = bits;
        self
    }

    pub fn with_sgx(mut self, sgx: bool) -> Self {
        self.sgx = sgx;
        self
    }

    pub fn with_rtm(mut self, rtm: bool) -> Self {
        self.rtm = rtm;
        self
    }
}

// ————————————————————————————— Boot Snapshot —————————————————————————————— //

static BOOT_SNAPSHOT: Once<Capabilities> = Once::new();

/// Returns the capabilities of the current processor, probing them on first use.
///
/// # Safety
///
/// VMX must be supported by the processor, see [`Capabilities::probe`].
pub unsafe fn boot_snapshot() -> &'static Capabilities {
    BOOT_SNAPSHOT.call_once(|| unsafe { Capabilities::probe() })
}

// ————————————————————————————————— Tests —————————————————————————————————— //
