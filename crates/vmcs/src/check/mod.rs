//! Software implementation of the VM-entry checks
//!
//! This module implements the checks performed by the processor on VM entries (Intel SDM, Volume
//! 3C, Sections 26.2 and 26.3): the VMX controls, the host-state area and the guest-state area.
//! Running them before VMLAUNCH or VMRESUME turns an opaque "VM entry with invalid control fields"
//! or "VM entry failure due to invalid guest state" into a named rule and the offending values.
//!
//! Each check is a function named after the rule it implements. A check reads the VMCS through a
//! [`Checker`], never writes to it, and returns either `Ok(())` or a [`Violation`]. Checks are
//! grouped into phases (the `*_all` functions), which run their members in order and hand every
//! violation to a [`Report`] strategy.

pub mod control;
pub mod events;
pub mod guest;
pub mod host;
pub mod segments;

pub use control::*;
pub use events::*;
pub use guest::*;
pub use host::*;
pub use segments::*;

use core::fmt;

use utils::{HostPhysAddr, HostVirtAddr};

use crate::access::{Control, Vmcs, VmcsBackend};
use crate::capabilities::Capabilities;
use crate::errors::VmxError;
use crate::fields::control::{primary, vm_entry};
use crate::fields::guest::rflags;

/// Maximum number of values attached to a violation.
const MAX_VALUES: usize = 4;

// ———————————————————————————————— Violations —————————————————————————————— //

/// A broken VM-entry rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Violation {
    /// Name of the check that failed.
    pub rule: &'static str,
    /// Human-readable explanation.
    pub message: &'static str,
    values: [(&'static str, u64); MAX_VALUES],
    len: usize,
}

impl Violation {
    pub const fn new(rule: &'static str, message: &'static str) -> Self {
        Self {
            rule,
            message,
            values: [("", 0); MAX_VALUES],
            len: 0,
        }
    }

    /// Attaches a named value to the violation, at most four values are carried.
    pub fn with(mut self, name: &'static str, value: u64) -> Self {
        debug_assert!(self.len < MAX_VALUES, "too many values for {}", self.rule);
        if self.len < MAX_VALUES {
            self.values[self.len] = (name, value);
            self.len += 1;
        }
        self
    }

    pub fn values(&self) -> &[(&'static str, u64)] {
        &self.values[..self.len]
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.message)?;
        if self.len > 0 {
            write!(f, " (")?;
            for (idx, (name, value)) in self.values().iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={:#x}", name, value)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Why a check did not pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckError {
    /// The VMCS content breaks a VM-entry rule.
    Violation(Violation),
    /// The VMCS could not be read.
    Vmx(VmxError),
}

impl From<Violation> for CheckError {
    fn from(violation: Violation) -> Self {
        CheckError::Violation(violation)
    }
}

impl From<VmxError> for CheckError {
    fn from(err: VmxError) -> Self {
        CheckError::Vmx(err)
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::Violation(violation) => write!(f, "{}", violation),
            CheckError::Vmx(err) => write!(f, "{}", err),
        }
    }
}

pub type CheckResult = Result<(), CheckError>;

/// A single check.
pub type Check<B> = fn(&Checker<'_, B>) -> CheckResult;

// ————————————————————————————————— Report ————————————————————————————————— //

/// What to do with the violations found while running a phase.
pub trait Report {
    /// Called with each violation, returning an error stops the run.
    fn report(&mut self, violation: Violation) -> CheckResult;
}

/// Stops at the first violation.
pub struct FailFast;

impl Report for FailFast {
    fn report(&mut self, violation: Violation) -> CheckResult {
        Err(violation.into())
    }
}

/// Hands every violation to a closure and keeps going.
pub struct Collect<F>(pub F);

impl<F: FnMut(Violation)> Report for Collect<F> {
    fn report(&mut self, violation: Violation) -> CheckResult {
        (self.0)(violation);
        Ok(())
    }
}

// ————————————————————————————— Physical Memory ———————————————————————————— //

/// Access to physical memory, used by the few checks that inspect memory referenced by the VMCS
/// (the VMCS-link pointer, the guest PDPT and the virtual-APIC page).
///
/// # Safety
///
/// A returned virtual address must be mapped to the given physical address and valid for reads
/// up to the end of the enclosing 4KiB page.
pub unsafe trait PhysMemory {
    fn phys_to_virt(&self, addr: HostPhysAddr) -> Option<HostVirtAddr>;
}

/// Used when no physical memory can be inspected: every memory-backed check then fails as if the
/// address could not be mapped.
pub struct NoMemory;

unsafe impl PhysMemory for NoMemory {
    fn phys_to_virt(&self, _addr: HostPhysAddr) -> Option<HostVirtAddr> {
        None
    }
}

// ———————————————————————————————— Checker ————————————————————————————————— //

/// The state the checks run against.
pub struct Checker<'a, B> {
    vmcs: &'a Vmcs<B>,
    mem: &'a dyn PhysMemory,
}

impl<'a, B: VmcsBackend> Checker<'a, B> {
    pub fn new(vmcs: &'a Vmcs<B>, mem: &'a dyn PhysMemory) -> Self {
        Self { vmcs, mem }
    }

    pub fn vmcs(&self) -> &'a Vmcs<B> {
        self.vmcs
    }

    pub fn caps(&self) -> &'a Capabilities {
        self.vmcs.caps()
    }

    /// Reads a value of type `T` at a physical address, returns `None` if the address can not be
    /// mapped.
    pub(crate) fn read_phys<T: Copy>(&self, addr: u64) -> Option<T> {
        let virt = self.mem.phys_to_virt(HostPhysAddr::new(addr as usize))?;
        // SAFETY: the PhysMemory contract guarantees the address is mapped and readable.
        unsafe { Some(core::ptr::read_volatile(virt.as_usize() as *const T)) }
    }

    /// Returns true if "activate secondary controls" is enabled and the secondary control is
    /// enabled (if it exists).
    pub fn secondary_enabled(&self, control: Control) -> Result<bool, VmxError> {
        Ok(primary::ACTIVATE_SECONDARY_CONTROLS.is_enabled(self.vmcs)?
            && control.is_enabled_if_exists(self.vmcs)?)
    }

    pub fn unrestricted_guest(&self) -> Result<bool, VmxError> {
        self.secondary_enabled(crate::fields::control::secondary::UNRESTRICTED_GUEST)
    }

    pub fn ia_32e_mode_guest(&self) -> Result<bool, VmxError> {
        vm_entry::IA_32E_MODE_GUEST.is_enabled(self.vmcs)
    }

    pub fn v8086(&self) -> Result<bool, VmxError> {
        rflags::VIRTUAL_8086_MODE.is_enabled(self.vmcs)
    }
}

// ————————————————————————————————— Runner ————————————————————————————————— //

/// Runs a list of checks, logging every violation and handing it to `report`.
///
/// Failures to read the VMCS always stop the run.
pub fn run<B: VmcsBackend>(
    cx: &Checker<'_, B>,
    checks: &[Check<B>],
    report: &mut dyn Report,
) -> CheckResult {
    for check in checks {
        match check(cx) {
            Ok(()) => {}
            Err(CheckError::Violation(violation)) => {
                log::error!("VM entry check failed: {}", violation);
                report.report(violation)?;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Runs every check: VMX controls, host state, then guest state.
pub fn all<B: VmcsBackend>(cx: &Checker<'_, B>, report: &mut dyn Report) -> CheckResult {
    control_vmx_controls_all(cx, report)?;
    host_state_all(cx, report)?;
    guest_state_all(cx, report)
}

/// Runs the six guest-state phases.
pub fn guest_state_all<B: VmcsBackend>(
    cx: &Checker<'_, B>,
    report: &mut dyn Report,
) -> CheckResult {
    guest_control_registers_debug_registers_and_msrs_all(cx, report)?;
    guest_segment_registers_all(cx, report)?;
    guest_descriptor_table_registers_all(cx, report)?;
    guest_rip_and_rflags_all(cx, report)?;
    guest_non_register_state_all(cx, report)?;
    guest_pdptes_all(cx, report)
}

// ————————————————————————————————— Macros ————————————————————————————————— //

/// Defines a check, the name of the function is the name of the rule.
macro_rules! check {
    ($(#[$attr:meta])* fn $name:ident($cx:ident) $body:block) => {
        $(#[$attr])*
        pub fn $name<B: VmcsBackend>($cx: &Checker<'_, B>) -> CheckResult {
            #[allow(dead_code)]
            const RULE: &str = stringify!($name);
            $body
            Ok(())
        }
    };
}

/// Returns a violation of the current rule from the enclosing check.
macro_rules! fail {
    ($message:expr $(, $name:literal => $value:expr)* $(,)?) => {
        return Err(
            $crate::check::Violation::new(RULE, $message)
                $(.with($name, $value as u64))*
                .into()
        )
    };
}

/// Defines a phase running the given checks.
macro_rules! phase {
    ($(#[$attr:meta])* $name:ident, [$($check:ident),* $(,)?]) => {
        $(#[$attr])*
        pub fn $name<B: VmcsBackend>(cx: &Checker<'_, B>, report: &mut dyn Report) -> CheckResult {
            let checks: &[Check<B>] = &[$($check::<B>),*];
            run(cx, checks, report)
        }
    };
}

pub(crate) use {check, fail, phase};

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::fake::{self, FakeMemory, FakeVmcs};
    use crate::fields::guest;

    #[test]
    fn violation_display() {
        let violation = Violation::new("guest_cr0_for_unsupported_bits", "invalid cr0")
            .with("ia32_vmx_cr0_fixed0", 0x21)
            .with("cr0", 0x8000_0000);
        assert_eq!(
            format!("{}", violation),
            "guest_cr0_for_unsupported_bits: invalid cr0 (ia32_vmx_cr0_fixed0=0x21, cr0=0x80000000)"
        );
        assert_eq!(
            format!("{}", Violation::new("guest_tr_must_be_usable", "tr must be usable")),
            "guest_tr_must_be_usable: tr must be usable"
        );

        let mut violation = Violation::new("rule", "message");
        for idx in 0..MAX_VALUES as u64 {
            violation = violation.with("value", idx);
        }
        assert_eq!(violation.values().len(), MAX_VALUES);
        assert_eq!(violation.values()[3], ("value", 3));
    }

    #[test]
    #[should_panic(expected = "too many values for rule")]
    fn violation_value_overflow() {
        let mut violation = Violation::new("rule", "message");
        for idx in 0..=MAX_VALUES as u64 {
            violation = violation.with("value", idx);
        }
    }

    #[test]
    fn baseline_passes_every_check() {
        let mut vmcs = Vmcs::new(FakeVmcs::new(), fake::capabilities());
        fake::baseline(&mut vmcs);
        let mem = FakeMemory::new();
        let cx = Checker::new(&vmcs, &mem);
        assert_eq!(all(&cx, &mut FailFast), Ok(()));
    }

    #[test]
    fn report_strategies() {
        let mut vmcs = Vmcs::new(FakeVmcs::new(), fake::capabilities());
        fake::baseline(&mut vmcs);
        guest::tr::ACCESS_RIGHTS.unusable.enable(&mut vmcs).unwrap();
        guest::gdtr::LIMIT.set(&mut vmcs, 0x1_0000u32).unwrap();
        let mem = FakeMemory::new();
        let cx = Checker::new(&vmcs, &mem);

        let first = guest_state_all(&cx, &mut FailFast);
        match first {
            Err(CheckError::Violation(violation)) => {
                assert_eq!(violation.rule, "guest_tr_must_be_usable")
            }
            _ => panic!("expected a violation, got {:?}", first),
        }

        let mut rules = Vec::new();
        let result = guest_state_all(&cx, &mut Collect(|v: Violation| rules.push(v.rule)));
        assert_eq!(result, Ok(()));
        assert_eq!(
            rules,
            ["guest_tr_must_be_usable", "guest_gdtr_limit_reserved_bits"]
        );
    }

    #[test]
    fn idempotence() {
        let mut vmcs = Vmcs::new(FakeVmcs::new(), fake::capabilities());
        fake::baseline(&mut vmcs);
        guest::rflags::FIELD.set(&mut vmcs, 0u64).unwrap();
        let snapshot = vmcs.backend().clone();
        let mem = FakeMemory::new();
        let cx = Checker::new(&vmcs, &mem);

        let first = guest_state_all(&cx, &mut FailFast);
        let second = guest_state_all(&cx, &mut FailFast);
        assert!(first.is_err());
        assert_eq!(first, second);
        assert_eq!(vmcs.backend(), &snapshot);
    }

    #[test]
    fn read_failures_abort() {
        let mut vmcs = Vmcs::new(FakeVmcs::new(), fake::capabilities());
        fake::baseline(&mut vmcs);
        vmcs.backend_mut().fail_reads(true);
        let mem = FakeMemory::new();
        let cx = Checker::new(&vmcs, &mem);

        let mut count = 0;
        let result = all(&cx, &mut Collect(|_| count += 1));
        assert_eq!(result, Err(CheckError::Vmx(VmxError::VmFailInvalid)));
        assert_eq!(count, 0);
    }
}
