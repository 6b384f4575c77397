//! VMCS dump
//!
//! Logs the content of a VMCS at the `debug` level, one line per field or control bit.

use core::fmt;

use crate::access::{Control, Field, Vmcs, VmcsBackend};
use crate::errors::VmxError;
use crate::fields::{control, exit, guest, host};

const AREAS: [(&str, &[Field]); 4] = [
    ("control", control::FIELDS),
    ("vm-exit information", exit::FIELDS),
    ("guest state", guest::FIELDS),
    ("host state", host::FIELDS),
];

const CONTROL_FIELDS: [(&str, &[Control]); 5] = [
    ("pin-based controls", control::pin_based::CONTROLS),
    ("primary processor-based controls", control::primary::CONTROLS),
    ("secondary processor-based controls", control::secondary::CONTROLS),
    ("vm-exit controls", control::vm_exit::CONTROLS),
    ("vm-entry controls", control::vm_entry::CONTROLS),
];

/// The content of a field, as it appears in a dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Value(u64),
    Unsupported,
    Error(VmxError),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Value(value) => write!(f, "{:#x}", value),
            FieldValue::Unsupported => write!(f, "unsupported"),
            FieldValue::Error(err) => write!(f, "error: {}", err),
        }
    }
}

pub fn read_field<B: VmcsBackend>(vmcs: &Vmcs<B>, field: &Field) -> FieldValue {
    if !field.exists(vmcs.caps()) {
        return FieldValue::Unsupported;
    }
    match field.get(vmcs) {
        Ok(value) => FieldValue::Value(value),
        Err(err) => FieldValue::Error(err),
    }
}

/// The setting of a control bit, as it appears in a dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    Enabled,
    Disabled,
    /// The control may not be set to 1 on this processor.
    Unsupported,
    Error(VmxError),
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlState::Enabled => write!(f, "enabled"),
            ControlState::Disabled => write!(f, "disabled"),
            ControlState::Unsupported => write!(f, "unsupported"),
            ControlState::Error(err) => write!(f, "error: {}", err),
        }
    }
}

pub fn control_state<B: VmcsBackend>(vmcs: &Vmcs<B>, control: &Control) -> ControlState {
    if !control.exists(vmcs.caps()) || !control.is_allowed1(vmcs.caps()) {
        return ControlState::Unsupported;
    }
    match control.is_enabled(vmcs) {
        Ok(true) => ControlState::Enabled,
        Ok(false) => ControlState::Disabled,
        Err(err) => ControlState::Error(err),
    }
}

/// Logs every field of the VMCS.
pub fn dump<B: VmcsBackend>(vmcs: &Vmcs<B>) {
    log::debug!("VMCS {{");
    for (area, fields) in AREAS {
        log::debug!("    {} {{", area);
        for field in fields {
            log::debug!("        {}: {}", field.name(), read_field(vmcs, field));
        }
        log::debug!("    }}");
    }
    log::debug!("}}");
}

/// Logs every bit of the five control fields.
pub fn dump_controls<B: VmcsBackend>(vmcs: &Vmcs<B>) {
    for (name, controls) in CONTROL_FIELDS {
        log::debug!("{} {{", name);
        for control in controls {
            log::debug!("    {}: {}", control.name(), control_state(vmcs, control));
        }
        log::debug!("}}");
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmaps::SecondaryControls;
    use crate::fake::{self, FakeVmcs};

    #[test]
    fn field_values() {
        let caps = fake::capabilities().without_allowed1(SecondaryControls::ENABLE_PML);
        let mut vmcs = Vmcs::new(FakeVmcs::new(), caps);
        fake::baseline(&mut vmcs);

        let cr0 = read_field(&vmcs, &guest::cr0::FIELD);
        assert_eq!(cr0, FieldValue::Value(0x8000_0031));
        assert_eq!(format!("{}", cr0), "0x80000031");

        let pml = read_field(&vmcs, &control::pml_address::FIELD);
        assert_eq!(pml, FieldValue::Unsupported);
        assert_eq!(format!("{}", pml), "unsupported");

        vmcs.backend_mut().fail_reads(true);
        assert_eq!(read_field(&vmcs, &guest::cr0::FIELD), FieldValue::Error(VmxError::VmFailInvalid));
    }

    #[test]
    fn control_states() {
        let caps = fake::capabilities().without_allowed1(SecondaryControls::ENABLE_PML);
        let mut vmcs = Vmcs::new(FakeVmcs::new(), caps);
        fake::baseline(&mut vmcs);

        assert_eq!(
            control_state(&vmcs, &control::vm_entry::IA_32E_MODE_GUEST),
            ControlState::Enabled
        );
        assert_eq!(
            control_state(&vmcs, &control::primary::USE_TPR_SHADOW),
            ControlState::Disabled
        );
        assert_eq!(
            control_state(&vmcs, &control::secondary::ENABLE_PML),
            ControlState::Unsupported
        );
        assert_eq!(format!("{}", ControlState::Unsupported), "unsupported");
    }

    #[test]
    fn dump_does_not_fail_on_errors() {
        let mut vmcs = Vmcs::new(FakeVmcs::new(), fake::capabilities());
        vmcs.backend_mut().fail_reads(true);
        dump(&vmcs);
        dump_controls(&vmcs);
    }
}
