//! VMCS field access
//!
//! A field is described by a constant [`Field`] (encoding, name and existence predicate), its
//! sub-fields by [`Bits`] and [`Flag`], and the bits of the control fields by [`Control`]. All
//! accesses go through a [`Vmcs`], which pairs a [`VmcsBackend`] with the capability snapshot the
//! existence predicates are evaluated against.

use crate::capabilities::{Capabilities, Ctls};
use crate::errors::VmxError;

// ———————————————————————— Masks from Intel Manual ————————————————————————— //
// See Intel SDM, Volume 3C, Section 24.11.2, Table 24-17 (Structure of VMCS Component Encoding).

const FIELD_TYPE_SHIFT: u32 = 10;
const FIELD_TYPE_MASK: u32 = 0b11 << FIELD_TYPE_SHIFT;
const FIELD_WIDTH_SHIFT: u32 = 13;
const FIELD_WIDTH_MASK: u32 = 0b11 << FIELD_WIDTH_SHIFT;

/// Width of a VMCS field, as encoded in bits 14:13 of its encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldWidth {
    Width16,
    Width64,
    Width32,
    Natural,
}

impl FieldWidth {
    /// Mask of the bits a field of this width can hold.
    pub const fn mask(self) -> u64 {
        match self {
            FieldWidth::Width16 => 0xFFFF,
            FieldWidth::Width32 => 0xFFFF_FFFF,
            FieldWidth::Width64 | FieldWidth::Natural => u64::MAX,
        }
    }
}

/// Area of the VMCS a field belongs to, as encoded in bits 11:10 of its encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldType {
    Control,
    VmExitInformation,
    GuestState,
    HostState,
}

// ———————————————————————————————— Backend ————————————————————————————————— //

/// The two VMX primitives a VMCS is accessed through.
///
/// The hardware implementation is [`ActiveVmcs`](crate::ActiveVmcs), which executes VMREAD and
/// VMWRITE on the current VMCS.
pub trait VmcsBackend {
    fn vmread(&self, encoding: u32) -> Result<u64, VmxError>;
    fn vmwrite(&mut self, encoding: u32, value: u64) -> Result<(), VmxError>;
}

impl<T: VmcsBackend + ?Sized> VmcsBackend for &mut T {
    fn vmread(&self, encoding: u32) -> Result<u64, VmxError> {
        (**self).vmread(encoding)
    }

    fn vmwrite(&mut self, encoding: u32, value: u64) -> Result<(), VmxError> {
        (**self).vmwrite(encoding, value)
    }
}

/// A VMCS, together with the capabilities of the processor it is used on.
pub struct Vmcs<B> {
    backend: B,
    caps: Capabilities,
}

impl<B: VmcsBackend> Vmcs<B> {
    pub fn new(backend: B, caps: Capabilities) -> Self {
        Self { backend, caps }
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_inner(self) -> B {
        self.backend
    }

    fn read(&self, field: &Field) -> Result<u64, VmxError> {
        if !field.exists(&self.caps) {
            return Err(VmxError::UnsupportedField(field.name));
        }
        self.backend.vmread(field.encoding)
    }

    fn write(&mut self, field: &Field, value: u64) -> Result<(), VmxError> {
        if !field.exists(&self.caps) {
            return Err(VmxError::UnsupportedField(field.name));
        }
        self.backend.vmwrite(field.encoding, value)
    }
}

// ————————————————————————————————— Fields ————————————————————————————————— //

/// A VMCS field.
#[derive(Clone, Copy, Debug)]
pub struct Field {
    encoding: u32,
    name: &'static str,
    exists: fn(&Capabilities) -> bool,
}

impl Field {
    pub const fn new(encoding: u32, name: &'static str, exists: fn(&Capabilities) -> bool) -> Self {
        Self {
            encoding,
            name,
            exists,
        }
    }

    pub const fn encoding(&self) -> u32 {
        self.encoding
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn width(&self) -> FieldWidth {
        match (self.encoding & FIELD_WIDTH_MASK) >> FIELD_WIDTH_SHIFT {
            0 => FieldWidth::Width16,
            1 => FieldWidth::Width64,
            2 => FieldWidth::Width32,
            _ => FieldWidth::Natural,
        }
    }

    pub const fn field_type(&self) -> FieldType {
        match (self.encoding & FIELD_TYPE_MASK) >> FIELD_TYPE_SHIFT {
            0 => FieldType::Control,
            1 => FieldType::VmExitInformation,
            2 => FieldType::GuestState,
            _ => FieldType::HostState,
        }
    }

    /// VM-exit information fields can not be written with VMWRITE (unless the processor supports
    /// VMWRITE to any field, which we do not rely on).
    pub const fn is_read_only(&self) -> bool {
        matches!(self.field_type(), FieldType::VmExitInformation)
    }

    /// A multi-bit sub-field of this field.
    pub const fn bits(self, name: &'static str, mask: u64) -> Bits {
        Bits::new(self, name, mask)
    }

    /// A single-bit sub-field of this field.
    pub const fn flag(self, name: &'static str, bit: u8) -> Flag {
        Flag(Bits::new(self, name, 1 << bit))
    }

    /// A control bit of this field, whose allowed settings are reported by `ctls`.
    pub const fn control(self, name: &'static str, bit: u8, ctls: Ctls) -> Control {
        Control {
            flag: self.flag(name, bit),
            bit,
            ctls,
        }
    }

    /// Returns true if the field is implemented by the processor.
    pub fn exists(&self, caps: &Capabilities) -> bool {
        (self.exists)(caps)
    }

    pub fn get<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<u64, VmxError> {
        vmcs.read(self)
    }

    /// Same as `get`, but returns 0 if the field does not exist.
    pub fn get_if_exists<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<u64, VmxError> {
        if self.exists(vmcs.caps()) {
            self.get(vmcs)
        } else {
            log::debug!("get_if_exists: {} doesn't exist", self.name);
            Ok(0)
        }
    }

    pub fn set<B: VmcsBackend>(
        &self,
        vmcs: &mut Vmcs<B>,
        value: impl Into<u64>,
    ) -> Result<(), VmxError> {
        vmcs.write(self, value.into())
    }

    /// Same as `set`, but does nothing if the field does not exist.
    pub fn set_if_exists<B: VmcsBackend>(
        &self,
        vmcs: &mut Vmcs<B>,
        value: impl Into<u64>,
    ) -> Result<(), VmxError> {
        if self.exists(vmcs.caps()) {
            self.set(vmcs, value)
        } else {
            log::debug!("set_if_exists: {} doesn't exist", self.name);
            Ok(())
        }
    }
}

// ——————————————————————————————— Sub-fields ——————————————————————————————— //

/// A range of bits within a field.
#[derive(Clone, Copy, Debug)]
pub struct Bits {
    field: Field,
    name: &'static str,
    mask: u64,
    offset: u32,
}

impl Bits {
    pub const fn new(field: Field, name: &'static str, mask: u64) -> Self {
        Self {
            field,
            name,
            mask,
            offset: mask.trailing_zeros(),
        }
    }

    pub const fn field(&self) -> &Field {
        &self.field
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn mask(&self) -> u64 {
        self.mask
    }

    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Extracts this sub-field from a raw field value.
    pub const fn decode(&self, raw: u64) -> u64 {
        (raw & self.mask) >> self.offset
    }

    /// Replaces this sub-field in a raw field value.
    pub const fn encode(&self, raw: u64, value: u64) -> u64 {
        (raw & !self.mask) | ((value << self.offset) & self.mask)
    }

    pub fn exists(&self, caps: &Capabilities) -> bool {
        self.field.exists(caps)
    }

    pub fn get<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<u64, VmxError> {
        Ok(self.decode(self.field.get(vmcs)?))
    }

    pub fn get_if_exists<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<u64, VmxError> {
        Ok(self.decode(self.field.get_if_exists(vmcs)?))
    }

    pub fn set<B: VmcsBackend>(
        &self,
        vmcs: &mut Vmcs<B>,
        value: impl Into<u64>,
    ) -> Result<(), VmxError> {
        let raw = self.field.get(vmcs)?;
        self.field.set(vmcs, self.encode(raw, value.into()))
    }

    pub fn set_if_exists<B: VmcsBackend>(
        &self,
        vmcs: &mut Vmcs<B>,
        value: impl Into<u64>,
    ) -> Result<(), VmxError> {
        if self.exists(vmcs.caps()) {
            self.set(vmcs, value)
        } else {
            log::debug!("set_if_exists: {}::{} doesn't exist", self.field.name, self.name);
            Ok(())
        }
    }
}

/// A single bit within a field.
#[derive(Clone, Copy, Debug)]
pub struct Flag(Bits);

impl Flag {
    pub const fn bits(&self) -> &Bits {
        &self.0
    }

    pub const fn name(&self) -> &'static str {
        self.0.name
    }

    pub const fn mask(&self) -> u64 {
        self.0.mask
    }

    pub fn exists(&self, caps: &Capabilities) -> bool {
        self.0.exists(caps)
    }

    /// Returns true if the flag is set in a raw field value.
    pub const fn is_set_in(&self, raw: u64) -> bool {
        raw & self.0.mask != 0
    }

    pub fn is_enabled<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        Ok(self.0.get(vmcs)? != 0)
    }

    pub fn is_enabled_if_exists<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        Ok(self.0.get_if_exists(vmcs)? != 0)
    }

    pub fn is_disabled<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        Ok(self.0.get(vmcs)? == 0)
    }

    /// Returns true if the flag is cleared, or if the field does not exist.
    pub fn is_disabled_if_exists<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        Ok(self.0.get_if_exists(vmcs)? == 0)
    }

    pub fn enable<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        self.0.set(vmcs, 1u64)
    }

    pub fn enable_if_exists<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        self.0.set_if_exists(vmcs, 1u64)
    }

    pub fn disable<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        self.0.set(vmcs, 0u64)
    }

    pub fn disable_if_exists<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        self.0.set_if_exists(vmcs, 0u64)
    }

    /// Sets the flag to `enabled`.
    pub fn set<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>, enabled: bool) -> Result<(), VmxError> {
        self.0.set(vmcs, enabled as u64)
    }
}

// ———————————————————————————————— Controls ———————————————————————————————— //

/// A bit of one of the VM-execution, VM-exit or VM-entry control fields.
///
/// In addition to the [`Flag`] accessors, a control knows which settings are allowed by the
/// processor and refuses to write disallowed ones.
#[derive(Clone, Copy, Debug)]
pub struct Control {
    flag: Flag,
    bit: u8,
    ctls: Ctls,
}

impl Control {
    pub const fn flag(&self) -> &Flag {
        &self.flag
    }

    pub const fn name(&self) -> &'static str {
        self.flag.name()
    }

    pub const fn bit(&self) -> u8 {
        self.bit
    }

    pub const fn ctls(&self) -> Ctls {
        self.ctls
    }

    pub const fn mask(&self) -> u64 {
        self.flag.mask()
    }

    pub fn exists(&self, caps: &Capabilities) -> bool {
        self.flag.exists(caps)
    }

    /// Returns true if the control may be 0.
    pub fn is_allowed0(&self, caps: &Capabilities) -> bool {
        caps.is_allowed0(self.ctls, self.bit)
    }

    /// Returns true if the control may be 1.
    pub fn is_allowed1(&self, caps: &Capabilities) -> bool {
        caps.is_allowed1(self.ctls, self.bit)
    }

    pub fn is_enabled<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        self.flag.is_enabled(vmcs)
    }

    pub fn is_enabled_if_exists<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        self.flag.is_enabled_if_exists(vmcs)
    }

    pub fn is_disabled<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        self.flag.is_disabled(vmcs)
    }

    pub fn is_disabled_if_exists<B: VmcsBackend>(&self, vmcs: &Vmcs<B>) -> Result<bool, VmxError> {
        self.flag.is_disabled_if_exists(vmcs)
    }

    /// Sets the control to 1, fails if the processor does not allow it.
    pub fn enable<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        if !self.is_allowed1(vmcs.caps()) {
            return Err(VmxError::Disallowed1(self.name(), self.bit));
        }
        self.flag.enable(vmcs)
    }

    /// Sets the control to 0, fails if the processor does not allow it.
    pub fn disable<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        if !self.is_allowed0(vmcs.caps()) {
            return Err(VmxError::Disallowed0(self.name(), self.bit));
        }
        self.flag.disable(vmcs)
    }

    /// Sets the control to 1 if the processor allows it and the field exists.
    pub fn enable_if_allowed<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        if self.is_allowed1(vmcs.caps()) {
            self.flag.enable_if_exists(vmcs)
        } else {
            log::debug!("enable_if_allowed: {} is not allowed to be 1", self.name());
            Ok(())
        }
    }

    /// Sets the control to 0 if the processor allows it and the field exists.
    pub fn disable_if_allowed<B: VmcsBackend>(&self, vmcs: &mut Vmcs<B>) -> Result<(), VmxError> {
        if self.is_allowed0(vmcs.caps()) {
            self.flag.disable_if_exists(vmcs)
        } else {
            log::debug!("disable_if_allowed: {} is not allowed to be 0", self.name());
            Ok(())
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmaps::{PrimaryControls, SecondaryControls};
    use crate::fake::{self, FakeVmcs};
    use crate::fields::{control, guest};

    fn vmcs() -> Vmcs<FakeVmcs> {
        Vmcs::new(FakeVmcs::new(), fake::capabilities())
    }

    #[rustfmt::skip]
    #[test]
    fn encodings() {
        assert_eq!(guest::es::SELECTOR.width(), FieldWidth::Width16);
        assert_eq!(guest::vmcs_link_pointer::FIELD.width(), FieldWidth::Width64);
        assert_eq!(guest::activity_state::FIELD.width(), FieldWidth::Width32);
        assert_eq!(guest::cr0::FIELD.width(), FieldWidth::Natural);
        assert_eq!(guest::cr0::FIELD.field_type(), FieldType::GuestState);
        assert_eq!(control::pin_based::FIELD.field_type(), FieldType::Control);
        assert!(crate::fields::exit::exit_reason::FIELD.is_read_only());
        assert!(!guest::rip::FIELD.is_read_only());
    }

    #[test]
    fn sub_field_offsets() {
        assert_eq!(guest::cs::ACCESS_RIGHTS.dpl.offset(), 5);
        assert_eq!(guest::cs::ACCESS_RIGHTS.dpl.mask(), 0x60);
        assert_eq!(guest::ia32_pat::PA3.memory_type.offset(), 24);
        assert_eq!(guest::ia32_pat::PA3.memory_type.mask(), 0x7 << 24);
        assert_eq!(guest::ia32_efer::LMA.mask(), 1 << 10);
    }

    #[test]
    fn round_trip() {
        let mut vmcs = vmcs();
        guest::cr0::FIELD.set(&mut vmcs, 0x8000_0031u64).unwrap();
        assert_eq!(guest::cr0::FIELD.get(&vmcs), Ok(0x8000_0031));

        guest::es::SELECTOR.set(&mut vmcs, 0xFFFFu16).unwrap();
        assert_eq!(guest::es::SELECTOR.get(&vmcs), Ok(0xFFFF));

        guest::vmcs_link_pointer::FIELD.set(&mut vmcs, u64::MAX).unwrap();
        assert_eq!(guest::vmcs_link_pointer::FIELD.get(&vmcs), Ok(u64::MAX));

        guest::activity_state::FIELD.set(&mut vmcs, 3u32).unwrap();
        assert_eq!(guest::activity_state::FIELD.get(&vmcs), Ok(3));
    }

    #[test]
    fn sub_field_isolation() {
        let mut vmcs = vmcs();
        let ar = guest::cs::ACCESS_RIGHTS;
        ar.field.set(&mut vmcs, 0u32).unwrap();

        ar.type_.set(&mut vmcs, 11u8).unwrap();
        ar.dpl.set(&mut vmcs, 3u8).unwrap();
        ar.present.enable(&mut vmcs).unwrap();
        ar.l.enable(&mut vmcs).unwrap();
        assert_eq!(ar.field.get(&vmcs), Ok(0x20EB));

        ar.dpl.set(&mut vmcs, 0u8).unwrap();
        assert_eq!(ar.type_.get(&vmcs), Ok(11));
        assert_eq!(ar.present.is_enabled(&vmcs), Ok(true));
        assert_eq!(ar.l.is_enabled(&vmcs), Ok(true));
        assert_eq!(ar.field.get(&vmcs), Ok(0x208B));

        // Values wider than the sub-field are truncated to its mask.
        ar.type_.set(&mut vmcs, 0x1Fu8).unwrap();
        assert_eq!(ar.type_.get(&vmcs), Ok(0xF));
        assert_eq!(ar.s.is_enabled(&vmcs), Ok(false));
    }

    #[test]
    fn existence_gating() {
        let caps = fake::capabilities().without_allowed1(SecondaryControls::ENABLE_VPID);
        let mut vmcs = Vmcs::new(FakeVmcs::new(), caps);
        let vpid = control::vpid::FIELD;

        assert!(!vpid.exists(vmcs.caps()));
        assert_eq!(vpid.get(&vmcs), Err(VmxError::UnsupportedField("vpid")));
        assert_eq!(
            vpid.set(&mut vmcs, 1u16),
            Err(VmxError::UnsupportedField("vpid"))
        );

        vmcs.backend_mut().poke(vpid.encoding(), 0x42);
        assert_eq!(vpid.get_if_exists(&vmcs), Ok(0));
        assert_eq!(vpid.set_if_exists(&mut vmcs, 7u16), Ok(()));
        assert_eq!(vmcs.backend().peek(vpid.encoding()), Some(0x42));

        // The whole secondary controls field disappears with the primary bit.
        let caps = fake::capabilities().without_allowed1(PrimaryControls::SECONDARY_CONTROLS);
        let vmcs = Vmcs::new(FakeVmcs::new(), caps);
        let ept = control::secondary::ENABLE_EPT;
        assert!(!ept.exists(vmcs.caps()));
        assert_eq!(ept.is_enabled_if_exists(&vmcs), Ok(false));
        assert_eq!(ept.is_disabled_if_exists(&vmcs), Ok(true));
    }

    #[test]
    fn controls() {
        let caps = fake::capabilities()
            .without_allowed1(SecondaryControls::ENABLE_PML)
            .with_required(PrimaryControls::USE_MSR_BITMAPS);
        let mut vmcs = Vmcs::new(FakeVmcs::new(), caps);
        control::secondary::FIELD.set(&mut vmcs, 0u32).unwrap();
        control::primary::FIELD.set(&mut vmcs, 0u32).unwrap();

        let pml = control::secondary::ENABLE_PML;
        assert!(!pml.is_allowed1(vmcs.caps()));
        assert_eq!(pml.enable(&mut vmcs), Err(VmxError::Disallowed1("enable_pml", 17)));
        assert_eq!(pml.enable_if_allowed(&mut vmcs), Ok(()));
        assert_eq!(pml.is_enabled(&vmcs), Ok(false));

        let msr_bitmaps = control::primary::USE_MSR_BITMAPS;
        msr_bitmaps.enable(&mut vmcs).unwrap();
        assert_eq!(
            msr_bitmaps.disable(&mut vmcs),
            Err(VmxError::Disallowed0("use_msr_bitmap", 28))
        );
        assert_eq!(msr_bitmaps.disable_if_allowed(&mut vmcs), Ok(()));
        assert_eq!(msr_bitmaps.is_enabled(&vmcs), Ok(true));

        let ept = control::secondary::ENABLE_EPT;
        ept.enable(&mut vmcs).unwrap();
        assert_eq!(control::secondary::FIELD.get(&vmcs), Ok(0b10));
        ept.disable(&mut vmcs).unwrap();
        assert_eq!(control::secondary::FIELD.get(&vmcs), Ok(0));
    }

    #[test]
    fn read_only_fields() {
        let mut vmcs = vmcs();
        let reason = crate::fields::exit::exit_reason::FIELD;
        assert_eq!(
            reason.set(&mut vmcs, 1u32),
            Err(VmxError::VmFailValid(
                crate::errors::VmxInstructionError::VmWriteToReadOnly
            ))
        );
        vmcs.backend_mut().poke(reason.encoding(), 0x8000_0021);
        assert_eq!(crate::fields::exit::exit_reason::BASIC_EXIT_REASON.get(&vmcs), Ok(0x21));
        assert_eq!(crate::fields::exit::exit_reason::VM_ENTRY_FAILURE.is_enabled(&vmcs), Ok(true));
    }
}
