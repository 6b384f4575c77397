#![cfg_attr(not(test), no_std)]

mod address;

pub use address::{
    is_address_canonical, is_linear_address_valid, is_physical_address_valid, GuestPhysAddr,
    GuestVirtAddr, HostPhysAddr, HostVirtAddr,
};

// ——————————————————————————— Frame Abstraction ———————————————————————————— //

/// Size of a frame, and of the VMXON and VMCS regions carved out of it.
pub const FRAME_SIZE: usize = 0x1000;

/// Representation of a physical frame.
#[derive(Clone, Copy)]
pub struct Frame {
    /// The physical address of the frame.
    pub phys_addr: HostPhysAddr,

    /// The virtual adddress of the frame using the current mapping.
    ///
    /// WARNING: the mapping must stay stable for the whole duration of VMX operations.
    pub virt_addr: HostVirtAddr,
}

impl Frame {
    /// Creates a new Frames from a physical address and its corresponding virtual address.
    ///
    /// # Safety:
    /// The virtual address must be mapped to the physical address, and the mapping must remain
    /// valid for ever.
    pub unsafe fn new(phys_addr: HostPhysAddr, virt_addr: HostVirtAddr) -> Self {
        Self {
            phys_addr,
            virt_addr,
        }
    }

    /// Returns a mutable view of the frame.
    pub fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: we assume that the frame address is a valid virtual address exclusively owned by
        // the Frame struct.
        unsafe { core::slice::from_raw_parts_mut(self.virt_addr.as_usize() as *mut u8, FRAME_SIZE) }
    }

    pub fn as_ref(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.virt_addr.as_usize() as *const u8, FRAME_SIZE) }
    }

    /// Zeroes out the frame.
    pub fn zero_out(&mut self) {
        self.as_mut().fill(0);
    }

    /// Zeroes the frame, then stamps the 31-bit VMCS revision identifier in its first dword.
    ///
    /// This is the layout expected by VMXON and VMPTRLD, bit 31 (shadow-VMCS indicator) is left
    /// cleared.
    pub fn stamp_revision(&mut self, revision: u32) {
        self.zero_out();
        let revision = revision & 0x7FFF_FFFF;
        self.as_mut()[0..4].copy_from_slice(&revision.to_le_bytes());
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stamp_revision() {
        let mut buffer = vec![0xFFu8; FRAME_SIZE];
        let virt_addr = HostVirtAddr::new(buffer.as_mut_ptr() as usize);
        let mut frame = unsafe { Frame::new(HostPhysAddr::new(0x5000), virt_addr) };

        frame.stamp_revision(0x8000_0012);
        assert_eq!(&frame.as_ref()[0..4], &[0x12, 0x00, 0x00, 0x00]);
        assert!(frame.as_ref()[4..].iter().all(|&b| b == 0));
    }
}
