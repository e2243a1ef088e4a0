//! VMCS field encodings and accessor
//!
//! Only the guest-state and control fields the register layer touches
//! are listed.
//! Reference: Intel SDM Vol. 3, Appendix B - Field Encoding in VMCS

/// VMCS field identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum VmcsField {
    // 16-bit guest state fields
    GuestEsSelector = 0x0800,
    GuestCsSelector = 0x0802,
    GuestSsSelector = 0x0804,
    GuestDsSelector = 0x0806,
    GuestFsSelector = 0x0808,
    GuestGsSelector = 0x080A,
    GuestLdtrSelector = 0x080C,
    GuestTrSelector = 0x080E,

    // 32-bit guest state fields
    GuestEsLimit = 0x4800,
    GuestCsLimit = 0x4802,
    GuestSsLimit = 0x4804,
    GuestDsLimit = 0x4806,
    GuestFsLimit = 0x4808,
    GuestGsLimit = 0x480A,
    GuestLdtrLimit = 0x480C,
    GuestTrLimit = 0x480E,
    GuestGdtrLimit = 0x4810,
    GuestIdtrLimit = 0x4812,
    GuestEsAccessRights = 0x4814,
    GuestCsAccessRights = 0x4816,
    GuestSsAccessRights = 0x4818,
    GuestDsAccessRights = 0x481A,
    GuestFsAccessRights = 0x481C,
    GuestGsAccessRights = 0x481E,
    GuestLdtrAccessRights = 0x4820,
    GuestTrAccessRights = 0x4822,

    // Natural-width control fields
    Cr0ReadShadow = 0x6004,
    Cr4ReadShadow = 0x6006,

    // Natural-width guest state fields
    GuestCr0 = 0x6800,
    GuestCr3 = 0x6802,
    GuestCr4 = 0x6804,
    GuestEsBase = 0x6806,
    GuestCsBase = 0x6808,
    GuestSsBase = 0x680A,
    GuestDsBase = 0x680C,
    GuestFsBase = 0x680E,
    GuestGsBase = 0x6810,
    GuestLdtrBase = 0x6812,
    GuestTrBase = 0x6814,
    GuestGdtrBase = 0x6816,
    GuestIdtrBase = 0x6818,
    GuestDr7 = 0x681A,
    GuestRsp = 0x681C,
    GuestRip = 0x681E,
    GuestRflags = 0x6820,
}

impl VmcsField {
    /// Raw field encoding as used by VMREAD/VMWRITE
    pub const fn encoding(self) -> u32 {
        self as u32
    }
}

/// VMX capability MSRs read on control register writes
pub mod msr {
    /// Bits that must be 1 in CR0 during VMX operation
    pub const IA32_VMX_CR0_FIXED0: u32 = 0x486;
    /// Bits that may be 1 in CR0 during VMX operation
    pub const IA32_VMX_CR0_FIXED1: u32 = 0x487;
    /// Bits that must be 1 in CR4 during VMX operation
    pub const IA32_VMX_CR4_FIXED0: u32 = 0x488;
    /// Bits that may be 1 in CR4 during VMX operation
    pub const IA32_VMX_CR4_FIXED1: u32 = 0x489;
}

/// Access to the fields of the VMCS backing a virtual CPU.
///
/// Reads and writes are synchronous and cannot fail at this layer; a
/// VMREAD/VMWRITE failure is a hypervisor bug reported by the
/// implementation itself.
pub trait VmcsAccess {
    /// Read a field
    fn vmread(&self, field: VmcsField) -> u64;

    /// Write a field
    fn vmwrite(&mut self, field: VmcsField, value: u64);
}

/// The VMCS currently loaded on this logical processor (VMPTRLD).
///
/// Every access executes VMREAD/VMWRITE, so the value must only be used
/// in VMX root operation with the vCPU's VMCS current.
#[cfg(target_arch = "x86_64")]
#[derive(Debug)]
pub struct ActiveVmcs {
    _private: (),
}

#[cfg(target_arch = "x86_64")]
impl ActiveVmcs {
    /// Bind to the current VMCS
    ///
    /// # Safety
    /// The caller must be in VMX root operation with a valid current VMCS
    /// for as long as the returned value is used.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_arch = "x86_64")]
impl VmcsAccess for ActiveVmcs {
    fn vmread(&self, field: VmcsField) -> u64 {
        let value: u64;
        // SAFETY: `ActiveVmcs::new` requires VMX root operation with a current VMCS.
        unsafe {
            core::arch::asm!(
                "vmread {0}, {1}",
                out(reg) value,
                in(reg) u64::from(field.encoding()),
                options(nostack)
            );
        }
        value
    }

    fn vmwrite(&mut self, field: VmcsField, value: u64) {
        // SAFETY: `ActiveVmcs::new` requires VMX root operation with a current VMCS.
        unsafe {
            core::arch::asm!(
                "vmwrite {0}, {1}",
                in(reg) u64::from(field.encoding()),
                in(reg) value,
                options(nostack)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_encodings() {
        assert_eq!(VmcsField::GuestEsSelector.encoding(), 0x0800);
        assert_eq!(VmcsField::GuestTrAccessRights.encoding(), 0x4822);
        assert_eq!(VmcsField::Cr0ReadShadow.encoding(), 0x6004);
        assert_eq!(VmcsField::GuestRflags.encoding(), 0x6820);
    }

    #[test]
    fn test_fixed_msr_numbers() {
        assert_eq!(msr::IA32_VMX_CR0_FIXED0 + 1, msr::IA32_VMX_CR0_FIXED1);
        assert_eq!(msr::IA32_VMX_CR4_FIXED0 + 1, msr::IA32_VMX_CR4_FIXED1);
    }
}
