//! Register selectors and register value types
//!
//! Typed selectors for general, control and segment registers, plus the
//! descriptor records shared by segment access and snapshot capture.

use super::vmcs::VmcsField;
use crate::{Error, Result};
use bitflags::bitflags;

/// General-purpose registers, in ModR/M encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GeneralReg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl TryFrom<u8> for GeneralReg {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Ok(match index {
            0 => Self::Rax,
            1 => Self::Rcx,
            2 => Self::Rdx,
            3 => Self::Rbx,
            4 => Self::Rsp,
            5 => Self::Rbp,
            6 => Self::Rsi,
            7 => Self::Rdi,
            8 => Self::R8,
            9 => Self::R9,
            10 => Self::R10,
            11 => Self::R11,
            12 => Self::R12,
            13 => Self::R13,
            14 => Self::R14,
            15 => Self::R15,
            _ => return Err(Error::InvalidArgument),
        })
    }
}

/// Control registers handled by the register layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlReg {
    Cr0 = 0,
    Cr2 = 2,
    Cr3 = 3,
    Cr4 = 4,
}

impl TryFrom<u8> for ControlReg {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        match index {
            0 => Ok(Self::Cr0),
            2 => Ok(Self::Cr2),
            3 => Ok(Self::Cr3),
            4 => Ok(Self::Cr4),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Data and code segment registers (LDTR and TR are handled separately)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

bitflags! {
    /// Set of segment registers whose selector is emulated in software
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegMask: u8 {
        const ES = 1 << 0;
        const CS = 1 << 1;
        const SS = 1 << 2;
        const DS = 1 << 3;
        const FS = 1 << 4;
        const GS = 1 << 5;
    }
}

/// VMCS fields describing one segment register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegFields {
    pub selector: VmcsField,
    pub base: VmcsField,
    pub limit: VmcsField,
    pub access_rights: VmcsField,
}

/// LDTR fields
pub const LDTR_FIELDS: SegFields = SegFields {
    selector: VmcsField::GuestLdtrSelector,
    base: VmcsField::GuestLdtrBase,
    limit: VmcsField::GuestLdtrLimit,
    access_rights: VmcsField::GuestLdtrAccessRights,
};

/// TR fields
pub const TR_FIELDS: SegFields = SegFields {
    selector: VmcsField::GuestTrSelector,
    base: VmcsField::GuestTrBase,
    limit: VmcsField::GuestTrLimit,
    access_rights: VmcsField::GuestTrAccessRights,
};

impl SegReg {
    /// All six segment registers in encoding order
    pub const ALL: [SegReg; 6] = [
        SegReg::Es,
        SegReg::Cs,
        SegReg::Ss,
        SegReg::Ds,
        SegReg::Fs,
        SegReg::Gs,
    ];

    /// Index into per-segment arrays
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Emulation mask bit of this segment
    pub const fn mask(self) -> SegMask {
        match self {
            SegReg::Es => SegMask::ES,
            SegReg::Cs => SegMask::CS,
            SegReg::Ss => SegMask::SS,
            SegReg::Ds => SegMask::DS,
            SegReg::Fs => SegMask::FS,
            SegReg::Gs => SegMask::GS,
        }
    }

    /// VMCS fields of this segment
    pub const fn fields(self) -> SegFields {
        match self {
            SegReg::Es => SegFields {
                selector: VmcsField::GuestEsSelector,
                base: VmcsField::GuestEsBase,
                limit: VmcsField::GuestEsLimit,
                access_rights: VmcsField::GuestEsAccessRights,
            },
            SegReg::Cs => SegFields {
                selector: VmcsField::GuestCsSelector,
                base: VmcsField::GuestCsBase,
                limit: VmcsField::GuestCsLimit,
                access_rights: VmcsField::GuestCsAccessRights,
            },
            SegReg::Ss => SegFields {
                selector: VmcsField::GuestSsSelector,
                base: VmcsField::GuestSsBase,
                limit: VmcsField::GuestSsLimit,
                access_rights: VmcsField::GuestSsAccessRights,
            },
            SegReg::Ds => SegFields {
                selector: VmcsField::GuestDsSelector,
                base: VmcsField::GuestDsBase,
                limit: VmcsField::GuestDsLimit,
                access_rights: VmcsField::GuestDsAccessRights,
            },
            SegReg::Fs => SegFields {
                selector: VmcsField::GuestFsSelector,
                base: VmcsField::GuestFsBase,
                limit: VmcsField::GuestFsLimit,
                access_rights: VmcsField::GuestFsAccessRights,
            },
            SegReg::Gs => SegFields {
                selector: VmcsField::GuestGsSelector,
                base: VmcsField::GuestGsBase,
                limit: VmcsField::GuestGsLimit,
                access_rights: VmcsField::GuestGsAccessRights,
            },
        }
    }
}

impl TryFrom<u8> for SegReg {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        SegReg::ALL
            .get(usize::from(index))
            .copied()
            .ok_or(Error::InvalidArgument)
    }
}

/// Descriptor-table register (GDTR/IDTR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescTable {
    pub base: u64,
    pub limit: u32,
}

impl DescTable {
    pub const fn new(base: u64, limit: u32) -> Self {
        Self { base, limit }
    }
}

/// One segment register as the VMCS describes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentDesc {
    pub selector: u16,
    pub base: u64,
    pub limit: u32,
    /// Access rights in VMCS format (bit 16 = unusable)
    pub access_rights: u32,
}
