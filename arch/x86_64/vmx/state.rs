//! Per-vCPU register context
//!
//! Registers the VMCS does not hold directly, mode flags, and the
//! software segment shadow used while real mode is emulated.

use super::regs::{DescTable, SegMask, SegReg};

/// Software segment shadow
///
/// For every segment in `enable`, the guest's real selector lives in
/// `sel` and the VMCS selector field is unused or holds a synthetic
/// virtual-8086 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwSegments {
    sel: [u16; 6],
    /// Segments whose selector is emulated in software
    pub enable: SegMask,
    /// Instructions emulated since emulation was last (re-)enabled
    pub num: u32,
}

impl Default for SwSegments {
    fn default() -> Self {
        Self {
            sel: [0; 6],
            enable: SegMask::empty(),
            num: 0,
        }
    }
}

impl SwSegments {
    /// Shadow selector of `seg`
    pub fn selector(&self, seg: SegReg) -> u16 {
        self.sel[seg.index()]
    }

    /// Replace the shadow selector of `seg`
    pub fn set_selector(&mut self, seg: SegReg, value: u16) {
        self.sel[seg.index()] = value;
    }

    /// Whether `seg` is currently emulated
    pub fn is_emulated(&self, seg: SegReg) -> bool {
        self.enable.contains(seg.mask())
    }
}

/// Registers cached across VM entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmentryRegs {
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub cr2: u64,
    /// Guest-visible CR3; the VMCS holds the shadow page table root
    pub cr3: u64,
    /// Mirror of CR0.PE as last written by the guest
    pub pe: bool,
    /// Mirror of CR0.PG as last written by the guest, never set without `pe`
    pub pg: bool,
    pub sw: SwSegments,
}

/// Hardware state parked while the guest runs in emulated real mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealmodeData {
    pub tr_limit: u64,
    pub tr_acr: u64,
    pub tr_base: u64,
    /// Guest IDTR; the VMCS IDTR is not usable for virtual-8086 delivery
    pub idtr: DescTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vmentry_regs_default() {
        let vr = VmentryRegs::default();
        assert!(!vr.pe);
        assert!(!vr.pg);
        assert!(vr.sw.enable.is_empty());
        assert_eq!(vr.sw.num, 0);
    }

    #[test]
    fn test_sw_segments_selector() {
        let mut sw = SwSegments::default();
        sw.set_selector(SegReg::Ds, 0x1234);
        assert_eq!(sw.selector(SegReg::Ds), 0x1234);
        assert_eq!(sw.selector(SegReg::Es), 0);

        assert!(!sw.is_emulated(SegReg::Ds));
        sw.enable |= SegMask::DS;
        assert!(sw.is_emulated(SegReg::Ds));
        assert!(!sw.is_emulated(SegReg::Cs));
    }
}
