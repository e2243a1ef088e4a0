//! Segment register and descriptor-table register access
//!
//! Only selectors are ever shadowed in software; base, limit and access
//! rights always live in the VMCS. GDTR is mode independent, IDTR is
//! parked in the real-mode shadow block while real mode is emulated.

use super::regs::{DescTable, SegReg};
use super::vcpu::VtVcpu;
use super::vmcs::{VmcsAccess, VmcsField};

/// VMCS access-rights bit marking a segment unusable
pub const ACCESS_RIGHTS_UNUSABLE: u32 = 1 << 16;

/// Outcome of `VtVcpu::writing_sreg`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SregWrite {
    /// The segment left software emulation; the caller completes the
    /// write against the VMCS
    Emulated,
    /// No segment was named; nothing to do
    NotApplicable,
}

impl<V: VmcsAccess, P> VtVcpu<V, P> {
    /// Selector of `seg` as the guest sees it
    pub fn read_sreg_sel(&self, seg: SegReg) -> u16 {
        if self.vr.sw.is_emulated(seg) {
            self.vr.sw.selector(seg)
        } else {
            self.vmcs.vmread(seg.fields().selector) as u16
        }
    }

    pub fn read_sreg_acr(&self, seg: SegReg) -> u32 {
        self.vmcs.vmread(seg.fields().access_rights) as u32
    }

    pub fn read_sreg_base(&self, seg: SegReg) -> u64 {
        self.vmcs.vmread(seg.fields().base)
    }

    pub fn read_sreg_limit(&self, seg: SegReg) -> u32 {
        self.vmcs.vmread(seg.fields().limit) as u32
    }

    /// Load `seg` the real-mode way: base = selector * 16.
    ///
    /// Limit and access rights are left to the caller.
    pub fn write_realmode_seg(&mut self, seg: SegReg, sel: u16) {
        log::trace!("real-mode load {:?} = {:#06x}", seg, sel);

        let fields = seg.fields();
        self.vmcs.vmwrite(fields.selector, u64::from(sel));
        self.vmcs.vmwrite(fields.base, u64::from(sel) << 4);
    }

    /// The instruction emulator is about to load `seg`; from now on the
    /// VMCS selector is authoritative again. `None` is the "no segment"
    /// sentinel.
    pub fn writing_sreg(&mut self, seg: Option<SegReg>) -> SregWrite {
        match seg {
            Some(seg) => {
                self.vr.sw.enable.remove(seg.mask());
                SregWrite::Emulated
            }
            None => SregWrite::NotApplicable,
        }
    }

    pub fn read_gdtr(&self) -> DescTable {
        DescTable {
            base: self.vmcs.vmread(VmcsField::GuestGdtrBase),
            limit: self.vmcs.vmread(VmcsField::GuestGdtrLimit) as u32,
        }
    }

    pub fn write_gdtr(&mut self, gdtr: DescTable) {
        self.vmcs.vmwrite(VmcsField::GuestGdtrBase, gdtr.base);
        self.vmcs.vmwrite(VmcsField::GuestGdtrLimit, u64::from(gdtr.limit));
    }

    /// Guest IDTR. Where it is stored depends on `pe`.
    pub fn read_idtr(&self) -> DescTable {
        if self.vr.pe {
            DescTable {
                base: self.vmcs.vmread(VmcsField::GuestIdtrBase),
                limit: self.vmcs.vmread(VmcsField::GuestIdtrLimit) as u32,
            }
        } else {
            self.realmode.idtr
        }
    }

    pub fn write_idtr(&mut self, idtr: DescTable) {
        if self.vr.pe {
            self.vmcs.vmwrite(VmcsField::GuestIdtrBase, idtr.base);
            self.vmcs.vmwrite(VmcsField::GuestIdtrLimit, u64::from(idtr.limit));
        } else {
            self.realmode.idtr = idtr;
        }
    }
}
