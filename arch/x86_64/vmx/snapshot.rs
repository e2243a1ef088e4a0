//! Register snapshots
//!
//! `RegsInVmcs` is a flat copy of the segment, control and
//! descriptor-table state, laid out like the VMCS guest-state area. It
//! can be taken from a vCPU's VMCS or from the host processor.

use super::regs::{DescTable, SegFields, SegReg, SegmentDesc, LDTR_FIELDS, TR_FIELDS};
use super::vcpu::VtVcpu;
use super::vmcs::{VmcsAccess, VmcsField};
use crate::arch::x86_64::descriptor::DescriptorLookup;
use crate::arch::x86_64::host::{HostCpu, HostSegment};

/// Point-in-time register snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegsInVmcs {
    pub es: SegmentDesc,
    pub cs: SegmentDesc,
    pub ss: SegmentDesc,
    pub ds: SegmentDesc,
    pub fs: SegmentDesc,
    pub gs: SegmentDesc,
    pub ldtr: SegmentDesc,
    pub tr: SegmentDesc,
    pub cr0: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub gdtr: DescTable,
    pub idtr: DescTable,
    pub dr7: u64,
    pub rflags: u64,
}

impl RegsInVmcs {
    /// Descriptor of a data or code segment
    pub fn segment(&self, seg: SegReg) -> &SegmentDesc {
        match seg {
            SegReg::Es => &self.es,
            SegReg::Cs => &self.cs,
            SegReg::Ss => &self.ss,
            SegReg::Ds => &self.ds,
            SegReg::Fs => &self.fs,
            SegReg::Gs => &self.gs,
        }
    }
}

fn vmcs_segment<V: VmcsAccess>(vmcs: &V, fields: SegFields) -> SegmentDesc {
    SegmentDesc {
        selector: vmcs.vmread(fields.selector) as u16,
        base: vmcs.vmread(fields.base),
        limit: vmcs.vmread(fields.limit) as u32,
        access_rights: vmcs.vmread(fields.access_rights) as u32,
    }
}

impl<V: VmcsAccess, P> VtVcpu<V, P> {
    /// Snapshot the guest state held in the VMCS.
    ///
    /// This is the hardware view: selectors under software emulation
    /// show their VMCS value, and CR0/CR4 are the values the processor
    /// runs with rather than the read shadows.
    pub fn capture_vmcs_regs(&self) -> RegsInVmcs {
        let vmcs = &self.vmcs;
        RegsInVmcs {
            es: vmcs_segment(vmcs, SegReg::Es.fields()),
            cs: vmcs_segment(vmcs, SegReg::Cs.fields()),
            ss: vmcs_segment(vmcs, SegReg::Ss.fields()),
            ds: vmcs_segment(vmcs, SegReg::Ds.fields()),
            fs: vmcs_segment(vmcs, SegReg::Fs.fields()),
            gs: vmcs_segment(vmcs, SegReg::Gs.fields()),
            ldtr: vmcs_segment(vmcs, LDTR_FIELDS),
            tr: vmcs_segment(vmcs, TR_FIELDS),
            cr0: vmcs.vmread(VmcsField::GuestCr0),
            cr3: vmcs.vmread(VmcsField::GuestCr3),
            cr4: vmcs.vmread(VmcsField::GuestCr4),
            gdtr: DescTable {
                base: vmcs.vmread(VmcsField::GuestGdtrBase),
                limit: vmcs.vmread(VmcsField::GuestGdtrLimit) as u32,
            },
            idtr: DescTable {
                base: vmcs.vmread(VmcsField::GuestIdtrBase),
                limit: vmcs.vmread(VmcsField::GuestIdtrLimit) as u32,
            },
            dr7: vmcs.vmread(VmcsField::GuestDr7),
            rflags: vmcs.vmread(VmcsField::GuestRflags),
        }
    }
}

/// Snapshot the registers of the host processor.
///
/// Bases and access rights are looked up in the live GDT/LDT since the
/// hidden parts of the segment registers cannot be read directly.
pub fn capture_host_regs<H: HostCpu + ?Sized>(host: &H) -> RegsInVmcs {
    let gdtr = host.gdtr();
    let ldtr = host.selector(HostSegment::Ldtr);
    let lookup = DescriptorLookup::new(host, gdtr, ldtr);

    let segment = |seg: HostSegment| {
        let selector = host.selector(seg);
        SegmentDesc {
            selector,
            base: lookup.base(selector),
            limit: host.segment_limit(selector),
            access_rights: lookup.access_rights(selector),
        }
    };

    RegsInVmcs {
        es: segment(HostSegment::Es),
        cs: segment(HostSegment::Cs),
        ss: segment(HostSegment::Ss),
        ds: segment(HostSegment::Ds),
        fs: segment(HostSegment::Fs),
        gs: segment(HostSegment::Gs),
        ldtr: segment(HostSegment::Ldtr),
        tr: segment(HostSegment::Tr),
        cr0: host.cr0(),
        cr3: host.cr3(),
        cr4: host.cr4(),
        gdtr,
        idtr: host.idtr(),
        dr7: host.dr7(),
        rflags: host.rflags(),
    }
}
