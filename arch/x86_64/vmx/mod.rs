//! VT-x guest register virtualization
//!
//! Gives the rest of the hypervisor a mode-independent view of a guest's
//! registers on top of the VMCS: control register writes with VMX fixed
//! bits, segment and descriptor-table access, real-mode emulation via
//! virtual-8086 mode, and register snapshots.

pub mod mode;
pub mod platform;
pub mod regs;
pub mod segment;
pub mod snapshot;
pub mod state;
pub mod vcpu;
pub mod vmcs;

#[cfg(test)]
pub(crate) mod testutil;

pub use platform::{PagingState, VcpuPlatform};
pub use regs::{
    ControlReg, DescTable, GeneralReg, SegFields, SegMask, SegReg, SegmentDesc, LDTR_FIELDS,
    TR_FIELDS,
};
pub use segment::{SregWrite, ACCESS_RIGHTS_UNUSABLE};
pub use snapshot::{capture_host_regs, RegsInVmcs};
pub use state::{RealmodeData, SwSegments, VmentryRegs};
pub use vcpu::VtVcpu;
pub use vmcs::{msr, VmcsAccess, VmcsField};

#[cfg(target_arch = "x86_64")]
pub use vmcs::ActiveVmcs;
