//! Ferrovisor VT - guest register virtualization for Intel VT-x
//!
//! This library presents a mode-independent view of a virtual CPU's
//! general, control, segment and descriptor-table registers on top of
//! the VMCS, emulating real-address mode with virtual-8086 mode and a
//! software segment shadow.

#![cfg_attr(not(test), no_std)]

// Configuration
pub mod config;

// Architecture-specific code
pub mod arch;

pub use arch::x86_64::vmx::{
    capture_host_regs, ControlReg, DescTable, GeneralReg, PagingState, RegsInVmcs, SegMask,
    SegReg, SegmentDesc, SregWrite, VcpuPlatform, VmcsAccess, VmcsField, VtVcpu,
};
pub use arch::x86_64::{HostCpu, HostSegment};
pub use config::VtConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common error type for the register layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument (a raw index that names no register)
    InvalidArgument,
    /// Invalid configuration
    InvalidConfig,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::InvalidConfig => f.write_str("invalid configuration"),
        }
    }
}

/// Result type alias
pub type Result<T> = core::result::Result<T, Error>;
