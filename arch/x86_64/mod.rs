//! x86_64 architecture support
//!
//! VT-x guest register virtualization and host register capture.

pub mod descriptor;
pub mod host;
pub mod vmx;

pub use host::{HostCpu, HostSegment};

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use host::NativeHost;
        pub use vmx::ActiveVmcs;
    }
}
