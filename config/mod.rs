//! Configuration management
//!
//! Per-hypervisor settings consumed by the VT register layer.

use crate::{Error, Result};

/// Page size used for alignment checks
const PAGE_SIZE: u64 = 4096;

/// VT register layer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtConfig {
    /// Physical address of the hypervisor's built-in entry structure.
    ///
    /// Installed as the TR base while the guest runs in emulated real mode.
    pub realmode_tr_base: u64,
    /// Shadow page tables use PAE, so CR4.PAE is forced on every CR4 write
    pub spt_use_pae: bool,
}

impl Default for VtConfig {
    fn default() -> Self {
        Self {
            realmode_tr_base: 0,
            spt_use_pae: cfg!(feature = "spt-pae"),
        }
    }
}

impl VtConfig {
    /// Create a configuration with the given real-mode TR base
    pub fn new(realmode_tr_base: u64) -> Self {
        Self {
            realmode_tr_base,
            ..Self::default()
        }
    }

    /// Enable or disable CR4.PAE forcing
    pub fn with_spt_pae(mut self, enabled: bool) -> Self {
        self.spt_use_pae = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.realmode_tr_base % PAGE_SIZE != 0 {
            return Err(Error::InvalidConfig);
        }

        Ok(())
    }
}
