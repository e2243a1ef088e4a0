//! Collaborators of the register layer
//!
//! The shadow page table subsystem, the long-mode MSR updater and the
//! VMX capability MSRs are owned by the rest of the hypervisor and are
//! reached through `VcpuPlatform`.

/// Paging-relevant guest state handed to notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PagingState {
    /// CR0 as the guest sees it (read shadow)
    pub cr0: u64,
    /// CR3 as the guest sees it
    pub cr3: u64,
    /// CR4 as the guest sees it (read shadow)
    pub cr4: u64,
    pub pe: bool,
    pub pg: bool,
}

/// Services the register layer calls out to
pub trait VcpuPlatform {
    /// Read a model-specific register (used for the VMX fixed-bit MSRs)
    fn rdmsr(&self, msr: u32) -> u64;

    /// Shadow page tables: recompute the active mapping.
    ///
    /// Called after CR3 writes, CR0.PG changes and CR4 writes.
    fn spt_update_cr3(&mut self, paging: &PagingState);

    /// Recompute long-mode-active state from CR0 and EFER.
    ///
    /// Called after every CR0 write.
    fn msr_update_lma(&mut self, paging: &PagingState);
}
