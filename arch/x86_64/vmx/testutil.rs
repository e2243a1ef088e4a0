//! In-memory VMCS, platform and host CPU used by the unit tests

use super::platform::{PagingState, VcpuPlatform};
use super::regs::DescTable;
use super::vcpu::VtVcpu;
use super::vmcs::{msr, VmcsAccess, VmcsField};
use crate::arch::x86_64::host::{HostCpu, HostSegment};
use crate::config::VtConfig;
use std::collections::BTreeMap;

/// Real-mode TR base used by test vCPUs
pub const TEST_TR_BASE: u64 = 0x0009_0000;

/// VMCS backed by a map; unwritten fields read as zero
#[derive(Debug, Default)]
pub struct FakeVmcs {
    fields: BTreeMap<VmcsField, u64>,
    /// Every write in program order
    pub writes: Vec<(VmcsField, u64)>,
}

impl FakeVmcs {
    /// Set a field without recording it as a write
    pub fn preset(&mut self, field: VmcsField, value: u64) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: VmcsField) -> u64 {
        self.fields.get(&field).copied().unwrap_or(0)
    }
}

impl VmcsAccess for FakeVmcs {
    fn vmread(&self, field: VmcsField) -> u64 {
        self.get(field)
    }

    fn vmwrite(&mut self, field: VmcsField, value: u64) {
        self.writes.push((field, value));
        self.fields.insert(field, value);
    }
}

/// Platform recording every notification
#[derive(Debug)]
pub struct FakePlatform {
    pub cr0_fixed0: u64,
    pub cr0_fixed1: u64,
    pub cr4_fixed0: u64,
    pub cr4_fixed1: u64,
    pub spt_updates: Vec<PagingState>,
    pub lma_updates: Vec<PagingState>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            cr0_fixed0: 0,
            cr0_fixed1: 0xFFFF_FFFF,
            cr4_fixed0: 0,
            cr4_fixed1: 0xFFFF_FFFF,
            spt_updates: Vec::new(),
            lma_updates: Vec::new(),
        }
    }
}

impl VcpuPlatform for FakePlatform {
    fn rdmsr(&self, msr: u32) -> u64 {
        match msr {
            msr::IA32_VMX_CR0_FIXED0 => self.cr0_fixed0,
            msr::IA32_VMX_CR0_FIXED1 => self.cr0_fixed1,
            msr::IA32_VMX_CR4_FIXED0 => self.cr4_fixed0,
            msr::IA32_VMX_CR4_FIXED1 => self.cr4_fixed1,
            other => panic!("unexpected rdmsr {:#x}", other),
        }
    }

    fn spt_update_cr3(&mut self, paging: &PagingState) {
        self.spt_updates.push(*paging);
    }

    fn msr_update_lma(&mut self, paging: &PagingState) {
        self.lma_updates.push(*paging);
    }
}

pub type TestVcpu = VtVcpu<FakeVmcs, FakePlatform>;

/// vCPU in its initial (real mode, no emulation) state
pub fn real_mode_vcpu() -> TestVcpu {
    VtVcpu::new(
        FakeVmcs::default(),
        FakePlatform::default(),
        VtConfig::new(TEST_TR_BASE),
    )
    .unwrap()
}

/// vCPU already in protected mode with every selector hardware-visible
pub fn protected_vcpu() -> TestVcpu {
    let mut vcpu = real_mode_vcpu();
    vcpu.vr.pe = true;
    vcpu
}

/// Clear recorded writes and notifications
pub fn reset_traces(vcpu: &mut TestVcpu) {
    vcpu.vmcs.writes.clear();
    vcpu.platform.spt_updates.clear();
    vcpu.platform.lma_updates.clear();
}

/// Host CPU with in-memory descriptor tables
#[derive(Debug, Default)]
pub struct FakeHost {
    /// ES, CS, SS, DS, FS, GS, LDTR, TR
    pub selectors: [u16; 8],
    pub cr0: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub dr7: u64,
    pub rflags: u64,
    pub gdtr: DescTable,
    pub idtr: DescTable,
    /// LSL results; selectors not listed fault
    pub limits: BTreeMap<u16, u32>,
    tables: BTreeMap<u64, Vec<u64>>,
}

impl FakeHost {
    /// Install a descriptor table at `base` without loading it
    pub fn set_table(&mut self, base: u64, entries: &[u64]) {
        self.tables.insert(base, entries.to_vec());
    }

    /// Install a GDT at `base` and point GDTR at it
    pub fn set_gdt(&mut self, base: u64, entries: &[u64]) {
        self.set_table(base, entries);
        self.gdtr = DescTable::new(base, (entries.len() * 8 - 1) as u32);
    }

    pub fn set_selectors(&mut self, selectors: [u16; 8]) {
        self.selectors = selectors;
    }
}

impl HostCpu for FakeHost {
    fn selector(&self, seg: HostSegment) -> u16 {
        let index = match seg {
            HostSegment::Es => 0,
            HostSegment::Cs => 1,
            HostSegment::Ss => 2,
            HostSegment::Ds => 3,
            HostSegment::Fs => 4,
            HostSegment::Gs => 5,
            HostSegment::Ldtr => 6,
            HostSegment::Tr => 7,
        };
        self.selectors[index]
    }

    fn cr0(&self) -> u64 {
        self.cr0
    }

    fn cr3(&self) -> u64 {
        self.cr3
    }

    fn cr4(&self) -> u64 {
        self.cr4
    }

    fn dr7(&self) -> u64 {
        self.dr7
    }

    fn rflags(&self) -> u64 {
        self.rflags
    }

    fn gdtr(&self) -> DescTable {
        self.gdtr
    }

    fn idtr(&self) -> DescTable {
        self.idtr
    }

    fn segment_limit(&self, sel: u16) -> u32 {
        self.limits.get(&sel).copied().unwrap_or(0)
    }

    fn read_descriptor(&self, table_base: u64, index: u16) -> u64 {
        self.tables
            .get(&table_base)
            .and_then(|table| table.get(usize::from(index)))
            .copied()
            .unwrap_or_else(|| panic!("no descriptor {} at {:#x}", index, table_base))
    }
}
