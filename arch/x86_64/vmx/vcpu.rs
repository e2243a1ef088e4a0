//! General and control register access for a VT-x virtual CPU
//!
//! `VtVcpu` is the explicit per-vCPU context: cached registers, mode
//! flags, the real-mode shadow block, the VMCS accessor and the platform
//! collaborators. Exactly one physical CPU drives a given `VtVcpu` at a
//! time, so none of this state is locked.
//! Reference: Intel SDM Vol. 3, 24.6.6 Guest/Host Masks and Read Shadows for CR0 and CR4

use super::platform::{PagingState, VcpuPlatform};
use super::regs::{ControlReg, GeneralReg};
use super::state::{RealmodeData, SwSegments, VmentryRegs};
use super::vmcs::{msr, VmcsAccess, VmcsField};
use crate::config::VtConfig;
use crate::Result;
use ::x86_64::registers::control::{Cr0Flags, Cr4Flags};
use ::x86_64::registers::rflags::RFlags;

/// Register context of one VT-x virtual CPU
#[derive(Debug)]
pub struct VtVcpu<V, P> {
    pub(super) vr: VmentryRegs,
    pub(super) realmode: RealmodeData,
    pub(super) vmcs: V,
    pub(super) platform: P,
    pub(super) config: VtConfig,
}

impl<V: VmcsAccess, P: VcpuPlatform> VtVcpu<V, P> {
    /// Create the register context of a new vCPU.
    ///
    /// The vCPU starts with `pe` and `pg` clear and no segment emulated;
    /// the bootstrap code establishes the initial mode before the first
    /// VM entry.
    pub fn new(vmcs: V, platform: P, config: VtConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            vr: VmentryRegs::default(),
            realmode: RealmodeData::default(),
            vmcs,
            platform,
            config,
        })
    }

    pub fn vmcs(&self) -> &V {
        &self.vmcs
    }

    pub fn vmcs_mut(&mut self) -> &mut V {
        &mut self.vmcs
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn config(&self) -> &VtConfig {
        &self.config
    }

    /// Cached registers
    pub fn regs(&self) -> &VmentryRegs {
        &self.vr
    }

    /// Hardware state parked for emulated real mode
    pub fn realmode(&self) -> &RealmodeData {
        &self.realmode
    }

    /// Software segment shadow
    pub fn segment_shadow(&self) -> &SwSegments {
        &self.vr.sw
    }

    /// Count one instruction emulated under the segment shadow
    pub fn record_emulated_instruction(&mut self) -> u32 {
        self.vr.sw.num = self.vr.sw.num.wrapping_add(1);
        self.vr.sw.num
    }

    /// Guest CR0.PE as last written
    pub fn is_protected(&self) -> bool {
        self.vr.pe
    }

    /// Guest CR0.PG as last written
    pub fn is_paging(&self) -> bool {
        self.vr.pg
    }

    pub fn read_general_reg(&self, reg: GeneralReg) -> u64 {
        match reg {
            GeneralReg::Rax => self.vr.rax,
            GeneralReg::Rcx => self.vr.rcx,
            GeneralReg::Rdx => self.vr.rdx,
            GeneralReg::Rbx => self.vr.rbx,
            GeneralReg::Rsp => self.vmcs.vmread(VmcsField::GuestRsp),
            GeneralReg::Rbp => self.vr.rbp,
            GeneralReg::Rsi => self.vr.rsi,
            GeneralReg::Rdi => self.vr.rdi,
            GeneralReg::R8 => self.vr.r8,
            GeneralReg::R9 => self.vr.r9,
            GeneralReg::R10 => self.vr.r10,
            GeneralReg::R11 => self.vr.r11,
            GeneralReg::R12 => self.vr.r12,
            GeneralReg::R13 => self.vr.r13,
            GeneralReg::R14 => self.vr.r14,
            GeneralReg::R15 => self.vr.r15,
        }
    }

    pub fn write_general_reg(&mut self, reg: GeneralReg, val: u64) {
        let slot = match reg {
            GeneralReg::Rax => &mut self.vr.rax,
            GeneralReg::Rcx => &mut self.vr.rcx,
            GeneralReg::Rdx => &mut self.vr.rdx,
            GeneralReg::Rbx => &mut self.vr.rbx,
            GeneralReg::Rsp => {
                self.vmcs.vmwrite(VmcsField::GuestRsp, val);
                return;
            }
            GeneralReg::Rbp => &mut self.vr.rbp,
            GeneralReg::Rsi => &mut self.vr.rsi,
            GeneralReg::Rdi => &mut self.vr.rdi,
            GeneralReg::R8 => &mut self.vr.r8,
            GeneralReg::R9 => &mut self.vr.r9,
            GeneralReg::R10 => &mut self.vr.r10,
            GeneralReg::R11 => &mut self.vr.r11,
            GeneralReg::R12 => &mut self.vr.r12,
            GeneralReg::R13 => &mut self.vr.r13,
            GeneralReg::R14 => &mut self.vr.r14,
            GeneralReg::R15 => &mut self.vr.r15,
        };
        *slot = val;
    }

    /// Read a control register as the guest sees it.
    ///
    /// CR0 and CR4 come from the read shadows, not from the values the
    /// processor actually runs with.
    pub fn read_control_reg(&self, reg: ControlReg) -> u64 {
        match reg {
            ControlReg::Cr0 => self.vmcs.vmread(VmcsField::Cr0ReadShadow),
            ControlReg::Cr2 => self.vr.cr2,
            ControlReg::Cr3 => self.vr.cr3,
            ControlReg::Cr4 => self.vmcs.vmread(VmcsField::Cr4ReadShadow),
        }
    }

    pub fn write_control_reg(&mut self, reg: ControlReg, val: u64) {
        log::trace!("write {:?} = {:#x}", reg, val);

        match reg {
            ControlReg::Cr0 => self.write_cr0(val),
            ControlReg::Cr2 => self.vr.cr2 = val,
            ControlReg::Cr3 => {
                self.vr.cr3 = val;
                self.spt_update_cr3();
            }
            ControlReg::Cr4 => self.write_cr4(val),
        }
    }

    /// CR0 write pipeline. The order of the steps is significant: the
    /// PE transition reads and writes state that the later steps depend on.
    fn write_cr0(&mut self, mut val: u64) {
        self.vmcs.vmwrite(VmcsField::Cr0ReadShadow, val);

        let pe = Cr0Flags::PROTECTED_MODE_ENABLE.bits();
        let pg = Cr0Flags::PAGING.bits();

        // Paging cannot be active without protection
        if val & pe == 0 {
            val &= !pg;
        }

        if (val & pe != 0) != self.vr.pe {
            self.pe_change(val & pe != 0);
        }

        if (val & pg != 0) != self.vr.pg {
            self.vr.pg = val & pg != 0;
            self.spt_update_cr3();
        }

        let paging = self.paging_state();
        self.platform.msr_update_lma(&paging);

        let fixed0 = self.platform.rdmsr(msr::IA32_VMX_CR0_FIXED0);
        let fixed1 = self.platform.rdmsr(msr::IA32_VMX_CR0_FIXED1);
        val &= fixed1;
        val |= fixed0;
        val |= Cr0Flags::WRITE_PROTECT.bits();
        self.vmcs.vmwrite(VmcsField::GuestCr0, val);

        // The write above may have coerced PG; let the shadow page tables see the final state
        self.spt_update_cr3();
    }

    fn write_cr4(&mut self, mut val: u64) {
        self.vmcs.vmwrite(VmcsField::Cr4ReadShadow, val);

        let fixed0 = self.platform.rdmsr(msr::IA32_VMX_CR4_FIXED0);
        let fixed1 = self.platform.rdmsr(msr::IA32_VMX_CR4_FIXED1);
        val &= fixed1;
        val |= fixed0;
        if self.config.spt_use_pae {
            val |= Cr4Flags::PHYSICAL_ADDRESS_EXTENSION.bits();
        }
        self.vmcs.vmwrite(VmcsField::GuestCr4, val);

        self.spt_update_cr3();
    }

    /// Guest paging state as the shadow page tables should see it
    pub fn paging_state(&self) -> PagingState {
        PagingState {
            cr0: self.vmcs.vmread(VmcsField::Cr0ReadShadow),
            cr3: self.vr.cr3,
            cr4: self.vmcs.vmread(VmcsField::Cr4ReadShadow),
            pe: self.vr.pe,
            pg: self.vr.pg,
        }
    }

    fn spt_update_cr3(&mut self) {
        let paging = self.paging_state();
        self.platform.spt_update_cr3(&paging);
    }

    /// Install the shadow page table root computed by the paging subsystem
    pub fn spt_set_cr3(&mut self, cr3: u64) {
        self.vmcs.vmwrite(VmcsField::GuestCr3, cr3);
    }

    pub fn read_ip(&self) -> u64 {
        self.vmcs.vmread(VmcsField::GuestRip)
    }

    pub fn write_ip(&mut self, val: u64) {
        self.vmcs.vmwrite(VmcsField::GuestRip, val);
    }

    /// Guest RFLAGS. In emulated real mode the VM flag belongs to the
    /// hypervisor and is hidden from the guest.
    pub fn read_flags(&self) -> u64 {
        let mut val = self.vmcs.vmread(VmcsField::GuestRflags);
        if !self.vr.pe {
            val &= !RFlags::VIRTUAL_8086_MODE.bits();
        }
        val
    }

    pub fn write_flags(&mut self, mut val: u64) {
        if !self.vr.pe {
            val |= RFlags::VIRTUAL_8086_MODE.bits();
        }
        self.vmcs.vmwrite(VmcsField::GuestRflags, val);
    }
}
