//! Host CPU register access
//!
//! `HostCpu` is the read-only view of the physical processor used to
//! snapshot the hypervisor's own execution context.

use super::vmx::DescTable;

/// Host segment registers, including LDTR and TR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSegment {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
    Ldtr,
    Tr,
}

/// Registers of the processor the hypervisor is running on
pub trait HostCpu {
    /// Selector currently loaded in `seg`
    fn selector(&self, seg: HostSegment) -> u16;

    fn cr0(&self) -> u64;
    fn cr3(&self) -> u64;
    fn cr4(&self) -> u64;
    fn dr7(&self) -> u64;
    fn rflags(&self) -> u64;
    fn gdtr(&self) -> DescTable;
    fn idtr(&self) -> DescTable;

    /// Segment limit of `sel` as LSL reports it, 0 if LSL faults the selector
    fn segment_limit(&self, sel: u16) -> u32;

    /// Raw 8-byte entry `index` of the descriptor table at `table_base`
    fn read_descriptor(&self, table_base: u64, index: u16) -> u64;
}

#[cfg(target_arch = "x86_64")]
pub use native::NativeHost;

#[cfg(target_arch = "x86_64")]
mod native {
    use super::{DescTable, HostCpu, HostSegment};
    use ::x86_64::instructions::segmentation::{Segment, CS, DS, ES, FS, GS, SS};
    use ::x86_64::instructions::tables::{sgdt, sidt};
    use ::x86_64::registers::control::{Cr0, Cr3, Cr4};
    use ::x86_64::registers::rflags;
    use core::arch::asm;

    /// The logical processor executing the caller
    #[derive(Debug)]
    pub struct NativeHost {
        _private: (),
    }

    impl NativeHost {
        /// # Safety
        /// Must run at CPL 0, and the host GDT and LDT must be mapped at
        /// their linear addresses.
        pub unsafe fn new() -> Self {
            Self { _private: () }
        }
    }

    impl HostCpu for NativeHost {
        fn selector(&self, seg: HostSegment) -> u16 {
            match seg {
                HostSegment::Es => ES::get_reg().0,
                HostSegment::Cs => CS::get_reg().0,
                HostSegment::Ss => SS::get_reg().0,
                HostSegment::Ds => DS::get_reg().0,
                HostSegment::Fs => FS::get_reg().0,
                HostSegment::Gs => GS::get_reg().0,
                HostSegment::Ldtr => {
                    let sel: u16;
                    // SAFETY: SLDT only stores a register.
                    unsafe { asm!("sldt {0:x}", out(reg) sel, options(nomem, nostack, preserves_flags)) };
                    sel
                }
                HostSegment::Tr => {
                    let sel: u16;
                    // SAFETY: STR only stores a register.
                    unsafe { asm!("str {0:x}", out(reg) sel, options(nomem, nostack, preserves_flags)) };
                    sel
                }
            }
        }

        fn cr0(&self) -> u64 {
            Cr0::read_raw()
        }

        fn cr3(&self) -> u64 {
            let (frame, flags) = Cr3::read_raw();
            frame.start_address().as_u64() | u64::from(flags)
        }

        fn cr4(&self) -> u64 {
            Cr4::read_raw()
        }

        fn dr7(&self) -> u64 {
            let value: u64;
            // SAFETY: CPL 0 is guaranteed by `NativeHost::new`.
            unsafe { asm!("mov {}, dr7", out(reg) value, options(nomem, nostack, preserves_flags)) };
            value
        }

        fn rflags(&self) -> u64 {
            rflags::read_raw()
        }

        fn gdtr(&self) -> DescTable {
            let gdtr = sgdt();
            DescTable::new(gdtr.base.as_u64(), u32::from(gdtr.limit))
        }

        fn idtr(&self) -> DescTable {
            let idtr = sidt();
            DescTable::new(idtr.base.as_u64(), u32::from(idtr.limit))
        }

        fn segment_limit(&self, sel: u16) -> u32 {
            let limit: u32;
            // SAFETY: LSL leaves the destination untouched on failure.
            unsafe {
                asm!(
                    "lsl {0:e}, {1:e}",
                    inout(reg) 0u32 => limit,
                    in(reg) u32::from(sel),
                    options(nomem, nostack)
                )
            };
            limit
        }

        fn read_descriptor(&self, table_base: u64, index: u16) -> u64 {
            let addr = table_base + u64::from(index) * 8;
            // SAFETY: `NativeHost::new` requires the descriptor tables to be
            // mapped; callers bound `index` by the table limit.
            unsafe { core::ptr::read_volatile(addr as *const u64) }
        }
    }
}
