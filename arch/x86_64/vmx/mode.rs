//! Real/protected mode transitions
//!
//! Real mode guests run as virtual-8086 tasks. Toggling CR0.PE swaps the
//! hardware TR with a synthetic one, moves the IDTR between the VMCS and
//! the real-mode shadow block, and re-engages software emulation of the
//! segment selectors until the guest reloads them.
//! Reference: Intel SDM Vol. 3, 20.2 Using Virtual-8086 Mode

use super::platform::VcpuPlatform;
use super::regs::{DescTable, SegMask, SegReg, TR_FIELDS};
use super::segment::ACCESS_RIGHTS_UNUSABLE;
use super::vcpu::VtVcpu;
use super::vmcs::{VmcsAccess, VmcsField};
use ::x86_64::registers::rflags::RFlags;

/// Synthetic TR used while real mode is emulated
const REALMODE_TR_LIMIT: u64 = 8191;
const REALMODE_TR_ACR: u64 = 0x8B;

/// IDTR installed for the duration of the `pe` flip
const REALMODE_IDTR: DescTable = DescTable::new(0, 0);

/// Selector loaded into every segment on entry to protected mode
const PROTECTED_ENTRY_SELECTOR: u64 = 8;
const PROTECTED_DATA_ACR: u64 = 0x93;
const PROTECTED_CODE_ACR: u64 = 0x9B;

const V86_ACR: u64 = 0xF3;
const V86_LIMIT: u64 = 0xFFFF;

/// Segments that may hold a null selector in protected mode
const NULL_SELECTOR_OK: SegMask = SegMask::ES.union(SegMask::FS).union(SegMask::GS);

impl<V: VmcsAccess, P: VcpuPlatform> VtVcpu<V, P> {
    /// Switch the emulation between real mode (`pe == false`) and
    /// protected mode. The caller has already checked that `pe` differs
    /// from the cached flag.
    ///
    /// The IDTR is read with the old `pe` and written back with the new
    /// one; the sentinel write in between leaves no stale IDTR at the
    /// old location.
    pub(super) fn pe_change(&mut self, pe: bool) {
        log::debug!("CR0.PE {} -> {}", u8::from(self.vr.pe), u8::from(pe));

        let idtr = self.read_idtr();
        self.write_idtr(REALMODE_IDTR);
        self.vr.pe = pe;
        self.write_idtr(idtr);

        self.switch_tr(pe);
        self.enable_sw(pe);
    }

    fn switch_tr(&mut self, pe: bool) {
        if pe {
            self.vmcs.vmwrite(TR_FIELDS.limit, self.realmode.tr_limit);
            self.vmcs.vmwrite(TR_FIELDS.access_rights, self.realmode.tr_acr);
            self.vmcs.vmwrite(TR_FIELDS.base, self.realmode.tr_base);
        } else {
            self.realmode.tr_limit = self.vmcs.vmread(TR_FIELDS.limit);
            self.realmode.tr_acr = self.vmcs.vmread(TR_FIELDS.access_rights);
            self.realmode.tr_base = self.vmcs.vmread(TR_FIELDS.base);
            self.vmcs.vmwrite(TR_FIELDS.limit, REALMODE_TR_LIMIT);
            self.vmcs.vmwrite(TR_FIELDS.access_rights, REALMODE_TR_ACR);
            self.vmcs.vmwrite(TR_FIELDS.base, self.config.realmode_tr_base);
        }
    }

    fn enable_sw(&mut self, pe: bool) {
        // Capture the selectors that are not already shadowed
        for seg in SegReg::ALL {
            if !self.vr.sw.is_emulated(seg) {
                let sel = self.vmcs.vmread(seg.fields().selector) as u16;
                self.vr.sw.set_selector(seg, sel);
            }
        }

        self.vr.sw.num = 0;
        self.vr.sw.enable = SegMask::all();

        if pe {
            self.enter_protected();
        } else {
            self.enter_real();
        }
    }

    fn enter_protected(&mut self) {
        let rflags = self.vmcs.vmread(VmcsField::GuestRflags);
        self.vmcs.vmwrite(
            VmcsField::GuestRflags,
            rflags & !RFlags::VIRTUAL_8086_MODE.bits(),
        );

        // Bases and limits stay as real mode left them
        for seg in SegReg::ALL {
            self.vmcs
                .vmwrite(seg.fields().selector, PROTECTED_ENTRY_SELECTOR);
        }
        for seg in SegReg::ALL {
            let acr = if seg == SegReg::Cs {
                PROTECTED_CODE_ACR
            } else {
                PROTECTED_DATA_ACR
            };
            self.vmcs.vmwrite(seg.fields().access_rights, acr);
        }

        for seg in SegReg::ALL {
            let sel = self.vr.sw.selector(seg);
            let null_ok = NULL_SELECTOR_OK.contains(seg.mask());
            if sel & 7 != 0 || (sel == 0 && !null_ok) {
                continue;
            }

            let fields = seg.fields();
            self.vmcs.vmwrite(fields.selector, u64::from(sel));
            self.vr.sw.enable.remove(seg.mask());
            if sel == 0 {
                self.vmcs
                    .vmwrite(fields.access_rights, u64::from(ACCESS_RIGHTS_UNUSABLE));
            }
        }

        log::debug!("protected mode entry, emulating {:?}", self.vr.sw.enable);
    }

    fn enter_real(&mut self) {
        let rflags = self.vmcs.vmread(VmcsField::GuestRflags);
        self.vmcs.vmwrite(
            VmcsField::GuestRflags,
            rflags | RFlags::VIRTUAL_8086_MODE.bits(),
        );

        // A virtual-8086 selector is its base / 16
        for seg in SegReg::ALL {
            let fields = seg.fields();
            let base = self.vmcs.vmread(fields.base);
            if base & 0xF != 0 {
                log::warn!(
                    "{:?} base {:#x} not paragraph aligned, truncating",
                    seg,
                    base
                );
            }
            self.vmcs.vmwrite(fields.selector, base >> 4);
        }
        for seg in SegReg::ALL {
            self.vmcs.vmwrite(seg.fields().access_rights, V86_ACR);
        }
        for seg in SegReg::ALL {
            self.vmcs.vmwrite(seg.fields().limit, V86_LIMIT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::regs::ControlReg;
    use super::super::testutil::*;
    use super::*;
    use test_case::test_case;

    const RFLAGS_VM: u64 = 1 << 17;

    fn preset_selectors(vcpu: &mut TestVcpu, sels: [u16; 6]) {
        for (seg, sel) in SegReg::ALL.iter().zip(sels) {
            vcpu.vmcs.preset(seg.fields().selector, u64::from(sel));
        }
    }

    #[test]
    fn test_enter_real_mode() {
        let mut vcpu = protected_vcpu();
        vcpu.vmcs.preset(VmcsField::GuestRflags, 0x202);
        vcpu.vmcs.preset(TR_FIELDS.limit, 0x67);
        vcpu.vmcs.preset(TR_FIELDS.access_rights, 0x8B);
        vcpu.vmcs.preset(TR_FIELDS.base, 0x1_2340);
        for (i, seg) in SegReg::ALL.iter().enumerate() {
            vcpu.vmcs.preset(seg.fields().base, 0x1_0000 * (i as u64 + 1));
        }

        vcpu.pe_change(false);

        assert!(!vcpu.is_protected());
        assert_eq!(vcpu.vmcs.get(VmcsField::GuestRflags), 0x202 | RFLAGS_VM);
        for (i, seg) in SegReg::ALL.iter().enumerate() {
            let fields = seg.fields();
            assert_eq!(vcpu.vmcs.get(fields.selector), 0x1000 * (i as u64 + 1));
            assert_eq!(vcpu.vmcs.get(fields.access_rights), 0xF3);
            assert_eq!(vcpu.vmcs.get(fields.limit), 0xFFFF);
        }
        assert_eq!(vcpu.vmcs.get(TR_FIELDS.limit), 8191);
        assert_eq!(vcpu.vmcs.get(TR_FIELDS.access_rights), 0x8B);
        assert_eq!(vcpu.vmcs.get(TR_FIELDS.base), TEST_TR_BASE);
        assert_eq!(vcpu.realmode.tr_limit, 0x67);
        assert_eq!(vcpu.realmode.tr_base, 0x1_2340);
        assert_eq!(vcpu.vr.sw.enable, SegMask::all());
    }

    #[test]
    fn test_enter_real_mode_truncates_unaligned_base() {
        let mut vcpu = protected_vcpu();
        vcpu.vmcs.preset(SegReg::Ds.fields().base, 0x1_2345);

        vcpu.pe_change(false);

        assert_eq!(vcpu.vmcs.get(SegReg::Ds.fields().selector), 0x1234);
    }

    #[test]
    fn test_enter_protected_mode() {
        let mut vcpu = real_mode_vcpu();
        vcpu.vmcs.preset(VmcsField::GuestRflags, 0x2 | RFLAGS_VM);
        vcpu.vmcs.preset(SegReg::Cs.fields().base, 0xF_0000);
        vcpu.vmcs.preset(SegReg::Cs.fields().limit, 0xFFFF);
        // ES CS SS DS FS GS
        preset_selectors(&mut vcpu, [0x0010, 0x1001, 0x0018, 0x1234, 0x0007, 0x0020]);

        vcpu.pe_change(true);

        assert!(vcpu.is_protected());
        assert_eq!(vcpu.vmcs.get(VmcsField::GuestRflags), 0x2);
        assert_eq!(vcpu.vr.sw.enable, SegMask::CS | SegMask::DS | SegMask::FS);

        let cs = SegReg::Cs.fields();
        assert_eq!(vcpu.vmcs.get(cs.selector), 8);
        assert_eq!(vcpu.vmcs.get(cs.access_rights), 0x9B);
        assert_eq!(vcpu.vmcs.get(cs.base), 0xF_0000);
        assert_eq!(vcpu.vmcs.get(cs.limit), 0xFFFF);
        assert_eq!(vcpu.read_sreg_sel(SegReg::Cs), 0x1001);

        assert_eq!(vcpu.vmcs.get(SegReg::Es.fields().selector), 0x10);
        assert_eq!(vcpu.vmcs.get(SegReg::Es.fields().access_rights), 0x93);
        assert_eq!(vcpu.vmcs.get(SegReg::Ss.fields().selector), 0x18);
        assert_eq!(vcpu.vmcs.get(SegReg::Gs.fields().selector), 0x20);
        assert_eq!(vcpu.vmcs.get(SegReg::Ds.fields().selector), 8);
        assert_eq!(vcpu.read_sreg_sel(SegReg::Ds), 0x1234);
        assert_eq!(vcpu.read_sreg_sel(SegReg::Fs), 0x0007);
    }

    #[test_case(SegReg::Es, true)]
    #[test_case(SegReg::Fs, true)]
    #[test_case(SegReg::Gs, true)]
    #[test_case(SegReg::Cs, false)]
    #[test_case(SegReg::Ss, false)]
    #[test_case(SegReg::Ds, false)]
    fn test_null_selector_on_protected_entry(seg: SegReg, released: bool) {
        let mut vcpu = real_mode_vcpu();
        preset_selectors(&mut vcpu, [0x0008; 6]);
        vcpu.vmcs.preset(seg.fields().selector, 0);

        vcpu.pe_change(true);

        assert_eq!(vcpu.vr.sw.is_emulated(seg), !released);
        let acr = vcpu.vmcs.get(seg.fields().access_rights);
        if released {
            assert_eq!(acr, u64::from(ACCESS_RIGHTS_UNUSABLE));
            assert_eq!(vcpu.vmcs.get(seg.fields().selector), 0);
        } else {
            assert_ne!(acr, u64::from(ACCESS_RIGHTS_UNUSABLE));
            assert_eq!(vcpu.vmcs.get(seg.fields().selector), 8);
            assert_eq!(vcpu.read_sreg_sel(seg), 0);
        }
    }

    #[test]
    fn test_shadowed_selectors_survive_transition() {
        let mut vcpu = real_mode_vcpu();
        vcpu.vr.sw.enable = SegMask::DS;
        vcpu.vr.sw.set_selector(SegReg::Ds, 0x0040);
        vcpu.vmcs.preset(SegReg::Ds.fields().selector, 0x9999);

        vcpu.pe_change(true);

        // The shadow value wins over the VMCS field
        assert_eq!(vcpu.vmcs.get(SegReg::Ds.fields().selector), 0x40);
        assert!(!vcpu.vr.sw.is_emulated(SegReg::Ds));
    }

    #[test]
    fn test_transition_resets_instruction_counter() {
        let mut vcpu = protected_vcpu();
        vcpu.record_emulated_instruction();
        vcpu.record_emulated_instruction();

        vcpu.pe_change(false);

        assert_eq!(vcpu.vr.sw.num, 0);
    }

    #[test]
    fn test_idtr_moves_with_pe() {
        let mut vcpu = protected_vcpu();
        vcpu.write_idtr(DescTable::new(0x8000, 0x7FF));

        vcpu.pe_change(false);
        assert_eq!(vcpu.realmode.idtr, DescTable::new(0x8000, 0x7FF));
        assert_eq!(vcpu.vmcs.get(VmcsField::GuestIdtrBase), 0);
        assert_eq!(vcpu.vmcs.get(VmcsField::GuestIdtrLimit), 0);
        assert_eq!(vcpu.read_idtr(), DescTable::new(0x8000, 0x7FF));

        vcpu.write_idtr(DescTable::new(0, 0x3FF));
        vcpu.pe_change(true);
        assert_eq!(vcpu.realmode.idtr, DescTable::new(0, 0));
        assert_eq!(vcpu.read_idtr(), DescTable::new(0, 0x3FF));
    }

    #[test]
    fn test_idtr_sentinel_written_before_flip() {
        let mut vcpu = protected_vcpu();
        vcpu.vmcs.preset(VmcsField::GuestIdtrBase, 0x8000);
        vcpu.vmcs.preset(VmcsField::GuestIdtrLimit, 0x7FF);

        vcpu.pe_change(false);

        let idtr_writes: Vec<_> = vcpu
            .vmcs
            .writes
            .iter()
            .filter(|(f, _)| {
                matches!(f, VmcsField::GuestIdtrBase | VmcsField::GuestIdtrLimit)
            })
            .copied()
            .collect();
        assert_eq!(
            idtr_writes,
            [(VmcsField::GuestIdtrBase, 0), (VmcsField::GuestIdtrLimit, 0)]
        );
    }

    #[test]
    fn test_round_trip_restores_tr_and_selectors() {
        let mut vcpu = protected_vcpu();
        vcpu.vmcs.preset(TR_FIELDS.selector, 0x28);
        vcpu.vmcs.preset(TR_FIELDS.limit, 0x67);
        vcpu.vmcs.preset(TR_FIELDS.access_rights, 0x8B);
        vcpu.vmcs.preset(TR_FIELDS.base, 0xFFFF_8000_0010_0000);
        preset_selectors(&mut vcpu, [0x10, 0x08, 0x10, 0x10, 0x10, 0x10]);
        for seg in SegReg::ALL {
            vcpu.vmcs.preset(seg.fields().base, 0);
        }

        vcpu.pe_change(false);
        vcpu.pe_change(true);

        assert_eq!(vcpu.vmcs.get(TR_FIELDS.selector), 0x28);
        assert_eq!(vcpu.vmcs.get(TR_FIELDS.limit), 0x67);
        assert_eq!(vcpu.vmcs.get(TR_FIELDS.access_rights), 0x8B);
        assert_eq!(vcpu.vmcs.get(TR_FIELDS.base), 0xFFFF_8000_0010_0000);
        // Shadow kept the protected mode selectors across real mode
        assert_eq!(vcpu.vr.sw.enable, SegMask::empty());
        assert_eq!(vcpu.read_sreg_sel(SegReg::Cs), 0x08);
        assert_eq!(vcpu.read_sreg_sel(SegReg::Ds), 0x10);
    }

    #[test]
    fn test_cr0_write_drives_transition() {
        let mut vcpu = protected_vcpu();
        vcpu.vmcs.preset(SegReg::Cs.fields().base, 0xF_0000);

        vcpu.write_control_reg(ControlReg::Cr0, 0);

        assert!(!vcpu.is_protected());
        assert_eq!(vcpu.vmcs.get(SegReg::Cs.fields().selector), 0xF000);
        assert_ne!(vcpu.vmcs.get(VmcsField::GuestRflags) & RFLAGS_VM, 0);
        assert_eq!(vcpu.read_flags() & RFLAGS_VM, 0);
    }
}
