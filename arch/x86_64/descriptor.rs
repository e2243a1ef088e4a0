//! Segment descriptor decoding
//!
//! Resolves a host selector to the base and access rights stored in its
//! GDT or LDT descriptor. Only host register capture needs this; guest
//! segments are described by the VMCS.
//! Reference: Intel SDM Vol. 3, 3.4.5 Segment Descriptors

use super::host::HostCpu;
use super::vmx::{DescTable, ACCESS_RIGHTS_UNUSABLE};

/// Table indicator: selector refers to the LDT
pub const SELECTOR_TI: u16 = 1 << 2;

/// Descriptor type bit S: clear for system descriptors (TSS, LDT, gates)
const DESC_S: u64 = 1 << 44;
/// Granularity bit
const DESC_G: u64 = 1 << 55;

/// Access rights in VMCS layout: type, S, DPL, P, then AVL, L, D/B, G
const ACR_MASK: u64 = 0xF0FF;

/// Descriptor table index of a selector
pub const fn selector_index(sel: u16) -> u16 {
    sel >> 3
}

/// Null selectors have index 0 in the GDT
pub const fn is_null_selector(sel: u16) -> bool {
    selector_index(sel) == 0 && sel & SELECTOR_TI == 0
}

/// Whether `low` is a system descriptor, which is 16 bytes wide in IA-32e mode
pub const fn is_system(low: u64) -> bool {
    low & DESC_S == 0
}

/// Base address from the low descriptor quadword, plus the upper dword of
/// `high` for 16-byte system descriptors
pub fn descriptor_base(low: u64, high: Option<u64>) -> u64 {
    let mut base = (low >> 16) & 0xFF_FFFF;
    base |= ((low >> 56) & 0xFF) << 24;
    if let Some(high) = high {
        base |= (high & 0xFFFF_FFFF) << 32;
    }
    base
}

/// Byte-granular segment limit
pub fn descriptor_limit(low: u64) -> u32 {
    let mut limit = (low & 0xFFFF) | ((low >> 32) & 0xF_0000);
    if low & DESC_G != 0 {
        limit = (limit << 12) | 0xFFF;
    }
    limit as u32
}

/// Access rights in the format of the VMCS access-rights fields
pub fn descriptor_access_rights(low: u64) -> u32 {
    ((low >> 40) & ACR_MASK) as u32
}

/// Descriptor lookups against the live tables of a host CPU
pub struct DescriptorLookup<'a, H: ?Sized> {
    host: &'a H,
    gdt: DescTable,
    ldtr: u16,
}

impl<'a, H: HostCpu + ?Sized> DescriptorLookup<'a, H> {
    pub fn new(host: &'a H, gdt: DescTable, ldtr: u16) -> Self {
        Self { host, gdt, ldtr }
    }

    /// Fetch the descriptor quadwords of `sel`, `None` for a null or out
    /// of range selector
    fn descriptor(&self, sel: u16) -> Option<(u64, Option<u64>)> {
        let table = if sel & SELECTOR_TI != 0 {
            self.ldt()?
        } else if is_null_selector(sel) {
            return None;
        } else {
            self.gdt
        };
        read_descriptor(self.host, table, selector_index(sel))
    }

    fn ldt(&self) -> Option<DescTable> {
        if ldtr_is_unusable(self.ldtr) {
            return None;
        }
        let (low, high) = read_descriptor(self.host, self.gdt, selector_index(self.ldtr))?;
        Some(DescTable::new(
            descriptor_base(low, high),
            descriptor_limit(low),
        ))
    }

    /// Segment base of `sel`; 0 for null or unresolvable selectors
    pub fn base(&self, sel: u16) -> u64 {
        self.descriptor(sel)
            .map(|(low, high)| descriptor_base(low, high))
            .unwrap_or(0)
    }

    /// Access rights of `sel`; unusable for null or unresolvable selectors
    pub fn access_rights(&self, sel: u16) -> u32 {
        self.descriptor(sel)
            .map(|(low, _)| descriptor_access_rights(low))
            .unwrap_or(ACCESS_RIGHTS_UNUSABLE)
    }
}

/// LDTR must name a GDT entry
fn ldtr_is_unusable(ldtr: u16) -> bool {
    is_null_selector(ldtr) || ldtr & SELECTOR_TI != 0
}

fn read_descriptor<H: HostCpu + ?Sized>(
    host: &H,
    table: DescTable,
    index: u16,
) -> Option<(u64, Option<u64>)> {
    let in_table = |index: u16| u32::from(index) * 8 + 7 <= table.limit;
    if !in_table(index) {
        return None;
    }

    let low = host.read_descriptor(table.base, index);
    let high = if is_system(low) && in_table(index + 1) {
        Some(host.read_descriptor(table.base, index + 1))
    } else {
        None
    };
    Some((low, high))
}
