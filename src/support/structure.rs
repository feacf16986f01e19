//! The per-U-Proc support structure and page table entry types (spec
//! §3). Support structures live in a fixed pool sized `N_UPROC`,
//! indexed 1:1 by [`Asid`] — unlike the PCB pool there is no free-list
//! churn: every U-Proc gets exactly one support structure for its
//! lifetime, assigned by the instantiator at spawn time.

use crate::config::{HANDLER_STACK_SIZE, N_PAGES, N_UPROC};
use crate::machine::SavedState;

/// An address-space identifier, 1..=N_UPROC (0 is reserved for kernel
/// processes with no private address space).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Asid(u8);

impl Asid {
    pub fn new(raw: u8) -> Option<Self> {
        if raw as usize >= 1 && raw as usize <= N_UPROC {
            Some(Asid(raw))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// 0-based index into a `[_; N_UPROC]` array.
    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

/// A handle into the support-structure pool — just the `Asid`, since
/// the pool is indexed directly by it.
pub type SupportId = Asid;

bitflags::bitflags! {
    /// Entry-lo flag bits (spec §3's "valid bit, a dirty bit, and a
    /// global bit"); the frame number occupies the high bits.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct EntryLoFlags: u32 {
        const GLOBAL = 1 << 0;
        const VALID  = 1 << 1;
        const DIRTY  = 1 << 2;
    }
}

const FRAME_SHIFT: u32 = 12;

/// Entry-hi: virtual page number and ASID.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EntryHi(pub u32);

impl EntryHi {
    const VPN_SHIFT: u32 = 12;
    const ASID_SHIFT: u32 = 6;
    const ASID_MASK: u32 = 0x3f;

    pub fn new(vpn: u32, asid: Asid) -> Self {
        EntryHi((vpn << Self::VPN_SHIFT) | ((asid.get() as u32) << Self::ASID_SHIFT))
    }

    pub fn vpn(self) -> u32 {
        self.0 >> Self::VPN_SHIFT
    }
}

/// Entry-lo: physical frame number plus the valid/dirty/global bits.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EntryLo(pub u32);

impl EntryLo {
    pub fn new(frame: u32, flags: EntryLoFlags) -> Self {
        EntryLo((frame << FRAME_SHIFT) | flags.bits())
    }

    pub fn frame(self) -> u32 {
        self.0 >> FRAME_SHIFT
    }

    pub fn flags(self) -> EntryLoFlags {
        EntryLoFlags::from_bits_truncate(self.0 & ((1 << FRAME_SHIFT) - 1))
    }

    pub fn is_valid(self) -> bool {
        self.flags().contains(EntryLoFlags::VALID)
    }

    pub fn with_flags(self, flags: EntryLoFlags) -> Self {
        EntryLo::new(self.frame(), flags)
    }

    /// An entry-lo with no frame and the valid bit clear.
    pub fn invalid() -> Self {
        EntryLo(0)
    }
}

/// One page table entry (spec §3).
#[derive(Clone, Copy, Default, Debug)]
pub struct Pte {
    pub entry_hi: EntryHi,
    pub entry_lo: EntryLo,
}

/// Which of a support structure's two saved exception contexts is in
/// play (spec §3: "two saved exception states... two pass-up
/// contexts").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptKind {
    PageFault = 0,
    General = 1,
}

/// Stack pointer, status, and PC a pass-up resumes at (spec §3).
#[derive(Clone, Copy, Debug, Default)]
pub struct ExceptContext {
    pub stack_ptr: u32,
    pub status: u32,
    pub pc: u32,
}

impl ExceptContext {
    pub fn to_saved_state(self) -> SavedState {
        let mut state = SavedState::default();
        state.pc = self.pc;
        state.status = self.status;
        state.regs[crate::machine::reg::A0 - 1] = self.stack_ptr; // sp convention: reg 29
        state
    }
}

/// A U-Proc's support structure: everything the support level needs
/// to service its page faults and SYS9–18 calls.
pub struct SupportStruct {
    pub asid: Asid,
    pub except_state: [SavedState; 2],
    pub except_context: [ExceptContext; 2],
    pub page_table: [Pte; N_PAGES],
    /// Fixed handler stacks, one per exception kind; no heap allocation.
    pub stacks: [[u8; HANDLER_STACK_SIZE]; 2],
    /// The PCB this structure belongs to, for SYS9's teardown.
    pub owner: Option<crate::nucleus::pcb::PcbId>,
}

impl SupportStruct {
    pub fn new(asid: Asid) -> Self {
        SupportStruct {
            asid,
            except_state: [SavedState::default(); 2],
            except_context: [ExceptContext::default(); 2],
            page_table: [Pte::default(); N_PAGES],
            stacks: [[0; HANDLER_STACK_SIZE]; 2],
            owner: None,
        }
    }
}

/// Fixed pool of `N_UPROC` support structures, one per ASID.
pub struct Pool {
    structures: [SupportStruct; N_UPROC],
}

impl Pool {
    pub fn new() -> Self {
        Pool {
            structures: core::array::from_fn(|i| {
                SupportStruct::new(Asid::new((i + 1) as u8).expect("index within N_UPROC"))
            }),
        }
    }

    pub fn get(&self, id: SupportId) -> &SupportStruct {
        &self.structures[id.index()]
    }

    pub fn get_mut(&mut self, id: SupportId) -> &mut SupportStruct {
        &mut self.structures[id.index()]
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::nucleus::passup::SupportContext for &mut SupportStruct {
    fn except_state_slot(&mut self, index: crate::nucleus::passup::ExceptIndex) -> &mut SavedState {
        &mut self.except_state[index as usize]
    }

    fn resume_context(&self, index: crate::nucleus::passup::ExceptIndex) -> SavedState {
        self.except_context[index as usize].to_saved_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_hi_lo_round_trip_vpn_and_frame() {
        let asid = Asid::new(3).unwrap();
        let hi = EntryHi::new(0x1234, asid);
        assert_eq!(hi.vpn(), 0x1234);
        let lo = EntryLo::new(7, EntryLoFlags::VALID | EntryLoFlags::DIRTY);
        assert_eq!(lo.frame(), 7);
        assert!(lo.is_valid());
        assert!(lo.flags().contains(EntryLoFlags::DIRTY));
        assert!(!lo.flags().contains(EntryLoFlags::GLOBAL));
    }

    #[test]
    fn pool_indexes_one_structure_per_asid() {
        let pool = Pool::new();
        let asid = Asid::new(5).unwrap();
        assert_eq!(pool.get(asid).asid, asid);
    }

    #[test]
    fn asid_rejects_out_of_range_values() {
        assert!(Asid::new(0).is_none());
        assert!(Asid::new((N_UPROC + 1) as u8).is_none());
    }
}
