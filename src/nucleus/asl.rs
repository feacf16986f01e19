//! The Active Semaphore List (spec §3, §4.2).
//!
//! A singly-linked list of semaphore descriptors, strictly sorted by
//! semaphore address, delimited by two sentinels at addresses `0` and
//! `usize::MAX` (Design Note "Sentinels with ordering" — the sentinel
//! addresses themselves give the boundary tests for free, no special
//! casing needed at either end of the scan). Descriptor storage comes
//! from a fixed pool of `N_PROC + 2` slots; a descriptor exists only
//! while its blocked-process queue is non-empty.

use core::num::NonZeroU16;

use crate::config::ASL_POOL_SIZE;
use crate::error::Error;
use crate::nucleus::pcb::{PcbId, PcbQueue, Pool as PcbPool};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct AslId(NonZeroU16);

impl AslId {
    fn from_raw(raw: usize) -> Self {
        AslId(NonZeroU16::new((raw + 1) as u16).expect("ASL_POOL_SIZE fits in u16"))
    }

    fn raw(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

struct Descriptor {
    sem_addr: usize,
    blocked: PcbQueue,
    next: Option<AslId>,
}

impl Descriptor {
    const fn empty() -> Self {
        Descriptor {
            sem_addr: 0,
            blocked: PcbQueue::new(),
            next: None,
        }
    }
}

/// The ASL itself: the descriptor arena, the sorted active list's
/// head sentinel, and the free list's head.
pub struct Asl {
    descriptors: [Descriptor; ASL_POOL_SIZE],
    head: AslId,
    free: Option<AslId>,
}

const LOW_SENTINEL: usize = 0;
const HIGH_SENTINEL: usize = 1;

impl Asl {
    pub fn new() -> Self {
        let mut descriptors = core::array::from_fn(|_| Descriptor::empty());
        descriptors[LOW_SENTINEL].sem_addr = 0;
        descriptors[LOW_SENTINEL].next = Some(AslId::from_raw(HIGH_SENTINEL));
        descriptors[HIGH_SENTINEL].sem_addr = usize::MAX;
        descriptors[HIGH_SENTINEL].next = None;

        let mut free = None;
        for i in (2..ASL_POOL_SIZE).rev() {
            descriptors[i].next = free;
            free = Some(AslId::from_raw(i));
        }

        Asl {
            descriptors,
            head: AslId::from_raw(LOW_SENTINEL),
            free,
        }
    }

    /// Returns `(predecessor, descriptor)` where `descriptor` is the
    /// first node whose address is `>= sem_addr`. `predecessor` is
    /// always a real node (at worst the low sentinel).
    fn locate(&self, sem_addr: usize) -> (AslId, Option<AslId>) {
        let mut prev = self.head;
        loop {
            let next = self.descriptors[prev.raw()].next.unwrap();
            if self.descriptors[next.raw()].sem_addr >= sem_addr {
                let hit = if self.descriptors[next.raw()].sem_addr == sem_addr {
                    Some(next)
                } else {
                    None
                };
                return (prev, hit);
            }
            prev = next;
        }
    }

    /// Blocks `pcb` on the semaphore at `sem_addr`, creating a new
    /// descriptor if this is the first waiter. Returns
    /// [`Error::AslPoolExhausted`] only if a new descriptor is needed
    /// and the free list is empty — spec §4.2 asserts this cannot
    /// happen with `N_PROC + 2` descriptors.
    pub fn block(&mut self, pcbs: &mut PcbPool, sem_addr: usize, pcb: PcbId) -> Result<(), Error> {
        let (prev, hit) = self.locate(sem_addr);
        let node = match hit {
            Some(node) => node,
            None => {
                let node = self.free.ok_or(Error::AslPoolExhausted)?;
                self.free = self.descriptors[node.raw()].next;
                self.descriptors[node.raw()] = Descriptor {
                    sem_addr,
                    blocked: PcbQueue::new(),
                    next: self.descriptors[prev.raw()].next,
                };
                self.descriptors[prev.raw()].next = Some(node);
                node
            }
        };
        pcbs.insert_tail(&mut self.descriptors[node.raw()].blocked, pcb);
        pcbs.get_mut(pcb).sem_addr = Some(sem_addr);
        Ok(())
    }

    /// Pops the head of `sem_addr`'s blocked queue, recycling the
    /// descriptor if it becomes empty.
    pub fn unblock_one(&mut self, pcbs: &mut PcbPool, sem_addr: usize) -> Option<PcbId> {
        let (prev, hit) = self.locate(sem_addr);
        let node = hit?;
        let popped = pcbs.remove_head(&mut self.descriptors[node.raw()].blocked)?;
        pcbs.get_mut(popped).sem_addr = None;
        if pcbs.is_empty(&self.descriptors[node.raw()].blocked) {
            self.recycle(prev, node);
        }
        Some(popped)
    }

    /// Removes `pcb` from whatever semaphore queue it is blocked on
    /// (per `pcb.sem_addr`), recycling the descriptor if it becomes
    /// empty. Used by SYS2 to tear down blocked children.
    pub fn remove_specific_blocked(&mut self, pcbs: &mut PcbPool, pcb: PcbId) -> Option<PcbId> {
        let sem_addr = pcbs.get(pcb).sem_addr?;
        let (prev, hit) = self.locate(sem_addr);
        let node = hit?;
        let removed = pcbs.remove_specific(&mut self.descriptors[node.raw()].blocked, pcb)?;
        pcbs.get_mut(removed).sem_addr = None;
        if pcbs.is_empty(&self.descriptors[node.raw()].blocked) {
            self.recycle(prev, node);
        }
        Some(removed)
    }

    /// Head of `sem_addr`'s blocked queue without removing it.
    pub fn peek_blocked(&self, pcbs: &PcbPool, sem_addr: usize) -> Option<PcbId> {
        let (_, hit) = self.locate(sem_addr);
        let node = hit?;
        pcbs.head(&self.descriptors[node.raw()].blocked)
    }

    fn recycle(&mut self, prev: AslId, node: AslId) {
        self.descriptors[prev.raw()].next = self.descriptors[node.raw()].next;
        self.descriptors[node.raw()].next = self.free;
        self.free = Some(node);
    }

    /// Iterates the live (non-sentinel) descriptors' semaphore
    /// addresses in ascending order, for invariant checking (spec §8
    /// "ASL well-formedness").
    pub fn active_addrs(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.descriptors[self.head.raw()].next;
        core::iter::from_fn(move || {
            let node = cur?;
            if self.descriptors[node.raw()].sem_addr == usize::MAX {
                return None;
            }
            cur = self.descriptors[node.raw()].next;
            Some(self.descriptors[node.raw()].sem_addr)
        })
    }
}

impl Default for Asl {
    fn default() -> Self {
        Self::new()
    }
}
