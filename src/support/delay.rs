//! The Active Delay List and the delay daemon's per-wake body (spec
//! §4.10).
//!
//! The daemon itself is an ordinary kernel process whose installed
//! code is `loop { nucleus SYS7; tick(...) }` — the `SYS7` trap is a
//! real hardware suspension a production [`Machine`] resumes
//! transparently at the call site, exactly like any blocking syscall a
//! user-space program issues to its OS. Only [`tick`], the work done
//! between wakeups, is this crate's concern; it is unit-tested
//! directly rather than through a simulated trap/resume cycle.

use core::num::NonZeroU16;

use crate::config::{priv_sem_addr, ADL_MUTEX_ADDR, ADL_POOL_SIZE};
use crate::error::Error;
use crate::machine::Machine;
use crate::nucleus::state::KernelState;
use crate::nucleus::syscall::verhogen;
use crate::support::structure::Asid;
use crate::support::sync;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct AdlId(NonZeroU16);

impl AdlId {
    fn from_raw(raw: usize) -> Self {
        AdlId(NonZeroU16::new((raw + 1) as u16).expect("ADL_POOL_SIZE fits in u16"))
    }

    fn raw(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

struct Descriptor {
    wake_time: u64,
    owner: Option<Asid>,
    next: Option<AdlId>,
}

impl Descriptor {
    const fn empty() -> Self {
        Descriptor {
            wake_time: 0,
            owner: None,
            next: None,
        }
    }
}

const LOW_SENTINEL: usize = 0;
const HIGH_SENTINEL: usize = 1;

/// The Active Delay List: descriptors sorted ascending by wake time
/// between two sentinels (spec §4.10's ADL invariant).
pub struct Adl {
    descriptors: [Descriptor; ADL_POOL_SIZE],
    head: AdlId,
    free: Option<AdlId>,
}

impl Adl {
    pub fn new() -> Self {
        let mut descriptors = core::array::from_fn(|_| Descriptor::empty());
        descriptors[LOW_SENTINEL].wake_time = 0;
        descriptors[LOW_SENTINEL].next = Some(AdlId::from_raw(HIGH_SENTINEL));
        descriptors[HIGH_SENTINEL].wake_time = u64::MAX;
        descriptors[HIGH_SENTINEL].next = None;

        let mut free = None;
        for i in (2..ADL_POOL_SIZE).rev() {
            descriptors[i].next = free;
            free = Some(AdlId::from_raw(i));
        }

        Adl {
            descriptors,
            head: AdlId::from_raw(LOW_SENTINEL),
            free,
        }
    }

    /// Inserts a new descriptor for `owner`, waking at `wake_time`,
    /// keeping the list sorted. `Err` only if the pool (sized
    /// `N_UPROC + 2`, one per live U-Proc) is exhausted — this cannot
    /// happen if each ASID has at most one outstanding delay (spec
    /// §4.10's invariant), but SYS18 must still check.
    pub fn insert(&mut self, wake_time: u64, owner: Asid) -> Result<(), Error> {
        let mut prev = self.head;
        loop {
            let next = self.descriptors[prev.raw()].next.unwrap();
            if self.descriptors[next.raw()].wake_time > wake_time {
                break;
            }
            prev = next;
        }
        let node = self.free.ok_or(Error::DelayPoolExhausted)?;
        self.free = self.descriptors[node.raw()].next;
        self.descriptors[node.raw()] = Descriptor {
            wake_time,
            owner: Some(owner),
            next: self.descriptors[prev.raw()].next,
        };
        self.descriptors[prev.raw()].next = Some(node);
        Ok(())
    }

    /// Removes and returns the ASID of the earliest descriptor whose
    /// wake time is `<= now`, if any.
    pub fn pop_expired(&mut self, now: u64) -> Option<Asid> {
        let head_node = self.descriptors[self.head.raw()].next.unwrap();
        if self.descriptors[head_node.raw()].wake_time > now {
            return None;
        }
        let owner = self.descriptors[head_node.raw()].owner.take();
        let next = self.descriptors[head_node.raw()].next;
        self.descriptors[self.head.raw()].next = next;
        self.descriptors[head_node.raw()].next = self.free;
        self.free = Some(head_node);
        owner
    }

    /// Wake times in ascending order, for invariant checking (spec §8
    /// "ADL monotonicity").
    pub fn wake_times(&self) -> impl Iterator<Item = u64> + '_ {
        let mut cur = self.descriptors[self.head.raw()].next;
        core::iter::from_fn(move || {
            let node = cur?;
            if self.descriptors[node.raw()].wake_time == u64::MAX {
                return None;
            }
            cur = self.descriptors[node.raw()].next;
            Some(self.descriptors[node.raw()].wake_time)
        })
    }
}

impl Default for Adl {
    fn default() -> Self {
        Self::new()
    }
}

/// One delay-daemon wakeup's worth of work (spec §4.10 steps 2-4):
/// wakes every descriptor whose wake time has passed by V-ing its
/// owner's private semaphore — a real nucleus SYS4, since the sleeper
/// is genuinely ASL-blocked on it (spec §4.9 SYS18) — under the ADL
/// mutex.
pub fn tick<M: Machine>(state: &mut KernelState, machine: &mut M, adl: &mut Adl) {
    sync::acquire(machine, ADL_MUTEX_ADDR);
    let now = machine.time_of_day();
    while let Some(owner) = adl.pop_expired(now) {
        verhogen(state, machine, priv_sem_addr(owner.index()));
    }
    sync::release(machine, ADL_MUTEX_ADDR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;

    #[test]
    fn insert_keeps_ascending_order() {
        let mut adl = Adl::new();
        adl.insert(300, Asid::new(1).unwrap()).unwrap();
        adl.insert(100, Asid::new(2).unwrap()).unwrap();
        adl.insert(200, Asid::new(3).unwrap()).unwrap();
        assert_eq!(adl.wake_times().collect::<Vec<_>>(), vec![100, 200, 300]);
    }

    #[test]
    fn tick_wakes_only_expired_descriptors() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        sync::init(&mut machine, ADL_MUTEX_ADDR);
        let mut adl = Adl::new();
        let a1 = Asid::new(1).unwrap();
        let a2 = Asid::new(2).unwrap();
        adl.insert(100, a1).unwrap();
        adl.insert(500, a2).unwrap();
        machine.write_word(priv_sem_addr(a1.index()), -1);
        machine.write_word(priv_sem_addr(a2.index()), -1);
        machine.advance(200);

        tick(&mut state, &mut machine, &mut adl);

        assert_eq!(machine.read_word(priv_sem_addr(a1.index())), 0, "expired delay must be woken");
        assert_eq!(machine.read_word(priv_sem_addr(a2.index())), -1, "future delay must stay blocked");
        assert_eq!(adl.wake_times().collect::<Vec<_>>(), vec![500]);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let mut adl = Adl::new();
        let mut last = Err(Error::DelayPoolExhausted);
        for i in 0..(ADL_POOL_SIZE + 1) {
            last = adl.insert(i as u64, Asid::new(1).unwrap());
        }
        assert_eq!(last, Err(Error::DelayPoolExhausted));
    }
}
