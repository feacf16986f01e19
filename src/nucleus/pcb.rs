//! Process control blocks, the PCB pool, process queues, and the
//! process tree (spec §3, §4.1).
//!
//! Every PCB lives in a fixed-size arena (`[Pcb; N_PROC]`); queues and
//! the sibling tree are expressed as index links inside the arena
//! rather than pointers, per the "Pointer-based intrusive queues and
//! trees" design note. `PcbId` is 1-based so that `Option<PcbId>` is
//! niche-optimized and a zeroed `Pcb` has no dangling links.

use core::num::NonZeroU16;

use crate::config::N_PROC;
use crate::machine::SavedState;

/// An index into the PCB arena. 1-based: raw index `i` is stored as
/// `i + 1` so that `Option<PcbId>` costs nothing extra.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PcbId(NonZeroU16);

impl PcbId {
    fn from_raw(raw: usize) -> Self {
        PcbId(NonZeroU16::new((raw + 1) as u16).expect("N_PROC fits in u16"))
    }

    fn raw(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// One process control block.
#[derive(Debug)]
pub struct Pcb {
    pub state: SavedState,
    /// Accumulated CPU time, in the machine's tick unit, across all
    /// dispatches of this process (spec §4.5 SYS6).
    pub cpu_time: u64,
    /// Non-null iff this PCB is on some semaphore's blocked queue.
    pub sem_addr: Option<usize>,
    /// Debug-only identity, stable across reuse epochs; not used for
    /// any kernel decision. Supplemented from the original `pcb_PTR`
    /// debug builds (see SPEC_FULL.md §3).
    pub pid: u32,
    /// A handle into a support-level structure; `None` for kernel-only
    /// processes (e.g. the instantiator, the delay daemon).
    pub support: Option<usize>,

    queue_next: Option<PcbId>,
    queue_prev: Option<PcbId>,
    parent: Option<PcbId>,
    first_child: Option<PcbId>,
    next_sibling: Option<PcbId>,
    prev_sibling: Option<PcbId>,
    allocated: bool,
}

impl Pcb {
    const fn empty() -> Self {
        Pcb {
            state: SavedState {
                entry_hi: 0,
                cause: 0,
                status: 0,
                pc: 0,
                regs: [0; 29],
            },
            cpu_time: 0,
            sem_addr: None,
            pid: 0,
            support: None,
            queue_next: None,
            queue_prev: None,
            parent: None,
            first_child: None,
            next_sibling: None,
            prev_sibling: None,
            allocated: false,
        }
    }

    fn reset(&mut self) {
        *self = Pcb::empty();
    }
}

/// A FIFO queue of PCBs: just a tail pointer, per spec §3 ("Empty
/// queue is represented by the absence of a tail").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PcbQueue {
    tail: Option<PcbId>,
}

impl PcbQueue {
    pub const fn new() -> Self {
        PcbQueue { tail: None }
    }
}

/// Fixed-size pool of `N_PROC` process descriptors plus the free list
/// and the bookkeeping ([`Pool::allocate`]/[`Pool::free`]) needed to
/// recycle them.
pub struct Pool {
    pcbs: [Pcb; N_PROC],
    free: PcbQueue,
    next_pid: u32,
}

impl Pool {
    pub fn new() -> Self {
        let mut pcbs = core::array::from_fn(|_| Pcb::empty());
        let mut free = PcbQueue::default();
        for i in 0..N_PROC {
            Self::insert_tail_raw(&mut pcbs, &mut free, PcbId::from_raw(i));
        }
        Pool {
            pcbs,
            free,
            next_pid: 1,
        }
    }

    pub fn get(&self, id: PcbId) -> &Pcb {
        &self.pcbs[id.raw()]
    }

    pub fn get_mut(&mut self, id: PcbId) -> &mut Pcb {
        &mut self.pcbs[id.raw()]
    }

    /// Allocates a PCB with every field reset, or `None` if the pool
    /// of `N_PROC` slots is exhausted (spec §4.1).
    pub fn allocate(&mut self) -> Option<PcbId> {
        let id = Self::remove_head_raw(&mut self.pcbs, &mut self.free)?;
        let pid = self.next_pid;
        self.next_pid += 1;
        let pcb = self.get_mut(id);
        pcb.reset();
        pcb.allocated = true;
        pcb.pid = pid;
        Some(id)
    }

    /// Returns a PCB to the free list. The caller must have already
    /// removed it from any queue and detached it from the tree.
    pub fn free(&mut self, id: PcbId) {
        debug_assert!(self.get(id).allocated, "double free of a PCB");
        self.get_mut(id).allocated = false;
        Self::insert_tail_raw(&mut self.pcbs, &mut self.free, id);
    }

    pub fn is_empty(&self, queue: &PcbQueue) -> bool {
        queue.tail.is_none()
    }

    pub fn head(&self, queue: &PcbQueue) -> Option<PcbId> {
        queue.tail.map(|tail| self.get(tail).queue_next.unwrap())
    }

    pub fn insert_tail(&mut self, queue: &mut PcbQueue, id: PcbId) {
        Self::insert_tail_raw(&mut self.pcbs, queue, id);
    }

    pub fn remove_head(&mut self, queue: &mut PcbQueue) -> Option<PcbId> {
        Self::remove_head_raw(&mut self.pcbs, queue)
    }

    /// Removes `id` from `queue` if present, returning it. May
    /// traverse the whole queue (spec §4.1: O(1) except this one).
    pub fn remove_specific(&mut self, queue: &mut PcbQueue, id: PcbId) -> Option<PcbId> {
        let tail = queue.tail?;
        let mut cursor = Self::get_raw(&self.pcbs, tail).queue_next.unwrap();
        loop {
            if cursor == id {
                Self::unlink_raw(&mut self.pcbs, queue, tail, cursor);
                return Some(cursor);
            }
            if cursor == tail {
                return None;
            }
            cursor = Self::get_raw(&self.pcbs, cursor).queue_next.unwrap();
        }
    }

    fn get_raw(pcbs: &[Pcb; N_PROC], id: PcbId) -> &Pcb {
        &pcbs[id.raw()]
    }

    fn insert_tail_raw(pcbs: &mut [Pcb; N_PROC], queue: &mut PcbQueue, id: PcbId) {
        match queue.tail {
            None => {
                pcbs[id.raw()].queue_next = Some(id);
                pcbs[id.raw()].queue_prev = Some(id);
            }
            Some(tail) => {
                let head = pcbs[tail.raw()].queue_next.unwrap();
                pcbs[tail.raw()].queue_next = Some(id);
                pcbs[id.raw()].queue_prev = Some(tail);
                pcbs[id.raw()].queue_next = Some(head);
                pcbs[head.raw()].queue_prev = Some(id);
            }
        }
        queue.tail = Some(id);
    }

    fn remove_head_raw(pcbs: &mut [Pcb; N_PROC], queue: &mut PcbQueue) -> Option<PcbId> {
        let tail = queue.tail?;
        let head = pcbs[tail.raw()].queue_next.unwrap();
        Self::unlink_raw(pcbs, queue, tail, head);
        Some(head)
    }

    fn unlink_raw(pcbs: &mut [Pcb; N_PROC], queue: &mut PcbQueue, tail: PcbId, id: PcbId) {
        if tail == id && pcbs[id.raw()].queue_next == Some(id) {
            // sole element
            queue.tail = None;
        } else {
            let prev = pcbs[id.raw()].queue_prev.unwrap();
            let next = pcbs[id.raw()].queue_next.unwrap();
            pcbs[prev.raw()].queue_next = Some(next);
            pcbs[next.raw()].queue_prev = Some(prev);
            if tail == id {
                queue.tail = Some(prev);
            }
        }
        pcbs[id.raw()].queue_next = None;
        pcbs[id.raw()].queue_prev = None;
    }

    // --- process tree ---

    pub fn has_children(&self, id: PcbId) -> bool {
        self.get(id).first_child.is_some()
    }

    pub fn parent(&self, id: PcbId) -> Option<PcbId> {
        self.get(id).parent
    }

    /// Links `child` as a new child of `parent`, at the head of its
    /// sibling list.
    pub fn insert_child(&mut self, parent: PcbId, child: PcbId) {
        let old_first = self.get(parent).first_child;
        self.get_mut(child).parent = Some(parent);
        self.get_mut(child).next_sibling = old_first;
        self.get_mut(child).prev_sibling = None;
        if let Some(old_first) = old_first {
            self.get_mut(old_first).prev_sibling = Some(child);
        }
        self.get_mut(parent).first_child = Some(child);
    }

    pub fn remove_first_child(&mut self, parent: PcbId) -> Option<PcbId> {
        let child = self.get(parent).first_child?;
        self.detach(child);
        Some(child)
    }

    /// Removes `child` from its parent's sibling list and clears its
    /// tree links, returning it. `None` if it has no parent.
    pub fn detach(&mut self, child: PcbId) -> Option<PcbId> {
        let parent = self.get(child).parent?;
        let prev = self.get(child).prev_sibling;
        let next = self.get(child).next_sibling;
        match prev {
            Some(prev) => self.get_mut(prev).next_sibling = next,
            None => self.get_mut(parent).first_child = next,
        }
        if let Some(next) = next {
            self.get_mut(next).prev_sibling = prev;
        }
        let pcb = self.get_mut(child);
        pcb.parent = None;
        pcb.next_sibling = None;
        pcb.prev_sibling = None;
        Some(child)
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_exhausts_after_n_proc() {
        let mut pool = Pool::new();
        let mut ids = Vec::new();
        for _ in 0..N_PROC {
            ids.push(pool.allocate().expect("pool should have N_PROC slots"));
        }
        assert!(pool.allocate().is_none());
        pool.free(ids.pop().unwrap());
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn fifo_queue_order() {
        let mut pool = Pool::new();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        let mut q = PcbQueue::default();
        pool.insert_tail(&mut q, a);
        pool.insert_tail(&mut q, b);
        pool.insert_tail(&mut q, c);
        assert_eq!(pool.remove_head(&mut q), Some(a));
        assert_eq!(pool.remove_head(&mut q), Some(b));
        assert_eq!(pool.remove_head(&mut q), Some(c));
        assert!(pool.is_empty(&q));
    }

    #[test]
    fn remove_specific_from_middle() {
        let mut pool = Pool::new();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        let mut q = PcbQueue::default();
        pool.insert_tail(&mut q, a);
        pool.insert_tail(&mut q, b);
        pool.insert_tail(&mut q, c);
        assert_eq!(pool.remove_specific(&mut q, b), Some(b));
        assert_eq!(pool.remove_head(&mut q), Some(a));
        assert_eq!(pool.remove_head(&mut q), Some(c));
        assert!(pool.is_empty(&q));
    }

    #[test]
    fn tree_parent_child_symmetry() {
        let mut pool = Pool::new();
        let parent = pool.allocate().unwrap();
        let c1 = pool.allocate().unwrap();
        let c2 = pool.allocate().unwrap();
        pool.insert_child(parent, c1);
        pool.insert_child(parent, c2);
        assert!(pool.has_children(parent));
        assert_eq!(pool.parent(c1), Some(parent));
        let first = pool.remove_first_child(parent).unwrap();
        assert_eq!(first, c2);
        let second = pool.remove_first_child(parent).unwrap();
        assert_eq!(second, c1);
        assert!(!pool.has_children(parent));
    }
}
