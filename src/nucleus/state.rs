//! The nucleus's global state: everything spec §3 calls out as a
//! "nucleus global". Per Design Note "Static globals mutated from
//! handlers", this is a single aggregate handed out as `&mut
//! KernelState` for the duration of one exception's handling — there
//! is deliberately no interior mutability or lock type here, since the
//! model (spec §5) is one hardware execution context, non-reentrant.

use crate::config::DEVICE_SEM_COUNT;
use crate::nucleus::asl::Asl;
use crate::nucleus::pcb::{PcbId, PcbQueue, Pool as PcbPool};

pub struct KernelState {
    pub pcbs: PcbPool,
    pub asl: Asl,
    pub ready_queue: PcbQueue,
    pub current: Option<PcbId>,
    /// Time of day at which `current` was last dispatched; used to
    /// compute the CPU time slice to charge on its next suspension.
    pub dispatch_tod: u64,
    pub process_count: u32,
    pub soft_block_count: u32,
    pub device_sems: [i32; DEVICE_SEM_COUNT],
}

impl KernelState {
    pub fn new() -> Self {
        KernelState {
            pcbs: PcbPool::new(),
            asl: Asl::new(),
            ready_queue: PcbQueue::new(),
            current: None,
            dispatch_tod: 0,
            process_count: 0,
            soft_block_count: 0,
            device_sems: [0; DEVICE_SEM_COUNT],
        }
    }

    /// Adds the time elapsed since `dispatch_tod` to `current`'s
    /// accumulated CPU time. Called whenever the running process is
    /// about to stop running (block, terminate, preempt).
    pub fn charge_current(&mut self, now: u64) {
        if let Some(current) = self.current {
            let elapsed = now.saturating_sub(self.dispatch_tod);
            self.pcbs.get_mut(current).cpu_time += elapsed;
        }
    }
}

impl Default for KernelState {
    fn default() -> Self {
        Self::new()
    }
}
