//! A two-level educational microkernel core: a nucleus (process
//! control, scheduling, the eight base SYSCALLs) and a support level
//! built on top of it (virtual memory via a software TLB pager, ten
//! more SYSCALLs, a delay facility) — spec §1-§5.
//!
//! This crate is the kernel logic only. The machine it runs on
//! (`load`/`store` of CPU state, the TLB, device registers, timers) is
//! an external collaborator supplied through the [`machine::Machine`]
//! trait (spec §6); an embedder wires a concrete implementation to a
//! real or simulated MIPS/uMPS3 target, installs this crate's handler
//! entry points in the machine's exception vector and each support
//! structure's pass-up context, and drives the boot sequence below.

// `test-util` pulls in `machine::mock`, which is a host-only `std` test
// double; linking `std` has to follow the same gate or the crate is
// genuinely `no_std` (and `mock` fails to resolve `std::`) whenever an
// integration test under `tests/` builds this crate as an ordinary
// dependency with that feature on.
#![cfg_attr(not(any(test, feature = "test-util")), no_std)]

pub mod config;
pub mod error;
pub mod logger;
pub mod machine;
pub mod nucleus;
pub mod prelude;
pub mod support;

use machine::Machine;
use nucleus::state::KernelState;
use support::structure::{Asid, ExceptContext};
use support::SupportState;

/// Where a freshly created U-Proc's three entry points live: its own
/// initial state, and the two addresses its support structure's
/// pass-up contexts resume into (spec §6's pass-up vector page, one
/// instance per U-Proc rather than one machine-wide pair, since each
/// U-Proc gets its own pair of handler stacks).
pub struct UProcBoot {
    pub initial_state_addr: usize,
    pub page_fault_handler: ExceptContext,
    pub general_handler: ExceptContext,
}

/// Everything this crate owns at boot: the nucleus's and the support
/// level's global state (spec §3, §5).
pub struct Kernel {
    pub nucleus: KernelState,
    pub support: SupportState,
}

impl Kernel {
    pub fn new() -> Self {
        Kernel {
            nucleus: KernelState::new(),
            support: SupportState::new(),
        }
    }

    /// The boot sequence (spec §6's instantiator): initializes every
    /// mutex and semaphore, spawns the delay daemon and `N_UPROC`
    /// user processes, and returns with everything ready-queued. This
    /// runs before scheduling begins — it directly builds PCBs and
    /// support structures rather than issuing SYS1 traps, the same way
    /// a real kernel's boot code runs with interrupts disabled, ahead
    /// of the first call into the scheduler.
    ///
    /// The caller must follow this with
    /// [`nucleus::scheduler::schedule`] to hand off to the first
    /// ready process; this function does not dispatch anything.
    pub fn instantiate<M: Machine>(
        &mut self,
        machine: &mut M,
        delay_daemon_state_addr: usize,
        uprocs: &[UProcBoot; config::N_UPROC],
    ) {
        self.support.init_sync_words(machine);

        let daemon = self.nucleus.pcbs.allocate().expect("boot has the full PCB pool available");
        self.nucleus.pcbs.get_mut(daemon).state = machine.read_state(delay_daemon_state_addr);
        self.nucleus.pcbs.insert_tail(&mut self.nucleus.ready_queue, daemon);
        self.nucleus.process_count += 1;

        for (i, boot) in uprocs.iter().enumerate() {
            let asid = Asid::new((i + 1) as u8).expect("uprocs has exactly N_UPROC entries");
            let child = self.nucleus.pcbs.allocate().expect("boot has the full PCB pool available");
            self.nucleus.pcbs.get_mut(child).state = machine.read_state(boot.initial_state_addr);
            self.nucleus.pcbs.get_mut(child).support = Some(asid.get() as usize);
            self.nucleus.pcbs.insert_tail(&mut self.nucleus.ready_queue, child);
            self.nucleus.process_count += 1;

            let structure = self.support.structures.get_mut(asid);
            structure.except_context[support::structure::ExceptKind::PageFault as usize] = boot.page_fault_handler;
            structure.except_context[support::structure::ExceptKind::General as usize] = boot.general_handler;
            structure.owner = Some(child);
        }
    }

    /// Runs one hardware exception to completion (spec §4.4). Never
    /// returns: the hardware re-enters this on the next trap.
    pub fn dispatch<M: Machine>(&mut self, machine: &mut M) -> ! {
        let structures = &mut self.support.structures;
        nucleus::dispatch::run(&mut self.nucleus, machine, move |handle| {
            structures.get_mut(Asid::new(handle as u8).expect("PCB support handles are always valid ASIDs"))
        })
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
