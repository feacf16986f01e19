//! The support level (spec §3-§5, §4.8-§4.10): everything that runs
//! above the nucleus proper — page fault handling, SYSCALLs 9-18, and
//! the delay daemon.

pub mod delay;
pub mod flash;
pub mod pager;
pub mod structure;
pub mod swap;
pub mod sync;
pub mod syscall;

use crate::machine::Machine;
use crate::nucleus::state::KernelState;
use delay::Adl;
use structure::{Asid, Pool as SupportPool};
use swap::SwapPool;

/// Everything the support level owns globally, alongside the
/// nucleus's own [`KernelState`] (spec §5's four mutexes plus the
/// swap pool and support-structure pool).
pub struct SupportState {
    pub structures: SupportPool,
    pub swap: SwapPool,
    pub adl: Adl,
}

impl SupportState {
    pub fn new() -> Self {
        SupportState {
            structures: SupportPool::new(),
            swap: SwapPool::new(),
            adl: Adl::new(),
        }
    }

    /// Initializes every mutex and semaphore the support level owns
    /// to its starting value (spec §3/§5: mutexes start unlocked, the
    /// master semaphore starts at 0 so the instantiator can join each
    /// U-Proc exactly once).
    pub fn init_sync_words<M: Machine>(&self, machine: &mut M) {
        sync::init(machine, crate::config::SWAP_POOL_MUTEX_ADDR);
        sync::init(machine, crate::config::ADL_MUTEX_ADDR);
        machine.write_word(crate::config::MASTER_SEM_ADDR, 0);
        for index in 0..crate::config::N_UPROC {
            for mutex in device_mutexes_for(index) {
                sync::init(machine, mutex);
            }
            machine.write_word(crate::config::priv_sem_addr(index), 0);
        }
    }

    /// Runs the page-fault handler installed in `asid`'s support
    /// structure (never returns — see [`pager::handle_page_fault`]).
    pub fn handle_page_fault<M: Machine>(&mut self, state: &mut KernelState, machine: &mut M, asid: Asid) -> ! {
        pager::handle_page_fault(state, machine, &mut self.structures, &mut self.swap, asid)
    }

    /// Runs the general-exception handler installed in `asid`'s
    /// support structure (never returns — see
    /// [`syscall::handle_general_exception`]).
    pub fn handle_general_exception<M: Machine>(&mut self, state: &mut KernelState, machine: &mut M, asid: Asid) -> ! {
        syscall::handle_general_exception(state, machine, self.structures.get_mut(asid), &mut self.adl)
    }

    /// Runs one delay-daemon wakeup (spec §4.10).
    pub fn delay_tick<M: Machine>(&mut self, state: &mut KernelState, machine: &mut M) {
        delay::tick(state, machine, &mut self.adl)
    }
}

impl Default for SupportState {
    fn default() -> Self {
        Self::new()
    }
}

fn device_mutexes_for(asid_index: usize) -> [usize; 5] {
    use crate::config::{device_mutex_addr, device_sem_index, terminal_transmitter_index};
    use crate::config::{DISK_LINE, FLASH_LINE, PRINTER_LINE, TERMINAL_LINE};
    [
        device_mutex_addr(device_sem_index(FLASH_LINE, asid_index)),
        device_mutex_addr(device_sem_index(DISK_LINE, asid_index)),
        device_mutex_addr(device_sem_index(PRINTER_LINE, asid_index)),
        device_mutex_addr(device_sem_index(TERMINAL_LINE, asid_index)),
        device_mutex_addr(terminal_transmitter_index(TERMINAL_LINE, asid_index)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;

    #[test]
    fn init_sync_words_leaves_every_mutex_unlocked() {
        let support = SupportState::new();
        let mut machine = MockMachine::new();
        support.init_sync_words(&mut machine);
        assert_eq!(machine.read_word(crate::config::SWAP_POOL_MUTEX_ADDR), 1);
        assert_eq!(machine.read_word(crate::config::ADL_MUTEX_ADDR), 1);
        assert_eq!(machine.read_word(crate::config::MASTER_SEM_ADDR), 0);
        for mutex in device_mutexes_for(3) {
            assert_eq!(machine.read_word(mutex), 1);
        }
    }
}
