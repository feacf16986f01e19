//! The round-robin scheduler (spec §4.3).

use crate::config::QUANTUM_US;
use crate::machine::Machine;
use crate::nucleus::state::KernelState;

/// Selects the next process to run and resumes it, halts the machine,
/// idles it, or panics on deadlock — per spec §4.3's four-way choice.
/// This never returns: every branch ends either in
/// [`Machine::load_state`], [`Machine::halt`],
/// [`Machine::wait_for_interrupt`], or [`Machine::panic`].
pub fn schedule<M: Machine>(state: &mut KernelState, machine: &mut M) -> ! {
    match state.pcbs.remove_head(&mut state.ready_queue) {
        Some(id) => {
            state.current = Some(id);
            state.dispatch_tod = machine.time_of_day();
            machine.load_local_timer(QUANTUM_US);
            let saved = state.pcbs.get(id).state;
            machine.load_state(&saved)
        }
        None if state.process_count == 0 => machine.halt(),
        None if state.soft_block_count > 0 => {
            machine.set_interrupts_enabled(true);
            machine.wait_for_interrupt()
        }
        None => machine.panic("deadlock: ready queue empty with live, non-blocked processes"),
    }
}
