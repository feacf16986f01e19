//! Interrupt handler (spec §4.6). Dispatches on the highest-priority
//! pending line: 1 is the local quantum timer, 2 is the interval timer
//! / pseudo-clock, 3..=7 are device lines.

use crate::config::{
    device_sem_index, device_sem_key, terminal_transmitter_index, PSEUDO_CLOCK_INDEX,
    PSEUDO_CLOCK_US, TERMINAL_LINE,
};
use crate::machine::{command, Machine};
use crate::nucleus::scheduler;
use crate::nucleus::state::KernelState;

/// Services the highest-priority pending interrupt line and never
/// returns: every path ends in [`Machine::load_state`] (resume) or
/// [`scheduler::schedule`].
pub fn handle<M: Machine>(state: &mut KernelState, machine: &mut M) -> ! {
    match machine.highest_priority_pending_interrupt_line() {
        Some(1) => handle_local_timer(state, machine),
        Some(2) => handle_interval_timer(state, machine),
        Some(line @ 3..=7) => handle_device(state, machine, line),
        _ => machine.panic("interrupt handler invoked with no pending line"),
    }
}

/// Line 1: the current process's quantum expired. Always reschedules;
/// panics if there is no current process (spec §7).
fn handle_local_timer<M: Machine>(state: &mut KernelState, machine: &mut M) -> ! {
    match state.current {
        Some(current) => {
            let now = machine.time_of_day();
            state.pcbs.get_mut(current).state = *machine.saved_state();
            state.charge_current(now);
            state.pcbs.insert_tail(&mut state.ready_queue, current);
            state.current = None;
            scheduler::schedule(state, machine)
        }
        None => machine.panic("local timer interrupt with no current process"),
    }
}

/// Line 2: the 100 ms interval tick. Reloads the timer, wakes every
/// pseudo-clock waiter, and zeroes the pseudo-clock semaphore.
fn handle_interval_timer<M: Machine>(state: &mut KernelState, machine: &mut M) -> ! {
    machine.load_interval_timer(PSEUDO_CLOCK_US);
    let key = device_sem_key(PSEUDO_CLOCK_INDEX);
    while let Some(waiter) = state.asl.unblock_one(&mut state.pcbs, key) {
        state.pcbs.insert_tail(&mut state.ready_queue, waiter);
        state.soft_block_count -= 1;
    }
    state.device_sems[PSEUDO_CLOCK_INDEX] = 0;
    resume_current_or_reschedule(state, machine)
}

/// Lines 3..=7: one device on this line has an unacknowledged
/// interrupt. Finds the lowest-numbered such device, acknowledges it,
/// wakes its one waiter with the device status in `v0`, and resumes
/// the interrupted process with its *remaining* quantum.
fn handle_device<M: Machine>(state: &mut KernelState, machine: &mut M, line: usize) -> ! {
    let bitmap = machine.pending_devices(line);
    let device = (0..machine.devices_per_line())
        .find(|d| bitmap & (1 << d) != 0)
        .expect("pending line must have at least one pending device");

    let (sem_index, status) = acknowledge(machine, line, device);
    let key = device_sem_key(sem_index);
    state.device_sems[sem_index] += 1;
    if let Some(waiter) = state.asl.unblock_one(&mut state.pcbs, key) {
        state.pcbs.get_mut(waiter).state.set_v0(status as i32);
        state.pcbs.insert_tail(&mut state.ready_queue, waiter);
        state.soft_block_count -= 1;
    }
    resume_current_or_reschedule(state, machine)
}

/// Acknowledges the interrupting device, returning its device-semaphore
/// index and the status that caused the interrupt. Terminals reuse
/// their register bank as `{recv_status, recv_command, transm_status,
/// transm_command}`; a non-zero transmitter status means this
/// interrupt is the transmitter's, not the receiver's (spec §4.6).
fn acknowledge<M: Machine>(machine: &mut M, line: usize, device: usize) -> (usize, u32) {
    if line == TERMINAL_LINE {
        let transmitter_status = machine.device_registers(line, device).data0;
        if transmitter_status != 0 {
            machine.device_registers_mut(line, device).data1 = command::ACK;
            return (terminal_transmitter_index(line, device), transmitter_status);
        }
    }
    let status = machine.device_registers(line, device).status;
    machine.device_registers_mut(line, device).command = command::ACK;
    (device_sem_index(line, device), status)
}

fn resume_current_or_reschedule<M: Machine>(state: &mut KernelState, machine: &mut M) -> ! {
    match state.current {
        Some(_) => {
            let saved = *machine.saved_state();
            machine.load_state(&saved)
        }
        None => scheduler::schedule(state, machine),
    }
}
