//! Nucleus SYSCALLs 1–8 (spec §4.5).
//!
//! Every handler here assumes the dispatcher has already advanced the
//! saved PC by one word and established `state.current`. A handler
//! either leaves `current` runnable (mutating `machine.saved_state_mut()`
//! directly, per the convention that a running process's register file
//! lives in the BIOS data page until it is snapshotted into its PCB)
//! or blocks/terminates it, in which case it must have already copied
//! the relevant saved state into the PCB before returning.

use crate::config::{device_sem_key, PSEUDO_CLOCK_INDEX};
use crate::machine::Machine;
use crate::nucleus::pcb::PcbId;
use crate::nucleus::state::KernelState;

/// What the dispatcher should do once a handler returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Resume `state.current` with whatever is now in
    /// `machine.saved_state()` (possibly just PC-advanced, possibly
    /// with `v0` set).
    ResumeCurrent,
    /// `state.current` is gone or blocked; enter the scheduler.
    Reschedule,
}

/// SYS1: CreateProcess. `state_addr` points to the initial `SavedState`
/// the caller built; `support` is the raw support-structure handle, or
/// `None`. Sets `v0` to 0 on success, -1 if the PCB pool is exhausted.
pub fn create_process<M: Machine>(
    state: &mut KernelState,
    machine: &mut M,
    state_addr: usize,
    support: Option<usize>,
) -> Outcome {
    let current = state.current.expect("SYS1 requires a current process");
    match state.pcbs.allocate() {
        Some(child) => {
            let pcb = state.pcbs.get_mut(child);
            pcb.state = machine.read_state(state_addr);
            pcb.support = support;
            state.pcbs.insert_child(current, child);
            state.pcbs.insert_tail(&mut state.ready_queue, child);
            state.process_count += 1;
            machine.saved_state_mut().set_v0(0);
        }
        None => {
            log::warn!("SYS1: PCB pool exhausted");
            machine.saved_state_mut().set_v0(-1);
        }
    }
    Outcome::ResumeCurrent
}

/// SYS2: TerminateProcess. Destroys the subtree rooted at `target`
/// (post-order: children first), releasing every PCB and adjusting
/// `process_count`/`soft_block_count`/the ASL as spec §5's
/// "Cancellation" rule requires. `target` is usually `state.current`;
/// the support level also calls this indirectly (SYS9) for the caller
/// itself.
pub fn terminate_process<M: Machine>(
    state: &mut KernelState,
    machine: &mut M,
    target: PcbId,
) -> Outcome {
    let now = machine.time_of_day();
    state.charge_current(now);
    destroy_subtree(state, machine, target);
    if state.current == Some(target) {
        state.current = None;
    }
    Outcome::Reschedule
}

/// Recursively tears down `id` and all its descendants, post-order.
fn destroy_subtree<M: Machine>(state: &mut KernelState, machine: &mut M, id: PcbId) {
    while let Some(child) = state.pcbs.remove_first_child(id) {
        destroy_subtree(state, machine, child);
    }
    detach_from_wherever_it_is(state, machine, id);
    state.pcbs.detach(id);
    state.pcbs.free(id);
    state.process_count = state
        .process_count
        .checked_sub(1)
        .expect("process_count must never go negative");
}

/// Removes `id` from the ready queue or its blocking semaphore queue,
/// whichever holds it, compensating the semaphore per spec §5: a
/// cancelled sync-semaphore waiter is counted as if it had been V'd
/// (the integer is incremented back), while a cancelled device-
/// semaphore waiter only decrements `soft_block_count` — the integer
/// is deliberately left one lower than the real waiter count (spec §9
/// Open Question 2; the eventual device interrupt is still credited).
fn detach_from_wherever_it_is<M: Machine>(state: &mut KernelState, machine: &mut M, id: PcbId) {
    if state.current == Some(id) {
        return;
    }
    if let Some(sem_addr) = state.pcbs.get(id).sem_addr {
        state.asl.remove_specific_blocked(&mut state.pcbs, id);
        if is_device_sem(sem_addr) {
            state.soft_block_count -= 1;
        } else {
            let value = machine.read_word(sem_addr) + 1;
            machine.write_word(sem_addr, value);
        }
        return;
    }
    state.pcbs.remove_specific(&mut state.ready_queue, id);
}

fn is_device_sem(sem_addr: usize) -> bool {
    sem_addr >= device_sem_key(0)
}

/// SYS3: Passeren (P). `sem_addr` is the physical address of the
/// caller-declared semaphore integer.
pub fn passeren<M: Machine>(state: &mut KernelState, machine: &mut M, sem_addr: usize) -> Outcome {
    let value = machine.read_word(sem_addr) - 1;
    machine.write_word(sem_addr, value);
    if value < 0 {
        let current = state.current.expect("SYS3 requires a current process");
        let now = machine.time_of_day();
        state.charge_current(now);
        state.pcbs.get_mut(current).state = *machine.saved_state();
        state
            .asl
            .block(&mut state.pcbs, sem_addr, current)
            .unwrap_or_else(|_| machine.panic("ASL pool exhausted"));
        state.current = None;
        Outcome::Reschedule
    } else {
        Outcome::ResumeCurrent
    }
}

/// SYS4: Verhogen (V).
pub fn verhogen<M: Machine>(state: &mut KernelState, machine: &mut M, sem_addr: usize) -> Outcome {
    let value = machine.read_word(sem_addr) + 1;
    machine.write_word(sem_addr, value);
    if value <= 0 {
        if let Some(waiter) = state.asl.unblock_one(&mut state.pcbs, sem_addr) {
            state.pcbs.insert_tail(&mut state.ready_queue, waiter);
        }
    }
    Outcome::ResumeCurrent
}

/// SYS5: WaitForIO. Blocks the caller on the device semaphore for
/// `(line, device, is_terminal_read)`; always suspends in practice
/// (the semaphore starts at 0 and only the interrupt handler V's it).
pub fn wait_for_io<M: Machine>(
    state: &mut KernelState,
    machine: &mut M,
    device_sem_index: usize,
) -> Outcome {
    let key = device_sem_key(device_sem_index);
    state.device_sems[device_sem_index] -= 1;
    if state.device_sems[device_sem_index] < 0 {
        let current = state.current.expect("SYS5 requires a current process");
        let now = machine.time_of_day();
        state.charge_current(now);
        state.pcbs.get_mut(current).state = *machine.saved_state();
        state
            .asl
            .block(&mut state.pcbs, key, current)
            .unwrap_or_else(|_| machine.panic("ASL pool exhausted"));
        state.current = None;
        state.soft_block_count += 1;
        Outcome::Reschedule
    } else {
        Outcome::ResumeCurrent
    }
}

/// SYS6: GetCPUTime. Returns accumulated CPU time plus the slice
/// elapsed since this dispatch, in `v0`.
pub fn get_cpu_time<M: Machine>(state: &KernelState, machine: &mut M) -> Outcome {
    let current = state.current.expect("SYS6 requires a current process");
    let elapsed = machine.time_of_day().saturating_sub(state.dispatch_tod);
    let total = state.pcbs.get(current).cpu_time + elapsed;
    machine.saved_state_mut().set_v0(total as i32);
    Outcome::ResumeCurrent
}

/// SYS7: WaitForClock. Always blocks the caller on the pseudo-clock
/// semaphore; the interrupt handler's interval-timer branch wakes
/// every waiter on the next 100 ms tick.
pub fn wait_for_clock<M: Machine>(state: &mut KernelState, machine: &mut M) -> Outcome {
    wait_for_io(state, machine, PSEUDO_CLOCK_INDEX)
}

/// SYS8: GetSupportData. Returns the caller's support-structure
/// handle in `v0`, or 0 if it has none.
pub fn get_support_data<M: Machine>(state: &KernelState, machine: &mut M) -> Outcome {
    let current = state.current.expect("SYS8 requires a current process");
    let value = state.pcbs.get(current).support.map(|h| h as i32).unwrap_or(0);
    machine.saved_state_mut().set_v0(value);
    Outcome::ResumeCurrent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;

    fn spawn_current(state: &mut KernelState) -> PcbId {
        let id = state.pcbs.allocate().unwrap();
        state.current = Some(id);
        state.process_count += 1;
        id
    }

    #[test]
    fn create_process_links_child_and_enqueues_ready() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let parent = spawn_current(&mut state);
        machine.stage_state(0x500, crate::machine::SavedState::default());
        let outcome = create_process(&mut state, &mut machine, 0x500, None);
        assert_eq!(outcome, Outcome::ResumeCurrent);
        assert_eq!(machine.saved_state().v0(), 0);
        assert_eq!(state.process_count, 2);
        assert!(state.pcbs.has_children(parent));
    }

    #[test]
    fn create_process_reports_pool_exhaustion() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let parent = spawn_current(&mut state);
        let _ = parent;
        while state.pcbs.allocate().is_some() {}
        let outcome = create_process(&mut state, &mut machine, 0x500, None);
        assert_eq!(outcome, Outcome::ResumeCurrent);
        assert_eq!(machine.saved_state().v0(), -1);
    }

    #[test]
    fn passeren_blocks_when_semaphore_goes_negative() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let current = spawn_current(&mut state);
        machine.write_word(0x1000, 0);
        let outcome = passeren(&mut state, &mut machine, 0x1000);
        assert_eq!(outcome, Outcome::Reschedule);
        assert_eq!(state.current, None);
        assert_eq!(state.pcbs.get(current).sem_addr, Some(0x1000));
    }

    #[test]
    fn passeren_resumes_when_semaphore_stays_nonnegative() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        spawn_current(&mut state);
        machine.write_word(0x1000, 1);
        let outcome = passeren(&mut state, &mut machine, 0x1000);
        assert_eq!(outcome, Outcome::ResumeCurrent);
        assert_eq!(machine.read_word(0x1000), 0);
    }

    #[test]
    fn verhogen_unblocks_one_waiter() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let blocked = state.pcbs.allocate().unwrap();
        machine.write_word(0x1000, -1);
        state.asl.block(&mut state.pcbs, 0x1000, blocked).unwrap();
        spawn_current(&mut state);
        let outcome = verhogen(&mut state, &mut machine, 0x1000);
        assert_eq!(outcome, Outcome::ResumeCurrent);
        assert_eq!(machine.read_word(0x1000), 0);
        assert_eq!(state.pcbs.head(&state.ready_queue), Some(blocked));
    }

    #[test]
    fn wait_for_io_increments_soft_block_count() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        spawn_current(&mut state);
        let outcome = wait_for_io(&mut state, &mut machine, 0);
        assert_eq!(outcome, Outcome::Reschedule);
        assert_eq!(state.soft_block_count, 1);
        assert_eq!(state.device_sems[0], -1);
    }

    #[test]
    fn get_cpu_time_adds_elapsed_slice() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let current = spawn_current(&mut state);
        state.pcbs.get_mut(current).cpu_time = 100;
        state.dispatch_tod = 10;
        machine.advance(55);
        let outcome = get_cpu_time(&state, &mut machine);
        assert_eq!(outcome, Outcome::ResumeCurrent);
        assert_eq!(machine.saved_state().v0(), 145);
    }

    #[test]
    fn get_support_data_returns_zero_when_none() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        spawn_current(&mut state);
        let outcome = get_support_data(&state, &mut machine);
        assert_eq!(outcome, Outcome::ResumeCurrent);
        assert_eq!(machine.saved_state().v0(), 0);
    }

    #[test]
    fn terminate_process_destroys_subtree_and_decrements_count() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let parent = spawn_current(&mut state);
        let child = state.pcbs.allocate().unwrap();
        state.pcbs.insert_child(parent, child);
        state.process_count += 1;
        let outcome = terminate_process(&mut state, &mut machine, parent);
        assert_eq!(outcome, Outcome::Reschedule);
        assert_eq!(state.process_count, 0);
        assert_eq!(state.current, None);
    }
}
