//! The exception dispatcher (spec §4.4): the single entry point the
//! hardware vector jumps to, routing on `exception_code()`.

use crate::machine::{cause, ExceptionCode, Machine};
use crate::nucleus::passup::{pass_up_or_die, ExceptIndex, SupportContext};
use crate::nucleus::state::KernelState;
use crate::nucleus::{interrupt, syscall};

/// Runs one exception to completion. Never returns — every path ends
/// in a resume, a reschedule, or a pass-up/termination.
///
/// `support` resolves a PCB's raw support handle to whatever
/// implements [`SupportContext`]; it is only consulted on non-nucleus
/// exceptions.
pub fn run<M, S>(state: &mut KernelState, machine: &mut M, support: impl FnMut(usize) -> S) -> !
where
    M: Machine,
    S: SupportContext,
{
    match machine.exception_code() {
        ExceptionCode::Interrupt => interrupt::handle(state, machine),
        ExceptionCode::TlbInvalid | ExceptionCode::TlbModification => {
            pass_up_or_die(state, machine, ExceptIndex::PageFault, support)
        }
        ExceptionCode::Syscall => dispatch_syscall(state, machine, support),
        ExceptionCode::ReservedInstruction | ExceptionCode::Other(_) => {
            pass_up_or_die(state, machine, ExceptIndex::General, support)
        }
    }
}

/// A SYSCALL exception. Numbers 1..=8 are nucleus primitives, callable
/// only from kernel mode; a user-mode process invoking one is rewritten
/// to a reserved-instruction program trap (spec §4.4). Numbers 9+ are
/// the support level's own SYSCALLs and are always passed up — the
/// nucleus does not implement them.
fn dispatch_syscall<M, S>(
    state: &mut KernelState,
    machine: &mut M,
    support: impl FnMut(usize) -> S,
) -> !
where
    M: Machine,
    S: SupportContext,
{
    let trapped_in_user_mode = machine.saved_state().is_user_mode();
    let pc = machine.saved_state().pc;
    machine.saved_state_mut().pc = pc.wrapping_add(4);
    let number = machine.saved_state().a(0) as i32;

    if trapped_in_user_mode && (1..=8).contains(&number) {
        machine.saved_state_mut().cause = cause::RESERVED_INSTRUCTION;
        return pass_up_or_die(state, machine, ExceptIndex::General, support);
    }
    if trapped_in_user_mode {
        return pass_up_or_die(state, machine, ExceptIndex::General, support);
    }

    let outcome = match number {
        1 => {
            let state_addr = machine.saved_state().a(1) as usize;
            let support_handle = match machine.saved_state().a(2) {
                0 => None,
                raw => Some(raw as usize),
            };
            syscall::create_process(state, machine, state_addr, support_handle)
        }
        2 => {
            let target = state.current.expect("SYS2 requires a current process");
            syscall::terminate_process(state, machine, target)
        }
        3 => syscall::passeren(state, machine, machine.saved_state().a(1) as usize),
        4 => syscall::verhogen(state, machine, machine.saved_state().a(1) as usize),
        5 => {
            let line = machine.saved_state().a(1) as usize;
            let device = machine.saved_state().a(2) as usize;
            let is_terminal_read = machine.saved_state().a(3) != 0;
            // Receiver is the base index; a terminal transmitter is
            // offset by DEVICES_PER_LINE (spec §3, §4.5).
            let index = if line == crate::config::TERMINAL_LINE && !is_terminal_read {
                crate::config::terminal_transmitter_index(line, device)
            } else {
                crate::config::device_sem_index(line, device)
            };
            syscall::wait_for_io(state, machine, index)
        }
        6 => syscall::get_cpu_time(state, machine),
        7 => syscall::wait_for_clock(state, machine),
        8 => syscall::get_support_data(state, machine),
        other => machine.panic(&alloc_free_panic_message(other)),
    };

    match outcome {
        syscall::Outcome::ResumeCurrent => {
            let saved = *machine.saved_state();
            machine.load_state(&saved)
        }
        syscall::Outcome::Reschedule => crate::nucleus::scheduler::schedule(state, machine),
    }
}

/// A stack-free message builder: this crate is `no_std`, so a format
/// string here would need `alloc`. Kernel-mode code issuing an
/// undefined nucleus SYSCALL number is itself a kernel bug, so the
/// exact number is not worth plumbing through `core::fmt` machinery —
/// the fixed string is enough to find it in a debugger.
fn alloc_free_panic_message(_number: i32) -> &'static str {
    "unknown nucleus SYSCALL number issued from kernel mode"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;
    use crate::machine::SavedState;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    struct NoSupport;
    impl SupportContext for NoSupport {
        fn except_state_slot(&mut self, _index: ExceptIndex) -> &mut SavedState {
            unreachable!("test never resolves a support handle")
        }
        fn resume_context(&self, _index: ExceptIndex) -> SavedState {
            unreachable!("test never resolves a support handle")
        }
    }

    #[test]
    fn kernel_mode_sys6_resumes_with_cpu_time_in_v0() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let current = state.pcbs.allocate().unwrap();
        state.current = Some(current);
        state.process_count = 1;
        machine.saved_state_mut().cause = cause::SYSCALL;
        machine.saved_state_mut().regs[crate::machine::reg::A0] = 6;
        let result = catch_unwind(AssertUnwindSafe(|| run(&mut state, &mut machine, |h| {
            let _ = h;
            NoSupport
        })));
        assert!(result.is_err());
        assert_eq!(machine.saved_state().v0(), 0);
    }

    #[test]
    fn user_mode_sys1_is_rewritten_to_reserved_instruction_and_dies() {
        let mut state = KernelState::new();
        let mut machine = MockMachine::new();
        let current = state.pcbs.allocate().unwrap();
        state.current = Some(current);
        state.process_count = 1;
        machine.saved_state_mut().cause = cause::SYSCALL;
        machine.saved_state_mut().status = crate::machine::cpu_mode::USER;
        machine.saved_state_mut().regs[crate::machine::reg::A0] = 1;
        let result = catch_unwind(AssertUnwindSafe(|| run(&mut state, &mut machine, |h| {
            let _ = h;
            NoSupport
        })));
        assert!(result.is_err());
        assert_eq!(state.process_count, 0);
    }
}
