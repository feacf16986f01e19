//! Pass-up-or-die (spec §4.7).
//!
//! Called by the dispatcher for any non-nucleus exception taken by a
//! U-Proc: a TLB exception (page fault) or a program trap. Either
//! forwards into the support level by loading its pass-up context, or
//! kills the offending process if it has none.

use crate::machine::Machine;
use crate::nucleus::state::KernelState;
use crate::nucleus::syscall;

/// Which of a support structure's two saved contexts an exception
/// belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptIndex {
    PageFault = 0,
    General = 1,
}

/// The two fields a support structure stores per exception kind: where
/// to copy the saved state, and where to resume (spec §3's "pass-up
/// contexts").
pub trait SupportContext {
    fn except_state_slot(&mut self, index: ExceptIndex) -> &mut crate::machine::SavedState;
    fn resume_context(&self, index: ExceptIndex) -> crate::machine::SavedState;
}

/// Forwards the current exception to the support level, or
/// tree-terminates the current process if it has no support structure.
/// `support` resolves a raw support handle to the structure that holds
/// the two exception contexts; it is generic so the nucleus need not
/// know the support level's concrete layout.
pub fn pass_up_or_die<M, S>(
    state: &mut KernelState,
    machine: &mut M,
    index: ExceptIndex,
    mut support: impl FnMut(usize) -> S,
) -> !
where
    M: Machine,
    S: SupportContext,
{
    let current = state.current.expect("pass-up-or-die requires a current process");
    match state.pcbs.get(current).support {
        Some(handle) => {
            let mut support = support(handle);
            *support.except_state_slot(index) = *machine.saved_state();
            let resume = support.resume_context(index);
            machine.load_state(&resume)
        }
        None => {
            log::warn!("terminating process with no support structure after an unhandled exception");
            syscall::terminate_process(state, machine, current);
            crate::nucleus::scheduler::schedule(state, machine)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;
    use crate::machine::SavedState;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    struct FakeSupport {
        except_state: [SavedState; 2],
        resume: [SavedState; 2],
    }

    impl SupportContext for FakeSupport {
        fn except_state_slot(&mut self, index: ExceptIndex) -> &mut SavedState {
            &mut self.except_state[index as usize]
        }
        fn resume_context(&self, index: ExceptIndex) -> SavedState {
            self.resume[index as usize]
        }
    }

    #[test]
    fn dies_without_a_support_structure() {
        let mut state = KernelState::new();
        let current = state.pcbs.allocate().unwrap();
        state.current = Some(current);
        state.process_count = 1;
        let mut machine = MockMachine::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            pass_up_or_die(&mut state, &mut machine, ExceptIndex::General, |_| {
                FakeSupport {
                    except_state: [SavedState::default(); 2],
                    resume: [SavedState::default(); 2],
                }
            })
        }));
        assert!(result.is_err());
        assert_eq!(state.process_count, 0);
    }

    #[test]
    fn forwards_to_support_resume_context_when_present() {
        let mut state = KernelState::new();
        let current = state.pcbs.allocate().unwrap();
        state.pcbs.get_mut(current).support = Some(7);
        state.current = Some(current);
        state.process_count = 1;
        let mut machine = MockMachine::new();
        let mut expected_resume = SavedState::default();
        expected_resume.pc = 0xdead;
        let result = catch_unwind(AssertUnwindSafe(|| {
            pass_up_or_die(&mut state, &mut machine, ExceptIndex::PageFault, |handle| {
                assert_eq!(handle, 7);
                FakeSupport {
                    except_state: [SavedState::default(); 2],
                    resume: [expected_resume, SavedState::default()],
                }
            })
        }));
        assert!(result.is_err());
        assert_eq!(machine.saved_state().pc, 0xdead);
    }
}
