//! Property tests for the quantified invariants named in spec §8:
//! semaphore algebra (a P/V pair's net effect on the integer always
//! matches the ASL's blocked-queue length), PCB-pool conservation
//! (the pool never hands out more than `N_PROC` live ids at once, and
//! every freed id becomes available again), and ASL well-formedness
//! (live descriptors stay sorted ascending by address and within the
//! pool's capacity). The first two are `quickcheck` properties, the
//! last a `proptest` one, matching this crate's declared test tooling.

use proptest::prelude::*;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

use pandos_core::config::N_PROC;
use pandos_core::machine::mock::MockMachine;
use pandos_core::machine::Machine;
use pandos_core::nucleus::asl::Asl;
use pandos_core::nucleus::pcb::Pool as PcbPool;
use pandos_core::nucleus::state::KernelState;
use pandos_core::nucleus::syscall::{passeren, verhogen};

const SEM_ADDR: usize = 0x4000;

/// Caps a quickcheck-generated op sequence to something that can't
/// exhaust the PCB pool: each `true` (P) spends one fresh PCB that is
/// never freed, so the run must stay well under `N_PROC`.
fn capped_ops(ops: Vec<bool>) -> Vec<bool> {
    ops.into_iter().take(N_PROC - 2).collect()
}

#[quickcheck]
fn semaphore_value_always_matches_blocked_queue_length(ops: Vec<bool>) -> TestResult {
    let ops = capped_ops(ops);
    let mut state = KernelState::new();
    let mut machine = MockMachine::new();
    machine.write_word(SEM_ADDR, 0);
    let mut expected: i64 = 0;

    for &is_p in &ops {
        if is_p {
            let pcb = state.pcbs.allocate().expect("capped well under N_PROC");
            state.current = Some(pcb);
            let _ = passeren(&mut state, &mut machine, SEM_ADDR);
            expected -= 1;
        } else {
            let _ = verhogen(&mut state, &mut machine, SEM_ADDR);
            expected += 1;
        }

        if machine.read_word(SEM_ADDR) as i64 != expected {
            return TestResult::failed();
        }
        let has_waiter = state.asl.peek_blocked(&state.pcbs, SEM_ADDR).is_some();
        if has_waiter != (expected < 0) {
            return TestResult::failed();
        }
    }
    TestResult::passed()
}

#[quickcheck]
fn pcb_pool_never_exceeds_its_capacity(ops: Vec<bool>) -> TestResult {
    let ops = capped_ops(ops);
    let mut state = KernelState::new();
    let mut outstanding = Vec::new();

    for &allocate in &ops {
        if allocate || outstanding.is_empty() {
            match state.pcbs.allocate() {
                Some(id) => outstanding.push(id),
                None => {
                    if outstanding.len() < N_PROC {
                        return TestResult::failed();
                    }
                }
            }
        } else {
            let id = outstanding.swap_remove(0);
            state.pcbs.free(id);
        }
        if outstanding.len() > N_PROC {
            return TestResult::failed();
        }
    }
    TestResult::passed()
}

proptest! {
    /// ASL well-formedness (spec §8): whatever mix of blocks and
    /// unblocks a run does, the live descriptors' addresses stay
    /// strictly ascending and never exceed the pool's capacity.
    #[test]
    fn asl_active_addresses_stay_sorted_and_within_capacity(
        ops in proptest::collection::vec((any::<bool>(), 0u16..8), 0..(N_PROC - 2))
    ) {
        let mut pcbs = PcbPool::new();
        let mut asl = Asl::new();
        let mut live = Vec::new();

        for (is_block, addr_index) in ops {
            let addr = addr_index as usize;
            if is_block {
                if let Some(pcb) = pcbs.allocate() {
                    if asl.block(&mut pcbs, addr, pcb).is_ok() {
                        live.push((addr, pcb));
                    } else {
                        pcbs.free(pcb);
                    }
                }
            } else if let Some(pos) = live.iter().position(|&(a, _)| a == addr) {
                let (_, pcb) = live.remove(pos);
                asl.remove_specific_blocked(&mut pcbs, pcb);
                pcbs.free(pcb);
            }

            let addrs: Vec<usize> = asl.active_addrs().collect();
            prop_assert!(
                addrs.windows(2).all(|w| w[0] < w[1]),
                "ASL addresses must stay strictly ascending: {addrs:?}"
            );
            prop_assert!(addrs.len() <= N_PROC, "ASL must not exceed its descriptor capacity");
        }
    }
}
