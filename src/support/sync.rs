//! Software mutexes used only at the support level: the swap-pool
//! mutex, the per-device mutexes, and the ADL mutex (spec §5's "Four
//! explicit mutexes"). Each is a plain `i32` counter at a fixed,
//! reserved address, manipulated the same way SYS3/SYS4 manipulate any
//! synchronization semaphore.
//!
//! Unlike a U-Proc's own semaphores, these mutexes are only ever taken
//! by support-level code running in this crate's single, non-reentrant
//! execution context (spec §5) — by construction there is at most one
//! holder in flight at a time, so acquisition here is the plain
//! decrement/increment without a blocking path through the ASL. A
//! contended acquire is a kernel logic error, not a schedulable event.

use crate::machine::Machine;

pub fn acquire<M: Machine>(machine: &mut M, addr: usize) {
    let value = machine.read_word(addr) - 1;
    machine.write_word(addr, value);
    debug_assert!(value >= 0, "support-level mutex contention is not modeled");
}

pub fn release<M: Machine>(machine: &mut M, addr: usize) {
    let value = machine.read_word(addr) + 1;
    machine.write_word(addr, value);
}

/// Initializes a mutex to "free" (spec §3/§5: these start unlocked).
pub fn init<M: Machine>(machine: &mut M, addr: usize) {
    machine.write_word(addr, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;

    #[test]
    fn acquire_then_release_restores_the_original_value() {
        let mut machine = MockMachine::new();
        init(&mut machine, 0x9000);
        acquire(&mut machine, 0x9000);
        assert_eq!(machine.read_word(0x9000), 0);
        release(&mut machine, 0x9000);
        assert_eq!(machine.read_word(0x9000), 1);
    }
}
