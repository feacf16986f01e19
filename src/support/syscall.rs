//! Support-level SYSCALLs 9–18 (spec §4.9) and the general-exception
//! entry point that dispatches them.
//!
//! Installed (like [`crate::support::pager`]) at each support
//! structure's `except_context[General]` — see
//! [`crate::nucleus::passup`]'s doc comment for why, on a production
//! [`Machine`], that is a real jump to this code. A non-SYSCALL
//! exception reaching here (a program trap, or a privileged-SYSCALL
//! rewrite) is always fatal to the U-Proc (spec §7).
//!
//! A buffer "byte" is modelled as one word at consecutive addresses —
//! this crate has no real memory image to index by byte offset, and
//! the SYSCALLs here only ever move opaque values, never interpret
//! them, so the simplification is observationally transparent.

use crate::config::{
    device_mutex_addr, device_sem_index, priv_sem_addr, terminal_transmitter_index, DISK_SECTORS_PER_DEVICE,
    DISK_LINE, FLASH_LINE, MASTER_SEM_ADDR, MAX_STR, PRINTER_LINE, TERMINAL_LINE, USER_SEGMENT_BASE,
};
use crate::machine::{cause, command, status, Machine, SavedState};
use crate::nucleus::pcb::PcbId;
use crate::nucleus::state::KernelState;
use crate::nucleus::syscall::{passeren, Outcome};
use crate::support::delay::Adl;
use crate::support::flash::{self, Direction};
use crate::support::structure::{ExceptKind, SupportStruct};
use crate::support::sync;

const SYS9_TERMINATE_UPROC: i32 = 9;
const SYS10_GET_TOD: i32 = 10;
const SYS11_WRITE_PRINTER: i32 = 11;
const SYS12_WRITE_TERMINAL: i32 = 12;
const SYS13_READ_TERMINAL: i32 = 13;
const SYS14_DISK_PUT: i32 = 14;
const SYS15_DISK_GET: i32 = 15;
const SYS16_FLASH_PUT: i32 = 16;
const SYS17_FLASH_GET: i32 = 17;
const SYS18_DELAY: i32 = 18;

/// Handles the exception recorded in `support.except_state[General]`.
/// Never returns: every SYSCALL resumes the U-Proc via
/// `machine.load_state`, except SYS9 and any structural violation,
/// which terminate it and enter the scheduler.
pub fn handle_general_exception<M: Machine>(
    state: &mut KernelState,
    machine: &mut M,
    support: &mut SupportStruct,
    adl: &mut Adl,
) -> ! {
    let except_state = support.except_state[ExceptKind::General as usize];
    if except_state.cause != cause::SYSCALL {
        log::warn!("ASID {}: unhandled exception, terminating", support.asid.get());
        return terminate(state, machine, support);
    }

    let number = except_state.a(0) as i32;
    let device = support.asid.index();

    let result = match number {
        SYS9_TERMINATE_UPROC => return terminate(state, machine, support),
        SYS10_GET_TOD => Ok(machine.time_of_day() as i32),
        SYS11_WRITE_PRINTER => write_device(machine, device, PRINTER_LINE, &except_state, false),
        SYS12_WRITE_TERMINAL => write_device(machine, device, TERMINAL_LINE, &except_state, true),
        SYS13_READ_TERMINAL => read_terminal(machine, device, &except_state),
        SYS14_DISK_PUT => disk_transfer(machine, device, &except_state, Direction::Write),
        SYS15_DISK_GET => disk_transfer(machine, device, &except_state, Direction::Read),
        SYS16_FLASH_PUT => flash_transfer(machine, device, &except_state, Direction::Write),
        SYS17_FLASH_GET => flash_transfer(machine, device, &except_state, Direction::Read),
        SYS18_DELAY => return delay(state, machine, support, adl, &except_state),
        _ => Err(()),
    };

    match result {
        Ok(value) => {
            let mut resumed = except_state;
            resumed.set_v0(value);
            machine.load_state(&resumed)
        }
        Err(()) => {
            log::warn!("ASID {}: structural violation, terminating", support.asid.get());
            terminate(state, machine, support)
        }
    }
}

fn valid_buffer(addr: usize, len: i32) -> bool {
    addr >= USER_SEGMENT_BASE && (0..=MAX_STR as i32).contains(&len)
}

/// SYS11/SYS12: writes `length` characters from `buf_addr` to the
/// printer, or the terminal transmitter, one at a time under its
/// device mutex (spec §4.9).
fn write_device<M: Machine>(
    machine: &mut M,
    device: usize,
    line: usize,
    except_state: &crate::machine::SavedState,
    is_terminal: bool,
) -> Result<i32, ()> {
    let buf_addr = except_state.a(1) as usize;
    let length = except_state.a(2) as i32;
    if !valid_buffer(buf_addr, length) {
        return Err(());
    }
    let mutex = device_mutex_addr(if is_terminal {
        terminal_transmitter_index(line, device)
    } else {
        device_sem_index(line, device)
    });
    sync::acquire(machine, mutex);
    for i in 0..length {
        let ch = machine.read_word(buf_addr + i as usize);
        machine.set_interrupts_enabled(false);
        if is_terminal {
            // `data0` is the transmitter's device-owned status word
            // (spec §4.6's terminal register reinterpretation), not
            // software-writable; the character rides in `data1` with
            // the command, the same word a real terminal's transmit
            // command register carries it in.
            machine.device_registers_mut(line, device).data1 = (ch as u32) << 8 | command::TERMINAL_TRANSMIT_CHAR;
        } else {
            machine.device_registers_mut(line, device).data0 = ch as u32;
            machine.device_registers_mut(line, device).command = command::PRINTER_PRINT_CHAR;
        }
        let got = machine.wait_for_device(line, device, is_terminal);
        machine.set_interrupts_enabled(true);
        let expected = if is_terminal {
            status::CHARACTER_TRANSMITTED
        } else {
            status::DEVICE_READY
        };
        if got != expected {
            sync::release(machine, mutex);
            return Ok(-(got as i32));
        }
    }
    sync::release(machine, mutex);
    Ok(length)
}

/// SYS13: ReadFromTerminal. Reads characters into `buf_addr` until an
/// end-of-line byte (`b'\n'`) is stored, or `MAX_STR` is reached.
fn read_terminal<M: Machine>(machine: &mut M, device: usize, except_state: &crate::machine::SavedState) -> Result<i32, ()> {
    const END_OF_LINE: u32 = b'\n' as u32;
    let buf_addr = except_state.a(1) as usize;
    if buf_addr < USER_SEGMENT_BASE {
        return Err(());
    }
    let mutex = device_mutex_addr(device_sem_index(TERMINAL_LINE, device));
    sync::acquire(machine, mutex);
    let mut count = 0i32;
    loop {
        machine.set_interrupts_enabled(false);
        machine.device_registers_mut(TERMINAL_LINE, device).command = command::TERMINAL_RECEIVE_CHAR;
        let got = machine.wait_for_device(TERMINAL_LINE, device, false);
        machine.set_interrupts_enabled(true);
        if got != status::CHARACTER_RECEIVED {
            sync::release(machine, mutex);
            return Ok(-(got as i32));
        }
        let ch = machine.device_registers(TERMINAL_LINE, device).data0 & 0xff;
        machine.write_word(buf_addr + count as usize, ch as i32);
        count += 1;
        if ch == END_OF_LINE || count as usize >= MAX_STR {
            break;
        }
    }
    sync::release(machine, mutex);
    Ok(count)
}

/// SYS16/SYS17: FlashPut/FlashGet.
fn flash_transfer<M: Machine>(
    machine: &mut M,
    device: usize,
    except_state: &crate::machine::SavedState,
    direction: Direction,
) -> Result<i32, ()> {
    let user_addr = except_state.a(1) as usize;
    let block = except_state.a(2);
    if user_addr < USER_SEGMENT_BASE {
        return Err(());
    }
    Ok(flash::flash_transfer(machine, device, user_addr, block, direction))
}

/// SYS14/SYS15: DiskPut/DiskGet. Disk geometry/seek handshaking is the
/// excluded simulated machine's concern (spec §1); this crate's own
/// logic only needs the flat sector number, validated against the
/// per-device capacity reserved for it.
fn disk_transfer<M: Machine>(
    machine: &mut M,
    device: usize,
    except_state: &crate::machine::SavedState,
    direction: Direction,
) -> Result<i32, ()> {
    let user_addr = except_state.a(1) as usize;
    let linear_sector = except_state.a(2);
    if user_addr < USER_SEGMENT_BASE || linear_sector as usize >= DISK_SECTORS_PER_DEVICE {
        return Err(());
    }
    Ok(flash::disk_transfer(machine, device, user_addr, linear_sector, direction))
}

/// SYS18: Delay. The final P is a real nucleus SYS3 on the caller's
/// private semaphore: the sleeper is genuinely ASL-blocked until the
/// delay daemon's [`crate::support::delay::tick`] V's it back (spec
/// §4.9, §4.10).
fn delay<M: Machine>(
    state: &mut KernelState,
    machine: &mut M,
    support: &SupportStruct,
    adl: &mut Adl,
    except_state: &SavedState,
) -> ! {
    let ms = except_state.a(1) as i32;
    if ms < 0 {
        log::warn!("ASID {}: negative delay, terminating", support.asid.get());
        return terminate(state, machine, support);
    }
    sync::acquire(machine, crate::config::ADL_MUTEX_ADDR);
    let wake_time = machine.time_of_day() + (ms as u64) * 1000;
    if adl.insert(wake_time, support.asid).is_err() {
        log::warn!("ASID {}: ADL pool exhausted, terminating", support.asid.get());
        sync::release(machine, crate::config::ADL_MUTEX_ADDR);
        return terminate(state, machine, support);
    }
    sync::release(machine, crate::config::ADL_MUTEX_ADDR);

    *machine.saved_state_mut() = *except_state;
    match passeren(state, machine, priv_sem_addr(support.asid.index())) {
        Outcome::Reschedule => crate::nucleus::scheduler::schedule(state, machine),
        Outcome::ResumeCurrent => {
            let saved = *machine.saved_state();
            machine.load_state(&saved)
        }
    }
}

/// Common SYS9 body: release this ASID's device mutexes, V the master
/// semaphore, then tear the U-Proc down through the nucleus.
fn terminate<M: Machine>(state: &mut KernelState, machine: &mut M, support: &SupportStruct) -> ! {
    let device = support.asid.index();
    for mutex in [
        device_mutex_addr(device_sem_index(FLASH_LINE, device)),
        device_mutex_addr(device_sem_index(DISK_LINE, device)),
        device_mutex_addr(device_sem_index(PRINTER_LINE, device)),
        device_mutex_addr(device_sem_index(TERMINAL_LINE, device)),
        device_mutex_addr(terminal_transmitter_index(TERMINAL_LINE, device)),
    ] {
        sync::release(machine, mutex);
    }
    sync::release(machine, MASTER_SEM_ADDR);
    let owner: PcbId = support.owner.expect("a support structure always belongs to a PCB");
    crate::nucleus::syscall::terminate_process(state, machine, owner);
    crate::nucleus::scheduler::schedule(state, machine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::MockMachine;
    use crate::support::delay::Adl;
    use crate::support::structure::Asid;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn general_state(number: i32, a1: u32, a2: u32) -> crate::machine::SavedState {
        let mut s = crate::machine::SavedState::default();
        s.cause = cause::SYSCALL;
        s.regs[crate::machine::reg::A0] = number as u32;
        s.regs[crate::machine::reg::A1] = a1;
        s.regs[crate::machine::reg::A2] = a2;
        s
    }

    fn setup() -> (KernelState, MockMachine, SupportStruct, Adl) {
        let mut state = KernelState::new();
        let machine = MockMachine::new();
        let pcb = state.pcbs.allocate().unwrap();
        state.process_count = 1;
        let mut support = SupportStruct::new(Asid::new(1).unwrap());
        support.owner = Some(pcb);
        (state, machine, support, Adl::new())
    }

    #[test]
    fn get_tod_returns_time_of_day() {
        let (mut state, mut machine, mut support, mut adl) = setup();
        machine.advance(42);
        support.except_state[ExceptKind::General as usize] = general_state(SYS10_GET_TOD, 0, 0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            handle_general_exception(&mut state, &mut machine, &mut support, &mut adl)
        }));
        assert!(result.is_err());
        assert_eq!(machine.saved_state().v0(), 42);
    }

    #[test]
    fn write_printer_rejects_out_of_segment_buffer() {
        let (mut state, mut machine, mut support, mut adl) = setup();
        support.except_state[ExceptKind::General as usize] = general_state(SYS11_WRITE_PRINTER, 0x10, 3);
        let result = catch_unwind(AssertUnwindSafe(|| {
            handle_general_exception(&mut state, &mut machine, &mut support, &mut adl)
        }));
        assert!(result.is_err());
        assert_eq!(state.process_count, 0, "structural violation must terminate the U-Proc");
    }

    #[test]
    fn write_terminal_reports_a_scripted_non_default_status() {
        use crate::machine::mock::ScriptedCompletion;

        let (mut state, mut machine, mut support, mut adl) = setup();
        let addr = USER_SEGMENT_BASE + 0x200;
        machine.write_word(addr, b'x' as i32);
        let device = support.asid.index();
        sync::init(&mut machine, device_mutex_addr(terminal_transmitter_index(TERMINAL_LINE, device)));
        machine.script(ScriptedCompletion {
            line: TERMINAL_LINE,
            device,
            status: 3,
            cycles: 0,
            is_terminal_transmitter: true,
        });
        support.except_state[ExceptKind::General as usize] = general_state(SYS12_WRITE_TERMINAL, addr as u32, 1);
        let result = catch_unwind(AssertUnwindSafe(|| {
            handle_general_exception(&mut state, &mut machine, &mut support, &mut adl)
        }));
        assert!(result.is_err());
        assert_eq!(
            machine.saved_state().v0(),
            -3,
            "a non-CHARACTER_TRANSMITTED completion must surface the negated device status, not the byte count"
        );
    }

    #[test]
    fn write_printer_sends_every_byte_and_returns_count() {
        let (mut state, mut machine, mut support, mut adl) = setup();
        let addr = USER_SEGMENT_BASE + 0x100;
        machine.write_word(addr, b'h' as i32);
        machine.write_word(addr + 1, b'i' as i32);
        sync::init(&mut machine, device_mutex_addr(device_sem_index(PRINTER_LINE, 0)));
        support.except_state[ExceptKind::General as usize] = general_state(SYS11_WRITE_PRINTER, addr as u32, 2);
        let result = catch_unwind(AssertUnwindSafe(|| {
            handle_general_exception(&mut state, &mut machine, &mut support, &mut adl)
        }));
        assert!(result.is_err());
        assert_eq!(machine.saved_state().v0(), 2);
    }

    #[test]
    fn terminate_uproc_releases_mutexes_and_v_s_master_sem() {
        let (mut state, mut machine, mut support, mut adl) = setup();
        for mutex in [
            device_mutex_addr(device_sem_index(FLASH_LINE, 0)),
            device_mutex_addr(device_sem_index(DISK_LINE, 0)),
            device_mutex_addr(device_sem_index(PRINTER_LINE, 0)),
            device_mutex_addr(device_sem_index(TERMINAL_LINE, 0)),
            device_mutex_addr(terminal_transmitter_index(TERMINAL_LINE, 0)),
        ] {
            machine.write_word(mutex, 0);
        }
        machine.write_word(MASTER_SEM_ADDR, 0);
        support.except_state[ExceptKind::General as usize] = general_state(SYS9_TERMINATE_UPROC, 0, 0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            handle_general_exception(&mut state, &mut machine, &mut support, &mut adl)
        }));
        assert!(result.is_err());
        assert_eq!(machine.read_word(MASTER_SEM_ADDR), 1);
        assert_eq!(state.process_count, 0);
    }

    #[test]
    fn delay_rejects_negative_milliseconds() {
        let (mut state, mut machine, mut support, mut adl) = setup();
        support.except_state[ExceptKind::General as usize] = general_state(SYS18_DELAY, (-1i32) as u32, 0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            handle_general_exception(&mut state, &mut machine, &mut support, &mut adl)
        }));
        assert!(result.is_err());
        assert_eq!(state.process_count, 0);
    }

    #[test]
    fn non_syscall_exception_terminates_the_uproc() {
        let (mut state, mut machine, mut support, mut adl) = setup();
        let mut s = crate::machine::SavedState::default();
        s.cause = cause::RESERVED_INSTRUCTION;
        support.except_state[ExceptKind::General as usize] = s;
        let result = catch_unwind(AssertUnwindSafe(|| {
            handle_general_exception(&mut state, &mut machine, &mut support, &mut adl)
        }));
        assert!(result.is_err());
        assert_eq!(state.process_count, 0);
    }
}
