//! The hardware contract this crate is built against (spec §6).
//!
//! The simulated machine itself — CPU state load/store, TLB
//! maintenance, the BIOS exception vector page, device register
//! geometry, the time-of-day and interval timers — is an external
//! collaborator (spec §1). This module only declares the trait the
//! rest of the crate is generic over; a concrete implementation is
//! supplied by whatever embeds this crate (or, for tests, by
//! [`mock::MockMachine`]).

use crate::config::{DEVICES_PER_LINE, LINE_IO_BASE, LINE_IO_COUNT};

/// General-purpose and privileged registers saved by the machine when
/// an exception is taken, plus the fields the nucleus reads to decide
/// what happened and where to resume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SavedState {
    pub entry_hi: u32,
    pub cause: u32,
    pub status: u32,
    pub pc: u32,
    pub regs: [u32; 29],
}

/// Indices into [`SavedState::regs`] for the registers the nucleus
/// and support level read or write directly (SYSCALL argument/result
/// convention, spec §4.5).
pub mod reg {
    pub const A0: usize = 3;
    pub const A1: usize = 4;
    pub const A2: usize = 5;
    pub const A3: usize = 6;
    pub const V0: usize = 1;
}

/// Bit layout of [`SavedState::status`] this crate defines for itself
/// (the real MIPS `Status` register layout is the excluded simulated
/// machine's business; the nucleus only needs the one bit that tells
/// it which privilege level trapped).
pub mod cpu_mode {
    pub const USER: u32 = 1 << 1;
}

impl SavedState {
    pub fn a(&self, n: usize) -> u32 {
        self.regs[reg::A0 + n]
    }

    pub fn set_v0(&mut self, value: i32) {
        self.regs[reg::V0] = value as u32;
    }

    pub fn v0(&self) -> i32 {
        self.regs[reg::V0] as i32
    }

    /// Whether this state was trapped while running in user mode
    /// (spec §4.4's "A SYSCALL issued from user mode...").
    pub fn is_user_mode(&self) -> bool {
        self.status & cpu_mode::USER != 0
    }
}

/// The exception code extracted from `SavedState::cause` (bits 2..6 on
/// a real MIPS `Cause` register; the exact encoding is the machine's
/// business, `Machine::exception_code` hides it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionCode {
    Interrupt,
    TlbInvalid,
    TlbModification,
    Syscall,
    ReservedInstruction,
    Other(u32),
}

/// Raw `SavedState::cause` values this crate assigns its own meaning
/// to. A real machine's `Cause` register encoding differs; whatever
/// implements [`Machine`] maps its own bits to these through
/// [`Machine::exception_code`], and the dispatcher writes
/// [`cause::RESERVED_INSTRUCTION`] back through the same convention
/// when rewriting a privileged SYSCALL (spec §4.4).
pub mod cause {
    pub const INTERRUPT: u32 = 0;
    pub const TLB_INVALID: u32 = 1;
    pub const TLB_MODIFICATION: u32 = 2;
    pub const SYSCALL: u32 = 8;
    pub const RESERVED_INSTRUCTION: u32 = 10;
}

/// One device's four-word register bank (spec §6).
///
/// For non-terminal devices `status`/`command` are the only pair used;
/// `data0`/`data1` carry the DMA buffer address and (for disks) extra
/// geometry words. Terminals reinterpret all four words as
/// `{recv_status, recv_command, transm_status, transm_command}`.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct DeviceRegisters {
    pub status: u32,
    pub command: u32,
    pub data0: u32,
    pub data1: u32,
}

/// Device status codes shared by every device class (spec §4.8.3, §4.9).
pub mod status {
    pub const DEVICE_READY: u32 = 1;
    pub const CHARACTER_TRANSMITTED: u32 = 5;
    pub const CHARACTER_RECEIVED: u32 = 5;
}

/// Device command opcodes.
pub mod command {
    pub const ACK: u32 = 1;
    pub const FLASH_READ: u32 = 2;
    pub const FLASH_WRITE: u32 = 3;
    pub const DISK_SEEK: u32 = 2;
    pub const DISK_READ: u32 = 3;
    pub const DISK_WRITE: u32 = 4;
    pub const PRINTER_PRINT_CHAR: u32 = 2;
    pub const TERMINAL_TRANSMIT_CHAR: u32 = 2;
    pub const TERMINAL_RECEIVE_CHAR: u32 = 2;
}

/// A translation-lookaside-buffer entry slot index, as returned by a probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbIndex(pub u32);

/// The machine this kernel runs on top of.
///
/// Every method here corresponds to a primitive named in spec §6. The
/// nucleus never reaches around this trait to touch hardware state
/// directly — that boundary is what lets the kernel logic be unit
/// tested against [`mock::MockMachine`] without an emulator.
pub trait Machine {
    /// The BIOS communication area: where the machine places saved
    /// state on exception entry, and reads it back from on `load_state`.
    fn saved_state(&self) -> &SavedState;
    fn saved_state_mut(&mut self) -> &mut SavedState;

    /// Decodes `saved_state().cause` into an [`ExceptionCode`].
    fn exception_code(&self) -> ExceptionCode;

    /// Loads `state` into the CPU and resumes execution there. Never
    /// returns to the caller (the MIPS `LDST` instruction).
    fn load_state(&mut self, state: &SavedState) -> !;

    fn set_interrupts_enabled(&mut self, enabled: bool);
    fn interrupts_enabled(&self) -> bool;

    fn load_interval_timer(&mut self, micros: u32);
    fn load_local_timer(&mut self, micros: u32);
    fn time_of_day(&self) -> u64;

    /// Probes the TLB for `entry_hi`; `Some` iff a matching entry is
    /// resident, giving its index for [`Machine::tlb_write_indexed`].
    fn tlb_probe(&self, entry_hi: u32) -> Option<TlbIndex>;
    fn tlb_write_indexed(&mut self, index: TlbIndex, entry_hi: u32, entry_lo: u32);
    fn tlb_write_random(&mut self, entry_hi: u32, entry_lo: u32);

    /// A bitmap of pending devices on `line` (bit `d` set iff device
    /// `d` has an unacknowledged interrupt), for lines
    /// `LINE_IO_BASE..LINE_IO_BASE + LINE_IO_COUNT`.
    fn pending_devices(&self, line: usize) -> u8;
    /// The lowest-numbered interrupt line with at least one pending
    /// device, if any (spec §4.6 priority: lowest line first).
    fn highest_priority_pending_line(&self) -> Option<usize> {
        (LINE_IO_BASE..LINE_IO_BASE + LINE_IO_COUNT).find(|&line| self.pending_devices(line) != 0)
    }

    /// Whether interrupt line `line` (1 = local/quantum timer, 2 =
    /// interval timer / pseudo-clock, 3..=7 = device lines) is
    /// currently asserted.
    fn interrupt_pending(&self, line: usize) -> bool;

    /// The highest-priority (lowest-numbered) pending interrupt line
    /// across all of 1..=7, per spec §4.6's tie-break.
    fn highest_priority_pending_interrupt_line(&self) -> Option<usize> {
        (1..=7).find(|&line| self.interrupt_pending(line))
    }

    fn device_registers(&self, line: usize, device: usize) -> &DeviceRegisters;
    fn device_registers_mut(&mut self, line: usize, device: usize) -> &mut DeviceRegisters;

    /// Number of devices per line, exposed so generic code need not
    /// import [`DEVICES_PER_LINE`] directly.
    fn devices_per_line(&self) -> usize {
        DEVICES_PER_LINE
    }

    /// Reads the word at a user-space address. Backs SYS3/SYS4: a
    /// synchronization semaphore is just an `int` a U-Proc declared in
    /// its own data segment, and the nucleus only ever touches it
    /// through the pointer a0 carries (spec §3, "Semaphore descriptor").
    fn read_word(&self, addr: usize) -> i32;
    fn write_word(&mut self, addr: usize, value: i32);

    /// Reads a full saved-state structure a caller has prepared in its
    /// own memory (SYS1's `statep` argument, spec §4.5).
    fn read_state(&self, addr: usize) -> SavedState;

    /// Waits for device `(line, device)` to post its completion,
    /// acknowledges it, and returns the status that caused the
    /// interrupt. `is_terminal_transmitter` selects the transmitter
    /// half of a terminal's register reinterpretation (spec §4.6).
    ///
    /// This is the support level's view of `WaitForIO` (spec §4.8.3,
    /// §4.9): unlike the nucleus's own SYS5, which genuinely suspends
    /// the caller through the scheduler, a support-level routine's own
    /// Rust call stack has no hardware-level continuation to resume
    /// into. A production `Machine` backs this by issuing the real
    /// SYS5 and letting the underlying hardware's context switch
    /// resume this exact call when the device completes; `MockMachine`
    /// backs it by polling its virtual clock.
    fn wait_for_device(&mut self, line: usize, device: usize, is_terminal_transmitter: bool) -> u32;

    /// Idles until the next interrupt, which resumes execution at a
    /// fresh exception-vector entry rather than returning here — the
    /// MIPS `WAIT` instruction (spec §4.3's "otherwise → idle").
    fn wait_for_interrupt(&mut self) -> !;

    /// Stops the machine. Used only when `processCount == 0` (spec §4.3).
    fn halt(&mut self) -> !;
    /// Aborts on a violated kernel invariant (spec §7's "immediate halt").
    fn panic(&mut self, message: &str) -> !;
}

/// A deterministic `Machine` double for this crate's own tests, also
/// exposed to integration tests (`tests/`) under the `test-util`
/// feature — the same convention `tokio`'s `test-util` feature follows
/// for exposing an in-crate test double without shipping it by default.
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
