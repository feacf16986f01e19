//! A deterministic, host-only [`Machine`](super::Machine) used by this
//! crate's own test suite. It is not shipped to consumers: nothing
//! under `#[cfg(test)]` is part of the public API.

use std::collections::{HashMap, VecDeque};

use super::{cause, command, status, DeviceRegisters, ExceptionCode, Machine, SavedState, TlbIndex};
use crate::config::{DEVICES_PER_LINE, LINE_IO_BASE, LINE_IO_COUNT};

/// A single scripted device completion: after `cycles` more ticks of
/// [`MockMachine::advance`], device `(line, device)`'s status register
/// is set to `status` and its pending bit raised. `is_terminal_transmitter`
/// must be set for a completion meant to answer a terminal's transmitter
/// half, since that half reports its status through `data0`, not
/// `status` (spec §4.6's terminal register reinterpretation).
pub struct ScriptedCompletion {
    pub line: usize,
    pub device: usize,
    pub status: u32,
    pub cycles: u32,
    pub is_terminal_transmitter: bool,
}

pub struct MockMachine {
    state: SavedState,
    interrupts_enabled: bool,
    interval_timer_us: u32,
    local_timer_us: u32,
    tod_us: u64,
    tlb: Vec<(u32, u32)>,
    devices: [[DeviceRegisters; DEVICES_PER_LINE]; LINE_IO_COUNT],
    pending: [u8; LINE_IO_COUNT],
    scripted: VecDeque<ScriptedCompletion>,
    halted: bool,
    memory: HashMap<usize, i32>,
    staged_states: HashMap<usize, SavedState>,
    local_timer_pending: bool,
    interval_timer_pending: bool,
}

impl MockMachine {
    pub fn new() -> Self {
        Self {
            state: SavedState::default(),
            interrupts_enabled: true,
            interval_timer_us: 0,
            local_timer_us: 0,
            tod_us: 0,
            tlb: Vec::new(),
            devices: Default::default(),
            pending: [0; LINE_IO_COUNT],
            scripted: VecDeque::new(),
            halted: false,
            memory: HashMap::new(),
            staged_states: HashMap::new(),
            local_timer_pending: false,
            interval_timer_pending: false,
        }
    }

    /// Simulates the local (quantum) timer expiring.
    pub fn fire_local_timer(&mut self) {
        self.local_timer_pending = true;
    }

    /// Simulates the interval timer (100 ms pseudo-clock tick) expiring.
    pub fn fire_interval_timer(&mut self) {
        self.interval_timer_pending = true;
    }

    /// Places a saved-state value at `addr` for a later [`Machine::read_state`]
    /// to find, modelling a caller having already built a `state_t` in
    /// its own memory (e.g. SYS1's `statep` argument).
    pub fn stage_state(&mut self, addr: usize, state: SavedState) {
        self.staged_states.insert(addr, state);
    }

    /// Schedules a device completion `cycles` ticks in the future.
    pub fn script(&mut self, completion: ScriptedCompletion) {
        self.scripted.push_back(completion);
    }

    /// Advances the virtual clock by `micros`, firing any scripted
    /// completions whose countdown reaches zero.
    pub fn advance(&mut self, micros: u32) {
        self.tod_us += micros as u64;
        if self.interval_timer_us > 0 {
            self.interval_timer_us = self.interval_timer_us.saturating_sub(micros);
        }
        if self.local_timer_us > 0 {
            self.local_timer_us = self.local_timer_us.saturating_sub(micros);
        }
        for pending in self.scripted.iter_mut() {
            pending.cycles = pending.cycles.saturating_sub(1);
        }
        while let Some(front) = self.scripted.front() {
            if front.cycles == 0 {
                let c = self.scripted.pop_front().unwrap();
                let regs = &mut self.devices[c.line - LINE_IO_BASE][c.device];
                if c.is_terminal_transmitter {
                    regs.data0 = c.status;
                } else {
                    regs.status = c.status;
                }
                self.pending[c.line - LINE_IO_BASE] |= 1 << c.device;
            } else {
                break;
            }
        }
    }

    pub fn interval_timer_remaining(&self) -> u32 {
        self.interval_timer_us
    }

    pub fn local_timer_remaining(&self) -> u32 {
        self.local_timer_us
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn acknowledge(&mut self, line: usize, device: usize) {
        self.pending[line - LINE_IO_BASE] &= !(1 << device);
    }

}

impl Default for MockMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for MockMachine {
    fn saved_state(&self) -> &SavedState {
        &self.state
    }

    fn saved_state_mut(&mut self) -> &mut SavedState {
        &mut self.state
    }

    fn exception_code(&self) -> ExceptionCode {
        // Bits [6:2] of cause carry the exception code on real MIPS;
        // the mock stores the code directly for clarity in tests.
        match self.state.cause {
            cause::INTERRUPT => ExceptionCode::Interrupt,
            cause::TLB_INVALID => ExceptionCode::TlbInvalid,
            cause::TLB_MODIFICATION => ExceptionCode::TlbModification,
            cause::SYSCALL => ExceptionCode::Syscall,
            cause::RESERVED_INSTRUCTION => ExceptionCode::ReservedInstruction,
            other => ExceptionCode::Other(other),
        }
    }

    fn load_state(&mut self, state: &SavedState) -> ! {
        self.state = *state;
        panic!("MockMachine::load_state is non-returning; call sites must not observe it return");
    }

    fn set_interrupts_enabled(&mut self, enabled: bool) {
        self.interrupts_enabled = enabled;
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    fn load_interval_timer(&mut self, micros: u32) {
        self.interval_timer_us = micros;
        self.interval_timer_pending = false;
    }

    fn load_local_timer(&mut self, micros: u32) {
        self.local_timer_us = micros;
        self.local_timer_pending = false;
    }

    fn time_of_day(&self) -> u64 {
        self.tod_us
    }

    fn tlb_probe(&self, entry_hi: u32) -> Option<TlbIndex> {
        self.tlb
            .iter()
            .position(|&(hi, _)| hi == entry_hi)
            .map(|i| TlbIndex(i as u32))
    }

    fn tlb_write_indexed(&mut self, index: TlbIndex, entry_hi: u32, entry_lo: u32) {
        self.tlb[index.0 as usize] = (entry_hi, entry_lo);
    }

    fn tlb_write_random(&mut self, entry_hi: u32, entry_lo: u32) {
        self.tlb.push((entry_hi, entry_lo));
    }

    fn pending_devices(&self, line: usize) -> u8 {
        self.pending[line - LINE_IO_BASE]
    }

    fn interrupt_pending(&self, line: usize) -> bool {
        match line {
            1 => self.local_timer_pending,
            2 => self.interval_timer_pending,
            3..=7 => self.pending_devices(line) != 0,
            _ => false,
        }
    }

    fn device_registers(&self, line: usize, device: usize) -> &DeviceRegisters {
        &self.devices[line - LINE_IO_BASE][device]
    }

    fn device_registers_mut(&mut self, line: usize, device: usize) -> &mut DeviceRegisters {
        &mut self.devices[line - LINE_IO_BASE][device]
    }

    fn wait_for_device(&mut self, line: usize, device: usize, is_terminal_transmitter: bool) -> u32 {
        const MAX_TICKS: u32 = 10_000;
        let bit = 1 << device;
        let already_scripted = self.scripted.iter().any(|c| c.line == line && c.device == device);
        if self.pending[line - LINE_IO_BASE] & bit == 0 && !already_scripted {
            // No test has scripted this completion explicitly (flash/disk
            // transfers normally don't need to); the mock completes it
            // immediately rather than spinning to a `MAX_TICKS` assertion
            // failure.
            let default_status = if is_terminal_transmitter {
                status::CHARACTER_TRANSMITTED
            } else {
                status::DEVICE_READY
            };
            let regs = &mut self.devices[line - LINE_IO_BASE][device];
            if is_terminal_transmitter {
                regs.data0 = default_status;
            } else {
                regs.status = default_status;
            }
            self.pending[line - LINE_IO_BASE] |= bit;
        } else {
            for _ in 0..MAX_TICKS {
                if self.pending[line - LINE_IO_BASE] & bit != 0 {
                    break;
                }
                self.advance(1);
            }
            assert!(
                self.pending[line - LINE_IO_BASE] & bit != 0,
                "device ({line}, {device}) never completed in the mock's scripted timeline"
            );
        }
        let regs = &mut self.devices[line - LINE_IO_BASE][device];
        let status = if is_terminal_transmitter { regs.data0 } else { regs.status };
        if is_terminal_transmitter {
            regs.data1 = super::command::ACK;
        } else {
            regs.command = super::command::ACK;
        }
        self.pending[line - LINE_IO_BASE] &= !bit;
        status
    }

    fn wait_for_interrupt(&mut self) -> ! {
        panic!("wait_for_interrupt");
    }

    fn read_word(&self, addr: usize) -> i32 {
        *self.memory.get(&addr).unwrap_or(&0)
    }

    fn write_word(&mut self, addr: usize, value: i32) {
        self.memory.insert(addr, value);
    }

    fn read_state(&self, addr: usize) -> SavedState {
        self.staged_states.get(&addr).copied().unwrap_or_default()
    }

    fn halt(&mut self) -> ! {
        self.halted = true;
        panic!("halt");
    }

    fn panic(&mut self, message: &str) -> ! {
        panic!("kernel panic: {message}");
    }
}
