//! The swap pool: the physical frame table and victim-selection policy
//! (spec §3, §4.8.1).

use crate::config::N_FRAMES;
use crate::support::structure::Asid;

/// One physical frame's occupant, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occupant {
    pub asid: Asid,
    pub vpn: u32,
}

/// A swap-pool slot: which page currently lives in this frame, if any.
#[derive(Clone, Copy, Debug, Default)]
pub struct Frame {
    pub occupant: Option<Occupant>,
}

/// The frame table plus the persistent victim-selection hand (spec
/// §4.8.1: "the hand persists across calls so eviction is a global
/// clock-style round-robin once steady state is reached").
pub struct SwapPool {
    frames: [Frame; N_FRAMES],
    hand: usize,
}

impl SwapPool {
    pub fn new() -> Self {
        SwapPool {
            frames: [Frame::default(); N_FRAMES],
            hand: 0,
        }
    }

    pub fn frame(&self, index: usize) -> &Frame {
        &self.frames[index]
    }

    /// Selects a victim frame: a free slot if one exists anywhere in
    /// the table, otherwise the frame at the current hand. Either way
    /// the hand advances by one, mod `N_FRAMES`.
    pub fn select_victim(&mut self) -> usize {
        let victim = (0..N_FRAMES)
            .map(|offset| (self.hand + offset) % N_FRAMES)
            .find(|&i| self.frames[i].occupant.is_none())
            .unwrap_or(self.hand);
        self.hand = (victim + 1) % N_FRAMES;
        victim
    }

    pub fn occupy(&mut self, index: usize, asid: Asid, vpn: u32) {
        self.frames[index].occupant = Some(Occupant { asid, vpn });
    }

    pub fn vacate(&mut self, index: usize) {
        self.frames[index].occupant = None;
    }
}

impl Default for SwapPool {
    fn default() -> Self {
        Self::new()
    }
}
