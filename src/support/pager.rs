//! The Pager: the support level's page-fault handler (spec §4.8).
//!
//! Installed (by the instantiator, at each support structure's
//! `except_context[PageFault]`) as the code a faulting U-Proc's TLB
//! exception resumes into — see [`crate::nucleus::passup`]'s doc
//! comment for why that hardware-level jump is, for a production
//! [`Machine`], a real jump to this function's address. This module is
//! exercised directly by its own tests rather than through that jump,
//! since [`crate::machine::mock::MockMachine`] cannot execute
//! arbitrary code at a PC.

use crate::config::{frame_addr, N_PAGES, SWAP_POOL_MUTEX_ADDR};
use crate::machine::{cause, cpu_mode, Machine, TlbIndex};
use crate::nucleus::pcb::PcbId;
use crate::nucleus::state::KernelState;
use crate::support::flash::{self, Direction};
use crate::support::structure::{Asid, EntryHi, EntryLo, EntryLoFlags, ExceptKind, Pool as SupportPool};
use crate::support::swap::SwapPool;
use crate::support::sync;

/// Handles the TLB exception recorded in `asid`'s
/// `support.except_state[PageFault]`.
///
/// Never returns: either the faulting instruction is retried via
/// `machine.load_state` once the page is mapped in, or the U-Proc is
/// fatally terminated (a TLB-Modification exception, or invalid write
/// to a read-only page, is a program error per spec §4.8 step 1).
///
/// Takes the whole support-structure pool, not just `asid`'s own
/// structure: evicting a frame occupied by a different ASID (the
/// steady-state case once every frame is in use) has to invalidate
/// *that* ASID's page table entry and write its page back through
/// *its* device, not the faulter's.
pub fn handle_page_fault<M: Machine>(
    state: &mut KernelState,
    machine: &mut M,
    pool: &mut SupportPool,
    swap: &mut SwapPool,
    asid: Asid,
) -> ! {
    let except_state = pool.get(asid).except_state[ExceptKind::PageFault as usize];

    if except_state.cause == cause::TLB_MODIFICATION {
        log::warn!("ASID {}: TLB-Modification is fatal", asid.get());
        return die(state, machine, pool.get(asid).owner);
    }

    sync::acquire(machine, SWAP_POOL_MUTEX_ADDR);

    let entry_hi = EntryHi(except_state.entry_hi);
    let page = entry_hi.vpn() as usize % N_PAGES;
    let frame = swap.select_victim();

    if let Some(occupant) = swap.frame(frame).occupant {
        if occupant.asid != asid || occupant.vpn as usize != page {
            evict(machine, pool, occupant.asid, occupant.vpn, frame);
        }
    }
    swap.occupy(frame, asid, page as u32);

    let frame_addr = frame_dma_addr(frame);
    let block = page as u32;
    let device = asid.index();
    let status = flash::flash_transfer(machine, device, frame_addr, block, Direction::Read);
    if flash::failed(status) {
        log::error!("ASID {}: flash read failed reading page {page}", asid.get());
        sync::release(machine, SWAP_POOL_MUTEX_ADDR);
        return die(state, machine, pool.get(asid).owner);
    }

    let support = pool.get_mut(asid);
    let pte = &mut support.page_table[page];
    pte.entry_hi = EntryHi::new(page as u32, asid);
    pte.entry_lo = EntryLo::new(frame as u32, EntryLoFlags::VALID | EntryLoFlags::DIRTY);
    reconcile_tlb(machine, pte.entry_hi, pte.entry_lo);

    sync::release(machine, SWAP_POOL_MUTEX_ADDR);

    machine.load_state(&except_state)
}

/// Writes back a dirty victim page and invalidates its page-table
/// entry and any resident TLB entry for it (spec §4.8 steps 4-6).
/// Operates on the victim's own support structure, looked up by its
/// own ASID — never the faulting process's.
fn evict<M: Machine>(machine: &mut M, pool: &mut SupportPool, victim_asid: Asid, victim_vpn: u32, frame: usize) {
    let victim = pool.get_mut(victim_asid);
    let victim_page = victim_vpn as usize;
    if victim_page < victim.page_table.len() {
        victim.page_table[victim_page].entry_lo = EntryLo::invalid();
    }
    let stale_hi = EntryHi::new(victim_vpn, victim_asid);
    if let Some(index) = machine.tlb_probe(stale_hi.0) {
        machine.tlb_write_indexed(index, stale_hi.0, EntryLo::invalid().0);
    }
    let device = victim_asid.index();
    let storage_block = victim_vpn;
    let frame_addr = frame_dma_addr(frame);
    let status = flash::flash_transfer(machine, device, frame_addr, storage_block, Direction::Write);
    if flash::failed(status) {
        log::error!("ASID {}: flash write-back failed for page {victim_page}", victim_asid.get());
    }
}

fn reconcile_tlb<M: Machine>(machine: &mut M, entry_hi: EntryHi, entry_lo: EntryLo) {
    match machine.tlb_probe(entry_hi.0) {
        Some(index) => machine.tlb_write_indexed(index, entry_hi.0, entry_lo.0),
        None => machine.tlb_write_random(entry_hi.0, entry_lo.0),
    }
}

/// The DMA address a frame's content is read/written through. Frames
/// are addressed in their own reserved word, distinct from a U-Proc's
/// semaphore/mutex addresses (spec §4.8.3's "RAM frame address").
fn frame_dma_addr(frame: usize) -> usize {
    frame_addr(frame)
}

fn die<M: Machine>(state: &mut KernelState, machine: &mut M, owner: Option<PcbId>) -> ! {
    let owner = owner.expect("a support structure always belongs to a PCB");
    crate::nucleus::syscall::terminate_process(state, machine, owner);
    crate::nucleus::scheduler::schedule(state, machine)
}
