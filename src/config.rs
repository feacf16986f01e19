//! Kernel-wide configuration constants (spec §6).
//!
//! Every fixed-size pool in this crate is sized from one of these
//! constants at compile time — there is no dynamic growth.

/// Maximum number of live process control blocks.
pub const N_PROC: usize = 20;

/// Number of user processes (U-Procs) the instantiator spawns.
pub const N_UPROC: usize = 8;

/// Pages in a U-Proc's private virtual address space.
pub const N_PAGES: usize = 32;

/// Physical frames backing the swap pool (2 per U-Proc).
pub const N_FRAMES: usize = 2 * N_UPROC;

/// Scheduler quantum, in microseconds.
pub const QUANTUM_US: u32 = 5_000;

/// Pseudo-clock / interval timer period, in microseconds.
pub const PSEUDO_CLOCK_US: u32 = 100_000;

/// First interrupt line carrying device I/O (lines 0/1 are PLT/interval timer).
pub const LINE_IO_BASE: usize = 3;

/// Number of interrupt lines carrying device I/O (lines 3..=7).
pub const LINE_IO_COUNT: usize = 5;

/// Devices per interrupt line.
pub const DEVICES_PER_LINE: usize = 8;

/// Maximum length, in bytes, of a single terminal/printer I/O request.
pub const MAX_STR: usize = 128;

/// Lowest address in a U-Proc's user segment; any support-level buffer
/// argument below this is a structural violation (spec §4.9, §7's
/// "any argument pointer outside user segment").
pub const USER_SEGMENT_BASE: usize = 0x8000_0000;

/// Size, in bytes, of one page / one flash or disk block (spec §4.8.3,
/// §4.9: "one flash block per page").
pub const PAGE_SIZE: usize = 4096;

/// Entries in the device-semaphore array: one synchronization semaphore
/// per device, doubled for terminals (receiver + transmitter), plus one
/// slot for the pseudo-clock.
pub const DEVICE_SEM_COUNT: usize = LINE_IO_COUNT * DEVICES_PER_LINE * 2 + 1;

/// Index of the pseudo-clock semaphore within the device-semaphore array.
pub const PSEUDO_CLOCK_INDEX: usize = DEVICE_SEM_COUNT - 1;

/// ASL free-list size: `N_PROC` active descriptors plus the two sentinels.
pub const ASL_POOL_SIZE: usize = N_PROC + 2;

/// ADL pool size: one descriptor per U-Proc plus the two sentinels.
pub const ADL_POOL_SIZE: usize = N_UPROC + 2;

/// Size, in bytes, of each of a support structure's two handler stacks.
pub const HANDLER_STACK_SIZE: usize = 4096;

/// Bits of a flash block number a page-aligned offset is shifted by
/// when packed into a flash command word (spec §4.8.3).
pub const BLOCK_SHIFT: u32 = 8;

/// Index, within a U-Proc's backing store, of the stack page's block.
/// The backing store holds `N_PAGES` blocks: `N_PAGES - 1` text/data
/// blocks followed by one stack block (spec §6).
pub const STACK_BLOCK: u32 = (N_PAGES - 1) as u32;

/// Interrupt line carrying disk device interrupts (spec §6's device
/// geometry; conventional uMPS3 line assignment, lines 3..=7).
pub const DISK_LINE: usize = LINE_IO_BASE;
/// Interrupt line carrying flash device interrupts.
pub const FLASH_LINE: usize = LINE_IO_BASE + 1;
/// Interrupt line carrying printer device interrupts.
pub const PRINTER_LINE: usize = LINE_IO_BASE + 3;
/// Interrupt line carrying terminal device interrupts.
pub const TERMINAL_LINE: usize = LINE_IO_BASE + 4;

/// Returns the device-semaphore index for `(line, device)`.
///
/// `line` is the absolute interrupt line number (3..=7); `device` is
/// 0..DEVICES_PER_LINE. Terminal transmitters live at the same index
/// offset by [`DEVICES_PER_LINE`] (spec §3, device-semaphore array).
pub const fn device_sem_index(line: usize, device: usize) -> usize {
    (line - LINE_IO_BASE) * DEVICES_PER_LINE + device
}

/// Returns the device-semaphore index for a terminal's transmitter.
pub const fn terminal_transmitter_index(line: usize, device: usize) -> usize {
    device_sem_index(line, device) + DEVICES_PER_LINE
}

/// The ASL and the nucleus SYSCALLs identify every semaphore — user
/// (sync) semaphores and device semaphores alike — by a single
/// `usize` key (spec §3: "the physical address of the integer
/// semaphore variable... used as identity"). Device semaphores are
/// not real addresses; they are keyed in a reserved band just below
/// the ASL's high sentinel (`usize::MAX`) so they sort after every
/// plausible user address without colliding with it.
pub const fn device_sem_key(index: usize) -> usize {
    usize::MAX - DEVICE_SEM_COUNT + index
}

/// Reserved base address for the support level's own mutexes (spec §5:
/// per-device mutexes, the swap-pool mutex, the ADL mutex, the master
/// semaphore). Picked well below [`device_sem_key`]'s band so the two
/// reserved zones never collide, and far above any address a test uses
/// for an ordinary user semaphore.
const MUTEX_ADDR_BASE: usize = usize::MAX / 2;

/// The mutex address for device `index`'s mutual-exclusion semaphore.
pub const fn device_mutex_addr(index: usize) -> usize {
    MUTEX_ADDR_BASE + index
}

pub const SWAP_POOL_MUTEX_ADDR: usize = MUTEX_ADDR_BASE - 1;
pub const ADL_MUTEX_ADDR: usize = MUTEX_ADDR_BASE - 2;
pub const MASTER_SEM_ADDR: usize = MUTEX_ADDR_BASE - 3;

const PRIV_SEM_BASE: usize = MASTER_SEM_ADDR - 1 - N_UPROC;

/// The address of U-Proc `asid_index`'s private semaphore (spec
/// §4.9 SYS18): SYS18 P's it to block, the delay daemon V's it to
/// wake the sleeper, both through the ordinary nucleus SYS3/SYS4
/// primitives — this is a real synchronization semaphore, not a
/// support-level mutex, so it is blocked/woken through the ASL like
/// any other.
pub const fn priv_sem_addr(asid_index: usize) -> usize {
    PRIV_SEM_BASE + asid_index
}

/// Reserved address zones backing this crate's simulated backing
/// store (spec §4.8.3): a page's content is modelled as the single
/// word at its frame address (test/mock convenience — see
/// `support::flash`), moved to and from a reserved per-device,
/// per-block slot here.
const FLASH_STORAGE_BASE: usize = MUTEX_ADDR_BASE / 2;

pub const fn flash_block_addr(device: usize, block: u32) -> usize {
    FLASH_STORAGE_BASE + device * N_PAGES + block as usize
}

const DISK_STORAGE_BASE: usize = FLASH_STORAGE_BASE / 2;
/// Sectors reserved per disk device in the backing-store address zone.
pub const DISK_SECTORS_PER_DEVICE: usize = 1024;

pub const fn disk_block_addr(device: usize, linear_sector: u32) -> usize {
    DISK_STORAGE_BASE + device * DISK_SECTORS_PER_DEVICE + linear_sector as usize
}

/// Reserved address zone for physical frames' own content, distinct
/// from both backing-store zones above — the pager moves a page
/// between a frame here and its flash block (spec §4.8.3).
const FRAME_STORAGE_BASE: usize = DISK_STORAGE_BASE / 2;

pub const fn frame_addr(frame: usize) -> usize {
    FRAME_STORAGE_BASE + frame
}

static_assertions::const_assert!(N_FRAMES <= N_PAGES * N_UPROC);
static_assertions::const_assert!(DEVICE_SEM_COUNT > 0);
