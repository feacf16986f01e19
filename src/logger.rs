//! Logging support (ambient stack, grounded on `aster-frame`'s
//! `logger.rs`).
//!
//! This crate has no console of its own — the simulated machine owns
//! whatever serial/VGA output exists, and is out of scope (spec §1).
//! [`init`] instead takes a sink callback from whatever embeds this
//! crate. Like [`crate::nucleus::state::KernelState`], the sink is a
//! bare `static mut`: this kernel's single, non-reentrant execution
//! context means there is never a second writer to race with.

use log::{Level, Metadata, Record};

pub const INIT_LOG_LEVEL: Level = Level::Info;

static mut SINK: Option<fn(core::fmt::Arguments)> = None;

struct Logger;

static LOGGER: Logger = Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= INIT_LOG_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // SAFETY: single hardware execution context, non-reentrant
        // (spec §5) — no other code runs between this read and use.
        if let Some(sink) = unsafe { SINK } {
            sink(format_args!("[{}] {}: {}", record.level(), record.target(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Installs `sink` as the destination for every `log::` call this
/// crate makes, and sets the max level. Must be called once, before
/// any exception is dispatched.
pub fn init(sink: fn(core::fmt::Arguments)) {
    // SAFETY: see `SINK`'s doc comment.
    unsafe {
        SINK = Some(sink);
    }
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(INIT_LOG_LEVEL.to_level_filter()))
        .ok();
}
