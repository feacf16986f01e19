//! Crate-wide error type.
//!
//! Per spec §7, there is no recoverable error surface exposed to user
//! code: a SYSCALL either succeeds, reports a negative device status,
//! or is fatal to the caller. [`Error`] exists only for failures
//! internal to the nucleus/support level that a caller never observes
//! directly (they are turned into a termination or a panic upstream).

/// The error type returned by the internal APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The PCB pool has no free slots (SYS1 exhaustion).
    ProcessPoolExhausted,
    /// The ASL free list has no spare descriptors.
    ///
    /// Spec §4.2 asserts this cannot happen with `N_PROC + 2`
    /// descriptors; surfacing it as an error (rather than panicking
    /// inline) lets callers log context before escalating.
    AslPoolExhausted,
    /// The Active Delay List has no free descriptors for SYS18.
    DelayPoolExhausted,
    /// A device reported a non-"ready"/non-"device ready" status.
    DeviceFailure(i32),
    /// A U-Proc's argument violated a structural precondition
    /// (out-of-segment address, negative length, oversized buffer).
    InvalidArgument,
}
