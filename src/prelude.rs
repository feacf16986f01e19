//! The prelude.

pub type Result<T> = core::result::Result<T, crate::error::Error>;

pub use crate::error::Error;
