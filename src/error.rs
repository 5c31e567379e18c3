//! Error handling for chunk processing operations
//!
//! Structural and run-fatal errors are variants of [`ChunkFlowError`];
//! per-unit failures are [`UnitError`] values reported inline with results.

pub use crate::common::{ChunkFlowError, Result, UnitError, UnitErrorKind};
