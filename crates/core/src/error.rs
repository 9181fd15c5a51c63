// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Error taxonomy (§7).
//!
//! The spec's integer return-code vocabulary survives as [`UbaseErr`],
//! returned from control commands exactly like the C `int` it replaces.
//! [`PipeError`] is the ordinary Rust-level `Err` arm for everything that
//! is not itself a control-command return code (configuration mistakes,
//! allocation failures, I/O), wrapping a stray `UbaseErr` when a caller
//! needs to propagate one through a `Result`-returning API.

use thiserror::Error;

/// The §7 error taxonomy as a plain enum. Unlike [`PipeError`] this is not
/// `std::error::Error` — it is a return code, not an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UbaseErr {
    /// Success.
    None,
    /// Command or event not recognised; caller should propagate.
    Unhandled,
    /// Argument or state does not satisfy the precondition.
    Invalid,
    /// Memory or resource allocation failed.
    Alloc,
    /// Underlying OS/library call failed.
    External,
    /// Resource in use; retry later.
    Busy,
    /// Event loop could not create the requested pump.
    Upump,
    /// Reserved tail for domain-specific codes, keyed by whatever the
    /// caller wants (typically the manager's signature).
    Custom(u32),
}

impl UbaseErr {
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, UbaseErr::None)
    }
}

impl std::fmt::Display for UbaseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UbaseErr::None => write!(f, "none"),
            UbaseErr::Unhandled => write!(f, "unhandled"),
            UbaseErr::Invalid => write!(f, "invalid"),
            UbaseErr::Alloc => write!(f, "alloc"),
            UbaseErr::External => write!(f, "external"),
            UbaseErr::Busy => write!(f, "busy"),
            UbaseErr::Upump => write!(f, "upump"),
            UbaseErr::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

/// Crate-wide error type for anything outside the control-command return
/// code vocabulary.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("map/unmap coordinate mismatch")]
    MapUnmapMismatch,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control command returned {0}")]
    Control(UbaseErr),
}

impl From<&str> for PipeError {
    fn from(s: &str) -> Self {
        PipeError::Configuration(s.to_string())
    }
}

impl From<String> for PipeError {
    fn from(s: String) -> Self {
        PipeError::Configuration(s)
    }
}
