//! Control-plane error taxonomy.
//!
//! Datapath invariant violations (spec: "Invariant violations — programmer
//! errors") are never surfaced here; they are `assert!`/`debug_assert!` in
//! `datapath`. This enum covers only the "Configuration errors" class:
//! synchronous, caller-visible rejections of a control-plane operation.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// A supplied label was outside `[0, 254]` or equal to the sentinel 255.
    InvalidLabel,
    /// The operation referenced an id (link, policy, attachment) that is
    /// already present.
    ValueExists,
    /// The operation referenced an id that does not exist.
    NoSuchEntry,
    /// A policy delete was rejected because `ref_count > 0`.
    InUse,
    /// An interface index was out of range or otherwise not usable.
    InvalidSwIfIndex,
    /// A generic malformed-argument rejection (e.g. zero link groups).
    InvalidArgument,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineError::InvalidLabel => "invalid_label",
            EngineError::ValueExists => "value_exists",
            EngineError::NoSuchEntry => "no_such_entry",
            EngineError::InUse => "in_use",
            EngineError::InvalidSwIfIndex => "invalid_sw_if_index",
            EngineError::InvalidArgument => "invalid_argument",
        };
        f.write_str(s)
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;
