//! Typed error taxonomy shared by every component in this crate.
//!
//! Mirrors the six-member error enum the tracer has always used
//! (`ERR_OUT_OF_RANGE`, `ERR_DPDK`, ...): callers match on variants rather
//! than strings, and the binary crate converts to `anyhow::Error` at its
//! outer boundary.

use std::fmt;

/// Observable error taxonomy for the live tracer and the offline analyzer.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// A value fell outside its valid domain (e.g. a cuckoo table already
    /// at capacity, a location code above the analyzer's location limit).
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The NIC contract (component I) reported a fault — a timestamp
    /// register never latched, or a TX burst failed.
    #[error("NIC fault: {0}")]
    NicFault(String),

    /// An allocation failed (mmap region, mbuf pool, slab).
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// On-disk or on-wire bytes did not match the expected fixed layout.
    #[error("bad format: {0}")]
    BadFormat(String),

    /// A caller-supplied parameter was invalid (zero-length key, zero
    /// entries, malformed CLI value).
    #[error("bad parameter: {0}")]
    BadParam(String),

    /// A file or mmap operation failed at the OS boundary.
    #[error("I/O fault: {0}")]
    IoFault(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;

impl TraceError {
    pub fn out_of_range(what: impl fmt::Display) -> Self {
        TraceError::OutOfRange(what.to_string())
    }

    pub fn nic_fault(what: impl fmt::Display) -> Self {
        TraceError::NicFault(what.to_string())
    }

    pub fn bad_format(what: impl fmt::Display) -> Self {
        TraceError::BadFormat(what.to_string())
    }

    pub fn bad_param(what: impl fmt::Display) -> Self {
        TraceError::BadParam(what.to_string())
    }
}
