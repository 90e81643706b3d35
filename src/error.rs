//! Error types for the ASMI driver and the RPD programmer

use std::{fmt, io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Which wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOp {
    /// Plain busy wait, e.g. the startup pre-wait
    Busy,
    /// Data-valid toggle after a READ command
    DataValid,
    /// Busy deasserting after a byte read
    Read,
    SectorErase,
    PageProgram,
}

impl fmt::Display for WaitOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitOp::Busy => "ASMI busy",
            WaitOp::DataValid => "ASMI data valid",
            WaitOp::Read => "ASMI read",
            WaitOp::SectorErase => "ASMI sector erase",
            WaitOp::PageProgram => "ASMI page write",
        };
        f.write_str(name)
    }
}

fn at(addr: &Option<u32>) -> String {
    match addr {
        Some(addr) => format!(" at {addr:#08x}"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum AsmiError {
    /// Erase and chunk writes must start on a sector and fit in one.
    #[error("{len} bytes at {offset:#x} violate 64KiB sector alignment")]
    Alignment { offset: u32, len: usize },

    #[error("{op} timed out after {}ms{}", .elapsed.as_millis(), at(.addr))]
    Timeout {
        op: WaitOp,
        addr: Option<u32>,
        elapsed: Duration,
    },

    #[error("core flagged an illegal erase at {addr:#08x}")]
    IllegalErase { addr: u32 },

    #[error("core flagged an illegal write at {addr:#08x}")]
    IllegalWrite { addr: u32 },
}

/// One byte that read back differently than it was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyMismatch {
    /// Position in the source image
    pub offset: u64,
    /// Flash address
    pub addr: u32,
    pub expected: u8,
    pub actual: u8,
}

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("RPD image is {len} bytes, larger than the {max} byte limit; refusing to write")]
    Capacity { len: u64, max: u64 },

    #[error("RPD image is empty")]
    Empty,

    #[error("{len} bytes at {base:#x} run past the end of the {flash_size} byte flash")]
    OutOfRange { base: u32, len: u64, flash_size: u32 },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("short read of {expected} bytes at offset {offset:#x}: {source}")]
    ShortRead {
        offset: u64,
        expected: usize,
        #[source]
        source: io::Error,
    },

    #[error("verify failed: {} mismatched bytes, first at {:#x}", .mismatches.len(), first_offset(.mismatches))]
    Verify { mismatches: Vec<VerifyMismatch> },

    #[error(transparent)]
    Asmi(#[from] AsmiError),
}

fn first_offset(mismatches: &[VerifyMismatch]) -> u64 {
    mismatches.first().map(|m| m.offset).unwrap_or_default()
}

/// Failure to bring up the register window.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to map {size:#x} bytes at {address:#x}: {source}")]
    Map {
        address: u64,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("ASMI register offset {offset:#x} outside the {size:#x} byte window")]
    Window { offset: usize, size: usize },
}

pub type Result<T, E = AsmiError> = std::result::Result<T, E>;
