// Fault and error types. Emulated bus faults and mapper faults are plain
// data returned up the access call chain (spec design option (a)); only
// host-level configuration/IO failures are `std::error::Error`.

use std::path::PathBuf;

/// Access-error codes as latched by the CSR, mirroring the original's
/// `ACCESS_ERROR_*` bitmask (see `original_source/csr.h`).
pub const ACCESS_ERROR_OK: u8 = 0;
pub const ACCESS_ERROR_U: u8 = 1;
pub const ACCESS_ERROR_A: u8 = 2;
pub const ACCESS_ERROR_MBTO: u8 = 4;
pub const ACCESS_ERROR_AJOB: u8 = 8;

/// Reason a mapper lookup refused an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapFault {
    /// An inhibit bit for the requested direction was set.
    Permission,
    /// User-mode write with a page user-ID that doesn't match the current id.
    UserId(u8),
    /// Page descriptor encodes the "not mapped" pattern (all inhibits + PPN 0xFFF).
    InvalidPage,
}

impl MapFault {
    pub fn access_error_code(self) -> u8 {
        match self {
            MapFault::Permission | MapFault::InvalidPage => ACCESS_ERROR_A,
            MapFault::UserId(_) => ACCESS_ERROR_U,
        }
    }
}

/// A bus fault that aborts the in-flight CPU access. Returned by the bus
/// fabric instead of the original's `longjmp`-based bus error; the caller
/// (the `CpuCore` interpreter bridge) decides how to turn this into an
/// emulated exception entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError {
    pub addr: u32,
    pub is_write: bool,
    pub code: u8,
}

impl BusError {
    pub fn new(addr: u32, is_write: bool, code: u8) -> Self {
        BusError { addr, is_write, code }
    }

    pub fn from_map_fault(addr: u32, is_write: bool, fault: MapFault) -> Self {
        BusError::new(addr, is_write, fault.access_error_code())
    }
}

/// Result of a bus-fabric access.
pub type BusResult<T> = Result<T, BusError>;

/// Host-level configuration and IO errors. These are the only errors in the
/// crate that implement `std::error::Error` and are allowed to escape the
/// emulation loop; they terminate `main` with a diagnostic rather than being
/// fed back into the emulated machine.
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("failed to read ROM image {}: {source}", path.display())]
    RomImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open hard disk image {}: {source}", path.display())]
    HardDiskImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create copy-on-write directory {}: {source}", path.display())]
    CowDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to access RTC-RAM file {}: {source}", path.display())]
    RtcRamFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("memory size must be 1, 2, 4 or 8 MiB, got {0} MiB")]
    InvalidMemorySize(u32),
    #[error("unknown log level '{0}'")]
    UnknownLogLevel(String),
    #[error("unknown log module '{0}'")]
    UnknownLogModule(String),
    #[error("missing value for argument '{0}'")]
    MissingArgumentValue(String),
    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
}
