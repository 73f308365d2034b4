// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Common error types used throughout the kernel

use crate::rustux::types::*;

/// Result type for operations that can fail
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Common error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Ok = 0,
    Err = -1,
    InvalidArgs = -2,
    BadHandle = -3,
    BadState = -4,
    NotSupported = -5,
    NoMemory = -6,
    TimedOut = -7,
    NotFound = -8,
    AlreadyExists = -9,
    AccessDenied = -10,
    Io = -11,
    Internal = -12,
}

impl Error {
    /// Convert error to status code
    pub fn to_status(self) -> Status {
        self as Status
    }

    /// Convert status code to error
    pub fn from_status(status: Status) -> Self {
        match status {
            0 => Error::Ok,
            -1 => Error::Err,
            -2 => Error::InvalidArgs,
            -3 => Error::BadHandle,
            -4 => Error::BadState,
            -5 => Error::NotSupported,
            -6 => Error::NoMemory,
            -7 => Error::TimedOut,
            -8 => Error::NotFound,
            -9 => Error::AlreadyExists,
            -10 => Error::AccessDenied,
            -11 => Error::Io,
            -12 => Error::Internal,
            _ => Error::Internal,
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Self::from_status(status)
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

/// Result type for allocator engine operations.
pub type AllocResult<T> = core::result::Result<T, AllocError>;

/// Error taxonomy for the allocator engine's public operations.
///
/// Reported by value; the engine never panics or unwinds on these
/// conditions. The only case that leaves the engine fully usable for
/// subsequent (smaller) requests is `OutOfMemory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// `size == 0`, a zero operand where a positive value is required, or a
    /// null pointer where one is prohibited.
    InvalidArgument,
    /// A size computation (rounding, `count * elem_size`, or the header's
    /// bit-packed size field) would exceed the addressable range.
    SizeOverflow,
    /// The heap extender or page mapper collaborator failed to produce more
    /// address space.
    OutOfMemory,
    /// The pointer passed to `release`/`reallocate` does not lie within the
    /// heap and was never returned by a mapping allocation.
    InvalidPointer,
    /// `release` was called on a block whose header already reads free.
    DoubleFree,
}

impl From<AllocError> for Error {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::InvalidArgument => Error::InvalidArgs,
            AllocError::SizeOverflow => Error::Internal,
            AllocError::OutOfMemory => Error::NoMemory,
            AllocError::InvalidPointer => Error::NotFound,
            AllocError::DoubleFree => Error::BadState,
        }
    }
}

impl From<AllocError> for Status {
    fn from(err: AllocError) -> Self {
        Error::from(err).to_status()
    }
}
