// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines the hierarchy of error types for the resource subsystem.
//!
//! Exhausted read slots or worker threads are deliberately absent: running out of
//! either defers work or falls back to inline execution and is never reported.

use crate::fail::AllocSite;
use crate::id::ResourceId;
use thiserror::Error;

/// Convenience alias for results produced by the resource manager.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// An error reported by a resource manager operation or stored on a failed record.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The manager, ID, path or size passed in was not acceptable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An allocation failed. All partial state has been rolled back.
    #[error("allocation failed at {0}")]
    Allocation(AllocSite),

    /// A fixed-capacity manager has no free slot left.
    #[error("resource manager capacity of {0} records is exhausted")]
    CapacityExhausted(usize),

    /// No package module and no host file can supply the path.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Opening or reading the underlying file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The logical path being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes were read than the source declared.
    #[error("short read on '{path}': expected {expected} bytes, got {actual}")]
    ShortRead {
        /// The logical path being read.
        path: String,
        /// Declared length.
        expected: u64,
        /// Bytes actually delivered.
        actual: u64,
    },

    /// A typed finalizer rejected the data, or none is registered for the kind.
    #[error("format error on '{path}': {message}")]
    Format {
        /// The logical path being finalized.
        path: String,
        /// Finalizer diagnostic.
        message: String,
    },

    /// The compressed stream was corrupt.
    #[error("decompression of '{path}' failed: {source}")]
    Decompress {
        /// The logical path being decompressed.
        path: String,
        /// What the decompressor rejected.
        #[source]
        source: DecompressError,
    },

    /// Raw byte-range access was requested on a compressed package entry.
    #[error("'{0}' is stored compressed and cannot be opened for raw access")]
    Compressed(String),

    /// Resolving a link chain revisited a record.
    #[error("link chain starting at {0} does not terminate")]
    LinkCycle(ResourceId),

    /// A weak link's target has already been released.
    #[error("link target of {0} has been released")]
    Stale(ResourceId),

    /// The manager has been destroyed; its IDs are no longer valid.
    #[error("resource manager has been destroyed")]
    ManagerClosed,

    /// The manager's storage failed its consistency check.
    #[error("resource manager storage is corrupt: {0}")]
    Corrupt(String),

    /// A package module could not be registered or queried.
    #[error(transparent)]
    Package(#[from] PackageError),
}

impl ResourceError {
    /// Shorthand for [`ResourceError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        ResourceError::InvalidArgument(message.into())
    }
}

/// An error raised while registering or reading a package module.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The module's own `init` reported failure.
    #[error("package module '{prefix}' failed to initialise: {reason}")]
    InitFailed {
        /// Prefix the module claims.
        prefix: String,
        /// Module diagnostic.
        reason: String,
    },

    /// The same module instance is already registered.
    #[error("package module '{0}' is already registered")]
    AlreadyRegistered(String),

    /// The container file is malformed.
    #[error("malformed package '{path}': {reason}")]
    Malformed {
        /// Container path on the host filesystem.
        path: String,
        /// What the reader rejected.
        reason: String,
    },

    /// Reading the container failed.
    #[error("I/O error on package '{path}': {source}")]
    Io {
        /// Container path on the host filesystem.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// An error raised by a decompressor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompressError {
    /// The stream does not start with the expected signature.
    #[error("bad stream signature")]
    BadSignature,

    /// Reserved flag bits are set.
    #[error("unsupported stream flags {0:#04x}")]
    BadFlags(u8),

    /// The stream header disagrees with the size recorded by the package.
    #[error("stream declares {declared} bytes but {expected} were expected")]
    SizeMismatch {
        /// Size recorded in the stream header.
        declared: u64,
        /// Size recorded by the package index.
        expected: u64,
    },

    /// A block failed to decompress or overflows the declared size.
    #[error("corrupt block at raw offset {0}")]
    CorruptBlock(u64),

    /// The decompressed data does not match the stored checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Input ended before the declared size was produced.
    #[error("stream truncated after {0} bytes")]
    Truncated(u64),

    /// Input continued after the stream was complete.
    #[error("trailing data after end of stream")]
    TrailingData,

    /// The output buffer could not be allocated.
    #[error("could not allocate {0} bytes for decompressed output")]
    OutOfMemory(usize),
}
