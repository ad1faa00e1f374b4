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

//! Errors of the I/O layer.

use larder_core::{DecompressError, ResourceError};
use std::io;
use thiserror::Error;

/// An error from a host file read.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Every read slot is busy. Not a failure: the read must be retried later.
    #[error("all read slots are busy")]
    PoolFull,

    /// Opening, seeking or reading the file failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The file ended before the requested range did.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Requested length.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },
}

impl ReadError {
    /// Converts into the error stored on a failed record for `path`.
    pub fn into_resource_error(self, path: &str) -> ResourceError {
        match self {
            ReadError::PoolFull => {
                ResourceError::Io { path: path.to_owned(), source: io::ErrorKind::WouldBlock.into() }
            }
            ReadError::Io(source) => ResourceError::Io { path: path.to_owned(), source },
            ReadError::ShortRead { expected, actual } => {
                ResourceError::ShortRead { path: path.to_owned(), expected, actual }
            }
        }
    }
}

/// An error from a complete read-and-decompress pass over a compressed entry.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Reading the compressed input failed.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// The compressed input was corrupt.
    #[error(transparent)]
    Decompress(#[from] DecompressError),

    /// The job was cancelled before it finished.
    #[error("decode was cancelled")]
    Cancelled,
}

impl DecodeError {
    /// Converts into the error stored on a failed record for `path`.
    pub fn into_resource_error(self, path: &str) -> ResourceError {
        match self {
            DecodeError::Read(err) => err.into_resource_error(path),
            DecodeError::Decompress(source) => {
                ResourceError::Decompress { path: path.to_owned(), source }
            }
            DecodeError::Cancelled => ResourceError::Io {
                path: path.to_owned(),
                source: io::ErrorKind::Interrupted.into(),
            },
        }
    }
}
