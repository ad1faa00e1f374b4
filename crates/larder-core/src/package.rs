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

//! Contracts for pluggable package modules.
//!
//! A package module overlays a virtual directory on the host filesystem. Every path
//! that starts with the module's prefix (compared case-insensitively) is served from
//! the module instead: the module maps the remainder of the path to a byte range in
//! some host file, optionally compressed with a format only the module understands.

use crate::error::{DecompressError, PackageError};
use std::path::PathBuf;

/// Location of one logical file inside a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    /// Host file holding the entry's bytes.
    pub container: PathBuf,
    /// Byte offset of the entry within the container.
    pub offset: u64,
    /// Stored length of the entry (the compressed length if compressed).
    pub length: u64,
    /// Size after decompression, or `None` if the entry is stored as-is.
    pub uncompressed_size: Option<u64>,
}

impl PackageEntry {
    /// `true` if the entry must pass through the module's decompressor.
    pub fn is_compressed(&self) -> bool {
        self.uncompressed_size.is_some()
    }

    /// Size of the entry as seen by a loader.
    pub fn logical_size(&self) -> u64 {
        self.uncompressed_size.unwrap_or(self.length)
    }
}

/// Outcome of feeding one chunk of input to a [`Decompressor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// All input so far has been consumed; more is required.
    NeedInput,
    /// The stream is complete and its full output has been produced.
    Done,
}

/// The state of one decompression in progress.
///
/// Input may be pushed in arbitrary chunk sizes; the decompressor keeps whatever
/// partial data it needs between calls. Dropping it releases that state.
pub trait Decompressor: Send {
    /// Consumes `input` and appends the bytes it decodes to `output`.
    ///
    /// The caller reserves `output` for the entry's full uncompressed size up front,
    /// so the decompressor must never produce more than that.
    fn decompress(&mut self, input: &[u8], output: &mut Vec<u8>)
        -> Result<Progress, DecompressError>;
}

/// A virtual filesystem overlay.
pub trait PackageModule: Send + Sync {
    /// The path prefix this module claims, e.g. `"pkg/"`.
    fn prefix(&self) -> &str;

    /// Prepares the module for use. Called once on registration.
    fn init(&self) -> Result<(), PackageError>;

    /// Releases whatever `init` acquired. Called once on unregistration or teardown.
    fn cleanup(&self);

    /// Every file the module serves, relative to its prefix, in any order.
    ///
    /// Each call returns a fresh sequence over a snapshot of the module's contents, so
    /// the iterator may outlive the borrow and is unaffected by a later `cleanup`.
    fn list_files(&self) -> Box<dyn Iterator<Item = String> + Send>;

    /// Looks up `path` (relative to the prefix, case-insensitive).
    fn file_info(&self, path: &str) -> Option<PackageEntry>;

    /// Largest input chunk the module's decompressor should be fed at once when
    /// decompressing on the calling thread.
    fn decompress_chunk_size(&self) -> usize {
        64 * 1024
    }

    /// Starts decompressing an entry of the given uncompressed size.
    fn decompressor(&self, uncompressed_size: u64) -> Result<Box<dyn Decompressor>, DecompressError>;
}
