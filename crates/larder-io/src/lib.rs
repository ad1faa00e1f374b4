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

//! # Larder I/O
//!
//! The services the resource manager builds on:
//!
//! - [`ReadPool`]: a bounded pool of asynchronous reads shared by every manager of a
//!   context. When all slots are busy, issuing a read fails with
//!   [`ReadError::PoolFull`] and the caller is expected to retry later.
//! - [`PackageRegistry`]: routes logical paths to registered [`PackageModule`]s or to
//!   the host filesystem.
//! - [`pack`]: the reference package container, with its reader module and writer.
//! - [`codec`]: the LZ4 block stream used for compressed pack entries.
//! - [`DecompressionPool`]: worker threads running cancellable background jobs.
//!
//! [`PackageModule`]: larder_core::PackageModule

#![warn(missing_docs)]

pub mod codec;
pub mod decompress;
pub mod error;
pub mod file;
pub mod pack;
pub mod read_pool;
pub mod registry;
pub mod signal;

pub use decompress::{DecompressionPool, Job};
pub use error::{DecodeError, ReadError};
pub use file::FileRange;
pub use pack::{PackModule, PackWriter};
pub use read_pool::{ReadPool, ReadRequest, ReadSlot};
pub use registry::{FileSource, PackageRegistry};
pub use signal::CompletionSignal;
