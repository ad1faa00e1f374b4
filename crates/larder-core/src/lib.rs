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

//! # Larder Core
//!
//! Foundational crate containing the identifiers, state enums, error taxonomy and
//! capability contracts shared by the I/O layer and the resource manager.
//!
//! Nothing in this crate performs I/O. The typed finalizers (texture decoding, font
//! parsing, sound decoding) are only described here as traits; concrete decoders are
//! supplied by the embedding application.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod fail;
pub mod finalize;
pub mod id;
pub mod package;
pub mod resource;

pub use config::{ContextConfig, DecompressionConfig};
pub use error::{DecompressError, PackageError, ResourceError, ResourceResult};
pub use fail::{AllocSite, FailPoints};
pub use finalize::{
    ByteSource, FinalizeResult, Finalizers, Font, FontParser, Sound, SoundDecoder, Texture,
    TextureDecoder, TextureOptions,
};
pub use id::{Mark, ResourceId};
pub use package::{Decompressor, PackageEntry, PackageModule, Progress};
pub use resource::{FinalizeOrder, LoadState, ResourceKind};
