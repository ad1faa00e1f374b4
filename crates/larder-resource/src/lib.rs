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

//! # Larder Resource
//!
//! The asynchronous resource manager.
//!
//! A [`ResourceContext`] owns the shared services (read pool, decompression pool,
//! package registry, finalizers). Any number of [`ResourceManager`]s are created
//! against it; each hands out [`ResourceId`]s for data buffers, textures, fonts,
//! sounds, raw files and links.
//!
//! ```no_run
//! use larder_resource::{ContextConfig, ResourceContext, ResourceManager};
//!
//! # fn main() -> Result<(), larder_resource::ResourceError> {
//! let ctx = ResourceContext::new(ContextConfig::default());
//! let manager = ResourceManager::new(&ctx, 0)?;
//! let id = manager.load_data("assets/level1.bin")?;
//! manager.wait(manager.mark())?;
//! if let Some(bytes) = manager.get_data(id) {
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod context;
mod manager;

pub use context::{ContextStats, ResourceContext};
pub use manager::ResourceManager;

pub use larder_core::{
    AllocSite, ContextConfig, DecompressionConfig, FailPoints, FinalizeOrder, Finalizers, Font,
    LoadState, Mark, PackageError, PackageModule, ResourceError, ResourceId, ResourceKind,
    ResourceResult, Sound, Texture, TextureOptions,
};
