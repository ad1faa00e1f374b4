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

//! Record variants and load states.

/// The variant of a resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A raw byte buffer.
    Data,
    /// A decoded texture.
    Texture,
    /// A parsed bitmap or vector font.
    Font,
    /// A decoded or streaming sound.
    Sound,
    /// A raw file opened for positioned reads.
    File,
    /// An alias that keeps its target alive.
    StrongLink,
    /// An alias that observes its target and goes stale once it is released.
    WeakLink,
}

impl ResourceKind {
    /// `true` for the two alias variants.
    pub fn is_link(self) -> bool {
        matches!(self, ResourceKind::StrongLink | ResourceKind::WeakLink)
    }
}

/// Load state of a resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Populated synchronously, no asynchronous step was ever involved.
    None,
    /// Waiting on I/O, decompression or finalization.
    Pending,
    /// Loaded successfully.
    Done,
    /// Loading failed; the record holds no payload.
    Error,
}

impl LoadState {
    /// `true` if the state can no longer change.
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoadState::Pending)
    }
}

/// Direction in which `sync`/`wait` visit pending records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinalizeOrder {
    /// Oldest mark first.
    #[default]
    Forward,
    /// Newest mark first.
    Reverse,
}
