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

//! On-disk structures of the pack container.
//!
//! ```text
//! PackHeader                       24 bytes
//! IndexEntry x entry_count         24 bytes each, sorted by path_hash
//! entry data                       stored or LZ4 block streams
//! name table at names_offset       NUL-terminated lowercase paths
//! ```
//!
//! All integers are little-endian.

use bytemuck::{Pod, Zeroable};

/// Container signature.
pub const PACK_MAGIC: [u8; 4] = *b"LPAK";
/// The only supported container version.
pub const PACK_VERSION: u32 = 1;
/// Size of [`PackHeader`] on disk.
pub const HEADER_SIZE: usize = std::mem::size_of::<PackHeader>();
/// Size of one [`IndexEntry`] on disk.
pub const ENTRY_SIZE: usize = std::mem::size_of::<IndexEntry>();

/// The fixed container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PackHeader {
    /// [`PACK_MAGIC`].
    pub magic: [u8; 4],
    /// [`PACK_VERSION`].
    pub version: u32,
    /// Number of index entries.
    pub entry_count: u32,
    /// Always zero.
    pub reserved: u32,
    /// Absolute offset of the name table.
    pub names_offset: u64,
}

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct IndexEntry {
    /// [`path_hash`] of the entry's lowercase path.
    pub path_hash: u32,
    /// Offset of the entry's name relative to the start of the name table.
    pub name_offset: u32,
    /// Absolute offset of the entry's data.
    pub data_offset: u64,
    /// Stored length of the data.
    pub length: u32,
    /// Decoded length, or zero if the data is stored uncompressed.
    pub uncompressed_size: u32,
}

impl PackHeader {
    /// Converts between little-endian disk order and host order.
    pub fn swap_le(self) -> Self {
        Self {
            magic: self.magic,
            version: u32::from_le(self.version),
            entry_count: u32::from_le(self.entry_count),
            reserved: u32::from_le(self.reserved),
            names_offset: u64::from_le(self.names_offset),
        }
    }
}

impl IndexEntry {
    /// Converts between little-endian disk order and host order.
    pub fn swap_le(self) -> Self {
        Self {
            path_hash: u32::from_le(self.path_hash),
            name_offset: u32::from_le(self.name_offset),
            data_offset: u64::from_le(self.data_offset),
            length: u32::from_le(self.length),
            uncompressed_size: u32::from_le(self.uncompressed_size),
        }
    }
}

/// Hash under which a path is indexed: the first four bytes of the blake3 hash of
/// its lowercase form.
pub fn path_hash(path: &str) -> u32 {
    let lower = path.to_lowercase();
    let digest = blake3::hash(lower.as_bytes());
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_structures_have_fixed_sizes() {
        assert_eq!(HEADER_SIZE, 24);
        assert_eq!(ENTRY_SIZE, 24);
    }

    #[test]
    fn hash_ignores_case() {
        assert_eq!(path_hash("Data/1.TXT"), path_hash("data/1.txt"));
        assert_ne!(path_hash("data/1.txt"), path_hash("data/2.txt"));
    }
}
