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

use super::format::{path_hash, IndexEntry, PackHeader, ENTRY_SIZE, HEADER_SIZE, PACK_MAGIC, PACK_VERSION};
use crate::codec::compress_stream;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

struct PendingEntry {
    name: String,
    data: Vec<u8>,
    uncompressed_size: u32,
}

/// Builds a pack container in memory and writes it out in one go.
#[derive(Default)]
pub struct PackWriter {
    entries: Vec<PendingEntry>,
    checksums: bool,
}

/// Totals reported after a pack has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackSummary {
    /// Number of entries written.
    pub entries: usize,
    /// Number of entries stored compressed.
    pub compressed: usize,
    /// Sum of the entries' logical sizes.
    pub raw_bytes: u64,
    /// Size of the container file.
    pub packed_bytes: u64,
}

impl PackWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Embeds a blake3 checksum in every compressed entry added afterwards.
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums = enabled;
        self
    }

    /// Adds a file under `path` (stored lowercase, with forward slashes).
    ///
    /// Empty files are always stored uncompressed. Fails if the path is already
    /// present or an entry does not fit the 32-bit size fields.
    pub fn add(&mut self, path: &str, bytes: &[u8], compress: bool) -> io::Result<()> {
        let name = path.replace('\\', "/").trim_start_matches('/').to_lowercase();
        if name.is_empty() || name.contains('\0') {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid entry path"));
        }
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("duplicate entry '{name}'"),
            ));
        }
        let raw_len = u32::try_from(bytes.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry exceeds 4 GiB"))?;

        let (data, uncompressed_size) = if compress && raw_len > 0 {
            (compress_stream(bytes, self.checksums), raw_len)
        } else {
            (bytes.to_vec(), 0)
        };
        if u32::try_from(data.len()).is_err() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "entry exceeds 4 GiB"));
        }
        self.entries.push(PendingEntry { name, data, uncompressed_size });
        Ok(())
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialises the container into `out`.
    pub fn write_to<W: Write>(mut self, out: &mut W) -> io::Result<PackSummary> {
        self.entries.sort_by_key(|entry| (path_hash(&entry.name), entry.name.clone()));

        let data_start = (HEADER_SIZE + ENTRY_SIZE * self.entries.len()) as u64;
        let mut index = Vec::with_capacity(self.entries.len());
        let mut names = Vec::new();
        let mut data_offset = data_start;
        let mut summary = PackSummary { entries: self.entries.len(), ..Default::default() };

        for entry in &self.entries {
            let name_offset = u32::try_from(names.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name table too large"))?;
            names.extend_from_slice(entry.name.as_bytes());
            names.push(0);

            index.push(IndexEntry {
                path_hash: path_hash(&entry.name),
                name_offset,
                data_offset,
                length: entry.data.len() as u32,
                uncompressed_size: entry.uncompressed_size,
            });
            data_offset += entry.data.len() as u64;
            summary.raw_bytes += if entry.uncompressed_size > 0 {
                summary.compressed += 1;
                u64::from(entry.uncompressed_size)
            } else {
                entry.data.len() as u64
            };
        }

        let header = PackHeader {
            magic: PACK_MAGIC,
            version: PACK_VERSION,
            entry_count: self.entries.len() as u32,
            reserved: 0,
            names_offset: data_offset,
        };
        out.write_all(bytemuck::bytes_of(&header.swap_le()))?;
        for entry in index {
            out.write_all(bytemuck::bytes_of(&entry.swap_le()))?;
        }
        for entry in &self.entries {
            out.write_all(&entry.data)?;
        }
        out.write_all(&names)?;

        summary.packed_bytes = data_offset + names.len() as u64;
        Ok(summary)
    }

    /// Writes the container to a new file at `path`.
    pub fn write_file(self, path: &Path) -> io::Result<PackSummary> {
        let mut out = BufWriter::new(File::create(path)?);
        let summary = self.write_to(&mut out)?;
        out.flush()?;
        Ok(summary)
    }
}
