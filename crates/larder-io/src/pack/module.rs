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

use super::format::{
    path_hash, IndexEntry, PackHeader, ENTRY_SIZE, HEADER_SIZE, PACK_MAGIC, PACK_VERSION,
};
use crate::codec::LzBlockDecompressor;
use larder_core::{DecompressError, Decompressor, PackageEntry, PackageError, PackageModule};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Input chunk size used when an entry is decompressed on the calling thread.
const CHUNK_SIZE: usize = 16 * 1024;

/// A [`PackageModule`] serving the files of one pack container.
///
/// The container is validated and its index loaded into memory by `init`; entry data
/// is only read on demand through the byte ranges the module hands out.
pub struct PackModule {
    prefix: String,
    container: PathBuf,
    index: RwLock<Option<Arc<PackIndex>>>,
}

struct PackIndex {
    entries: Vec<IndexEntry>,
    names: Vec<u8>,
}

impl PackModule {
    /// Creates a module that serves `container` under `prefix`. Nothing is read until
    /// the module is registered.
    pub fn new(prefix: impl Into<String>, container: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into(), container: container.into(), index: RwLock::new(None) }
    }

    /// The container this module reads.
    pub fn container(&self) -> &Path {
        &self.container
    }
}

impl PackageModule for PackModule {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn init(&self) -> Result<(), PackageError> {
        let index = PackIndex::load(&self.container)?;
        log::debug!(
            "Loaded pack '{}' with {} entries under '{}'",
            self.container.display(),
            index.entries.len(),
            self.prefix
        );
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(index));
        Ok(())
    }

    fn cleanup(&self) {
        self.index.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn list_files(&self) -> Box<dyn Iterator<Item = String> + Send> {
        let snapshot = self.index.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(index) = snapshot else {
            return Box::new(std::iter::empty());
        };
        Box::new(
            (0..index.entries.len())
                .filter_map(move |i| index.name(&index.entries[i]).map(str::to_owned)),
        )
    }

    fn file_info(&self, path: &str) -> Option<PackageEntry> {
        let guard = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let entry = guard.as_ref()?.find(path)?;
        Some(PackageEntry {
            container: self.container.clone(),
            offset: entry.data_offset,
            length: u64::from(entry.length),
            uncompressed_size: (entry.uncompressed_size != 0)
                .then_some(u64::from(entry.uncompressed_size)),
        })
    }

    fn decompress_chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    fn decompressor(&self, uncompressed_size: u64) -> Result<Box<dyn Decompressor>, DecompressError> {
        Ok(Box::new(LzBlockDecompressor::new(uncompressed_size)))
    }
}

impl PackIndex {
    fn load(path: &Path) -> Result<Self, PackageError> {
        let malformed = |reason: &str| PackageError::Malformed {
            path: path.display().to_string(),
            reason: reason.to_owned(),
        };
        let io_error = |source| PackageError::Io { path: path.display().to_string(), source };

        let mut file = File::open(path).map_err(io_error)?;
        let file_len = file.metadata().map_err(io_error)?.len();

        let mut raw_header = [0u8; HEADER_SIZE];
        file.read_exact(&mut raw_header).map_err(|_| malformed("truncated header"))?;
        let header = bytemuck::pod_read_unaligned::<PackHeader>(&raw_header).swap_le();
        if header.magic != PACK_MAGIC {
            return Err(malformed("bad signature"));
        }
        if header.version != PACK_VERSION {
            return Err(malformed(&format!("unsupported version {}", header.version)));
        }

        let data_start = HEADER_SIZE as u64 + ENTRY_SIZE as u64 * u64::from(header.entry_count);
        if header.names_offset < data_start || header.names_offset > file_len {
            return Err(malformed("name table out of range"));
        }

        let mut raw_index = vec![0u8; (data_start - HEADER_SIZE as u64) as usize];
        file.read_exact(&mut raw_index).map_err(|_| malformed("truncated index"))?;
        let entries: Vec<IndexEntry> = raw_index
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| bytemuck::pod_read_unaligned::<IndexEntry>(chunk).swap_le())
            .collect();

        let mut names = Vec::new();
        file.seek(SeekFrom::Start(header.names_offset)).map_err(io_error)?;
        file.read_to_end(&mut names).map_err(io_error)?;

        let index = PackIndex { entries, names };
        index.validate(data_start, header.names_offset).map_err(malformed)?;
        Ok(index)
    }

    fn validate(&self, data_start: u64, data_end: u64) -> Result<(), &'static str> {
        if self.entries.windows(2).any(|pair| pair[0].path_hash > pair[1].path_hash) {
            return Err("index is not sorted");
        }
        for entry in &self.entries {
            let end = entry.data_offset.checked_add(u64::from(entry.length));
            if entry.data_offset < data_start || end.map_or(true, |end| end > data_end) {
                return Err("entry data out of range");
            }
            let name = self.name(entry).ok_or("entry name out of range")?;
            if path_hash(name) != entry.path_hash {
                return Err("entry hash does not match its name");
            }
        }
        Ok(())
    }

    fn name(&self, entry: &IndexEntry) -> Option<&str> {
        let tail = self.names.get(entry.name_offset as usize..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..len]).ok()
    }

    fn find(&self, path: &str) -> Option<&IndexEntry> {
        let hash = path_hash(path);
        let start = self.entries.partition_point(|entry| entry.path_hash < hash);
        self.entries[start..]
            .iter()
            .take_while(|entry| entry.path_hash == hash)
            .find(|entry| self.name(entry).is_some_and(|name| name.eq_ignore_ascii_case(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackWriter;

    fn build(dir: &Path) -> PathBuf {
        let path = dir.join("test.lpak");
        let mut writer = PackWriter::new();
        writer.add("top.txt", b"top", false).unwrap();
        writer.add("data/1.txt", b"hello", false).unwrap();
        writer.add("data/big.bin", &vec![7u8; 10_000], true).unwrap();
        writer.write_file(&path).unwrap();
        path
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let module = PackModule::new("pkg/", build(dir.path()));
        module.init().unwrap();

        let entry = module.file_info("DATA/1.txt").unwrap();
        assert_eq!(entry.length, 5);
        assert!(!entry.is_compressed());
        assert!(module.file_info("data/2.txt").is_none());

        let big = module.file_info("data/big.bin").unwrap();
        assert_eq!(big.uncompressed_size, Some(10_000));
        assert!(big.length < 10_000);
    }

    #[test]
    fn listing_and_lookup_stop_after_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let module = PackModule::new("pkg/", build(dir.path()));
        module.init().unwrap();
        let mut names: Vec<String> = module.list_files().collect();
        names.sort();
        assert_eq!(names, ["data/1.txt", "data/big.bin", "top.txt"]);

        module.cleanup();
        assert_eq!(module.list_files().count(), 0);
        assert!(module.file_info("top.txt").is_none());
    }

    #[test]
    fn listing_reads_the_index_it_started_with() {
        let dir = tempfile::tempdir().unwrap();
        let module = PackModule::new("pkg/", build(dir.path()));
        module.init().unwrap();
        let mut listing = module.list_files();
        let first = listing.next().unwrap();

        module.cleanup();
        assert_eq!(module.list_files().count(), 0);
        let mut names: Vec<String> = std::iter::once(first).chain(listing).collect();
        names.sort();
        assert_eq!(names, ["data/1.txt", "data/big.bin", "top.txt"]);
    }

    #[test]
    fn malformed_containers_fail_init() {
        let dir = tempfile::tempdir().unwrap();
        let good = std::fs::read(build(dir.path())).unwrap();

        let cases: [(&str, Box<dyn Fn(&mut Vec<u8>)>); 3] = [
            ("magic", Box::new(|bytes| bytes[0] = b'X')),
            ("version", Box::new(|bytes| bytes[4] = 9)),
            ("truncated", Box::new(|bytes| bytes.truncate(30))),
        ];
        for (name, corrupt) in cases {
            let mut bytes = good.clone();
            corrupt(&mut bytes);
            let path = dir.path().join(format!("{name}.lpak"));
            std::fs::write(&path, bytes).unwrap();
            let module = PackModule::new("bad/", path);
            assert!(
                matches!(module.init(), Err(PackageError::Malformed { .. })),
                "corruption '{name}' was accepted"
            );
        }

        let missing = PackModule::new("gone/", dir.path().join("absent.lpak"));
        assert!(matches!(missing.init(), Err(PackageError::Io { .. })));
    }
}
