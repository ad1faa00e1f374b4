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

//! Positioned reads from host files.

use crate::error::ReadError;
use larder_core::ByteSource;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Appends exactly `len` bytes read from `file` at `offset` to `buffer`.
///
/// The caller is expected to have reserved room for them already.
pub fn read_range_into(
    mut file: &File,
    offset: u64,
    len: u64,
    buffer: &mut Vec<u8>,
) -> Result<(), ReadError> {
    file.seek(SeekFrom::Start(offset))?;
    let actual = file.take(len).read_to_end(buffer)? as u64;
    if actual != len {
        return Err(ReadError::ShortRead { expected: len, actual });
    }
    Ok(())
}

/// Opens `path` and appends the byte range `offset..offset + len` to `buffer`.
pub fn read_path_range_into(
    path: &Path,
    offset: u64,
    len: u64,
    buffer: &mut Vec<u8>,
) -> Result<(), ReadError> {
    let file = File::open(path)?;
    read_range_into(&file, offset, len, buffer)
}

/// A byte range of a host file, readable and seekable as if it were a file of its own.
#[derive(Debug)]
pub struct FileRange {
    file: File,
    base: u64,
    len: u64,
    pos: u64,
}

impl FileRange {
    /// Opens `len` bytes of `path` starting at `base`.
    pub fn open(path: &Path, base: u64, len: u64) -> io::Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(base))?;
        Ok(Self { file, base, len, pos: 0 })
    }
}

impl Read for FileRange {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let read = self.file.read(&mut buf[..want])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for FileRange {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let pos = match target {
            SeekFrom::Start(pos) => Some(pos),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of range"))?;
        let pos = pos.min(self.len);
        self.file.seek(SeekFrom::Start(self.base + pos))?;
        self.pos = pos;
        Ok(pos)
    }
}

impl ByteSource for FileRange {
    fn size(&self) -> u64 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.bin");
        File::create(&path).unwrap().write_all(contents).unwrap();
        (dir, path)
    }

    #[test]
    fn range_read_appends_requested_bytes() {
        let (_dir, path) = scratch(b"0123456789");
        let mut buffer = b"ab".to_vec();
        read_path_range_into(&path, 3, 4, &mut buffer).unwrap();
        assert_eq!(buffer, b"ab3456");
    }

    #[test]
    fn range_past_end_is_a_short_read() {
        let (_dir, path) = scratch(b"0123456789");
        let mut buffer = Vec::new();
        let err = read_path_range_into(&path, 8, 4, &mut buffer).unwrap_err();
        assert!(matches!(err, ReadError::ShortRead { expected: 4, actual: 2 }));
    }

    #[test]
    fn file_range_is_clamped_and_seekable() {
        let (_dir, path) = scratch(b"0123456789");
        let mut range = FileRange::open(&path, 2, 5).unwrap();
        let mut all = String::new();
        range.read_to_string(&mut all).unwrap();
        assert_eq!(all, "23456");

        range.seek(SeekFrom::End(-2)).unwrap();
        let mut tail = String::new();
        range.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "56");
        assert_eq!(range.size(), 5);
        assert!(range.seek(SeekFrom::Current(-100)).is_err());
    }
}
