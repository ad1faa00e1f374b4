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

//! Raw file resources and streamed sounds.
//!
//! Raw access reads stored bytes directly, so it is refused for compressed package
//! entries.

use super::links::{self, Resolution};
use super::slots::{Body, FileResource, Payload};
use super::ResourceManager;
use larder_core::{ResourceError, ResourceId, ResourceKind, ResourceResult};
use larder_io::{FileRange, FileSource};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

fn io_error(container: &Path, source: std::io::Error) -> ResourceError {
    ResourceError::Io { path: container.display().to_string(), source }
}

impl ResourceManager {
    fn resolve_uncompressed(&self, path: &str) -> ResourceResult<FileSource> {
        self.shared.ensure_usable()?;
        let source = self.shared.ctx.registry.resolve(path)?;
        if source.is_compressed() {
            return Err(ResourceError::Compressed(path.to_owned()));
        }
        Ok(source)
    }

    fn with_file<R>(
        &self,
        id: ResourceId,
        access: impl FnOnce(&mut FileResource) -> ResourceResult<R>,
    ) -> ResourceResult<R> {
        self.shared.ensure_usable()?;
        let (owner, target) = match links::resolve(&self.shared, id) {
            Resolution::Terminal(owner, target) => (owner, target),
            other => return Err(other.into_error(id)),
        };
        let mut state = owner.lock();
        match state.slots.get_mut(target).map(|record| &mut record.body) {
            Some(Body::File(file)) => access(file),
            _ => Err(ResourceError::invalid(format!("resource {id} is not a file"))),
        }
    }

    /// Opens `path` for positioned reads.
    ///
    /// Fails without creating a record if the path cannot be opened or names a
    /// compressed package entry.
    pub fn open_file(&self, path: &str) -> ResourceResult<ResourceId> {
        let source = self.resolve_uncompressed(path)?;
        let file = File::open(&source.container).map_err(|err| io_error(&source.container, err))?;
        let resource = FileResource {
            file: Arc::new(file),
            container: source.container,
            base: source.offset,
            size: source.length,
            position: 0,
        };
        let id = self.insert_ready(ResourceKind::File, Body::File(resource))?;
        log::debug!("Opened '{path}' as file {id}");
        Ok(id)
    }

    /// Size in bytes of file resource `id`.
    pub fn file_size(&self, id: ResourceId) -> ResourceResult<u64> {
        self.with_file(id, |file| Ok(file.size))
    }

    /// Current read position of file resource `id`.
    pub fn file_position(&self, id: ResourceId) -> ResourceResult<u64> {
        self.with_file(id, |file| Ok(file.position))
    }

    /// Moves the read position of file resource `id`. Positions past the end fail.
    pub fn set_file_position(&self, id: ResourceId, position: u64) -> ResourceResult<()> {
        self.with_file(id, |file| {
            if position > file.size {
                return Err(ResourceError::invalid(format!(
                    "position {position} is past the end of a {}-byte file",
                    file.size
                )));
            }
            file.position = position;
            Ok(())
        })
    }

    /// Reads from the current position into `buffer`, advancing the position. Returns
    /// the number of bytes read, which is short only at the end of the file.
    pub fn read_file(&self, id: ResourceId, buffer: &mut [u8]) -> ResourceResult<usize> {
        self.with_file(id, |file| {
            let read = read_range(file, file.position, buffer)?;
            file.position += read as u64;
            Ok(read)
        })
    }

    /// Reads at `offset` into `buffer` without moving the position.
    pub fn read_file_at(&self, id: ResourceId, offset: u64, buffer: &mut [u8]) -> ResourceResult<usize> {
        self.with_file(id, |file| read_range(file, offset, buffer))
    }

    /// The underlying host file and the offset at which the resource's bytes start.
    ///
    /// The handle shares its cursor with the manager's own reads; callers must seek
    /// before every read.
    pub fn file_handle(&self, id: ResourceId) -> ResourceResult<(Arc<File>, u64)> {
        self.with_file(id, |file| Ok((file.file.clone(), file.base)))
    }

    /// Opens a sound that streams from `path` through the registered sound decoder.
    pub fn open_sound(&self, path: &str) -> ResourceResult<ResourceId> {
        let source = self.resolve_uncompressed(path)?;
        let range = FileRange::open(&source.container, source.offset, source.length)
            .map_err(|err| io_error(&source.container, err))?;
        self.stream_sound(path, range)
    }

    /// Opens a sound that streams from the byte range of file resource `file`.
    pub fn open_sound_from_file(&self, file: ResourceId) -> ResourceResult<ResourceId> {
        let (container, base, size) =
            self.with_file(file, |file| Ok((file.container.clone(), file.base, file.size)))?;
        let range =
            FileRange::open(&container, base, size).map_err(|err| io_error(&container, err))?;
        self.stream_sound(&container.display().to_string(), range)
    }

    fn stream_sound(&self, path: &str, range: FileRange) -> ResourceResult<ResourceId> {
        let finalizers = self.shared.ctx.finalizers();
        let decoder = finalizers.sounds().ok_or_else(|| ResourceError::Format {
            path: path.to_owned(),
            message: "no sound decoder registered".to_owned(),
        })?;
        let sound = decoder
            .open_stream(Box::new(range))
            .map_err(|err| ResourceError::Format { path: path.to_owned(), message: err.to_string() })?;
        self.insert_ready(ResourceKind::Sound, Body::Ready(Payload::Sound(sound)))
    }
}

fn read_range(file: &FileResource, offset: u64, buffer: &mut [u8]) -> ResourceResult<usize> {
    let available = file.size.saturating_sub(offset);
    let len = (buffer.len() as u64).min(available) as usize;
    if len == 0 {
        return Ok(0);
    }
    let mut handle = file.file.as_ref();
    handle
        .seek(SeekFrom::Start(file.base + offset))
        .and_then(|_| handle.read_exact(&mut buffer[..len]))
        .map_err(|err| io_error(&file.container, err))?;
    Ok(len)
}
