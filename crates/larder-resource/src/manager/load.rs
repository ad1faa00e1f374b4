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

//! The load state machine of one pending record.
//!
//! ```text
//! Deferred ──slot free──> Reading ──read done──┐
//!    │                                          ├──> Finalizing ──> (record DONE/ERROR)
//!    └──compressed, pool free──> Background ────┘
//! ```
//!
//! Reads and background jobs progress on their own threads. Finalization (foreground
//! decompression and the typed finalizer) only ever runs on a thread calling
//! `sync`/`wait`.

use super::slots::Payload;
use crate::context::ContextInner;
use larder_core::{
    AllocSite, Decompressor, Finalizers, ResourceError, ResourceKind, ResourceResult,
    TextureOptions,
};
use larder_io::decompress::{decompress_buffer, decompress_streamed, Cancellation, StreamInput};
use larder_io::{DecodeError, FileSource, Job, ReadPool, ReadRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// What a load turns its bytes into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LoadKind {
    Data,
    Texture(TextureOptions),
    BitmapFont,
    FreetypeFont(f32),
    Sound,
}

impl LoadKind {
    pub(crate) fn resource_kind(self) -> ResourceKind {
        match self {
            LoadKind::Data => ResourceKind::Data,
            LoadKind::Texture(_) => ResourceKind::Texture,
            LoadKind::BitmapFont | LoadKind::FreetypeFont(_) => ResourceKind::Font,
            LoadKind::Sound => ResourceKind::Sound,
        }
    }
}

type DecodeOutcome = Result<Vec<u8>, DecodeError>;

enum Stage {
    Deferred,
    Reading(ReadRequest),
    Background(Job<DecodeOutcome>),
    Finalizing,
    Failed(Option<ResourceError>),
}

/// Result of trying to issue a task's I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    Started,
    Deferred,
    Failed,
}

/// Result of polling a task for completion.
pub(crate) enum TaskPoll {
    /// I/O or decompression is still running.
    Pending,
    /// The bytes are in; the caller must finalize them.
    Ready { bytes: Vec<u8>, compressed: bool },
    /// The load failed before finalization.
    Failed(ResourceError),
}

/// Transient state of a pending load.
pub(crate) struct LoadTask {
    source: FileSource,
    kind: LoadKind,
    stage: Mutex<Stage>,
    live: Arc<AtomicUsize>,
}

enum BackgroundStart {
    Spawned(Job<DecodeOutcome>),
    Foreground(Option<Vec<u8>>),
}

/// Everything a background job needs, handed back whole if no worker is free.
struct BackgroundDecode {
    reads: Arc<ReadPool>,
    input: StreamInput,
    buffers: [Vec<u8>; 2],
    decompressor: Box<dyn Decompressor>,
    output: Vec<u8>,
}

impl BackgroundDecode {
    fn run(self, cancel: &Cancellation<'_>) -> DecodeOutcome {
        let BackgroundDecode { reads, input, buffers, mut decompressor, mut output } = self;
        decompress_streamed(&reads, &input, buffers, decompressor.as_mut(), &mut output, cancel)?;
        Ok(output)
    }

    /// Turns the first staging buffer into the read buffer of a foreground load,
    /// trimming it to the entry's stored length.
    fn into_read_buffer(self, length: usize) -> ResourceResult<Vec<u8>> {
        let [mut buffer, _] = self.buffers;
        buffer.clear();
        buffer.shrink_to(length);
        buffer
            .try_reserve_exact(length)
            .map_err(|_| ResourceError::Allocation(AllocSite::ReadBuffer))?;
        Ok(buffer)
    }
}

fn reserve(site: AllocSite, ctx: &ContextInner, len: u64) -> ResourceResult<Vec<u8>> {
    ctx.fail.check(site).map_err(ResourceError::Allocation)?;
    let len = usize::try_from(len).map_err(|_| ResourceError::Allocation(site))?;
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|_| ResourceError::Allocation(site))?;
    Ok(buffer)
}

impl LoadTask {
    /// Creates the load state of a new pending record.
    pub(crate) fn new(ctx: &ContextInner, source: FileSource, kind: LoadKind) -> ResourceResult<Arc<Self>> {
        ctx.fail.check(AllocSite::LoadInfo).map_err(ResourceError::Allocation)?;
        ctx.live_tasks.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Self {
            source,
            kind,
            stage: Mutex::new(Stage::Deferred),
            live: ctx.live_tasks.clone(),
        }))
    }

    pub(crate) fn path(&self) -> &str {
        &self.source.path
    }

    pub(crate) fn is_deferred(&self) -> bool {
        matches!(*self.stage.lock().unwrap_or_else(PoisonError::into_inner), Stage::Deferred)
    }

    /// Issues the task's I/O if it has not been issued yet. Allocation failures are
    /// returned to the caller and leave the task deferred.
    pub(crate) fn try_start(self: &Arc<Self>, ctx: &ContextInner) -> ResourceResult<StartOutcome> {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*stage, Stage::Deferred) {
            return Ok(StartOutcome::Started);
        }

        let mut staged = None;
        if self.source.is_compressed() {
            match self.start_background(ctx)? {
                BackgroundStart::Spawned(job) => {
                    log::debug!("Decompressing '{}' in the background", self.source.path);
                    *stage = Stage::Background(job);
                    return Ok(StartOutcome::Started);
                }
                BackgroundStart::Foreground(buffer) => staged = buffer,
            }
        }

        let Ok(slot) = ctx.reads.try_acquire() else {
            return Ok(StartOutcome::Deferred);
        };
        let buffer = match staged {
            Some(buffer) => buffer,
            None => reserve(AllocSite::ReadBuffer, ctx, self.source.length)?,
        };
        let request = slot.submit(
            self.source.container.clone(),
            self.source.offset,
            self.source.length,
            buffer,
        );
        log::debug!("Issued read of '{}' ({} bytes)", self.source.path, self.source.length);
        *stage = Stage::Reading(request);
        Ok(StartOutcome::Started)
    }

    /// Like [`try_start`](Self::try_start), but records an allocation failure on the
    /// task instead of returning it.
    pub(crate) fn start(self: &Arc<Self>, ctx: &ContextInner) -> StartOutcome {
        match self.try_start(ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("Could not start loading '{}': {}", self.source.path, err);
                *self.stage.lock().unwrap_or_else(PoisonError::into_inner) =
                    Stage::Failed(Some(err));
                StartOutcome::Failed
            }
        }
    }

    fn start_background(&self, ctx: &ContextInner) -> ResourceResult<BackgroundStart> {
        let config = ctx.decompression_config();
        let pool = ctx.decompression_pool();
        let size = self.source.logical_size();
        if !config.background || size < config.foreground_threshold as u64 || pool.size() == 0 {
            return Ok(BackgroundStart::Foreground(None));
        }
        if ctx.fail.check(AllocSite::BackgroundJob).is_err() {
            log::warn!(
                "Could not create a background job for '{}'; decompressing in the foreground",
                self.source.path
            );
            return Ok(BackgroundStart::Foreground(None));
        }
        let Some(module) = self.source.module.as_ref() else {
            return Ok(BackgroundStart::Foreground(None));
        };

        let length = self.source.length;
        let threshold = config.double_buffer_threshold.max(1) as u64;
        let chunk = if length > threshold { threshold } else { length };
        let first = reserve(AllocSite::ReadBuffer, ctx, chunk)?;
        let mut second = Vec::new();
        if length > chunk {
            second
                .try_reserve_exact(chunk as usize)
                .map_err(|_| ResourceError::Allocation(AllocSite::ReadBuffer))?;
        }
        let output = reserve(AllocSite::DecompressBuffer, ctx, size)?;
        let decompressor = module.decompressor(size).map_err(|source| {
            ResourceError::Decompress { path: self.source.path.clone(), source }
        })?;

        let decode = BackgroundDecode {
            reads: ctx.reads.clone(),
            input: StreamInput {
                container: self.source.container.clone(),
                offset: self.source.offset,
                length,
                chunk: chunk as usize,
            },
            buffers: [first, second],
            decompressor,
            output,
        };
        match pool.try_spawn(decode, BackgroundDecode::run) {
            Ok(job) => Ok(BackgroundStart::Spawned(job)),
            Err(decode) => {
                log::warn!(
                    "Decompression pool saturated; decompressing '{}' in the foreground",
                    self.source.path
                );
                let buffer = decode.into_read_buffer(length as usize)?;
                Ok(BackgroundStart::Foreground(Some(buffer)))
            }
        }
    }

    /// `true` once the task's bytes are available (or it has failed), without
    /// consuming anything.
    pub(crate) fn is_ready(&self) -> bool {
        match &*self.stage.lock().unwrap_or_else(PoisonError::into_inner) {
            Stage::Deferred | Stage::Finalizing => false,
            Stage::Reading(request) => request.is_complete(),
            Stage::Background(job) => job.is_finished(),
            Stage::Failed(_) => true,
        }
    }

    /// Takes the task's bytes if they are available.
    ///
    /// At most one caller receives [`TaskPoll::Ready`] or [`TaskPoll::Failed`]; later
    /// polls report the task as pending until its record is updated.
    pub(crate) fn poll(&self) -> TaskPoll {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = match &mut *stage {
            Stage::Deferred | Stage::Finalizing => return TaskPoll::Pending,
            Stage::Failed(err) => {
                let err = err.take();
                *stage = Stage::Finalizing;
                return err.map_or(TaskPoll::Pending, TaskPoll::Failed);
            }
            Stage::Reading(request) => match request.try_take() {
                None => return TaskPoll::Pending,
                Some(Ok(bytes)) => TaskPoll::Ready { bytes, compressed: self.source.is_compressed() },
                Some(Err(err)) => TaskPoll::Failed(err.into_resource_error(&self.source.path)),
            },
            Stage::Background(job) => match job.try_take() {
                None => return TaskPoll::Pending,
                Some(Ok(bytes)) => TaskPoll::Ready { bytes, compressed: false },
                Some(Err(err)) => TaskPoll::Failed(err.into_resource_error(&self.source.path)),
            },
        };
        *stage = Stage::Finalizing;
        outcome
    }

    /// Turns the bytes of a finished read into the record's payload.
    pub(crate) fn finalize(
        &self,
        ctx: &ContextInner,
        bytes: Vec<u8>,
        compressed: bool,
    ) -> ResourceResult<Payload> {
        let bytes = if compressed { self.decompress_foreground(ctx, bytes)? } else { bytes };
        finalize_bytes(&ctx.finalizers(), self.kind, &self.source.path, bytes)
    }

    fn decompress_foreground(&self, ctx: &ContextInner, compressed: Vec<u8>) -> ResourceResult<Vec<u8>> {
        let module = self.source.module.as_ref().ok_or_else(|| ResourceError::Format {
            path: self.source.path.clone(),
            message: "compressed data without a package module".to_owned(),
        })?;
        let size = self.source.logical_size();
        let mut output = reserve(AllocSite::DecompressBuffer, ctx, size)?;
        let decompress_error =
            |source| ResourceError::Decompress { path: self.source.path.clone(), source };
        let mut decompressor = module.decompressor(size).map_err(decompress_error)?;
        decompress_buffer(
            decompressor.as_mut(),
            &compressed,
            module.decompress_chunk_size(),
            &mut output,
        )
        .map_err(decompress_error)?;
        Ok(output)
    }
}

impl Drop for LoadTask {
    fn drop(&mut self) {
        if let Stage::Background(job) = &*self.stage.lock().unwrap_or_else(PoisonError::into_inner) {
            job.cancel();
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs the typed finalizer for `kind` over `bytes`.
pub(crate) fn finalize_bytes(
    finalizers: &Finalizers,
    kind: LoadKind,
    path: &str,
    bytes: Vec<u8>,
) -> ResourceResult<Payload> {
    let format_error = |message: String| ResourceError::Format { path: path.to_owned(), message };
    let missing = |what: &str| format_error(format!("no {what} registered"));

    match kind {
        LoadKind::Data => Ok(Payload::Data(Arc::new(bytes))),
        LoadKind::Texture(options) => {
            let decoder = finalizers.textures().ok_or_else(|| missing("texture decoder"))?;
            decoder
                .decode(&bytes, options)
                .map(Payload::Texture)
                .map_err(|err| format_error(err.to_string()))
        }
        LoadKind::BitmapFont => {
            let parser = finalizers.fonts().ok_or_else(|| missing("font parser"))?;
            parser.parse_bitmap(&bytes).map(Payload::Font).map_err(|err| format_error(err.to_string()))
        }
        LoadKind::FreetypeFont(size) => {
            let parser = finalizers.fonts().ok_or_else(|| missing("font parser"))?;
            parser
                .parse_freetype(&bytes, size)
                .map(Payload::Font)
                .map_err(|err| format_error(err.to_string()))
        }
        LoadKind::Sound => {
            let decoder = finalizers.sounds().ok_or_else(|| missing("sound decoder"))?;
            decoder.decode(bytes).map(Payload::Sound).map_err(|err| format_error(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{FinalizeResult, Texture, TextureDecoder};

    struct Sized;

    impl TextureDecoder for Sized {
        fn decode(&self, bytes: &[u8], _: TextureOptions) -> FinalizeResult<Texture> {
            if bytes.is_empty() {
                return Err("empty image".into());
            }
            Ok(Texture::new(bytes.len()))
        }

        fn create(&self, width: u32, height: u32, _: TextureOptions) -> FinalizeResult<Texture> {
            Ok(Texture::new((width * height) as usize))
        }
    }

    #[test]
    fn data_needs_no_finalizer() {
        let payload = finalize_bytes(&Finalizers::new(), LoadKind::Data, "a", vec![1, 2]).unwrap();
        assert!(matches!(payload, Payload::Data(bytes) if bytes.as_slice() == [1, 2]));
    }

    #[test]
    fn missing_finalizer_is_a_format_error() {
        let err = finalize_bytes(&Finalizers::new(), LoadKind::Sound, "a.wav", vec![1]).unwrap_err();
        assert!(matches!(err, ResourceError::Format { path, .. } if path == "a.wav"));
    }

    #[test]
    fn decoder_rejection_keeps_its_message() {
        let finalizers = Finalizers::new().with_textures(Arc::new(Sized));
        let kind = LoadKind::Texture(TextureOptions::default());
        let err = finalize_bytes(&finalizers, kind, "x.png", Vec::new()).unwrap_err();
        assert!(err.to_string().contains("empty image"), "{err}");
        let texture = finalize_bytes(&finalizers, kind, "x.png", vec![0; 9]).unwrap();
        assert!(matches!(texture, Payload::Texture(t) if t.downcast_ref::<usize>() == Some(&9)));
    }

    #[test]
    fn load_kinds_map_to_record_kinds() {
        assert_eq!(LoadKind::BitmapFont.resource_kind(), ResourceKind::Font);
        assert_eq!(LoadKind::FreetypeFont(10.0).resource_kind(), ResourceKind::Font);
        assert_eq!(LoadKind::Data.resource_kind(), ResourceKind::Data);
    }
}
