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

//! The resource manager.
//!
//! A [`ResourceManager`] maps [`ResourceId`]s to records. Each record is either
//! populated synchronously (state [`LoadState::None`]) or loaded asynchronously
//! (state [`LoadState::Pending`] until it turns [`LoadState::Done`] or
//! [`LoadState::Error`]). Pending records only change state inside
//! [`sync`](ResourceManager::sync) and [`wait`](ResourceManager::wait).

mod file;
mod links;
pub(crate) mod load;
mod sequencer;
mod slots;

use crate::context::{ContextInner, ResourceContext};
use larder_core::{
    AllocSite, FailPoints, Font, LoadState, Mark, ResourceError, ResourceId, ResourceKind,
    ResourceResult, Sound, Texture, TextureOptions,
};
use links::Resolution;
use load::{LoadKind, LoadTask, StartOutcome};
use slots::{Body, Payload, Record, SlotTable};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// State of one manager, shared with the links other managers hold into it.
pub(crate) struct ManagerShared {
    pub(crate) ctx: Arc<ContextInner>,
    state: Mutex<ManagerState>,
}

pub(crate) struct ManagerState {
    pub(crate) slots: SlotTable,
    mark: Mark,
    /// Records (and links to records) not yet terminal, in mark order.
    pub(crate) pending: VecDeque<(Mark, ResourceId)>,
    closed: bool,
    poisoned: bool,
}

fn corrupt() -> ResourceError {
    ResourceError::Corrupt("resource manager state is inconsistent".to_owned())
}

impl ManagerState {
    /// Fails if the manager was closed or has been found inconsistent.
    pub(crate) fn usable(&self) -> ResourceResult<()> {
        if self.closed {
            return Err(ResourceError::ManagerClosed);
        }
        if self.poisoned {
            return Err(corrupt());
        }
        Ok(())
    }

    /// Refuses all further use of the manager.
    fn poison(&mut self, reason: &str) -> ResourceError {
        if !self.poisoned {
            log::warn!("Resource manager state is corrupt ({reason}); refusing further use");
            self.poisoned = true;
        }
        corrupt()
    }

    /// Scans the whole slot table. Linear in its size.
    fn verify(&mut self) -> ResourceResult<()> {
        match self.slots.check() {
            Ok(()) => Ok(()),
            Err(reason) => Err(self.poison(&reason)),
        }
    }

    fn next_mark(&self) -> Mark {
        match self.mark.next() {
            Mark::ORIGIN => Mark::ORIGIN.next(),
            mark => mark,
        }
    }

    /// Stores a new record under the next mark. Pending records also join the
    /// pending queue.
    pub(crate) fn insert(
        &mut self,
        fail: &FailPoints,
        pending: bool,
        build: impl FnOnce(Mark) -> Record,
    ) -> ResourceResult<ResourceId> {
        if pending {
            self.pending
                .try_reserve(1)
                .map_err(|_| ResourceError::Allocation(AllocSite::LoadInfo))?;
        }
        let mark = self.next_mark();
        let id = match self.slots.insert(build(mark), fail) {
            Err(ResourceError::Corrupt(reason)) => return Err(self.poison(&reason)),
            other => other?,
        };
        self.mark = mark;
        if pending {
            self.pending.push_back((mark, id));
        }
        Ok(id)
    }

    /// Removes the caller-visible record `id`, or hides it while strong links still
    /// reach it. Returns the removed record so it can be dropped outside the lock.
    fn detach(&mut self, id: ResourceId) -> ResourceResult<Option<Record>> {
        let record = self
            .slots
            .get_mut(id)
            .filter(|record| !record.hidden)
            .ok_or_else(|| ResourceError::invalid(format!("unknown resource {id}")))?;
        if record.edge().is_none() && record.strong_refs > 0 {
            record.hidden = true;
            log::debug!("Resource {id} freed; kept alive by {} strong links", record.strong_refs);
            return Ok(None);
        }
        Ok(self.slots.remove(id))
    }
}

impl ManagerShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ensure_usable(&self) -> ResourceResult<()> {
        self.lock().usable()
    }

    pub(crate) fn lock_usable(&self) -> ResourceResult<MutexGuard<'_, ManagerState>> {
        let state = self.lock();
        state.usable()?;
        Ok(state)
    }

    /// Identity of the manager, for visited sets.
    pub(crate) fn key(&self) -> usize {
        self as *const Self as usize
    }
}

/// An asynchronous resource manager.
///
/// Every operation takes `&self`; a manager can be shared between threads. Dropping it
/// frees all of its records. Records that strong links in other managers still reach
/// survive until the last such link is freed.
pub struct ResourceManager {
    pub(crate) shared: Arc<ManagerShared>,
}

impl ResourceManager {
    /// Creates a growable manager with room for `capacity` records before its first
    /// growth. `0` selects the context's default capacity.
    pub fn new(ctx: &ResourceContext, capacity: usize) -> ResourceResult<Self> {
        Self::create(ctx, capacity, true)
    }

    /// Creates a manager that never holds more than `capacity` records. `0` selects
    /// the context's default capacity.
    pub fn with_fixed_capacity(ctx: &ResourceContext, capacity: usize) -> ResourceResult<Self> {
        Self::create(ctx, capacity, false)
    }

    fn create(ctx: &ResourceContext, capacity: usize, growable: bool) -> ResourceResult<Self> {
        let inner = ctx.inner.clone();
        let capacity = if capacity == 0 { inner.config.default_capacity } else { capacity };
        let slots = SlotTable::new(capacity, growable, &inner.fail)?;
        log::debug!(
            "Resource manager created ({} capacity {capacity})",
            if growable { "growable" } else { "fixed" }
        );
        Ok(Self {
            shared: Arc::new(ManagerShared {
                ctx: inner,
                state: Mutex::new(ManagerState {
                    slots,
                    mark: Mark::ORIGIN,
                    pending: VecDeque::new(),
                    closed: false,
                    poisoned: false,
                }),
            }),
        })
    }

    /// The context the manager was created against.
    pub fn context(&self) -> ResourceContext {
        ResourceContext { inner: self.shared.ctx.clone() }
    }

    fn ctx(&self) -> &ContextInner {
        &self.shared.ctx
    }

    // ---- Asynchronous loads ----

    /// Starts loading the raw bytes of `path`.
    ///
    /// A path that resolves nowhere still yields an ID, whose record is already in
    /// [`LoadState::Error`]. Only invalid arguments and allocation failures are
    /// returned as errors, with nothing left behind.
    pub fn load_data(&self, path: &str) -> ResourceResult<ResourceId> {
        self.load(path, LoadKind::Data)
    }

    /// Starts loading and decoding a texture.
    pub fn load_texture(&self, path: &str, options: TextureOptions) -> ResourceResult<ResourceId> {
        self.load(path, LoadKind::Texture(options))
    }

    /// Starts loading and parsing a bitmap font.
    pub fn load_bitmap_font(&self, path: &str) -> ResourceResult<ResourceId> {
        self.load(path, LoadKind::BitmapFont)
    }

    /// Starts loading a scalable font rendered at `size` pixels.
    pub fn load_freetype_font(&self, path: &str, size: f32) -> ResourceResult<ResourceId> {
        if size.is_nan() || size <= 0.0 {
            return Err(ResourceError::invalid(format!("invalid font size {size}")));
        }
        self.load(path, LoadKind::FreetypeFont(size))
    }

    /// Starts loading and decoding a sound.
    pub fn load_sound(&self, path: &str) -> ResourceResult<ResourceId> {
        self.load(path, LoadKind::Sound)
    }

    fn load(&self, path: &str, kind: LoadKind) -> ResourceResult<ResourceId> {
        let ctx = self.ctx();
        let resource_kind = kind.resource_kind();
        self.shared.ensure_usable()?;

        let source = match ctx.registry.resolve(path) {
            Ok(source) => source,
            Err(err @ ResourceError::NotFound(_)) => {
                log::error!("Cannot load '{path}': {err}");
                return self
                    .shared
                    .lock_usable()?
                    .insert(&ctx.fail, false, move |mark| Record::failed(resource_kind, mark, err));
            }
            Err(err) => return Err(err),
        };

        let task = LoadTask::new(ctx, source, kind)?;
        let id = self.shared.lock_usable()?.insert(&ctx.fail, true, |mark| {
            Record::pending(resource_kind, mark, task.clone())
        })?;

        match task.try_start(ctx) {
            Ok(StartOutcome::Deferred) => ctx.defer(&task),
            Ok(_) => {}
            Err(err) => {
                let removed = {
                    let mut state = self.shared.lock();
                    state.pending.retain(|(_, pending)| *pending != id);
                    state.slots.remove(id)
                };
                drop(removed);
                return Err(err);
            }
        }
        log::debug!("Loading '{path}' as {resource_kind:?} into {id}");
        Ok(id)
    }

    // ---- Synchronous creation ----

    fn insert_ready(&self, kind: ResourceKind, body: Body) -> ResourceResult<ResourceId> {
        let id = self
            .shared
            .lock_usable()?
            .insert(&self.ctx().fail, false, |mark| Record::ready(kind, mark, body))?;
        log::debug!("Created {kind:?} resource {id}");
        Ok(id)
    }

    /// Creates a zero-filled data buffer of `size` bytes.
    pub fn new_data(&self, size: usize) -> ResourceResult<ResourceId> {
        self.ctx().fail.check(AllocSite::DataBuffer).map_err(ResourceError::Allocation)?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| ResourceError::Allocation(AllocSite::DataBuffer))?;
        bytes.resize(size, 0);
        self.take_data(bytes)
    }

    /// Creates a blank texture through the registered texture decoder.
    pub fn new_texture(&self, width: u32, height: u32, options: TextureOptions) -> ResourceResult<ResourceId> {
        if width == 0 || height == 0 {
            return Err(ResourceError::invalid(format!("invalid texture size {width}x{height}")));
        }
        let finalizers = self.ctx().finalizers();
        let decoder = finalizers
            .textures()
            .ok_or_else(|| ResourceError::invalid("no texture decoder registered"))?;
        let texture = decoder.create(width, height, options).map_err(|err| ResourceError::Format {
            path: format!("<new {width}x{height} texture>"),
            message: err.to_string(),
        })?;
        self.take_texture(texture)
    }

    /// Creates a data resource holding a copy of `bytes`.
    pub fn copy_data(&self, bytes: &[u8]) -> ResourceResult<ResourceId> {
        self.take_data(bytes.to_vec())
    }

    /// Creates a data resource holding `text` followed by a NUL byte.
    pub fn strdup(&self, text: &str) -> ResourceResult<ResourceId> {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        self.take_data(bytes)
    }

    /// Creates a data resource that takes ownership of `bytes`.
    pub fn take_data(&self, bytes: Vec<u8>) -> ResourceResult<ResourceId> {
        self.insert_ready(ResourceKind::Data, Body::Ready(Payload::Data(Arc::new(bytes))))
    }

    /// Creates a texture resource from an existing texture.
    pub fn take_texture(&self, texture: Texture) -> ResourceResult<ResourceId> {
        self.insert_ready(ResourceKind::Texture, Body::Ready(Payload::Texture(texture)))
    }

    /// Creates a font resource from an existing font.
    pub fn take_font(&self, font: Font) -> ResourceResult<ResourceId> {
        self.insert_ready(ResourceKind::Font, Body::Ready(Payload::Font(font)))
    }

    /// Creates a sound resource from an existing sound.
    pub fn take_sound(&self, sound: Sound) -> ResourceResult<ResourceId> {
        self.insert_ready(ResourceKind::Sound, Body::Ready(Payload::Sound(sound)))
    }

    // ---- Queries ----

    fn with_terminal<R>(&self, id: ResourceId, read: impl FnOnce(&Record) -> Option<R>) -> Option<R> {
        if self.shared.ensure_usable().is_err() {
            return None;
        }
        let Resolution::Terminal(owner, target) = links::resolve(&self.shared, id) else {
            return None;
        };
        let state = owner.lock();
        state.slots.get(target).and_then(read)
    }

    /// The bytes of a loaded data resource.
    pub fn get_data(&self, id: ResourceId) -> Option<Arc<Vec<u8>>> {
        self.with_terminal(id, |record| match record.payload()? {
            Payload::Data(bytes) => Some(bytes.clone()),
            _ => None,
        })
    }

    /// The texture of a loaded texture resource.
    pub fn get_texture(&self, id: ResourceId) -> Option<Texture> {
        self.with_terminal(id, |record| match record.payload()? {
            Payload::Texture(texture) => Some(texture.clone()),
            _ => None,
        })
    }

    /// The font of a loaded font resource.
    pub fn get_font(&self, id: ResourceId) -> Option<Font> {
        self.with_terminal(id, |record| match record.payload()? {
            Payload::Font(font) => Some(font.clone()),
            _ => None,
        })
    }

    /// The sound of a loaded or opened sound resource.
    pub fn get_sound(&self, id: ResourceId) -> Option<Sound> {
        self.with_terminal(id, |record| match record.payload()? {
            Payload::Sound(sound) => Some(sound.clone()),
            _ => None,
        })
    }

    /// Runs `edit` over the bytes of a data resource.
    ///
    /// Bytes shared with earlier [`get_data`](Self::get_data) results are copied
    /// first, so those results never change. `edit` runs with the owning manager
    /// locked and must not call back into it.
    pub fn with_data_mut<R>(&self, id: ResourceId, edit: impl FnOnce(&mut [u8]) -> R) -> ResourceResult<R> {
        self.shared.ensure_usable()?;
        let (owner, target) = match links::resolve(&self.shared, id) {
            Resolution::Terminal(owner, target) => (owner, target),
            other => return Err(other.into_error(id)),
        };
        let mut state = owner.lock();
        let record = state
            .slots
            .get_mut(target)
            .ok_or_else(|| ResourceError::invalid(format!("unknown resource {id}")))?;
        match (&mut record.body, record.state) {
            (Body::Ready(Payload::Data(bytes)), LoadState::None | LoadState::Done) => {
                Ok(edit(Arc::make_mut(bytes).as_mut_slice()))
            }
            _ => Err(ResourceError::invalid(format!("resource {id} holds no data"))),
        }
    }

    /// Load state of `id`, or `None` if the ID is unknown. Links report the state of
    /// the record they resolve to, and [`LoadState::Error`] once they cannot resolve.
    pub fn load_state(&self, id: ResourceId) -> Option<LoadState> {
        if self.shared.ensure_usable().is_err() {
            return None;
        }
        match links::resolve(&self.shared, id) {
            Resolution::Terminal(owner, target) => owner.lock().slots.get(target).map(|r| r.state),
            Resolution::Missing => None,
            Resolution::Stale | Resolution::Cycle(_) => Some(LoadState::Error),
        }
    }

    /// Why `id` is in [`LoadState::Error`].
    pub fn load_error(&self, id: ResourceId) -> Option<Arc<ResourceError>> {
        if self.shared.ensure_usable().is_err() {
            return None;
        }
        match links::resolve(&self.shared, id) {
            Resolution::Terminal(owner, target) => {
                owner.lock().slots.get(target).and_then(|record| record.error.clone())
            }
            Resolution::Missing => None,
            other => Some(Arc::new(other.into_error(id))),
        }
    }

    /// The variant of record `id` itself (links report their link kind).
    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        let state = self.shared.lock_usable().ok()?;
        state.slots.get(id).filter(|record| !record.hidden).map(|record| record.kind)
    }

    /// Number of occupied slots, including records kept alive only by strong links.
    pub fn live_records(&self) -> usize {
        self.shared.lock().slots.live()
    }

    // ---- Freeing ----

    /// Frees `id`.
    ///
    /// Freeing a pending record discards its load; in-flight work is cancelled or
    /// finishes in the background and is thrown away. A record still reached by strong
    /// links disappears from this manager but keeps its payload for those links.
    pub fn free(&self, id: ResourceId) -> ResourceResult<()> {
        let removed = {
            let mut state = self.shared.lock_usable()?;
            let removed = state.detach(id)?;
            // Pending loads and links to pending targets leave the queue with the record.
            if let Some(record) = &removed {
                let entry = (record.mark, id);
                state.pending.retain(|pending| *pending != entry);
            }
            removed
        };
        if let Some(record) = removed {
            log::debug!("Freed {:?} resource {id}", record.kind);
            if let Body::Link(edge) = record.body {
                links::release(edge);
            }
        }
        Ok(())
    }

    /// Frees every record of the manager.
    pub fn free_all(&self) -> ResourceResult<()> {
        self.shared.ensure_usable()?;
        self.release_all();
        Ok(())
    }

    fn release_all(&self) {
        let removed: Vec<Record> = {
            let mut state = self.shared.lock();
            let ids = state.slots.ids();
            let removed = ids.into_iter().filter_map(|id| state.detach(id).ok().flatten()).collect();
            state.pending.clear();
            removed
        };
        log::debug!("Freed {} resources", removed.len());
        for record in removed {
            if let Body::Link(edge) = record.body {
                links::release(edge);
            }
        }
    }

    /// Test hook: corrupts the free list, then runs the full consistency scan so every
    /// later operation finds the manager inconsistent.
    #[doc(hidden)]
    pub fn debug_corrupt_free_list(&self) {
        let mut state = self.shared.lock();
        state.slots.corrupt_free_list();
        if let Err(err) = state.verify() {
            log::debug!("Consistency scan after corruption: {err}");
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.release_all();
        self.shared.lock().closed = true;
        log::debug!("Resource manager destroyed");
    }
}
