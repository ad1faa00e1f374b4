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

//! Records and the generation-checked slot table that stores them.

use super::links::LinkEdge;
use super::load::LoadTask;
use larder_core::{
    AllocSite, FailPoints, Font, LoadState, Mark, ResourceError, ResourceId, ResourceKind,
    ResourceResult, Sound, Texture,
};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// The finished value of a loaded or synchronously created record.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Data(Arc<Vec<u8>>),
    Texture(Texture),
    Font(Font),
    Sound(Sound),
}

/// A host file opened for positioned reads over one byte range.
#[derive(Debug)]
pub(crate) struct FileResource {
    pub(crate) file: Arc<File>,
    pub(crate) container: PathBuf,
    pub(crate) base: u64,
    pub(crate) size: u64,
    pub(crate) position: u64,
}

#[derive(Debug)]
pub(crate) enum Body {
    Empty,
    Ready(Payload),
    File(FileResource),
    Link(LinkEdge),
}

pub(crate) struct Record {
    pub(crate) kind: ResourceKind,
    pub(crate) mark: Mark,
    pub(crate) state: LoadState,
    pub(crate) body: Body,
    /// Present exactly while the record is pending.
    pub(crate) load: Option<Arc<LoadTask>>,
    pub(crate) error: Option<Arc<ResourceError>>,
    /// Strong links resolving to this record.
    pub(crate) strong_refs: usize,
    /// Freed by its owner but still held by strong links.
    pub(crate) hidden: bool,
}

impl Record {
    fn with(kind: ResourceKind, mark: Mark, state: LoadState, body: Body) -> Self {
        Self { kind, mark, state, body, load: None, error: None, strong_refs: 0, hidden: false }
    }

    pub(crate) fn ready(kind: ResourceKind, mark: Mark, body: Body) -> Self {
        Self::with(kind, mark, LoadState::None, body)
    }

    pub(crate) fn pending(kind: ResourceKind, mark: Mark, task: Arc<LoadTask>) -> Self {
        let mut record = Self::with(kind, mark, LoadState::Pending, Body::Empty);
        record.load = Some(task);
        record
    }

    pub(crate) fn failed(kind: ResourceKind, mark: Mark, error: ResourceError) -> Self {
        let mut record = Self::with(kind, mark, LoadState::Error, Body::Empty);
        record.error = Some(Arc::new(error));
        record
    }

    pub(crate) fn link(kind: ResourceKind, mark: Mark, edge: LinkEdge) -> Self {
        Self::with(kind, mark, LoadState::None, Body::Link(edge))
    }

    pub(crate) fn edge(&self) -> Option<&LinkEdge> {
        match &self.body {
            Body::Link(edge) => Some(edge),
            _ => None,
        }
    }

    pub(crate) fn payload(&self) -> Option<&Payload> {
        match (&self.body, self.state) {
            (Body::Ready(payload), LoadState::None | LoadState::Done) => Some(payload),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    record: Option<Record>,
}

/// Slot storage of one manager.
///
/// A freed slot bumps its generation before it is reused, so IDs of freed records
/// never reach the record that replaces them.
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    growable: bool,
    limit: usize,
}

impl SlotTable {
    pub(crate) fn new(capacity: usize, growable: bool, fail: &FailPoints) -> ResourceResult<Self> {
        fail.check(AllocSite::ManagerCreate).map_err(ResourceError::Allocation)?;
        let mut slots = Vec::new();
        let mut free = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .and_then(|()| free.try_reserve_exact(capacity))
            .map_err(|_| ResourceError::Allocation(AllocSite::ManagerCreate))?;
        Ok(Self { slots, free, growable, limit: capacity })
    }

    pub(crate) fn insert(&mut self, record: Record, fail: &FailPoints) -> ResourceResult<ResourceId> {
        let index = match self.free.pop() {
            Some(index) if self.is_vacant(index) => index,
            Some(index) => {
                self.free.push(index);
                return Err(ResourceError::Corrupt(format!("free list entry {index} is not a vacant slot")));
            }
            None => self.grow(fail)?,
        };
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return Err(ResourceError::Corrupt(format!("slot {index} is out of range")));
        };
        let id = ResourceId::from_parts(index, slot.generation)
            .ok_or(ResourceError::CapacityExhausted(self.limit))?;
        slot.record = Some(record);
        Ok(id)
    }

    fn grow(&mut self, fail: &FailPoints) -> ResourceResult<u32> {
        let index = self.slots.len();
        if !self.growable && index >= self.limit {
            return Err(ResourceError::CapacityExhausted(self.limit));
        }
        let encoded = u32::try_from(index)
            .ok()
            .filter(|index| *index < u32::MAX)
            .ok_or(ResourceError::CapacityExhausted(index))?;
        if index == self.slots.capacity() {
            fail.check(AllocSite::SlotGrowth).map_err(ResourceError::Allocation)?;
            self.slots
                .try_reserve(index.max(1))
                .map_err(|_| ResourceError::Allocation(AllocSite::SlotGrowth))?;
            // Keep the free list able to hold every slot so freeing never allocates.
            let wanted = self.slots.capacity().saturating_sub(self.free.len());
            self.free
                .try_reserve(wanted)
                .map_err(|_| ResourceError::Allocation(AllocSite::SlotGrowth))?;
            log::debug!("Slot table grown to {} slots", self.slots.capacity());
        }
        self.slots.push(Slot { generation: 0, record: None });
        Ok(encoded)
    }

    fn slot(&self, id: ResourceId) -> Option<&Slot> {
        self.slots.get(id.index() as usize).filter(|slot| slot.generation == id.generation())
    }

    pub(crate) fn get(&self, id: ResourceId) -> Option<&Record> {
        self.slot(id)?.record.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Option<&mut Record> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())?
            .record
            .as_mut()
    }

    pub(crate) fn remove(&mut self, id: ResourceId) -> Option<Record> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())?;
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        Some(record)
    }

    /// IDs of every occupied slot, in slot order.
    pub(crate) fn ids(&self) -> Vec<ResourceId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.is_some())
            .filter_map(|(index, slot)| ResourceId::from_parts(index as u32, slot.generation))
            .collect()
    }

    pub(crate) fn live(&self) -> usize {
        self.slots.len().saturating_sub(self.free.len())
    }

    fn is_vacant(&self, index: u32) -> bool {
        self.slots.get(index as usize).is_some_and(|slot| slot.record.is_none())
    }

    /// Verifies the whole free list against the slots it indexes.
    ///
    /// Linear in the table size; `insert` checks the one entry it consumes.
    pub(crate) fn check(&self) -> Result<(), String> {
        if !self.growable && self.slots.len() > self.limit {
            return Err(format!("{} slots exceed the fixed capacity {}", self.slots.len(), self.limit));
        }
        if self.free.len() > self.slots.len() {
            return Err(format!("free list holds {} of {} slots", self.free.len(), self.slots.len()));
        }
        let mut seen = vec![false; self.slots.len()];
        for &index in &self.free {
            let slot = self
                .slots
                .get(index as usize)
                .ok_or_else(|| format!("free list entry {index} is out of range"))?;
            if slot.record.is_some() {
                return Err(format!("free list entry {index} is occupied"));
            }
            if std::mem::replace(&mut seen[index as usize], true) {
                return Err(format!("free list entry {index} is duplicated"));
            }
        }
        Ok(())
    }

    pub(crate) fn corrupt_free_list(&mut self) {
        let bogus = u32::try_from(self.slots.len()).unwrap_or(u32::MAX).saturating_add(7);
        self.free.push(bogus);
    }
}
