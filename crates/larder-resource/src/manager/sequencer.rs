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

//! Mark, sync and wait.

use super::links::{self, Resolution};
use super::load::{LoadTask, StartOutcome, TaskPoll};
use super::slots::{Body, Payload};
use super::{ManagerShared, ResourceManager};
use larder_core::{FinalizeOrder, LoadState, Mark, ResourceId, ResourceResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on one sleep of [`ResourceManager::wait`] between two passes.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Finalize whatever has finished.
    Finalize,
    /// Only observe readiness.
    Probe,
}

/// Moves the pending entry `id` of `manager` forward. Returns `true` once it no longer
/// needs waiting for.
fn drive(manager: &Arc<ManagerShared>, id: ResourceId, pass: Pass) -> bool {
    let (owner, target) = match links::resolve(manager, id) {
        Resolution::Terminal(owner, target) => (owner, target),
        // Freed records and broken links are complete.
        _ => return true,
    };
    let task = {
        let state = owner.lock();
        match state.slots.get(target) {
            Some(record) if record.state == LoadState::Pending => record.load.clone(),
            _ => return true,
        }
    };
    let Some(task) = task else {
        return true;
    };

    // Waiting on a record must be able to issue its own deferred read, whatever
    // else is queued ahead of it.
    if task.is_deferred() && task.start(&owner.ctx) == StartOutcome::Deferred {
        return false;
    }
    if pass == Pass::Probe {
        return task.is_ready();
    }

    let outcome = match task.poll() {
        TaskPoll::Pending => return false,
        TaskPoll::Ready { bytes, compressed } => task.finalize(&owner.ctx, bytes, compressed),
        TaskPoll::Failed(err) => Err(err),
    };
    complete(&owner, target, &task, outcome);
    true
}

/// Installs the outcome of `task` if record `id` still belongs to it.
fn complete(
    manager: &ManagerShared,
    id: ResourceId,
    task: &Arc<LoadTask>,
    outcome: ResourceResult<Payload>,
) {
    let finished = {
        let mut state = manager.lock();
        let Some(record) = state.slots.get_mut(id) else {
            return;
        };
        if !record.load.as_ref().is_some_and(|current| Arc::ptr_eq(current, task)) {
            return;
        }
        match outcome {
            Ok(payload) => {
                record.body = Body::Ready(payload);
                record.state = LoadState::Done;
                log::debug!("Finalized '{}' into {id}", task.path());
            }
            Err(err) => {
                log::error!("Loading '{}' failed: {err}", task.path());
                record.error = Some(Arc::new(err));
                record.state = LoadState::Error;
            }
        }
        record.load.take()
    };
    drop(finished);
}

impl ResourceManager {
    /// Snapshot of everything requested from this manager so far.
    pub fn mark(&self) -> Mark {
        self.shared.lock().mark
    }

    fn advance(&self, mark: Mark, pass: Pass) -> ResourceResult<bool> {
        let mut ids: Vec<ResourceId> = {
            let state = self.shared.lock_usable()?;
            state
                .pending
                .iter()
                .filter(|(pending, _)| pending.is_at_or_before(mark))
                .map(|(_, id)| *id)
                .collect()
        };
        if self.shared.ctx.finalize_order() == FinalizeOrder::Reverse {
            ids.reverse();
        }

        let mut complete = true;
        let mut finished = HashSet::new();
        for id in ids {
            if drive(&self.shared, id, pass) {
                if pass == Pass::Finalize {
                    finished.insert(id);
                }
            } else {
                complete = false;
            }
        }
        self.shared.ctx.pump_deferred();

        if !finished.is_empty() {
            self.shared.lock().pending.retain(|(_, id)| !finished.contains(id));
        }
        Ok(complete)
    }

    /// Finalizes every record with a mark at or before `mark` whose I/O has finished.
    ///
    /// Never blocks, and never finalizes a record issued after `mark`. Returns `true`
    /// once every such record has reached [`LoadState::Done`] or [`LoadState::Error`]
    /// (freed records count as complete). A closed or corrupt manager reports `false`.
    pub fn sync(&self, mark: Mark) -> bool {
        self.advance(mark, Pass::Finalize).unwrap_or(false)
    }

    /// Blocks until [`sync`](Self::sync) reports `mark` as complete, restarting
    /// deferred reads along the way.
    pub fn wait(&self, mark: Mark) -> ResourceResult<()> {
        self.wait_for(mark, Pass::Finalize)
    }

    /// Like [`sync`](Self::sync) but without finalizing: `true` once every record at or
    /// before `mark` is terminal or has its bytes ready.
    pub fn probe(&self, mark: Mark) -> bool {
        self.advance(mark, Pass::Probe).unwrap_or(false)
    }

    /// Blocks until [`probe`](Self::probe) reports `mark` as ready.
    pub fn wait_silent(&self, mark: Mark) -> ResourceResult<()> {
        self.wait_for(mark, Pass::Probe)
    }

    fn wait_for(&self, mark: Mark, pass: Pass) -> ResourceResult<()> {
        let signal = self.shared.ctx.signal.clone();
        loop {
            let epoch = signal.epoch();
            if self.advance(mark, pass)? {
                return Ok(());
            }
            signal.wait_past(epoch, WAIT_SLICE);
        }
    }
}
