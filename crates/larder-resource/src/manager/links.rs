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

//! Strong and weak links between records, within and across managers.
//!
//! A link names its target by manager handle and [`ResourceId`], never by address,
//! so slot table growth in either manager leaves links valid. Links are created
//! pointing straight at the terminal (non-link) record; longer chains only appear when
//! an edge is rewired through [`ResourceManager::debug_retarget_link`]. Every walk
//! keeps a visited set and cuts the edge that closes a cycle.
//!
//! Only one manager is ever locked at a time: a walk copies the next edge out and
//! releases the lock before following it.

use super::slots::{Body, Record};
use super::{ManagerShared, ResourceManager};
use larder_core::{AllocSite, LoadState, ResourceError, ResourceId, ResourceKind, ResourceResult};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) enum LinkTarget {
    /// Keeps the target manager's storage alive.
    Strong(Arc<ManagerShared>),
    Weak(Weak<ManagerShared>),
}

impl LinkTarget {
    fn upgrade(&self) -> Option<Arc<ManagerShared>> {
        match self {
            LinkTarget::Strong(manager) => Some(manager.clone()),
            LinkTarget::Weak(manager) => manager.upgrade(),
        }
    }
}

impl fmt::Debug for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Strong(manager) => write!(f, "Strong({:#x})", manager.key()),
            LinkTarget::Weak(manager) => write!(f, "Weak({:p})", manager.as_ptr()),
        }
    }
}

/// The target of a link record.
#[derive(Debug)]
pub(crate) struct LinkEdge {
    pub(crate) target: LinkTarget,
    pub(crate) id: ResourceId,
}

/// Where a walk from a caller-visible ID ended.
pub(crate) enum Resolution {
    /// The terminal record and the manager holding it.
    Terminal(Arc<ManagerShared>, ResourceId),
    /// The starting ID names no caller-visible record.
    Missing,
    /// A link on the way points at a record that no longer exists.
    Stale,
    /// The walk came back to a record it already visited.
    Cycle(ResourceId),
}

impl Resolution {
    pub(crate) fn into_error(self, id: ResourceId) -> ResourceError {
        match self {
            Resolution::Terminal(..) | Resolution::Missing => {
                ResourceError::invalid(format!("unknown resource {id}"))
            }
            Resolution::Stale => ResourceError::Stale(id),
            Resolution::Cycle(at) => ResourceError::LinkCycle(at),
        }
    }
}

/// Cuts the edge of the link record `id`, leaving it in the error state.
fn break_cycle(manager: &ManagerShared, id: ResourceId, revisited: ResourceId) {
    let cut = {
        let mut state = manager.lock();
        let Some(record) = state.slots.get_mut(id) else {
            return;
        };
        record.state = LoadState::Error;
        record.error = Some(Arc::new(ResourceError::LinkCycle(revisited)));
        std::mem::replace(&mut record.body, Body::Empty)
    };
    log::warn!("Link cycle through {revisited} detected; cut the edge of link {id}");
    drop(cut);
}

/// Follows links from the caller-visible record `id` of `origin` to a terminal record.
pub(crate) fn resolve(origin: &Arc<ManagerShared>, id: ResourceId) -> Resolution {
    let mut visited = HashSet::new();
    let mut current = origin.clone();
    let mut current_id = id;
    let mut previous: Option<(Arc<ManagerShared>, ResourceId)> = None;

    loop {
        if !visited.insert((current.key(), current_id)) {
            if let Some((manager, link)) = previous {
                break_cycle(&manager, link, current_id);
            }
            return Resolution::Cycle(current_id);
        }
        let next = {
            let state = current.lock();
            let Some(record) = state.slots.get(current_id) else {
                return if previous.is_none() { Resolution::Missing } else { Resolution::Stale };
            };
            if previous.is_none() && record.hidden {
                return Resolution::Missing;
            }
            match record.edge() {
                None => None,
                Some(edge) => match edge.target.upgrade() {
                    Some(manager) => Some((manager, edge.id)),
                    None => return Resolution::Stale,
                },
            }
        };
        match next {
            None => return Resolution::Terminal(current, current_id),
            Some((manager, next_id)) => {
                previous = Some((std::mem::replace(&mut current, manager), current_id));
                current_id = next_id;
            }
        }
    }
}

/// Drops one strong reference to the terminal record `id` of `manager`, removing the
/// record if its owner already freed it and this was the last reference.
fn release_terminal(manager: &ManagerShared, id: ResourceId) {
    let removed: Option<Record> = {
        let mut state = manager.lock();
        let Some(record) = state.slots.get_mut(id) else {
            return;
        };
        record.strong_refs = record.strong_refs.saturating_sub(1);
        if record.strong_refs == 0 && record.hidden {
            state.slots.remove(id)
        } else {
            None
        }
    };
    if removed.is_some() {
        log::debug!("Last strong link to {id} released; record freed");
    }
}

/// Releases the reference a freed link record held.
pub(crate) fn release(edge: LinkEdge) {
    let LinkTarget::Strong(manager) = edge.target else {
        return;
    };
    let mut visited = HashSet::new();
    let mut current = manager;
    let mut current_id = edge.id;
    let mut previous: Option<(Arc<ManagerShared>, ResourceId)> = None;

    loop {
        if !visited.insert((current.key(), current_id)) {
            if let Some((manager, link)) = previous {
                break_cycle(&manager, link, current_id);
            }
            return;
        }
        let next = {
            let state = current.lock();
            let Some(record) = state.slots.get(current_id) else {
                log::warn!("Strong link target {current_id} vanished before release");
                return;
            };
            match record.edge() {
                None => None,
                Some(edge) => match edge.target.upgrade() {
                    Some(manager) => Some((manager, edge.id)),
                    None => return,
                },
            }
        };
        match next {
            None => return release_terminal(&current, current_id),
            Some((manager, next_id)) => {
                previous = Some((std::mem::replace(&mut current, manager), current_id));
                current_id = next_id;
            }
        }
    }
}

impl ResourceManager {
    /// Creates a strong link to `id` of `source` (which may be `self`).
    ///
    /// The link resolves to the same payload as `id` and keeps it alive after `id`
    /// itself is freed. Linking to a pending record yields a pending link that gets
    /// its own mark in this manager and completes with its target.
    pub fn link(&self, source: &ResourceManager, id: ResourceId) -> ResourceResult<ResourceId> {
        self.create_link(source, id, true)
    }

    /// Creates a weak link to `id` of `source`.
    ///
    /// The link goes stale once no strong reference to the target remains; a stale
    /// link resolves to nothing but is still freed normally.
    pub fn link_weak(&self, source: &ResourceManager, id: ResourceId) -> ResourceResult<ResourceId> {
        self.create_link(source, id, false)
    }

    fn create_link(&self, source: &ResourceManager, id: ResourceId, strong: bool) -> ResourceResult<ResourceId> {
        self.shared.ensure_usable()?;
        source.shared.ensure_usable()?;

        let (terminal, terminal_id) = match resolve(&source.shared, id) {
            Resolution::Terminal(manager, target) => (manager, target),
            other => return Err(other.into_error(id)),
        };

        // Pin the terminal first so a concurrent free hides it instead of removing it.
        let pending = {
            let mut state = terminal.lock();
            let record = state.slots.get_mut(terminal_id).ok_or(ResourceError::Stale(id))?;
            if strong {
                record.strong_refs += 1;
            }
            record.state == LoadState::Pending
        };

        let (kind, target) = if strong {
            (ResourceKind::StrongLink, LinkTarget::Strong(terminal.clone()))
        } else {
            (ResourceKind::WeakLink, LinkTarget::Weak(Arc::downgrade(&terminal)))
        };
        let edge = LinkEdge { target, id: terminal_id };
        let inserted = self.shared.lock_usable().and_then(|mut state| {
            self.shared.ctx.fail.check(AllocSite::LinkRecord).map_err(ResourceError::Allocation)?;
            state.insert(&self.shared.ctx.fail, pending, |mark| Record::link(kind, mark, edge))
        });

        match inserted {
            Ok(link) => {
                log::debug!("Created {kind:?} {link} to {terminal_id}");
                Ok(link)
            }
            Err(err) => {
                if strong {
                    release_terminal(&terminal, terminal_id);
                }
                Err(err)
            }
        }
    }

    /// `true` if `id` is a weak link whose target is gone.
    pub fn is_stale(&self, id: ResourceId) -> bool {
        if self.kind(id) != Some(ResourceKind::WeakLink) {
            return false;
        }
        matches!(resolve(&self.shared, id), Resolution::Stale)
    }

    /// Test hook: points link `id` at `target_id` of `target` without any reference
    /// bookkeeping, to build chains and cycles.
    #[doc(hidden)]
    pub fn debug_retarget_link(
        &self,
        id: ResourceId,
        target: &ResourceManager,
        target_id: ResourceId,
    ) -> ResourceResult<()> {
        let previous = {
            let mut state = self.shared.lock_usable()?;
            let record = state
                .slots
                .get_mut(id)
                .ok_or_else(|| ResourceError::invalid(format!("unknown resource {id}")))?;
            let Body::Link(edge) = &mut record.body else {
                return Err(ResourceError::invalid(format!("resource {id} is not a link")));
            };
            let manager = match edge.target {
                LinkTarget::Strong(_) => LinkTarget::Strong(target.shared.clone()),
                LinkTarget::Weak(_) => LinkTarget::Weak(Arc::downgrade(&target.shared)),
            };
            edge.id = target_id;
            std::mem::replace(&mut edge.target, manager)
        };
        drop(previous);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{ResourceContext, ResourceManager};
    use larder_core::{LoadState, ResourceError};

    #[test]
    fn strong_link_outlives_its_origin() {
        let ctx = ResourceContext::default();
        let manager = ResourceManager::new(&ctx, 0).unwrap();
        let id = manager.strdup("shared").unwrap();
        let link = manager.link(&manager, id).unwrap();
        let before = manager.get_data(id).unwrap();
        manager.free(id).unwrap();
        assert!(manager.get_data(id).is_none());
        assert_eq!(manager.get_data(link).unwrap(), before);
        assert_eq!(manager.live_records(), 2);
        manager.free(link).unwrap();
        assert_eq!(manager.live_records(), 0);
    }

    #[test]
    fn weak_link_goes_stale_with_its_target() {
        let ctx = ResourceContext::default();
        let manager = ResourceManager::new(&ctx, 0).unwrap();
        let id = manager.copy_data(b"abc").unwrap();
        let weak = manager.link_weak(&manager, id).unwrap();
        assert!(!manager.is_stale(weak));
        manager.free(id).unwrap();
        assert!(manager.is_stale(weak));
        assert!(manager.get_data(weak).is_none());
        assert_eq!(manager.load_state(weak), Some(LoadState::Error));
        manager.free(weak).unwrap();
    }

    #[test]
    fn two_link_cycle_is_cut() {
        let ctx = ResourceContext::default();
        let manager = ResourceManager::new(&ctx, 0).unwrap();
        let id = manager.copy_data(b"x").unwrap();
        let a = manager.link_weak(&manager, id).unwrap();
        let b = manager.link_weak(&manager, id).unwrap();
        manager.debug_retarget_link(a, &manager, b).unwrap();
        manager.debug_retarget_link(b, &manager, a).unwrap();

        assert!(manager.get_data(a).is_none());
        assert_eq!(manager.load_state(a), Some(LoadState::Error));
        assert_eq!(manager.load_state(b), Some(LoadState::Error));
        let err = manager.load_error(b).unwrap();
        assert!(matches!(*err, ResourceError::LinkCycle(_)));
        manager.free(a).unwrap();
        manager.free(b).unwrap();
        manager.free(id).unwrap();
        assert_eq!(manager.live_records(), 0);
    }
}
