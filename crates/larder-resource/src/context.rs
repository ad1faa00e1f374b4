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

//! The resource context: everything resource managers share.

use crate::manager::load::{LoadTask, StartOutcome};
use larder_core::{
    ContextConfig, DecompressionConfig, FailPoints, FinalizeOrder, Finalizers, PackageError,
    PackageModule,
};
use larder_io::{CompletionSignal, DecompressionPool, PackageRegistry, ReadPool};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

/// Counters describing the work a context currently has outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextStats {
    /// Pending loads that still own transient load state.
    pub live_load_tasks: usize,
    /// Reads currently occupying a slot of the read pool.
    pub reads_in_flight: usize,
    /// Loads waiting for a free read slot.
    pub deferred_reads: usize,
    /// Decompression jobs queued or running on the worker pool.
    pub background_jobs: usize,
}

/// Shared services of a set of resource managers.
///
/// A context owns the bounded read pool, the decompression worker pool, the package
/// registry and the typed finalizers. Every [`ResourceManager`] is created against a
/// context and keeps it alive; independent contexts never share any state, which lets
/// tests run several of them side by side.
///
/// Cloning a context yields another handle to the same services.
///
/// [`ResourceManager`]: crate::ResourceManager
#[derive(Clone)]
pub struct ResourceContext {
    pub(crate) inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    pub(crate) config: ContextConfig,
    pub(crate) registry: PackageRegistry,
    pub(crate) reads: Arc<ReadPool>,
    pub(crate) signal: Arc<CompletionSignal>,
    pub(crate) fail: FailPoints,
    decompression: RwLock<DecompressionState>,
    finalizers: RwLock<Finalizers>,
    deferred: Mutex<VecDeque<Weak<LoadTask>>>,
    pub(crate) live_tasks: Arc<AtomicUsize>,
    reverse_order: AtomicBool,
}

struct DecompressionState {
    config: DecompressionConfig,
    pool: Arc<DecompressionPool>,
}

impl ResourceContext {
    /// Creates a context and starts its worker threads.
    pub fn new(config: ContextConfig) -> Self {
        let signal = Arc::new(CompletionSignal::new());
        let reads = Arc::new(ReadPool::new(config.read_slots, signal.clone()));
        let pool_size = if config.decompression.background { config.decompression.pool_size } else { 0 };
        let pool = Arc::new(DecompressionPool::new(pool_size, signal.clone()));
        log::info!(
            "Resource context created: {} read slots, background decompression {}",
            reads.capacity(),
            if config.decompression.background { "on" } else { "off" }
        );

        Self {
            inner: Arc::new(ContextInner {
                registry: PackageRegistry::new(config.root_dir.clone()),
                decompression: RwLock::new(DecompressionState {
                    config: config.decompression.clone(),
                    pool,
                }),
                config,
                reads,
                signal,
                fail: FailPoints::new(),
                finalizers: RwLock::new(Finalizers::new()),
                deferred: Mutex::new(VecDeque::new()),
                live_tasks: Arc::new(AtomicUsize::new(0)),
                reverse_order: AtomicBool::new(false),
            }),
        }
    }

    /// The configuration the context was created with.
    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Replaces the typed finalizers used by subsequent loads.
    pub fn set_finalizers(&self, finalizers: Finalizers) {
        *self.inner.finalizers.write().unwrap_or_else(PoisonError::into_inner) = finalizers;
    }

    /// Initialises and registers a package module.
    pub fn register_package(&self, module: Arc<dyn PackageModule>) -> Result<(), PackageError> {
        self.inner.registry.register(module)
    }

    /// Cleans up and unregisters a package module. Unknown modules are ignored.
    pub fn unregister_package(&self, module: &Arc<dyn PackageModule>) {
        self.inner.registry.unregister(module);
    }

    /// `true` if a package module or the host filesystem can supply `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.inner.registry.exists(path)
    }

    /// Lists the files below the directory `path`. See [`PackageRegistry::list_files`].
    pub fn list_files(&self, path: &str, recursive: bool) -> Box<dyn Iterator<Item = String>> {
        self.inner.registry.list_files(path, recursive)
    }

    /// Base directory for relative host paths.
    pub fn root_dir(&self) -> &Path {
        self.inner.registry.root_dir()
    }

    /// Reconfigures background decompression and restarts the worker pool.
    ///
    /// Jobs already running on the old pool finish before this returns.
    pub fn set_background_decompression(
        &self,
        enable: bool,
        foreground_threshold: usize,
        double_buffer_threshold: usize,
        pool_size: usize,
    ) {
        let config = DecompressionConfig {
            background: enable,
            foreground_threshold,
            double_buffer_threshold,
            pool_size,
        };
        let pool = Arc::new(DecompressionPool::new(
            if enable { pool_size } else { 0 },
            self.inner.signal.clone(),
        ));
        let previous = {
            let mut state =
                self.inner.decompression.write().unwrap_or_else(PoisonError::into_inner);
            state.config = config;
            std::mem::replace(&mut state.pool, pool)
        };
        drop(previous);
        log::info!(
            "Background decompression {} ({} workers)",
            if enable { "enabled" } else { "disabled" },
            if enable { pool_size } else { 0 }
        );
    }

    /// Allocation fault injection for this context.
    pub fn fail_points(&self) -> &FailPoints {
        &self.inner.fail
    }

    /// Current work counters.
    pub fn stats(&self) -> ContextStats {
        let deferred_reads = {
            let deferred = self.inner.deferred.lock().unwrap_or_else(PoisonError::into_inner);
            deferred.iter().filter_map(Weak::upgrade).filter(|task| task.is_deferred()).count()
        };
        ContextStats {
            live_load_tasks: self.inner.live_tasks.load(Ordering::SeqCst),
            reads_in_flight: self.inner.reads.in_flight(),
            deferred_reads,
            background_jobs: self.inner.decompression_pool().active(),
        }
    }

    /// Test hook selecting the order in which `sync`/`wait` finalize records.
    #[doc(hidden)]
    pub fn set_finalize_order(&self, order: FinalizeOrder) {
        self.inner.reverse_order.store(order == FinalizeOrder::Reverse, Ordering::SeqCst);
    }
}

impl Default for ResourceContext {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl ContextInner {
    pub(crate) fn finalizers(&self) -> Finalizers {
        self.finalizers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn decompression_config(&self) -> DecompressionConfig {
        self.decompression.read().unwrap_or_else(PoisonError::into_inner).config.clone()
    }

    pub(crate) fn decompression_pool(&self) -> Arc<DecompressionPool> {
        self.decompression.read().unwrap_or_else(PoisonError::into_inner).pool.clone()
    }

    pub(crate) fn finalize_order(&self) -> FinalizeOrder {
        if self.reverse_order.load(Ordering::SeqCst) {
            FinalizeOrder::Reverse
        } else {
            FinalizeOrder::Forward
        }
    }

    /// Queues a load whose read could not be issued for lack of a free slot.
    pub(crate) fn defer(&self, task: &Arc<LoadTask>) {
        log::debug!("Read of '{}' deferred: no free read slot", task.path());
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Arc::downgrade(task));
    }

    /// Retries deferred reads in submission order until the pool is full again.
    pub(crate) fn pump_deferred(&self) {
        loop {
            let next = {
                let mut deferred = self.deferred.lock().unwrap_or_else(PoisonError::into_inner);
                match deferred.front().map(Weak::upgrade) {
                    None => return,
                    Some(None) => {
                        deferred.pop_front();
                        continue;
                    }
                    Some(Some(task)) if !task.is_deferred() => {
                        deferred.pop_front();
                        continue;
                    }
                    Some(Some(task)) => task,
                }
            };

            match next.start(self) {
                StartOutcome::Deferred => return,
                StartOutcome::Started | StartOutcome::Failed => {
                    let mut deferred =
                        self.deferred.lock().unwrap_or_else(PoisonError::into_inner);
                    if deferred
                        .front()
                        .and_then(Weak::upgrade)
                        .is_some_and(|front| Arc::ptr_eq(&front, &next))
                    {
                        deferred.pop_front();
                    }
                }
            }
        }
    }
}
