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

//! The bounded asynchronous read pool.

use crate::error::ReadError;
use crate::file::read_path_range_into;
use crate::signal::CompletionSignal;
use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

const MAX_WORKERS: usize = 4;

/// A fixed number of read slots serviced by a few I/O worker threads.
///
/// A slot is held from the moment a read is issued until the worker finishes it, not
/// until the caller collects the result. Completed reads therefore never hold the pool
/// hostage while their owners wait to be finalized.
pub struct ReadPool {
    shared: Arc<PoolShared>,
    sender: Option<Sender<ReadJob>>,
    workers: Vec<thread::JoinHandle<()>>,
}

struct PoolShared {
    capacity: usize,
    in_flight: AtomicUsize,
    signal: Arc<CompletionSignal>,
}

struct ReadJob {
    path: PathBuf,
    offset: u64,
    len: u64,
    buffer: Vec<u8>,
    state: Arc<RequestState>,
}

type ReadOutcome = Result<Vec<u8>, ReadError>;

#[derive(Default)]
struct RequestState {
    outcome: Mutex<Option<ReadOutcome>>,
    done: Condvar,
}

impl ReadJob {
    fn run(mut self, shared: &PoolShared) {
        let outcome = read_path_range_into(&self.path, self.offset, self.len, &mut self.buffer)
            .map(|()| self.buffer);
        if let Err(err) = &outcome {
            log::debug!("Read of '{}' failed: {}", self.path.display(), err);
        }

        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        *self.state.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.state.done.notify_all();
        shared.signal.notify();
    }
}

impl ReadPool {
    /// Creates a pool with `capacity` slots. Completions are reported on `signal`.
    pub fn new(capacity: usize, signal: Arc<CompletionSignal>) -> Self {
        let capacity = capacity.max(1);
        let shared = Arc::new(PoolShared { capacity, in_flight: AtomicUsize::new(0), signal });
        let (sender, receiver) = crossbeam_channel::unbounded::<ReadJob>();

        let workers = (0..capacity.min(MAX_WORKERS))
            .filter_map(|index| {
                let shared = shared.clone();
                let receiver: Receiver<ReadJob> = receiver.clone();
                thread::Builder::new()
                    .name(format!("larder-read-{index}"))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job.run(&shared);
                        }
                    })
                    .map_err(|err| log::warn!("Could not spawn read worker: {err}"))
                    .ok()
            })
            .collect();

        Self { shared, sender: Some(sender), workers }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of reads currently being serviced.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Reserves a slot, or fails with [`ReadError::PoolFull`] if none is free.
    ///
    /// The slot is returned to the pool if it is dropped without being submitted.
    pub fn try_acquire(&self) -> Result<ReadSlot<'_>, ReadError> {
        self.shared
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.shared.capacity).then_some(n + 1)
            })
            .map(|_| ReadSlot { pool: self, submitted: false })
            .map_err(|_| ReadError::PoolFull)
    }
}

impl Drop for ReadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// A reserved read slot.
pub struct ReadSlot<'a> {
    pool: &'a ReadPool,
    submitted: bool,
}

impl ReadSlot<'_> {
    /// Starts reading `len` bytes of `path` at `offset`, appending them to `buffer`.
    pub fn submit(mut self, path: PathBuf, offset: u64, len: u64, buffer: Vec<u8>) -> ReadRequest {
        self.submitted = true;
        let state = Arc::new(RequestState::default());
        let job = ReadJob { path, offset, len, buffer, state: state.clone() };

        // Without a live worker the read runs on the calling thread.
        let unsent = match self.pool.sender.as_ref() {
            Some(sender) => sender.send(job).err().map(|err| err.into_inner()),
            None => Some(job),
        };
        if let Some(job) = unsent {
            job.run(&self.pool.shared);
        }
        ReadRequest { state }
    }
}

impl Drop for ReadSlot<'_> {
    fn drop(&mut self) {
        if !self.submitted {
            self.pool.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A read in flight.
pub struct ReadRequest {
    state: Arc<RequestState>,
}

impl ReadRequest {
    /// `true` once the read has finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        self.state.outcome.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Takes the result if the read has finished. Returns `None` while in flight and
    /// after the result has been taken.
    pub fn try_take(&self) -> Option<Result<Vec<u8>, ReadError>> {
        self.state.outcome.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Blocks until the read finishes and returns its result.
    pub fn wait(self) -> Result<Vec<u8>, ReadError> {
        let guard = self.state.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let mut guard = self
            .state
            .done
            .wait_while(guard, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take().unwrap_or(Err(ReadError::PoolFull))
    }
}
