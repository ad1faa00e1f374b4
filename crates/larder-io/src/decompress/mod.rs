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

//! The decompression pipeline.
//!
//! Work is wrapped in a [`Job`], a small cancellable future that is either driven to
//! completion on the calling thread ([`Job::run_inline`]) or handed to a worker of a
//! [`DecompressionPool`]. Whoever holds the job polls it the same way in both cases.

mod stream;

pub use stream::{decompress_buffer, decompress_streamed, StreamInput};

use crate::signal::CompletionSignal;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

type Task = Box<dyn FnOnce() + Send>;

/// Lets running work observe that its job was cancelled.
pub struct Cancellation<'a>(&'a AtomicBool);

impl Cancellation<'_> {
    /// `true` once the owner of the job has given up on it.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct JobShared<T> {
    result: Mutex<Option<T>>,
    finished: Condvar,
    cancelled: AtomicBool,
}

impl<T> JobShared<T> {
    fn new() -> Self {
        Self { result: Mutex::new(None), finished: Condvar::new(), cancelled: AtomicBool::new(false) }
    }

    fn execute(&self, work: impl FnOnce(&Cancellation<'_>) -> T) -> T {
        work(&Cancellation(&self.cancelled))
    }

    fn complete(&self, output: T) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);
        self.finished.notify_all();
    }
}

/// A unit of work that produces a `T`, running inline or on a worker.
pub struct Job<T> {
    shared: Arc<JobShared<T>>,
}

impl<T> Job<T> {
    /// Runs `work` to completion on the calling thread.
    pub fn run_inline(work: impl FnOnce(&Cancellation<'_>) -> T) -> Self {
        let shared = Arc::new(JobShared::new());
        let output = shared.execute(work);
        shared.complete(output);
        Self { shared }
    }

    /// `true` once the work has produced its output.
    pub fn is_finished(&self) -> bool {
        self.shared.result.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Takes the output if the work has finished.
    pub fn try_take(&self) -> Option<T> {
        self.shared.result.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Blocks until the work finishes and takes its output.
    ///
    /// Returns `None` if the output was already taken.
    pub fn wait(&self) -> Option<T> {
        let guard = self.shared.result.lock().unwrap_or_else(PoisonError::into_inner);
        let mut guard = self
            .shared
            .finished
            .wait_while(guard, |result| {
                result.is_none() && Arc::strong_count(&self.shared) > 1
            })
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    /// Asks the work to stop early. Its output, if any, is discarded by the owner.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }
}

/// A fixed set of worker threads for background decompression.
///
/// The pool never queues more jobs than it has workers: [`try_spawn`] hands the work
/// back when every worker is busy, and the caller runs it inline instead.
///
/// [`try_spawn`]: DecompressionPool::try_spawn
pub struct DecompressionPool {
    size: usize,
    busy: Arc<AtomicUsize>,
    sender: Option<Sender<Task>>,
    workers: Vec<thread::JoinHandle<()>>,
    signal: Arc<CompletionSignal>,
}

impl DecompressionPool {
    /// Starts `size` workers. Finished jobs are reported on `signal`.
    pub fn new(size: usize, signal: Arc<CompletionSignal>) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded::<Task>(size.max(1));
        let workers: Vec<_> = (0..size)
            .filter_map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("larder-decompress-{index}"))
                    .spawn(move || {
                        for task in receiver.iter() {
                            task();
                        }
                    })
                    .map_err(|err| log::warn!("Could not spawn decompression worker: {err}"))
                    .ok()
            })
            .collect();
        log::debug!("Decompression pool started with {} workers", workers.len());

        Self {
            size: workers.len(),
            busy: Arc::new(AtomicUsize::new(0)),
            sender: Some(sender),
            workers,
            signal,
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs queued or running.
    pub fn active(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Hands `input` and `work` to a free worker, or gives `input` back if every
    /// worker is busy.
    pub fn try_spawn<S, T, F>(&self, input: S, work: F) -> Result<Job<T>, S>
    where
        S: Send + 'static,
        T: Send + 'static,
        F: FnOnce(S, &Cancellation<'_>) -> T + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return Err(input);
        };
        if self
            .busy
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.size).then_some(n + 1))
            .is_err()
        {
            return Err(input);
        }

        let shared = Arc::new(JobShared::new());
        let task_shared = shared.clone();
        let busy = self.busy.clone();
        let signal = self.signal.clone();
        let slot = Arc::new(Mutex::new(Some(input)));
        let task_slot = slot.clone();
        let task: Task = Box::new(move || {
            let input = task_slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            let output = input.map(|input| task_shared.execute(|cancel| work(input, cancel)));
            busy.fetch_sub(1, Ordering::SeqCst);
            if let Some(output) = output {
                task_shared.complete(output);
            }
            signal.notify();
        });

        if sender.try_send(task).is_ok() {
            return Ok(Job { shared });
        }
        self.busy.fetch_sub(1, Ordering::SeqCst);
        let input = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match input {
            Some(input) => Err(input),
            None => Ok(Job { shared }),
        }
    }
}

impl Drop for DecompressionPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn inline_job_is_finished_immediately() {
        let job = Job::run_inline(|_| 21 * 2);
        assert!(job.is_finished());
        assert_eq!(job.try_take(), Some(42));
        assert_eq!(job.try_take(), None);
    }

    #[test]
    fn background_job_reports_completion() {
        let signal = Arc::new(CompletionSignal::new());
        let pool = DecompressionPool::new(1, signal.clone());
        let seen = signal.epoch();
        let job = pool.try_spawn((), |(), _| "done").ok().unwrap();
        assert_eq!(job.wait(), Some("done"));
        assert!(signal.wait_past(seen, Duration::from_secs(5)));
    }

    #[test]
    fn saturated_pool_hands_work_back() {
        let pool = DecompressionPool::new(1, Arc::new(CompletionSignal::new()));
        let (release, gate) = mpsc::channel::<()>();
        let blocker = pool
            .try_spawn(gate, |gate, _| {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            })
            .ok()
            .unwrap();

        let rejected = pool.try_spawn(vec![1, 2, 3], |input, _| input.len());
        let input = rejected.err().unwrap();
        let fallback = Job::run_inline(|_| input.len());
        assert_eq!(fallback.try_take(), Some(3));

        release.send(()).unwrap();
        blocker.wait();
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn pool_without_workers_rejects_everything() {
        let pool = DecompressionPool::new(0, Arc::new(CompletionSignal::new()));
        assert_eq!(pool.size(), 0);
        assert!(pool.try_spawn((), |(), _| ()).is_err());
    }

    #[test]
    fn cancellation_is_visible_to_running_work() {
        let pool = DecompressionPool::new(1, Arc::new(CompletionSignal::new()));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let job = pool
            .try_spawn(started_tx, |started_tx, cancel| {
                let _ = started_tx.send(());
                for _ in 0..500 {
                    if cancel.is_cancelled() {
                        return true;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                false
            })
            .ok()
            .unwrap();
        started_rx.recv().unwrap();
        job.cancel();
        assert_eq!(job.wait(), Some(true));
    }
}
