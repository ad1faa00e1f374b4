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

//! A completion counter that blocked waiters can sleep on.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Counts completed background operations (reads and decompression jobs).
///
/// A waiter reads the current epoch, checks whether the work it cares about is done,
/// and if not sleeps until the epoch moves past the value it read. Completions that
/// happen between the check and the sleep are therefore never missed.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    epoch: Mutex<u64>,
    changed: Condvar,
}

impl CompletionSignal {
    /// Creates a signal at epoch zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current epoch.
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one completion and wakes every waiter.
    pub fn notify(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch = epoch.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Blocks until the epoch differs from `seen` or `timeout` elapses.
    ///
    /// Returns `true` if the epoch moved.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> bool {
        let guard = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |epoch| *epoch == seen)
            .unwrap_or_else(PoisonError::into_inner);
        *guard != seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_if_epoch_already_moved() {
        let signal = CompletionSignal::new();
        let seen = signal.epoch();
        signal.notify();
        assert!(signal.wait_past(seen, Duration::from_secs(5)));
    }

    #[test]
    fn wait_wakes_on_notify_from_other_thread() {
        let signal = Arc::new(CompletionSignal::new());
        let seen = signal.epoch();
        let notifier = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.notify();
            })
        };
        assert!(signal.wait_past(seen, Duration::from_secs(5)));
        notifier.join().unwrap();
    }

    #[test]
    fn wait_times_out_without_notify() {
        let signal = CompletionSignal::new();
        assert!(!signal.wait_past(signal.epoch(), Duration::from_millis(10)));
    }
}
