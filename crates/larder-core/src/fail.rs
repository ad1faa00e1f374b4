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

//! Allocation fault injection.
//!
//! Every fallible allocation in the resource pipeline checks a [`FailPoints`] instance
//! right before it allocates. Tests arm the fail points to make the n-th check fail and
//! then assert that the operation rolled back cleanly.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A named allocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocSite {
    /// Creation of a resource manager and its initial storage.
    ManagerCreate,
    /// Growth of a manager's slot table.
    SlotGrowth,
    /// Creation of the transient load state of a pending record.
    LoadInfo,
    /// The buffer receiving a read.
    ReadBuffer,
    /// The buffer receiving decompressed output.
    DecompressBuffer,
    /// A background decompression job.
    BackgroundJob,
    /// The record of a strong or weak link.
    LinkRecord,
    /// A data buffer created by the caller (`new_data`).
    DataBuffer,
}

impl AllocSite {
    const ALL: [AllocSite; 8] = [
        AllocSite::ManagerCreate,
        AllocSite::SlotGrowth,
        AllocSite::LoadInfo,
        AllocSite::ReadBuffer,
        AllocSite::DecompressBuffer,
        AllocSite::BackgroundJob,
        AllocSite::LinkRecord,
        AllocSite::DataBuffer,
    ];

    fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

impl fmt::Display for AllocSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllocSite::ManagerCreate => "manager creation",
            AllocSite::SlotGrowth => "slot table growth",
            AllocSite::LoadInfo => "load info",
            AllocSite::ReadBuffer => "read buffer",
            AllocSite::DecompressBuffer => "decompression buffer",
            AllocSite::BackgroundJob => "background job",
            AllocSite::LinkRecord => "link record",
            AllocSite::DataBuffer => "data buffer",
        };
        f.write_str(name)
    }
}

/// Countdown-based allocation failure injection, shared by one resource context.
#[derive(Debug, Default)]
pub struct FailPoints {
    /// Remaining checks before the next failure; zero means disarmed.
    countdown: AtomicUsize,
    /// Sites that fail on their next check, one bit per [`AllocSite`].
    armed_sites: AtomicU64,
    /// Total checks performed, for computing failure windows in tests.
    checks: AtomicUsize,
}

impl FailPoints {
    /// Creates disarmed fail points.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`-th subsequent check (1-based) fail, at whatever site it happens.
    /// `n == 0` disarms the countdown.
    pub fn fail_after(&self, n: usize) {
        self.countdown.store(n, Ordering::SeqCst);
    }

    /// Makes the next check of `site` fail.
    pub fn fail_site(&self, site: AllocSite) {
        self.armed_sites.fetch_or(site.bit(), Ordering::SeqCst);
    }

    /// Disarms everything.
    pub fn disarm(&self) {
        self.countdown.store(0, Ordering::SeqCst);
        self.armed_sites.store(0, Ordering::SeqCst);
    }

    /// Number of checks performed so far.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// `true` while a countdown or a site is still armed.
    pub fn is_armed(&self) -> bool {
        self.countdown.load(Ordering::SeqCst) != 0 || self.armed_sites.load(Ordering::SeqCst) != 0
    }

    /// Consults the fail points before allocating at `site`.
    ///
    /// Returns `Err(site)` if this check was chosen to fail.
    pub fn check(&self, site: AllocSite) -> Result<(), AllocSite> {
        self.checks.fetch_add(1, Ordering::SeqCst);

        let bit = site.bit();
        if self.armed_sites.fetch_and(!bit, Ordering::SeqCst) & bit != 0 {
            log::debug!("Injected allocation failure at {site}");
            return Err(site);
        }

        let fired = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                n => Some(n - 1),
            })
            .is_ok_and(|previous| previous == 1);
        if fired {
            log::debug!("Injected allocation failure at {site}");
            return Err(site);
        }
        Ok(())
    }

    /// All known sites, for exhaustive tests.
    pub fn all_sites() -> &'static [AllocSite] {
        &AllocSite::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_points_never_fail() {
        let points = FailPoints::new();
        for site in FailPoints::all_sites() {
            assert!(points.check(*site).is_ok());
        }
        assert_eq!(points.checks(), FailPoints::all_sites().len());
    }

    #[test]
    fn countdown_fails_exactly_once() {
        let points = FailPoints::new();
        points.fail_after(3);
        assert!(points.check(AllocSite::LoadInfo).is_ok());
        assert!(points.check(AllocSite::ReadBuffer).is_ok());
        assert_eq!(points.check(AllocSite::SlotGrowth), Err(AllocSite::SlotGrowth));
        assert!(points.check(AllocSite::SlotGrowth).is_ok());
        assert!(!points.is_armed());
    }

    #[test]
    fn site_failure_targets_one_site() {
        let points = FailPoints::new();
        points.fail_site(AllocSite::BackgroundJob);
        assert!(points.check(AllocSite::LoadInfo).is_ok());
        assert_eq!(
            points.check(AllocSite::BackgroundJob),
            Err(AllocSite::BackgroundJob)
        );
        assert!(points.check(AllocSite::BackgroundJob).is_ok());
    }
}
