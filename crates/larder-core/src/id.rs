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

//! Resource identifiers and timeline marks.

use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};

const INDEX_MASK: u64 = 0xFFFF_FFFF;

/// Identifier of a resource inside one resource manager.
///
/// The low 32 bits hold the slot index plus one and the high 32 bits hold the slot
/// generation. The value is therefore never zero, and a freed slot that gets reused
/// hands out a different ID than the record it replaced.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ResourceId(NonZeroU64);

impl ResourceId {
    /// Builds an ID from a slot index and its generation.
    ///
    /// Returns `None` if `index` is `u32::MAX`, which cannot be encoded.
    pub fn from_parts(index: u32, generation: u32) -> Option<Self> {
        let low = u64::from(index).checked_add(1).filter(|v| *v <= INDEX_MASK)?;
        NonZeroU64::new((u64::from(generation) << 32) | low).map(Self)
    }

    /// Rebuilds an ID from its raw integer form.
    ///
    /// Zero, and any value whose index half is zero, is rejected.
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw & INDEX_MASK == 0 {
            return None;
        }
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw integer form of the ID.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Slot index inside the owning manager.
    pub fn index(self) -> u32 {
        ((self.0.get() & INDEX_MASK) - 1) as u32
    }

    /// Generation of the slot when the ID was issued.
    pub fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A position on a manager's timeline.
///
/// Every record receives the next mark when it is allocated, and `mark()` returns the
/// most recently issued one. Marks never take the value zero; the counter wraps from
/// `u32::MAX` back to one, and ordering uses serial-number arithmetic so that a
/// wrapped counter still compares as later.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Mark(NonZeroU32);

impl Mark {
    /// Initial value of a fresh manager's counter. No record ever carries it.
    pub const ORIGIN: Mark = Mark(NonZeroU32::MIN);

    /// Rebuilds a mark from its integer form. Zero is rejected.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    /// The integer form of the mark.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The mark following this one, skipping zero on wraparound.
    pub fn next(self) -> Mark {
        NonZeroU32::new(self.0.get().wrapping_add(1)).map_or(Mark::ORIGIN, Mark)
    }

    /// `true` if `self` was issued no later than `other`.
    pub fn is_at_or_before(self, other: Mark) -> bool {
        (other.0.get().wrapping_sub(self.0.get()) as i32) >= 0
    }
}

impl fmt::Debug for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mark({})", self.0)
    }
}
