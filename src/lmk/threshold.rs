// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::memory::MemoryStatsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdTier {
    pub priority_floor: i32,
    pub min_free_pages: u64,
    pub min_file_pages: u64,
}

/// The first breached tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierMatch {
    pub index: usize,
    pub priority_floor: i32,
}

/// Tiers ordered from the most severe (lowest free memory, lowest floor) to
/// the least severe. Immutable once built.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    tiers: Vec<ThresholdTier>,
}

impl ThresholdTable {
    pub fn new(tiers: Vec<ThresholdTier>) -> Self {
        Self { tiers }
    }

    /// Zips the three lists into tiers. Extra elements of the longer lists are
    /// dropped.
    pub fn from_lists(
        priority_floors: &[i32],
        min_free_pages: &[u64],
        min_file_pages: &[u64],
    ) -> Self {
        let tiers = priority_floors
            .iter()
            .zip(min_free_pages)
            .zip(min_file_pages)
            .map(|((&priority_floor, &min_free_pages), &min_file_pages)| ThresholdTier {
                priority_floor,
                min_free_pages,
                min_file_pages,
            })
            .collect();
        Self { tiers }
    }

    pub fn tiers(&self) -> &[ThresholdTier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Returns the lowest-index tier breached by `snapshot`, if any.
    pub fn resolve(
        &self,
        snapshot: &MemoryStatsSnapshot,
        swap_fudge_pages: u64,
        check_file_pages: bool,
    ) -> Option<TierMatch> {
        let effective_file = snapshot.effective_file_pages(swap_fudge_pages);
        let lru_file = snapshot.lru_file_pages();
        self.tiers
            .iter()
            .position(|tier| {
                snapshot.free_pages < tier.min_free_pages
                    && (effective_file < tier.min_free_pages
                        || (check_file_pages && lru_file < tier.min_file_pages))
            })
            .map(|index| TierMatch {
                index,
                priority_floor: self.tiers[index].priority_floor,
            })
    }
}
