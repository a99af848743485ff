// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod meminfo;
mod page_size;
mod vmstat;

use anyhow::Context;
use anyhow::Result;

pub use meminfo::MemInfo;
pub use page_size::get_page_size;
pub use page_size::kb_to_pages;
pub use vmstat::Vmstat;

/// Global memory counters captured once per selection pass. All values are in
/// pages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStatsSnapshot {
    pub free_pages: u64,
    pub file_backed_pages: u64,
    pub shmem_pages: u64,
    pub active_anon: u64,
    pub inactive_anon: u64,
    pub active_file: u64,
    pub inactive_file: u64,
    pub free_swap_pages: u64,
}

impl MemoryStatsSnapshot {
    /// Reads /proc/vmstat and /proc/meminfo.
    pub fn capture() -> Result<Self> {
        let vmstat = Vmstat::load().context("Failed to load /proc/vmstat")?;
        let meminfo = MemInfo::load().context("Failed to load /proc/meminfo")?;
        Ok(Self::from_counters(&vmstat, &meminfo))
    }

    pub fn from_counters(vmstat: &Vmstat, meminfo: &MemInfo) -> Self {
        Self {
            free_pages: vmstat.nr_free_pages,
            file_backed_pages: vmstat.nr_file_pages,
            shmem_pages: vmstat.nr_shmem,
            active_anon: vmstat.nr_active_anon,
            inactive_anon: vmstat.nr_inactive_anon,
            active_file: vmstat.nr_active_file,
            inactive_file: vmstat.nr_inactive_file,
            free_swap_pages: kb_to_pages(meminfo.swap_free),
        }
    }

    /// Pages of free swap credited as reclaimable file cache. Never more than
    /// the swap actually free.
    pub fn swap_credit_pages(&self, swap_fudge_pages: u64) -> u64 {
        std::cmp::min(swap_fudge_pages, self.free_swap_pages)
    }

    /// File cache excluding shmem, plus the swap credit.
    pub fn effective_file_pages(&self, swap_fudge_pages: u64) -> u64 {
        self.file_backed_pages
            .saturating_sub(self.shmem_pages)
            .saturating_add(self.swap_credit_pages(swap_fudge_pages))
    }

    pub fn lru_file_pages(&self) -> u64 {
        self.active_file.saturating_add(self.inactive_file)
    }

    pub fn total_reclaimable_pages(&self) -> u64 {
        self.active_anon
            .saturating_add(self.active_file)
            .saturating_add(self.inactive_anon)
            .saturating_add(self.inactive_file)
    }
}
