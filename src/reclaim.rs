// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Drives the killer the way the kernel drives a shrinker: each pressure event
//! credits a scan budget proportional to the reclaimable estimate and inversely
//! proportional to the advertised cost, and the budget is spent in batches.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use log::error;

use crate::lmk::Mode;
use crate::lmk::SelectionEngine;
use crate::memory::MemoryStatsSnapshot;
use crate::psi::PressureTrigger;

/// Pages per reclaim call.
pub const SHRINK_BATCH: u64 = 128;

const PSI_STALL: Duration = Duration::from_millis(150);
const PSI_WINDOW: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub trait ReclaimSource: Send + Sync {
    /// Reclaimable pages, without side effects.
    fn estimate(&self) -> i64;
    /// 0 when nothing is needed or possible right now, -1 when pressure found
    /// nothing to kill, otherwise the reclaimable pages left after a kill.
    fn reclaim(&self, scan_budget: u64) -> i64;
    fn cost(&self) -> u32;
}

impl ReclaimSource for SelectionEngine {
    fn estimate(&self) -> i64 {
        match MemoryStatsSnapshot::capture() {
            Ok(snapshot) => self
                .run(Mode::Estimate, &snapshot, Instant::now())
                .as_shrinker_value(),
            Err(e) => {
                error!("Failed to capture memory stats: {:#}", e);
                0
            }
        }
    }

    fn reclaim(&self, scan_budget: u64) -> i64 {
        // A zero budget is a query.
        if scan_budget == 0 {
            return self.estimate();
        }
        match MemoryStatsSnapshot::capture() {
            Ok(snapshot) => self
                .run(Mode::Reclaim, &snapshot, Instant::now())
                .as_shrinker_value(),
            Err(e) => {
                error!("Failed to capture memory stats: {:#}", e);
                0
            }
        }
    }

    fn cost(&self) -> u32 {
        self.tunables().reclaim_cost_weight()
    }
}

/// Scan budget credited for one pressure event.
pub fn scan_credit(estimate: u64, cost: u32) -> u64 {
    estimate.saturating_mul(4) / u64::from(cost.max(1))
}

/// Carries the unspent scan budget between pressure events.
#[derive(Debug, Default)]
pub struct ReclaimScheduler {
    deferred: u64,
}

impl ReclaimScheduler {
    pub fn deferred(&self) -> u64 {
        self.deferred
    }

    /// Returns the number of reclaim calls made.
    pub fn on_pressure(&mut self, source: &dyn ReclaimSource) -> usize {
        let Ok(estimate) = u64::try_from(source.estimate()) else {
            return 0;
        };
        if estimate == 0 {
            self.deferred = 0;
            return 0;
        }
        self.deferred = self
            .deferred
            .saturating_add(scan_credit(estimate, source.cost()))
            .min(estimate.saturating_mul(2));

        let mut calls = 0;
        while self.deferred >= SHRINK_BATCH {
            let result = source.reclaim(SHRINK_BATCH);
            calls += 1;
            self.deferred -= SHRINK_BATCH;
            if result <= 0 {
                break;
            }
        }
        calls
    }
}

/// Waits for memory pressure and feeds it to `source` forever.
pub async fn run_reclaim_loop(source: Arc<dyn ReclaimSource>) -> Result<()> {
    let mut trigger = PressureTrigger::new(PSI_STALL, PSI_WINDOW, POLL_INTERVAL);
    let mut scheduler = ReclaimScheduler::default();
    loop {
        trigger
            .wait()
            .await
            .context("Failed to wait for memory pressure")?;
        scheduler.on_pressure(source.as_ref());
    }
}
