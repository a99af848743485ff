// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tiered low memory killer.
//!
//! On memory pressure the active [ThresholdTable] resolves the global page
//! counters to a priority floor, and the [SelectionEngine] kills the highest
//! priority, largest process at or above it.

pub mod profile;
pub mod scanner;
pub mod selection;
pub mod termination;
pub mod threshold;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

pub use profile::ProfileSwitcher;
pub use scanner::ProcessRecord;
pub use scanner::ProcessScanner;
pub use scanner::ProcfsScanner;
pub use selection::Mode;
pub use selection::SelectionEngine;
pub use selection::SelectionResult;
pub use termination::KillReport;
pub use termination::Killer;
pub use termination::SigkillSender;
pub use termination::TerminationController;
pub use threshold::ThresholdTable;
pub use threshold::ThresholdTier;
pub use threshold::TierMatch;

/// Verbosity at which kills are announced.
pub const VERBOSITY_KILL: u32 = 1;
/// Verbosity at which each eligible candidate is traced.
pub const VERBOSITY_SELECT: u32 = 2;
/// Verbosity at which the matched tier is reported.
pub const VERBOSITY_TIER: u32 = 3;
/// Verbosity at which the value returned by a reclaim pass is traced.
pub const VERBOSITY_RECLAIM_RETURN: u32 = 4;
/// Verbosity at which the value returned by an estimate is traced.
pub const VERBOSITY_ESTIMATE_RETURN: u32 = 5;

/// Whether a message of `level` is printed at the configured `verbosity`.
pub fn verbosity_enabled(verbosity: u32, level: u32) -> bool {
    verbosity >= level
}

/// Logs at info level when `verbosity` is at least `level`. The message
/// arguments are not evaluated otherwise.
#[macro_export]
macro_rules! lmk_print {
    ($verbosity:expr, $level:expr, $($arg:tt)+) => {
        if $crate::lmk::verbosity_enabled($verbosity, $level) {
            log::info!($($arg)+);
        }
    };
}

/// Scalar tunables read on every selection pass.
pub struct Tunables {
    swap_fudge_pages: AtomicU64,
    check_file_pages: AtomicBool,
    swap_accounting: AtomicBool,
    debug_verbosity: AtomicU32,
    reclaim_cost_weight: AtomicU32,
    death_pending_timeout_ms: AtomicU64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            swap_fudge_pages: AtomicU64::new(512),
            check_file_pages: AtomicBool::new(false),
            swap_accounting: AtomicBool::new(true),
            debug_verbosity: AtomicU32::new(0),
            reclaim_cost_weight: AtomicU32::new(32),
            death_pending_timeout_ms: AtomicU64::new(1000),
        }
    }
}

impl Tunables {
    /// The swap credit cap used by tier resolution. Zero when swap accounting
    /// is disabled.
    pub fn effective_swap_fudge_pages(&self) -> u64 {
        if self.swap_accounting.load(Ordering::Relaxed) {
            self.swap_fudge_pages.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn swap_fudge_pages(&self) -> u64 {
        self.swap_fudge_pages.load(Ordering::Relaxed)
    }

    pub fn set_swap_fudge_pages(&self, pages: u64) {
        self.swap_fudge_pages.store(pages, Ordering::Relaxed);
    }

    pub fn check_file_pages(&self) -> bool {
        self.check_file_pages.load(Ordering::Relaxed)
    }

    pub fn set_check_file_pages(&self, enabled: bool) {
        self.check_file_pages.store(enabled, Ordering::Relaxed);
    }

    pub fn swap_accounting(&self) -> bool {
        self.swap_accounting.load(Ordering::Relaxed)
    }

    pub fn set_swap_accounting(&self, enabled: bool) {
        self.swap_accounting.store(enabled, Ordering::Relaxed);
    }

    pub fn debug_verbosity(&self) -> u32 {
        self.debug_verbosity.load(Ordering::Relaxed)
    }

    pub fn set_debug_verbosity(&self, verbosity: u32) {
        self.debug_verbosity.store(verbosity, Ordering::Relaxed);
    }

    pub fn reclaim_cost_weight(&self) -> u32 {
        self.reclaim_cost_weight.load(Ordering::Relaxed)
    }

    pub fn set_reclaim_cost_weight(&self, weight: u32) {
        self.reclaim_cost_weight.store(weight, Ordering::Relaxed);
    }

    pub fn death_pending_timeout(&self) -> Duration {
        Duration::from_millis(self.death_pending_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_death_pending_timeout(&self, timeout: Duration) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.death_pending_timeout_ms.store(ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_accounting_disables_fudge() {
        let tunables = Tunables::default();
        assert_eq!(tunables.effective_swap_fudge_pages(), 512);
        tunables.set_swap_accounting(false);
        assert_eq!(tunables.effective_swap_fudge_pages(), 0);
        assert_eq!(tunables.swap_fudge_pages(), 512);
    }

    #[test]
    fn test_verbosity_enabled() {
        assert!(!verbosity_enabled(0, VERBOSITY_KILL));
        assert!(verbosity_enabled(1, VERBOSITY_KILL));
        assert!(!verbosity_enabled(3, VERBOSITY_RECLAIM_RETURN));
        assert!(verbosity_enabled(5, VERBOSITY_ESTIMATE_RETURN));
        assert!(verbosity_enabled(9, VERBOSITY_ESTIMATE_RETURN));
    }

    #[test]
    fn test_lmk_print_silent_below_verbosity() {
        let mut evaluated = 0;
        crate::lmk_print!(VERBOSITY_TIER - 1, VERBOSITY_TIER, "tier {}", {
            evaluated += 1;
            evaluated
        });
        crate::lmk_print!(0, VERBOSITY_KILL, "kill {}", {
            evaluated += 1;
            evaluated
        });
        assert_eq!(evaluated, 0);
    }

    #[test]
    fn test_death_pending_timeout() {
        let tunables = Tunables::default();
        assert_eq!(tunables.death_pending_timeout(), Duration::from_secs(1));
        tunables.set_death_pending_timeout(Duration::from_millis(250));
        assert_eq!(tunables.death_pending_timeout(), Duration::from_millis(250));
    }
}
