// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::Instant;

use log::warn;

use crate::lmk::profile::ProfileSwitcher;
use crate::lmk::scanner::ProcessRecord;
use crate::lmk::scanner::ProcessScanner;
use crate::lmk::termination::TerminationController;
use crate::lmk::threshold::TierMatch;
use crate::lmk::Tunables;
use crate::lmk::VERBOSITY_ESTIMATE_RETURN;
use crate::lmk::VERBOSITY_RECLAIM_RETURN;
use crate::lmk::VERBOSITY_SELECT;
use crate::lmk::VERBOSITY_TIER;
use crate::lmk_print;
use crate::memory::MemoryStatsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Report the reclaimable page count without scanning or killing.
    Estimate,
    Reclaim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionResult {
    Estimate {
        total_reclaimable: u64,
    },
    CooldownActive,
    NoPressure,
    NoEligibleVictim {
        tier: TierMatch,
    },
    Killed {
        victim: ProcessRecord,
        tier: TierMatch,
        total_reclaimable: u64,
    },
    /// The victim could not be signaled, usually because it already exited.
    KillFailed {
        victim: ProcessRecord,
        tier: TierMatch,
    },
}

impl SelectionResult {
    /// The value reported to the reclaim scheduler: 0 when nothing was done,
    /// -1 when pressure found no eligible victim, otherwise the estimated
    /// reclaimable pages left after the kill.
    pub fn as_shrinker_value(&self) -> i64 {
        match self {
            Self::Estimate { total_reclaimable } => saturating_i64(*total_reclaimable),
            Self::CooldownActive | Self::NoPressure | Self::KillFailed { .. } => 0,
            Self::NoEligibleVictim { .. } => -1,
            Self::Killed {
                victim,
                total_reclaimable,
                ..
            } => saturating_i64(total_reclaimable.saturating_sub(victim.footprint_pages)),
        }
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Picks the process with the highest priority at or above `priority_floor`,
/// preferring the larger footprint at equal priority. Exact ties keep the
/// earliest record.
pub fn select_victim<I>(records: I, priority_floor: i32, verbosity: u32) -> Option<ProcessRecord>
where
    I: Iterator<Item = ProcessRecord>,
{
    let mut best: Option<ProcessRecord> = None;
    for record in records {
        if record.priority < priority_floor {
            continue;
        }
        if let Some(selected) = &best {
            if record.priority < selected.priority
                || (record.priority == selected.priority
                    && record.footprint_pages <= selected.footprint_pages)
            {
                continue;
            }
        }
        lmk_print!(
            verbosity,
            VERBOSITY_SELECT,
            "select {} ({}), priority {}, footprint {} pages",
            record.pid,
            record.comm,
            record.priority,
            record.footprint_pages
        );
        best = Some(record);
    }
    best
}

pub struct SelectionEngine {
    scanner: Box<dyn ProcessScanner>,
    termination: TerminationController,
    profiles: ProfileSwitcher,
    tunables: Tunables,
}

impl SelectionEngine {
    pub fn new(
        scanner: Box<dyn ProcessScanner>,
        termination: TerminationController,
        profiles: ProfileSwitcher,
        tunables: Tunables,
    ) -> Self {
        Self {
            scanner,
            termination,
            profiles,
            tunables,
        }
    }

    pub fn profiles(&self) -> &ProfileSwitcher {
        &self.profiles
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn termination(&self) -> &TerminationController {
        &self.termination
    }

    /// One selection pass over `snapshot`. Never blocks on anything but the
    /// short VictimState critical section.
    pub fn run(&self, mode: Mode, snapshot: &MemoryStatsSnapshot, now: Instant) -> SelectionResult {
        let verbosity = self.tunables.debug_verbosity();
        let total_reclaimable = snapshot.total_reclaimable_pages();

        if mode == Mode::Estimate {
            lmk_print!(
                verbosity,
                VERBOSITY_ESTIMATE_RETURN,
                "estimate return {}",
                total_reclaimable
            );
            return SelectionResult::Estimate { total_reclaimable };
        }

        let result = self.reclaim_pass(snapshot, total_reclaimable, now, verbosity);
        lmk_print!(
            verbosity,
            VERBOSITY_RECLAIM_RETURN,
            "reclaim return {}",
            result.as_shrinker_value()
        );
        result
    }

    fn reclaim_pass(
        &self,
        snapshot: &MemoryStatsSnapshot,
        total_reclaimable: u64,
        now: Instant,
        verbosity: u32,
    ) -> SelectionResult {
        if self
            .termination
            .is_death_pending(now, self.tunables.death_pending_timeout())
        {
            return SelectionResult::CooldownActive;
        }

        let table = self.profiles.active();
        let Some(tier) = table.resolve(
            snapshot,
            self.tunables.effective_swap_fudge_pages(),
            self.tunables.check_file_pages(),
        ) else {
            return SelectionResult::NoPressure;
        };
        lmk_print!(
            verbosity,
            VERBOSITY_TIER,
            "tier {} matched: free {}, file {}, floor {}",
            tier.index,
            snapshot.free_pages,
            snapshot.effective_file_pages(self.tunables.effective_swap_fudge_pages()),
            tier.priority_floor
        );

        let Some(victim) = select_victim(self.scanner.scan(), tier.priority_floor, verbosity) else {
            return SelectionResult::NoEligibleVictim { tier };
        };

        match self
            .termination
            .terminate(&victim, tier.priority_floor, now, verbosity)
        {
            Ok(_) => SelectionResult::Killed {
                victim,
                tier,
                total_reclaimable,
            },
            Err(e) => {
                warn!("Failed to kill {} ({}): {}", victim.pid, victim.comm, e);
                SelectionResult::KillFailed { victim, tier }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::lmk::termination::tests::FakeKiller;
    use crate::lmk::threshold::ThresholdTable;

    struct FakeScanner {
        records: Vec<ProcessRecord>,
        scans: Arc<Mutex<usize>>,
    }

    impl ProcessScanner for FakeScanner {
        fn scan(&self) -> Box<dyn Iterator<Item = ProcessRecord> + '_> {
            *self.scans.lock().unwrap() += 1;
            Box::new(self.records.iter().cloned())
        }
    }

    fn record(pid: i32, priority: i32, footprint_pages: u64) -> ProcessRecord {
        ProcessRecord {
            pid,
            comm: format!("proc{pid}"),
            priority,
            footprint_pages,
        }
    }

    struct TestEngine {
        engine: SelectionEngine,
        killer: FakeKiller,
        scans: Arc<Mutex<usize>>,
    }

    fn new_engine(records: Vec<ProcessRecord>, killer: FakeKiller) -> TestEngine {
        let scans = Arc::new(Mutex::new(0));
        let table = ThresholdTable::from_lists(&[0, 8], &[1024, 4096], &[1024, 4096]);
        let engine = SelectionEngine::new(
            Box::new(FakeScanner {
                records,
                scans: scans.clone(),
            }),
            TerminationController::new(Box::new(killer.clone()), None),
            ProfileSwitcher::new(table.clone(), table, true),
            Tunables::default(),
        );
        TestEngine {
            engine,
            killer,
            scans,
        }
    }

    fn pressure_snapshot() -> MemoryStatsSnapshot {
        // Breaches tier 1 (floor 8) only.
        MemoryStatsSnapshot {
            free_pages: 2000,
            file_backed_pages: 2000,
            active_anon: 1000,
            inactive_anon: 1000,
            active_file: 500,
            inactive_file: 500,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_victim_priority_then_footprint() {
        let records = vec![record(1, 5, 100), record(2, 9, 50), record(3, 9, 200)];
        let victim = select_victim(records.into_iter(), 8, 0).unwrap();
        assert_eq!(victim.pid, 3);
    }

    #[test]
    fn test_select_victim_higher_priority_beats_footprint() {
        let records = vec![record(1, 10, 10), record(2, 9, 5000)];
        assert_eq!(select_victim(records.into_iter(), 0, 0).unwrap().pid, 1);
    }

    #[test]
    fn test_select_victim_first_among_ties() {
        let records = vec![record(4, 9, 200), record(5, 9, 200), record(6, 9, 200)];
        assert_eq!(select_victim(records.into_iter(), 8, 0).unwrap().pid, 4);
    }

    #[test]
    fn test_select_victim_none_eligible() {
        let records = vec![record(1, 5, 100), record(2, 7, 50)];
        assert_eq!(select_victim(records.into_iter(), 8, 0), None);
        assert_eq!(select_victim(std::iter::empty(), 0, 0), None);
    }

    #[test]
    fn test_reclaim_kills_selected_victim() {
        let test = new_engine(
            vec![record(1, 5, 100), record(2, 9, 50), record(3, 9, 200)],
            FakeKiller::default(),
        );
        let now = Instant::now();
        let result = test.engine.run(Mode::Reclaim, &pressure_snapshot(), now);
        assert_eq!(
            result,
            SelectionResult::Killed {
                victim: record(3, 9, 200),
                tier: TierMatch {
                    index: 1,
                    priority_floor: 8
                },
                total_reclaimable: 3000,
            }
        );
        assert_eq!(result.as_shrinker_value(), 2800);
        assert_eq!(*test.killer.killed.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_cooldown_short_circuits_until_deadline() {
        let test = new_engine(vec![record(3, 9, 200)], FakeKiller::default());
        let now = Instant::now();
        let snapshot = pressure_snapshot();
        assert!(matches!(
            test.engine.run(Mode::Reclaim, &snapshot, now),
            SelectionResult::Killed { .. }
        ));
        assert_eq!(*test.scans.lock().unwrap(), 1);

        let result = test
            .engine
            .run(Mode::Reclaim, &snapshot, now + Duration::from_millis(500));
        assert_eq!(result, SelectionResult::CooldownActive);
        assert_eq!(result.as_shrinker_value(), 0);
        // The cooldown skips the scan entirely.
        assert_eq!(*test.scans.lock().unwrap(), 1);

        assert!(matches!(
            test.engine
                .run(Mode::Reclaim, &snapshot, now + Duration::from_millis(1001)),
            SelectionResult::Killed { .. }
        ));
        assert_eq!(*test.killer.killed.lock().unwrap(), vec![3, 3]);
    }

    #[test]
    fn test_concurrent_reclaim_respects_cooldown() {
        let records = (1..=2000).map(|pid| record(pid, 9, 100)).collect();
        let test = new_engine(records, FakeKiller::default());
        let engine = Arc::new(test.engine);
        let snapshot = pressure_snapshot();
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let snapshot = snapshot.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| engine.run(Mode::Reclaim, &snapshot, now))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<SelectionResult> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        // Passes racing the first kill may each kill, but none may report
        // that nothing was eligible.
        let kills = results
            .iter()
            .filter(|result| matches!(result, SelectionResult::Killed { .. }))
            .count();
        assert!(kills >= 1);
        assert!(results.iter().all(|result| matches!(
            result,
            SelectionResult::Killed { .. } | SelectionResult::CooldownActive
        )));
        assert!(results.iter().all(|result| result.as_shrinker_value() >= 0));
        assert_eq!(test.killer.killed.lock().unwrap().len(), kills);

        // Once the cooldown is recorded, no further pass kills.
        assert_eq!(
            engine.run(Mode::Reclaim, &snapshot, now),
            SelectionResult::CooldownActive
        );
        assert_eq!(test.killer.killed.lock().unwrap().len(), kills);
    }

    #[test]
    fn test_estimate_is_side_effect_free() {
        let test = new_engine(vec![record(3, 9, 200)], FakeKiller::default());
        let now = Instant::now();
        let snapshot = pressure_snapshot();
        for _ in 0..3 {
            let result = test.engine.run(Mode::Estimate, &snapshot, now);
            assert_eq!(
                result,
                SelectionResult::Estimate {
                    total_reclaimable: 3000
                }
            );
            assert_eq!(result.as_shrinker_value(), 3000);
        }
        assert_eq!(*test.scans.lock().unwrap(), 0);
        assert!(test.killer.killed.lock().unwrap().is_empty());
        assert_eq!(test.engine.termination().victim_state(), None);
    }

    #[test]
    fn test_estimate_ignores_cooldown() {
        let test = new_engine(vec![record(3, 9, 200)], FakeKiller::default());
        let now = Instant::now();
        let snapshot = pressure_snapshot();
        test.engine.run(Mode::Reclaim, &snapshot, now);
        assert_eq!(
            test.engine.run(Mode::Estimate, &snapshot, now).as_shrinker_value(),
            3000
        );
    }

    #[test]
    fn test_no_pressure() {
        let test = new_engine(vec![record(3, 9, 200)], FakeKiller::default());
        let snapshot = MemoryStatsSnapshot {
            free_pages: 100000,
            ..pressure_snapshot()
        };
        let result = test.engine.run(Mode::Reclaim, &snapshot, Instant::now());
        assert_eq!(result, SelectionResult::NoPressure);
        assert_eq!(result.as_shrinker_value(), 0);
        assert_eq!(*test.scans.lock().unwrap(), 0);
    }

    #[test]
    fn test_no_eligible_victim() {
        let test = new_engine(vec![record(1, 5, 100)], FakeKiller::default());
        let result = test
            .engine
            .run(Mode::Reclaim, &pressure_snapshot(), Instant::now());
        assert_eq!(
            result,
            SelectionResult::NoEligibleVictim {
                tier: TierMatch {
                    index: 1,
                    priority_floor: 8
                }
            }
        );
        assert_eq!(result.as_shrinker_value(), -1);
        assert_eq!(test.engine.termination().victim_state(), None);
    }

    #[test]
    fn test_kill_failure_does_not_start_cooldown() {
        let killer = FakeKiller {
            fail_with: Some(libc::ESRCH),
            ..Default::default()
        };
        let test = new_engine(vec![record(3, 9, 200)], killer);
        let now = Instant::now();
        let result = test.engine.run(Mode::Reclaim, &pressure_snapshot(), now);
        assert!(matches!(result, SelectionResult::KillFailed { .. }));
        assert_eq!(result.as_shrinker_value(), 0);
        assert!(!test
            .engine
            .termination()
            .is_death_pending(now, Duration::from_secs(1)));
    }

    #[test]
    fn test_background_profile_lowers_floor() {
        let table = ThresholdTable::from_lists(&[0, 8], &[1024, 4096], &[1024, 4096]);
        let background = ThresholdTable::from_lists(&[0, 8, 1], &[1024, 4096, 9000], &[0, 0, 0]);
        let engine = SelectionEngine::new(
            Box::new(FakeScanner {
                records: vec![record(2, 3, 500)],
                scans: Arc::new(Mutex::new(0)),
            }),
            TerminationController::new(Box::new(FakeKiller::default()), None),
            ProfileSwitcher::new(table, background, true),
            Tunables::default(),
        );
        let snapshot = MemoryStatsSnapshot {
            free_pages: 5000,
            ..pressure_snapshot()
        };
        let now = Instant::now();
        assert_eq!(
            engine.run(Mode::Reclaim, &snapshot, now),
            SelectionResult::NoPressure
        );
        engine.profiles().on_suspend();
        assert!(matches!(
            engine.run(Mode::Reclaim, &snapshot, now),
            SelectionResult::Killed { .. }
        ));
    }
}
