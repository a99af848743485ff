// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use log::warn;
use tokio::sync::mpsc::UnboundedSender;

use crate::lmk::scanner::ProcessRecord;
use crate::lmk::VERBOSITY_KILL;
use crate::lmk_print;
use crate::sync::NoPoison;

/// The most recent kill. Selection is suppressed while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VictimState {
    pub victim_pid: i32,
    pub signaled_at: Instant,
}

impl VictimState {
    pub fn is_active(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.signaled_at) <= timeout
    }
}

pub trait Killer: Send + Sync {
    fn kill(&self, pid: i32) -> io::Result<()>;
}

/// Sends SIGKILL without waiting for the process to exit.
#[derive(Debug, Default)]
pub struct SigkillSender;

impl Killer for SigkillSender {
    fn kill(&self, pid: i32) -> io::Result<()> {
        // SAFETY: kill(2) does not touch memory of this process.
        let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Sent to the D-Bus service for every delivered kill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillReport {
    pub pid: i32,
    pub priority: i32,
    pub footprint_pages: u64,
}

pub struct TerminationController {
    killer: Box<dyn Killer>,
    victim: Mutex<Option<VictimState>>,
    reporter: Option<UnboundedSender<KillReport>>,
}

impl TerminationController {
    pub fn new(killer: Box<dyn Killer>, reporter: Option<UnboundedSender<KillReport>>) -> Self {
        Self {
            killer,
            victim: Mutex::new(None),
            reporter,
        }
    }

    /// Returns true while the last victim is still within its cooldown window.
    /// An expired VictimState is cleared here.
    pub fn is_death_pending(&self, now: Instant, timeout: Duration) -> bool {
        let mut victim = self.victim.do_lock();
        let active = victim.map_or(false, |state| state.is_active(now, timeout));
        if !active {
            *victim = None;
        }
        active
    }

    pub fn victim_state(&self) -> Option<VictimState> {
        *self.victim.do_lock()
    }

    /// Kills `victim` and starts the cooldown window at `now`. Returns the
    /// footprint of the victim.
    pub fn terminate(
        &self,
        victim: &ProcessRecord,
        priority_floor: i32,
        now: Instant,
        verbosity: u32,
    ) -> io::Result<u64> {
        lmk_print!(
            verbosity,
            VERBOSITY_KILL,
            "send sigkill to {} ({}), priority {}, footprint {} pages, floor {}",
            victim.pid,
            victim.comm,
            victim.priority,
            victim.footprint_pages,
            priority_floor
        );
        self.killer.kill(victim.pid)?;
        *self.victim.do_lock() = Some(VictimState {
            victim_pid: victim.pid,
            signaled_at: now,
        });
        if let Some(reporter) = &self.reporter {
            let report = KillReport {
                pid: victim.pid,
                priority: victim.priority,
                footprint_pages: victim.footprint_pages,
            };
            if reporter.send(report).is_err() {
                warn!("Kill report receiver is gone");
            }
        }
        Ok(victim.footprint_pages)
    }
}
