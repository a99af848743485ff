// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use log::warn;

use crate::proc::load_oom_score_adj;

/// The kernel sets PF_KTHREAD in /proc/pid/stat flags for kernel workers.
const PF_KTHREAD: u64 = 0x00200000;

/// A live user process as seen by one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: i32,
    pub comm: String,
    pub priority: i32,
    pub footprint_pages: u64,
}

/// Enumerates candidate processes. The iterator is consumed by a single
/// selection pass and is never restarted.
pub trait ProcessScanner: Send + Sync {
    fn scan(&self) -> Box<dyn Iterator<Item = ProcessRecord> + '_>;
}

/// Scans a procfs mount in directory order.
#[derive(Debug)]
pub struct ProcfsScanner {
    root: PathBuf,
}

impl Default for ProcfsScanner {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

impl ProcfsScanner {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProcessScanner for ProcfsScanner {
    fn scan(&self) -> Box<dyn Iterator<Item = ProcessRecord> + '_> {
        let processes = match procfs::process::all_processes_with_root(&self.root) {
            Ok(processes) => processes,
            Err(e) => {
                warn!("Failed to enumerate {}: {}", self.root.display(), e);
                return Box::new(std::iter::empty());
            }
        };
        // Any process may exit while it is being read. Such entries are
        // silently omitted.
        Box::new(processes.filter_map(|process| {
            let process = process.ok()?;
            let stat = process.stat().ok()?;
            if u64::from(stat.flags) & PF_KTHREAD != 0 {
                return None;
            }
            let footprint_pages = stat.rss;
            if footprint_pages == 0 {
                return None;
            }
            let priority = load_oom_score_adj(&self.root, stat.pid).ok()?;
            Some(ProcessRecord {
                pid: stat.pid,
                comm: stat.comm,
                priority,
                footprint_pages,
            })
        }))
    }
}
