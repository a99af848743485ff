// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use log::info;

use crate::lmk::threshold::ThresholdTable;
use crate::sync::NoPoison;
use crate::sync::NoPoisonRw;

/// Owns the threshold table consulted by selection and swaps it between the
/// foreground and background variants across suspend.
pub struct ProfileSwitcher {
    active: RwLock<Arc<ThresholdTable>>,
    foreground: Mutex<Arc<ThresholdTable>>,
    background: Mutex<Arc<ThresholdTable>>,
    enabled: AtomicBool,
    suspended: AtomicBool,
}

impl ProfileSwitcher {
    pub fn new(foreground: ThresholdTable, background: ThresholdTable, enabled: bool) -> Self {
        let foreground = Arc::new(foreground);
        Self {
            active: RwLock::new(foreground.clone()),
            foreground: Mutex::new(foreground),
            background: Mutex::new(Arc::new(background)),
            enabled: AtomicBool::new(enabled),
            suspended: AtomicBool::new(false),
        }
    }

    /// The table to resolve against. Readers keep their snapshot even if a
    /// swap happens concurrently.
    pub fn active(&self) -> Arc<ThresholdTable> {
        // Readers and writers only hold the lock to clone or replace an Arc,
        // never while a table is built or resolved.
        self.active.do_read().clone()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disabling the background profile while suspended restores the
    /// foreground table.
    pub fn set_enabled(&self, enabled: bool) {
        if !enabled && self.is_suspended() {
            self.on_resume();
        }
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn on_suspend(&self) {
        if !self.is_enabled() || self.is_suspended() {
            return;
        }
        let mut active = self.active.do_write();
        *self.foreground.do_lock() = active.clone();
        *active = self.background.do_lock().clone();
        self.suspended.store(true, Ordering::Release);
        info!("Switched to background thresholds");
    }

    pub fn on_resume(&self) {
        if !self.is_enabled() || !self.is_suspended() {
            return;
        }
        let mut active = self.active.do_write();
        *active = self.foreground.do_lock().clone();
        self.suspended.store(false, Ordering::Release);
        info!("Switched to foreground thresholds");
    }

    /// Installs rebuilt tables after a configuration change. The active table
    /// follows the current profile.
    pub fn update_tables(&self, foreground: ThresholdTable, background: ThresholdTable) {
        let foreground = Arc::new(foreground);
        let background = Arc::new(background);
        let mut active = self.active.do_write();
        *self.foreground.do_lock() = foreground.clone();
        *self.background.do_lock() = background.clone();
        *active = if self.is_suspended() {
            background
        } else {
            foreground
        };
    }
}
