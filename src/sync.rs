// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

/// lowmemorykiller is compiled to abort on panic, so it is impossible for locks
/// to be poisoned. These helper traits centralize discarding the LockResult,
/// without needing to unwrap()/expect() everywhere a lock is used.
pub trait NoPoison<T: ?Sized> {
    fn do_lock(&self) -> MutexGuard<T>;
}

impl<T: ?Sized> NoPoison<T> for Mutex<T> {
    fn do_lock(&self) -> MutexGuard<T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemorykiller aborts on panic"),
        }
    }
}

pub trait NoPoisonRw<T: ?Sized> {
    fn do_read(&self) -> RwLockReadGuard<T>;
    fn do_write(&self) -> RwLockWriteGuard<T>;
}

impl<T: ?Sized> NoPoisonRw<T> for RwLock<T> {
    fn do_read(&self) -> RwLockReadGuard<T> {
        match self.read() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemorykiller aborts on panic"),
        }
    }

    fn do_write(&self) -> RwLockWriteGuard<T> {
        match self.write() {
            Ok(guard) => guard,
            Err(_) => unreachable!("lowmemorykiller aborts on panic"),
        }
    }
}
