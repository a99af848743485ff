// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod config;
pub mod dbus;
pub mod lmk;
pub mod memory;
mod proc;
mod psi;
pub mod reclaim;
mod sync;
pub mod syslog;
