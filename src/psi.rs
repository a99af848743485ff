// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pressure stall information (PSI) triggers.
//!
//! PSI documentation: https://docs.kernel.org/accounting/psi.html

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::time::Duration;

use log::warn;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

const MEMORY_PRESSURE_PATH: &str = "/proc/pressure/memory";

/// The target of the PSI. Either "some" or "full".
pub enum Target {
    Some,
    Full,
}

impl Target {
    fn to_str(&self) -> &'static str {
        match self {
            Target::Some => "some",
            Target::Full => "full",
        }
    }
}

fn trigger_config(target: Target, stall: Duration, window: Duration) -> String {
    format!(
        "{} {} {}\0",
        target.to_str(),
        stall.as_micros(),
        window.as_micros()
    )
}

/// A watcher for PSI events.
pub struct PsiWatcher {
    fd: AsyncFd<File>,
}

impl PsiWatcher {
    /// Creates a new PSI watcher for memory pressure.
    pub fn new_memory_pressure(
        target: Target,
        stall: Duration,
        window: Duration,
    ) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(MEMORY_PRESSURE_PATH)?;

        file.write_all(trigger_config(target, stall, window).as_bytes())?;

        // Monitor POLLPRI for PSI events.
        // https://docs.kernel.org/accounting/psi.html#userspace-monitor-usage-example
        let fd = AsyncFd::with_interest(file, Interest::PRIORITY)?;

        Ok(Self { fd })
    }

    /// Waits for a PSI event to occur.
    pub async fn wait(&mut self) -> io::Result<()> {
        self.fd.readable().await?.clear_ready();
        Ok(())
    }
}

/// Wakes the reclaim loop. Kernels without PSI (or without permission to
/// install a trigger) fall back to polling.
pub enum PressureTrigger {
    Psi(PsiWatcher),
    Poll(Duration),
}

impl PressureTrigger {
    pub fn new(stall: Duration, window: Duration, poll_interval: Duration) -> Self {
        match PsiWatcher::new_memory_pressure(Target::Some, stall, window) {
            Ok(watcher) => Self::Psi(watcher),
            Err(e) => {
                warn!(
                    "PSI trigger is unavailable, polling every {:?}: {}",
                    poll_interval, e
                );
                Self::Poll(poll_interval)
            }
        }
    }

    pub async fn wait(&mut self) -> io::Result<()> {
        match self {
            Self::Psi(watcher) => watcher.wait().await,
            Self::Poll(interval) => {
                tokio::time::sleep(*interval).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_config() {
        assert_eq!(
            trigger_config(
                Target::Some,
                Duration::from_millis(150),
                Duration::from_secs(1)
            ),
            "some 150000 1000000\0"
        );
        assert_eq!(
            trigger_config(Target::Full, Duration::from_millis(1), Duration::from_secs(2)),
            "full 1000 2000000\0"
        );
    }

    #[tokio::test]
    async fn test_poll_trigger() {
        let mut trigger = PressureTrigger::Poll(Duration::from_millis(1));
        assert!(trigger.wait().await.is_ok());
    }
}
