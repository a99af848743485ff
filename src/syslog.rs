// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::anyhow;
use anyhow::Result;
use log::LevelFilter;
use ::syslog::BasicLogger;
use ::syslog::Facility;
use ::syslog::Formatter3164;

// stderrlog verbosity 2 is Info.
const STDERR_VERBOSITY: usize = 2;

/// Installs the global logger. The default max level is Info; it can be
/// changed later with log::set_max_level(). Falls back to stderr when the
/// syslog socket is unreachable.
pub fn init(ident: String, log_to_stderr: bool) -> Result<()> {
    if log_to_stderr {
        return init_stderr();
    }

    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: ident,
        pid: std::process::id(),
    };
    match ::syslog::unix(formatter) {
        Ok(logger) => {
            log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
                .map_err(|e| anyhow!("Failed to set logger: {}", e))?;
            log::set_max_level(LevelFilter::Info);
            Ok(())
        }
        Err(e) => {
            init_stderr()?;
            log::warn!("Failed to connect to syslog, logging to stderr: {}", e);
            Ok(())
        }
    }
}

fn init_stderr() -> Result<()> {
    stderrlog::new()
        .verbosity(STDERR_VERBOSITY)
        .init()
        .map_err(|e| anyhow!("Failed to set logger: {}", e))?;
    Ok(())
}
