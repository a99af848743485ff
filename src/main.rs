// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;
use log::error;
use log::info;
use lowmemorykiller::config;
use lowmemorykiller::config::Parameters;
use lowmemorykiller::dbus;
use lowmemorykiller::lmk::ProcfsScanner;
use lowmemorykiller::lmk::ProfileSwitcher;
use lowmemorykiller::lmk::SelectionEngine;
use lowmemorykiller::lmk::SigkillSender;
use lowmemorykiller::lmk::TerminationController;
use lowmemorykiller::lmk::Tunables;
use lowmemorykiller::syslog;
use tokio::runtime::Builder;

const IDENT: &str = "lowmemorykiller";

fn main() -> Result<()> {
    let log_to_stderr = std::env::args().skip(1).any(|arg| arg == "--log-to-stderr");

    // Initialize syslog. The default log level is info (debug! and trace! are ignored).
    // You can change the log level with log::set_max_level().
    if let Err(e) = syslog::init(IDENT.to_string(), log_to_stderr) {
        bail!("Failed to initialize syslog: {}", e);
    }

    info!("Starting lowmemorykiller");

    if let Err(err) = config::init_parameter_files() {
        error!("Failed to initialize parameter files: {}", err);
    }

    let root = PathBuf::from("/");
    let parameters = Parameters::load(&root);

    let (kill_sender, kill_receiver) = tokio::sync::mpsc::unbounded_channel();
    let engine = SelectionEngine::new(
        Box::new(ProcfsScanner::default()),
        TerminationController::new(Box::new(SigkillSender), Some(kill_sender)),
        ProfileSwitcher::new(
            parameters.foreground_table(),
            parameters.background_table(),
            parameters.background_profile,
        ),
        Tunables::default(),
    );
    parameters.apply(&engine);

    let rt = Builder::new_current_thread().enable_all().build()?;
    if let Err(err) = rt.block_on(dbus::service_main(
        Arc::new(engine),
        parameters,
        root,
        kill_receiver,
    )) {
        error!("The D-Bus service main returns error: {:?}", err);
    }

    Ok(())
}
