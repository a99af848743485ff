// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use dbus::channel::MatchingReceiver;
use dbus::channel::Sender;
use dbus::message::MatchRule;
use dbus::message::Message;
use dbus::nonblock::SyncConnection;
use dbus_crossroads::Crossroads;
use dbus_crossroads::IfaceBuilder;
use dbus_crossroads::IfaceToken;
use dbus_crossroads::MethodErr;
use dbus_tokio::connection;
use log::error;
use log::info;
use log::LevelFilter;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::ParameterName;
use crate::config::Parameters;
use crate::lmk::KillReport;
use crate::lmk::SelectionEngine;
use crate::reclaim;
use crate::reclaim::ReclaimSource;
use crate::reclaim::SHRINK_BATCH;
use crate::sync::NoPoison;

const SERVICE_NAME: &str = "org.chromium.LowMemoryKiller";
const PATH_NAME: &str = "/org/chromium/LowMemoryKiller";
const INTERFACE_NAME: &str = SERVICE_NAME;

const POWERD_INTERFACE_NAME: &str = "org.chromium.PowerManager";

const PROCESS_KILLED_SIGNAL: &str = "ProcessKilled";

// Context data for the D-Bus service.
#[derive(Clone)]
struct DbusContext {
    engine: Arc<SelectionEngine>,
    parameters: Arc<Mutex<Parameters>>,
    // Root of the parameter files.
    root: PathBuf,
}

fn get_parameter(context: &DbusContext, name: &str) -> Result<String> {
    let name: ParameterName = name.parse()?;
    Ok(context.parameters.do_lock().get(name))
}

/// Applies the new value to the running engine, then persists it.
fn set_parameter(context: &DbusContext, name: &str, value: &str) -> Result<()> {
    let name: ParameterName = name.parse()?;
    let mut parameters = context.parameters.do_lock();
    parameters.set(name, value)?;
    parameters.apply(&context.engine);
    info!("Set {} to {}", name.as_str(), parameters.get(name));
    if let Err(e) = parameters.store(&context.root, name) {
        error!("Failed to persist {}: {:#}", name.as_str(), e);
    }
    Ok(())
}

fn parse_log_level(level_raw: u8) -> Option<LevelFilter> {
    match level_raw {
        0 => Some(LevelFilter::Off),
        1 => Some(LevelFilter::Error),
        2 => Some(LevelFilter::Warn),
        3 => Some(LevelFilter::Info),
        4 => Some(LevelFilter::Debug),
        5 => Some(LevelFilter::Trace),
        _ => None,
    }
}

fn send_process_killed_signal(conn: &SyncConnection, report: &KillReport) {
    let msg = Message::signal(
        &PATH_NAME.into(),
        &INTERFACE_NAME.into(),
        &PROCESS_KILLED_SIGNAL.into(),
    )
    .append3(report.pid, report.priority, report.footprint_pages);
    if conn.send(msg).is_err() {
        error!("Send ProcessKilled signal failed.");
    }
}

fn register_interface(cr: &mut Crossroads) -> IfaceToken<DbusContext> {
    cr.register(INTERFACE_NAME, |b: &mut IfaceBuilder<DbusContext>| {
        b.method(
            "GetParameter",
            ("name",),
            ("value",),
            move |_, context, (name,): (String,)| match get_parameter(context, &name) {
                Ok(value) => Ok((value,)),
                Err(e) => Err(MethodErr::failed(&format!("{:#}", e))),
            },
        );
        b.method(
            "SetParameter",
            ("name", "value"),
            (),
            move |_, context, (name, value): (String, String)| {
                set_parameter(context, &name, &value)
                    .map_err(|e| MethodErr::failed(&format!("{:#}", e)))
            },
        );
        b.method(
            "GetReclaimablePages",
            (),
            ("pages",),
            move |_, context, ()| Ok((context.engine.estimate(),)),
        );
        b.method("Reclaim", (), ("result",), move |_, context, ()| {
            Ok((context.engine.reclaim(SHRINK_BATCH),))
        });
        b.method(
            "SetLogLevel",
            ("level",),
            (),
            move |_, _, (level_raw,): (u8,)| {
                let Some(level) = parse_log_level(level_raw) else {
                    return Err(MethodErr::failed(&"Unsupported log level value"));
                };
                log::set_max_level(level);
                Ok(())
            },
        );

        // Advertise the signals.
        b.signal::<(i32, i32, u64), _>(
            PROCESS_KILLED_SIGNAL,
            ("pid", "priority", "footprint_pages"),
        );
    })
}

async fn watch_suspend_signals(
    conn: &Arc<SyncConnection>,
    engine: &Arc<SelectionEngine>,
) -> Result<()> {
    let suspend_imminent_rule = MatchRule::new_signal(POWERD_INTERFACE_NAME, "SuspendImminent");
    conn.add_match_no_cb(&suspend_imminent_rule.match_str())
        .await?;
    let suspend_engine = engine.clone();
    conn.start_receive(
        suspend_imminent_rule,
        Box::new(move |_, _| {
            suspend_engine.profiles().on_suspend();
            true
        }),
    );

    let suspend_done_rule = MatchRule::new_signal(POWERD_INTERFACE_NAME, "SuspendDone");
    conn.add_match_no_cb(&suspend_done_rule.match_str())
        .await?;
    let resume_engine = engine.clone();
    conn.start_receive(
        suspend_done_rule,
        Box::new(move |_, _| {
            resume_engine.profiles().on_resume();
            true
        }),
    );
    Ok(())
}

pub async fn service_main(
    engine: Arc<SelectionEngine>,
    parameters: Parameters,
    root: PathBuf,
    mut kill_reports: UnboundedReceiver<KillReport>,
) -> Result<()> {
    let context = DbusContext {
        engine: engine.clone(),
        parameters: Arc::new(Mutex::new(parameters)),
        root,
    };

    let (io_resource, conn) = connection::new_system_sync()?;

    // io_resource must be awaited to start receiving D-Bus message.
    let _handle = tokio::spawn(async {
        let err = io_resource.await;
        panic!("Lost connection to D-Bus: {}", err);
    });

    conn.request_name(SERVICE_NAME, false, true, false)
        .await
        .context("request D-Bus name")?;

    let mut cr = Crossroads::new();
    let token = register_interface(&mut cr);
    cr.insert(PATH_NAME, &[token], context);

    watch_suspend_signals(&conn, &engine)
        .await
        .context("watch powerd suspend signals")?;

    conn.start_receive(
        MatchRule::new_method_call(),
        Box::new(move |msg, conn| match cr.handle_message(msg, conn) {
            Ok(()) => true,
            Err(()) => {
                error!("error handling D-Bus message");
                false
            }
        }),
    );

    let signal_conn = conn.clone();
    tokio::spawn(async move {
        while let Some(report) = kill_reports.recv().await {
            send_process_killed_signal(&signal_conn, &report);
        }
    });

    info!("Starting the reclaim loop");
    let source: Arc<dyn ReclaimSource> = engine;
    loop {
        if let Err(e) = reclaim::run_reclaim_loop(source.clone()).await {
            error!("Failed to run the reclaim loop: {:#}", e);
            // wait 1 second to retry to avoid logging the error in a busy loop.
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}
