// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use chrono::Utc;
use color_eyre::{eyre::WrapErr, Result};
use serde::Serialize;
use std::{
    fs::OpenOptions,
    io::Write,
    sync::{mpsc, Arc},
};

/// Drains an `mpsc` channel on a dedicated OS thread and appends
/// newline-delimited JSON audit records, so logging never sits on the
/// critical path of a filesystem operation during a transaction.
#[derive(Clone, Debug)]
pub(crate) struct EventLogger {
    sender: mpsc::Sender<(&'static str, String)>,
    join_handle: Arc<jod_thread::JoinHandle<()>>,
}

#[derive(Serialize)]
struct EventRecord<'a> {
    event: &'a str,
    time: chrono::DateTime<Utc>,
    data: serde_json::Value,
}

impl EventLogger {
    pub(crate) fn new(events_path: Utf8PathBuf) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<(&'static str, String)>();
        let join_handle = jod_thread::Builder::new()
            .name("buddy-event-logger".to_owned())
            .spawn(move || {
                let mut file = match OpenOptions::new().create(true).append(true).open(&events_path) {
                    Ok(file) => file,
                    Err(err) => {
                        tracing::error!("failed to open event log at {events_path}: {err}");
                        return;
                    }
                };
                loop {
                    let (event_name, data) = match receiver.recv() {
                        Ok(event) => event,
                        Err(_) => return,
                    };
                    let record = EventRecord {
                        event: event_name,
                        time: Utc::now(),
                        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                    };
                    let Ok(mut line) = serde_json::to_string(&record) else {
                        continue;
                    };
                    line.push('\n');
                    let _ = file.write_all(line.as_bytes());
                }
            })
            .wrap_err("creating event logger thread failed")?;

        Ok(Self {
            sender,
            join_handle: Arc::new(join_handle),
        })
    }

    pub(crate) fn log(&self, event_name: &'static str, data: &impl Serialize) {
        let data = match serde_json::to_string(data) {
            Ok(data) => data,
            Err(_) => return,
        };
        // Audit events are best-effort: a dropped receiver (logger thread
        // gone) should never fail the operation it's reporting on.
        let _ = self.sender.send((event_name, data));
    }
}
