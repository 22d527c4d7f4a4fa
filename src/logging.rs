// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Log initialisation for the CLI and for daemon embedders.

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use log::LevelFilter;
use once_cell::sync::OnceCell;
use syslog::BasicLogger;
use syslog::Facility;
use syslog::Formatter3164;

/// Name log lines are tagged with.
const LOG_PROCESS: &str = "pwrmgr";

static LOG_INIT: OnceCell<()> = OnceCell::new();

/// Route logs to stderr. Used by the CLI; safe to call more than once.
pub fn init_stderr(verbosity: usize) -> Result<()> {
    if LOG_INIT.set(()).is_err() {
        return Ok(());
    }
    stderrlog::new()
        .verbosity(verbosity)
        .init()
        .context("cannot initialize stderr logging")
}

/// Route logs to syslog. Used when the library is embedded in the hosting
/// service; safe to call more than once.
pub fn init_syslog() -> Result<()> {
    if LOG_INIT.set(()).is_err() {
        return Ok(());
    }
    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: LOG_PROCESS.to_string(),
        pid: 0,
    };
    let logger = syslog::unix(formatter).map_err(|e| anyhow!("cannot connect to syslog: {}", e))?;
    log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
        .map(|()| log::set_max_level(LevelFilter::Info))
        .context("cannot install syslog logger")
}
