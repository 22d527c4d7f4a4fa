// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The deep sleep task: hardware entry, wakeup classification, and the
//! follow-on transition back to light sleep.
//!
//! The task owns the blocking HAL call. While it runs, externally requested
//! transitions are queued by the engine and drained here after the
//! post-wakeup light sleep commit, which yields the ordered sequence
//! DEEP_SLEEP -> LIGHT_SLEEP -> queued target.

use std::sync::Arc;
use std::thread;

use log::error;
use log::info;
use log::warn;

use crate::engine::request_power_state;
use crate::engine::Origin;
use crate::engine::Shared;
use crate::pwrutil::read_from_file;
use crate::types::PowerState;

/// Spawn the deep sleep task. Called by the engine right after committing
/// the DEEP_SLEEP state.
pub(crate) fn start(shared: &Arc<Shared>) {
    let mut ds = shared.deep_sleep.lock().unwrap();
    if ds.running {
        warn!("Deep sleep task already running");
        return;
    }
    ds.running = true;
    ds.pending = None;

    let task = Arc::clone(shared);
    match thread::Builder::new()
        .name("pwrmgr-deepsleep".to_string())
        .spawn(move || run(task))
    {
        Ok(handle) => ds.handle = Some(handle),
        Err(e) => {
            error!("Cannot spawn deep sleep task: {}", e);
            ds.running = false;
        }
    }
}

fn run(shared: Arc<Shared>) {
    let timeout = effective_timeout(&shared);
    let network_standby = shared.settings.lock().unwrap().nw_standby_mode();

    if shared.opts.paths.ignore_deep_sleep.exists() {
        // Treated exactly like an immediate user wakeup.
        info!("Deep sleep override marker present, skipping hardware entry");
    } else {
        sleep_and_wake(&shared, timeout, network_standby);
    }

    if let Err(e) = request_power_state(
        &shared,
        0,
        PowerState::StandbyLightSleep,
        "deep-sleep-wakeup",
        Origin::DeepSleepWake,
    ) {
        error!("Post-wakeup transition failed: {}", e);
    }

    let pending = {
        let mut ds = shared.deep_sleep.lock().unwrap();
        ds.running = false;
        ds.pending.take()
    };
    if let Some(request) = pending {
        info!("Executing queued request for {}", request.target);
        if let Err(e) = request_power_state(
            &shared,
            request.key_code,
            request.target,
            &request.reason,
            Origin::Queued,
        ) {
            error!("Queued power state request failed: {}", e);
        }
    }
}

/// Block inside the HAL until wakeup, then classify the cause.
fn sleep_and_wake(shared: &Arc<Shared>, timeout: u32, network_standby: bool) {
    info!(
        "Entering deep sleep for up to {}s (network standby: {})",
        timeout, network_standby
    );

    let mut outcome = None;
    for attempt in 1..=shared.opts.deep_sleep_attempts {
        match shared.hal.enter_deep_sleep(timeout, network_standby) {
            Ok(user_wake) => {
                outcome = Some(user_wake);
                break;
            }
            Err(e) => error!("Deep sleep entry attempt {} failed: {:#}", attempt, e),
        }
    }

    if outcome.is_some() || shared.opts.wakeup_on_deep_sleep_failure {
        if let Err(e) = shared.hal.deep_sleep_wakeup() {
            error!("Deep sleep wakeup failed: {:#}", e);
        }
    }

    match outcome {
        Some(true) => info!("Woke from deep sleep on user input"),
        Some(false) => {
            info!("Woke from deep sleep on timer expiry after {}s", timeout);
            shared.notifier.deep_sleep_timeout(timeout);
            match shared.hal.last_wakeup_reason() {
                Ok(reason) => info!("Last wakeup reason: {}", reason),
                Err(e) => warn!("Cannot read last wakeup reason: {:#}", e),
            }
        }
        None => warn!(
            "Deep sleep entry failed {} times, forcing the wakeup path",
            shared.opts.deep_sleep_attempts
        ),
    }
}

/// The timeout handed to the HAL: the persisted setting, unless both
/// override markers are present, in which case the value file wins.
fn effective_timeout(shared: &Arc<Shared>) -> u32 {
    let paths = &shared.opts.paths;
    if paths.deep_sleep_timer_gate.exists() {
        match read_from_file::<u32, _>(&paths.deep_sleep_timer_val) {
            Ok(secs) => {
                info!("Using deep sleep timeout override of {}s", secs);
                return secs;
            }
            Err(e) => warn!("Ignoring deep sleep timeout override: {:#}", e),
        }
    }
    shared.settings.lock().unwrap().deep_sleep_timeout_secs()
}
