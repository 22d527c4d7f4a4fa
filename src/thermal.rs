// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Thermal protection: periodic temperature polling, level tracking, and
//! the forced deep sleep on sustained critical temperature.

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use log::error;
use log::info;
use log::warn;

use crate::engine::request_power_state;
use crate::engine::Origin;
use crate::engine::Shared;
use crate::types::PowerState;
use crate::types::ThermalLevel;

/// Temperature poll cadence when the configuration store has no value.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// How long a critical temperature may persist before deep sleep is forced.
pub const DEFAULT_DEEPSLEEP_GRACE_SECS: u64 = 600;
/// Default high / critical temperature thresholds, in degrees Celsius.
pub const DEFAULT_TEMPERATURE_HIGH: f32 = 100.0;
pub const DEFAULT_TEMPERATURE_CRITICAL: f32 = 110.0;

/// Thermal bookkeeping shared between the facade and the poll thread.
pub(crate) struct ThermalState {
    thresholds: Mutex<(f32, f32)>,
    grace_secs: Mutex<u64>,
    level: Mutex<ThermalLevel>,
    stop: Mutex<bool>,
    stop_cond: Condvar,
}

impl ThermalState {
    pub(crate) fn new(grace_secs: u64) -> Self {
        ThermalState {
            thresholds: Mutex::new((DEFAULT_TEMPERATURE_HIGH, DEFAULT_TEMPERATURE_CRITICAL)),
            grace_secs: Mutex::new(grace_secs),
            level: Mutex::new(ThermalLevel::Normal),
            stop: Mutex::new(false),
            stop_cond: Condvar::new(),
        }
    }

    pub(crate) fn thresholds(&self) -> (f32, f32) {
        *self.thresholds.lock().unwrap()
    }

    pub(crate) fn set_thresholds(&self, high: f32, critical: f32) {
        *self.thresholds.lock().unwrap() = (high, critical);
    }

    pub(crate) fn grace_secs(&self) -> u64 {
        *self.grace_secs.lock().unwrap()
    }

    pub(crate) fn set_grace_secs(&self, secs: u64) {
        *self.grace_secs.lock().unwrap() = secs;
    }

    pub(crate) fn level(&self) -> ThermalLevel {
        *self.level.lock().unwrap()
    }

    fn swap_level(&self, new: ThermalLevel) -> ThermalLevel {
        let mut level = self.level.lock().unwrap();
        std::mem::replace(&mut *level, new)
    }

    /// Ask the poll thread to wind down.
    pub(crate) fn request_stop(&self) {
        let mut stop = self.stop.lock().unwrap();
        *stop = true;
        self.stop_cond.notify_all();
    }

    /// Sleep for `timeout` or until a stop is requested. Returns true when
    /// the thread should exit.
    fn wait_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stop = self.stop.lock().unwrap();
        while !*stop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .stop_cond
                .wait_timeout(stop, deadline - now)
                .unwrap();
            stop = guard;
        }
        true
    }
}

/// Map a temperature onto a protection level.
pub(crate) fn classify(temperature: f32, high: f32, critical: f32) -> ThermalLevel {
    if temperature >= critical {
        ThermalLevel::Critical
    } else if temperature >= high {
        ThermalLevel::High
    } else {
        ThermalLevel::Normal
    }
}

/// Poll thread body. Reads the temperature every `poll` interval, publishes
/// level changes, and forces deep sleep once critical has been sustained
/// past the grace interval.
pub(crate) fn run(shared: Arc<Shared>, poll: Duration) {
    let mut critical_since: Option<Instant> = None;
    loop {
        match shared.hal.temperature() {
            Ok(temperature) => {
                let (high, critical) = shared.thermal.thresholds();
                let level = classify(temperature, high, critical);
                let previous = shared.thermal.swap_level(level);
                if level != previous {
                    info!("Thermal level {} at {:.1}C", level, temperature);
                    shared.notifier.thermal_changed(level, temperature);
                }

                if level == ThermalLevel::Critical {
                    let since = *critical_since.get_or_insert_with(Instant::now);
                    let grace = Duration::from_secs(shared.thermal.grace_secs());
                    if since.elapsed() >= grace {
                        error!(
                            "Temperature {:.1}C critical past the grace interval, forcing deep sleep",
                            temperature
                        );
                        if let Err(e) = request_power_state(
                            &shared,
                            0,
                            PowerState::StandbyDeepSleep,
                            "THERMAL_PROTECTION",
                            Origin::External,
                        ) {
                            error!("Thermal deep sleep request failed: {}", e);
                        }
                        critical_since = None;
                    }
                } else {
                    critical_since = None;
                }
            }
            Err(e) => warn!("Cannot read core temperature: {:#}", e),
        }

        if shared.thermal.wait_stop(poll) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_classify_levels() {
        assert_eq!(classify(40.0, 100.0, 110.0), ThermalLevel::Normal);
        assert_eq!(classify(100.0, 100.0, 110.0), ThermalLevel::High);
        assert_eq!(classify(109.9, 100.0, 110.0), ThermalLevel::High);
        assert_eq!(classify(110.0, 100.0, 110.0), ThermalLevel::Critical);
        assert_eq!(classify(250.0, 100.0, 110.0), ThermalLevel::Critical);
    }

    #[test]
    fn test_stop_wakes_sleeper() {
        let state = Arc::new(ThermalState::new(DEFAULT_DEEPSLEEP_GRACE_SECS));
        let sleeper = {
            let state = state.clone();
            thread::spawn(move || state.wait_stop(Duration::from_secs(60)))
        };

        state.request_stop();
        assert!(sleeper.join().unwrap());
    }

    #[test]
    fn test_wait_times_out_without_stop() {
        let state = ThermalState::new(DEFAULT_DEEPSLEEP_GRACE_SECS);
        assert!(!state.wait_stop(Duration::from_millis(10)));
    }
}
