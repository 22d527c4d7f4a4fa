// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Test doubles: a scriptable platform fake, a recording event listener,
//! a map-backed configuration store and a recording shell runner.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use anyhow::bail;
use anyhow::Result;

use crate::config::ConfigStore;
use crate::events::DeepSleepTimeoutListener;
use crate::events::ModeChangedListener;
use crate::events::ModePreChangeListener;
use crate::events::NetworkStandbyListener;
use crate::events::Notifier;
use crate::events::RebootListener;
use crate::events::ThermalListener;
use crate::hal::PowerHal;
use crate::reboot::ShellRunner;
use crate::types::PowerState;
use crate::types::ThermalLevel;
use crate::types::WakeupReason;
use crate::types::WakeupSource;
use crate::types::WakeupSourceSet;

/// One scripted outcome of a deep sleep entry attempt.
pub(crate) enum DeepSleepStep {
    Wake { user_wake: bool, after: Duration },
    Fail,
}

struct FakeHalState {
    power_state: PowerState,
    power_history: Vec<PowerState>,
    wakeup: WakeupSourceSet,
    temperature: f32,
    thresholds: (f32, f32),
    last_reason: WakeupReason,
    last_key_code: i32,
    plan: VecDeque<DeepSleepStep>,
    deep_sleep_calls: Vec<(u32, bool)>,
    deep_sleep_wakeups: u32,
}

/// A scriptable in-process platform. Deep sleep entries consume steps
/// pushed via [`FakeHal::push_deep_sleep`]; with no step queued an entry
/// returns an immediate user wake.
pub(crate) struct FakeHal {
    state: Mutex<FakeHalState>,
}

impl FakeHal {
    pub fn new() -> FakeHal {
        FakeHal {
            state: Mutex::new(FakeHalState {
                power_state: PowerState::On,
                power_history: Vec::new(),
                wakeup: WakeupSourceSet::empty(),
                temperature: 40.0,
                thresholds: (0.0, 0.0),
                last_reason: WakeupReason::Unknown,
                last_key_code: 0,
                plan: VecDeque::new(),
                deep_sleep_calls: Vec::new(),
                deep_sleep_wakeups: 0,
            }),
        }
    }

    pub fn push_deep_sleep(&self, step: DeepSleepStep) {
        self.state.lock().unwrap().plan.push_back(step);
    }

    pub fn set_temperature(&self, temperature: f32) {
        self.state.lock().unwrap().temperature = temperature;
    }

    pub fn set_last_wakeup_reason(&self, reason: WakeupReason) {
        self.state.lock().unwrap().last_reason = reason;
    }

    pub fn set_last_key_code(&self, key_code: i32) {
        self.state.lock().unwrap().last_key_code = key_code;
    }

    pub fn power_history(&self) -> Vec<PowerState> {
        self.state.lock().unwrap().power_history.clone()
    }

    pub fn wakeup_bits(&self) -> WakeupSourceSet {
        self.state.lock().unwrap().wakeup
    }

    pub fn thresholds(&self) -> (f32, f32) {
        self.state.lock().unwrap().thresholds
    }

    pub fn deep_sleep_calls(&self) -> Vec<(u32, bool)> {
        self.state.lock().unwrap().deep_sleep_calls.clone()
    }

    pub fn deep_sleep_wakeups(&self) -> u32 {
        self.state.lock().unwrap().deep_sleep_wakeups
    }
}

impl PowerHal for FakeHal {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn term(&self) -> Result<()> {
        Ok(())
    }

    fn set_power_state(&self, state: PowerState) -> Result<()> {
        let mut hal = self.state.lock().unwrap();
        hal.power_state = state;
        hal.power_history.push(state);
        Ok(())
    }

    fn power_state(&self) -> Result<PowerState> {
        Ok(self.state.lock().unwrap().power_state)
    }

    fn set_wakeup_source(&self, src: WakeupSource, enabled: bool) -> Result<()> {
        self.state.lock().unwrap().wakeup.set(src, enabled);
        Ok(())
    }

    fn wakeup_source(&self, src: WakeupSource) -> Result<bool> {
        Ok(self.state.lock().unwrap().wakeup.contains(src))
    }

    fn enter_deep_sleep(&self, timeout_secs: u32, network_standby: bool) -> Result<bool> {
        let step = {
            let mut hal = self.state.lock().unwrap();
            hal.deep_sleep_calls.push((timeout_secs, network_standby));
            hal.plan.pop_front().unwrap_or(DeepSleepStep::Wake {
                user_wake: true,
                after: Duration::ZERO,
            })
        };
        match step {
            DeepSleepStep::Fail => bail!("deep sleep entry rejected"),
            DeepSleepStep::Wake { user_wake, after } => {
                thread::sleep(after);
                Ok(user_wake)
            }
        }
    }

    fn deep_sleep_wakeup(&self) -> Result<()> {
        self.state.lock().unwrap().deep_sleep_wakeups += 1;
        Ok(())
    }

    fn last_wakeup_reason(&self) -> Result<WakeupReason> {
        Ok(self.state.lock().unwrap().last_reason)
    }

    fn last_wakeup_key_code(&self) -> Result<i32> {
        Ok(self.state.lock().unwrap().last_key_code)
    }

    fn temperature(&self) -> Result<f32> {
        Ok(self.state.lock().unwrap().temperature)
    }

    fn set_temperature_thresholds(&self, high: f32, critical: f32) -> Result<()> {
        self.state.lock().unwrap().thresholds = (high, critical);
        Ok(())
    }

    fn temperature_thresholds(&self) -> Result<(f32, f32)> {
        Ok(self.state.lock().unwrap().thresholds)
    }
}

/// Records every notification it receives as a compact string, and lets
/// tests park until the stream satisfies a predicate.
pub(crate) struct Recorder {
    events: Mutex<Vec<String>>,
    pre_changes: Mutex<Vec<(u32, u32)>>,
    cond: Condvar,
}

impl Recorder {
    pub fn new() -> Arc<Recorder> {
        Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
            pre_changes: Mutex::new(Vec::new()),
            cond: Condvar::new(),
        })
    }

    /// Subscribe `recorder` to every registry of `notifier`.
    pub fn register_all(recorder: &Arc<Recorder>, notifier: &Notifier) {
        notifier.pre_change.register(recorder.clone());
        notifier.mode_changed.register(recorder.clone());
        notifier.deep_sleep_timeout.register(recorder.clone());
        notifier.reboot.register(recorder.clone());
        notifier.network_standby.register(recorder.clone());
        notifier.thermal.register(recorder.clone());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// The `(transaction_id, state_change_after)` of the latest pre-change.
    pub fn last_pre_change(&self) -> Option<(u32, u32)> {
        self.pre_changes.lock().unwrap().last().copied()
    }

    /// Park until `pred` holds over the recorded events, or `timeout`.
    pub fn wait_for<F>(&self, pred: F, timeout: Duration) -> bool
    where
        F: Fn(&[String]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap();
        while !pred(&events) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(events, deadline - now).unwrap();
            events = guard;
        }
        true
    }

    fn push(&self, entry: String) {
        self.events.lock().unwrap().push(entry);
        self.cond.notify_all();
    }
}

impl ModePreChangeListener for Recorder {
    fn on_power_mode_pre_change(
        &self,
        current: PowerState,
        new_state: PowerState,
        transaction_id: u32,
        state_change_after_secs: u32,
    ) {
        self.pre_changes
            .lock()
            .unwrap()
            .push((transaction_id, state_change_after_secs));
        self.push(format!(
            "prechange:{}->{}:after={}",
            current, new_state, state_change_after_secs
        ));
    }
}

impl ModeChangedListener for Recorder {
    fn on_power_mode_changed(&self, previous: PowerState, current: PowerState) {
        self.push(format!("changed:{}->{}", previous, current));
    }
}

impl DeepSleepTimeoutListener for Recorder {
    fn on_deep_sleep_timeout(&self, timeout_secs: u32) {
        self.push(format!("dstimeout:{}", timeout_secs));
    }
}

impl RebootListener for Recorder {
    fn on_reboot_begin(&self, reason_custom: &str, reason_other: &str, requestor: &str) {
        self.push(format!(
            "reboot:{}/{}/{}",
            reason_custom, reason_other, requestor
        ));
    }
}

impl NetworkStandbyListener for Recorder {
    fn on_network_standby_mode_changed(&self, enabled: bool) {
        self.push(format!("nwstandby:{}", enabled));
    }
}

impl ThermalListener for Recorder {
    fn on_thermal_mode_changed(&self, level: ThermalLevel, _temperature: f32) {
        self.push(format!("thermal:{}", level));
    }
}

/// A configuration store backed by a fixed map.
pub(crate) struct MapConfigStore {
    map: HashMap<String, String>,
}

impl MapConfigStore {
    pub fn new(entries: &[(&str, &str)]) -> MapConfigStore {
        MapConfigStore {
            map: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl ConfigStore for MapConfigStore {
    fn get(&self, key: &str) -> Result<String> {
        match self.map.get(key) {
            Some(value) => Ok(value.clone()),
            None => bail!("no value for {}", key),
        }
    }
}

/// A shell runner that records command lines instead of executing them.
pub(crate) struct RecordingRunner {
    commands: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> RecordingRunner {
        RecordingRunner {
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl ShellRunner for RecordingRunner {
    fn run(&self, command: &str) -> Result<()> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }
}
