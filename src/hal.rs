// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Platform abstraction consumed by the power manager core.

use anyhow::Result;

use crate::types::PowerState;
use crate::types::WakeupReason;
use crate::types::WakeupSource;

/// Operations the core needs from the platform. Implementations wrap the
/// vendor power and deep-sleep libraries; tests substitute a scripted fake.
///
/// Any of these calls may block, `enter_deep_sleep` for up to its full
/// timeout. There is no cancellation on HAL calls; a misbehaving
/// implementation can stall the engine.
pub trait PowerHal: Send + Sync {
    /// Bring up the platform power and deep-sleep subsystems.
    fn init(&self) -> Result<()>;

    /// Tear both down again. Called once, at shutdown.
    fn term(&self) -> Result<()>;

    fn set_power_state(&self, state: PowerState) -> Result<()>;

    fn power_state(&self) -> Result<PowerState>;

    fn set_wakeup_source(&self, src: WakeupSource, enabled: bool) -> Result<()>;

    fn wakeup_source(&self, src: WakeupSource) -> Result<bool>;

    /// Enter hardware deep sleep. Blocks for up to `timeout_secs` seconds.
    /// Returns true when the wake was user initiated, false on a timer
    /// expiry.
    fn enter_deep_sleep(&self, timeout_secs: u32, network_standby: bool) -> Result<bool>;

    /// Complete the wakeup sequence after `enter_deep_sleep` returns.
    fn deep_sleep_wakeup(&self) -> Result<()>;

    fn last_wakeup_reason(&self) -> Result<WakeupReason>;

    fn last_wakeup_key_code(&self) -> Result<i32>;

    /// Current core temperature in degrees Celsius.
    fn temperature(&self) -> Result<f32>;

    fn set_temperature_thresholds(&self, high: f32, critical: f32) -> Result<()>;

    fn temperature_thresholds(&self) -> Result<(f32, f32)>;
}
