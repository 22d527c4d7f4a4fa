// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Power manager core for set-top devices.
//!
//! The [`PowerManager`] owns the device power mode. It runs the pre-change
//! acknowledgement protocol against registered clients, drives the platform
//! abstraction for hardware state changes and deep sleep entry, keeps a
//! small settings record across reboots, polls for thermal protection, and
//! fans notifications out to subscribers. The RPC layer that exposes these
//! operations to remote processes lives in the hosting service and simply
//! wraps the synchronous facade here.

pub mod ack;
pub mod config;
pub mod events;
pub mod hal;
pub mod logging;
pub mod pwrutil;
pub mod reboot;
pub mod settings;
pub mod types;

mod deepsleep;
mod engine;
mod thermal;
mod wakeup;

#[cfg(test)]
mod testutil;

pub use engine::ManagerOptions;
pub use engine::Paths;
pub use engine::PowerManager;
pub use pwrutil::PwrMgrError;
pub use types::PowerState;
pub use types::ThermalLevel;
pub use types::WakeupReason;
pub use types::WakeupSource;
pub use types::WakeupSourceSet;
