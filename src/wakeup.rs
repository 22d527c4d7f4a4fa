// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Wakeup source configuration and the derived network standby mode.
//!
//! The registry caches the enabled bit of every wakeup source it has pushed
//! to the HAL. Network standby is never stored on its own authority here: it
//! is the conjunction of the Wifi and Lan bits, recomputed after every
//! mutation.

use std::sync::Arc;
use std::sync::Mutex;

use log::info;
use log::warn;

use crate::hal::PowerHal;
use crate::pwrutil::PwrMgrError;
use crate::types::WakeupSource;
use crate::types::WakeupSourceSet;

pub struct WakeupRegistry {
    hal: Arc<dyn PowerHal>,
    enabled: Mutex<WakeupSourceSet>,
}

impl WakeupRegistry {
    pub fn new(hal: Arc<dyn PowerHal>) -> Self {
        WakeupRegistry {
            hal,
            enabled: Mutex::new(WakeupSourceSet::empty()),
        }
    }

    /// Push the persisted network standby mode to the Wifi and Lan bits at
    /// startup. Best effort; failures are logged and the cache reflects only
    /// what the HAL accepted.
    pub fn seed_network_standby(&self, enabled: bool) {
        let mask = WakeupSourceSet::of(&[WakeupSource::Wifi, WakeupSource::Lan]);
        let config = if enabled {
            mask
        } else {
            WakeupSourceSet::empty()
        };
        if let Err(e) = self.apply(mask, config) {
            warn!("Failed to seed network standby wakeup sources: {}", e);
        }
    }

    /// Update every source named in `sources` to the matching bit of
    /// `config`. Returns the new derived network standby value when the
    /// derivation changed, None otherwise.
    pub fn apply(
        &self,
        sources: WakeupSourceSet,
        config: WakeupSourceSet,
    ) -> Result<Option<bool>, PwrMgrError> {
        if sources.is_empty() {
            return Err(PwrMgrError::invalid("empty wakeup source mask"));
        }

        let mut enabled = self.enabled.lock().unwrap();
        let before = derive_network_standby(*enabled);
        let mut failures = 0;
        for src in sources.iter() {
            let on = config.contains(src);
            match self.hal.set_wakeup_source(src, on) {
                Ok(()) => {
                    enabled.set(src, on);
                    info!("Wakeup source {} {}", src, if on { "enabled" } else { "disabled" });
                }
                Err(e) => {
                    failures += 1;
                    warn!("Failed to set wakeup source {}: {:#}", src, e);
                }
            }
        }
        let after = derive_network_standby(*enabled);
        drop(enabled);

        if failures > 0 && after == before {
            return Err(PwrMgrError::general("wakeup source update failed"));
        }
        Ok((before != after).then_some(after))
    }

    /// Read the HAL for every source named in `sources` and compose the
    /// enabled bits. The result is always a subset of `sources`.
    pub fn query(&self, sources: WakeupSourceSet) -> Result<WakeupSourceSet, PwrMgrError> {
        if sources.is_empty() {
            return Err(PwrMgrError::invalid("empty wakeup source mask"));
        }

        let mut config = WakeupSourceSet::empty();
        for src in sources.iter() {
            let on = self
                .hal
                .wakeup_source(src)
                .map_err(|e| PwrMgrError::general(format!("cannot read wakeup source: {:#}", e)))?;
            config.set(src, on);
        }
        Ok(config)
    }

    /// The derived network standby mode: Wifi and Lan both enabled.
    pub fn network_standby(&self) -> bool {
        derive_network_standby(*self.enabled.lock().unwrap())
    }
}

fn derive_network_standby(enabled: WakeupSourceSet) -> bool {
    enabled.contains(WakeupSource::Wifi) && enabled.contains(WakeupSource::Lan)
}
