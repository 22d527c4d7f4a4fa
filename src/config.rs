// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Read-only access to the remote configuration parameter store.

use std::str::FromStr;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;

/// Thermal poll interval, in seconds.
pub const KEY_THERMAL_POLL_INTERVAL: &str = "RFC_DATA_ThermalProtection_POLL_INTERVAL";
/// Whether the thermal protection loop runs at all.
pub const KEY_THERMAL_PROTECTION_ENABLED: &str = "RFC_ENABLE_ThermalProtection";
/// How long a critical temperature may persist before deep sleep is forced,
/// in seconds.
pub const KEY_THERMAL_DEEPSLEEP_GRACE_INTERVAL: &str =
    "RFC_DATA_ThermalProtection_DEEPSLEEP_GRACE_INTERVAL";

/// A read-only key/value parameter source. Lookups fail when the key is
/// absent or the store is unreachable; callers fall back to built-in
/// defaults.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<String>;
}

/// A store with nothing in it. Every lookup fails, so every consumer runs
/// on its defaults.
pub struct NullConfigStore;

impl ConfigStore for NullConfigStore {
    fn get(&self, key: &str) -> Result<String> {
        bail!("no value for {}", key)
    }
}

/// Look up `key` and parse it, falling back to `default` on any failure.
pub fn get_or<T: FromStr>(store: &dyn ConfigStore, key: &str, default: T) -> T
where
    T::Err: std::error::Error + Sync + Send + 'static,
{
    match try_get(store, key) {
        Ok(value) => value,
        Err(e) => {
            debug!("Using default for {}: {:#}", key, e);
            default
        }
    }
}

/// Look up `key` and parse it as a boolean, falling back on any failure.
/// Accepts "true"/"false" and "1"/"0".
pub fn get_bool_or(store: &dyn ConfigStore, key: &str, default: bool) -> bool {
    match store.get(key) {
        Ok(value) => match value.trim() {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                debug!("Unparseable boolean for {}: \"{}\"", key, other);
                default
            }
        },
        Err(e) => {
            debug!("Using default for {}: {:#}", key, e);
            default
        }
    }
}

fn try_get<T: FromStr>(store: &dyn ConfigStore, key: &str) -> Result<T>
where
    T::Err: std::error::Error + Sync + Send + 'static,
{
    let value = store.get(key)?;
    value
        .trim()
        .parse()
        .with_context(|| format!("failed to parse {}=\"{}\"", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MapConfigStore;

    #[test]
    fn test_null_store_yields_defaults() {
        let store = NullConfigStore;
        assert_eq!(get_or(&store, KEY_THERMAL_POLL_INTERVAL, 30u64), 30);
        assert!(get_bool_or(&store, KEY_THERMAL_PROTECTION_ENABLED, true));
    }

    #[test]
    fn test_values_parse_with_fallback() {
        let store = MapConfigStore::new(&[
            (KEY_THERMAL_POLL_INTERVAL, "1"),
            (KEY_THERMAL_PROTECTION_ENABLED, "false"),
            (KEY_THERMAL_DEEPSLEEP_GRACE_INTERVAL, "junk"),
        ]);
        assert_eq!(get_or(&store, KEY_THERMAL_POLL_INTERVAL, 30u64), 1);
        assert!(!get_bool_or(&store, KEY_THERMAL_PROTECTION_ENABLED, true));
        assert_eq!(
            get_or(&store, KEY_THERMAL_DEEPSLEEP_GRACE_INTERVAL, 600u64),
            600
        );
    }
}
