// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Core value types shared across the power manager.

use std::convert::TryFrom;
use std::fmt;

use anyhow::bail;
use anyhow::Result;

/// Device power mode. The discriminants are the on-disk enum codes of the
/// V1 settings record and must not change.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PowerState {
    Off = 0,
    Standby = 1,
    On = 2,
    StandbyLightSleep = 3,
    StandbyDeepSleep = 4,
    /// Not a durable state. Appears only as an out-parameter default and in
    /// the persisted-before-reboot slot on cold init.
    Unknown = 5,
}

impl PowerState {
    /// The persisted enum code of this state.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether this state is a legal target for a power state request.
    pub fn is_settable(self) -> bool {
        !matches!(self, PowerState::Unknown)
    }
}

impl TryFrom<u32> for PowerState {
    type Error = anyhow::Error;

    fn try_from(code: u32) -> Result<PowerState> {
        Ok(match code {
            0 => PowerState::Off,
            1 => PowerState::Standby,
            2 => PowerState::On,
            3 => PowerState::StandbyLightSleep,
            4 => PowerState::StandbyDeepSleep,
            5 => PowerState::Unknown,
            _ => bail!("Unsupported power state code {}", code),
        })
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Off => "OFF",
            PowerState::Standby => "STANDBY",
            PowerState::On => "ON",
            PowerState::StandbyLightSleep => "STANDBY_LIGHT_SLEEP",
            PowerState::StandbyDeepSleep => "STANDBY_DEEP_SLEEP",
            PowerState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Cause of the last wakeup from deep sleep, as reported by the HAL.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WakeupReason {
    Unknown,
    Ir,
    Bluetooth,
    Rf4ce,
    Gpio,
    Lan,
    Wifi,
    Timer,
    FrontPanel,
    Watchdog,
    SoftwareReset,
    ThermalReset,
    WarmReset,
    ColdBoot,
    Cec,
    Presence,
    Voice,
}

impl fmt::Display for WakeupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WakeupReason::Unknown => "UNKNOWN",
            WakeupReason::Ir => "IR",
            WakeupReason::Bluetooth => "BLUETOOTH",
            WakeupReason::Rf4ce => "RF4CE",
            WakeupReason::Gpio => "GPIO",
            WakeupReason::Lan => "LAN",
            WakeupReason::Wifi => "WIFI",
            WakeupReason::Timer => "TIMER",
            WakeupReason::FrontPanel => "FRONT_PANEL",
            WakeupReason::Watchdog => "WATCHDOG",
            WakeupReason::SoftwareReset => "SOFTWARE_RESET",
            WakeupReason::ThermalReset => "THERMAL_RESET",
            WakeupReason::WarmReset => "WARM_RESET",
            WakeupReason::ColdBoot => "COLD_BOOT",
            WakeupReason::Cec => "CEC",
            WakeupReason::Presence => "PRESENCE",
            WakeupReason::Voice => "VOICE",
        };
        f.write_str(s)
    }
}

/// A hardware input that can bring the device out of a low-power state.
/// The discriminants are fixed bit positions in a `WakeupSourceSet` and in
/// the wire masks of the wakeup-source configuration calls.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WakeupSource {
    Voice = 1,
    PresenceDetection = 2,
    Bluetooth = 3,
    Wifi = 4,
    Ir = 5,
    PowerKey = 6,
    Timer = 7,
    Cec = 8,
    Lan = 9,
}

impl WakeupSource {
    /// Every wakeup source, in bit-position order.
    pub const ALL: [WakeupSource; 9] = [
        WakeupSource::Voice,
        WakeupSource::PresenceDetection,
        WakeupSource::Bluetooth,
        WakeupSource::Wifi,
        WakeupSource::Ir,
        WakeupSource::PowerKey,
        WakeupSource::Timer,
        WakeupSource::Cec,
        WakeupSource::Lan,
    ];

    /// The mask bit of this source.
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for WakeupSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WakeupSource::Voice => "VOICE",
            WakeupSource::PresenceDetection => "PRESENCE_DETECTION",
            WakeupSource::Bluetooth => "BLUETOOTH",
            WakeupSource::Wifi => "WIFI",
            WakeupSource::Ir => "IR",
            WakeupSource::PowerKey => "POWER_KEY",
            WakeupSource::Timer => "TIMER",
            WakeupSource::Cec => "CEC",
            WakeupSource::Lan => "LAN",
        };
        f.write_str(s)
    }
}

/// A fixed-width set over the closed `WakeupSource` enum.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct WakeupSourceSet {
    bits: u32,
}

impl WakeupSourceSet {
    /// The mask of every defined source bit.
    pub const VALID_MASK: u32 = (1 << 1)
        | (1 << 2)
        | (1 << 3)
        | (1 << 4)
        | (1 << 5)
        | (1 << 6)
        | (1 << 7)
        | (1 << 8)
        | (1 << 9);

    pub fn empty() -> Self {
        WakeupSourceSet { bits: 0 }
    }

    pub fn all() -> Self {
        WakeupSourceSet {
            bits: Self::VALID_MASK,
        }
    }

    /// Build a set from a raw mask; undefined bits are discarded.
    pub fn from_bits(bits: u32) -> Self {
        WakeupSourceSet {
            bits: bits & Self::VALID_MASK,
        }
    }

    pub fn of(sources: &[WakeupSource]) -> Self {
        let mut set = Self::empty();
        for src in sources {
            set.insert(*src);
        }
        set
    }

    pub fn bits(self) -> u32 {
        self.bits
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn contains(self, src: WakeupSource) -> bool {
        self.bits & src.bit() != 0
    }

    pub fn insert(&mut self, src: WakeupSource) {
        self.bits |= src.bit();
    }

    pub fn remove(&mut self, src: WakeupSource) {
        self.bits &= !src.bit();
    }

    pub fn set(&mut self, src: WakeupSource, enabled: bool) {
        if enabled {
            self.insert(src);
        } else {
            self.remove(src);
        }
    }

    /// Iterate the sources present in this set, in bit-position order.
    pub fn iter(self) -> impl Iterator<Item = WakeupSource> {
        WakeupSource::ALL
            .iter()
            .copied()
            .filter(move |src| self.contains(*src))
    }
}

/// Logical thermal protection level derived from the core temperature.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThermalLevel {
    Normal,
    High,
    Critical,
}

impl fmt::Display for ThermalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThermalLevel::Normal => "NORMAL",
            ThermalLevel::High => "HIGH",
            ThermalLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_codes() {
        for state in [
            PowerState::Off,
            PowerState::Standby,
            PowerState::On,
            PowerState::StandbyLightSleep,
            PowerState::StandbyDeepSleep,
            PowerState::Unknown,
        ] {
            assert_eq!(PowerState::try_from(state.code()).unwrap(), state);
        }
        assert!(PowerState::try_from(6).is_err());
        assert!(!PowerState::Unknown.is_settable());
        assert!(PowerState::StandbyDeepSleep.is_settable());
    }

    #[test]
    fn test_wakeup_source_set_ops() {
        let mut set = WakeupSourceSet::empty();
        assert!(set.is_empty());
        set.insert(WakeupSource::Wifi);
        set.insert(WakeupSource::Lan);
        assert!(set.contains(WakeupSource::Wifi));
        assert!(set.contains(WakeupSource::Lan));
        assert!(!set.contains(WakeupSource::Ir));

        set.set(WakeupSource::Wifi, false);
        assert!(!set.contains(WakeupSource::Wifi));

        let collected: Vec<WakeupSource> = set.iter().collect();
        assert_eq!(collected, vec![WakeupSource::Lan]);
    }

    #[test]
    fn test_wakeup_source_set_masks_undefined_bits() {
        let set = WakeupSourceSet::from_bits(0xFFFF_FFFF);
        assert_eq!(set.bits(), WakeupSourceSet::VALID_MASK);
        assert_eq!(set, WakeupSourceSet::all());
        // Bit 0 is reserved and never part of a valid set.
        assert_eq!(WakeupSourceSet::from_bits(1).bits(), 0);
    }

    #[test]
    fn test_wakeup_source_bits_are_disjoint() {
        let mut seen = 0u32;
        for src in WakeupSource::ALL {
            assert_eq!(seen & src.bit(), 0);
            seen |= src.bit();
        }
        assert_eq!(seen, WakeupSourceSet::VALID_MASK);
    }
}
