// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Persistence for the small settings record that survives reboots.

use std::convert::TryFrom;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::info;
use log::warn;

use crate::types::PowerState;

/// Conventional location of the settings record.
pub const SETTINGS_PATH: &str = "/opt/uimgr_settings.bin";

/// Magic value identifying a settings record.
const SETTINGS_MAGIC: u32 = 0xFEBE_EFAC;
/// Version of the record contents. Bump whenever the layout changes.
const SETTINGS_VERSION_V1: u32 = 1;
/// Fixed size of a V1 record on disk, trailing pad included. Kept equal to
/// what V1 readers expect in the `length` header field.
const SETTINGS_V1_SIZE: usize = 32;
/// Size of the (magic, version, length) header.
const HEADER_SIZE: usize = 12;

/// Default deep sleep timeout: 8 hours.
pub const DEFAULT_DEEP_SLEEP_TIMEOUT_SECS: u32 = 8 * 60 * 60;

/// In-memory view of the persisted settings, plus the before-reboot power
/// state snapshot which is computed at load time and never written back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    power_state: PowerState,
    power_state_before_reboot: PowerState,
    deep_sleep_timeout_secs: u32,
    nw_standby_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            power_state: PowerState::On,
            power_state_before_reboot: PowerState::Unknown,
            deep_sleep_timeout_secs: DEFAULT_DEEP_SLEEP_TIMEOUT_SECS,
            nw_standby_mode: false,
        }
    }
}

impl Settings {
    /// Load the settings from `path`, creating the file with defaults if it
    /// is absent, short, or fails validation.
    ///
    /// `restarted` reports the presence of the service restart marker: when
    /// set, the persisted power state is retained verbatim. On a cold boot
    /// with `boot_to_standby` enabled, the current power state snaps to
    /// STANDBY instead. The before-reboot snapshot is taken from the
    /// persisted value either way, exactly once per process lifetime.
    pub fn load(path: &Path, restarted: bool, boot_to_standby: bool) -> Result<Settings> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("Cannot open settings file {}", path.display()))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .context("Cannot read settings file")?;

        let mut settings = match Settings::decode(&buf) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Initializing default settings: {:#}", e);
                let settings = Settings::default();
                file.seek(SeekFrom::Start(0))
                    .context("Cannot rewind settings file")?;
                file.write_all(&settings.encode())
                    .context("Cannot write default settings")?;
                file.set_len(SETTINGS_V1_SIZE as u64)
                    .context("Cannot size settings file")?;
                settings
            }
        };

        file.sync_all().context("Cannot sync settings file")?;

        settings.power_state_before_reboot = settings.power_state;
        if !restarted && boot_to_standby {
            settings.power_state = PowerState::Standby;
            info!("Cold boot, overriding power state to {}", settings.power_state);
        }

        info!("Loaded settings: {}", settings);
        Ok(settings)
    }

    /// Write the settings out to `path`, fsyncing before returning so the
    /// record survives an immediately following reboot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("Cannot open settings file {}", path.display()))?;

        file.seek(SeekFrom::Start(0))
            .context("Cannot rewind settings file")?;
        file.write_all(&self.encode())
            .context("Cannot write settings")?;
        file.sync_all().context("Cannot sync settings file")?;
        Ok(())
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn power_state_before_reboot(&self) -> PowerState {
        self.power_state_before_reboot
    }

    pub fn deep_sleep_timeout_secs(&self) -> u32 {
        self.deep_sleep_timeout_secs
    }

    pub fn nw_standby_mode(&self) -> bool {
        self.nw_standby_mode
    }

    pub fn set_power_state(&mut self, state: PowerState) {
        self.power_state = state;
    }

    pub fn set_deep_sleep_timeout_secs(&mut self, secs: u32) {
        self.deep_sleep_timeout_secs = secs;
    }

    pub fn set_nw_standby_mode(&mut self, enabled: bool) {
        self.nw_standby_mode = enabled;
    }

    /// Validate and decode a raw record.
    fn decode(buf: &[u8]) -> Result<Settings> {
        if buf.len() < HEADER_SIZE {
            bail!("no data in settings file ({} bytes)", buf.len());
        }

        let magic = read_u32(buf, 0);
        let version = read_u32(buf, 4);
        let length = read_u32(buf, 8);

        if magic != SETTINGS_MAGIC {
            bail!("invalid magic {:#010x}, expected {:#010x}", magic, SETTINGS_MAGIC);
        }
        if version != SETTINGS_VERSION_V1 {
            bail!("invalid version {}", version);
        }
        if length != SETTINGS_V1_SIZE as u32 {
            bail!(
                "invalid header size, expected {}, actual {}",
                SETTINGS_V1_SIZE,
                length
            );
        }
        if buf.len() < SETTINGS_V1_SIZE {
            bail!(
                "unable to read full record, expected {}, actual {}",
                SETTINGS_V1_SIZE,
                buf.len()
            );
        }

        let power_state = PowerState::try_from(read_u32(buf, 12))
            .context("invalid persisted power state")?;
        // Bytes 16..24 are the retired LED settings, ignored on load.
        let deep_sleep_timeout_secs = read_u32(buf, 24);
        let nw_standby_mode = buf[28] != 0;

        Ok(Settings {
            power_state,
            power_state_before_reboot: PowerState::Unknown,
            deep_sleep_timeout_secs,
            nw_standby_mode,
        })
    }

    /// Encode the persisted fields as a V1 record.
    fn encode(&self) -> [u8; SETTINGS_V1_SIZE] {
        let mut buf = [0u8; SETTINGS_V1_SIZE];
        buf[0..4].copy_from_slice(&SETTINGS_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&SETTINGS_VERSION_V1.to_le_bytes());
        buf[8..12].copy_from_slice(&(SETTINGS_V1_SIZE as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.power_state.code().to_le_bytes());
        // 16..24: LED brightness and color, unused, kept zero for
        // compatibility with V1 readers.
        buf[24..28].copy_from_slice(&self.deep_sleep_timeout_secs.to_le_bytes());
        buf[28] = self.nw_standby_mode as u8;
        buf
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "powerState: {}, powerStateBeforeReboot: {}, deepSleepTimeout: {}s, nwStandbyMode: {}",
            self.power_state,
            self.power_state_before_reboot,
            self.deep_sleep_timeout_secs,
            if self.nw_standby_mode { "enabled" } else { "disabled" }
        )
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}
