// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hand-off to the platform reboot script.

use std::process::Command;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;

/// Clears the reboot flag so the boot path can tell an orderly reboot from a
/// crash.
const REBOOT_FLAG_COMMAND: &str = "echo 0 > /opt/.rebootFlag";
/// The platform reboot script.
const REBOOT_SCRIPT: &str = "/lib/rdk/rebootNow.sh";

/// Runs a shell command line. The engine only ever hands fixed command
/// strings to this; tests substitute a recorder.
pub trait ShellRunner: Send + Sync {
    fn run(&self, command: &str) -> Result<()>;
}

/// Production runner: /bin/sh -c.
pub struct SystemShellRunner;

impl ShellRunner for SystemShellRunner {
    fn run(&self, command: &str) -> Result<()> {
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .status()
            .with_context(|| format!("Cannot run \"{}\"", command))?;
        if !status.success() {
            bail!("\"{}\" exited with {}", command, status);
        }
        Ok(())
    }
}

/// Empty reboot reasons read poorly in logs and crash reports; substitute a
/// fixed placeholder.
pub fn normalize_reason(reason: &str) -> &str {
    if reason.is_empty() {
        "Unknown"
    } else {
        reason
    }
}

/// Mark the impending reboot as orderly.
pub fn write_reboot_flag(runner: &dyn ShellRunner) -> Result<()> {
    // Flush pending writes first; the reboot script is not guaranteed to.
    debug!("Syncing filesystems");
    // This is safe because sync() does not modify memory.
    unsafe {
        libc::sync();
    }
    runner.run(REBOOT_FLAG_COMMAND)
}

/// Invoke the reboot script with the normalised reasons.
pub fn spawn_reboot(
    runner: &dyn ShellRunner,
    reason_custom: &str,
    reason_other: &str,
    requestor: &str,
) -> Result<()> {
    runner.run(&format!(
        "{} -s '{}' -r '{}' -o '{}'",
        REBOOT_SCRIPT, reason_custom, reason_other, requestor
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingRunner;

    #[test]
    fn test_normalize_reason() {
        assert_eq!(normalize_reason(""), "Unknown");
        assert_eq!(normalize_reason("MAINTENANCE"), "MAINTENANCE");
    }

    #[test]
    fn test_reboot_command_lines() {
        let runner = RecordingRunner::new();
        write_reboot_flag(&runner).unwrap();
        spawn_reboot(&runner, "FW_UPGRADE", "Unknown", "SystemService").unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "echo 0 > /opt/.rebootFlag".to_string(),
                "/lib/rdk/rebootNow.sh -s 'FW_UPGRADE' -r 'Unknown' -o 'SystemService'"
                    .to_string(),
            ]
        );
    }
}
