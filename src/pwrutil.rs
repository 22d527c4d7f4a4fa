// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Common definitions and helpers used throughout the power manager.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use anyhow::Result;
use thiserror::Error as ThisError;

/// Errors surfaced by the public facade. Each variant corresponds to one of
/// the coarse status codes of the service interface; success is plain `Ok`.
#[derive(Debug, ThisError)]
pub enum PwrMgrError {
    /// Bad enum value, unknown client or transaction id.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Operation not legal in the current state.
    #[error("Illegal state: {0}")]
    IllegalState(String),
    /// The platform or a required collaborator is not available.
    #[error("Unavailable: {0}")]
    Unavailable(String),
    /// Anything else.
    #[error("{0}")]
    General(String),
}

impl PwrMgrError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        PwrMgrError::InvalidParameter(msg.into())
    }

    pub fn general<S: Into<String>>(msg: S) -> Self {
        PwrMgrError::General(msg.into())
    }
}

/// Parse the first line of a file as a type implementing std::str::FromStr.
pub fn read_from_file<T: FromStr, P: AsRef<Path>>(path: &P) -> Result<T>
where
    T::Err: std::error::Error + Sync + Send + 'static,
{
    let reader = File::open(path).map(BufReader::new)?;
    let line = reader.lines().next().context("No content in file")??;
    line.trim()
        .parse()
        .with_context(|| format!("failed to parse \"{}\"", line))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_read_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"42\n").unwrap();
        assert_eq!(read_from_file::<u32, _>(&file.path()).unwrap(), 42);

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"  7  \nignored").unwrap();
        assert_eq!(read_from_file::<u32, _>(&file.path()).unwrap(), 7);

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"junk").unwrap();
        assert!(read_from_file::<u32, _>(&file.path()).is_err());
    }
}
