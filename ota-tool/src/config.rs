// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::UART_BAUDRATE;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Time to wait for the status byte after each record. Erasing and
/// programming a page takes a few milliseconds.
pub const DEFAULT_STATUS_TIMEOUT_MS: u64 = 1000;

/// Optional `ota.toml`, every key may be left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub status_timeout_ms: Option<u64>,
}

/// Serial link parameters after flags, config file and defaults are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub port: String,
    pub baud_rate: u32,
    pub status_timeout: Duration,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config = std::fs::read_to_string(path)?;
        toml::from_str(&config).map_err(Into::into)
    }

    /// A missing file is the same as an empty one.
    pub fn load_or_default(path: &Path) -> Result<Self, Error> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Command line values win over the file.
    pub fn settings(self, port: Option<String>, baud_rate: Option<u32>) -> Settings {
        Settings {
            port: port
                .or(self.port)
                .unwrap_or_else(|| DEFAULT_PORT.to_string()),
            baud_rate: baud_rate.or(self.baud_rate).unwrap_or(UART_BAUDRATE),
            status_timeout: Duration::from_millis(
                self.status_timeout_ms.unwrap_or(DEFAULT_STATUS_TIMEOUT_MS),
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file format error in TOML: {0}")]
    Toml(#[from] toml::de::Error),
}
