// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::config;
use crate::flasher::StatusByte;
use consts::OTA_START_ADDR;
use update_protocol::RECORD_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("firmware is {len} bytes, nothing to update past {:#x}", OTA_START_ADDR)]
    ImageTooSmall { len: usize },
    #[error("update image is {len} bytes, not a whole number of {} byte records", RECORD_SIZE)]
    Truncated { len: usize },
    #[error("record {index} rejected: {status}")]
    Rejected { index: usize, status: StatusByte },
}
