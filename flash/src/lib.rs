// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Flash subsystem of the badge firmware.
//!
//! - [`nor`]: external SPI NOR flash, vendor quirks and busy/suspend handling
//! - [`internal`]: CH32V003 internal flash controller, unlock sequences,
//!   fast page erase/program and read protection
//! - [`ota`]: boot time update session streaming encrypted pages into
//!   internal flash

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod internal;
pub mod nor;
pub mod ota;

#[cfg(test)]
mod testing;
