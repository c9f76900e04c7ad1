// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod hw;
mod jump_app;

#[cfg(feature = "debug")]
use defmt_rtt as _;
use panic_halt as _;

use consts::BASE_APP_ADDR;
use defmt::{info, warn};
use flash::internal::{InternalFlash, InternalFlashRegion, Mmio};
use flash::ota::{Ota, Outcome, SessionConfig};
use hw::Board;
use jump_app::AppImage;

#[cfg(not(feature = "debug"))]
mod dummy_logging {
    #[defmt::global_logger]
    struct Logger;

    unsafe impl defmt::Logger for Logger {
        fn acquire() {}

        unsafe fn flush() {}

        unsafe fn release() {}

        unsafe fn write(_bytes: &[u8]) {}
    }
}

#[qingke_rt::entry]
fn main() -> ! {
    // SAFETY: we are the only code running, straight out of reset.
    let mut regs = unsafe { Mmio::steal() };
    regs.set_wait_states(1);
    let Board { mut uart, mut systick } = unsafe { Board::init() };

    info!("bootloader started");

    let mut flash = InternalFlash::new(regs, InternalFlashRegion::UPDATABLE);
    let config = SessionConfig {
        read_protect: cfg!(feature = "read-protect"),
        ..SessionConfig::default()
    };
    let app = AppImage::at(BASE_APP_ADDR);

    loop {
        let mut ota = Ota::new(uart, systick, config.clone());
        match ota.run(&mut flash) {
            Ok(Outcome::NormalBoot) => info!("no update requested"),
            Ok(Outcome::Updated { accepted, rejected }) => {
                info!("update finished: {} records written, {} rejected", accepted, rejected)
            }
            Err(_) => warn!("update session aborted"),
        }
        (uart, systick) = ota.release();

        if app.is_present() {
            // SAFETY: the first word is programmed, the update session only
            // ever writes whole images starting at `BASE_APP_ADDR`.
            unsafe { app.boot() }
        }
        warn!("no application at {=u32:x}, listening again", BASE_APP_ADDR);
    }
}
