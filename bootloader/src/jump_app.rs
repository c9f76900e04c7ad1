// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use defmt::info;

/// An application image in code flash, entered through its first
/// instruction.
pub struct AppImage {
    entry: u32,
}

impl AppImage {
    pub const fn at(entry: u32) -> Self {
        Self { entry }
    }

    /// An erased first word means nothing was ever flashed there.
    pub fn is_present(&self) -> bool {
        // SAFETY: `entry` lies in code flash, which is always readable.
        let word = unsafe { core::ptr::read_volatile(self.entry as *const u32) };
        word != 0xFFFF_FFFF
    }

    /// Jumps to the application.
    ///
    /// # Safety
    ///
    /// A valid image must start at `entry`. The application sets up its own
    /// stack, trap vector and clocks are left as the bootloader configured
    /// them.
    pub unsafe fn boot(self) -> ! {
        info!("booting application at {=u32:x}", self.entry);

        core::arch::asm!(
            "jr {entry}",
            entry = in(reg) self.entry,
            options(noreturn),
        );
    }
}
