// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generates `memory.x` for the boot image. The bootloader owns the first
//! `OTA_START_ADDR` bytes of code flash, the application starts right after.

use consts::OTA_START_ADDR;
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    let memory_x_content = format!(
        r##"
        MEMORY
        {{
            /* Code flash is aliased at 0 while booting from it */
            FLASH : ORIGIN = 0x00000000, LENGTH = {:#X}
            RAM : ORIGIN = 0x20000000, LENGTH = 2K
        }}

        REGION_ALIAS("REGION_TEXT", FLASH);
        REGION_ALIAS("REGION_RODATA", FLASH);
        REGION_ALIAS("REGION_DATA", RAM);
        REGION_ALIAS("REGION_BSS", RAM);
        REGION_ALIAS("REGION_HEAP", RAM);
        REGION_ALIAS("REGION_STACK", RAM);
        "##,
        OTA_START_ADDR
    );

    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    File::create(out.join("memory.x"))
        .unwrap()
        .write_all(memory_x_content.as_bytes())
        .unwrap();
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
