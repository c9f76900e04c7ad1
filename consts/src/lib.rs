#![no_std]

/// Base address of the CH32V003 code flash in the system memory map.
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Size of the CH32V003 code flash (16 KiB).
pub const FLASH_SIZE: u32 = 0x4000;

/// Size of a fast-erase / buffered-program page of the internal flash.
/// This is the unit of every internal flash erase and program operation.
pub const FLASH_PAGE: u32 = 64;

/// Number of 32-bit words loaded into the flash controller buffer per page.
pub const FLASH_PAGE_WORDS: usize = (FLASH_PAGE / 4) as usize;

/// Lowest offset (relative to `FLASH_BASE`) an update may write to.
/// Everything below holds the vector table, the bootloader and the update
/// session code and must never be erased by an update.
pub const OTA_START_ADDR: u16 = 0x1000;

/// One past the highest offset an update may write to (end of flash).
pub const OTA_END_ADDR: u16 = 0x4000;

/// Base address of the application started after the update window closes.
pub const BASE_APP_ADDR: u32 = FLASH_BASE + OTA_START_ADDR as u32;

/// Length of the post-reset update window in SysTick ticks.
/// At the 48 MHz HCLK with SysTick on HCLK/8 this is roughly 1.7 seconds.
pub const UPDATE_WINDOW_TICKS: u32 = 10_000_000;

/// Baud rate of the update UART.
pub const UART_BAUDRATE: u32 = 115_200;

/// Core clock after bring-up.
pub const HCLK_HZ: u32 = 48_000_000;

/// Offset in external NOR flash where the extended command set is provisioned.
pub const EXT_CMDS_ADDR: u32 = 0x70000;

/// Default opcodes of the extended command set (read, write, erase).
pub const DEFAULT_EXT_CMDS: [u8; 3] = [0x03, 0x02, 0x52];
