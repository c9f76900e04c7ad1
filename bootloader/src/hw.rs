// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Just enough of the CH32V003 to run an update session: the 48 MHz PLL
//! clock, USART1 on PD5 (TX) / PD6 (RX) and the SysTick counter.

use consts::{HCLK_HZ, UART_BAUDRATE};
use core::convert::Infallible;
use embedded_io::{ErrorType, Read, ReadReady, Write};
use flash::ota::Ticks;
use volatile_register::RW;

const RCC_BASE: usize = 0x4002_1000;
const GPIOD_BASE: usize = 0x4001_1400;
const USART1_BASE: usize = 0x4001_3800;
const SYSTICK_BASE: usize = 0xE000_F000;

mod rcc {
    pub const HSION: u32 = 1 << 0;
    pub const HSITRIM_RESET: u32 = 0x10 << 3;
    pub const PLLON: u32 = 1 << 24;
    pub const PLLRDY: u32 = 1 << 25;

    pub const SW: u32 = 0b11;
    pub const SW_PLL: u32 = 0b10;
    pub const SWS: u32 = 0b11 << 2;
    pub const SWS_PLL: u32 = 0b10 << 2;

    /// Clears every ready interrupt flag.
    pub const INTR_CLEAR: u32 = 0x009F_0000;

    pub const IOPDEN: u32 = 1 << 5;
    pub const USART1EN: u32 = 1 << 14;
}

mod usart {
    pub const RXNE: u32 = 1 << 5;
    pub const TC: u32 = 1 << 6;
    pub const TXE: u32 = 1 << 7;

    pub const RE: u32 = 1 << 2;
    pub const TE: u32 = 1 << 3;
    pub const UE: u32 = 1 << 13;
}

/// SysTick enable, clocked from HCLK/8.
const STK_STE: u32 = 1 << 0;

#[repr(C)]
struct Rcc {
    ctlr: RW<u32>,
    cfgr0: RW<u32>,
    intr: RW<u32>,
    _apb2prstr: RW<u32>,
    _apb1prstr: RW<u32>,
    _ahbpcenr: RW<u32>,
    apb2pcenr: RW<u32>,
}

#[repr(C)]
struct Gpio {
    cfglr: RW<u32>,
}

#[repr(C)]
struct Usart {
    statr: RW<u32>,
    datar: RW<u32>,
    brr: RW<u32>,
    ctlr1: RW<u32>,
    ctlr2: RW<u32>,
    ctlr3: RW<u32>,
}

#[repr(C)]
struct SysTickRegs {
    ctlr: RW<u32>,
    sr: RW<u32>,
    cnt: RW<u32>,
}

pub struct Board {
    pub uart: Uart,
    pub systick: SysTick,
}

impl Board {
    /// Switch to the PLL and bring up the UART and SysTick.
    ///
    /// Flash wait states have to be raised before calling this.
    ///
    /// # Safety
    ///
    /// Call once, straight out of reset. Takes ownership of RCC, GPIOD,
    /// USART1 and SysTick.
    pub unsafe fn init() -> Self {
        let rcc = &*(RCC_BASE as *const Rcc);
        let gpiod = &*(GPIOD_BASE as *const Gpio);
        let usart = &*(USART1_BASE as *const Usart);
        let systick = &*(SYSTICK_BASE as *const SysTickRegs);

        // HCLK = SYSCLK = PLL = 2 * HSI
        rcc.cfgr0.write(0);
        rcc.ctlr.write(rcc::HSION | rcc::HSITRIM_RESET | rcc::PLLON);
        rcc.intr.write(rcc::INTR_CLEAR);
        while rcc.ctlr.read() & rcc::PLLRDY == 0 {}
        rcc.cfgr0.modify(|v| (v & !rcc::SW) | rcc::SW_PLL);
        while rcc.cfgr0.read() & rcc::SWS != rcc::SWS_PLL {}

        rcc.apb2pcenr.modify(|v| v | rcc::IOPDEN | rcc::USART1EN);

        // PD5 alternate function push-pull 10 MHz, PD6 floating input
        gpiod
            .cfglr
            .modify(|v| (v & !(0xFF << 20)) | (0x9 << 20) | (0x4 << 24));

        usart.ctlr1.write(usart::TE | usart::RE);
        usart.ctlr2.write(0);
        usart.ctlr3.write(0);
        usart.brr.write((HCLK_HZ + UART_BAUDRATE / 2) / UART_BAUDRATE);
        usart.ctlr1.modify(|v| v | usart::UE);

        systick.sr.write(0);
        systick.cnt.write(0);
        systick.ctlr.write(STK_STE);

        Self {
            uart: Uart { regs: usart },
            systick: SysTick { regs: systick },
        }
    }
}

/// Polled USART1, 8N1.
pub struct Uart {
    regs: &'static Usart,
}

impl Uart {
    fn rx_ready(&self) -> bool {
        self.regs.statr.read() & usart::RXNE != 0
    }

    fn read_byte(&self) -> u8 {
        (self.regs.datar.read() & 0xFF) as u8
    }
}

impl ErrorType for Uart {
    type Error = Infallible;
}

impl Read for Uart {
    /// Blocks for the first byte, then takes whatever else is already
    /// waiting.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some((first, rest)) = buf.split_first_mut() else {
            return Ok(0);
        };

        while !self.rx_ready() {}
        *first = self.read_byte();

        let mut n = 1;
        for byte in rest {
            if !self.rx_ready() {
                break;
            }
            *byte = self.read_byte();
            n += 1;
        }
        Ok(n)
    }
}

impl ReadReady for Uart {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.rx_ready())
    }
}

impl Write for Uart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &byte in buf {
            while self.regs.statr.read() & usart::TXE == 0 {}
            // SAFETY: DATAR takes any 8-bit value.
            unsafe { self.regs.datar.write(byte as u32) };
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        while self.regs.statr.read() & usart::TC == 0 {}
        Ok(())
    }
}

/// The 32-bit up-counting SysTick, one tick per 8 HCLK cycles.
pub struct SysTick {
    regs: &'static SysTickRegs,
}

impl Ticks for SysTick {
    fn now(&mut self) -> u32 {
        self.regs.cnt.read()
    }
}
