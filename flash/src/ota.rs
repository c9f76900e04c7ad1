// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Boot time update session.
//!
//! After reset the bootloader listens on the UART for a fixed window. Silence
//! means a normal boot. Otherwise the host streams encrypted
//! [`UpdateChunk`] records; valid ones are written page by page, each one
//! answered with a [`Status`] byte. The session ends once the link has been
//! quiet for a whole window, there is no explicit end command.

use crate::internal::{FlashRegisters, InternalFlash};
use consts::{FLASH_BASE, FLASH_PAGE, UPDATE_WINDOW_TICKS};
use embedded_io::{Read, ReadExactError, ReadReady, Write};
use update_protocol::{ChunkDecryptor, Status, TargetBounds, UpdateChunk, KEY};


/// Free running, wrapping tick counter (SysTick `CNT` on the device).
pub trait Ticks {
    fn now(&mut self) -> u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    WaitingForActivity,
    Receiving,
    Exited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Nothing arrived during the boot window
    NormalBoot,
    /// An update session ran until the link went quiet
    Updated { accepted: u32, rejected: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    Transport(E),
    /// Transport hit end of stream in the middle of a record
    UnexpectedEof,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::Transport(e)
    }
}

impl<E> From<ReadExactError<E>> for Error<E> {
    fn from(e: ReadExactError<E>) -> Self {
        match e {
            ReadExactError::UnexpectedEof => Error::UnexpectedEof,
            ReadExactError::Other(e) => Error::Transport(e),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Silence, in ticks, that ends the window.
    pub window_ticks: u32,
    /// Offsets relative to the internal flash base a record may target.
    pub bounds: TargetBounds,
    pub key: [u8; 16],
    /// Turn on read protection when a session starts.
    pub read_protect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_ticks: UPDATE_WINDOW_TICKS,
            bounds: TargetBounds::default(),
            key: KEY,
            read_protect: true,
        }
    }
}

/// Cipher state and counters, only alive while records are coming in.
struct UpdateSession {
    cipher: ChunkDecryptor,
    accepted: u32,
    rejected: u32,
}

pub struct Ota<T, C> {
    transport: T,
    ticks: C,
    config: SessionConfig,
    state: State,
}

impl<T, C> Ota<T, C>
where
    T: Read + Write + ReadReady,
    C: Ticks,
{
    pub fn new(transport: T, ticks: C, config: SessionConfig) -> Self {
        Self {
            transport,
            ticks,
            config,
            state: State::WaitingForActivity,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn release(self) -> (T, C) {
        (self.transport, self.ticks)
    }

    /// Wait up to one window for the first byte, then take records until
    /// the link goes quiet.
    pub fn run<R: FlashRegisters>(
        &mut self,
        flash: &mut InternalFlash<R>,
    ) -> Result<Outcome, Error<T::Error>> {
        if self.state == State::Exited {
            return Ok(Outcome::NormalBoot);
        }

        if !self.wait_for_activity()? {
            self.state = State::Exited;
            debug!("no update requested");
            return Ok(Outcome::NormalBoot);
        }

        if self.config.read_protect {
            flash.read_protect();
        }
        let mut session = UpdateSession {
            cipher: ChunkDecryptor::new(&self.config.key),
            accepted: 0,
            rejected: 0,
        };
        self.state = State::Receiving;
        info!("update session started");

        let result = self.receive_all(&mut session, flash);
        self.state = State::Exited;
        result?;

        info!(
            "update session done, {} accepted, {} rejected",
            session.accepted,
            session.rejected
        );
        Ok(Outcome::Updated {
            accepted: session.accepted,
            rejected: session.rejected,
        })
    }

    fn receive_all<R: FlashRegisters>(
        &mut self,
        session: &mut UpdateSession,
        flash: &mut InternalFlash<R>,
    ) -> Result<(), Error<T::Error>> {
        loop {
            if self.transport.read_ready()? {
                match self.receive_chunk(session, flash)? {
                    Status::Written => session.accepted += 1,
                    _ => session.rejected += 1,
                }
            }
            if !self.wait_for_activity()? {
                return Ok(());
            }
        }
    }

    /// Take one record off the wire, write it if it validates and answer
    /// with its status byte. Nothing is written for a rejected record.
    fn receive_chunk<R: FlashRegisters>(
        &mut self,
        session: &mut UpdateSession,
        flash: &mut InternalFlash<R>,
    ) -> Result<Status, Error<T::Error>> {
        let mut chunk = UpdateChunk::default();
        self.transport.read_exact(chunk.as_bytes_mut())?;
        session.cipher.decrypt(&mut chunk);

        let status = match chunk.validate(&self.config.bounds) {
            Ok(()) => {
                let page = FLASH_BASE + (chunk.target_addr() as u32 & !(FLASH_PAGE - 1));
                flash.page_erase(page);
                flash.buffered_write(page, &chunk.payload_words());
                Status::Written
            }
            Err(rejection) => {
                warn!("record rejected: {:?}", rejection);
                Status::from(rejection)
            }
        };
        trace!("record for {:#x}: {:?}", chunk.target_addr(), status);

        self.transport.write_all(&[status.as_byte()])?;
        self.transport.flush()?;
        Ok(status)
    }

    /// `true` as soon as a byte is waiting, `false` once a full window
    /// passed without one.
    fn wait_for_activity(&mut self) -> Result<bool, Error<T::Error>> {
        let start = self.ticks.now();
        while self.ticks.now().wrapping_sub(start) < self.config.window_ticks {
            if self.transport.read_ready()? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
