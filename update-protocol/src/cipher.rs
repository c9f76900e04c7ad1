// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{UpdateChunk, BLOCK_SIZE};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;

/// Fixed update key embedded in the bootloader.
pub const KEY: [u8; BLOCK_SIZE] = [
    0x0, 0x1, 0x2, 0x3, //
    0x4, 0x5, 0x6, 0x7, //
    0x8, 0x9, 0xa, 0xb, //
    0xc, 0xd, 0xe, 0xf,
];

const ZERO_IV: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Device side CBC state for one update session.
///
/// The chaining value carries over from one record to the next, so records
/// only decrypt correctly in the order they were encrypted.
pub struct ChunkDecryptor {
    cbc: cbc::Decryptor<Aes128>,
}

impl ChunkDecryptor {
    /// Start of a session: fixed key, all-zero IV.
    pub fn new(key: &[u8; BLOCK_SIZE]) -> Self {
        Self::with_iv(key, &ZERO_IV)
    }

    pub fn with_iv(key: &[u8; BLOCK_SIZE], iv: &[u8; BLOCK_SIZE]) -> Self {
        Self {
            cbc: cbc::Decryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    /// Decrypt a received record in place.
    pub fn decrypt(&mut self, chunk: &mut UpdateChunk) {
        for block in chunk.as_bytes_mut().chunks_exact_mut(BLOCK_SIZE) {
            self.cbc.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

/// Host side counterpart of [`ChunkDecryptor`], one instance per image.
pub struct ChunkEncryptor {
    cbc: cbc::Encryptor<Aes128>,
}

impl ChunkEncryptor {
    pub fn new(key: &[u8; BLOCK_SIZE]) -> Self {
        Self::with_iv(key, &ZERO_IV)
    }

    pub fn with_iv(key: &[u8; BLOCK_SIZE], iv: &[u8; BLOCK_SIZE]) -> Self {
        Self {
            cbc: cbc::Encryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    /// Encrypt a sealed plaintext record in place.
    pub fn encrypt(&mut self, chunk: &mut UpdateChunk) {
        for block in chunk.as_bytes_mut().chunks_exact_mut(BLOCK_SIZE) {
            self.cbc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}
