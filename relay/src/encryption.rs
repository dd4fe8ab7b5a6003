//
// Copyright 2024 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Transport encryption of outgoing packets. The negotiated mode decides how
//! the 24-byte nonce is built and how much of it travels with the packet.

use rand::{thread_rng, Rng};
use strum_macros::Display;
use thiserror::Error;
use xsalsa20poly1305::{
    aead::{Aead, KeyInit},
    XSalsa20Poly1305,
};
use zeroize::Zeroizing;

use crate::rtp;

pub const SECRET_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
const LITE_NONCE_SUFFIX_LEN: usize = 4;

pub type SecretKey = Zeroizing<[u8; SECRET_KEY_LEN]>;
pub type Nonce = [u8; NONCE_LEN];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
pub enum EncryptionMode {
    /// Incrementing 32-bit nonce, sent as a 4-byte suffix.
    #[strum(serialize = "xsalsa20_poly1305_lite")]
    Lite,
    /// Random nonce, sent as a 24-byte suffix.
    #[strum(serialize = "xsalsa20_poly1305_suffix")]
    Suffix,
    /// The RTP header is the nonce; nothing is appended.
    #[default]
    #[strum(serialize = "xsalsa20_poly1305")]
    Normal,
}

impl From<&str> for EncryptionMode {
    fn from(mode: &str) -> Self {
        match mode {
            "xsalsa20_poly1305_lite" | "lite" => EncryptionMode::Lite,
            "xsalsa20_poly1305_suffix" | "suffix" => EncryptionMode::Suffix,
            _ => EncryptionMode::Normal,
        }
    }
}

#[derive(Error, Debug, Eq, PartialEq)]
#[error("failed to seal packet")]
pub struct SealError;

/// Authenticated encryption of a single packet payload.
pub trait Sealer: Send {
    fn seal(&self, plaintext: &[u8], nonce: &Nonce, key: &SecretKey) -> Result<Vec<u8>, SealError>;
}

/// NaCl secretbox: the 16-byte tag is followed by the ciphertext.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecretboxSealer;

impl Sealer for SecretboxSealer {
    fn seal(&self, plaintext: &[u8], nonce: &Nonce, key: &SecretKey) -> Result<Vec<u8>, SealError> {
        XSalsa20Poly1305::new(xsalsa20poly1305::Key::from_slice(&key[..]))
            .encrypt(xsalsa20poly1305::Nonce::from_slice(&nonce[..]), plaintext)
            .map_err(|_| SealError)
    }
}

/// Owns the nonce state of one stream.
pub struct TransportEncryptor<S = SecretboxSealer> {
    sealer: S,
    lite_nonce: u32,
    lite_nonce_buffer: Nonce,
}

impl Default for TransportEncryptor<SecretboxSealer> {
    fn default() -> Self {
        Self::new(SecretboxSealer)
    }
}

impl<S: Sealer> TransportEncryptor<S> {
    pub fn new(sealer: S) -> Self {
        Self {
            sealer,
            lite_nonce: 0,
            lite_nonce_buffer: [0u8; NONCE_LEN],
        }
    }

    pub fn lite_nonce(&self) -> u32 {
        self.lite_nonce
    }

    pub fn sealer(&self) -> &S {
        &self.sealer
    }

    /// Returns the ciphertext followed by whatever part of the nonce the
    /// receiver can't reconstruct on its own.
    pub fn encrypt(
        &mut self,
        rtp_header: &rtp::Serialized,
        plaintext: &[u8],
        key: &SecretKey,
        mode: EncryptionMode,
    ) -> Result<Vec<u8>, SealError> {
        match mode {
            EncryptionMode::Lite => {
                self.lite_nonce = self.lite_nonce.wrapping_add(1);
                self.lite_nonce_buffer[..LITE_NONCE_SUFFIX_LEN]
                    .copy_from_slice(&self.lite_nonce.to_be_bytes());
                let mut encrypted = self.sealer.seal(plaintext, &self.lite_nonce_buffer, key)?;
                encrypted.extend_from_slice(&self.lite_nonce_buffer[..LITE_NONCE_SUFFIX_LEN]);
                Ok(encrypted)
            }
            EncryptionMode::Suffix => {
                let mut nonce = [0u8; NONCE_LEN];
                thread_rng().fill(&mut nonce);
                let mut encrypted = self.sealer.seal(plaintext, &nonce, key)?;
                encrypted.extend_from_slice(&nonce);
                Ok(encrypted)
            }
            EncryptionMode::Normal => {
                let mut nonce = [0u8; NONCE_LEN];
                nonce[..rtp::RTP_MIN_HEADER_LEN].copy_from_slice(rtp_header);
                self.sealer.seal(plaintext, &nonce, key)
            }
        }
    }
}

/// Creates a test key by repeating the byte
#[cfg(test)]
pub fn key_from(seed: u8) -> SecretKey {
    [seed; SECRET_KEY_LEN].into()
}

/// Records every nonce and prefixes the plaintext with a marker instead of encrypting.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSealer {
    pub nonces: std::sync::Arc<parking_lot::Mutex<Vec<Nonce>>>,
}

#[cfg(test)]
impl Sealer for RecordingSealer {
    fn seal(&self, plaintext: &[u8], nonce: &Nonce, _key: &SecretKey) -> Result<Vec<u8>, SealError> {
        self.nonces.lock().push(*nonce);
        let mut sealed = b"sealed:".to_vec();
        sealed.extend_from_slice(plaintext);
        Ok(sealed)
    }
}
