//! Symmetric encryption for chat text.
//!
//! A 32-byte key is derived once from a shared passphrase with
//! PBKDF2-HMAC-SHA256 over a fixed salt, then used with ChaCha20-Poly1305.
//! Ciphertext travels as URL-safe base64 of `nonce || ciphertext` so it can
//! ride inside a JSON string field. File chunks are never passed through
//! this cipher; only chat text is encrypted.

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use sha2::Sha256;

use crate::config::{KDF_ITERATIONS, KDF_SALT};

pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Cipher for chat messages, keyed by a shared passphrase.
pub struct MessageCipher {
    cipher: ChaCha20Poly1305,
}

impl MessageCipher {
    pub fn new(passphrase: &str) -> Self {
        let key = derive_key(passphrase);
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Encrypt a plaintext message into a base64 string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("Encryption failed"))?;

        let mut raw = nonce.to_vec();
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(raw))
    }

    /// Decrypt a base64 ciphertext produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails when the input is not valid base64, is too short to carry a
    /// nonce, was produced with a different key, or was tampered with.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let raw = URL_SAFE
            .decode(encoded)
            .map_err(|e| anyhow!("Ciphertext is not valid base64: {}", e))?;
        if raw.len() < NONCE_SIZE {
            bail!("Ciphertext too short");
        }

        let nonce = Nonce::from_slice(&raw[..NONCE_SIZE]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &raw[NONCE_SIZE..])
            .map_err(|_| anyhow!("Decryption failed"))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Decrypted text is not UTF-8: {}", e))
    }
}

/// Derive the symmetric key from a passphrase.
pub fn derive_key(passphrase: &str) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
    key
}
