// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bifrost_utils::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the random nonce prefixed to every ciphertext.
pub const NONCE_LEN: usize = 24;

/// Salt separating the signer store key from other uses of the same
/// passphrase.
pub const SIGNER_STORE_SALT: &str = "1";
/// Salt used for keyshare backups.
pub const KEYSHARE_SALT: &str = "3";

/// XChaCha20-Poly1305 keyed from a passphrase.
///
/// The key is `sha256("<passphrase>+<salt>")`. Ciphertexts are laid out as
/// `nonce || ciphertext || tag`.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Derives the key for `passphrase` and `salt`.
    pub fn new(passphrase: &str, salt: &str) -> Self {
        let digest = Sha256::digest(format!("{passphrase}+{salt}").as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| Error::Encryption)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encryption)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a value produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::Decryption);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| Error::Decryption)?;
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypts() {
        let cipher = Cipher::new("my secret", SIGNER_STORE_SALT);
        let data = br#"{"height":1}"#;
        let a = cipher.encrypt(data).unwrap();
        let b = cipher.encrypt(data).unwrap();
        assert_ne!(a, b, "nonce must be random");
        assert_eq!(cipher.decrypt(&a).unwrap(), data);
        assert_eq!(cipher.decrypt(&b).unwrap(), data);
    }

    #[test]
    fn wrong_passphrase_or_salt_fails() {
        let data = b"keyshare";
        let enc = Cipher::new("pass", KEYSHARE_SALT).encrypt(data).unwrap();
        assert!(Cipher::new("other", KEYSHARE_SALT).decrypt(&enc).is_err());
        assert!(Cipher::new("pass", SIGNER_STORE_SALT).decrypt(&enc).is_err());
        assert!(Cipher::new("pass", KEYSHARE_SALT).decrypt(&enc[..10]).is_err());
    }
}
