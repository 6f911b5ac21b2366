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

use std::path::{Path, PathBuf};

use bifrost_store::crypto::KEYSHARE_SALT;
use bifrost_store::Cipher;
use bifrost_types::PubKey;
use bifrost_utils::{Error, Result};

/// Environment variable holding the seed phrase backups are encrypted with.
pub const SEED_PHRASE_ENV: &str = "SIGNER_SEED_PHRASE";

/// The seed phrase of the node, from [`SEED_PHRASE_ENV`].
pub fn seed_phrase_from_env() -> Result<String> {
    match std::env::var(SEED_PHRASE_ENV) {
        Ok(phrase) if !phrase.is_empty() => Ok(phrase),
        _ => Err(Error::Generic("SIGNER_SEED_PHRASE is not set")),
    }
}

/// File name of the backup of `pub_key`.
pub fn backup_file_name(pub_key: &PubKey) -> String {
    format!("localstate-{pub_key}.json")
}

/// Encrypts a key share with the node's seed phrase.
pub fn encrypt_keyshare(keyshare: &[u8], seed_phrase: &str) -> Result<Vec<u8>> {
    if seed_phrase.is_empty() {
        return Err(Error::Encryption);
    }
    Cipher::new(seed_phrase, KEYSHARE_SALT).encrypt(keyshare)
}

/// Decrypts a key share encrypted by [`encrypt_keyshare`].
pub fn decrypt_keyshare(encrypted: &[u8], seed_phrase: &str) -> Result<Vec<u8>> {
    Cipher::new(seed_phrase, KEYSHARE_SALT).decrypt(encrypted)
}

/// Writes the encrypted key share of `pub_key` into `dir`, returning the
/// file written. An existing backup is never overwritten.
pub fn backup_keyshare(
    dir: &Path,
    pub_key: &PubKey,
    keyshare: &[u8],
    seed_phrase: &str,
) -> Result<PathBuf> {
    let encrypted = encrypt_keyshare(keyshare, seed_phrase)?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(backup_file_name(pub_key));
    if path.exists() {
        tracing::info!(path = %path.display(), "key share backup already exists");
        return Ok(path);
    }
    std::fs::write(&path, encrypted)?;
    tracing::info!(path = %path.display(), "key share backed up");
    Ok(path)
}

/// Reads back the key share of `pub_key` from `dir`.
pub fn recover_keyshare(
    dir: &Path,
    pub_key: &PubKey,
    seed_phrase: &str,
) -> Result<Vec<u8>> {
    let encrypted = std::fs::read(dir.join(backup_file_name(pub_key)))?;
    decrypt_keyshare(&encrypted, seed_phrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_round_trip_needs_the_seed_phrase() {
        let dir = tempfile::tempdir().unwrap();
        let pk = PubKey::new("thorpub1vault");
        let path = backup_keyshare(dir.path(), &pk, b"share", "seed").unwrap();
        assert!(path.ends_with("localstate-thorpub1vault.json"));
        assert_ne!(std::fs::read(&path).unwrap(), b"share".to_vec());

        assert_eq!(recover_keyshare(dir.path(), &pk, "seed").unwrap(), b"share");
        assert!(recover_keyshare(dir.path(), &pk, "other").is_err());

        // the first backup wins
        backup_keyshare(dir.path(), &pk, b"later", "seed").unwrap();
        assert_eq!(recover_keyshare(dir.path(), &pk, "seed").unwrap(), b"share");
    }

    #[test]
    fn empty_seed_phrase_is_rejected() {
        assert!(encrypt_keyshare(b"share", "").is_err());
    }
}
