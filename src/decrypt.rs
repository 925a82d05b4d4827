//! Chapter decryption: base64 -> (16-byte IV || AES-128-CBC ciphertext) -> PKCS#7 unpad -> UTF-8, trimmed.
//!
//! Files are rewritten in place; the ciphertext is not kept.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Path, PathBuf};
use thiserror::Error;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Key shared by every book ("242ccb8230d709e1").
pub const DEFAULT_CIPHER_KEY: [u8; 16] = *b"242ccb8230d709e1";

const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("ciphertext too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad padding or block length")]
    Padding,

    #[error("decrypted text is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid cipher key: expected 32 hex digits")]
    InvalidKey,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decrypt {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: Box<DecryptError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decryptor {
    key: [u8; 16],
}

impl Default for Decryptor {
    fn default() -> Self {
        Self::new(DEFAULT_CIPHER_KEY)
    }
}

impl Decryptor {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    /// Key given as 32 hex digits.
    pub fn from_hex(key_hex: &str) -> Result<Self, DecryptError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|_| DecryptError::InvalidKey)?;
        let key: [u8; 16] = bytes.try_into().map_err(|_| DecryptError::InvalidKey)?;
        Ok(Self::new(key))
    }

    /// Decrypt one encoded blob. Whitespace around or inside the base64 text is ignored.
    pub fn decrypt(&self, encoded: &str) -> Result<String, DecryptError> {
        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let raw = BASE64.decode(compact.as_bytes())?;
        if raw.len() <= IV_LEN {
            return Err(DecryptError::TooShort { len: raw.len() });
        }
        let (iv, ciphertext) = raw.split_at(IV_LEN);
        let mut buf = ciphertext.to_vec();
        let plain = Aes128CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| DecryptError::Padding)?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| DecryptError::Padding)?;
        let text = String::from_utf8(plain.to_vec())?;
        Ok(text.trim().to_string())
    }

    /// Replace the contents of `path` with its decrypted text.
    pub fn decrypt_in_place(&self, path: &Path) -> Result<(), DecryptError> {
        let encoded = std::fs::read_to_string(path).map_err(|e| DecryptError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let plain = self.decrypt(&encoded).map_err(|e| DecryptError::File {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        std::fs::write(path, plain).map_err(|e| DecryptError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Decrypt every file; the first failure aborts the whole batch.
    pub fn decrypt_all(
        &self,
        files: &[PathBuf],
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<(), DecryptError> {
        for (i, file) in files.iter().enumerate() {
            self.decrypt_in_place(file)?;
            if let Some(cb) = progress {
                cb(i + 1, files.len());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    /// Produce the on-the-wire form of `plain` under `key` and `iv`.
    pub(crate) fn encrypt(key: &[u8; 16], iv: &[u8; 16], plain: &str) -> String {
        let bytes = plain.as_bytes();
        let mut buf = vec![0u8; bytes.len() + 16];
        buf[..bytes.len()].copy_from_slice(bytes);
        let ct = Aes128CbcEnc::new(key.into(), iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, bytes.len())
            .unwrap();
        let mut raw = iv.to_vec();
        raw.extend_from_slice(ct);
        BASE64.encode(raw)
    }

    #[test]
    fn decrypts_and_trims() {
        let d = Decryptor::default();
        let blob = encrypt(&DEFAULT_CIPHER_KEY, &[7u8; 16], "\n  第一章 正文\n第二段  \n");
        assert_eq!(d.decrypt(&blob).unwrap(), "第一章 正文\n第二段");
    }

    #[test]
    fn same_ciphertext_decrypts_identically() {
        let d = Decryptor::default();
        let blob = encrypt(&DEFAULT_CIPHER_KEY, &[1u8; 16], "same text");
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::write(&a, &blob).unwrap();
        std::fs::write(&b, &blob).unwrap();
        d.decrypt_in_place(&a).unwrap();
        d.decrypt_in_place(&b).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn tolerates_trailing_newline_in_encoded_file() {
        let d = Decryptor::default();
        let blob = format!("{}\n", encrypt(&DEFAULT_CIPHER_KEY, &[2u8; 16], "x"));
        assert_eq!(d.decrypt(&blob).unwrap(), "x");
    }

    #[test]
    fn invalid_base64_fails() {
        assert!(matches!(
            Decryptor::default().decrypt("@@@not base64@@@"),
            Err(DecryptError::Base64(_))
        ));
    }

    #[test]
    fn too_short_fails() {
        let blob = BASE64.encode([0u8; 16]);
        assert!(matches!(
            Decryptor::default().decrypt(&blob),
            Err(DecryptError::TooShort { len: 16 })
        ));
    }

    #[test]
    fn partial_block_fails_padding() {
        let blob = BASE64.encode([0u8; 16 + 5]);
        assert!(matches!(
            Decryptor::default().decrypt(&blob),
            Err(DecryptError::Padding)
        ));
    }

    #[test]
    fn non_utf8_plaintext_fails() {
        let key = DEFAULT_CIPHER_KEY;
        let iv = [4u8; 16];
        let bytes = [0xffu8, 0xfe, 0xfd];
        let mut buf = vec![0u8; 32];
        buf[..3].copy_from_slice(&bytes);
        let ct = Aes128CbcEnc::new((&key).into(), (&iv).into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, 3)
            .unwrap();
        let mut raw = iv.to_vec();
        raw.extend_from_slice(ct);
        assert!(matches!(
            Decryptor::default().decrypt(&BASE64.encode(raw)),
            Err(DecryptError::Utf8(_))
        ));
    }

    #[test]
    fn decrypt_all_aborts_on_first_bad_file() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("1.txt");
        let bad = tmp.path().join("2.txt");
        std::fs::write(&good, encrypt(&DEFAULT_CIPHER_KEY, &[5u8; 16], "ok")).unwrap();
        std::fs::write(&bad, "garbage!").unwrap();
        let err = Decryptor::default()
            .decrypt_all(&[good.clone(), bad.clone()], None)
            .unwrap_err();
        assert!(err.to_string().contains("2.txt"));
        assert_eq!(std::fs::read_to_string(&good).unwrap(), "ok");
    }

    #[test]
    fn from_hex_parses_default_key() {
        let d = Decryptor::from_hex("32343263636238323330643730396531").unwrap();
        assert_eq!(d, Decryptor::default());
        assert!(Decryptor::from_hex("abcd").is_err());
    }
}
