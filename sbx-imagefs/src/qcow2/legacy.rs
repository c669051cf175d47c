//! Legacy whole-disk QCOW2 AES-CBC encryption (`crypt_method == 1`).
//!
//! This is QEMU's original, intentionally weak scheme, preserved here for
//! historical images: the key is the raw password bytes, zero-padded to 16
//! bytes (no KDF stretching, no hashing), CBC mode, IV = little-endian
//! sector number. It predates LUKS1 support and is not a scheme this core
//! would recommend, or strengthen — only decode.

use crate::error::{Error, Result};
use crate::qcow2::cipher::AesCbc;
use crate::qcow2::cipher::BlockCipher;

/// Derives the legacy 128-bit key: the first 16 bytes of the password,
/// zero-padded if shorter.
pub fn derive_key(password: &str) -> [u8; 16] {
    let mut key = [0u8; 16];
    let bytes = password.as_bytes();
    let n = bytes.len().min(16);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

/// Decrypts one 512-byte sector in place. `sector` is the absolute sector
/// number within the virtual disk.
pub fn decrypt_sector(key: &[u8; 16], sector: u64, data: &mut [u8]) -> Result<()> {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&sector.to_le_bytes());
    AesCbc.decrypt_cbc(key, iv, data).map_err(|_| Error::Crypto("legacy qcow2 decrypt failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_password_bytes_zero_padded() {
        let key = derive_key("hunter2");
        assert_eq!(&key[..7], b"hunter2");
        assert!(key[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn derive_key_truncates_long_passwords() {
        let key = derive_key("0123456789abcdefghij");
        assert_eq!(&key, b"0123456789abcdef");
    }

    #[test]
    fn legacy_aes_cbc_round_trip() {
        let key = [0u8; 16];
        let plaintext: Vec<u8> = (0u8..=255).cycle().take(512).collect();
        let mut ciphertext = plaintext.clone();
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&0u64.to_le_bytes());
        AesCbc.encrypt_cbc(&key, iv, &mut ciphertext).unwrap();
        decrypt_sector(&key, 0, &mut ciphertext).unwrap();
        assert_eq!(ciphertext, plaintext);
    }
}
