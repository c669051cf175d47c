//! Capability traits wrapping the RustCrypto primitives used by both the
//! legacy AES-CBC scheme and LUKS1: a block cipher, an XTS-mode cipher, and
//! an IV generator. Keeping these behind traits lets `luks.rs` stay generic
//! over `cipher ∈ {aes, serpent, sm4}` and `mode ∈ {cbc, xts}` without a
//! combinatorial match at every call site.

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use serpent::Serpent;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use sm4::Sm4;

use crate::error::{Error, Result};

/// A 512-byte-sector CBC cipher, generic over the underlying block cipher.
pub trait BlockCipher: Send + Sync {
    fn decrypt_cbc(&self, key: &[u8], iv: [u8; 16], data: &mut [u8]) -> Result<()>;
    fn encrypt_cbc(&self, key: &[u8], iv: [u8; 16], data: &mut [u8]) -> Result<()>;
}

macro_rules! cbc_impl {
    ($name:ident, $block:ty) => {
        pub struct $name;
        impl BlockCipher for $name {
            fn decrypt_cbc(&self, key: &[u8], iv: [u8; 16], data: &mut [u8]) -> Result<()> {
                let dec = cbc::Decryptor::<$block>::new_from_slices(key, &iv)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                dec.decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(data)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                Ok(())
            }
            fn encrypt_cbc(&self, key: &[u8], iv: [u8; 16], data: &mut [u8]) -> Result<()> {
                let enc = cbc::Encryptor::<$block>::new_from_slices(key, &iv)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                enc.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(data, data.len())
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                Ok(())
            }
        }
    };
}

cbc_impl!(AesCbc, aes::Aes128);
cbc_impl!(Aes256Cbc, Aes256);
cbc_impl!(SerpentCbc, Serpent);
cbc_impl!(Sm4Cbc, Sm4);

/// Selects the CBC implementation named by a LUKS1 `cipher-name` field.
pub fn cbc_for(cipher_name: &str, key_len_bits: usize) -> Result<Box<dyn BlockCipher>> {
    match cipher_name {
        "aes" if key_len_bits <= 128 => Ok(Box::new(AesCbc)),
        "aes" => Ok(Box::new(Aes256Cbc)),
        "serpent" => Ok(Box::new(SerpentCbc)),
        "sm4" => Ok(Box::new(Sm4Cbc)),
        other => Err(Error::unsupported("luks", format!("cipher {other}"))),
    }
}

/// XTS-mode decryption, used when the LUKS `cipher-mode` is `xts-plain64`.
pub trait XtsCipher: Send + Sync {
    fn decrypt_xts(&self, key: &[u8], sector: u64, data: &mut [u8]) -> Result<()>;
}

pub struct Aes128Xts;
pub struct Aes256Xts;

impl XtsCipher for Aes128Xts {
    fn decrypt_xts(&self, key: &[u8], sector: u64, data: &mut [u8]) -> Result<()> {
        xts_decrypt::<aes::Aes128>(key, sector, data)
    }
}
impl XtsCipher for Aes256Xts {
    fn decrypt_xts(&self, key: &[u8], sector: u64, data: &mut [u8]) -> Result<()> {
        xts_decrypt::<Aes256>(key, sector, data)
    }
}

fn xts_decrypt<C>(key: &[u8], sector: u64, data: &mut [u8]) -> Result<()>
where
    C: cbc::cipher::BlockSizeUser<BlockSize = cbc::cipher::consts::U16>
        + cbc::cipher::BlockCipher
        + BlockDecryptMut
        + BlockEncryptMut
        + KeyInit
        + Clone,
{
    let half = key.len() / 2;
    let cipher = xts_mode::Xts128::<C>::new(
        C::new_from_slice(&key[..half]).map_err(|e| Error::Crypto(e.to_string()))?,
        C::new_from_slice(&key[half..]).map_err(|e| Error::Crypto(e.to_string()))?,
    );
    cipher.decrypt_sector(data, sector as u128);
    Ok(())
}

/// Selects the XTS implementation for a key length in bits.
pub fn xts_for(key_len_bits: usize) -> Result<Box<dyn XtsCipher>> {
    match key_len_bits {
        256 => Ok(Box::new(Aes128Xts)), // XTS splits the key in half: 256-bit key -> two AES-128 keys
        512 => Ok(Box::new(Aes256Xts)),
        other => Err(Error::unsupported("luks", format!("xts key length {other}"))),
    }
}

/// Generates the per-sector IV for CBC-mode ciphers.
pub trait IvGenerator: Send + Sync {
    fn iv_for_sector(&self, sector: u64, essiv_key: Option<&[u8]>) -> [u8; 16];
}

pub struct PlainIv;
pub struct Plain64Iv;
pub struct EssivIv {
    pub hash: EssivHash,
}

#[derive(Clone, Copy)]
pub enum EssivHash {
    Sha1,
    Sha256,
}

impl IvGenerator for PlainIv {
    fn iv_for_sector(&self, sector: u64, _essiv_key: Option<&[u8]>) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&(sector as u32).to_le_bytes());
        iv
    }
}

impl IvGenerator for Plain64Iv {
    fn iv_for_sector(&self, sector: u64, _essiv_key: Option<&[u8]>) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&sector.to_le_bytes());
        iv
    }
}

impl IvGenerator for EssivIv {
    fn iv_for_sector(&self, sector: u64, essiv_key: Option<&[u8]>) -> [u8; 16] {
        let essiv_key = essiv_key.expect("essiv requires a derived salt key");
        let mut plain = [0u8; 16];
        plain[..8].copy_from_slice(&sector.to_le_bytes());
        match self.hash {
            EssivHash::Sha1 => {
                let digest = Sha1::digest(essiv_key);
                encrypt_essiv_block::<aes::Aes128>(&digest[..16], plain)
            }
            EssivHash::Sha256 => {
                let digest = Sha256::digest(essiv_key);
                encrypt_essiv_block::<Aes256>(&digest, plain)
            }
        }
    }
}

fn encrypt_essiv_block<C>(salt_key: &[u8], mut block: [u8; 16]) -> [u8; 16]
where
    C: cbc::cipher::BlockSizeUser<BlockSize = cbc::cipher::consts::U16> + BlockEncryptMut + KeyInit,
{
    use cbc::cipher::generic_array::GenericArray;
    let mut cipher = C::new_from_slice(salt_key).expect("essiv salt key length mismatch");
    let ga = GenericArray::from_mut_slice(&mut block);
    cipher.encrypt_block_mut(ga);
    block
}

/// Parses a LUKS `cipher-mode` string (e.g. `"cbc-essiv:sha256"`,
/// `"xts-plain64"`) into an IV generator.
pub fn iv_generator_for(mode: &str) -> Result<Box<dyn IvGenerator>> {
    if let Some(rest) = mode.strip_prefix("cbc-essiv:") {
        return match rest {
            "sha1" => Ok(Box::new(EssivIv { hash: EssivHash::Sha1 })),
            "sha256" => Ok(Box::new(EssivIv { hash: EssivHash::Sha256 })),
            other => Err(Error::unsupported("luks", format!("essiv hash {other}"))),
        };
    }
    match mode {
        "cbc-plain" => Ok(Box::new(PlainIv)),
        "cbc-plain64" | "xts-plain64" => Ok(Box::new(Plain64Iv)),
        other => Err(Error::unsupported("luks", format!("cipher mode {other}"))),
    }
}
