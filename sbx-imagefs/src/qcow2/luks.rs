//! LUKS1 header parsing and keyslot unlocking.
//!
//! Implements just enough of LUKS1 to recover the master key from a
//! password: keyslot PBKDF2 stretching, anti-forensic (AF) merge, and
//! master-key digest verification. No support for LUKS2 (detached metadata,
//! argon2) — QCOW2's `crypt_method == CRYPT_LUKS` is always LUKS1.

use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::qcow2::cipher::{cbc_for, iv_generator_for, xts_for};

/// The two digests LUKS1 permits for `hash_spec`.
#[derive(Clone, Copy)]
enum Hash {
    Sha1,
    Sha256,
}

impl Hash {
    fn parse(spec: &str) -> Result<Self> {
        match spec {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(Error::unsupported("luks", format!("hash_spec {other}"))),
        }
    }

    fn digest_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Computes `HASH(BE-u32(counter) ++ block)`, truncated to `digest_size`
    /// bytes (a no-op truncation for the digest's own native size).
    fn hash_block(self, counter: u32, block: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => {
                use sha1::Digest as _;
                let mut hasher = Sha1::new();
                hasher.update(counter.to_be_bytes());
                hasher.update(block);
                hasher.finalize().to_vec()
            }
            Self::Sha256 => {
                use sha2::Digest as _;
                let mut hasher = Sha256::new();
                hasher.update(counter.to_be_bytes());
                hasher.update(block);
                hasher.finalize().to_vec()
            }
        }
    }

    fn pbkdf2(self, password: &[u8], salt: &[u8], iterations: u32, out_len: usize) -> Vec<u8> {
        let mut out = vec![0u8; out_len];
        match self {
            Self::Sha1 => pbkdf2::<Hmac<Sha1>>(password, salt, iterations, &mut out)
                .expect("pbkdf2 params valid"),
            Self::Sha256 => pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
                .expect("pbkdf2 params valid"),
        }
        out
    }
}

const LUKS_MAGIC: [u8; 6] = [0x4c, 0x55, 0x4b, 0x53, 0xba, 0xbe];
const NUM_KEYSLOTS: usize = 8;
const KEYSLOT_ACTIVE: u32 = 0x00AC_71F3;
const SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct Luks1Header {
    pub cipher_name: String,
    pub cipher_mode: String,
    pub hash_spec: String,
    pub payload_offset_sectors: u64,
    pub key_bytes: usize,
    pub mk_digest: [u8; 20],
    pub mk_digest_salt: [u8; 32],
    pub mk_digest_iterations: u32,
    pub keyslots: Vec<Keyslot>,
}

#[derive(Debug, Clone)]
pub struct Keyslot {
    pub active: bool,
    pub iterations: u32,
    pub salt: [u8; 32],
    pub key_material_offset_sectors: u64,
    pub stripes: u32,
}

/// Parses a raw LUKS1 header (always big-endian on disk).
pub fn parse_header(buf: &[u8]) -> Result<Luks1Header> {
    if buf.len() < 592 || buf[0..6] != LUKS_MAGIC {
        return Err(Error::format("luks", "bad magic"));
    }
    let cipher_name = cstr(&buf[8..40]);
    let cipher_mode = cstr(&buf[40..72]);
    let hash_spec = cstr(&buf[72..104]);
    let payload_offset_sectors = u32::from_be_bytes(buf[104..108].try_into().unwrap()) as u64;
    let key_bytes = u32::from_be_bytes(buf[108..112].try_into().unwrap()) as usize;
    let mut mk_digest = [0u8; 20];
    mk_digest.copy_from_slice(&buf[112..132]);
    let mut mk_digest_salt = [0u8; 32];
    mk_digest_salt.copy_from_slice(&buf[132..164]);
    let mk_digest_iterations = u32::from_be_bytes(buf[164..168].try_into().unwrap());

    let mut keyslots = Vec::with_capacity(NUM_KEYSLOTS);
    let mut off = 208; // keyslot area begins after the UUID field
    for _ in 0..NUM_KEYSLOTS {
        let active = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap()) == KEYSLOT_ACTIVE;
        let iterations = u32::from_be_bytes(buf[off + 4..off + 8].try_into().unwrap());
        let mut salt = [0u8; 32];
        salt.copy_from_slice(&buf[off + 8..off + 40]);
        let key_material_offset_sectors =
            u32::from_be_bytes(buf[off + 40..off + 44].try_into().unwrap()) as u64;
        let stripes = u32::from_be_bytes(buf[off + 44..off + 48].try_into().unwrap());
        keyslots.push(Keyslot {
            active,
            iterations,
            salt,
            key_material_offset_sectors,
            stripes,
        });
        off += 48;
    }

    Ok(Luks1Header {
        cipher_name,
        cipher_mode,
        hash_spec,
        payload_offset_sectors,
        key_bytes,
        mk_digest,
        mk_digest_salt,
        mk_digest_iterations,
        keyslots,
    })
}

fn cstr(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Attempts to unlock the master key from the first active keyslot whose
/// PBKDF2-derived key successfully decrypts and AF-merges into a master key
/// matching `mk_digest`.
pub fn unlock_master_key(
    header: &Luks1Header,
    password: &[u8],
    keyslot_reader: impl Fn(u64, usize) -> Result<Vec<u8>>,
) -> Result<Vec<u8>> {
    let hash = Hash::parse(&header.hash_spec)?;
    for slot in header.keyslots.iter().filter(|s| s.active) {
        let derived_key = hash.pbkdf2(password, &slot.salt, slot.iterations, header.key_bytes);

        let split_key_len = header.key_bytes * slot.stripes as usize;
        let split_key = keyslot_reader(slot.key_material_offset_sectors, split_key_len)?;

        let decrypted = decrypt_keyslot(header, &derived_key, &split_key)?;
        let master_key = af_merge(&decrypted, header.key_bytes, slot.stripes as usize, hash);

        if master_key_matches(header, &master_key, hash) {
            return Ok(master_key);
        }
    }
    Err(Error::Crypto("no keyslot unlocked with given password".into()))
}

/// Decrypts the AF-split key material for one keyslot using the header's
/// cipher/mode, sector by sector, with IVs numbered from sector 0.
fn decrypt_keyslot(header: &Luks1Header, key: &[u8], split_key: &[u8]) -> Result<Vec<u8>> {
    let mut buf = split_key.to_vec();
    if header.cipher_mode.starts_with("xts") {
        let xts = xts_for(key.len() * 8)?;
        for (i, chunk) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            xts.decrypt_xts(key, i as u64, chunk)?;
        }
    } else {
        let cbc = cbc_for(&header.cipher_name, key.len() * 8)?;
        let ivgen = iv_generator_for(&header.cipher_mode)?;
        for (i, chunk) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            let iv = ivgen.iv_for_sector(i as u64, Some(key));
            cbc.decrypt_cbc(key, iv, chunk)?;
        }
    }
    Ok(buf)
}

/// Anti-forensic merge (LUKS1 AF splitter inverse): `buf` starts at zero and
/// is diffused through every stripe but the last; the last stripe XORed with
/// that accumulator recovers the original key. For `stripes == 1` this is
/// the identity (the split key IS the key; there's nothing to merge).
fn af_merge(split: &[u8], key_len: usize, stripes: usize, hash: Hash) -> Vec<u8> {
    if stripes == 1 {
        return split[..key_len].to_vec();
    }
    let mut buf = vec![0u8; key_len];
    for s in 0..stripes - 1 {
        let stripe = &split[s * key_len..(s + 1) * key_len];
        let xored: Vec<u8> = buf.iter().zip(stripe).map(|(b, s)| b ^ s).collect();
        buf = diffuse(&xored, key_len, hash);
    }
    let last = &split[(stripes - 1) * key_len..stripes * key_len];
    last.iter().zip(buf.iter()).map(|(l, b)| l ^ b).collect()
}

/// Diffusion as specified by the LUKS1 AF splitter: for key length `len`,
/// repeatedly hash `digest_size`-byte blocks with a big-endian block counter
/// prefix, under `hash`'s digest.
fn diffuse(data: &[u8], len: usize, hash: Hash) -> Vec<u8> {
    let digest_size = hash.digest_size();
    let full_blocks = len / digest_size;
    let padding = len % digest_size;
    let mut out = Vec::with_capacity(len);
    for i in 0..full_blocks {
        let block = hash.hash_block(i as u32, &data[i * digest_size..(i + 1) * digest_size]);
        out.extend_from_slice(&block);
    }
    if padding > 0 {
        let block = hash.hash_block(full_blocks as u32, &data[full_blocks * digest_size..]);
        out.extend_from_slice(&block[..padding]);
    }
    out
}

fn master_key_matches(header: &Luks1Header, candidate: &[u8], hash: Hash) -> bool {
    let digest = hash.pbkdf2(candidate, &header.mk_digest_salt, header.mk_digest_iterations, 20);
    digest == header.mk_digest
}

/// Decrypts one payload sector (512 bytes) using the master key, the
/// header's cipher/mode, and the sector's absolute number (used as the IV
/// input by `plain`/`plain64`/`essiv` generators).
pub fn decrypt_payload_sector(
    header: &Luks1Header,
    master_key: &[u8],
    sector: u64,
    data: &mut [u8],
) -> Result<()> {
    if header.cipher_mode.starts_with("xts") {
        xts_for(master_key.len() * 8)?.decrypt_xts(master_key, sector, data)
    } else {
        let cbc = cbc_for(&header.cipher_name, master_key.len() * 8)?;
        let iv = iv_generator_for(&header.cipher_mode)?.iv_for_sector(sector, Some(master_key));
        cbc.decrypt_cbc(master_key, iv, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn af_merge_is_identity_with_single_stripe() {
        let key_len = 16;
        let split = vec![0xAAu8; key_len];
        let merged = af_merge(&split, key_len, 1, Hash::Sha1);
        assert_eq!(merged, split);
    }

    /// `af_split` (the inverse of `af_merge`, not implemented here since
    /// decoding never needs to re-split a key) is: generate `stripes - 1`
    /// random blocks, diffuse an accumulator through each, then set the
    /// final stripe to `key XOR accumulator`. This builds such a split by
    /// hand and checks `af_merge` recovers the original key.
    #[test]
    fn af_merge_recovers_key_from_hand_built_split() {
        let key_len = 20;
        let key = vec![0x5Au8; key_len];
        let stripe0 = vec![0x11u8; key_len];

        let mut buf = vec![0u8; key_len];
        let xored: Vec<u8> = buf.iter().zip(&stripe0).map(|(b, s)| b ^ s).collect();
        buf = diffuse(&xored, key_len, Hash::Sha1);
        let last: Vec<u8> = key.iter().zip(&buf).map(|(k, b)| k ^ b).collect();

        let mut split = stripe0;
        split.extend_from_slice(&last);

        let merged = af_merge(&split, key_len, 2, Hash::Sha1);
        assert_eq!(merged, key);
    }

    #[test]
    fn hash_spec_sha256_is_dispatched() {
        let hash = Hash::parse("sha256").unwrap();
        let digest = hash.pbkdf2(b"password", b"salt", 10, 32);
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn hash_spec_unknown_is_rejected() {
        assert!(Hash::parse("whirlpool").is_err());
    }

    #[test]
    fn parse_header_rejects_bad_magic() {
        let buf = vec![0u8; 600];
        let err = parse_header(&buf).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn cstr_stops_at_nul() {
        let mut buf = vec![0u8; 32];
        buf[..3].copy_from_slice(b"aes");
        assert_eq!(cstr(&buf), "aes");
    }
}
