//! VAPID (Voluntary Application Server Identification) key-pair detector.
//!
//! A VAPID key pair is a P-256 scalar (the private key, base64url, 32 raw
//! bytes) and its uncompressed public point (base64url, 65 raw bytes,
//! `0x04 || x || y`). The pair is only accepted once the scalar's public
//! point is verified to actually match the claimed public key — a lot of
//! base64url runs of the right length are not VAPID keys at all.

use base64::Engine as _;
use elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};

use crate::pair::{detect_pairs, Match, Pair};
use crate::Secret;

const PUBLIC_LEN: usize = 87; // base64url(65 bytes) without padding
const PRIVATE_LEN: usize = 43; // base64url(32 bytes) without padding

/// Finds verified VAPID key pairs in `data`.
pub fn find_vapid_pairs(data: &[u8]) -> Vec<Secret> {
    let a = find_base64url_runs(data, PUBLIC_LEN);
    let b = find_base64url_runs(data, PRIVATE_LEN);

    detect_pairs(
        a,
        b,
        0,
        |pair| match pair {
            Pair::Full(public, private) => {
                let position = pair_position(&pair);
                let accept = verify_pair(public.value, private.value);
                (
                    Secret {
                        content: format!("{}.{}", public.value, private.value),
                        position,
                    },
                    accept,
                )
            }
            _ => unreachable!("no partial builder supplied"),
        },
        None::<fn(Pair<'_, &str, &str>) -> (Secret, bool)>,
    )
}

fn pair_position(pair: &Pair<'_, &str, &str>) -> usize {
    pair.position()
}

fn verify_pair(public_b64: &str, private_b64: &str) -> bool {
    let Ok(public_bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(public_b64)
    else {
        return false;
    };
    let Ok(private_bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(private_b64)
    else {
        return false;
    };
    if public_bytes.len() != 65 || private_bytes.len() != 32 {
        return false;
    }

    let Ok(public_key) = PublicKey::from_sec1_bytes(&public_bytes) else {
        return false;
    };
    let Ok(secret_key) = SecretKey::from_slice(&private_bytes) else {
        return false;
    };

    let derived = secret_key.public_key();
    derived.to_encoded_point(false).as_bytes() == public_key.to_encoded_point(false).as_bytes()
}

/// Finds runs of exactly `len` base64url-alphabet bytes bordered by
/// non-base64url characters (or the ends of `data`).
fn find_base64url_runs(data: &[u8], len: usize) -> Vec<Match<&str>> {
    let mut out = Vec::new();
    let mut run_start = None;
    let is_b64url = |b: u8| b.is_ascii_alphanumeric() || b == b'-' || b == b'_';

    let mut i = 0;
    while i <= data.len() {
        let at_boundary = i == data.len() || !is_b64url(data[i]);
        if at_boundary {
            if let Some(start) = run_start.take()
                && i - start == len
                && let Ok(s) = std::str::from_utf8(&data[start..i])
            {
                out.push(Match { start, end: i, value: s });
            }
            run_start = None;
        } else if run_start.is_none() {
            run_start = Some(i);
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fixed, valid non-zero scalar, for deterministic tests without
    /// pulling in an RNG dependency.
    fn deterministic_scalar(seed: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed.max(1);
        SecretKey::from_slice(&bytes).expect("valid scalar")
    }

    #[test]
    fn verified_pair_is_accepted() {
        let secret_key = deterministic_scalar(7);
        let public_key = secret_key.public_key();
        let private_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(secret_key.to_bytes());
        let public_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(public_key.to_encoded_point(false).as_bytes());

        assert_eq!(public_b64.len(), PUBLIC_LEN);
        assert_eq!(private_b64.len(), PRIVATE_LEN);
        assert!(verify_pair(&public_b64, &private_b64));

        let text = format!("key={public_b64} priv={private_b64}");
        let found = find_vapid_pairs(text.as_bytes());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn mismatched_pair_is_rejected() {
        let key1 = deterministic_scalar(3);
        let key2 = deterministic_scalar(9);
        let private_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key1.to_bytes());
        let public_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(key2.public_key().to_encoded_point(false).as_bytes());
        assert!(!verify_pair(&public_b64, &private_b64));
    }
}
