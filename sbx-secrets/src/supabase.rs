//! Supabase secret detectors: standalone PAT, paired project secret key,
//! and service-role JWT.

use std::sync::LazyLock;

use base64::Engine as _;
use regex::Regex;
use serde_json::Value;

use crate::pair::{detect_pairs, Match, Pair};
use crate::Secret;

const MAX_DISTANCE: usize = 10 * 1024;

static PAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sbp_[0-9a-f]{40}").expect("valid regex"));

static SECRET_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sb_secret_[A-Za-z0-9_-]{31,36}").expect("valid regex"));

static PROJECT_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://([a-z0-9]{20})\.supabase\.co").expect("valid regex"));

static JWT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"eyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").expect("valid regex"));

/// Finds standalone Supabase personal access tokens.
pub fn find_supabase_pats(data: &str) -> Vec<Secret> {
    PAT_RE
        .find_iter(data)
        .map(|m| Secret { content: m.as_str().to_owned(), position: m.start() })
        .collect()
}

/// Finds Supabase project secret keys paired with a project reference
/// extracted from a nearby `https://<ref>.supabase.co` URL.
pub fn find_supabase_secret_keys(data: &str) -> Vec<Secret> {
    let a: Vec<Match<&str>> = SECRET_KEY_RE
        .find_iter(data)
        .map(|m| Match { start: m.start(), end: m.end(), value: m.as_str() })
        .collect();
    let b: Vec<Match<&str>> = PROJECT_REF_RE
        .captures_iter(data)
        .filter_map(|c| {
            let m = c.get(1)?;
            Some(Match { start: m.start(), end: m.end(), value: m.as_str() })
        })
        .collect();

    detect_pairs(
        a,
        b,
        MAX_DISTANCE,
        |pair| match pair {
            Pair::Full(key, project_ref) => (
                Secret {
                    content: format!("{}@{}", key.value, project_ref.value),
                    position: pair.position(),
                },
                true,
            ),
            _ => unreachable!("full-pair builder only sees Pair::Full"),
        },
        None::<fn(Pair<'_, &str, &str>) -> (Secret, bool)>,
    )
}

/// Finds Supabase service-role JWTs: a standard 3-part JWT whose decoded
/// payload has `iss = "supabase"` and `role = "service_role"`.
pub fn find_supabase_service_role_jwts(data: &str) -> Vec<Secret> {
    JWT_RE
        .find_iter(data)
        .filter(|m| is_service_role_jwt(m.as_str()))
        .map(|m| Secret { content: m.as_str().to_owned(), position: m.start() })
        .collect()
}

fn is_service_role_jwt(token: &str) -> bool {
    let Some((_, rest)) = token.split_once('.') else { return false };
    let Some((payload_b64, _sig)) = rest.split_once('.') else { return false };
    let Ok(payload_bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_b64)
    else {
        return false;
    };
    let Ok(payload) = serde_json::from_slice::<Value>(&payload_bytes) else {
        return false;
    };
    payload.get("iss").and_then(Value::as_str) == Some("supabase")
        && payload.get("role").and_then(Value::as_str) == Some("service_role")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_standalone_pat() {
        let pat = format!("sbp_{}", "a".repeat(40));
        let text = format!("token={pat}");
        let found = find_supabase_pats(&text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, pat);
    }

    #[test]
    fn pairs_secret_key_with_project_ref() {
        let key = format!("sb_secret_{}", "x".repeat(31));
        let text = format!("{key} at https://abcdefghijklmnopqrst.supabase.co/rest/v1");
        let found = find_supabase_secret_keys(&text);
        assert_eq!(found.len(), 1);
        assert!(found[0].content.starts_with(&key));
    }

    #[test]
    fn recognizes_service_role_jwt() {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(r#"{"alg":"HS256"}"#);
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(r#"{"iss":"supabase","role":"service_role"}"#);
        let token = format!("eyJ{header}.eyJ{payload}.sig");
        assert!(is_service_role_jwt(&token));
        let found = find_supabase_service_role_jwts(&token);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn rejects_non_service_role_jwt() {
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(r#"{"iss":"other","role":"anon"}"#);
        let token = format!("eyJhbGc.eyJ{payload}.sig");
        assert!(!is_service_role_jwt(&token));
    }
}
