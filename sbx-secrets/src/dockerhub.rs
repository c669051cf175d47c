//! Docker Hub personal access token + username pair detector.

use regex::Regex;
use std::sync::LazyLock;

use crate::pair::{detect_pairs, Match, Pair};
use crate::Secret;

const MAX_ELEMENT_LEN: usize = 100;
const MAX_DISTANCE: usize = 100;

static PAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dckr_pat_[A-Za-z0-9_-]{27}").expect("valid regex"));

static USERNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:docker\s+login\s+(?:[^\n]*?-u(?:sername)?[= ]\s*"?([A-Za-z0-9_.-]{1,100})"?|"username"\s*[:=]\s*"?([A-Za-z0-9_.-]{1,100})"?)"#,
    )
    .expect("valid regex")
});

/// Finds Docker Hub PATs, pairing each with a nearby username when one is
/// present; a PAT with no nearby username is still reported (partial pair).
pub fn find_dockerhub_secrets(data: &str) -> Vec<Secret> {
    let a: Vec<Match<&str>> = PAT_RE
        .find_iter(data)
        .filter(|m| m.len() <= MAX_ELEMENT_LEN + 9) // "dckr_pat_" + 27 is fixed-length; kept for symmetry with the spec's general ceiling
        .map(|m| Match { start: m.start(), end: m.end(), value: m.as_str() })
        .collect();

    let b: Vec<Match<&str>> = USERNAME_RE
        .captures_iter(data)
        .filter_map(|c| {
            let m = c.get(1).or_else(|| c.get(2))?;
            Some(Match { start: m.start(), end: m.end(), value: m.as_str() })
        })
        .collect();

    detect_pairs(
        a,
        b,
        MAX_DISTANCE,
        |pair| match pair {
            Pair::Full(pat, username) => (
                Secret {
                    content: format!("{}:{}", username.value, pat.value),
                    position: pair.position(),
                },
                true,
            ),
            _ => unreachable!("full-pair builder only sees Pair::Full"),
        },
        Some(|pair: Pair<'_, &str, &str>| match pair {
            Pair::PartialA(pat) => (
                Secret { content: pat.value.to_owned(), position: pat.start },
                true,
            ),
            Pair::PartialB(_) => (Secret { content: String::new(), position: 0 }, false),
            Pair::Full(..) => unreachable!(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_pat_with_username_flag() {
        let text = r#"docker login -u alice registry.example.com"#;
        let text = format!("{text} then dckr_pat_ABCDEFGHIJKLMNOPQRSTUVWXYZ1");
        let found = find_dockerhub_secrets(&text);
        assert_eq!(found.len(), 1);
        assert!(found[0].content.starts_with("alice:"));
    }

    #[test]
    fn standalone_pat_is_reported_as_partial() {
        let text = "token: dckr_pat_ABCDEFGHIJKLMNOPQRSTUVWXYZ1";
        let found = find_dockerhub_secrets(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "dckr_pat_ABCDEFGHIJKLMNOPQRSTUVWXYZ1");
    }

    #[test]
    fn no_pat_no_secret() {
        let text = r#"docker login -u alice registry.example.com"#;
        assert!(find_dockerhub_secrets(text).is_empty());
    }
}
