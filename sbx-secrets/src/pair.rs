//! Generic pair-based secret detection engine.
//!
//! Every concrete detector in this crate (Tink excepted, which has no
//! natural "B" side) is a thin pair of finders plus a builder closure driven
//! through [`detect_pairs`]. The engine itself knows nothing about secret
//! semantics: it only matches candidate spans.

/// One candidate match from a finder: a half-open byte range plus whatever
/// payload the finder extracted (already-decoded key material, a captured
/// username, etc).
#[derive(Debug, Clone)]
pub struct Match<T> {
    pub start: usize,
    pub end: usize,
    pub value: T,
}

impl<T> Match<T> {
    fn overlaps(&self, other_start: usize, other_end: usize) -> bool {
        self.start < other_end && other_start < self.end
    }
}

/// A matched pair of candidates, or the single leftover candidate from a
/// partial match.
pub enum Pair<'a, A, B> {
    Full(&'a Match<A>, &'a Match<B>),
    PartialA(&'a Match<A>),
    PartialB(&'a Match<B>),
}

impl<A, B> Pair<'_, A, B> {
    /// Position a secret should be reported at: the earlier side's start.
    pub fn position(&self) -> usize {
        match self {
            Pair::Full(a, b) => a.start.min(b.start),
            Pair::PartialA(a) => a.start,
            Pair::PartialB(b) => b.start,
        }
    }
}

/// Runs the shared pair-matching algorithm over two finder outputs.
///
/// `max_distance == 0` means unlimited. `from_pair` builds a secret (and a
/// bool "accept" flag) from a full pair; `from_partial_pair`, if given, does
/// the same for a single leftover candidate.
pub fn detect_pairs<A, B, S>(
    mut a_matches: Vec<Match<A>>,
    mut b_matches: Vec<Match<B>>,
    max_distance: usize,
    mut from_pair: impl FnMut(Pair<'_, A, B>) -> (S, bool),
    mut from_partial_pair: Option<impl FnMut(Pair<'_, A, B>) -> (S, bool)>,
) -> Vec<S> {
    a_matches.sort_by_key(|m| m.start);
    b_matches.sort_by_key(|m| m.start);

    // A takes precedence: drop any B candidate overlapping an A candidate.
    b_matches.retain(|b| !a_matches.iter().any(|a| a.overlaps(b.start, b.end)));

    let mut candidates: Vec<(usize, usize, usize)> = Vec::new(); // (distance, a_idx, b_idx)
    for (ai, a) in a_matches.iter().enumerate() {
        for (bi, b) in b_matches.iter().enumerate() {
            if a.overlaps(b.start, b.end) {
                continue;
            }
            let (earlier_end, later_start) = if a.start <= b.start {
                (a.end, b.start)
            } else {
                (b.end, a.start)
            };
            let distance = later_start.saturating_sub(earlier_end);
            if max_distance != 0 && distance > max_distance {
                continue;
            }
            candidates.push((distance, ai, bi));
        }
    }
    candidates.sort_by_key(|&(d, _, _)| d);

    let mut a_used = vec![false; a_matches.len()];
    let mut b_used = vec![false; b_matches.len()];
    let mut secrets = Vec::new();

    for (_, ai, bi) in candidates {
        if a_used[ai] || b_used[bi] {
            continue;
        }
        a_used[ai] = true;
        b_used[bi] = true;
        let (secret, accept) = from_pair(Pair::Full(&a_matches[ai], &b_matches[bi]));
        if accept {
            secrets.push(secret);
        }
    }

    if let Some(ref mut builder) = from_partial_pair {
        for (ai, a) in a_matches.iter().enumerate() {
            if a_used[ai] {
                continue;
            }
            let (secret, accept) = builder(Pair::PartialA(a));
            if accept {
                secrets.push(secret);
            }
        }
        for (bi, b) in b_matches.iter().enumerate() {
            if b_used[bi] {
                continue;
            }
            let (secret, accept) = builder(Pair::PartialB(b));
            if accept {
                secrets.push(secret);
            }
        }
    }

    secrets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(start: usize, end: usize) -> Match<()> {
        Match { start, end, value: () }
    }

    #[test]
    fn pairs_closest_candidates_first() {
        let a = vec![m(0, 5), m(100, 105)];
        let b = vec![m(6, 10), m(200, 205)];
        let secrets: Vec<(usize, usize)> = detect_pairs(
            a,
            b,
            0,
            |pair| match pair {
                Pair::Full(a, b) => ((a.start, b.start), true),
                _ => unreachable!(),
            },
            None::<fn(Pair<'_, (), ()>) -> ((usize, usize), bool)>,
        );
        assert_eq!(secrets, vec![(0, 6), (100, 200)]);
    }

    #[test]
    fn respects_max_distance() {
        let a = vec![m(0, 5)];
        let b = vec![m(1000, 1005)];
        let secrets: Vec<()> = detect_pairs(
            a,
            b,
            50,
            |_| ((), true),
            None::<fn(Pair<'_, (), ()>) -> ((), bool)>,
        );
        assert!(secrets.is_empty());
    }

    #[test]
    fn overlapping_b_dropped_in_favor_of_a() {
        let a = vec![m(0, 10)];
        let b = vec![m(5, 15), m(20, 25)];
        let secrets: Vec<usize> = detect_pairs(
            a,
            b,
            0,
            |pair| match pair {
                Pair::Full(a, b) => (b.start, a.start == 0 && b.start == 20),
                _ => unreachable!(),
            },
            None::<fn(Pair<'_, (), ()>) -> (usize, bool)>,
        );
        assert_eq!(secrets, vec![20]);
    }

    #[test]
    fn partial_pairs_emit_leftovers() {
        let a = vec![m(0, 5), m(50, 55)];
        let b = vec![m(6, 10)];
        let secrets: Vec<&str> = detect_pairs(
            a,
            b,
            0,
            |pair| match pair {
                Pair::Full(..) => ("full", true),
                _ => unreachable!(),
            },
            Some(|pair: Pair<'_, (), ()>| match pair {
                Pair::PartialA(_) => ("partial-a", true),
                _ => ("", false),
            }),
        );
        assert_eq!(secrets, vec!["full", "partial-a"]);
    }
}
