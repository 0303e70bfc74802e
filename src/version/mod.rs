// src/version/mod.rs

//! EVR (epoch:version-release) parsing and total ordering
//!
//! Versions are compared the way RPM-family tools compare them: epoch
//! first (numeric), then the version string split into alternating numeric
//! and alphabetic segments on `.`, `-` and `_`, then the release string
//! likewise. Numeric segments compare by value, alphabetic segments
//! lexically, and a numeric segment always outranks an alphabetic one at
//! the same position.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A parsed epoch:version-release triplet.
///
/// Equality, ordering and hashing all go through the normalized segment
/// comparison, so spellings that differ only in separators or leading
/// zeros (`1.3_1` vs `1.3.1`, `1.010` vs `1.10`) are the same version
/// everywhere, not just under `cmp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evr {
    pub epoch: u64,
    pub version: String,
    pub release: String,
}

impl Evr {
    /// Build an EVR from its parts
    pub fn new(epoch: u64, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }

    /// Parse an EVR string.
    ///
    /// Format: `[epoch:]version[-release]`, epoch defaulting to 0 and
    /// release to "1".
    ///
    /// Examples:
    /// - "1.3" → 0:1.3-1
    /// - "0:1.3-1" → 0:1.3-1
    /// - "2:4.9-3" → 2:4.9-3
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|e| Error::Parse {
                file: s.to_string(),
                reason: format!("invalid epoch: {}", e),
            })?
        };

        let (version, release) = match rest.split_once('-') {
            Some((v, r)) => (v.to_string(), r.to_string()),
            None => (rest.to_string(), "1".to_string()),
        };

        if version.is_empty() {
            return Err(Error::Parse {
                file: s.to_string(),
                reason: "empty version component".to_string(),
            });
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two EVRs
    pub fn compare(&self, other: &Evr) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match compare_segments(&self.version, &other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }
        compare_segments(&self.release, &other.release)
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.epoch, self.version, self.release)
    }
}

impl FromStr for Evr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Evr::parse(s)
    }
}

impl PartialEq for Evr {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Evr {}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Hash over the normalized segments so it agrees with the manual Eq
impl Hash for Evr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        hash_segments(&self.version, state);
        hash_segments(&self.release, state);
    }
}

fn hash_segments<H: Hasher>(s: &str, state: &mut H) {
    for segment in segments(s) {
        match segment {
            Segment::Num(digits) => {
                state.write_u8(0);
                digits.trim_start_matches('0').hash(state);
            }
            Segment::Alpha(text) => {
                state.write_u8(1);
                text.hash(state);
            }
        }
    }
}

/// One segment of a version string: a run of digits or a run of letters
#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Num(&'a str),
    Alpha(&'a str),
}

/// Split a version string into segments, skipping `.`, `-`, `_` separators
fn segments(s: &str) -> Vec<Segment<'_>> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            out.push(Segment::Num(&s[start..i]));
        } else if c == b'.' || c == b'-' || c == b'_' {
            i += 1;
        } else {
            let start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_digit()
                && bytes[i] != b'.'
                && bytes[i] != b'-'
                && bytes[i] != b'_'
            {
                i += 1;
            }
            out.push(Segment::Alpha(&s[start..i]));
        }
    }
    out
}

/// Compare two numeric segments by value, ignoring leading zeros
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        ord => ord,
    }
}

/// Segmented version comparison
fn compare_segments(a: &str, b: &str) -> Ordering {
    let sa = segments(a);
    let sb = segments(b);

    for pair in sa.iter().zip(sb.iter()) {
        let ord = match pair {
            (Segment::Num(x), Segment::Num(y)) => compare_numeric(x, y),
            (Segment::Alpha(x), Segment::Alpha(y)) => x.cmp(y),
            // A numeric segment outranks an alphabetic one
            (Segment::Num(_), Segment::Alpha(_)) => Ordering::Greater,
            (Segment::Alpha(_), Segment::Num(_)) => Ordering::Less,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    sa.len().cmp(&sb.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evr(s: &str) -> Evr {
        Evr::parse(s).unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let v = evr("1.3");
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.3");
        assert_eq!(v.release, "1");
    }

    #[test]
    fn test_parse_full() {
        let v = evr("2:4.9-3");
        assert_eq!(v.epoch, 2);
        assert_eq!(v.version, "4.9");
        assert_eq!(v.release, "3");
    }

    #[test]
    fn test_parse_empty_epoch_defaults_to_zero() {
        let v = evr(":1.2-1");
        assert_eq!(v.epoch, 0);
    }

    #[test]
    fn test_parse_rejects_empty_version() {
        assert!(Evr::parse("1:-1").is_err());
        assert!(Evr::parse("").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["0:1.3-1", "2:4.9-3.b2", "0:20240101-1"] {
            let v = evr(s);
            assert_eq!(Evr::parse(&v.to_string()).unwrap(), v);
        }
    }

    #[test]
    fn test_epoch_dominates() {
        assert!(evr("1:1.0") > evr("0:9.0"));
    }

    #[test]
    fn test_numeric_segments_compare_by_value() {
        assert!(evr("1.10") > evr("1.9"));
        assert!(evr("1.010") == evr("1.10"));
    }

    #[test]
    fn test_numeric_beats_alpha() {
        assert!(evr("1.0") > evr("1.a"));
        assert!(evr("1.3.1") > evr("1.3.rc1"));
    }

    #[test]
    fn test_alpha_lexical() {
        assert!(evr("1.alpha") < evr("1.beta"));
    }

    #[test]
    fn test_longer_wins_on_common_prefix() {
        assert!(evr("1.3.1") > evr("1.3"));
    }

    #[test]
    fn test_release_breaks_ties() {
        assert!(evr("1.3-2") > evr("1.3-1"));
        assert!(evr("1.3-10") > evr("1.3-9"));
    }

    #[test]
    fn test_equality_is_componentwise() {
        assert_eq!(evr("0:1.3-1").cmp(&evr("1.3")), Ordering::Equal);
        assert_ne!(evr("1.3-1"), evr("1.3-2"));
    }

    #[test]
    fn test_antisymmetry_and_transitivity() {
        let vs = [evr("1.2"), evr("1.10"), evr("2.0"), evr("1:0.1")];
        for a in &vs {
            for b in &vs {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
                for c in &vs {
                    if a.cmp(b) == Ordering::Less && b.cmp(c) == Ordering::Less {
                        assert_eq!(a.cmp(c), Ordering::Less);
                    }
                }
            }
        }
    }

    #[test]
    fn test_separator_split_examples() {
        assert!(evr("1.3_1") == evr("1.3.1"));
        assert!(evr("4.9a") < evr("4.9.1"));
    }

    #[test]
    fn test_eq_cmp_and_hash_agree_across_spellings() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        fn hash_of(v: &Evr) -> u64 {
            let mut hasher = DefaultHasher::new();
            v.hash(&mut hasher);
            hasher.finish()
        }

        // Same version under normalization, spelled differently
        for (a, b) in [("1.010", "1.10"), ("1.3_1", "1.3.1"), ("0:1.3-1", "1.3")] {
            let (a, b) = (evr(a), evr(b));
            assert_eq!(a.cmp(&b), Ordering::Equal);
            assert!(a == b);
            assert_eq!(hash_of(&a), hash_of(&b));
        }

        // Genuinely different versions stay unequal
        let (a, b) = (evr("1.3-1"), evr("1.3-2"));
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert!(a != b);
    }
}
