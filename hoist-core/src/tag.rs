//! Build tag codec
//!
//! Every build artifact is named `<branch>-<sha>-<timestamp>[-<attempt>]`,
//! e.g. `feature-login-abc1234-20260213110000-2`. The branch may itself
//! contain hyphens, so decoding anchors on the right-hand fields and hands
//! whatever remains on the left to the branch.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of the branch segment after sanitizing
pub const MAX_BRANCH_LEN: usize = 40;

/// Length of the short commit hash embedded in a tag
pub const SHA_LEN: usize = 7;

/// Length of the `YYYYMMDDHHMMSS` timestamp segment
const TIMESTAMP_LEN: usize = 14;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Errors returned when a string is not a valid build tag
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("empty tag string")]
    Empty,

    #[error("tag too short: {0:?}")]
    TooShort(String),

    #[error("invalid attempt: {0:?}")]
    InvalidAttempt(String),

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid SHA: {0:?}")]
    InvalidSha(String),
}

/// Decoded build identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildTag {
    /// Sanitized branch name
    pub branch: String,
    /// Short commit hash (7 lowercase hex characters)
    pub sha: String,
    /// Build time, second precision
    pub time: DateTime<Utc>,
    /// Retry attempt; 0 when the tag carries no attempt suffix
    pub attempt: u32,
}

impl BuildTag {
    /// Creates a tag from raw build inputs, normalizing them the same way
    /// [`encode`] does
    pub fn new(branch: &str, sha: &str, time: DateTime<Utc>, attempt: u32) -> Self {
        Self {
            branch: sanitize_branch(branch),
            sha: sha.chars().take(SHA_LEN).collect(),
            time,
            attempt: if attempt < 2 { 0 } else { attempt },
        }
    }

    /// Renders this tag as a string
    pub fn encode(&self) -> String {
        encode(&self.branch, &self.sha, self.time, self.attempt)
    }
}

impl fmt::Display for BuildTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for BuildTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

/// Replaces every character outside `[A-Za-z0-9.-]` with `-` and truncates
/// the result to [`MAX_BRANCH_LEN`] characters
pub fn sanitize_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_BRANCH_LEN)
        .collect()
}

/// Encodes a build tag
///
/// Total over its inputs: the branch is sanitized, the SHA truncated to
/// seven characters, the time rendered in UTC at second precision. Attempts
/// 0 and 1 produce no suffix.
pub fn encode(branch: &str, sha: &str, time: DateTime<Utc>, attempt: u32) -> String {
    let branch = sanitize_branch(branch);
    let sha: String = sha.chars().take(SHA_LEN).collect();
    let stamp = time.format(TIMESTAMP_FORMAT);

    if attempt >= 2 {
        format!("{}-{}-{}-{}", branch, sha, stamp, attempt)
    } else {
        format!("{}-{}-{}", branch, sha, stamp)
    }
}

/// Decodes a build tag string
pub fn decode(s: &str) -> Result<BuildTag, TagError> {
    if s.is_empty() {
        return Err(TagError::Empty);
    }

    let mut parts: Vec<&str> = s.split('-').collect();
    if parts.len() < 3 {
        return Err(TagError::TooShort(s.to_string()));
    }

    // A trailing all-digit segment that is not a timestamp is the attempt
    let mut attempt = 0;
    if let Some(&last) = parts.last() {
        if is_digits(last) && last.len() != TIMESTAMP_LEN {
            attempt = last
                .parse::<u32>()
                .map_err(|_| TagError::InvalidAttempt(last.to_string()))?;
            parts.pop();
        }
    }

    if parts.len() < 3 {
        return Err(TagError::TooShort(s.to_string()));
    }

    let stamp = parts[parts.len() - 1];
    let time = parse_timestamp(stamp).ok_or_else(|| TagError::InvalidTimestamp(stamp.to_string()))?;

    let sha = parts[parts.len() - 2];
    if !is_short_sha(sha) {
        return Err(TagError::InvalidSha(sha.to_string()));
    }

    let branch = parts[..parts.len() - 2].join("-");

    Ok(BuildTag {
        branch,
        sha: sha.to_string(),
        time,
        attempt,
    })
}

/// Returns true if `s` decodes as a build tag
pub fn is_valid(s: &str) -> bool {
    decode(s).is_ok()
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_short_sha(s: &str) -> bool {
    s.len() == SHA_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    if stamp.len() != TIMESTAMP_LEN || !is_digits(stamp) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| stamp.get(range)?.parse::<u32>().ok();

    let date = NaiveDate::from_ymd_opt(field(0..4)? as i32, field(4..6)?, field(6..8)?)?;
    let naive = date.and_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)?;
    Some(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 13, 11, 0, 0).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            ("main", "abc1234", 0, 0),
            ("feature/add-login", "dee5678", 0, 0),
            ("main", "abc1234", 1, 0),
            ("main", "abc1234", 2, 2),
            ("deploy", "ff00112", 3, 3),
            ("main", "abc1234def5678", 0, 0),
        ];

        for (branch, sha, attempt, want_attempt) in cases {
            let encoded = encode(branch, sha, ts(), attempt);
            let parsed = decode(&encoded).unwrap_or_else(|e| panic!("decode({encoded:?}): {e}"));

            assert_eq!(parsed.branch, sanitize_branch(branch));
            assert_eq!(parsed.sha, &sha[..7]);
            assert_eq!(parsed.time, ts());
            assert_eq!(parsed.attempt, want_attempt, "attempt for {encoded}");
        }
    }

    #[test]
    fn test_encode_format() {
        assert_eq!(
            encode("feature/login", "abc1234", ts(), 0),
            "feature-login-abc1234-20260213110000"
        );
        assert_eq!(encode("main", "abc1234", ts(), 2), "main-abc1234-20260213110000-2");
    }

    #[test]
    fn test_sanitize_branch() {
        assert_eq!(sanitize_branch("feature/login"), "feature-login");
        assert_eq!(sanitize_branch("my_branch"), "my-branch");
        assert_eq!(sanitize_branch("v1.2.3"), "v1.2.3");
        assert_eq!(sanitize_branch("fix-bug"), "fix-bug");
        assert_eq!(sanitize_branch("my branch"), "my-branch");
        assert_eq!(
            sanitize_branch("a123456789012345678901234567890123456789extra"),
            "a123456789012345678901234567890123456789"
        );
    }

    #[test]
    fn test_decode_hyphenated_branch() {
        let parsed = decode("fix-auth-redirect-ee410d3-20260213110000").unwrap();
        assert_eq!(parsed.branch, "fix-auth-redirect");
        assert_eq!(parsed.sha, "ee410d3");
        assert_eq!(parsed.attempt, 0);
    }

    #[test]
    fn test_decode_with_attempt() {
        let parsed = decode("add-client-tools-a3f9c21-20260213143022-2").unwrap();
        assert_eq!(parsed.branch, "add-client-tools");
        assert_eq!(parsed.sha, "a3f9c21");
        assert_eq!(parsed.attempt, 2);
        assert_eq!(parsed.time, Utc.with_ymd_and_hms(2026, 2, 13, 14, 30, 22).unwrap());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(""), Err(TagError::Empty));
        assert!(matches!(decode("a-b"), Err(TagError::TooShort(_))));
        assert!(matches!(decode("abc1234-20260213110000"), Err(TagError::TooShort(_))));
        assert!(matches!(
            decode("main-ghijklm-20260213110000"),
            Err(TagError::InvalidSha(_))
        ));
        assert!(matches!(
            decode("main-abc12-20260213110000"),
            Err(TagError::InvalidSha(_))
        ));
        assert!(matches!(
            decode("main-abc1234-notadate"),
            Err(TagError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            decode("main-abc1234-20261345990000"),
            Err(TagError::InvalidTimestamp(_))
        ));
        // attempt stripped, leaving too few segments
        assert!(matches!(decode("abc1234-20260213110000-3"), Err(TagError::TooShort(_))));
    }

    #[test]
    fn test_from_str_and_display() {
        let tag: BuildTag = "main-abc1234-20260213110000-4".parse().unwrap();
        assert_eq!(tag.to_string(), "main-abc1234-20260213110000-4");
        assert_eq!(BuildTag::new("main", "abc1234ffff", ts(), 1).to_string(), "main-abc1234-20260213110000");
    }
}
