//! Topic name canonicalization and hashing.
//!
//! A topic name is suffixed to the namespace of the node that owns it,
//! unless it begins with `/`. A leading `~` (in the name or in the
//! namespace) substitutes the node's display name for the namespace.
//! Runs of slashes are collapsed — which also removes the leading slash —
//! and a trailing slash is stripped, so the canonical form is stable
//! under re-canonicalization.
//!
//! A canonical name that is a decimal integer in [1, 8192) with no
//! leading zero is *pinned*: its hash equals the integer and its
//! subject-ID bypasses dynamic allocation. The no-leading-zero rule
//! keeps the name → subject-ID map one-to-one.

use alloc::format;
use alloc::string::String;

use crate::types::{SUBJECT_BITS, TOPIC_NAME_MAX, TOTAL_SUBJECT_COUNT};

/// Canonicalize a raw topic name against a namespace and a node display
/// name. Returns `None` if the result is empty or longer than
/// [`TOPIC_NAME_MAX`] bytes.
pub fn canonicalize(namespace: &str, user: &str, name: &str) -> Option<String> {
    let buf;
    let composed: &str = if name.starts_with('/') {
        name
    } else {
        let is_user = name.starts_with('~') || namespace.starts_with('~');
        let stripped = name.strip_prefix('~').unwrap_or(name);
        let prefix = if is_user { user } else { namespace };
        buf = format!("{}/{}", prefix, stripped);
        &buf
    };

    let mut out = String::with_capacity(composed.len().min(TOPIC_NAME_MAX));
    let mut prev = '/';
    for c in composed.chars() {
        if c != '/' || prev != '/' {
            out.push(c);
        }
        prev = c;
        if out.len() > TOPIC_NAME_MAX + 1 {
            return None;
        }
    }
    if out.ends_with('/') {
        out.pop();
    }
    if out.is_empty() || out.len() > TOPIC_NAME_MAX {
        return None;
    }
    Some(out)
}

/// Parse a canonical pinned subject-ID form: a decimal integer in
/// [1, 8192) with no leading zero. Anything else returns `None`.
pub fn parse_pinned(s: &str) -> Option<u16> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes[0] == b'0' {
        return None;
    }
    let mut out: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        out = out * 10 + u32::from(b - b'0');
        if u64::from(out) >= TOTAL_SUBJECT_COUNT {
            return None;
        }
    }
    Some(out as u16)
}

/// Hash of a canonical topic name. Pinned names hash to their integer
/// value; the probability of a rapidhash falling into the pinned range
/// is ~4.4e-16 and is treated as impossible.
pub fn topic_hash(name: &str) -> u64 {
    match parse_pinned(name) {
        Some(pinned) => u64::from(pinned),
        None => rapidhash::rapidhash(name.as_bytes()),
    }
}

/// Whether a topic hash denotes a pinned topic.
#[inline]
pub fn is_pinned(hash: u64) -> bool {
    hash < TOTAL_SUBJECT_COUNT
}

/// Topic discriminator: the top 51 bits of the name hash, fused into
/// transport frames for fast subject-ID collision detection. Zero for
/// pinned topics so that legacy peers are not affected.
#[inline]
pub fn discriminator(hash: u64) -> u64 {
    hash >> SUBJECT_BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_name() {
        assert_eq!(canonicalize("ns", "u", "/abc/def").unwrap(), "abc/def");
    }

    #[test]
    fn test_namespace_prefix() {
        assert_eq!(canonicalize("robot1", "u", "imu/accel").unwrap(), "robot1/imu/accel");
        assert_eq!(canonicalize("/", "u", "imu").unwrap(), "imu");
    }

    #[test]
    fn test_user_expansion() {
        // `~` in the name expands to the node display name.
        assert_eq!(
            canonicalize("ns", "abcd/0001/00000001/", "~status").unwrap(),
            "abcd/0001/00000001/status"
        );
        // `~` in the namespace does the same without stripping the name.
        assert_eq!(
            canonicalize("~", "abcd/0001/00000001/", "status").unwrap(),
            "abcd/0001/00000001/status"
        );
    }

    #[test]
    fn test_slash_collapsing() {
        assert_eq!(canonicalize("ns", "u", "//a///b//").unwrap(), "a/b");
        assert_eq!(canonicalize("ns//", "u", "x").unwrap(), "ns/x");
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(canonicalize("/", "u", "/"), None);
        assert_eq!(canonicalize("/", "u", "///"), None);
    }

    #[test]
    fn test_length_limit() {
        let long = "x".repeat(TOPIC_NAME_MAX);
        assert_eq!(canonicalize("/", "u", &format!("/{}", long)).unwrap().len(), TOPIC_NAME_MAX);
        let too_long = "x".repeat(TOPIC_NAME_MAX + 1);
        assert_eq!(canonicalize("/", "u", &format!("/{}", too_long)), None);
    }

    #[test]
    fn test_canonicalize_idempotent() {
        for raw in ["/a//b/", "~x", "y/z", "/7509"] {
            let once = canonicalize("ns", "user/", raw).unwrap();
            let twice = canonicalize("ns", "user/", &format!("/{}", once)).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_parse_pinned() {
        assert_eq!(parse_pinned("1"), Some(1));
        assert_eq!(parse_pinned("7509"), Some(7509));
        assert_eq!(parse_pinned("8191"), Some(8191));
        assert_eq!(parse_pinned("8192"), None);
        assert_eq!(parse_pinned("0"), None);
        assert_eq!(parse_pinned("042"), None); // leading zero: not canonical
        assert_eq!(parse_pinned(""), None);
        assert_eq!(parse_pinned("12a"), None);
        assert_eq!(parse_pinned("a12"), None);
        assert_eq!(parse_pinned("99999999999999999999"), None);
    }

    #[test]
    fn test_pinned_round_trip() {
        for k in 1u64..8192 {
            let name = format!("{}", k);
            assert_eq!(topic_hash(&name), k);
            assert!(is_pinned(k));
        }
    }

    #[test]
    fn test_dynamic_hash_not_pinned() {
        for name in ["telemetry/imu", "a", "x/y/z", "8192", "01"] {
            assert!(!is_pinned(topic_hash(name)), "{}", name);
        }
    }

    #[test]
    fn test_discriminator() {
        assert_eq!(discriminator(7509), 0);
        let h = topic_hash("telemetry/imu");
        assert_eq!(discriminator(h), h >> 13);
        assert!(discriminator(h) > 0);
    }
}
