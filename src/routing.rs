//! Routing key derivation.
//!
//! Keys have the form `[<prefix>.]<segment>.<segment>...<event>`: the
//! identifier's path segments, sanitized for topic matching, followed by the
//! event kind token. `/data/obs.csv` created becomes `data.obs_csv.create`.

use std::fmt;

use crate::advertisement::{Advertisement, EventKind};
use crate::error::{PostError, Result};

/// AMQP short-string limit for routing keys.
pub const MAX_ROUTING_KEY_LEN: usize = 255;

const PATH_SEPARATOR: char = '/';
const TOPIC_SEPARATOR: char = '.';
const REPLACEMENT: char = '_';

/// A broker routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the routing key for an identifier and event kind.
pub fn derive(identifier: &str, kind: EventKind) -> Result<RoutingKey> {
    Router::default().derive(identifier, kind)
}

/// Routing key derivation with an optional fixed topic prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Router {
    prefix: Option<String>,
}

impl Router {
    /// Router whose keys start with `prefix` (used verbatim, e.g. `v02.post`).
    /// An empty prefix means none.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_matches(TOPIC_SEPARATOR);
        Self {
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn route(&self, advertisement: &Advertisement) -> Result<RoutingKey> {
        self.derive(advertisement.identifier(), advertisement.kind())
    }

    pub fn derive(&self, identifier: &str, kind: EventKind) -> Result<RoutingKey> {
        let trimmed = identifier.trim_end_matches(PATH_SEPARATOR);
        let segments: Vec<String> = trimmed
            .split(PATH_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(sanitize_segment)
            .collect();

        if segments.is_empty() {
            let reason = if identifier.is_empty() {
                "empty identifier"
            } else {
                "identifier has no path segments"
            };
            return Err(PostError::invalid_identifier(identifier, reason));
        }

        let head = self.prefix.as_deref().map(|p| p.len() + 1).unwrap_or(0);
        let tail = 1 + kind.token().len();
        let budget = MAX_ROUTING_KEY_LEN.saturating_sub(head + tail);
        let joined = segments.join(".");
        let path = truncate_on_char_boundary(&joined, budget);
        if path.is_empty() {
            return Err(PostError::invalid_identifier(
                identifier,
                format!(
                    "no room for path segments within {} bytes after the topic prefix",
                    MAX_ROUTING_KEY_LEN
                ),
            ));
        }

        let mut key = String::with_capacity(head + path.len() + tail);
        if let Some(prefix) = &self.prefix {
            key.push_str(prefix);
            key.push(TOPIC_SEPARATOR);
        }
        key.push_str(path);
        key.push(TOPIC_SEPARATOR);
        key.push_str(kind.token());

        Ok(RoutingKey(key))
    }
}

/// Replaces characters that carry meaning in topic matching.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '.' | '*' | '#' => REPLACEMENT,
            c if c.is_whitespace() => REPLACEMENT,
            c => c,
        })
        .collect()
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].trim_end_matches(TOPIC_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path_create() {
        let key = derive("/data/obs.csv", EventKind::Create).unwrap();
        assert_eq!(key.as_str(), "data.obs_csv.create");
    }

    #[test]
    fn test_kind_tokens() {
        assert_eq!(
            derive("/a/old.txt", EventKind::Remove).unwrap().as_str(),
            "a.old_txt.remove"
        );
        assert_eq!(
            derive("/a/new.txt", EventKind::RenameTo).unwrap().as_str(),
            "a.new_txt.rename"
        );
    }

    #[test]
    fn test_bare_file_name_is_single_segment() {
        let key = derive("report", EventKind::Create).unwrap();
        assert_eq!(key.as_str(), "report.create");
    }

    #[test]
    fn test_trailing_and_repeated_separators() {
        let key = derive("/data//incoming/", EventKind::Remove).unwrap();
        assert_eq!(key.as_str(), "data.incoming.remove");
    }

    #[test]
    fn test_relative_path() {
        let key = derive("data/obs.csv", EventKind::Create).unwrap();
        assert_eq!(key.as_str(), "data.obs_csv.create");
    }

    #[test]
    fn test_wildcards_and_whitespace_escaped() {
        let key = derive("/in box/a*b#c.d", EventKind::Create).unwrap();
        assert_eq!(key.as_str(), "in_box.a_b_c_d.create");
    }

    #[test]
    fn test_empty_identifier_rejected() {
        assert!(matches!(
            derive("", EventKind::Create),
            Err(PostError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_separator_only_identifier_rejected() {
        assert!(matches!(
            derive("///", EventKind::Remove),
            Err(PostError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_derive_is_pure() {
        let first = derive("/x/y/z.bin", EventKind::Create).unwrap();
        let second = derive("/x/y/z.bin", EventKind::Create).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_prefix_prepended() {
        let router = Router::with_prefix("v02.post.");
        let key = router.derive("/data/obs.csv", EventKind::Create).unwrap();
        assert_eq!(key.as_str(), "v02.post.data.obs_csv.create");
    }

    #[test]
    fn test_empty_prefix_means_none() {
        assert_eq!(Router::with_prefix("").prefix(), None);
        assert_eq!(Router::with_prefix("...").prefix(), None);
    }

    #[test]
    fn test_long_key_truncated_keeping_prefix_and_kind() {
        let router = Router::with_prefix("v02.post");
        let identifier = format!("/{}/{}", "d".repeat(200), "é".repeat(100));

        let key = router.derive(&identifier, EventKind::Remove).unwrap();

        assert!(key.as_str().len() <= MAX_ROUTING_KEY_LEN);
        assert!(key.as_str().starts_with("v02.post.ddd"));
        assert!(key.as_str().ends_with(".remove"));
    }

    #[test]
    fn test_prefix_without_room_for_path_rejected() {
        let router = Router::with_prefix("p".repeat(260));

        let err = router.derive("/data/obs.csv", EventKind::Create).unwrap_err();

        assert!(matches!(err, PostError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_prefix_filling_key_exactly_rejected() {
        // prefix + '.' + ".create" leaves zero bytes for the path
        let router = Router::with_prefix("p".repeat(MAX_ROUTING_KEY_LEN - 8));

        assert!(router.derive("/a", EventKind::Create).is_err());
    }

    #[test]
    fn test_prefix_leaving_one_byte_keeps_key_within_limit() {
        let router = Router::with_prefix("p".repeat(MAX_ROUTING_KEY_LEN - 9));

        let key = router.derive("/abc", EventKind::Create).unwrap();

        assert_eq!(key.as_str().len(), MAX_ROUTING_KEY_LEN);
        assert!(key.as_str().ends_with(".a.create"));
    }

    #[test]
    fn test_multibyte_segment_that_cannot_fit_rejected() {
        let router = Router::with_prefix("p".repeat(MAX_ROUTING_KEY_LEN - 9));

        assert!(router.derive("/é", EventKind::Create).is_err());
    }
}
