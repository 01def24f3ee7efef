//! Resource identifier grammar and the HTTP path <-> RID mapping.
//!
//! A RID is a dot-separated list of non-empty parts (`users.42`). On the
//! HTTP side the same resource is addressed by a slash-separated path under
//! the configured API prefix (`/api/users/42`, or `/api/users.42`). Path
//! segments are percent-decoded before joining; `rid_to_path` is the inverse
//! and percent-encodes each part.

use std::borrow::Cow;

/// Which validity rules to apply to a RID-shaped string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RidGrammar {
    /// A resource named directly in a path. May carry a `?query` suffix.
    Resource,
    /// An action name appended to a resource path. No query suffix.
    Action,
}

/// Checks `rid` against the given grammar.
///
/// Every character before an optional `?` must be printable ASCII other
/// than `*` and `>`, and no dot-separated part may be empty. Characters
/// after the `?` are not checked.
#[must_use]
pub fn is_valid_rid(rid: &str, grammar: RidGrammar) -> bool {
    let mut part_start = true;
    for c in rid.chars() {
        if c == '?' {
            return grammar == RidGrammar::Resource && !part_start;
        }
        if !('!'..='~').contains(&c) || c == '*' || c == '>' {
            return false;
        }
        if c == '.' {
            if part_start {
                return false;
            }
            part_start = true;
        } else {
            part_start = false;
        }
    }
    !part_start
}

/// Strips `prefix` from `path` and splits the remainder into decoded segments.
///
/// Returns `None` when the path is outside the prefix, is exactly the
/// prefix, or contains a malformed percent escape.
fn decoded_segments(path: &str, prefix: &str) -> Option<Vec<String>> {
    let rest = path.strip_prefix(prefix)?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    if rest.is_empty() {
        return None;
    }
    rest.split('/').map(percent_decode).collect()
}

fn with_query(mut rid: String, query: &str) -> String {
    if !query.is_empty() {
        rid.push('?');
        rid.push_str(query);
    }
    rid
}

/// Maps a request path and raw query string onto a RID.
///
/// `/api/users/42` and `/api/users.42` both map to `users.42` with prefix
/// `/api/`. The result is not validated; run it through [`is_valid_rid`].
#[must_use]
pub fn path_to_rid(path: &str, query: &str, prefix: &str) -> Option<String> {
    let segments = decoded_segments(path, prefix)?;
    Some(with_query(segments.join("."), query))
}

/// Maps a request path onto a `(rid, action)` pair, where the action is the
/// final path segment.
///
/// Returns `None` if the path has fewer than two segments below the prefix.
#[must_use]
pub fn path_to_rid_action(path: &str, query: &str, prefix: &str) -> Option<(String, String)> {
    let mut segments = decoded_segments(path, prefix)?;
    if segments.len() < 2 {
        return None;
    }
    let action = segments.pop()?;
    Some((with_query(segments.join("."), query), action))
}

/// Renders the path under `prefix` that addresses `rid`.
///
/// Each dot-separated part becomes one percent-encoded path segment; a query
/// suffix is carried over unchanged.
#[must_use]
pub fn rid_to_path(rid: &str, prefix: &str) -> String {
    if rid.is_empty() {
        return String::new();
    }
    let (name, query) = match rid.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rid, None),
    };

    let mut out = String::with_capacity(prefix.len() + rid.len());
    out.push_str(prefix);
    for (i, part) in name.split('.').enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&urlencoding::encode(part));
    }
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Checks that every `%` starts a complete two-digit hex escape.
///
/// `urlencoding::decode` passes malformed escapes through untouched, so they
/// are rejected here first.
fn escapes_are_well_formed(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.iter().enumerate().all(|(i, &b)| {
        b != b'%'
            || matches!(
                (bytes.get(i + 1), bytes.get(i + 2)),
                (Some(hi), Some(lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
    })
}

/// Decodes `%XX` escapes in a single path segment.
///
/// Returns `None` for truncated or non-hex escapes and for byte sequences
/// that do not decode to UTF-8.
fn percent_decode(segment: &str) -> Option<String> {
    if !escapes_are_well_formed(segment) {
        return None;
    }
    urlencoding::decode(segment).ok().map(Cow::into_owned)
}
