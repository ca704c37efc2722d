//! Permission paths and matchers.
//!
//! A permission names a resource path inside an application. The same
//! permission has three textual forms:
//!
//! - full: `perm://{app_id}/{path}?{query}`
//! - compact: `{app_id}/{path}?{query}`
//! - scoped: `/{path}?{query}`, with the app id implied by context
//!
//! Paths are `/`-separated segments of `[A-Za-z0-9_-]`. Matchers may also
//! use `*` inside a segment and a trailing `**` segment that covers one or
//! more further segments.

use std::fmt;
use thiserror::Error;

pub const PERMISSION_SCHEME: &str = "perm";

const MULTI_SEGMENT_WILDCARD: &str = "**";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("invalid application id: {0}")]
    InvalidAppId(String),

    #[error("invalid permission path: {0}")]
    InvalidPath(String),

    #[error("invalid permission scheme: {0}")]
    InvalidScheme(String),
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(is_segment_char)
}

fn is_valid_matcher_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.contains(MULTI_SEGMENT_WILDCARD)
        && segment.chars().all(|c| is_segment_char(c) || c == '*')
}

fn segments(s: &str) -> Option<Vec<&str>> {
    s.strip_prefix('/').map(|rest| rest.split('/').collect())
}

/// True iff `s` is a concrete path: `/`-prefixed, no empty segments, no
/// trailing slash, no wildcards.
pub fn is_valid_path(s: &str) -> bool {
    segments(s).is_some_and(|segs| segs.iter().all(|seg| is_valid_segment(seg)))
}

/// True iff `s` is a valid matcher. `**` is only accepted as the final
/// segment of a matcher with at least one other segment.
pub fn is_valid_matcher(s: &str) -> bool {
    let Some(segs) = segments(s) else {
        return false;
    };
    let last = segs.len() - 1;
    segs.iter().enumerate().all(|(i, seg)| {
        if *seg == MULTI_SEGMENT_WILDCARD {
            i == last && last > 0
        } else {
            is_valid_matcher_segment(seg)
        }
    })
}

/// Match a concrete `candidate` path against `matcher`.
///
/// A trailing `/**` requires at least one segment past the prefix, so
/// `/abc/**` does not match `/abc`.
pub fn test(candidate: &str, matcher: &str) -> bool {
    if !is_valid_path(candidate) || !is_valid_matcher(matcher) {
        return false;
    }

    let candidate: Vec<&str> = candidate[1..].split('/').collect();
    let mut pattern: Vec<&str> = matcher[1..].split('/').collect();

    if pattern.last() == Some(&MULTI_SEGMENT_WILDCARD) {
        pattern.pop();
        if candidate.len() <= pattern.len() {
            return false;
        }
    } else if candidate.len() != pattern.len() {
        return false;
    }

    pattern
        .iter()
        .zip(candidate.iter())
        .all(|(p, c)| segment_matches(c, p))
}

/// Glob match within one segment; `*` matches any run of characters.
fn segment_matches(candidate: &str, pattern: &str) -> bool {
    let c = candidate.as_bytes();
    let p = pattern.as_bytes();
    let (mut ci, mut pi) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ci < c.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            pi += 1;
            mark = ci;
        } else if pi < p.len() && p[pi] == c[ci] {
            ci += 1;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ci = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// A parsed permission: application id, matcher path and optional query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    app_id: String,
    path: String,
    query: Option<String>,
}

impl Permission {
    pub fn new(
        app_id: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
    ) -> Result<Self, PermissionError> {
        let app_id = app_id.into();
        let path = path.into();

        if !is_valid_segment(&app_id) {
            return Err(PermissionError::InvalidAppId(app_id));
        }
        if !is_valid_matcher(&path) {
            return Err(PermissionError::InvalidPath(path));
        }

        Ok(Self {
            app_id,
            path,
            query,
        })
    }

    /// Parse `perm://appId/path?query`.
    pub fn parse_full(s: &str) -> Result<Self, PermissionError> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| PermissionError::InvalidScheme(s.to_string()))?;
        if scheme != PERMISSION_SCHEME {
            return Err(PermissionError::InvalidScheme(scheme.to_string()));
        }
        Self::parse_compact(rest)
    }

    /// Parse `appId/path?query`.
    pub fn parse_compact(s: &str) -> Result<Self, PermissionError> {
        let idx = s
            .find('/')
            .ok_or_else(|| PermissionError::InvalidPath(s.to_string()))?;
        Self::parse_scoped(&s[idx..], &s[..idx])
    }

    /// Parse `/path?query` for the application `app_id`.
    pub fn parse_scoped(s: &str, app_id: &str) -> Result<Self, PermissionError> {
        let (path, query) = match s.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (s, None),
        };
        Self::new(app_id, path, query)
    }

    /// Parse any of the three forms; scoped strings take `default_app_id`.
    pub fn parse(s: &str, default_app_id: &str) -> Result<Self, PermissionError> {
        if s.contains("://") {
            Self::parse_full(s)
        } else if s.starts_with('/') {
            Self::parse_scoped(s, default_app_id)
        } else {
            Self::parse_compact(s)
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn to_full(&self) -> String {
        format!("{}://{}", PERMISSION_SCHEME, self.to_compact())
    }

    pub fn to_compact(&self) -> String {
        format!("{}{}", self.app_id, self.to_scoped())
    }

    pub fn to_scoped(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_compact())
    }
}

/// Keep the entries of `permissions` that belong to `app_id`.
///
/// Scoped entries are read as belonging to `default_app_id`.
pub fn filter_for_app<'a, I>(
    permissions: I,
    default_app_id: &str,
    app_id: &str,
) -> Result<Vec<Permission>, PermissionError>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut filtered = Vec::new();
    for entry in permissions {
        let permission = Permission::parse(entry, default_app_id)?;
        if permission.app_id == app_id {
            filtered.push(permission);
        }
    }
    Ok(filtered)
}

/// Whether any scoped matcher in `scoped` grants the concrete `path`.
pub fn matches_any<S: AsRef<str>>(scoped: &[S], path: &str) -> bool {
    scoped.iter().any(|m| {
        let matcher = m.as_ref();
        let matcher = matcher.split_once('?').map_or(matcher, |(p, _)| p);
        test(path, matcher)
    })
}
