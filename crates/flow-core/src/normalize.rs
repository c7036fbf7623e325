//! Path and slug normalization.
//!
//! All operations here are pure: same input always yields the same output,
//! with no I/O and no dependency on database state.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("slug invalid: {0}")]
    SlugInvalid(String),
    #[error("path invalid: {0}")]
    PathInvalid(String),
}

/// Trim, lowercase, and validate a slug against `[a-z0-9-]+`.
///
/// Rejects the empty string and slugs with a leading or trailing `-`.
pub fn normalize_slug(s: &str) -> Result<String, NormalizeError> {
    let trimmed = s.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(NormalizeError::SlugInvalid(s.to_string()));
    }
    if trimmed.starts_with('-') || trimmed.ends_with('-') {
        return Err(NormalizeError::SlugInvalid(s.to_string()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(NormalizeError::SlugInvalid(s.to_string()));
    }
    Ok(trimmed)
}

/// Split a `/`-delimited path into non-empty segments.
pub fn split_path(p: &str) -> Vec<String> {
    p.split('/')
        .map(str::trim)
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join two path fragments with a single `/`, trimming stray separators.
pub fn join_path(a: &str, b: &str) -> String {
    let a = a.trim_end_matches('/');
    let b = b.trim_start_matches('/');
    if a.is_empty() {
        b.to_string()
    } else if b.is_empty() {
        a.to_string()
    } else {
        format!("{a}/{b}")
    }
}

/// Join a sequence of slugs into a canonical `/`-joined path.
pub fn join_segments<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Translate a shell-style glob (`*`, `?`) into the engine's `GLOB` operator
/// form. `GLOB` already uses `*`/`?` with the same meaning as shell globs, so
/// this mostly validates and passes the pattern through, escaping `GLOB`'s
/// bracket-class metacharacter (`[`) when the caller did not intend a class.
pub fn glob_to_sql_pattern(g: &str) -> String {
    let mut out = String::with_capacity(g.len());
    for c in g.chars() {
        match c {
            '[' | ']' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_slug_accepts_valid() {
        assert_eq!(normalize_slug("Fix-Bug-123").unwrap(), "fix-bug-123");
        assert_eq!(normalize_slug("  spaced  ").unwrap(), "spaced");
    }

    #[test]
    fn normalize_slug_rejects_empty() {
        assert!(normalize_slug("").is_err());
        assert!(normalize_slug("   ").is_err());
    }

    #[test]
    fn normalize_slug_rejects_leading_trailing_dash() {
        assert!(normalize_slug("-bad").is_err());
        assert!(normalize_slug("bad-").is_err());
    }

    #[test]
    fn normalize_slug_rejects_invalid_chars() {
        assert!(normalize_slug("bad_slug").is_err());
        assert!(normalize_slug("bad slug").is_err());
        assert!(normalize_slug("bad.slug").is_err());
    }

    #[test]
    fn split_path_drops_empty_segments() {
        assert_eq!(
            split_path("//demo//inbox/fix-bug/"),
            vec!["demo", "inbox", "fix-bug"]
        );
    }

    #[test]
    fn join_path_trims_stray_separators() {
        assert_eq!(join_path("demo/", "/inbox"), "demo/inbox");
        assert_eq!(join_path("demo", "inbox"), "demo/inbox");
        assert_eq!(join_path("", "inbox"), "inbox");
        assert_eq!(join_path("demo", ""), "demo");
    }

    #[test]
    fn join_segments_joins_with_slash() {
        assert_eq!(join_segments(["demo", "inbox", "fix-bug"]), "demo/inbox/fix-bug");
    }

    #[test]
    fn glob_to_sql_pattern_passes_star_through() {
        assert_eq!(glob_to_sql_pattern("fix-*"), "fix-*");
    }
}
