//! Validates ref names and repository identifiers before they ever reach the ref store or the
//! filesystem, rejecting traversal, absolute paths, control characters, and encoded variants of
//! the same.

use crate::errors::GitError;

const DANGEROUS_SUBSTRINGS: &[&str] = &["//", "..", "@{", " ", "~", "^", ":"];

/// Validate and normalize a ref name per the Git ref-name rules used by this host.
///
/// A name is valid iff: non-empty; begins with `refs/` or equals `HEAD`; no path component
/// starts with `.`; none of `//`, `..`, `@{`, space, `~`, `^`, `:`; no control character; does
/// not end in `/` or `.lock`; carries no absolute-path marker or (possibly URL-encoded) traversal.
pub fn validate_ref_name(name: &str) -> Result<String, GitError> {
    if name.is_empty() {
        return Err(GitError::InvalidRefName("empty ref name".to_string()));
    }

    let decoded = percent_decode_twice(name);
    check_absolute(name, &decoded)?;
    check_traversal(&decoded, name)?;

    for ch in decoded.chars() {
        if (ch as u32) < 0x20 || ch as u32 == 0x7f {
            return Err(GitError::InvalidRefName(format!(
                "`{name}` contains a control character"
            )));
        }
    }

    for needle in DANGEROUS_SUBSTRINGS {
        if decoded.contains(needle) {
            return Err(GitError::InvalidRefName(format!(
                "`{name}` contains disallowed sequence `{needle}`"
            )));
        }
    }

    if decoded.ends_with('/') || decoded.ends_with(".lock") {
        return Err(GitError::InvalidRefName(format!(
            "`{name}` must not end in / or .lock"
        )));
    }

    let normalized = normalize(&decoded);

    if normalized != "HEAD" && !normalized.starts_with("refs/") {
        return Err(GitError::InvalidRefName(format!(
            "`{name}` must be HEAD or start with refs/"
        )));
    }

    for component in normalized.split('/') {
        if component.starts_with('.') {
            return Err(GitError::InvalidRefName(format!(
                "`{name}` has a component starting with `.`"
            )));
        }
    }

    Ok(normalized)
}

/// Validate a repository identifier: `[A-Za-z0-9_./-]+`, with a `.git` suffix stripped on
/// normalization, and the same traversal/absolute-path checks as ref names.
pub fn validate_repo_name(name: &str) -> Result<String, GitError> {
    if name.is_empty() {
        return Err(GitError::InvalidRefName("empty repository name".to_string()));
    }

    let decoded = percent_decode_twice(name);
    check_absolute(name, &decoded)?;
    check_traversal(&decoded, name)?;

    let normalized = normalize(&decoded);
    let stripped = normalized.strip_suffix(".git").unwrap_or(&normalized);

    if stripped.is_empty()
        || !stripped
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'))
    {
        return Err(GitError::InvalidRefName(format!(
            "`{name}` is not a valid repository identifier"
        )));
    }

    Ok(stripped.to_string())
}

fn check_traversal(decoded: &str, original: &str) -> Result<(), GitError> {
    if decoded.contains("..") {
        return Err(GitError::PathTraversal(original.to_string()));
    }
    Ok(())
}

fn check_absolute(original: &str, decoded: &str) -> Result<(), GitError> {
    let normalized_slashes = decoded.replace('\\', "/");
    let is_drive_letter = normalized_slashes.len() >= 2
        && normalized_slashes.as_bytes()[0].is_ascii_alphabetic()
        && normalized_slashes.as_bytes()[1] == b':';
    let lower_original = original.to_ascii_lowercase();
    if normalized_slashes.starts_with('/')
        || is_drive_letter
        || lower_original.contains("%2f")
        || lower_original.contains("%5c")
    {
        return Err(GitError::AbsolutePath(original.to_string()));
    }
    Ok(())
}

/// Backslashes become `/`, repeated `/` collapse, trailing `/` is stripped (except root), and
/// `.` path components are dropped.
fn normalize(input: &str) -> String {
    let unified = input.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        parts.push(segment);
    }
    parts.join("/")
}

/// Decode `%XX` percent-escapes up to twice, matching Git's defense against double-encoded
/// traversal sequences like `%252e%252e`.
fn percent_decode_twice(input: &str) -> String {
    percent_decode_once(&percent_decode_once(input))
}

fn percent_decode_once(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_positive_corpus() {
        for name in ["refs/heads/main", "refs/tags/v1.0", "HEAD"] {
            assert!(validate_ref_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_negative_corpus() {
        for name in [
            "refs/../x",
            "refs/heads/.x",
            "refs/heads/x..y",
            "refs/heads/x y",
            "refs/heads/x~y",
            "refs/heads/x.lock",
            "refs/heads/x/",
        ] {
            assert!(validate_ref_name(name).is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(validate_ref_name("refs/heads/x\0y").is_err());
    }

    #[test]
    fn rejects_colon() {
        assert!(validate_ref_name("refs/heads/x:y").is_err());
    }

    #[test]
    fn rejects_double_encoded_traversal() {
        assert!(validate_ref_name("refs/heads/%252e%252e/x").is_err());
    }

    #[test]
    fn rejects_absolute_and_unc_paths() {
        assert!(validate_ref_name("/refs/heads/main").is_err());
        assert!(validate_ref_name("C:/refs/heads/main").is_err());
        assert!(validate_ref_name("refs/heads/%2fetc%2fpasswd").is_err());
    }

    #[test]
    fn normalizes_repeated_slashes_and_strips_git_suffix() {
        assert_eq!(
            validate_repo_name("org/repo.git").unwrap(),
            "org/repo"
        );
        assert_eq!(validate_repo_name("org//repo").unwrap(), "org/repo");
    }
}
