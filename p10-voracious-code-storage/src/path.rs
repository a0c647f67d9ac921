//! Path syntax rules.
//!
//! Every path component is restricted to `[A-Za-z0-9._-]+`. A file path
//! never ends in `/`; a directory path may, and the root `/` is itself a
//! valid directory.

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[must_use]
pub fn is_valid_file_path(path: &str) -> bool {
    if path == "/" || !path.starts_with('/') {
        return false;
    }
    path[1..].split('/').all(is_valid_segment)
}

#[must_use]
pub fn is_valid_dir_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    let mut segments: Vec<&str> = rest.split('/').collect();
    if segments.last() == Some(&"") {
        segments.pop();
    }
    segments.iter().all(|s| is_valid_segment(s))
}

/// Mirrors the reference server: a dir argument only grows a trailing `/`
/// when it's missing one and the argument is longer than a single
/// character, so the bare root `/` is left untouched.
#[must_use]
pub fn normalize_dir(dir: &str) -> String {
    if !dir.ends_with('/') && dir.len() > 1 {
        format!("{dir}/")
    } else {
        dir.to_string()
    }
}

/// Strips an optional leading `r`/`R` then parses the remainder as a signed
/// integer, falling back to `0` (never a valid revision) on any parse
/// failure — including a specifier that starts with neither a marker nor a
/// digit.
#[must_use]
pub fn parse_revision(spec: &str) -> i64 {
    let stripped = spec.strip_prefix(|c: char| c == 'r' || c == 'R').unwrap_or(spec);
    stripped.parse().unwrap_or(0)
}
