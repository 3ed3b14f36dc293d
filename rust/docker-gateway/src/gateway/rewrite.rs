//! Mapping of public request paths onto control-socket paths.

/// Strip `prefix` from `path`, returning the backend path.
///
/// The prefix must match a whole path segment: `/docker-api` and
/// `/docker-api/...` match, `/docker-apix` does not. One trailing slash is
/// dropped unless the result is the root path. A path ending in `//` is left
/// alone so that rewriting an already rewritten path is the identity.
pub fn strip_mount_prefix(prefix: &str, path: &str) -> Option<String> {
    let rest = path.strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }

    let rest = if rest.is_empty() { "/" } else { rest };
    let trimmed = match rest.strip_suffix('/') {
        Some(head) if !head.is_empty() && !head.ends_with('/') => head,
        _ => rest,
    };
    Some(trimmed.to_string())
}

/// Build the backend `path?query` for a request.
///
/// The query is appended verbatim; it is never parsed or re-encoded.
pub fn rewrite_path_and_query(prefix: &str, path: &str, query: Option<&str>) -> Option<String> {
    let mut rewritten = strip_mount_prefix(prefix, path)?;
    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    Some(rewritten)
}
