//! URL and path helpers for module addressing.
//!
//! Served URLs may carry an HMR timestamp marker (`?t=1700000000000`) or an
//! import marker (`?import`). Both are stripped before a URL is used as a key.

use crate::config::GraphConfig;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Byte that marks a module id as virtual (never backed by a file).
pub const VIRTUAL_MARKER: char = '\0';

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bt=\d{13}&?\b").expect("valid timestamp regex"))
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\?|&)import=?(?:&|$)").expect("valid import regex"))
}

fn trim_dangling_separator(url: &str) -> String {
    url.strip_suffix(['?', '&']).unwrap_or(url).to_string()
}

/// Remove the HMR timestamp marker from a URL.
#[must_use]
pub fn remove_timestamp_query(url: &str) -> String {
    trim_dangling_separator(&timestamp_re().replace(url, ""))
}

/// Remove the `import` marker from a URL.
#[must_use]
pub fn remove_import_query(url: &str) -> String {
    trim_dangling_separator(&import_re().replace(url, "$1"))
}

/// Strip both the timestamp and the import markers.
#[must_use]
pub fn strip_markers(url: &str) -> String {
    remove_import_query(&remove_timestamp_query(url))
}

/// Drop everything from the first `?` or `#`.
#[must_use]
pub fn clean_url(url: &str) -> &str {
    match url.find(['?', '#']) {
        Some(pos) => &url[..pos],
        None => url,
    }
}

/// The query (and fragment) part of a URL, including the leading `?`/`#`.
#[must_use]
pub fn query_suffix(url: &str) -> &str {
    &url[clean_url(url).len()..]
}

/// Extension of the last path segment, including the dot. Empty when the
/// segment has no extension or is a dot-file.
#[must_use]
pub fn extname(path: &str) -> &str {
    let segment_start = path.rfind('/').map_or(0, |pos| pos + 1);
    let segment = &path[segment_start..];
    match segment.rfind('.') {
        Some(0) | None => "",
        Some(dot) => &segment[dot..],
    }
}

/// Whether a URL or id names a virtual module.
#[must_use]
pub fn is_virtual(url: &str, config: &GraphConfig) -> bool {
    url.contains(VIRTUAL_MARKER)
        || config
            .virtual_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
}

/// Whether the URL points at a stylesheet, regardless of query.
#[must_use]
pub fn is_css_request(url: &str, config: &GraphConfig) -> bool {
    let ext = extname(clean_url(url));
    !ext.is_empty()
        && config
            .style_extensions
            .iter()
            .any(|candidate| candidate == &ext[1..])
}

/// Whether the URL is a direct stylesheet request (`/a.css?direct`).
#[must_use]
pub fn is_direct_css_request(url: &str, config: &GraphConfig) -> bool {
    if !is_css_request(url, config) {
        return false;
    }
    let query = query_suffix(url);
    let query = clean_fragment(query);
    query
        .trim_start_matches('?')
        .split('&')
        .any(|param| param == "direct" || param.starts_with("direct="))
}

fn clean_fragment(query: &str) -> &str {
    match query.find('#') {
        Some(pos) => &query[..pos],
        None => query,
    }
}

/// Splice the extension of `resolved_id` into `url` when the two disagree.
///
/// A request for `/src/App` that resolves to `/root/src/App.vue` becomes
/// `/src/App.vue`, so both spellings converge on one node. The extension is
/// inserted before any remaining query string.
#[must_use]
pub fn reconcile_extension(url: &str, resolved_id: &str, config: &GraphConfig) -> String {
    if url == resolved_id || is_virtual(url, config) {
        return url.to_string();
    }
    let ext = extname(clean_url(resolved_id));
    if ext.is_empty() {
        return url.to_string();
    }
    let pathname = clean_url(url);
    if pathname.ends_with(ext) {
        return url.to_string();
    }
    format!("{pathname}{ext}{}", query_suffix(url))
}

/// Normalize a file path to forward slashes with `.` and `..` resolved.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let trailing = path.len() > 1 && path.ends_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let mut out = parts.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    if out.is_empty() {
        out.push('.');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_timestamp_query() {
        assert_eq!(remove_timestamp_query("/src/a.ts?t=1700000000000"), "/src/a.ts");
        assert_eq!(
            remove_timestamp_query("/src/a.ts?t=1700000000000&lang.css"),
            "/src/a.ts?lang.css"
        );
        assert_eq!(
            remove_timestamp_query("/src/a.vue?vue&t=1700000000000"),
            "/src/a.vue?vue"
        );
        // Only HMR-shaped timestamps count.
        assert_eq!(remove_timestamp_query("/src/a.ts?t=12"), "/src/a.ts?t=12");
    }

    #[test]
    fn test_remove_import_query() {
        assert_eq!(remove_import_query("/src/logo.svg?import"), "/src/logo.svg");
        assert_eq!(remove_import_query("/src/a.css?import&inline"), "/src/a.css?inline");
        assert_eq!(remove_import_query("/src/a.css?inline&import"), "/src/a.css?inline");
        assert_eq!(remove_import_query("/src/a.css?imports"), "/src/a.css?imports");
    }

    #[test]
    fn test_strip_markers_both() {
        assert_eq!(
            strip_markers("/src/a.css?import&t=1700000000000"),
            "/src/a.css"
        );
    }

    #[test]
    fn test_clean_url_and_query() {
        assert_eq!(clean_url("/a.vue?vue&type=style#x"), "/a.vue");
        assert_eq!(query_suffix("/a.vue?vue&type=style"), "?vue&type=style");
        assert_eq!(query_suffix("/a.vue"), "");
    }

    #[test]
    fn test_extname() {
        assert_eq!(extname("/src/App.vue"), ".vue");
        assert_eq!(extname("/src/archive.tar.gz"), ".gz");
        assert_eq!(extname("/src/.env"), "");
        assert_eq!(extname("/src.d/App"), "");
    }

    #[test]
    fn test_reconcile_extension() {
        let config = GraphConfig::default();
        assert_eq!(
            reconcile_extension("/src/App", "/root/src/App.vue", &config),
            "/src/App.vue"
        );
        assert_eq!(
            reconcile_extension("/src/App?raw", "/root/src/App.vue?raw", &config),
            "/src/App.vue?raw"
        );
        assert_eq!(
            reconcile_extension("/src/App.vue", "/root/src/App.vue", &config),
            "/src/App.vue"
        );
        assert_eq!(
            reconcile_extension("virtual:env", "/root/env.js", &config),
            "virtual:env"
        );
        assert_eq!(
            reconcile_extension("\0plugin", "/root/plugin.js", &config),
            "\0plugin"
        );
    }

    #[test]
    fn test_direct_css_request() {
        let config = GraphConfig::default();
        assert!(is_direct_css_request("/src/a.css?direct", &config));
        assert!(is_direct_css_request("/src/a.scss?x=1&direct", &config));
        assert!(!is_direct_css_request("/src/a.css", &config));
        assert!(!is_direct_css_request("/src/a.css?directory", &config));
        assert!(!is_direct_css_request("/src/a.ts?direct", &config));
        assert!(is_css_request("/src/a.css?inline", &config));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/root//src/./a.css"), "/root/src/a.css");
        assert_eq!(normalize_path("/root/src/../b.css"), "/root/b.css");
        assert_eq!(normalize_path(r"C:\proj\src\a.css"), "C:/proj/src/a.css");
        assert_eq!(normalize_path("../x/./y"), "../x/y");
    }
}
