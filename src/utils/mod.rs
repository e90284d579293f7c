//! Utility functions and helpers.

pub mod http;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};
use url::Url;

/// Characters escaped inside one segment of an object URL.
const KEY_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Last non-empty path segment of a URL, percent-decoded.
///
/// Segments that decode to something unusable as a single key component
/// (a `/`, `.` or `..`) count as no filename.
pub fn filename_from_url(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let raw = url.path_segments()?.next_back()?;
    let name = percent_decode_str(raw).decode_utf8_lossy();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        None
    } else {
        Some(name.into_owned())
    }
}

/// Public URL of an object key under `base_url`, escaping each key segment.
pub fn object_url(base_url: &str, key: &str) -> String {
    let path = key
        .split('/')
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Object key for a document URL.
///
/// Derived from the document's filename so the same document always maps to
/// the same key. URLs without a filename fall back to a hash of the URL.
pub fn archive_key(prefix: &str, item_url: &str) -> String {
    match filename_from_url(item_url) {
        Some(name) => format!("{prefix}{name}"),
        None => {
            let digest = Sha256::digest(item_url.as_bytes());
            format!("{prefix}{}.bin", hex::encode(digest))
        }
    }
}

/// Read a query parameter from a (possibly relative) href.
pub fn query_param(base: &Url, href: &str, name: &str) -> Option<String> {
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
