// src/services/fetcher.rs

//! Rate-limited access to the source site.
//!
//! Every request to the source (listing page, feed, document) passes through
//! [`FeedFetcher`], which acquires a limiter token first. Feed bodies are
//! decoded by sniffing the actual encoding, since the registry serves
//! UTF-16LE regardless of the declared charset, and bare ampersands are
//! escaped so the XML parses.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::Result;
use crate::services::RateLimiter;
use crate::utils::http::SourceClient;

/// Entity references an XML parser resolves without a DTD.
static VALID_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:amp|lt|gt|quot|apos|#[0-9]+|#[xX][0-9A-Fa-f]+);")
        .expect("entity pattern is valid")
});

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Fetches raw and decoded content from the source site.
pub struct FeedFetcher {
    client: Arc<dyn SourceClient>,
    limiter: Arc<RateLimiter>,
}

impl FeedFetcher {
    pub fn new(client: Arc<dyn SourceClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { client, limiter }
    }

    /// Fetch raw bytes, waiting for a limiter token first.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.limiter.acquire().await;
        log::debug!("GET {}", url);
        self.client.get_bytes(url).await
    }

    /// Fetch an HTML listing page as text.
    pub async fn fetch_listing(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(decode_body(&bytes))
    }

    /// Fetch a feed, decode it and repair known well-formedness defects.
    pub async fn fetch_feed(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(repair_entities(&decode_body(&bytes)))
    }
}

/// Decode a response body by its actual encoding.
///
/// BOMs win; without one, a NUL byte in the first code unit marks UTF-16.
/// Anything else is decoded as UTF-8, replacing invalid sequences.
pub fn decode_body(bytes: &[u8]) -> String {
    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [first, 0x00, ..] if *first != 0 => decode_utf16(bytes, u16::from_le_bytes),
        [0x00, second, ..] if *second != 0 => decode_utf16(bytes, u16::from_be_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Escape `&` characters that do not start a valid entity reference.
///
/// CDATA sections are copied verbatim.
pub fn repair_entities(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() + 16);
    let mut rest = xml;

    while let Some(pos) = rest.find(['&', '<']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with(CDATA_OPEN) {
            let end = tail
                .find(CDATA_CLOSE)
                .map(|i| i + CDATA_CLOSE.len())
                .unwrap_or(tail.len());
            out.push_str(&tail[..end]);
            rest = &tail[end..];
        } else if tail.starts_with('&') {
            if VALID_ENTITY.is_match(&tail[1..]) {
                out.push('&');
            } else {
                out.push_str("&amp;");
            }
            rest = &tail[1..];
        } else {
            out.push('<');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
