use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use chrono::Local;

use crate::settings::UNKNOWN;
use crate::utils::{clean_path, parse_path, readable_size, replace_from_all_encodings};

/// Normalized view of one HTTP exchange. Immutable once built; equality and
/// fingerprinting ignore everything that varies between otherwise identical
/// soft-404 pages.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after any followed redirects.
    pub url: String,
    pub status: u16,
    /// Header names are lowercased at construction.
    pub headers: HashMap<String, String>,
    /// Value of the Location header, or empty.
    pub redirect: String,
    /// Prior URLs in the redirect chain, oldest first.
    pub history: Vec<String>,
    /// Bounded raw body.
    pub body: Vec<u8>,
    /// Decoded text; empty when the body is binary.
    pub content: String,
    pub timestamp: String,
    /// Path plus query and fragment of `url`.
    pub full_path: String,
    /// `full_path` without query/fragment, slashes collapsed.
    pub path: String,
}

impl Response {
    pub fn new(
        url: String,
        status: u16,
        headers: HashMap<String, String>,
        redirect: String,
        history: Vec<String>,
        body: Vec<u8>,
        content: String,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .collect();
        let full_path = parse_path(&url);
        let path = clean_path(&full_path);
        Self {
            url,
            status,
            headers,
            redirect,
            history,
            body,
            content,
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            full_path,
            path,
        }
    }

    /// Header value by lowercase name, or empty.
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).map(String::as_str).unwrap_or_default()
    }

    /// First component of the Content-Type header.
    pub fn content_type(&self) -> &str {
        match self.headers.get("content-type") {
            Some(value) => value.split(';').next().unwrap_or(value).trim(),
            None => UNKNOWN,
        }
    }

    /// Content-Length when declared, otherwise the bytes actually read.
    pub fn length(&self) -> usize {
        self.headers
            .get("content-length")
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(self.body.len())
    }

    pub fn size(&self) -> String {
        readable_size(self.length())
    }

    /// Stable hash that clusters responses differing only by the echoed
    /// request path: the path (minus fragment) is stripped from the text in
    /// all common encodings before hashing.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.status.hash(&mut hasher);
        if self.content.is_empty() {
            self.body.hash(&mut hasher);
        } else {
            let echo = self.full_path.split('#').next().unwrap_or(&self.full_path);
            replace_from_all_encodings(&self.content, echo, "").hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        (self.status, &self.body, &self.redirect) == (other.status, &other.body, &other.redirect)
    }
}

impl Eq for Response {}
