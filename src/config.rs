use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Scan policy. Built once by the caller and never mutated after the scan
/// starts; the engine holds it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    pub urls: Vec<String>,
    pub wordlists: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub force_extensions: bool,
    pub overwrite_extensions: bool,
    pub exclude_extensions: Vec<String>,
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    /// Expand each candidate with backup/version/number mutations.
    pub mutation: bool,
    pub uppercase: bool,
    pub lowercase: bool,
    pub capitalization: bool,
    pub thread_count: usize,
    /// Statuses that make a discovered directory worth descending into.
    /// Consumed by recursion orchestration above a single scan.
    pub recursion_status_codes: HashSet<u16>,
    /// Suppress a response once its fingerprint has been seen this many
    /// times. 0 disables the gate.
    pub filter_threshold: u32,
    pub include_status_codes: HashSet<u16>,
    pub exclude_status_codes: HashSet<u16>,
    /// Human-readable sizes, e.g. `0B`, `2KB`.
    pub exclude_sizes: HashSet<String>,
    pub exclude_texts: Vec<String>,
    pub exclude_regex: Option<String>,
    pub exclude_redirect: Option<String>,
    /// Path whose response becomes an extra "known junk" baseline.
    pub exclude_response: Option<String>,
    pub no_wildcard: bool,
    pub minimum_response_size: usize,
    /// 0 means unlimited.
    pub maximum_response_size: usize,
    /// Whole-scan deadline in seconds; 0 means unlimited.
    pub max_time: u64,
    /// Per-target deadline in seconds; 0 means unlimited.
    pub target_max_time: u64,
    pub http_method: String,
    pub headers: HashMap<String, String>,
    pub follow_redirects: bool,
    /// Per-request timeout in seconds.
    pub timeout: f64,
    /// Sleep between requests per worker, in seconds.
    pub delay: f64,
    /// Global requests-per-second cap; 0 means unlimited.
    pub max_rate: u32,
    pub max_retries: usize,
    pub exit_on_error: bool,
    /// Engine flavor marker for callers that distinguish blocking and
    /// cooperative schedulers; this crate ships the cooperative one.
    pub async_mode: bool,
    pub user_agent: Option<String>,
    /// Basic credentials as `user:password`.
    pub auth: Option<String>,
    /// Request body sent with every request.
    pub data: Option<String>,
    /// Feed paths parsed out of matched responses back into the dictionary.
    pub crawl: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            wordlists: Vec::new(),
            extensions: Vec::new(),
            force_extensions: false,
            overwrite_extensions: false,
            exclude_extensions: Vec::new(),
            prefixes: Vec::new(),
            suffixes: Vec::new(),
            mutation: false,
            uppercase: false,
            lowercase: false,
            capitalization: false,
            thread_count: 25,
            recursion_status_codes: HashSet::new(),
            filter_threshold: 0,
            include_status_codes: HashSet::new(),
            exclude_status_codes: HashSet::new(),
            exclude_sizes: HashSet::new(),
            exclude_texts: Vec::new(),
            exclude_regex: None,
            exclude_redirect: None,
            exclude_response: None,
            no_wildcard: false,
            minimum_response_size: 0,
            maximum_response_size: 0,
            max_time: 0,
            target_max_time: 0,
            http_method: "GET".to_string(),
            headers: HashMap::new(),
            follow_redirects: false,
            timeout: 10.0,
            delay: 0.0,
            max_rate: 0,
            max_retries: 1,
            exit_on_error: false,
            async_mode: true,
            user_agent: None,
            auth: None,
            data: None,
            crawl: false,
        }
    }
}
