use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use regex::Regex;

use crate::config::Config;
use crate::dictionary::Blacklists;
use crate::error::ConfigError;
use crate::response::Response;
use crate::utils::lstrip_once;

/// User-configured response exclusion policy. Kept apart from the wildcard
/// scanners: this is policy, they are learned at setup.
#[derive(Debug)]
pub struct ExclusionFilter {
    exclude_status_codes: HashSet<u16>,
    include_status_codes: HashSet<u16>,
    blacklists: Blacklists,
    exclude_sizes: HashSet<String>,
    minimum_response_size: usize,
    maximum_response_size: usize,
    exclude_texts: Vec<String>,
    exclude_regex: Option<Regex>,
    exclude_redirect: Option<String>,
    exclude_redirect_regex: Option<Regex>,
    filter_threshold: u32,
    hashes: Mutex<HashMap<u64, u32>>,
}

impl ExclusionFilter {
    pub fn new(config: &Config, blacklists: Blacklists) -> Result<Self, ConfigError> {
        let exclude_regex = config
            .exclude_regex
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()?;
        // the redirect pattern doubles as a plain substring, so a value that
        // fails to compile is still usable
        let exclude_redirect_regex = config
            .exclude_redirect
            .as_deref()
            .and_then(|pattern| Regex::new(pattern).ok());

        Ok(Self {
            exclude_status_codes: config.exclude_status_codes.clone(),
            include_status_codes: config.include_status_codes.clone(),
            blacklists,
            exclude_sizes: config.exclude_sizes.clone(),
            minimum_response_size: config.minimum_response_size,
            maximum_response_size: config.maximum_response_size,
            exclude_texts: config.exclude_texts.clone(),
            exclude_regex,
            exclude_redirect: config.exclude_redirect.clone(),
            exclude_redirect_regex,
            filter_threshold: config.filter_threshold,
            hashes: Mutex::new(HashMap::new()),
        })
    }

    /// Whether `response` should be suppressed.
    pub fn is_excluded(&self, response: &Response) -> bool {
        if self.exclude_status_codes.contains(&response.status) {
            return true;
        }

        if !self.include_status_codes.is_empty()
            && !self.include_status_codes.contains(&response.status)
        {
            return true;
        }

        if let Some(suffixes) = self.blacklists.get(&response.status) {
            if suffixes
                .iter()
                .any(|suffix| response.path.ends_with(lstrip_once(suffix, "/")))
            {
                return true;
            }
        }

        if self.exclude_sizes.contains(response.size().trim()) {
            return true;
        }

        let length = response.length();
        if length < self.minimum_response_size {
            return true;
        }
        if self.maximum_response_size > 0 && length > self.maximum_response_size {
            return true;
        }

        if self
            .exclude_texts
            .iter()
            .any(|text| response.content.contains(text.as_str()))
        {
            return true;
        }

        if let Some(pattern) = &self.exclude_regex {
            if pattern.is_match(&response.content) {
                return true;
            }
        }

        if let Some(pattern) = &self.exclude_redirect {
            if response.redirect.contains(pattern.as_str()) {
                return true;
            }
            if let Some(regex) = &self.exclude_redirect_regex {
                if regex.is_match(&response.redirect) {
                    return true;
                }
            }
        }

        if self.filter_threshold > 0 {
            let hashes = self.lock();
            if hashes
                .get(&response.fingerprint())
                .copied()
                .unwrap_or_default()
                >= self.filter_threshold
            {
                return true;
            }
        }

        false
    }

    /// Count a response that made it through every gate. Suppressed
    /// responses are never counted; the gate is a cause of future
    /// rejections, not a consequence.
    pub fn record(&self, response: &Response) {
        if self.filter_threshold == 0 {
            return;
        }
        let mut hashes = self.lock();
        *hashes.entry(response.fingerprint()).or_insert(0) += 1;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, u32>> {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
