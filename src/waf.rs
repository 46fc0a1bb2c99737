use std::collections::HashMap;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::response::Response;

/// Raw signature table as stored on disk: vendor to kind-of-page to regex.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
struct SignatureTable(HashMap<String, HashMap<String, String>>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Who produced a response, and whether a WAF sits in front of it.
#[derive(Debug, Clone, Serialize)]
pub struct WafVerdict {
    pub source: String,
    pub confidence: Confidence,
    pub trigger: Option<String>,
    pub waf_present: bool,
}

impl WafVerdict {
    fn new(source: &str, confidence: Confidence, trigger: Option<String>, waf_present: bool) -> Self {
        Self {
            source: source.to_string(),
            confidence,
            trigger,
            waf_present,
        }
    }
}

/// Rule-based classifier over response headers and body. Rules run top-down,
/// first match wins; infrastructure headers narrow the vendor before body
/// signatures decide block page vs. application error.
pub struct WafClassifier {
    rules: HashMap<String, HashMap<String, Regex>>,
}

impl Default for WafClassifier {
    fn default() -> Self {
        Self::from_json(include_str!("../db/waf_signatures.json"))
    }
}

impl WafClassifier {
    /// Load a signature table from disk. Unreadable or malformed tables
    /// degrade to header-only classification.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw),
            Err(_) => Self {
                rules: HashMap::new(),
            },
        }
    }

    fn from_json(raw: &str) -> Self {
        let table: SignatureTable = serde_json::from_str(raw).unwrap_or_default();
        let mut rules = HashMap::new();
        for (vendor, patterns) in table.0 {
            let mut compiled = HashMap::new();
            for (kind, pattern) in patterns {
                if let Ok(regex) = RegexBuilder::new(&pattern).case_insensitive(true).build() {
                    compiled.insert(kind, regex);
                }
            }
            rules.insert(vendor, compiled);
        }
        Self { rules }
    }

    /// Identity of whatever answered, or `None` for an unremarkable origin.
    pub fn detect(&self, response: &Response) -> Option<String> {
        let verdict = self.analyze(response);
        (verdict.source != "Unknown").then_some(verdict.source)
    }

    pub fn analyze(&self, response: &Response) -> WafVerdict {
        let body = if response.content.is_empty() {
            String::from_utf8_lossy(&response.body).into_owned()
        } else {
            response.content.clone()
        };
        let server = response.header("server").to_lowercase();

        let cloudflare_infra =
            server.contains("cloudflare") || response.headers.contains_key("cf-ray");
        if cloudflare_infra {
            if let Some(hit) = self.body_match("Cloudflare", "block", &body) {
                return WafVerdict::new(
                    "Cloudflare WAF",
                    Confidence::High,
                    Some(format!("Body: {hit}")),
                    true,
                );
            }
            if let Some(hit) = self.body_match("Cloudflare", "app_error", &body) {
                return WafVerdict::new(
                    "Cloudflare (App Logic)",
                    Confidence::High,
                    Some(format!("Body: {hit}")),
                    true,
                );
            }
            return WafVerdict::new(
                "Cloudflare",
                Confidence::Medium,
                Some("Header: Server: cloudflare".to_string()),
                true,
            );
        }

        let aws_infra = response.header("via").to_lowercase().contains("cloudfront")
            || response.headers.contains_key("x-amz-cf-id")
            || server.contains("awselb")
            || response.headers.contains_key("x-amzn-errortype");
        if aws_infra {
            if response.header("x-amzn-errortype") == "ForbiddenException"
                || self.body_match("AWS", "block", &body).is_some()
            {
                return WafVerdict::new(
                    "AWS WAF",
                    Confidence::High,
                    Some("AWS Block Signature".to_string()),
                    true,
                );
            }
            if self.body_match("AWS", "app_error", &body).is_some() {
                return WafVerdict::new(
                    "AWS (App Logic)",
                    Confidence::High,
                    Some("AWS App Signature".to_string()),
                    true,
                );
            }
            return WafVerdict::new(
                "AWS/CloudFront",
                Confidence::Medium,
                Some("AWS Infrastructure Header".to_string()),
                true,
            );
        }

        if server.contains("nginx") {
            if self.body_match("Nginx", "stock", &body).is_some()
                || (body.len() < 200 && body.to_lowercase().contains("403 forbidden"))
            {
                return WafVerdict::new(
                    "Nginx (Server Block)",
                    Confidence::High,
                    Some("Nginx Stock Page".to_string()),
                    false,
                );
            }
            return WafVerdict::new(
                "Nginx (App Logic)",
                Confidence::Medium,
                Some("Nginx Header + Custom Body".to_string()),
                false,
            );
        }

        if server.contains("apache") {
            if self.body_match("Apache", "stock", &body).is_some()
                || (body.len() < 200 && body.to_lowercase().contains("forbidden"))
            {
                return WafVerdict::new(
                    "Apache (Server Block)",
                    Confidence::High,
                    Some("Apache Stock Page".to_string()),
                    false,
                );
            }
            return WafVerdict::new(
                "Apache (App Logic)",
                Confidence::Medium,
                Some("Apache Header + Custom Body".to_string()),
                false,
            );
        }

        if let Some(hit) = self.body_match("Generic", "block", &body) {
            return WafVerdict::new(
                "Generic WAF",
                Confidence::Medium,
                Some(format!("Body: {hit}")),
                true,
            );
        }

        if response.header("x-cdn").to_lowercase().contains("incapsula") {
            return WafVerdict::new(
                "Incapsula",
                Confidence::High,
                Some("Header: X-CDN: Incapsula".to_string()),
                true,
            );
        }

        if server.contains("iis") {
            return WafVerdict::new(
                "IIS",
                Confidence::High,
                Some("Header: Server: iis".to_string()),
                false,
            );
        }
        if server.contains("sucuri") {
            return WafVerdict::new(
                "Sucuri",
                Confidence::High,
                Some("Header: Server: sucuri".to_string()),
                true,
            );
        }
        if server.contains("akamai") {
            return WafVerdict::new(
                "Akamai",
                Confidence::High,
                Some("Header: Server: akamai".to_string()),
                true,
            );
        }

        WafVerdict::new("Unknown", Confidence::Low, None, false)
    }

    fn body_match(&self, vendor: &str, kind: &str, body: &str) -> Option<String> {
        let regex = self.rules.get(vendor)?.get(kind)?;
        regex.find(body).map(|hit| hit.as_str().to_string())
    }
}
