use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::response::Response;
use crate::utils::lstrip_once;

static HTML_ATTR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:href|src|action)=["']([^"'<>]+)["']"#).unwrap());
static ROOT_PATH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"](/[a-zA-Z0-9\-._~!$&*+,;=:@?%/]+)['"]"#).unwrap());
static SUBDIR_PATH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"]([a-zA-Z0-9\-._~!$&*+,;=:@?%]+(?:/[a-zA-Z0-9\-._~!$&*+,;=:@?%]+)+)['"]"#)
        .unwrap()
});
static FILE_PATH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"['"]([a-zA-Z0-9\-._~!$&*+,;=:@?%]+\.(?:json|xml|php|asp|aspx|jsp|html|htm|js|css|map|txt|conf|config|sql|db|bak|old))['"]"#,
    )
    .unwrap()
});
static ROBOTS_RULE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^(?:allow|disallow):\s*(\S+)").unwrap());
static SCHEME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").unwrap());

const MEDIA_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".woff", ".woff2", ".ttf", ".eot",
    ".mp3", ".mp4", ".webm",
];

const MIME_LOOKALIKES: &[&str] = &["application/json", "text/html", "text/plain"];

/// Extract candidate paths in scope of the response's host, for feeding back
/// into the dictionary. Dispatches on content type: HTML attributes,
/// JavaScript string literals, robots.txt rules, or plain-text URLs.
pub fn crawl(response: &Response) -> HashSet<String> {
    let scope = scope_of(&response.url);
    let content_type = response.content_type().to_string();

    let found = if content_type.contains("text/html") {
        html_crawl(&scope, &response.content)
    } else if content_type.contains("javascript") || response.path.ends_with(".js") {
        js_crawl(&scope, &response.content)
    } else if response.path.ends_with("robots.txt") {
        robots_crawl(&response.content)
    } else {
        text_crawl(&scope, &response.content)
    };

    found
        .into_iter()
        .map(|path| lstrip_once(&path, "/").to_string())
        .filter(|path| !path.is_empty() && !is_media(path))
        .collect()
}

/// `scheme://host/` portion of a URL.
fn scope_of(url: &str) -> String {
    let mut parts = url.splitn(4, '/');
    let scheme = parts.next().unwrap_or_default();
    let host = parts.nth(1).unwrap_or_default();
    format!("{scheme}//{host}/")
}

fn html_crawl(scope: &str, content: &str) -> HashSet<String> {
    let mut results = HashSet::new();
    for captures in HTML_ATTR_REGEX.captures_iter(content) {
        let value = &captures[1];
        if let Some(stripped) = value.strip_prefix(scope) {
            results.insert(stripped.to_string());
        } else if value.starts_with('/') {
            results.insert(value.to_string());
        } else if !SCHEME_REGEX.is_match(value) && !value.starts_with('#') {
            results.insert(value.to_string());
        }
    }
    results
}

fn js_crawl(scope: &str, content: &str) -> HashSet<String> {
    let mut results = HashSet::new();

    if let Ok(in_scope) = Regex::new(&format!(
        "{}[a-zA-Z0-9\\-._~!$&*+,;=:@?%/]+",
        regex::escape(scope)
    )) {
        for hit in in_scope.find_iter(content) {
            results.insert(hit.as_str()[scope.len()..].to_string());
        }
    }

    for captures in ROOT_PATH_REGEX.captures_iter(content) {
        results.insert(captures[1].to_string());
    }

    for captures in SUBDIR_PATH_REGEX.captures_iter(content) {
        let value = &captures[1];
        if !MIME_LOOKALIKES.contains(&value) {
            results.insert(value.to_string());
        }
    }

    for captures in FILE_PATH_REGEX.captures_iter(content) {
        results.insert(captures[1].to_string());
    }

    results
}

fn text_crawl(scope: &str, content: &str) -> HashSet<String> {
    let mut results = HashSet::new();
    if let Ok(in_scope) = Regex::new(&format!(
        "{}[a-zA-Z0-9\\-._~!$&*+,;=:@?%/]+",
        regex::escape(scope)
    )) {
        for hit in in_scope.find_iter(content) {
            results.insert(hit.as_str()[scope.len()..].to_string());
        }
    }
    results
}

fn robots_crawl(content: &str) -> HashSet<String> {
    ROBOTS_RULE_REGEX
        .captures_iter(content)
        .map(|captures| captures[1].to_string())
        .collect()
}

fn is_media(path: &str) -> bool {
    let cleaned = path.split(['?', '#']).next().unwrap_or(path).to_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .any(|extension| cleaned.ends_with(extension))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn response(url: &str, content_type: &str, body: &str) -> Response {
        let mut headers = HashMap::new();
        if !content_type.is_empty() {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        Response::new(
            url.to_string(),
            200,
            headers,
            String::new(),
            Vec::new(),
            body.as_bytes().to_vec(),
            body.to_string(),
        )
    }

    #[test]
    fn html_links_in_scope_are_extracted() {
        let body = r#"
            <a href="/admin/panel">admin</a>
            <script src="http://h/static/app.js"></script>
            <a href="docs/readme.html">docs</a>
            <a href="https://elsewhere.example/out">out</a>
            <img src="/logo.png">
        "#;
        let found = crawl(&response("http://h/index", "text/html", body));

        assert!(found.contains("admin/panel"));
        assert!(found.contains("static/app.js"));
        assert!(found.contains("docs/readme.html"));
        assert!(!found.iter().any(|path| path.contains("elsewhere")));
        // media is dropped
        assert!(!found.contains("logo.png"));
    }

    #[test]
    fn js_string_literals_are_extracted() {
        let body = r#"
            fetch("/api/v1/users");
            const page = "admin/settings";
            const mime = "application/json";
            load("backup.sql");
        "#;
        let found = crawl(&response("http://h/app.js", "application/javascript", body));

        assert!(found.contains("api/v1/users"));
        assert!(found.contains("admin/settings"));
        assert!(found.contains("backup.sql"));
        assert!(!found.contains("application/json"));
    }

    #[test]
    fn robots_rules_are_extracted() {
        let body = "User-agent: *\nDisallow: /private/\nAllow: /public/index.html\n";
        let found = crawl(&response("http://h/robots.txt", "text/plain", body));

        assert!(found.contains("private/"));
        assert!(found.contains("public/index.html"));
    }

    #[test]
    fn plain_text_keeps_only_in_scope_urls() {
        let body = "see http://h/hidden/page and http://other/else";
        let found = crawl(&response("http://h/readme", "text/plain", body));

        assert!(found.contains("hidden/page"));
        assert_eq!(found.len(), 1);
    }
}
