use url::{Position, Url};

/// Human-readable size, e.g. `462B` or `2KB`. Exclusion-by-size policies
/// compare against this exact rendering.
pub fn readable_size(length: usize) -> String {
    let mut size = length as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.0}{unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.0}PB")
}

/// Null-byte sniff over the first chunk of a body.
pub fn is_binary(body: &[u8]) -> bool {
    body.iter().take(crate::settings::ITER_CHUNK_SIZE).any(|&b| b == 0)
}

/// Strip `prefix` once from the start of `s`, if present.
pub fn lstrip_once<'a>(s: &'a str, prefix: &str) -> &'a str {
    s.strip_prefix(prefix).unwrap_or(s)
}

/// Path, query and fragment portion of an absolute URL.
pub fn parse_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed[Position::BeforePath..].to_string(),
        Err(_) => url.to_string(),
    }
}

/// Drop the query and fragment, and collapse repeated slashes.
pub fn clean_path(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let mut out = String::with_capacity(end);
    let mut prev_slash = false;
    for ch in path[..end].chars() {
        if ch == '/' && prev_slash {
            continue;
        }
        prev_slash = ch == '/';
        out.push(ch);
    }
    out
}

/// Replace `target` and its common URL-encoded renderings inside `content`.
/// Soft-404 pages echo the requested path in varying encodings; without this
/// every one of them would fingerprint as unique.
pub fn replace_from_all_encodings(content: &str, target: &str, replacement: &str) -> String {
    if target.is_empty() {
        return content.to_string();
    }
    let form_encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    let variants = [
        target.to_string(),
        form_encoded.clone(),
        form_encoded.replace('+', "%20"),
        form_encoded.replace("%2F", "/"),
        form_encoded.replace('+', "%20").replace("%2F", "/"),
    ];
    let mut out = content.to_string();
    for variant in variants {
        if !variant.is_empty() {
            out = out.replace(&variant, replacement);
        }
    }
    out
}
