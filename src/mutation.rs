use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"v(\d+)").unwrap());
static NUMBER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").unwrap());

const BACKUP_SUFFIXES: &[&str] = &[".bak", ".old", "~", ".swp", ".tmp"];
const DEBUG_SUFFIXES: &[&str] = &["/debug", "/test", "/admin"];

/// Neighboring paths worth probing once `path` itself is a candidate:
/// adjacent versions and numbers, backup copies, sibling extensions for a
/// few well-known server-side languages, and debug endpoints. The input
/// itself is never part of the result, and the result is sorted so the
/// candidate stream stays deterministic.
pub fn mutate(path: &str) -> Vec<String> {
    let mut mutations = BTreeSet::new();

    if path.contains('v') {
        mutations.insert(shift_numbers(&VERSION_REGEX, path, 1, "v"));
        mutations.insert(shift_numbers(&VERSION_REGEX, path, -1, "v"));
    }

    mutations.insert(shift_numbers(&NUMBER_REGEX, path, 1, ""));
    mutations.insert(shift_numbers(&NUMBER_REGEX, path, -1, ""));

    for suffix in BACKUP_SUFFIXES {
        mutations.insert(format!("{path}{suffix}"));
    }

    if let Some((base, extension)) = path.rsplit_once('.') {
        match extension {
            "php" => {
                mutations.insert(format!("{base}.phps"));
                mutations.insert(format!("{base}.php.bak"));
                mutations.insert(format!("{base}.php.old"));
            }
            "jsp" => {
                mutations.insert(format!("{base}.jsp.bak"));
                mutations.insert(format!("{base}.jspx"));
            }
            "asp" => {
                mutations.insert(format!("{base}.aspx"));
            }
            "aspx" => {
                mutations.insert(format!("{base}.asp"));
            }
            _ => {}
        }
    }

    if !path.ends_with('/') {
        for suffix in DEBUG_SUFFIXES {
            mutations.insert(format!("{path}{suffix}"));
        }
    }

    mutations.remove(path);
    mutations.into_iter().collect()
}

fn shift_numbers(pattern: &Regex, path: &str, delta: i64, keep: &str) -> String {
    pattern
        .replace_all(path, |caps: &Captures<'_>| match caps[1].parse::<i64>() {
            Ok(n) => format!("{keep}{}", (n + delta).max(0)),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}
