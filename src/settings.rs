use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_ENCODING: &str = "utf-8";

/// Bytes reserved per read of a streamed response body.
pub const ITER_CHUNK_SIZE: usize = 4096;

/// Hard cap on how much of a response body is kept.
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

pub const UNKNOWN: &str = "unknown";

/// Placeholder inside a probe path that gets replaced with a random token.
pub const WILDCARD_TEST_POINT_MARKER: &str = "***";

/// Substitution token recognized in wordlists (matched case-insensitively).
pub const EXTENSION_TAG: &str = "%ext%";

pub const DEFAULT_TEST_PREFIXES: &[&str] = &[];
pub const DEFAULT_TEST_SUFFIXES: &[&str] = &["/"];

/// Extensions that are never replaced when overwriting extensions.
pub const EXCLUDE_OVERWRITE_EXTENSIONS: &[&str] =
    &["axd", "ashx", "asmx", "cgi", "dll", "json", "xml"];

/// A path ending in something that looks like a file extension.
pub static EXTENSION_RECOGNITION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+\.[a-zA-Z0-9]{2,5}$").unwrap());

/// How many redirect hops are followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Pause between attempts at a transiently failing request.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(750);

/// Probes issued while calibrating a wildcard baseline.
pub const BASELINE_PROBE_COUNT: usize = 2;

/// Length of the random token substituted for the wildcard marker.
pub const PROBE_TOKEN_LENGTH: usize = 12;
