use thiserror::Error;

/// A request that could not produce a usable response.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error("certificate rejected: {0}")]
    CertificateRejected(String),

    #[error("http protocol error: {0}")]
    Protocol(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last: String,
    },
}

impl RequestError {
    /// Whether another attempt at the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Tls(_)
        )
    }
}

/// Invalid scan policy, caught before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("cannot read wordlist {path}: {source}")]
    UnreadableWordlist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no target url configured")]
    NoUrl,
}
