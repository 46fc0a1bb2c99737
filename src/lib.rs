//! Engine for discovering web directories and files by path brute-forcing.
//!
//! A [`Dictionary`] streams candidate paths expanded from wordlists, a
//! [`Fuzzer`] drives them through an HTTP [`Requester`] with a pool of
//! cooperative workers, and every response is screened against the
//! user-configured [`ExclusionFilter`] and the wildcard baselines calibrated
//! at setup before a match is reported.

pub mod config;
pub mod crawl;
pub mod dictionary;
pub mod error;
pub mod filters;
pub mod fuzzer;
pub mod mutation;
pub mod requester;
pub mod response;
pub mod scanner;
pub mod settings;
pub mod utils;
pub mod waf;

pub use config::Config;
pub use dictionary::{Blacklists, Dictionary, load_blacklists, transformations};
pub use error::{ConfigError, RequestError};
pub use filters::ExclusionFilter;
pub use fuzzer::{Fuzzer, ScanHandle};
pub use requester::{HttpRequester, RateLimiter, Requester};
pub use response::Response;
pub use scanner::Scanner;
pub use waf::{Confidence, WafClassifier, WafVerdict};
