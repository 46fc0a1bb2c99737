use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dirprobe::{
    Blacklists, Config, Dictionary, ExclusionFilter, Fuzzer, HttpRequester, Requester,
    WafClassifier, load_blacklists,
};

fn parse_status_codes(s: &str) -> Result<HashSet<u16>, String> {
    s.split(',')
        .map(|code| code.trim().parse::<u16>())
        .collect::<Result<HashSet<u16>, _>>()
        .map_err(|e| format!("Invalid status code: {}", e))
}

fn wordlist_path_parser(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("Wordlist file not found: {}", s))
    }
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((name, value)) => Ok((name.trim().to_string(), value.trim().to_string())),
        None => Err(format!("Invalid header format: {}", s)),
    }
}

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "A high-speed web content scanner",
    help_template = "{about}\n{author-with-newline}\n{usage}\n{all-args}"
)]
struct Cli {
    /// The base URL(s) to scan (e.g., `http://testsite.com`). Can be
    /// specified multiple times.
    #[arg(short, long, value_name = "URL")]
    urls: Vec<String>,

    /// Path to a wordlist file. Can be specified multiple times.
    #[arg(short, long, value_parser = wordlist_path_parser, required = true)]
    wordlist: Vec<PathBuf>,

    /// Extensions substituted for %EXT% tags (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    extensions: Vec<String>,

    /// Append `/` and every extension to extensionless words
    #[arg(long)]
    force_extensions: bool,

    /// Replace unknown extensions with the configured ones
    #[arg(long)]
    overwrite_extensions: bool,

    /// Skip wordlist entries with these extensions (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_extensions: Vec<String>,

    /// Prefixes added to every candidate (comma-separated)
    #[arg(long, value_delimiter = ',')]
    prefixes: Vec<String>,

    /// Suffixes added to every candidate (comma-separated)
    #[arg(long, value_delimiter = ',')]
    suffixes: Vec<String>,

    /// Probe mutated neighbors of every candidate (backups, versions)
    #[arg(long)]
    mutation: bool,

    /// Feed paths discovered in matched responses back into the scan
    #[arg(long)]
    crawl: bool,

    /// Lowercase all candidates
    #[arg(long)]
    lowercase: bool,

    /// Uppercase all candidates
    #[arg(long)]
    uppercase: bool,

    /// Capitalize all candidates
    #[arg(long)]
    capitalization: bool,

    /// Number of concurrent workers
    #[arg(short = 't', long, default_value = "25")]
    threads: usize,

    /// Include only the following HTTP status codes (comma-separated)
    #[arg(long, value_parser = parse_status_codes)]
    include_status: Option<HashSet<u16>>,

    /// Exclude the following HTTP status codes (comma-separated)
    #[arg(long, value_parser = parse_status_codes)]
    exclude_status: Option<HashSet<u16>>,

    /// Exclude responses with these human-readable sizes (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_sizes: Vec<String>,

    /// Exclude responses containing any of these texts
    #[arg(long)]
    exclude_texts: Vec<String>,

    /// Exclude responses whose body matches this regex
    #[arg(long)]
    exclude_regex: Option<String>,

    /// Exclude responses redirecting to a location matching this
    #[arg(long)]
    exclude_redirect: Option<String>,

    /// Path whose response becomes an extra "known junk" baseline
    #[arg(long)]
    exclude_response: Option<String>,

    /// Suppress responses once their fingerprint repeats this many times
    #[arg(long, default_value = "0")]
    filter_threshold: u32,

    /// Skip reporting the wildcard baseline
    #[arg(long)]
    no_wildcard: bool,

    /// Minimum response length in bytes
    #[arg(long, default_value = "0")]
    min_response_size: usize,

    /// Maximum response length in bytes (0 for unlimited)
    #[arg(long, default_value = "0")]
    max_response_size: usize,

    /// Whole-scan deadline in seconds (0 for unlimited)
    #[arg(long, default_value = "0")]
    max_time: u64,

    /// Per-target deadline in seconds (0 for unlimited)
    #[arg(long, default_value = "0")]
    target_max_time: u64,

    /// HTTP method to use for requests
    #[arg(long, default_value = "GET")]
    method: String,

    /// Custom headers, e.g. "Authorization: Bearer <TOKEN>".
    /// Can be specified multiple times.
    #[arg(short = 'H', long, value_name = "HEADER", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Follow redirects instead of reporting them
    #[arg(long)]
    follow_redirects: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: f64,

    /// Delay between requests per worker, in seconds
    #[arg(long, default_value = "0")]
    delay: f64,

    /// Global requests-per-second cap (0 for unlimited)
    #[arg(long, default_value = "0")]
    max_rate: u32,

    /// Retries per request on transient failures
    #[arg(long, default_value = "1")]
    max_retries: usize,

    /// Stop the scan on the first permanently failed request
    #[arg(long)]
    exit_on_error: bool,

    /// Custom User-Agent header to use for requests
    #[arg(long, default_value = "dirprobe/0.1.0")]
    user_agent: String,

    /// Basic auth credentials as user:password
    #[arg(long)]
    auth: Option<String>,

    /// Request body to send with every request
    #[arg(short, long, value_name = "DATA")]
    data: Option<String>,

    /// Directory holding blacklists and WAF signatures
    #[arg(long, default_value = "db", value_name = "DIR")]
    db: PathBuf,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            urls: self.urls,
            wordlists: self.wordlist,
            extensions: self.extensions,
            force_extensions: self.force_extensions,
            overwrite_extensions: self.overwrite_extensions,
            exclude_extensions: self.exclude_extensions,
            prefixes: self.prefixes,
            suffixes: self.suffixes,
            mutation: self.mutation,
            crawl: self.crawl,
            lowercase: self.lowercase,
            uppercase: self.uppercase,
            capitalization: self.capitalization,
            thread_count: self.threads.max(1),
            include_status_codes: self.include_status.unwrap_or_default(),
            exclude_status_codes: self.exclude_status.unwrap_or_default(),
            exclude_sizes: self.exclude_sizes.into_iter().collect(),
            exclude_texts: self.exclude_texts,
            exclude_regex: self.exclude_regex,
            exclude_redirect: self.exclude_redirect,
            exclude_response: self.exclude_response,
            filter_threshold: self.filter_threshold,
            no_wildcard: self.no_wildcard,
            minimum_response_size: self.min_response_size,
            maximum_response_size: self.max_response_size,
            max_time: self.max_time,
            target_max_time: self.target_max_time,
            http_method: self.method,
            headers: self.headers.into_iter().collect::<HashMap<_, _>>(),
            follow_redirects: self.follow_redirects,
            timeout: self.timeout,
            delay: self.delay,
            max_rate: self.max_rate,
            max_retries: self.max_retries,
            exit_on_error: self.exit_on_error,
            user_agent: Some(self.user_agent),
            auth: self.auth,
            data: self.data,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_dir = cli.db.clone();
    let config = Arc::new(cli.into_config());

    if config.urls.is_empty() {
        anyhow::bail!("No URLs provided for scanning. Use --urls.");
    }

    let blacklists = load_blacklists(&db_dir, &config);
    let classifier_path = db_dir.join("waf_signatures.json");

    for url in &config.urls {
        println!("# Starting scan for URL: {}", url);
        scan_target(url, &config, &blacklists, &classifier_path).await?;
    }

    Ok(())
}

async fn scan_target(
    url: &str,
    config: &Arc<Config>,
    blacklists: &Blacklists,
    classifier_path: &std::path::Path,
) -> Result<()> {
    let mut requester = HttpRequester::new(config)
        .with_context(|| format!("building HTTP client for {}", url))?;
    requester
        .set_url(url)
        .with_context(|| format!("invalid target URL: {}", url))?;

    let dictionary = Arc::new(
        Dictionary::new(config.wordlists.clone(), config).context("loading wordlists")?,
    );
    println!("# Read approximately {} entries from wordlists.", dictionary.len());

    let filter = ExclusionFilter::new(config, blacklists.clone())
        .context("building exclusion filter")?;
    let classifier = if classifier_path.is_file() {
        WafClassifier::from_file(classifier_path)
    } else {
        WafClassifier::default()
    };

    let mut fuzzer = Fuzzer::new(
        Arc::new(requester),
        dictionary,
        filter,
        classifier,
        Arc::clone(config),
        "",
    );

    fuzzer.on_match(|response| {
        if response.redirect.is_empty() {
            println!("[{}] {} [{}]", response.status, response.url, response.size());
        } else {
            println!(
                "[{}] {} -> {} [{}]",
                response.status,
                response.url,
                response.redirect,
                response.size()
            );
        }
    });
    fuzzer.on_error(|err| eprintln!("Error: {}", err));

    fuzzer
        .setup()
        .await
        .with_context(|| format!("calibrating baselines for {}", url))?;
    fuzzer.start();

    let handle = fuzzer.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("# Interrupted, stopping scan...");
            handle.quit();
        }
    });

    fuzzer.join().await?;
    if fuzzer.waf_detected() {
        println!("# A WAF was detected during this scan; results may be incomplete.");
    }

    Ok(())
}
