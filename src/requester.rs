use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use url::Url;

use crate::config::Config;
use crate::error::RequestError;
use crate::response::Response;
use crate::settings::{ITER_CHUNK_SIZE, MAX_REDIRECTS, MAX_RESPONSE_SIZE, RETRY_INTERVAL};
use crate::utils::is_binary;

/// Capability the fuzzer and the baseline scanners need to talk HTTP.
pub trait Requester: Send + Sync + 'static {
    /// Set the scan root all request paths are resolved against.
    fn set_url(&mut self, base: &str) -> Result<(), RequestError>;

    /// Issue one request for a path relative to the scan root.
    fn request(&self, path: &str) -> impl Future<Output = Result<Response, RequestError>> + Send;
}

/// Paces request submission across all workers to `max_rate` per second.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(max_rate: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(max_rate.max(1))),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait for the next submission slot.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        sleep_until(slot).await;
    }
}

/// Production requester over `reqwest`: configured headers/body/auth, manual
/// redirect following with history, bounded body reads, retry with a fixed
/// backoff and an optional global rate limit.
pub struct HttpRequester {
    client: Client,
    base_url: Option<Url>,
    method: Method,
    auth: Option<(String, Option<String>)>,
    data: Option<String>,
    follow_redirects: bool,
    max_retries: usize,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl HttpRequester {
    pub fn new(config: &Config) -> Result<Self, RequestError> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|err| RequestError::Protocol(format!("bad header name: {err}")))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|err| RequestError::Protocol(format!("bad header value: {err}")))?;
            default_headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout))
            .redirect(Policy::none())
            .default_headers(default_headers);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder
            .build()
            .map_err(|err| RequestError::Protocol(err.to_string()))?;

        let method = Method::from_bytes(config.http_method.to_uppercase().as_bytes())
            .map_err(|err| RequestError::Protocol(format!("bad http method: {err}")))?;

        let auth = config.auth.as_deref().map(|credentials| {
            match credentials.split_once(':') {
                Some((user, password)) => (user.to_string(), Some(password.to_string())),
                None => (credentials.to_string(), None),
            }
        });

        let rate_limiter = (config.max_rate > 0).then(|| Arc::new(RateLimiter::new(config.max_rate)));

        Ok(Self {
            client,
            base_url: None,
            method,
            auth,
            data: config.data.clone(),
            follow_redirects: config.follow_redirects,
            max_retries: config.max_retries,
            rate_limiter,
        })
    }

    async fn send_once(&self, target: Url) -> Result<Response, RequestError> {
        let mut target = target;
        let mut history: Vec<String> = Vec::new();
        loop {
            let mut builder = self.client.request(self.method.clone(), target.clone());
            if let Some((user, password)) = &self.auth {
                builder = builder.basic_auth(user, password.as_deref());
            }
            if let Some(data) = &self.data {
                builder = builder.body(data.clone());
            }

            let res = builder.send().await.map_err(classify)?;
            let status = res.status().as_u16();
            let headers: HashMap<String, String> = res
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_lowercase(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();
            let redirect = headers.get("location").cloned().unwrap_or_default();

            if self.follow_redirects && (300..400).contains(&status) && !redirect.is_empty() {
                if history.len() >= MAX_REDIRECTS {
                    return Err(RequestError::Protocol(format!(
                        "too many redirects for {target}"
                    )));
                }
                history.push(target.to_string());
                target = target
                    .join(&redirect)
                    .map_err(|err| RequestError::InvalidUrl(format!("{redirect}: {err}")))?;
                continue;
            }

            let (body, content) = read_bounded_body(res, &headers).await?;
            return Ok(Response::new(
                target.to_string(),
                status,
                headers,
                redirect,
                history,
                body,
                content,
            ));
        }
    }
}

impl Requester for HttpRequester {
    fn set_url(&mut self, base: &str) -> Result<(), RequestError> {
        let mut url = Url::parse(base)
            .map_err(|err| RequestError::InvalidUrl(format!("{base}: {err}")))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.base_url = Some(url);
        Ok(())
    }

    fn request(&self, path: &str) -> impl Future<Output = Result<Response, RequestError>> + Send {
        async move {
            let base = self
                .base_url
                .as_ref()
                .ok_or_else(|| RequestError::InvalidUrl("no scan root set".to_string()))?;
            let target = Url::parse(&format!("{base}{path}"))
                .map_err(|err| RequestError::InvalidUrl(format!("{base}{path}: {err}")))?;

            let mut attempt = 0;
            loop {
                if let Some(limiter) = &self.rate_limiter {
                    limiter.acquire().await;
                }
                match self.send_once(target.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(err) if err.is_transient() && attempt < self.max_retries => {
                        attempt += 1;
                        tracing::debug!(%target, attempt, error = %err, "retrying request");
                        sleep(RETRY_INTERVAL).await;
                    }
                    Err(err) if err.is_transient() => {
                        return Err(RequestError::RetriesExhausted {
                            url: target.to_string(),
                            attempts: attempt + 1,
                            last: err.to_string(),
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

/// Stream the body up to the size cap; stop early when a Content-Length is
/// declared and the payload sniffs binary.
async fn read_bounded_body(
    mut res: reqwest::Response,
    headers: &HashMap<String, String>,
) -> Result<(Vec<u8>, String), RequestError> {
    let mut body: Vec<u8> = Vec::with_capacity(ITER_CHUNK_SIZE);
    let has_length = headers.contains_key("content-length");
    while let Some(chunk) = res.chunk().await.map_err(classify)? {
        body.extend_from_slice(&chunk);
        if body.len() >= MAX_RESPONSE_SIZE || (has_length && is_binary(&body)) {
            break;
        }
    }
    body.truncate(MAX_RESPONSE_SIZE);

    let content = if is_binary(&body) {
        String::new()
    } else {
        String::from_utf8_lossy(&body).into_owned()
    };
    Ok((body, content))
}

fn classify(err: reqwest::Error) -> RequestError {
    let text = err.to_string();
    if err.is_timeout() {
        RequestError::Timeout(text)
    } else if err.is_connect() {
        // rustls failures surface as connect errors; pick them apart by text
        if text.contains("certificate") {
            RequestError::CertificateRejected(text)
        } else if text.contains("tls") || text.contains("handshake") {
            RequestError::Tls(text)
        } else {
            RequestError::Connect(text)
        }
    } else if err.is_builder() || err.is_request() {
        RequestError::InvalidUrl(text)
    } else {
        RequestError::Protocol(text)
    }
}
