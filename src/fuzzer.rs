use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crawl;
use crate::dictionary::{Dictionary, transformations};
use crate::error::RequestError;
use crate::filters::ExclusionFilter;
use crate::requester::Requester;
use crate::response::Response;
use crate::scanner::Scanner;
use crate::settings::{DEFAULT_TEST_PREFIXES, DEFAULT_TEST_SUFFIXES, WILDCARD_TEST_POINT_MARKER};
use crate::utils::clean_path;
use crate::waf::WafClassifier;

pub type ResponseCallback = Box<dyn Fn(&Response) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&RequestError) + Send + Sync>;

/// Level-triggered play gate plus a cooperative quit flag. Workers block
/// only while the gate is closed and observe quit at their checkpoints.
struct Control {
    play: watch::Sender<bool>,
    quit: AtomicBool,
}

impl Control {
    fn new() -> Self {
        Self {
            play: watch::Sender::new(false),
            quit: AtomicBool::new(false),
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.play.subscribe()
    }

    fn play(&self) {
        self.play.send_replace(true);
    }

    fn pause(&self) {
        self.play.send_replace(false);
    }

    fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        // open the gate so paused workers can observe the flag and exit
        self.play.send_replace(true);
    }

    fn is_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    async fn wait_play(gate: &mut watch::Receiver<bool>) {
        loop {
            if *gate.borrow_and_update() {
                return;
            }
            if gate.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Clonable remote control for a running scan.
#[derive(Clone)]
pub struct ScanHandle {
    control: Arc<Control>,
}

impl ScanHandle {
    pub fn play(&self) {
        self.control.play();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn quit(&self) {
        self.control.quit();
    }
}

#[derive(Default)]
struct ScannerSet {
    default: Vec<Scanner>,
    prefixes: Vec<(String, Scanner)>,
    suffixes: Vec<(String, Scanner)>,
}

impl ScannerSet {
    fn all(&self) -> Vec<&Scanner> {
        self.prefixes
            .iter()
            .map(|(_, scanner)| scanner)
            .chain(self.suffixes.iter().map(|(_, scanner)| scanner))
            .chain(self.default.iter())
            .collect()
    }

    /// Every scanner whose shape the candidate matches: prefix and suffix
    /// baselines first, then the defaults.
    fn for_candidate(&self, candidate: &str) -> Vec<&Scanner> {
        let cleaned = clean_path(candidate);
        let mut relevant = Vec::new();
        for (prefix, scanner) in &self.prefixes {
            if cleaned.starts_with(prefix.as_str()) {
                relevant.push(scanner);
            }
        }
        for (suffix, scanner) in &self.suffixes {
            if cleaned.ends_with(suffix.as_str()) {
                relevant.push(scanner);
            }
        }
        relevant.extend(self.default.iter());
        relevant
    }
}

struct CallbackSet {
    matched: Vec<ResponseCallback>,
    not_found: Vec<ResponseCallback>,
    error: Vec<ErrorCallback>,
}

struct FuzzerInner<R: Requester> {
    requester: Arc<R>,
    dictionary: Arc<Dictionary>,
    filter: ExclusionFilter,
    classifier: WafClassifier,
    config: Arc<Config>,
    base_path: String,
    scanners: std::sync::OnceLock<ScannerSet>,
    callbacks: std::sync::OnceLock<CallbackSet>,
    control: Arc<Control>,
    waf_detected: AtomicBool,
    fatal: Mutex<Option<RequestError>>,
}

static NO_CALLBACKS: CallbackSet = CallbackSet {
    matched: Vec::new(),
    not_found: Vec::new(),
    error: Vec::new(),
};

static NO_SCANNERS: ScannerSet = ScannerSet {
    default: Vec::new(),
    prefixes: Vec::new(),
    suffixes: Vec::new(),
};

impl<R: Requester> FuzzerInner<R> {
    fn callbacks(&self) -> &CallbackSet {
        self.callbacks.get().unwrap_or(&NO_CALLBACKS)
    }

    fn scanners(&self) -> &ScannerSet {
        self.scanners.get().unwrap_or(&NO_SCANNERS)
    }

    fn emit_not_found(&self, response: &Response) {
        for callback in &self.callbacks().not_found {
            callback(response);
        }
    }

    /// One candidate variant through the whole pipeline: request, WAF check,
    /// exclusion policy, wildcard baselines, then the match callbacks.
    async fn scan(&self, candidate: &str) {
        let path = format!("{}{}", self.base_path, candidate);
        let response = match self.requester.request(&path).await {
            Ok(response) => response,
            Err(err) => {
                for callback in &self.callbacks().error {
                    callback(&err);
                }
                if self.config.exit_on_error {
                    *self.fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
                    self.control.quit();
                }
                return;
            }
        };

        if !self.waf_detected.load(Ordering::Relaxed) {
            if let Some(source) = self.classifier.detect(&response) {
                self.waf_detected.store(true, Ordering::Relaxed);
                warn!(%source, url = %response.url, "WAF detected");
            }
        }

        if self.filter.is_excluded(&response) {
            self.emit_not_found(&response);
            return;
        }

        for scanner in self.scanners().for_candidate(candidate) {
            if !scanner.check(&path, &response) {
                debug!(context = scanner.context(), %path, "wildcard match suppressed");
                self.emit_not_found(&response);
                return;
            }
        }

        self.filter.record(&response);

        if self.config.crawl {
            for found in crawl::crawl(&response) {
                self.dictionary.add_extra(&found);
            }
        }

        for callback in &self.callbacks().matched {
            callback(&response);
        }
    }
}

async fn worker<R: Requester>(inner: Arc<FuzzerInner<R>>) {
    let mut gate = inner.control.subscribe();
    info!("worker started");

    loop {
        Control::wait_play(&mut gate).await;
        if inner.control.is_quit() {
            break;
        }

        let Some(candidate) = inner.dictionary.next_path() else {
            break;
        };

        for variant in transformations(
            &candidate,
            &inner.config.prefixes,
            &inner.config.suffixes,
        ) {
            inner.scan(&variant).await;
            if inner.control.is_quit() {
                break;
            }
        }

        if inner.config.delay > 0.0 {
            sleep(Duration::from_secs_f64(inner.config.delay)).await;
        }
        if inner.control.is_quit() {
            break;
        }
    }

    info!("worker finished");
}

/// Orchestrates a scan: builds the wildcard baselines, spawns the worker
/// pool, routes every response through the exclusion policy and the relevant
/// baselines, and reports through registered callbacks.
pub struct Fuzzer<R: Requester> {
    inner: Arc<FuzzerInner<R>>,
    match_callbacks: Vec<ResponseCallback>,
    not_found_callbacks: Vec<ResponseCallback>,
    error_callbacks: Vec<ErrorCallback>,
    workers: JoinSet<()>,
    started: bool,
}

impl<R: Requester> Fuzzer<R> {
    pub fn new(
        requester: Arc<R>,
        dictionary: Arc<Dictionary>,
        filter: ExclusionFilter,
        classifier: WafClassifier,
        config: Arc<Config>,
        base_path: &str,
    ) -> Self {
        Self {
            inner: Arc::new(FuzzerInner {
                requester,
                dictionary,
                filter,
                classifier,
                config,
                base_path: base_path.to_string(),
                scanners: std::sync::OnceLock::new(),
                callbacks: std::sync::OnceLock::new(),
                control: Arc::new(Control::new()),
                waf_detected: AtomicBool::new(false),
                fatal: Mutex::new(None),
            }),
            match_callbacks: Vec::new(),
            not_found_callbacks: Vec::new(),
            error_callbacks: Vec::new(),
            workers: JoinSet::new(),
            started: false,
        }
    }

    /// Register callbacks. All registration must happen before `start`;
    /// callbacks for one response fire in registration order.
    pub fn on_match(&mut self, callback: impl Fn(&Response) + Send + Sync + 'static) {
        self.match_callbacks.push(Box::new(callback));
    }

    pub fn on_not_found(&mut self, callback: impl Fn(&Response) + Send + Sync + 'static) {
        self.not_found_callbacks.push(Box::new(callback));
    }

    pub fn on_error(&mut self, callback: impl Fn(&RequestError) + Send + Sync + 'static) {
        self.error_callbacks.push(Box::new(callback));
    }

    /// Calibrate the wildcard baselines and consult the WAF classifier on
    /// the scan root. Must run before `start`.
    pub async fn setup(&mut self) -> Result<(), RequestError> {
        let inner = &self.inner;
        let requester = inner.requester.as_ref();
        let base = inner.base_path.as_str();
        let marker = WILDCARD_TEST_POINT_MARKER;
        let mut scanners = ScannerSet::default();

        let random = Scanner::setup(
            requester,
            &format!("{base}{marker}"),
            &[],
            &format!("/{base}{marker}"),
        )
        .await?;
        if !inner.config.no_wildcard {
            let reference = random.reference();
            let mut message = format!(
                "wildcard response: {} - {}",
                reference.status,
                reference.size()
            );
            if let Some(source) = inner.classifier.detect(reference) {
                message.push_str(&format!(" [{source}]"));
            }
            info!("{message}");
        }
        scanners.default.push(random);

        // the root fetch doubles as the first WAF consultation
        if let Ok(response) = requester.request(base).await {
            if let Some(source) = inner.classifier.detect(&response) {
                inner.waf_detected.store(true, Ordering::Relaxed);
                warn!(%source, "WAF detected on scan root");
            }
        }

        if let Some(custom) = inner.config.exclude_response.clone() {
            let scanner =
                Scanner::setup(requester, &custom, &scanners.all(), &custom).await?;
            scanners.default.push(scanner);
        }

        for prefix in with_defaults(&inner.config.prefixes, DEFAULT_TEST_PREFIXES) {
            let scanner = Scanner::setup(
                requester,
                &format!("{base}{prefix}{marker}"),
                &scanners.all(),
                &format!("/{base}{prefix}{marker}"),
            )
            .await?;
            scanners.prefixes.push((prefix, scanner));
        }

        for suffix in with_defaults(&inner.config.suffixes, DEFAULT_TEST_SUFFIXES) {
            let scanner = Scanner::setup(
                requester,
                &format!("{base}{marker}{suffix}"),
                &scanners.all(),
                &format!("/{base}{marker}{suffix}"),
            )
            .await?;
            scanners.suffixes.push((suffix, scanner));
        }

        for extension in &inner.config.extensions {
            let suffix = format!(".{extension}");
            if scanners.suffixes.iter().any(|(existing, _)| *existing == suffix) {
                continue;
            }
            let scanner = Scanner::setup(
                requester,
                &format!("{base}{marker}{suffix}"),
                &scanners.all(),
                &format!("/{base}{marker}{suffix}"),
            )
            .await?;
            scanners.suffixes.push((suffix, scanner));
        }

        let _ = inner.scanners.set(scanners);
        Ok(())
    }

    /// Spawn the worker pool. Workers run until the dictionary drains, the
    /// deadline supervisor fires, or `quit` is requested.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let _ = self.inner.callbacks.set(CallbackSet {
            matched: std::mem::take(&mut self.match_callbacks),
            not_found: std::mem::take(&mut self.not_found_callbacks),
            error: std::mem::take(&mut self.error_callbacks),
        });

        self.inner.control.play();
        for _ in 0..self.inner.config.thread_count.max(1) {
            self.workers.spawn(worker(Arc::clone(&self.inner)));
        }

        if let Some(deadline) = deadline_of(&self.inner.config) {
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                sleep(deadline).await;
                if let Some(inner) = weak.upgrade() {
                    if !inner.control.is_quit() {
                        warn!("scan deadline reached, stopping");
                        inner.control.quit();
                    }
                }
            });
        }
    }

    pub fn play(&self) {
        self.inner.control.play();
    }

    pub fn pause(&self) {
        self.inner.control.pause();
    }

    /// Idempotent; workers exit at their next checkpoint, after any request
    /// in flight completes or times out.
    pub fn quit(&self) {
        self.inner.control.quit();
    }

    /// Remote control usable from other tasks (signal handlers, UIs).
    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            control: Arc::clone(&self.inner.control),
        }
    }

    pub fn waf_detected(&self) -> bool {
        self.inner.waf_detected.load(Ordering::Relaxed)
    }

    /// True only once every worker has exited.
    pub fn is_finished(&mut self) -> bool {
        while self.workers.try_join_next().is_some() {}
        self.started && self.workers.is_empty()
    }

    /// Wait for all workers; re-raises the error that tripped
    /// `exit_on_error`, if any.
    pub async fn join(&mut self) -> Result<(), RequestError> {
        while let Some(result) = self.workers.join_next().await {
            if let Err(err) = result {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
        let fatal = self
            .inner
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Calibrate, scan, and wait for completion.
    pub async fn run(&mut self) -> Result<(), RequestError> {
        self.setup().await?;
        self.start();
        self.join().await
    }
}

/// Configured values first, then the built-in test set, deduplicated.
fn with_defaults(configured: &[String], defaults: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = configured.to_vec();
    for default in defaults {
        if !out.iter().any(|existing| existing == default) {
            out.push((*default).to_string());
        }
    }
    out
}

fn deadline_of(config: &Config) -> Option<Duration> {
    [config.max_time, config.target_max_time]
        .into_iter()
        .filter(|&seconds| seconds > 0)
        .min()
        .map(Duration::from_secs)
}
