use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::error::ConfigError;
use crate::mutation;
use crate::settings::{
    EXCLUDE_OVERWRITE_EXTENSIONS, EXTENSION_RECOGNITION_REGEX, EXTENSION_TAG,
};
use crate::utils::{clean_path, lstrip_once};

static EXTENSION_TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)%ext%").unwrap());

/// Suffix lists of known-junk paths, keyed by response status.
pub type Blacklists = HashMap<u16, Vec<String>>;

/// Load `<status>_blacklist.txt` files from a database directory. Missing or
/// unreadable files are skipped.
pub fn load_blacklists(db_dir: &Path, config: &Config) -> Blacklists {
    let mut blacklists = Blacklists::new();
    for status in [400_u16, 403, 500] {
        let file = db_dir.join(format!("{status}_blacklist.txt"));
        if !file.is_file() {
            continue;
        }
        let Ok(dictionary) = Dictionary::blacklist(vec![file], config) else {
            continue;
        };
        blacklists.insert(status, dictionary.drain());
    }
    blacklists
}

/// Streaming candidate source: expands wordlist lines with extension, case
/// and mutation rules, deduplicates, and hands out one candidate per call.
/// Wordlists can be tens of millions of lines, so nothing is materialized
/// beyond the dedup set.
pub struct Dictionary {
    files: Vec<PathBuf>,
    is_blacklist: bool,
    extensions: Vec<String>,
    exclude_extensions: Vec<String>,
    force_extensions: bool,
    overwrite_extensions: bool,
    lowercase: bool,
    uppercase: bool,
    capitalization: bool,
    mutation: bool,
    approx_total: usize,
    state: Mutex<CursorState>,
}

#[derive(Default)]
struct CursorState {
    extra: Vec<String>,
    extra_index: usize,
    file_index: usize,
    reader: Option<BufReader<File>>,
    pending: VecDeque<String>,
    seen: HashSet<String>,
}

impl Dictionary {
    pub fn new(files: Vec<PathBuf>, config: &Config) -> Result<Self, ConfigError> {
        Self::build(files, false, config)
    }

    /// Blacklist mode disables forced/overwritten extensions and case
    /// folding; anything else would cause false negatives when matching
    /// response paths against the list.
    pub fn blacklist(files: Vec<PathBuf>, config: &Config) -> Result<Self, ConfigError> {
        Self::build(files, true, config)
    }

    fn build(files: Vec<PathBuf>, is_blacklist: bool, config: &Config) -> Result<Self, ConfigError> {
        let mut approx_total = 0;
        for file in &files {
            let handle = File::open(file).map_err(|source| ConfigError::UnreadableWordlist {
                path: file.display().to_string(),
                source,
            })?;
            approx_total += BufReader::new(handle).split(b'\n').count();
        }
        Ok(Self {
            files,
            is_blacklist,
            extensions: config.extensions.clone(),
            exclude_extensions: config.exclude_extensions.clone(),
            force_extensions: config.force_extensions,
            overwrite_extensions: config.overwrite_extensions,
            lowercase: config.lowercase,
            uppercase: config.uppercase,
            capitalization: config.capitalization,
            mutation: config.mutation,
            approx_total,
            state: Mutex::new(CursorState::default()),
        })
    }

    /// Upper bound on the number of candidates: the raw line count, before
    /// dedup shrinks and expansion grows the stream. Progress UIs must treat
    /// it as an estimate.
    pub fn len(&self) -> usize {
        self.approx_total
    }

    pub fn is_empty(&self) -> bool {
        self.approx_total == 0
    }

    /// Next candidate, draining injected extras before the cursor. Safe
    /// under concurrent callers; each call is one short critical section.
    pub fn next_path(&self) -> Option<String> {
        let mut state = self.lock();

        if state.extra_index < state.extra.len() {
            let path = state.extra[state.extra_index].clone();
            state.extra_index += 1;
            return Some(path);
        }

        loop {
            if let Some(path) = state.pending.pop_front() {
                return Some(path);
            }
            let line = loop {
                if let Some(reader) = state.reader.as_mut() {
                    if let Some(line) = read_line(reader) {
                        break line;
                    }
                }
                if state.file_index >= self.files.len() {
                    return None;
                }
                state.reader = File::open(&self.files[state.file_index])
                    .ok()
                    .map(BufReader::new);
                state.file_index += 1;
            };
            self.expand_line(&line, &mut state);
        }
    }

    /// Queue a newly discovered path behind any pending extras; it takes
    /// priority over the cursor. Duplicates of earlier extras are dropped,
    /// but a path the cursor already produced may be re-introduced.
    pub fn add_extra(&self, path: &str) {
        let mut state = self.lock();
        if state.extra.iter().any(|existing| existing == path) {
            return;
        }
        state.extra.push(path.to_string());
    }

    /// Rewind the cursor and forget injected extras.
    pub fn reset(&self) {
        *self.lock() = CursorState::default();
    }

    /// Exhaust the cursor into a list. Used for blacklists, which are small.
    pub fn drain(&self) -> Vec<String> {
        let mut paths = Vec::new();
        while let Some(path) = self.next_path() {
            paths.push(path);
        }
        paths
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CursorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expand_line(&self, line: &str, state: &mut CursorState) {
        for processed in self.process_line(line) {
            let cased = self.apply_case(&processed);
            if self.mutation && !self.is_blacklist {
                let mutated = mutation::mutate(&cased);
                push_unique(state, cased);
                for variant in mutated {
                    push_unique(state, variant);
                }
            } else {
                push_unique(state, cased);
            }
        }
    }

    fn process_line(&self, line: &str) -> Vec<String> {
        let line = lstrip_once(line.trim(), "/");
        if !self.is_valid(line) {
            return Vec::new();
        }

        if line.to_lowercase().contains(EXTENSION_TAG) {
            return self
                .extensions
                .iter()
                .map(|extension| {
                    EXTENSION_TAG_REGEX
                        .replace_all(line, regex::NoExpand(extension))
                        .into_owned()
                })
                .collect();
        }

        let mut out = vec![line.to_string()];
        if self.is_blacklist {
            return out;
        }

        if self.force_extensions && !line.contains('.') && !line.ends_with('/') {
            out.push(format!("{line}/"));
            for extension in &self.extensions {
                out.push(format!("{line}.{extension}"));
            }
        } else if self.overwrite_extensions && self.overwritable(line) {
            let base = line.split('.').next().unwrap_or(line);
            for extension in &self.extensions {
                out.push(format!("{base}.{extension}"));
            }
        }
        out
    }

    fn is_valid(&self, path: &str) -> bool {
        if path.is_empty() || path.starts_with('#') {
            return false;
        }
        let cleaned = clean_path(path);
        !self
            .exclude_extensions
            .iter()
            .any(|extension| cleaned.ends_with(&format!(".{extension}")))
    }

    /// Paths with queries usually target disclosed vulnerabilities of
    /// specific services; their extensions are left alone.
    fn overwritable(&self, line: &str) -> bool {
        !line.contains('?')
            && !line.contains('#')
            && !self
                .extensions
                .iter()
                .map(String::as_str)
                .chain(EXCLUDE_OVERWRITE_EXTENSIONS.iter().copied())
                .any(|extension| line.ends_with(extension))
            && EXTENSION_RECOGNITION_REGEX.is_match(line)
    }

    fn apply_case(&self, path: &str) -> String {
        if self.is_blacklist {
            path.to_string()
        } else if self.lowercase {
            path.to_lowercase()
        } else if self.uppercase {
            path.to_uppercase()
        } else if self.capitalization {
            capitalize(path)
        } else {
            path.to_string()
        }
    }
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("files", &self.files)
            .field("is_blacklist", &self.is_blacklist)
            .field("approx_total", &self.approx_total)
            .finish_non_exhaustive()
    }
}

fn push_unique(state: &mut CursorState, candidate: String) {
    if state.seen.insert(candidate.clone()) {
        state.pending.push_back(candidate);
    }
}

fn read_line(reader: &mut BufReader<File>) -> Option<String> {
    let mut raw = Vec::new();
    match reader.read_until(b'\n', &mut raw) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(String::from_utf8_lossy(&raw).into_owned()),
    }
}

fn capitalize(path: &str) -> String {
    let mut chars = path.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Prefix/suffix variants for a candidate that is about to be requested.
/// The untransformed path is returned only when no transform applied.
pub fn transformations(path: &str, prefixes: &[String], suffixes: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for prefix in prefixes {
        if !path.starts_with('/') && !path.starts_with(prefix.as_str()) {
            out.push(format!("{prefix}{path}"));
        }
    }
    if !path.contains('?') && !path.contains('#') {
        for suffix in suffixes {
            if !path.ends_with('/') && !path.ends_with(suffix.as_str()) {
                out.push(format!("{path}{suffix}"));
            }
        }
    }
    if out.is_empty() {
        out.push(path.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn wordlist(lines: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp wordlist");
        file.write_all(lines.as_bytes()).expect("write wordlist");
        file
    }

    fn config() -> Config {
        Config {
            extensions: vec!["php".to_string(), "html".to_string()],
            ..Config::default()
        }
    }

    fn dictionary(lines: &str, config: &Config) -> (NamedTempFile, Dictionary) {
        let file = wordlist(lines);
        let dict = Dictionary::new(vec![file.path().to_path_buf()], config)
            .expect("build dictionary");
        (file, dict)
    }

    #[test]
    fn expands_the_extension_tag() {
        let (_file, dict) = dictionary("admin\nuser\n%EXT%\n", &config());
        let items = dict.drain();

        assert!(items.contains(&"admin".to_string()));
        assert!(items.contains(&"user".to_string()));
        assert!(items.contains(&"php".to_string()));
        assert!(items.contains(&"html".to_string()));
        assert!(!items.iter().any(|item| item.to_lowercase().contains("%ext%")));
    }

    #[test]
    fn extension_tag_is_case_insensitive() {
        let (_file, dict) = dictionary("backup.%ext%\n", &config());
        let items = dict.drain();
        assert_eq!(items, vec!["backup.php", "backup.html"]);
    }

    #[test]
    fn skips_comments_blanks_and_leading_slash() {
        let (_file, dict) = dictionary("# comment\n\n/admin\n", &config());
        assert_eq!(dict.drain(), vec!["admin"]);
    }

    #[test]
    fn skips_excluded_extensions() {
        let cfg = Config {
            exclude_extensions: vec!["log".to_string()],
            ..config()
        };
        let (_file, dict) = dictionary("debug.log\nindex.html\n", &cfg);
        assert_eq!(dict.drain(), vec!["index.html"]);
    }

    #[test]
    fn forced_extensions_add_directory_and_files() {
        let cfg = Config {
            force_extensions: true,
            ..config()
        };
        let (_file, dict) = dictionary("admin\nuser\n", &cfg);
        let items = dict.drain();

        for expected in [
            "admin", "admin/", "admin.php", "admin.html", "user", "user/", "user.php",
            "user.html",
        ] {
            assert!(items.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn forced_extensions_skip_files_and_directories() {
        let cfg = Config {
            force_extensions: true,
            ..config()
        };
        let (_file, dict) = dictionary("style.css\nassets/\n", &cfg);
        let items = dict.drain();
        assert_eq!(items, vec!["style.css", "assets/"]);
    }

    #[test]
    fn overwrite_replaces_unknown_extensions() {
        let cfg = Config {
            overwrite_extensions: true,
            ..config()
        };
        let (_file, dict) = dictionary("readme.txt\n", &cfg);
        let items = dict.drain();
        assert_eq!(items, vec!["readme.txt", "readme.php", "readme.html"]);
    }

    #[test]
    fn overwrite_leaves_configured_and_query_paths_alone() {
        let cfg = Config {
            overwrite_extensions: true,
            ..config()
        };
        let (_file, dict) = dictionary("index.php\nlookup.cgi?x=1\n", &cfg);
        let items = dict.drain();
        assert_eq!(items, vec!["index.php", "lookup.cgi?x=1"]);
    }

    #[test]
    fn case_folding_precedence() {
        let lower = Config {
            lowercase: true,
            uppercase: true,
            ..config()
        };
        let (_file, dict) = dictionary("AdMin\n", &lower);
        assert_eq!(dict.drain(), vec!["admin"]);

        let capital = Config {
            capitalization: true,
            ..config()
        };
        let (_file, dict) = dictionary("aDMIN\n", &capital);
        assert_eq!(dict.drain(), vec!["Admin"]);
    }

    #[test]
    fn candidates_are_unique() {
        let (_file, dict) = dictionary("admin\nadmin\nADMIN\n", &config());
        assert_eq!(dict.drain(), vec!["admin", "ADMIN"]);
    }

    #[test]
    fn mutation_composes_after_case_folding() {
        let cfg = Config {
            mutation: true,
            lowercase: true,
            ..config()
        };
        let (_file, dict) = dictionary("Config\n", &cfg);
        let items = dict.drain();
        assert_eq!(items[0], "config");
        assert!(items.contains(&"config.bak".to_string()));
        assert!(!items.contains(&"Config.bak".to_string()));
    }

    #[test]
    fn blacklists_get_no_expansion() {
        let cfg = Config {
            force_extensions: true,
            lowercase: true,
            ..config()
        };
        let file = wordlist("Admin\n%EXT%\n");
        let dict = Dictionary::blacklist(vec![file.path().to_path_buf()], &cfg)
            .expect("build blacklist");
        let items = dict.drain();
        assert_eq!(items, vec!["Admin", "php", "html"]);
    }

    #[test]
    fn blacklists_load_per_status_and_skip_missing_files() {
        let db = tempfile::tempdir().expect("create temp db dir");
        std::fs::write(db.path().join("403_blacklist.txt"), "cgi-bin/\n# noise\n")
            .expect("write blacklist");

        let blacklists = load_blacklists(db.path(), &config());
        assert_eq!(
            blacklists.get(&403).map(Vec::as_slice),
            Some(&["cgi-bin/".to_string()][..])
        );
        assert!(!blacklists.contains_key(&400));
        assert!(!blacklists.contains_key(&500));
    }

    #[test]
    fn extras_drain_before_the_cursor() {
        let (_file, dict) = dictionary("admin\n", &config());
        dict.add_extra("found/secret");
        dict.add_extra("found/secret");
        dict.add_extra("found/other");

        assert_eq!(dict.next_path().as_deref(), Some("found/secret"));
        assert_eq!(dict.next_path().as_deref(), Some("found/other"));
        assert_eq!(dict.next_path().as_deref(), Some("admin"));
        assert_eq!(dict.next_path(), None);
    }

    #[test]
    fn reset_rewinds_and_clears_extras() {
        let (_file, dict) = dictionary("admin\nuser\n", &config());
        dict.add_extra("extra");
        let _ = dict.next_path();
        let _ = dict.next_path();
        dict.reset();
        assert_eq!(dict.drain(), vec!["admin", "user"]);
    }

    #[test]
    fn len_is_the_raw_line_count() {
        let (_file, dict) = dictionary("admin\nuser\n%EXT%\n", &config());
        assert_eq!(dict.len(), 3);
    }

    #[test]
    fn unreadable_wordlist_is_a_config_error() {
        let missing = PathBuf::from("/nonexistent/wordlist.txt");
        let err = Dictionary::new(vec![missing], &config()).unwrap_err();
        assert!(matches!(err, ConfigError::UnreadableWordlist { .. }));
    }

    #[test]
    fn prefix_and_suffix_transforms_replace_the_original() {
        let prefixes = vec!["pre_".to_string()];
        let suffixes = vec!["_suf".to_string()];
        assert_eq!(
            transformations("admin", &prefixes, &suffixes),
            vec!["pre_admin", "admin_suf"]
        );
    }

    #[test]
    fn untransformed_path_survives_when_nothing_applies() {
        assert_eq!(transformations("admin", &[], &[]), vec!["admin"]);

        let suffixes = vec!["_suf".to_string()];
        assert_eq!(transformations("admin/", &[], &suffixes), vec!["admin/"]);
        assert_eq!(
            transformations("admin?x=1", &[], &suffixes),
            vec!["admin?x=1"]
        );
    }

    #[test]
    fn transforms_skip_already_transformed_paths() {
        let prefixes = vec!["pre_".to_string()];
        assert_eq!(transformations("pre_admin", &prefixes, &[]), vec!["pre_admin"]);
    }
}
