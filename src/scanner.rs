use std::collections::HashSet;

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::RequestError;
use crate::requester::Requester;
use crate::response::Response;
use crate::settings::{BASELINE_PROBE_COUNT, PROBE_TOKEN_LENGTH, WILDCARD_TEST_POINT_MARKER};
use crate::utils::replace_from_all_encodings;

/// Reference "not found" baseline for one path shape. Calibrated once at
/// setup by probing with random tokens; afterwards `check` decides whether a
/// live response is distinguishable from it.
#[derive(Debug, Clone)]
pub struct Scanner {
    probe_path: String,
    context: String,
    /// Token substituted for the marker on the primary probe.
    token: String,
    /// Primary reference first; alternates when probes disagreed on status.
    references: Vec<Response>,
    /// Body lines stable across probes; `None` when the probes agreed and no
    /// masking is needed.
    static_lines: Option<HashSet<String>>,
}

impl Scanner {
    /// Calibrate a baseline for `path` (which contains the wildcard marker).
    /// `tested` lets an already-calibrated baseline with an equal reference
    /// be reused instead of probing the same page shape again.
    pub async fn setup<R: Requester>(
        requester: &R,
        path: &str,
        tested: &[&Scanner],
        context: &str,
    ) -> Result<Self, RequestError> {
        let token = random_token();
        let first = requester
            .request(&path.replace(WILDCARD_TEST_POINT_MARKER, &token))
            .await?;

        if let Some(existing) = tested.iter().find(|scanner| scanner.reference() == &first) {
            let mut scanner = (*existing).clone();
            scanner.probe_path = path.to_string();
            scanner.context = context.to_string();
            return Ok(scanner);
        }

        let mut references = vec![first];
        let mut static_lines = None;
        for _ in 1..BASELINE_PROBE_COUNT {
            let other_token = random_token();
            let other = requester
                .request(&path.replace(WILDCARD_TEST_POINT_MARKER, &other_token))
                .await?;

            if references
                .iter()
                .all(|reference| reference.status != other.status)
            {
                references.push(other);
                continue;
            }

            let ours = normalized_body(&references[0], &[token.as_str()]);
            let theirs = normalized_body(&other, &[other_token.as_str()]);
            if ours != theirs {
                let their_lines: HashSet<&str> = theirs.lines().collect();
                static_lines = Some(
                    ours.lines()
                        .filter(|line| their_lines.contains(line))
                        .map(str::to_string)
                        .collect(),
                );
            }
        }

        Ok(Self {
            probe_path: path.to_string(),
            context: context.to_string(),
            token,
            references,
            static_lines,
        })
    }

    /// True when `response` is distinguishable from this baseline.
    pub fn check(&self, path: &str, response: &Response) -> bool {
        // a status the calibration never produced stands on its own
        if self
            .references
            .iter()
            .all(|reference| reference.status != response.status)
        {
            return true;
        }

        let wildcard_part = self.wildcard_part(path);
        if response.redirect != self.expected_redirect(&wildcard_part) {
            return true;
        }

        let reference = &self.references[0];
        let masked_reference = self.masked(normalized_body(reference, &[self.token.as_str()]));
        let masked_response = self.masked(normalized_body(response, &[wildcard_part.as_str(), path]));
        if masked_reference.len() != masked_response.len() {
            return true;
        }
        masked_reference != masked_response
    }

    pub fn reference(&self) -> &Response {
        &self.references[0]
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// The reference redirect with the probe token swapped for the part of
    /// `path` standing where the marker stood.
    fn expected_redirect(&self, wildcard_part: &str) -> String {
        let redirect = &self.references[0].redirect;
        if redirect.is_empty() {
            return String::new();
        }
        redirect.replace(&self.token, wildcard_part)
    }

    fn wildcard_part(&self, path: &str) -> String {
        let Some((head, tail)) = self.probe_path.split_once(WILDCARD_TEST_POINT_MARKER) else {
            return path.to_string();
        };
        path.strip_prefix(head)
            .and_then(|rest| rest.strip_suffix(tail))
            .unwrap_or(path)
            .to_string()
    }

    fn masked(&self, content: String) -> String {
        match &self.static_lines {
            Some(static_lines) => content
                .lines()
                .filter(|line| static_lines.contains(*line))
                .collect::<Vec<_>>()
                .join("\n"),
            None => content,
        }
    }
}

/// Body text with the echoed request path and the given extra echoes
/// stripped in all common encodings.
fn normalized_body(response: &Response, echoes: &[&str]) -> String {
    let mut content = if response.content.is_empty() {
        String::from_utf8_lossy(&response.body).into_owned()
    } else {
        response.content.clone()
    };
    let path_echo = response
        .full_path
        .split('#')
        .next()
        .unwrap_or(&response.full_path);
    if path_echo.len() > 1 {
        content = replace_from_all_encodings(&content, path_echo, "");
    }
    for echo in echoes {
        if echo.len() > 1 {
            content = replace_from_all_encodings(&content, echo, "");
        }
    }
    content
}

fn random_token() -> String {
    let mut rng = rand::rng();
    (0..PROBE_TOKEN_LENGTH)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect()
}
