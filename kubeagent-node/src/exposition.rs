//! cAdvisor exposition format parser
//!
//! Turns the `/metrics` text of cAdvisor into [`MetricSample`] records:
//! - Lines without a `{...}` label block (comments, machine series) are skipped
//! - Only series carrying a container name and a pod uid are kept
//! - A malformed line is dropped on its own; the rest of the scrape survives
//!
//! Label values are quoted strings in which commas may appear, so labels are
//! split by an explicit scan that tracks quotes and backslash escapes.

use kubeagent_common::MetricSample;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

const LABEL_CONTAINER_NAME: &str = "name";
const LABEL_POD_UID: &str = "container_label_io_kubernetes_pod_uid";
const LABEL_POD_NAMESPACE: &str = "container_label_io_kubernetes_pod_namespace";
const LABEL_POD_NAME: &str = "container_label_io_kubernetes_pod_name";

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("label block is not closed")]
    UnclosedLabels,
    #[error("quoted label value is not terminated")]
    UnterminatedQuote,
    #[error("label {0:?} has no value")]
    LabelWithoutValue(String),
    #[error("label {label:?} has an invalid quoted value")]
    BadLabelValue { label: String },
    #[error("series has no value")]
    MissingValue,
}

/// Parse a full scrape. `now` (seconds) stamps samples without an explicit timestamp.
pub fn parse_exposition(text: &str, now: f64) -> Vec<MetricSample> {
    let samples: Vec<MetricSample> = text
        .lines()
        .filter(|line| line.contains('{'))
        .filter_map(|line| match parse_series(line, now) {
            Ok(sample) => sample,
            Err(e) => {
                debug!("Skipping malformed series ({}): {}", e, line);
                None
            }
        })
        .collect();

    debug!("Parsed {} container metrics", samples.len());
    samples
}

/// Parse one labelled series; `Ok(None)` when it is not a pod container metric
pub fn parse_series(line: &str, now: f64) -> Result<Option<MetricSample>, ParseError> {
    let (metric_name, rest) = line.split_once('{').ok_or(ParseError::UnclosedLabels)?;
    let (raw_labels, tail) = rest.rsplit_once('}').ok_or(ParseError::UnclosedLabels)?;

    let mut tokens = tail.split_whitespace();
    let value_string = tokens.next().ok_or(ParseError::MissingValue)?;
    // at most one optional timestamp, trailing tokens are ignored
    let timestamp = tokens
        .next()
        .and_then(|raw| raw.parse::<f64>().ok())
        .map(|millis| millis / 1000.0)
        .unwrap_or(now);

    let mut labels = parse_labels(raw_labels)?;
    let container_name = non_empty(labels.remove(LABEL_CONTAINER_NAME));
    let pod_uid = non_empty(labels.remove(LABEL_POD_UID));
    let (Some(container_name), Some(pod_uid)) = (container_name, pod_uid) else {
        return Ok(None);
    };

    Ok(Some(MetricSample {
        container_name,
        namespace: labels.remove(LABEL_POD_NAMESPACE).unwrap_or_default(),
        pod_uid,
        pod_name: labels.remove(LABEL_POD_NAME).unwrap_or_default(),
        metric_name: metric_name.trim().to_string(),
        value_string: value_string.to_string(),
        timestamp,
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Decode `a="x",b="y,z"` into a map of unescaped values
pub fn parse_labels(raw: &str) -> Result<HashMap<String, String>, ParseError> {
    let mut labels = HashMap::new();
    for fragment in split_labels(raw)? {
        let (name, quoted) = fragment
            .split_once('=')
            .ok_or_else(|| ParseError::LabelWithoutValue(fragment.to_string()))?;
        let name = name.trim();
        let value: String = serde_json::from_str(quoted.trim())
            .map_err(|_| ParseError::BadLabelValue { label: name.to_string() })?;
        labels.insert(name.to_string(), value);
    }
    Ok(labels)
}

/// Split on commas outside quoted values; empty fragments are dropped
pub fn split_labels(raw: &str) -> Result<Vec<&str>, ParseError> {
    let mut fragments = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fragments.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(ParseError::UnterminatedQuote);
    }
    fragments.push(&raw[start..]);

    Ok(fragments.into_iter().filter(|f| !f.trim().is_empty()).collect())
}
