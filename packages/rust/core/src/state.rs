//! Per-URL progress for one run.
//!
//! The state lives only as long as the run. What survives a crash is the
//! content store and the output store; a rerun rebuilds its state from them.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Stage at which a URL failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Convert,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Convert => write!(f, "convert"),
            Self::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlStatus {
    Pending,
    Fetched,
    /// Converted in memory; the output file is not written yet.
    Converted,
    Written,
    Failed { stage: Stage, reason: String },
}

/// One failed URL as it appears in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub url: String,
    pub stage: Stage,
    pub reason: String,
}

/// Status of every URL seen in this run, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    order: Vec<String>,
    statuses: HashMap<String, UrlStatus>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `url` as pending. Already tracked URLs are left alone.
    pub fn track(&mut self, url: &str) {
        if !self.statuses.contains_key(url) {
            self.order.push(url.to_string());
            self.statuses.insert(url.to_string(), UrlStatus::Pending);
        }
    }

    pub fn set(&mut self, url: &str, status: UrlStatus) {
        self.track(url);
        self.statuses.insert(url.to_string(), status);
    }

    pub fn fail(&mut self, url: &str, stage: Stage, reason: impl Into<String>) {
        self.set(
            url,
            UrlStatus::Failed {
                stage,
                reason: reason.into(),
            },
        );
    }

    pub fn status(&self, url: &str) -> Option<&UrlStatus> {
        self.statuses.get(url)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// URLs currently in `status`, in first-seen order.
    pub fn urls_with(&self, status: &UrlStatus) -> Vec<&str> {
        self.order
            .iter()
            .filter(|url| self.statuses.get(*url) == Some(status))
            .map(String::as_str)
            .collect()
    }

    pub fn count(&self, status: &UrlStatus) -> usize {
        self.statuses.values().filter(|s| *s == status).count()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.order
            .iter()
            .filter_map(|url| match self.statuses.get(url) {
                Some(UrlStatus::Failed { stage, reason }) => Some(FailureRecord {
                    url: url.clone(),
                    stage: *stage,
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}
