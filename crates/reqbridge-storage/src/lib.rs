//! Durable tracking-state storage and shared HTTP utilities for the
//! request bridge.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "reqbridge-storage";

/// The persisted checkpoint. Loaded once at run start, mutated in memory as
/// rows complete, and persisted after every row-level completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingState {
    /// Rows strictly before this boundary are never re-fetched.
    pub last_run_date: NaiveDate,
    /// Identities handled since the boundary last advanced.
    #[serde(default)]
    pub processed_emails_same_date: BTreeSet<String>,
    /// Identity -> created ticket key. Append-only.
    #[serde(default)]
    pub email_to_issue: BTreeMap<String, String>,
    /// Identity -> validation-failure reason.
    #[serde(default)]
    pub flagged_requests: BTreeMap<String, String>,
}

impl TrackingState {
    /// Fresh state for a deployment that has never run: boundary at the
    /// configured epoch, all mappings empty.
    pub fn starting_at(epoch: NaiveDate) -> Self {
        Self {
            last_run_date: epoch,
            processed_emails_same_date: BTreeSet::new(),
            email_to_issue: BTreeMap::new(),
            flagged_requests: BTreeMap::new(),
        }
    }

    /// The boundary used to query candidate rows.
    pub fn fetch_boundary(&self) -> NaiveDate {
        self.last_run_date
    }

    /// True when the identity was already handled on the current boundary
    /// or already has a ticket from any prior run.
    pub fn has_been_handled(&self, identity: &str) -> bool {
        self.processed_emails_same_date.contains(identity)
            || self.email_to_issue.contains_key(identity)
    }

    pub fn ticket_for(&self, identity: &str) -> Option<&str> {
        self.email_to_issue.get(identity).map(String::as_str)
    }

    pub fn flag_for(&self, identity: &str) -> Option<&str> {
        self.flagged_requests.get(identity).map(String::as_str)
    }

    /// Record a created ticket. The identity->ticket mapping is append-only:
    /// an identity that already has a ticket key keeps it. Any stale flag
    /// for the identity is removed.
    pub fn record_created(&mut self, identity: &str, ticket_key: &str) {
        self.email_to_issue
            .entry(identity.to_string())
            .or_insert_with(|| ticket_key.to_string());
        self.processed_emails_same_date.insert(identity.to_string());
        self.flagged_requests.remove(identity);
    }

    /// Record a validation/mapping failure. The identity still counts as
    /// handled on the current boundary, so the same bad row is not
    /// reprocessed on every run within the same boundary window.
    pub fn record_flagged(&mut self, identity: &str, reason: &str) {
        self.flagged_requests
            .insert(identity.to_string(), reason.to_string());
        self.processed_emails_same_date.insert(identity.to_string());
    }

    /// Advance the fetch boundary at the very end of a run. The handled set
    /// is cleared only when the boundary moves to a new value; re-advancing
    /// to the same date keeps it.
    pub fn advance_boundary(&mut self, new_boundary: NaiveDate) {
        if new_boundary != self.last_run_date {
            self.last_run_date = new_boundary;
            self.processed_emails_same_date.clear();
        }
    }
}

/// Tracking-store failure. Persist failures abort the run: continuing
/// without a durable record risks duplicate ticket creation on the next run.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("reading tracking file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing tracking file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding tracking state")]
    Encode(#[source] serde_json::Error),
    #[error("writing tracking file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable checkpoint store. Each persist is an independent atomic write:
/// the state is serialized to a temp sibling and renamed over the previous
/// file, so a reader never observes a torn state.
#[derive(Debug, Clone)]
pub struct TrackingStore {
    path: PathBuf,
    epoch: NaiveDate,
}

impl TrackingStore {
    pub fn new(path: impl Into<PathBuf>, epoch: NaiveDate) -> Self {
        Self {
            path: path.into(),
            epoch,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<TrackingState, TrackingError> {
        let exists = fs::try_exists(&self.path).await.map_err(|source| {
            TrackingError::Read {
                path: self.path.clone(),
                source,
            }
        })?;
        if !exists {
            info!(path = %self.path.display(), "tracking file not found; starting from epoch");
            return Ok(TrackingState::starting_at(self.epoch));
        }
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|source| TrackingError::Read {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|source| TrackingError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn persist(&self, state: &TrackingState) -> Result<(), TrackingError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(TrackingError::Encode)?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .map_err(|source| TrackingError::Write {
                path: self.path.clone(),
                source,
            })?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let write = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await
        };
        match write.await {
            Ok(()) => Ok(()),
            Err(source) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(TrackingError::Write {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub basic_auth: Option<(String, String)>,
    pub backoff: BackoffPolicy,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            basic_auth: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// JSON API client with basic auth and retry/backoff on idempotent reads.
/// Writes are single-attempt: retrying a create after an ambiguous
/// failure could mint a duplicate ticket.
#[derive(Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    basic_auth: Option<(String, String)>,
    backoff: BackoffPolicy,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            basic_auth: config.basic_auth,
            backoff: config.backoff,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.basic_auth {
            Some((user, token)) => builder.basic_auth(user, Some(token)),
            None => builder,
        }
    }

    /// GET a JSON document, retrying retryable failures with exponential
    /// backoff.
    pub async fn get_json(&self, url: &str) -> Result<JsonValue, ApiError> {
        let span = info_span!("api_get", url);
        async {
            let mut attempt = 0;
            loop {
                let can_retry = attempt < self.backoff.max_retries;
                match self
                    .authorized(self.client.get(url))
                    .header(reqwest::header::ACCEPT, "application/json")
                    .send()
                    .await
                {
                    Ok(resp) => {
                        let status = resp.status();
                        let final_url = resp.url().to_string();
                        if status.is_success() {
                            return Ok(resp.json::<JsonValue>().await?);
                        }
                        if classify_status(status) == RetryDisposition::Retryable && can_retry {
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(ApiError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable && can_retry
                        {
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(ApiError::Request(err));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// POST a JSON document. Single attempt; the caller decides whether the
    /// operation is safe to repeat.
    pub async fn post_json(&self, url: &str, body: &JsonValue) -> Result<JsonValue, ApiError> {
        let span = info_span!("api_post", url);
        async {
            let resp = self
                .authorized(self.client.post(url))
                .header(reqwest::header::ACCEPT, "application/json")
                .json(body)
                .send()
                .await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(ApiError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            Ok(resp.json::<JsonValue>().await?)
        }
        .instrument(span)
        .await
    }
}
