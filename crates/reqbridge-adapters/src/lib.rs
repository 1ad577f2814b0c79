//! Collaborator interfaces consumed by the sync core, and their production
//! implementations: Postgres row intake and the Jira Forms / Service Desk
//! APIs.

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqbridge_core::{parse_source_date, CandidateRow, MappedFields};
use reqbridge_storage::{ApiClient, ApiError};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "reqbridge-adapters";

/// Feed of candidate rows. Ordering across identities is not guaranteed.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows_on_or_after(&self, boundary: NaiveDate) -> Result<Vec<CandidateRow>>;
}

/// Provider of the raw form definition consumed by the schema cache.
#[async_trait]
pub trait FormSource: Send + Sync {
    async fn fetch_form_definition(&self) -> Result<JsonValue>;
}

/// Ticket-creation failure. Recoverable at the run level: the row is left
/// unhandled and naturally retried on the next run.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct SubmissionError(#[from] pub ApiError);

/// Sink that turns mapped fields into a ticket and returns its key.
#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn create_request(&self, fields: &MappedFields) -> Result<String, SubmissionError>;
}

/// Postgres-backed row source. Reads the request table incrementally from
/// the tracking boundary forward.
pub struct PgRowSource {
    pool: PgPool,
    table: String,
}

impl PgRowSource {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn fetch_rows_on_or_after(&self, boundary: NaiveDate) -> Result<Vec<CandidateRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE createdat >= $1 ORDER BY createdat ASC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(boundary)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("querying {}", self.table))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match candidate_from_pg_row(&row) {
                Some(candidate) => out.push(candidate),
                None => warn!("skipping row with unreadable createdat"),
            }
        }
        info!(fetched = out.len(), boundary = %boundary, "fetched candidate rows");
        Ok(out)
    }
}

fn candidate_from_pg_row(row: &PgRow) -> Option<CandidateRow> {
    Some(CandidateRow {
        email: first_text(row, &["emailaddress", "email"]),
        requester_name: first_text(row, &["newusername"]),
        phone_number: first_text(row, &["phonenumber"]),
        department: first_text(row, &["departmentname"]),
        job_title: first_text(row, &["job"]),
        cost_center: first_text(row, &["costcenter"]),
        comments: first_text(row, &["comments"]),
        category: first_text(row, &["timeframe"]),
        needed_by: read_date(row, "dateneededby"),
        ends_on: read_date(row, "approximateendingdate"),
        hardware: first_text(row, &["handsetsandheadsets"]),
        created_on: read_date(row, "createdat")?,
    })
}

fn first_text(row: &PgRow, columns: &[&str]) -> Option<String> {
    columns
        .iter()
        .find_map(|column| row.try_get::<Option<String>, _>(*column).ok().flatten())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Date columns arrive as DATE, TIMESTAMP, or loosely-formatted text
/// depending on the upstream schema vintage.
fn read_date(row: &PgRow, column: &str) -> Option<NaiveDate> {
    if let Ok(Some(date)) = row.try_get::<Option<NaiveDate>, _>(column) {
        return Some(date);
    }
    if let Ok(Some(stamp)) = row.try_get::<Option<NaiveDateTime>, _>(column) {
        return Some(stamp.date());
    }
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .and_then(|text| parse_source_date(&text))
}

/// Addressing for one service-desk request form.
#[derive(Debug, Clone)]
pub struct FormAddress {
    pub cloud_id: String,
    pub service_desk_id: String,
    pub request_type_id: String,
}

impl FormAddress {
    fn validate(&self) -> Result<()> {
        ensure!(!self.cloud_id.is_empty(), "cloud id must not be empty");
        ensure!(
            !self.service_desk_id.is_empty(),
            "service desk id must not be empty"
        );
        ensure!(
            !self.request_type_id.is_empty(),
            "request type id must not be empty"
        );
        Ok(())
    }
}

/// Fetches the form definition from the Jira Forms cloud API.
pub struct JiraFormSource {
    client: ApiClient,
    address: FormAddress,
}

impl JiraFormSource {
    pub fn new(client: ApiClient, address: FormAddress) -> Self {
        Self { client, address }
    }
}

#[async_trait]
impl FormSource for JiraFormSource {
    async fn fetch_form_definition(&self) -> Result<JsonValue> {
        self.address.validate()?;
        let url = format!(
            "https://api.atlassian.com/jira/forms/cloud/{}/servicedesk/{}/requesttype/{}/form",
            self.address.cloud_id, self.address.service_desk_id, self.address.request_type_id
        );
        info!(
            service_desk_id = %self.address.service_desk_id,
            request_type_id = %self.address.request_type_id,
            "fetching form definition"
        );
        self.client
            .get_json(&url)
            .await
            .context("fetching form definition")
    }
}

/// Creates customer requests through the Service Desk REST API.
pub struct JiraTicketSink {
    client: ApiClient,
    site_domain: String,
    service_desk_id: String,
    request_type_id: String,
}

impl JiraTicketSink {
    pub fn new(
        client: ApiClient,
        site_domain: impl Into<String>,
        service_desk_id: impl Into<String>,
        request_type_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            site_domain: site_domain.into(),
            service_desk_id: service_desk_id.into(),
            request_type_id: request_type_id.into(),
        }
    }
}

#[async_trait]
impl TicketSink for JiraTicketSink {
    async fn create_request(&self, fields: &MappedFields) -> Result<String, SubmissionError> {
        let url = format!("https://{}/rest/servicedeskapi/request", self.site_domain);
        let payload = build_request_payload(fields, &self.service_desk_id, &self.request_type_id);
        info!(summary = %fields.summary, "creating service desk request");
        let resp = self.client.post_json(&url, &payload).await?;
        Ok(extract_issue_key(&resp))
    }
}

fn build_request_payload(
    fields: &MappedFields,
    service_desk_id: &str,
    request_type_id: &str,
) -> JsonValue {
    serde_json::json!({
        "form": { "answers": fields.answers },
        "isAdfRequest": false,
        "requestFieldValues": {
            "summary": fields.summary,
            "description": fields.description,
        },
        "requestTypeId": request_type_id,
        "serviceDeskId": service_desk_id,
    })
}

/// The create-request response varies by deployment; probe the known key
/// locations and fall back to a truncated dump rather than discarding a
/// ticket that was already created.
fn extract_issue_key(resp: &JsonValue) -> String {
    let probed = resp
        .get("issueKey")
        .or_else(|| resp.get("request").and_then(|request| request.get("issueKey")))
        .or_else(|| resp.get("key"))
        .or_else(|| resp.get("requestNumber"));
    if let Some(value) = probed {
        match value {
            JsonValue::String(key) => return key.clone(),
            JsonValue::Number(key) => return key.to_string(),
            _ => {}
        }
    }
    warn!("create-request response carried no recognizable issue key");
    let mut dump = resp.to_string();
    dump.truncate(200);
    dump
}
