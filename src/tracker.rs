//! Jira ticket source.
//!
//! Implements [`TicketSource`] over the Jira REST API v2:
//!
//! - `GET /rest/api/2/search?jql=...&startAt=...&maxResults=...` for paging
//! - `GET /rest/api/2/issue/{key}` for a single ticket
//!
//! Authentication is HTTP basic with `tracker.email` and the
//! `JIRA_API_TOKEN` environment variable. Without an email the token is
//! sent as a bearer token (Jira Data Center personal access tokens).
//!
//! Configured `[[tracker.extra_fields]]` are requested alongside the
//! standard fields and handed to the normalizer under their labels.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use ticket_dedup_core::models::{ExtraField, Ticket};
use ticket_dedup_core::source::TicketSource;

use crate::config::{ExtraFieldConfig, TrackerConfig};
use crate::http;

const STANDARD_FIELDS: &str = "summary,description,created,updated,status,labels,priority";

/// Build the ticket source configured in `[tracker]`.
pub fn create_source(config: &TrackerConfig) -> Result<Arc<dyn TicketSource>> {
    match config.provider.as_str() {
        "jira" => Ok(Arc::new(JiraSource::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledSource)),
        other => bail!("Unknown tracker provider: {}", other),
    }
}

/// Source used when no tracker is configured. Every call fails.
pub struct DisabledSource;

#[async_trait]
impl TicketSource for DisabledSource {
    async fn search(
        &self,
        _filter: &str,
        _start_at: usize,
        _max_results: usize,
    ) -> Result<Vec<Ticket>> {
        bail!("Ticket tracker is disabled; set [tracker] provider = \"jira\"")
    }

    async fn fetch(&self, _key: &str) -> Result<Ticket> {
        bail!("Ticket tracker is disabled; set [tracker] provider = \"jira\"")
    }
}

pub struct JiraSource {
    client: reqwest::Client,
    base_url: String,
    email: Option<String>,
    token: String,
    max_retries: u32,
    extra_fields: Vec<ExtraFieldConfig>,
}

impl JiraSource {
    /// # Errors
    ///
    /// Fails when `base_url` is missing or `JIRA_API_TOKEN` is not set.
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("tracker.base_url required for Jira"))?;
        let token = std::env::var("JIRA_API_TOKEN")
            .map_err(|_| anyhow::anyhow!("JIRA_API_TOKEN environment variable not set"))?;

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            token,
            max_retries: config.max_retries,
            extra_fields: config.extra_fields.clone(),
        })
    }

    fn fields_param(&self) -> String {
        let mut fields = STANDARD_FIELDS.to_string();
        for extra in &self.extra_fields {
            fields.push(',');
            fields.push_str(&extra.field);
        }
        fields
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url).header("Accept", "application/json");
        match &self.email {
            Some(email) => req.basic_auth(email, Some(&self.token)),
            None => req.bearer_auth(&self.token),
        }
    }
}

#[async_trait]
impl TicketSource for JiraSource {
    async fn search(
        &self,
        filter: &str,
        start_at: usize,
        max_results: usize,
    ) -> Result<Vec<Ticket>> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let fields = self.fields_param();
        let start = start_at.to_string();
        let max = max_results.to_string();

        let json = http::send_json("Jira", self.max_retries, || {
            self.get(&url).query(&[
                ("jql", filter),
                ("startAt", start.as_str()),
                ("maxResults", max.as_str()),
                ("fields", fields.as_str()),
            ])
        })
        .await
        .with_context(|| format!("Jira search failed at startAt={}", start_at))?;

        let tickets = parse_search_response(&json, &self.extra_fields)?;
        debug!(start_at, returned = tickets.len(), "jira search page");
        Ok(tickets)
    }

    async fn fetch(&self, key: &str) -> Result<Ticket> {
        let url = format!("{}/rest/api/2/issue/{}", self.base_url, key);
        let fields = self.fields_param();

        let json = http::send_json("Jira", self.max_retries, || {
            self.get(&url).query(&[("fields", fields.as_str())])
        })
        .await
        .with_context(|| format!("Failed to fetch Jira issue {}", key))?;

        parse_issue(&json, &self.extra_fields)
    }
}

/// Parse the `issues` array of a search response, in response order.
pub fn parse_search_response(
    json: &Value,
    extra_fields: &[ExtraFieldConfig],
) -> Result<Vec<Ticket>> {
    let issues = json
        .get("issues")
        .and_then(|i| i.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Jira response: missing issues array"))?;

    issues.iter().map(|issue| parse_issue(issue, extra_fields)).collect()
}

/// Parse one issue object.
///
/// Null summary and description become empty strings (the normalizer
/// rejects them later); null status or priority become `"None"`.
pub fn parse_issue(issue: &Value, extra_fields: &[ExtraFieldConfig]) -> Result<Ticket> {
    let key = issue
        .get("key")
        .and_then(|k| k.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid Jira issue: missing key"))?
        .to_string();
    let fields = issue
        .get("fields")
        .ok_or_else(|| anyhow::anyhow!("Invalid Jira issue {}: missing fields", key))?;

    let created = parse_timestamp(fields.get("created"))
        .with_context(|| format!("Invalid created timestamp on {}", key))?;
    let updated = parse_timestamp(fields.get("updated"))
        .with_context(|| format!("Invalid updated timestamp on {}", key))?;

    let labels = fields
        .get("labels")
        .and_then(|l| l.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let extra_fields = extra_fields
        .iter()
        .map(|cfg| ExtraField::new(&cfg.label, field_text(fields.get(&cfg.field))))
        .collect();

    Ok(Ticket {
        key,
        summary: field_text(fields.get("summary")),
        description: field_text(fields.get("description")),
        created,
        updated,
        status: named(fields.get("status")),
        priority: named(fields.get("priority")),
        labels,
        extra_fields,
    })
}

/// Jira timestamps look like `2024-03-01T09:30:00.000+0000`.
fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>> {
    let s = value
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing timestamp"))?;
    let parsed = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .with_context(|| format!("unrecognized timestamp '{}'", s))?;
    Ok(parsed.with_timezone(&Utc))
}

/// The `name` of an object field such as `status` or `priority`.
fn named(value: Option<&Value>) -> String {
    value
        .and_then(|v| v.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or("None")
        .to_string()
}

/// Flatten a field value to text: strings as-is, option objects by
/// `value` or `name`, arrays joined with `", "`, null as empty.
fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| field_text(Some(v)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Some(Value::Object(map)) => map
            .get("value")
            .or_else(|| map.get("name"))
            .map(|v| field_text(Some(v)))
            .unwrap_or_default(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn extras() -> Vec<ExtraFieldConfig> {
        vec![
            ExtraFieldConfig {
                field: "customfield_10357".to_string(),
                label: "Analysis Findings".to_string(),
            },
            ExtraFieldConfig {
                field: "customfield_10356".to_string(),
                label: "Additional Information".to_string(),
            },
        ]
    }

    #[test]
    fn test_parse_search_response() {
        let json = serde_json::json!({
            "startAt": 0,
            "maxResults": 100,
            "total": 2,
            "issues": [
                {
                    "key": "NAV-101",
                    "fields": {
                        "summary": "Route calculation fails in Korea region",
                        "description": "No route between two valid addresses.",
                        "created": "2024-03-01T09:30:00.000+0000",
                        "updated": "2024-03-03T12:00:00.000+0100",
                        "status": { "name": "Open" },
                        "priority": { "name": "Major" },
                        "labels": ["navigation", "korea"],
                        "customfield_10357": "Map data gap in tile 42",
                        "customfield_10356": null
                    }
                },
                {
                    "key": "NAV-102",
                    "fields": {
                        "summary": "Crash on start",
                        "description": null,
                        "created": "2024-03-02T00:00:00.000+0000",
                        "updated": "2024-03-02T00:00:00.000+0000",
                        "status": { "name": "Closed" },
                        "priority": null,
                        "labels": [],
                        "customfield_10357": { "value": "Reproduced" },
                        "customfield_10356": ["log A", "log B"]
                    }
                }
            ]
        });

        let tickets = parse_search_response(&json, &extras()).unwrap();
        assert_eq!(tickets.len(), 2);

        let first = &tickets[0];
        assert_eq!(first.key, "NAV-101");
        assert_eq!(first.status, "Open");
        assert_eq!(first.priority, "Major");
        assert_eq!(first.labels, vec!["navigation", "korea"]);
        assert_eq!(first.created, Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        assert_eq!(first.updated, Utc.with_ymd_and_hms(2024, 3, 3, 11, 0, 0).unwrap());
        assert_eq!(first.extra_fields[0].label, "Analysis Findings");
        assert_eq!(first.extra_fields[0].value, "Map data gap in tile 42");
        assert_eq!(first.extra_fields[1].value, "");

        let second = &tickets[1];
        assert_eq!(second.description, "");
        assert_eq!(second.priority, "None");
        assert_eq!(second.extra_fields[0].value, "Reproduced");
        assert_eq!(second.extra_fields[1].value, "log A, log B");
    }

    #[test]
    fn test_missing_issues_array_is_error() {
        let json = serde_json::json!({ "errorMessages": ["bad jql"] });
        assert!(parse_search_response(&json, &[]).is_err());
    }

    #[test]
    fn test_bad_timestamp_is_error() {
        let json = serde_json::json!({
            "key": "NAV-1",
            "fields": { "summary": "s", "created": "yesterday", "updated": "yesterday" }
        });
        assert!(parse_issue(&json, &[]).is_err());
    }

    #[test]
    fn test_rfc3339_timestamp_accepted() {
        let json = serde_json::json!({
            "key": "NAV-1",
            "fields": {
                "summary": "s",
                "created": "2024-05-01T08:00:00Z",
                "updated": "2024-05-01T08:00:00+02:00"
            }
        });
        let ticket = parse_issue(&json, &[]).unwrap();
        assert_eq!(ticket.updated, Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap());
        assert!(ticket.labels.is_empty());
        assert_eq!(ticket.status, "None");
    }

    #[tokio::test]
    async fn test_disabled_source_errors() {
        let source = DisabledSource;
        assert!(source.search("project = NAV", 0, 10).await.is_err());
        assert!(source.fetch("NAV-1").await.is_err());
    }
}
