//! Core data models that flow through ingestion and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional free-text field attached to a ticket (e.g. analyst findings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraField {
    /// Human label used in the normalization prompt (e.g. `"Analysis Findings"`).
    pub label: String,
    pub value: String,
}

impl ExtraField {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Raw ticket as returned by the issue tracker, before normalization.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub status: String,
    pub priority: String,
    pub labels: Vec<String>,
    pub extra_fields: Vec<ExtraField>,
}

/// One ingested bug: the tracker's metadata plus its canonical summary.
///
/// Immutable within a snapshot. Shared as `Arc<TicketRecord>` between the
/// catalog and the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub key: String,
    pub summary: String,
    pub raw_description: String,
    pub normalized_text: String,
    pub status: String,
    pub priority: String,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketRecord {
    pub fn from_ticket(ticket: &Ticket, normalized_text: String) -> Self {
        Self {
            key: ticket.key.clone(),
            summary: ticket.summary.clone(),
            raw_description: ticket.description.clone(),
            normalized_text,
            status: ticket.status.clone(),
            priority: ticket.priority.clone(),
            labels: ticket.labels.clone(),
            created_at: ticket.created,
            updated_at: ticket.updated,
        }
    }
}

/// A likely duplicate returned by [`DuplicateFinder::query`](crate::finder::DuplicateFinder::query).
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: Vec<String>,
    /// `1 - distance`, in `[0, 1]`.
    pub similarity: f32,
    /// Similarity as a percentage with two decimals (`"92.35%"`).
    pub similarity_display: String,
    /// Length of the matched record's canonical summary, in characters.
    pub text_length: usize,
}

/// Format a `[0, 1]` score as a two-decimal percentage.
pub fn format_percent(score: f32) -> String {
    format!("{:.2}%", score * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.9235), "92.35%");
        assert_eq!(format_percent(1.0), "100.00%");
        assert_eq!(format_percent(0.0), "0.00%");
    }
}
