//! Issue-tracker abstraction.
//!
//! The finder pages through a [`TicketSource`] during ingestion and
//! fetches single tickets for query-by-id. The Jira implementation lives
//! in the app crate; tests use in-memory sources.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Ticket;

#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Return up to `max_results` tickets matching `filter`, starting at
    /// offset `start_at` in the tracker's result order.
    async fn search(&self, filter: &str, start_at: usize, max_results: usize)
        -> Result<Vec<Ticket>>;

    /// Fetch one ticket by key.
    async fn fetch(&self, key: &str) -> Result<Ticket>;
}
