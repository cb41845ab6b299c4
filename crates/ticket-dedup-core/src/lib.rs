//! # Ticket Dedup Core
//!
//! The duplicate-retrieval engine behind `tdup`: canonical-summary
//! normalization, the ticket catalog, a persistent vector index, and the
//! [`DuplicateFinder`](finder::DuplicateFinder) that ties them together.
//!
//! This crate makes no network calls. The issue tracker, the
//! text-generation backend, and the embedding backend are injected
//! through the [`TicketSource`](source::TicketSource),
//! [`CompletionBackend`](normalize::CompletionBackend), and
//! [`EmbeddingProvider`](embedding::EmbeddingProvider) traits. Concrete
//! HTTP clients live in the `ticket-dedup` app crate.
//!
//! ## Data flow
//!
//! ```text
//! tickets ──▶ Normalizer ──▶ Catalog ──▶ Embedding ──▶ VectorIndex
//!                                                        │
//! query text ──▶ Embedding ──▶ VectorIndex::search ──▶ threshold ──▶ matches
//! ```

pub mod catalog;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod finder;
pub mod index;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod snapshot;
pub mod source;

pub use error::{DedupError, Result};
