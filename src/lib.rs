//! # Ticket Dedup
//!
//! Finds likely duplicate bug tickets. Tickets are fetched from the issue
//! tracker, rewritten into a canonical technical summary by a language
//! model, embedded, and stored in a flat vector index. A new report is
//! then compared against that index and the nearest tickets above a
//! similarity threshold are flagged as probable duplicates.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌───────────────────┐
//! │   Jira   │──▶│ Normalizer │──▶│ Embedding │──▶│ db_YYYYMMDD_HHMMSS│
//! │ (search) │   │ (chat LLM) │   │ provider  │   │ index + catalog   │
//! └──────────┘   └────────────┘   └───────────┘   └─────────┬─────────┘
//!                                                           │
//!                                   tdup query ◀────────────┘
//! ```
//!
//! The engine (catalog, index, finder, snapshots) lives in
//! `ticket-dedup-core`; this crate supplies configuration, the HTTP
//! clients, and the `tdup` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! export JIRA_API_TOKEN=... OPENAI_API_KEY=...
//! tdup build "project = NAV AND type = Bug"
//! tdup query --text "Route calculation fails near Seoul" --normalize
//! tdup query --ticket NAV-1234 --status Open --status "In Progress"
//! tdup list
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`tracker`] | Jira ticket source |
//! | [`llm`] | Chat-completion backends for normalization |
//! | [`embedding`] | Embedding providers (OpenAI, Azure, Ollama) |
//! | [`http`] | Shared client, timeout, and retry policy |
//! | [`progress`] | Build progress on stderr |
//! | [`logging`] | tracing subscriber setup |
//! | [`build`], [`query`], [`snapshots`] | CLI commands |

pub mod build;
pub mod config;
pub mod embedding;
pub mod http;
pub mod llm;
pub mod logging;
pub mod progress;
pub mod query;
pub mod snapshots;
pub mod tracker;
