//! # VeriLex
//!
//! Contract review service: accepts a PDF, extracts its text, asks a
//! language model for a structured risk analysis, and keeps a bounded
//! history of results.
//!
//! The output is informational only and never legal advice.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────┐
//! │  Upload  │──▶│ Extract  │──▶│ Analysis │──▶│ Normalize │
//! │   gate   │   │  (PDF)   │   │  (LLM)   │   │ + fallback│
//! └──────────┘   └──────────┘   └──────────┘   └─────┬─────┘
//!                                                    │
//!                     ┌──────────────────────────────┤
//!                     ▼                              ▼
//!               ┌──────────┐                  ┌──────────┐
//!               │ History  │                  │   HTTP   │
//!               │ (SQLite) │                  │ response │
//!               └──────────┘                  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=...
//! verilex check                     # verify config and credential
//! verilex analyze ./lease.pdf       # one-off analysis, printed as JSON
//! verilex serve                     # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`upload`] | Single-file upload validation |
//! | [`extract`] | PDF text extraction |
//! | [`analysis`] | Analysis service abstraction and invoker |
//! | [`normalize`] | Response recovery and schema validation |
//! | [`history`] | Bounded analysis history |
//! | [`pipeline`] | Upload-to-analysis controller |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod history;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod server;
pub mod upload;
