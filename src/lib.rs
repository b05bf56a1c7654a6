//! # Chat Harness
//!
//! A retrieval-augmented chat backend.
//!
//! Every request runs the same pipeline: embed the user's message, fetch the
//! most similar stored records, assemble a prompt around them, and ask a
//! completion model for a reply. Two modes share that pipeline:
//!
//! - **memory**: retrieves the caller's own past exchanges and stores each
//!   new exchange (embedded) once the reply is produced.
//! - **knowledge**: retrieves sections of ingested reference documents and
//!   writes nothing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │  HTTP /  │──▶│ Orchestrator │──▶│  SQLite    │
//! │  CLI     │   │ embed→match  │   │ chat_hist  │
//! └──────────┘   │ →prompt→chat │   │ page_sects │
//!                └──────┬───────┘   └─────▲─────┘
//!                       │                 │
//!                       ▼                 │
//!               ┌──────────────┐   ┌──────┴─────┐
//!               │ OpenAI-compat│   │  ingest    │
//!               │  / Ollama    │   │ (markdown) │
//!               └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chx init                              # create database
//! chx ingest                            # load reference markdown
//! chx token issue alice                 # mint a bearer token
//! chx serve                             # start HTTP server
//! chx ask "What is the refund policy?" --mode knowledge
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`embedding`] | Embedding client abstraction and vector utilities |
//! | [`completion`] | Chat-completion client abstraction |
//! | [`store`] | Vector, exchange, and section storage |
//! | [`prompt`] | Prompt assembly |
//! | [`tokens`] | Token accounting |
//! | [`pipeline`] | Request orchestration |
//! | [`auth`] | Bearer-token validation |
//! | [`server`] | HTTP server |
//! | [`connector_fs`] | Markdown file discovery |
//! | [`chunk`] | Heading-boundary section splitting |
//! | [`ingest`] | Reference-document ingestion |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod server;
pub mod store;
pub mod tokens;
