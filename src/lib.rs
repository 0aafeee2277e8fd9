//! # Docs Harness
//!
//! A local-first documentation and code indexing engine.
//!
//! Docs Harness walks a project tree, parses documentation and source files
//! into searchable items, and keeps them in SQLite. On top of the index it
//! offers ranked keyword search, code-reuse discovery, architecture lookups
//! and prompt templates whose placeholders are filled from project context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Scanner    │──▶│  Parsers    │──▶│   SQLite     │
//! │ globs/walk  │   │ md/txt/code │   │ items/prompts│
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ snapshot
//!                                     ┌──────▼───────┐
//!                                     │ SearchIndex  │
//!                                     └──────┬───────┘
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │   (dh)   │         │  tools   │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dh init                                # create database, load prompts
//! dh index                               # incremental reindex
//! dh search "retry policy"
//! dh reuse "circuit breaker" --service api-gateway
//! dh prompt apply code_review src/lib.rs
//! dh serve                               # start HTTP tool server
//! ```
//!
//! ## Embedding
//!
//! ```rust,no_run
//! use docs_harness::config::Config;
//! use docs_harness::engine::{Engine, SearchRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> docs_harness::error::Result<()> {
//! let engine = Engine::open(Config::for_project(".")).await?;
//! engine.reindex(false, &CancellationToken::new()).await?;
//! let hits = engine.search_docs("retry", &SearchRequest::default())?;
//! engine.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed engine errors |
//! | [`models`] | Core data types |
//! | [`scan`] | Project walk with include/exclude globs |
//! | [`parser`] | Parser trait and registry |
//! | [`markdown`], [`plaintext`], [`code`] | Built-in parsers |
//! | [`ingest`] | Incremental reindex pipeline |
//! | [`store`] | Persisted items |
//! | [`search`] | In-memory ranked search |
//! | [`context`] | Code reuse, prompt suggestions, architecture docs |
//! | [`prompts`], [`template`], [`resolve`] | Prompt templates and rendering |
//! | [`usage`] | Usage events and aggregates |
//! | [`engine`] | The engine handle tying everything together |
//! | [`traits`], [`tools`], [`server`] | HTTP tool surface |
//! | [`db`], [`migrate`] | Database connection and schema |

pub mod code;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod get;
pub mod ingest;
pub mod markdown;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod plaintext;
pub mod progress;
pub mod prompts;
pub mod resolve;
pub mod scan;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
pub mod template;
pub mod tokenize;
pub mod tools;
pub mod traits;
pub mod usage;
