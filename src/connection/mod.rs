//! Connection Handler Module
//!
//! Manages individual client connections. Every accepted connection runs in
//! its own Tokio task; the tasks share nothing but the storage engine and the
//! statistics counters.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() + spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Decode RESP │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use respkv::connection::{handle_connection, ConnectionStats};
//! use respkv::commands::CommandHandler;
//! use respkv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! let handler = CommandHandler::new(Arc::clone(&storage));
//! tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
