//! # RespKV - An In-Memory Key-Value Server
//!
//! RespKV speaks a subset of the Redis wire protocol (RESP) over TCP and keeps
//! every key in memory, optionally with a time-to-live.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              RespKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   RESP      │    │              StorageEngine                   │   │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │   │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │   │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use respkv::connection::ConnectionStats;
//! use respkv::server::accept_loop;
//! use respkv::storage::{start_expiry_sweeper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     accept_loop(listener, storage, stats).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `GET key`
//! - `SET key value [PX milliseconds]`
//!
//! An unknown command, a missing argument or malformed RESP closes the
//! offending connection; other connections are unaffected.
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request decoder and reply encoder
//! - [`storage`]: thread-safe store with TTL support and the expiry sweeper
//! - [`commands`]: command dispatch
//! - [`connection`]: per-client session loop
//! - [`server`]: TCP accept loop
//! - [`config`]: command-line configuration
//!
//! ## Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: a read of an expired key returns nothing and removes it
//! 2. **Active**: a background task periodically removes expired keys nobody reads

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::{CommandError, CommandHandler};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, ProtocolError, RespParser, RespValue};
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host, all interfaces
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of RespKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
