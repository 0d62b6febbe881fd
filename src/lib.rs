//! # a3s-feed
//!
//! Reconnecting event-feed client for the A3S game server.
//!
//! ## Overview
//!
//! The server publishes events per scope (`user`, `group`, `party`,
//! `server`) as a long-lived HTTP response whose body is a sequence of JSON
//! documents separated by the `0x1E` record separator. `a3s-feed` keeps one
//! subscription per scope alive across disconnects, routes every event to a
//! handler registered for its `<category>:<command>` type, and serializes
//! the user's own actions so only one runs at a time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_feed::{FeedClient, FeedConfig, Handler, Scope};
//!
//! # async fn example() -> a3s_feed::Result<()> {
//! let client = FeedClient::builder(FeedConfig::default())
//!     .route(Scope::User, "group", "user joined", Handler::sync(|payload| {
//!         println!("joined: {:?}", payload);
//!     }))
//!     .build()?;
//!
//! // Authenticates and starts the `user` subscription
//! client.login("alice", "secret").await?;
//!
//! // ... later
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **framer**: splits a byte stream into JSON documents
//! - **DispatchRegistry**: frozen routing table from scope/category/command to handlers
//! - **ReconnectingSubscription**: per-scope state machine with backoff
//! - **ActionSerializer**: at most one user action in flight
//! - **TaskSupervisor**: owns subscription tasks and the shutdown order
//! - **ApiClient**: action endpoints and stream requests over one connection pool

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod framer;
pub mod notify;
pub mod retry;
pub mod routes;
pub mod serializer;
pub mod session;
pub mod subscription;
pub mod supervisor;
pub mod types;

// Re-export core types
pub use api::ApiClient;
pub use client::{FeedClient, FeedClientBuilder};
pub use config::FeedConfig;
pub use dispatch::{DispatchOutcome, DispatchRegistry, Handler, RegistryBuilder};
pub use error::{FeedError, Result};
pub use framer::{frames, StreamFramer, DELIMITER};
pub use notify::{ChannelNotifier, LogNotifier, Notice, NoticeKind, Notifier};
pub use retry::RetryConfig;
pub use serializer::{ActionGuard, ActionOutcome, ActionSerializer};
pub use session::{Game, Id, Identity, SessionHandle, SessionState};
pub use subscription::{
    ByteStream, Connector, ReconnectingSubscription, StreamOutcome, SubscriptionState,
};
pub use supervisor::{TaskSupervisor, Teardown};
pub use types::{EventMessage, Inbound, Payload, Scope};
