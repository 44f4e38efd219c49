//! # contempt
//!
//! Client core for a real-time chat service: a resumable gateway
//! connection, an entity cache rebuilt from its dispatch stream, and a
//! rate-limit aware REST client.
//!
//! ```no_run
//! use std::sync::Arc;
//! use contempt::{Client, ClientConfig, LogStore};
//!
//! # async fn run() -> contempt::Result<()> {
//! let log = Arc::new(LogStore::default());
//! let client = Client::new(ClientConfig::with_token("token"), log)?;
//! client.connect().await?;
//! for guild in client.sorted_guilds().await {
//!     println!("{}", guild.name);
//! }
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod http;
pub mod log_store;
pub mod observe;

pub use cache::{Cached, EntityCache};
pub use client::{Client, DirectoryEntry};
pub use config::ClientConfig;
pub use dispatch::PacketDispatcher;
pub use error::{ClientError, Result};
pub use gateway::{ConnectionState, GatewayConfig, GatewayConnection};
pub use http::{HttpClient, HttpConfig, MessageHistory, MessageQuery, Route};
pub use log_store::{Direction, LogMessage, LogStore, LogVariant};
pub use observe::{Observable, Subscription};

pub use contempt_proto as proto;
