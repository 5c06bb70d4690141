//! # harness-server
//!
//! The process under test: an HTTP driver that performs one broker
//! operation per request, hosting the relay that crashes it.
//!
//! ## Architecture
//!
//! ```text
//!  GET /mq-test ──► Dispatcher ──► test-queue / in-queue / out-queue
//!                                      │               ▲
//!                                      ▼               │
//!                                ListenerPool ──► RelayConsumer
//!                                                      │
//!                                   every Nth message ─┴─► exit(1)
//! ```
//!
//! ## Endpoints
//!
//! - `/mq-test?request=<kind>&messageCount=<n>` - driver (text/html)
//! - `/health` - JSON status
//! - `/metrics` - Prometheus text

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod server;

pub use config::Config;
pub use error::{DispatchError, HarnessError};
pub use server::Harness;
