//! # harness-types
//!
//! Shared types for the message-queue crash-injection harness.
//!
//! This crate provides the foundational types used across all harness crates:
//! - [`MessageId`], [`QueueName`] - Identity types
//! - [`Message`], [`Body`] - Broker payloads and their properties
//! - [`RequestKind`] - The closed set of driver operations
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod message;
mod request;

pub use error::TypesError;
pub use ids::{MessageId, QueueName};
pub use message::{
    Body, Message, IN_MESSAGE_ID_PROPERTY, QUEUE_MDB_REPLY_MESSAGE, QUEUE_MDB_TEXT_MESSAGE,
    QUEUE_TEXT_MESSAGE,
};
pub use request::RequestKind;
