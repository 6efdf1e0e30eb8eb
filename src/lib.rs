//! Ase chat: a persistent multi-conversation chat client and its mediating
//! server, sharing one wire protocol.
//!
//! The client side ([`session`], [`conversations`], [`storage`], [`config`])
//! keeps conversations durable across restarts and drives the send cycle.
//! The server side ([`server`], [`llm`]) gates every request through rate
//! limiting, validation, and prompt composition before it reaches a model
//! provider. [`protocol`] is the JSON contract between the two.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![forbid(unsafe_op_in_unsafe_fn)]

/// Settings record and its persistence.
pub mod config;
/// Conversation types and the durable repository.
pub mod conversations;
/// Model provider abstraction and the OpenAI-compatible client.
pub mod llm;
/// The JSON contract between client and server.
pub mod protocol;
/// HTTP surface: mediation pipeline, rate limiting, routes.
pub mod server;
/// Client-side session state machine.
pub mod session;
/// Key/value persistence with schema migration.
pub mod storage;
