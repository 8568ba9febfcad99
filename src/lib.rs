//! # OpAMP client engine for instrumentation agents
//!
//! An embeddable client for the OpAMP management protocol: an
//! instrumentation agent reports its state to a remote server on a timer
//! and receives remote configuration in the responses.
//!
//! The crate is the protocol engine only. It owns the request/response
//! state machine, the retry-and-backoff transport loop, the thread-safe
//! shared client state, and the incremental "recipe" mechanism that
//! decides which fields each outgoing message carries. Everything around
//! it — telemetry export, crash capture, UI instrumentation — is the host
//! application's business.
//!
//! ## Not supported
//! The following will *not* be supported by this library
//!
//! * Websocket transport; the protocol here is HTTP-polled, half duplex
//! * Package management and agent lifecycle supervision
//! * Persistence of state in external storage
//! * Authorization or access control beyond forwarding an api key header
//!
//! # Getting started
//!
//! Implement [`api::Callback`] for whatever should react to the server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use opamp_agent_client::api::{Callback, ClientConfig, MessageData};
//! use opamp_agent_client::client::OpampClient;
//!
//! struct Agent;
//!
//! impl Callback for Agent {
//!     fn on_message(&self, message: MessageData) {
//!         if let Some(remote_config) = message.remote_config {
//!             // apply it, then report back via set_remote_config_status
//!             let _ = remote_config.config_hash;
//!         }
//!     }
//! }
//!
//! # async fn run() {
//! let config = ClientConfig::builder()
//!     .endpoint("https://opamp.example.com/v1/opamp")
//!     .service("checkout", "1.4.0")
//!     .build();
//! let client = OpampClient::with_http_sender(config);
//! client.start(Arc::new(Agent));
//! // ... the loop polls every 30 seconds until ...
//! client.stop();
//! # }
//! ```
//!
//! # Under the hood
//!
//! ## Recipes
//!
//! The first request after `start()` carries the full agent state. After
//! that, a field is only re-sent when its state cell was written (each
//! write marks the field for the next "recipe") or when the previous
//! attempt failed and its fields were merged forward. A request with
//! nothing to say is just a sequence-numbered heartbeat. This is the
//! bandwidth-minimization core of the protocol.
//!
//! ## The request loop
//!
//! One worker task fires on a fixed cadence, normally every 30 seconds.
//! Failures flip the loop into retry mode: HTTP 429/503 honor the
//! server's `Retry-After`, other HTTP errors use the configured retry
//! delay, and transport failures grow an exponential backoff multiplier
//! (1, 2, 4, … capped at 32) that one success resets. Exactly one request
//! is in flight at a time; on-demand triggers arriving mid-flight
//! coalesce into a single follow-up send. Nothing in the loop is fatal:
//! the engine degrades to silence rather than interrupting its host.
//!
//! ## Shared state
//!
//! Every mutable field lives in its own reader-writer-locked cell, so
//! frequent reads from instrumentation call sites never contend with
//! writes to unrelated fields. A write fires a post-commit hook, which is
//! how the recipe bookkeeping learns about changes.

pub mod api;
pub mod appenders;
pub mod client;
pub mod extras;
#[cfg(feature = "http")]
pub mod httpclient;
pub mod opamp;
pub mod recipe;
pub mod service;
pub mod state;
