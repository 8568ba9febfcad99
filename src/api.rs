//! Public surface of the client: configuration, the embedding callback
//! trait, and the error taxonomy.

use std::time::Duration;

use crate::opamp::{capabilities, util, AgentConfigMap, AgentRemoteConfig};

/// Default endpoint used when the configured management URL does not parse.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4320/v1/opamp";

/// Normal polling cadence recommended by the protocol.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(30);

/// Base retry interval applied when a request fails.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// The `Callback` trait is implemented by the embedding agent. The client
/// invokes it from its worker task; implementations should hand long work
/// off rather than block the polling loop.
pub trait Callback: Send + Sync {
    /// The connection to the server is (re-)established: the first request
    /// since start or since a failure completed successfully.
    fn on_connect(&self) {}

    /// The request never reached the server (timeout, DNS, TLS, or a
    /// response body that failed to decode). `retry_after` is when the
    /// client will try again.
    fn on_connect_failed(&self, error: &ClientError, retry_after: Option<Duration>) {
        let _ = (error, retry_after);
    }

    /// The server answered with a non-2xx status or a protocol-level error
    /// response.
    fn on_error_response(&self, error: &ClientError, retry_after: Option<Duration>) {
        let _ = (error, retry_after);
    }

    /// A response carried remote configuration for the agent to apply.
    fn on_message(&self, message: MessageData) {
        let _ = message;
    }
}

/// Payload synthesized from a decoded server response and handed to
/// [`Callback::on_message`].
#[derive(Clone, Debug, PartialEq)]
pub struct MessageData {
    pub remote_config: Option<AgentRemoteConfig>,
}

/// Decoded protocol error kinds. The wire carries an open integer; every
/// value this client does not know lands in `Unrecognized` and is handled
/// like `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Unknown,
    BadRequest,
    Unavailable,
    Unrecognized(i32),
}

impl From<i32> for ErrorKind {
    fn from(raw: i32) -> Self {
        match raw {
            0 => ErrorKind::Unknown,
            1 => ErrorKind::BadRequest,
            2 => ErrorKind::Unavailable,
            other => ErrorKind::Unrecognized(other),
        }
    }
}

/// Everything that can go wrong between assembling a request and decoding
/// its response. None of these are fatal to the client: the polling loop
/// keeps retrying under the backoff policy and the embedder merely gets
/// told.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No response reached us at all.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("server returned http status {status}")]
    HttpStatus { status: u16 },

    /// A 2xx response decoded into a protocol-level error.
    #[error("server error response ({kind:?}): {message}")]
    Application { kind: ErrorKind, message: String },

    /// The response body was present but malformed. Retried exactly like
    /// a transport failure.
    #[error("malformed response body: {0}")]
    Decode(String),
}

/// Immutable client configuration, finalized by [`ClientConfigBuilder`].
/// The builder owns nothing the client later mutates; all runtime state
/// lives in the client's own cells.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub service_name: String,
    pub service_version: String,
    /// Extra identifying attributes appended to the agent description.
    pub attributes: Vec<(String, String)>,
    pub instance_uid: [u8; 16],
    pub capabilities: u64,
    pub flags: u64,
    pub request_delay: Duration,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub effective_config: Option<AgentConfigMap>,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Accumulates settings and produces one immutable [`ClientConfig`] at
/// `build()`. Unset fields fall back to protocol defaults.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        ClientConfigBuilder {
            config: ClientConfig {
                endpoint: DEFAULT_ENDPOINT.to_string(),
                api_key: String::new(),
                // The version belongs to the embedding service, not this
                // library; there is no meaningful fallback to invent.
                service_name: "unknown_service".to_string(),
                service_version: String::new(),
                attributes: Vec::new(),
                instance_uid: util::generate_instance_uid(),
                capabilities: capabilities::REPORTS_STATUS
                    | capabilities::ACCEPTS_REMOTE_CONFIG
                    | capabilities::REPORTS_EFFECTIVE_CONFIG
                    | capabilities::REPORTS_REMOTE_CONFIG,
                flags: 0,
                request_delay: DEFAULT_REQUEST_DELAY,
                retry_delay: DEFAULT_RETRY_DELAY,
                request_timeout: Duration::from_secs(10),
                effective_config: None,
            },
        }
    }
}

impl ClientConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = api_key.into();
        self
    }

    pub fn service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self.config.service_version = version.into();
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.attributes.push((key.into(), value.into()));
        self
    }

    pub fn instance_uid(mut self, uid: [u8; 16]) -> Self {
        self.config.instance_uid = uid;
        self
    }

    pub fn capabilities(mut self, capabilities: u64) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    pub fn flags(mut self, flags: u64) -> Self {
        self.config.flags = flags;
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn effective_config(mut self, config: AgentConfigMap) -> Self {
        self.config.effective_config = Some(config);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
