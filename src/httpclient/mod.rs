//! The reqwest-backed [`Sender`] implementation.
//!
//! One HTTP POST per request, `application/x-protobuf` body, half duplex:
//! the response to the poll is the server's only way to talk back.

use std::time::Duration;

use async_trait::async_trait;
use prost::Message as ProstMessage;
use reqwest::Client as ReqwestClient;

use crate::api::{ClientConfig, ClientError, DEFAULT_ENDPOINT};
use crate::opamp::{AgentToServer, ServerToAgent};
use crate::service::{Sender, SenderResponse};

/// The `HttpSender` struct is the production transport: it posts encoded
/// messages to the management endpoint and decodes what comes back.
/// Construction never fails; an endpoint that does not parse as a URL is
/// replaced by the hardcoded default with a logged warning, since a bad
/// management URL must not take down the host application.
pub struct HttpSender {
    address: url::Url,
    api_key: String,
    client: ReqwestClient,
    timeout: Duration,
}

impl HttpSender {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> HttpSender {
        let address = url::Url::parse(endpoint).unwrap_or_else(|e| {
            log::warn!("malformed management endpoint {endpoint:?} ({e}), falling back to {DEFAULT_ENDPOINT}");
            url::Url::parse(DEFAULT_ENDPOINT).expect("default endpoint parses")
        });

        HttpSender {
            address,
            api_key: api_key.to_string(),
            client: ReqwestClient::new(),
            timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> HttpSender {
        HttpSender::new(&config.endpoint, &config.api_key, config.request_timeout)
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, message: &AgentToServer) -> Result<SenderResponse, ClientError> {
        let request_body = message.encode_to_vec();
        log::debug!(
            "posting {} bytes to [{}]",
            request_body.len(),
            &self.address
        );

        let mut request = self
            .client
            .post(self.address.clone())
            .header("Content-Type", "application/x-protobuf")
            .body(request_body)
            .timeout(self.timeout);
        if !self.api_key.is_empty() {
            request = request.header("api-key", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        if !response.status().is_success() {
            // Non-2xx bodies carry nothing we can use.
            return Ok(SenderResponse {
                status,
                retry_after,
                message: None,
            });
        }

        let response_body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let server_message = ServerToAgent::decode(response_body.as_ref())
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(SenderResponse {
            status,
            retry_after,
            message: Some(server_message),
        })
    }
}

/// Parses a `Retry-After` header value: either a delay in whole seconds
/// or an HTTP-date. A date in the past collapses to no hint.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    (date.with_timezone(&chrono::Utc) - chrono::Utc::now())
        .to_std()
        .ok()
}
