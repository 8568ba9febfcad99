#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use opamp_agent_client::api::{Callback, ClientError, MessageData};
use opamp_agent_client::opamp::{AgentToServer, ServerToAgent};
use opamp_agent_client::service::{Sender, SenderResponse};

/// What the scripted transport does with each request.
pub enum Behavior {
    Respond(ServerToAgent),
    HttpStatus(u16),
    Offline,
}

/// Transport double: records every outgoing message, emits it on a
/// channel so tests can await sends, and answers per the current
/// behavior.
pub struct MockSender {
    behavior: Mutex<Behavior>,
    sent: Mutex<Vec<AgentToServer>>,
    events: mpsc::UnboundedSender<AgentToServer>,
}

/// Routes the engine's `log` output to stderr so a failing test run shows
/// what the request loop was doing. Safe to call from every test; only
/// the first caller installs the logger.
pub fn init_logging() {
    let _ = simple_logger::SimpleLogger::new().init();
}

impl MockSender {
    pub fn new(behavior: Behavior) -> (Arc<MockSender>, mpsc::UnboundedReceiver<AgentToServer>) {
        init_logging();
        let (events, inbox) = mpsc::unbounded_channel();
        (
            Arc::new(MockSender {
                behavior: Mutex::new(behavior),
                sent: Mutex::new(Vec::new()),
                events,
            }),
            inbox,
        )
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<AgentToServer> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send(&self, message: &AgentToServer) -> Result<SenderResponse, ClientError> {
        self.sent.lock().unwrap().push(message.clone());
        let _ = self.events.send(message.clone());
        match &*self.behavior.lock().unwrap() {
            Behavior::Respond(reply) => Ok(SenderResponse {
                status: 200,
                retry_after: None,
                message: Some(reply.clone()),
            }),
            Behavior::HttpStatus(status) => Ok(SenderResponse {
                status: *status,
                retry_after: None,
                message: None,
            }),
            Behavior::Offline => Err(ClientError::Transport("connection refused".into())),
        }
    }
}

/// Callback double counting every delivery.
#[derive(Default)]
pub struct RecordingCallback {
    pub connects: AtomicUsize,
    pub connect_failures: AtomicUsize,
    pub error_responses: AtomicUsize,
    pub messages: Mutex<Vec<MessageData>>,
}

impl Callback for RecordingCallback {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connect_failed(&self, _error: &ClientError, _retry_after: Option<Duration>) {
        self.connect_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error_response(&self, _error: &ClientError, _retry_after: Option<Duration>) {
        self.error_responses.fetch_add(1, Ordering::SeqCst);
    }

    fn on_message(&self, message: MessageData) {
        self.messages.lock().unwrap().push(message);
    }
}

impl RecordingCallback {
    pub fn error_response_count(&self) -> usize {
        self.error_responses.load(Ordering::SeqCst)
    }

    pub fn connect_failure_count(&self) -> usize {
        self.connect_failures.load(Ordering::SeqCst)
    }
}

/// Awaits the next outgoing message, failing the test if none arrives.
pub async fn next_send(inbox: &mut mpsc::UnboundedReceiver<AgentToServer>) -> AgentToServer {
    tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("timed out waiting for a send")
        .expect("sender channel closed")
}
