//! The timer-driven request loop.
//!
//! `RequestService` owns a single worker task that fires on a fixed
//! cadence (or a computed retry interval after failures), asks its handler
//! for the next message, pushes it through the injected [`Sender`], and
//! classifies the outcome. Exactly one request is ever in flight; a
//! trigger arriving mid-flight is coalesced into at most one immediate
//! follow-up send.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::api::{ClientError, ErrorKind};
use crate::opamp::{AgentToServer, ServerToAgent};

/// Cap for the exponential backoff multiplier: 0 → 1 → 2 → 4 → … → 32.
pub const MAX_BACKOFF_MULTIPLIER: u32 = 32;

/// What came back from one transport round trip. `message` is present
/// only when the response carried a decodable body (2xx).
#[derive(Clone, Debug)]
pub struct SenderResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, honored on 429/503.
    pub retry_after: Option<Duration>,
    pub message: Option<ServerToAgent>,
}

/// The transport contract. The engine never opens sockets itself; tests
/// inject mocks and production wires up the reqwest-backed
/// `httpclient::HttpSender`.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, message: &AgentToServer) -> Result<SenderResponse, ClientError>;
}

/// Supplies outgoing messages and receives classified outcomes. The
/// client implements this to sit on both sides of the loop.
pub trait RequestHandler: Send + Sync {
    fn supply_next_message(&self) -> AgentToServer;
    fn on_request_success(&self, response: ServerToAgent);
    /// The server answered, but unfavorably (bad status or a decoded
    /// error response).
    fn on_request_failed(&self, error: ClientError, retry_after: Option<Duration>);
    /// No response reached us at all; also covers undecodable bodies.
    fn on_connection_failure(&self, error: ClientError, retry_after: Option<Duration>);
}

#[derive(Debug)]
struct Shared {
    running: bool,
    stopped: bool,
    retry_mode: bool,
    backoff: u32,
    retry_interval: Duration,
    /// Set by `stop()`: the worker performs one last send before exiting.
    final_send: bool,
    task: Option<JoinHandle<()>>,
}

/// Timer-driven sender with retry/backoff policy. Lifecycle is one-way:
/// Idle → Running → Stopped, never reversed.
pub struct RequestService {
    sender: Arc<dyn Sender>,
    request_delay: Duration,
    retry_delay: Duration,
    shared: Arc<Mutex<Shared>>,
    wake: Arc<Notify>,
}

impl RequestService {
    pub fn new(sender: Arc<dyn Sender>, request_delay: Duration, retry_delay: Duration) -> Self {
        RequestService {
            sender,
            request_delay,
            retry_delay,
            shared: Arc::new(Mutex::new(Shared {
                running: false,
                stopped: false,
                retry_mode: false,
                backoff: 0,
                retry_interval: retry_delay,
                final_send: false,
                task: None,
            })),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Starts the worker task. Only the Idle → Running transition does
    /// anything; calls while Running or after `stop()` are no-ops. Must
    /// be called from within a tokio runtime.
    pub fn start(&self, handler: Arc<dyn RequestHandler>) {
        let mut shared = self.lock();
        if shared.running || shared.stopped {
            log::debug!("request service start ignored, already started or stopped");
            return;
        }
        shared.running = true;

        // The worker holds the handler weakly: it must not keep the
        // client alive, or dropping a started client would leak a task
        // that polls the server forever.
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.sender),
            Arc::downgrade(&handler),
            Arc::clone(&self.shared),
            Arc::clone(&self.wake),
            self.request_delay,
            self.retry_delay,
        ));
        shared.task = Some(task);
    }

    /// Schedules an immediate out-of-cadence send. The interval that
    /// follows it is a full `request_delay` again; triggers arriving
    /// while a request is in flight collapse into one pending send.
    pub fn send_request(&self) {
        {
            let shared = self.lock();
            if !shared.running {
                return;
            }
        }
        self.wake.notify_one();
    }

    /// Running → Stopped, terminal. The worker performs one final send
    /// (so a pending disconnect marker still goes out) and then the timer
    /// is cancelled for good. A no-op if the service never ran.
    pub fn stop(&self) {
        {
            let mut shared = self.lock();
            if !shared.running || shared.stopped {
                return;
            }
            shared.running = false;
            shared.stopped = true;
            shared.final_send = true;
        }
        self.wake.notify_one();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for RequestService {
    fn drop(&mut self) {
        if let Some(task) = self.lock().task.take() {
            task.abort();
        }
    }
}

async fn run_loop(
    sender: Arc<dyn Sender>,
    handler: Weak<dyn RequestHandler>,
    shared: Arc<Mutex<Shared>>,
    wake: Arc<Notify>,
    request_delay: Duration,
    retry_delay: Duration,
) {
    loop {
        let interval = {
            let s = shared.lock().unwrap_or_else(|e| e.into_inner());
            if s.stopped && !s.final_send {
                break;
            }
            if s.retry_mode {
                s.retry_interval
            } else {
                request_delay
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wake.notified() => {}
        }

        let finishing = {
            let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
            if s.stopped && !s.final_send {
                break;
            }
            if s.stopped {
                s.final_send = false;
                true
            } else {
                false
            }
        };

        let Some(handler) = handler.upgrade() else {
            let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
            s.running = false;
            log::debug!("request handler dropped, halting request loop");
            break;
        };

        let message = handler.supply_next_message();
        // A disconnect report is always the last word: if a racing stop()
        // queued the marker into a send that was already underway, that
        // send is the final one and no empty flush follows it.
        let disconnecting = message.agent_disconnect.is_some();
        log::debug!("sending request, sequence_num {}", message.sequence_num);
        let outcome = sender.send(&message).await;
        apply_outcome(outcome, &shared, handler.as_ref(), retry_delay);

        if finishing || disconnecting {
            let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
            s.final_send = false;
            s.running = false;
            s.stopped = true;
            log::debug!("request service stopped after final send");
            break;
        }
    }
}

fn next_backoff(current: u32) -> u32 {
    if current == 0 {
        1
    } else {
        (current * 2).min(MAX_BACKOFF_MULTIPLIER)
    }
}

/// Classifies one completed attempt, updates retry bookkeeping, and
/// reports to the handler. Success resets the backoff counter and resumes
/// the normal cadence.
fn apply_outcome(
    outcome: Result<SenderResponse, ClientError>,
    shared: &Mutex<Shared>,
    handler: &dyn RequestHandler,
    retry_delay: Duration,
) {
    match outcome {
        Ok(response) if (200..300).contains(&response.status) => {
            let mut message = response.message.unwrap_or_default();
            if let Some(error_response) = message.error_response.take() {
                let kind = ErrorKind::from(error_response.r#type);
                let server_delay = error_response
                    .retry_info
                    .map(|info| Duration::from_nanos(info.retry_after_nanoseconds))
                    .filter(|d| !d.is_zero());
                let delay = {
                    let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
                    let delay = match (kind, server_delay) {
                        // An explicit "come back later" from an overloaded
                        // server overrides local backoff growth.
                        (ErrorKind::Unavailable, Some(d)) => d,
                        _ => {
                            s.backoff = next_backoff(s.backoff);
                            retry_delay * s.backoff
                        }
                    };
                    s.retry_mode = true;
                    s.retry_interval = delay;
                    delay
                };
                log::warn!(
                    "server error response ({kind:?}), retrying in {}s",
                    delay.as_secs()
                );
                handler.on_request_failed(
                    ClientError::Application {
                        kind,
                        message: error_response.error_message,
                    },
                    Some(delay),
                );
            } else {
                {
                    let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
                    s.backoff = 0;
                    s.retry_mode = false;
                }
                handler.on_request_success(message);
            }
        }
        Ok(response) => {
            let delay = match response.status {
                429 | 503 => response.retry_after.unwrap_or(retry_delay),
                _ => retry_delay,
            };
            {
                let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
                s.retry_mode = true;
                s.retry_interval = delay;
            }
            log::warn!(
                "request failed with http status {}, retrying in {}s",
                response.status,
                delay.as_secs()
            );
            handler.on_request_failed(
                ClientError::HttpStatus {
                    status: response.status,
                },
                Some(delay),
            );
        }
        Err(error) => {
            let delay = {
                let mut s = shared.lock().unwrap_or_else(|e| e.into_inner());
                s.backoff = next_backoff(s.backoff);
                s.retry_mode = true;
                s.retry_interval = retry_delay * s.backoff;
                s.retry_interval
            };
            log::warn!("{error}, retrying in {}s", delay.as_secs());
            handler.on_connection_failure(error, Some(delay));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opamp::{RetryInfo, ServerErrorResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHandler {
        supplied: AtomicUsize,
        successes: AtomicUsize,
        request_failures: Mutex<Vec<Option<Duration>>>,
        connection_failures: Mutex<Vec<Option<Duration>>>,
    }

    impl RequestHandler for RecordingHandler {
        fn supply_next_message(&self) -> AgentToServer {
            let n = self.supplied.fetch_add(1, Ordering::SeqCst) as u64;
            AgentToServer {
                sequence_num: n + 1,
                ..Default::default()
            }
        }

        fn on_request_success(&self, _response: ServerToAgent) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_request_failed(&self, _error: ClientError, retry_after: Option<Duration>) {
            self.request_failures.lock().unwrap().push(retry_after);
        }

        fn on_connection_failure(&self, _error: ClientError, retry_after: Option<Duration>) {
            self.connection_failures.lock().unwrap().push(retry_after);
        }
    }

    #[derive(Default)]
    struct CountingSender {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Sender for CountingSender {
        async fn send(&self, _message: &AgentToServer) -> Result<SenderResponse, ClientError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(SenderResponse {
                status: 200,
                retry_after: None,
                message: Some(ServerToAgent::default()),
            })
        }
    }

    fn fresh_shared(retry_delay: Duration) -> Mutex<Shared> {
        Mutex::new(Shared {
            running: true,
            stopped: false,
            retry_mode: false,
            backoff: 0,
            retry_interval: retry_delay,
            final_send: false,
            task: None,
        })
    }

    #[test]
    fn backoff_doubles_and_caps_at_32() {
        let mut multiplier = 0;
        let mut seen = Vec::new();
        for _ in 0..8 {
            multiplier = next_backoff(multiplier);
            seen.push(multiplier);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 32, 32]);
    }

    #[test]
    fn transport_failures_grow_the_retry_interval() {
        let retry = Duration::from_secs(2);
        let shared = fresh_shared(retry);
        let handler = RecordingHandler::default();

        for expected in [2u64, 4, 8] {
            apply_outcome(
                Err(ClientError::Transport("timeout".into())),
                &shared,
                &handler,
                retry,
            );
            let s = shared.lock().unwrap();
            assert!(s.retry_mode);
            assert_eq!(s.retry_interval, Duration::from_secs(expected));
        }
        assert_eq!(handler.connection_failures.lock().unwrap().len(), 3);
    }

    #[test]
    fn success_resets_backoff_and_retry_mode() {
        let retry = Duration::from_secs(2);
        let shared = fresh_shared(retry);
        let handler = RecordingHandler::default();

        apply_outcome(
            Err(ClientError::Transport("timeout".into())),
            &shared,
            &handler,
            retry,
        );
        apply_outcome(
            Ok(SenderResponse {
                status: 200,
                retry_after: None,
                message: Some(ServerToAgent::default()),
            }),
            &shared,
            &handler,
            retry,
        );

        let s = shared.lock().unwrap();
        assert!(!s.retry_mode);
        assert_eq!(s.backoff, 0);
        assert_eq!(handler.successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_after_header_is_honored_on_429_and_503() {
        let retry = Duration::from_secs(5);
        let shared = fresh_shared(retry);
        let handler = RecordingHandler::default();

        apply_outcome(
            Ok(SenderResponse {
                status: 503,
                retry_after: Some(Duration::from_secs(120)),
                message: None,
            }),
            &shared,
            &handler,
            retry,
        );
        assert_eq!(
            shared.lock().unwrap().retry_interval,
            Duration::from_secs(120)
        );

        // Other statuses fall back to the configured delay.
        apply_outcome(
            Ok(SenderResponse {
                status: 500,
                retry_after: Some(Duration::from_secs(120)),
                message: None,
            }),
            &shared,
            &handler,
            retry,
        );
        assert_eq!(shared.lock().unwrap().retry_interval, retry);
        assert_eq!(handler.request_failures.lock().unwrap().len(), 2);
    }

    #[test]
    fn server_specified_unavailable_delay_bypasses_backoff_growth() {
        let retry = Duration::from_secs(2);
        let shared = fresh_shared(retry);
        let handler = RecordingHandler::default();

        let response = |kind: i32, nanos: u64| {
            Ok(SenderResponse {
                status: 200,
                retry_after: None,
                message: Some(ServerToAgent {
                    error_response: Some(ServerErrorResponse {
                        r#type: kind,
                        error_message: "busy".into(),
                        retry_info: (nanos > 0)
                            .then_some(RetryInfo {
                                retry_after_nanoseconds: nanos,
                            }),
                    }),
                    ..Default::default()
                }),
            })
        };

        // Unavailable with an explicit delay: honored, backoff untouched.
        apply_outcome(response(2, 7_000_000_000), &shared, &handler, retry);
        {
            let s = shared.lock().unwrap();
            assert_eq!(s.retry_interval, Duration::from_secs(7));
            assert_eq!(s.backoff, 0);
        }

        // BadRequest grows local backoff instead.
        apply_outcome(response(1, 7_000_000_000), &shared, &handler, retry);
        {
            let s = shared.lock().unwrap();
            assert_eq!(s.backoff, 1);
            assert_eq!(s.retry_interval, Duration::from_secs(2));
        }

        // Unavailable without a delay also grows local backoff.
        apply_outcome(response(2, 0), &shared, &handler, retry);
        assert_eq!(shared.lock().unwrap().backoff, 2);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_complete_noop() {
        let sender = Arc::new(CountingSender::default());
        let service = RequestService::new(
            Arc::clone(&sender) as Arc<dyn Sender>,
            Duration::from_secs(30),
            Duration::from_secs(30),
        );
        service.stop();
        assert!(!service.is_running());
        assert!(!service.is_stopped());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);

        // The service was never stopped, so a later start still works.
        service.start(Arc::new(RecordingHandler::default()));
        assert!(service.is_running());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_terminal_after_stop() {
        let sender = Arc::new(CountingSender::default());
        let service = RequestService::new(
            Arc::clone(&sender) as Arc<dyn Sender>,
            Duration::from_secs(3000),
            Duration::from_secs(3000),
        );
        let handler = Arc::new(RecordingHandler::default());
        service.start(Arc::clone(&handler) as Arc<dyn RequestHandler>);
        service.start(Arc::clone(&handler) as Arc<dyn RequestHandler>);
        assert!(service.is_running());

        service.stop();
        assert!(!service.is_running());
        assert!(service.is_stopped());

        // The stop itself flushes exactly one final send.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);

        service.start(handler);
        assert!(!service.is_running());
        assert!(service.is_stopped());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_supplied_disconnect_message_is_terminal() {
        struct DisconnectingHandler {
            supplied: AtomicUsize,
        }

        impl RequestHandler for DisconnectingHandler {
            fn supply_next_message(&self) -> AgentToServer {
                let n = self.supplied.fetch_add(1, Ordering::SeqCst) as u64;
                AgentToServer {
                    sequence_num: n + 1,
                    agent_disconnect: (n >= 1).then_some(crate::opamp::AgentDisconnect {}),
                    ..Default::default()
                }
            }
            fn on_request_success(&self, _response: ServerToAgent) {}
            fn on_request_failed(&self, _error: ClientError, _retry_after: Option<Duration>) {}
            fn on_connection_failure(&self, _error: ClientError, _retry_after: Option<Duration>) {}
        }

        let sender = Arc::new(CountingSender::default());
        let service = RequestService::new(
            Arc::clone(&sender) as Arc<dyn Sender>,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let handler = Arc::new(DisconnectingHandler {
            supplied: AtomicUsize::new(0),
        });
        service.start(Arc::clone(&handler) as Arc<dyn RequestHandler>);

        // Second send carries the disconnect marker and the loop halts on
        // it even though stop() was never called.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), 2);
        assert!(service.is_stopped());
        assert!(!service.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_halts_once_the_handler_is_gone() {
        let sender = Arc::new(CountingSender::default());
        let service = RequestService::new(
            Arc::clone(&sender) as Arc<dyn Sender>,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let handler = Arc::new(RecordingHandler::default());
        service.start(Arc::clone(&handler) as Arc<dyn RequestHandler>);

        tokio::time::sleep(Duration::from_millis(25)).await;
        let before = sender.sent.load(Ordering::SeqCst);
        assert_eq!(before, 2);

        drop(handler);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), before);
        assert!(!service.is_running());
    }
}
