//! Client orchestration: lifecycle, message supply, and response
//! interpretation.
//!
//! The client sits on both sides of the request loop. As the message
//! supplier it freezes the current recipe and assembles the outgoing
//! report; as the outcome sink it advances local bookkeeping, dispatches
//! remote configuration to the embedder, and re-queues the fields of
//! failed attempts so state changes are never silently dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::api::{Callback, ClientConfig, ClientError, MessageData};
use crate::appenders;
use crate::opamp::{server_flags, AgentToServer, RemoteConfigStatus, ServerToAgent};
use crate::recipe::{FieldType, RecipeManager, FULL_STATE_FIELDS};
use crate::service::{RequestHandler, RequestService, Sender};
use crate::state::ClientState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    NotStarted,
    Running,
    Stopped,
}

/// The protocol client. `start()` begins the polling loop, `stop()` sends
/// a final disconnect report and halts it for good; a stopped client
/// cannot be restarted.
pub struct OpampClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    state: ClientState,
    recipes: Arc<RecipeManager>,
    service: RequestService,
    run_state: Mutex<RunState>,
    /// Serializes message assembly: at most one outgoing message is under
    /// construction at any time.
    assembly: Mutex<()>,
    callback: RwLock<Option<Arc<dyn Callback>>>,
    connected: AtomicBool,
}

impl OpampClient {
    /// Builds a client over an injected transport. All runtime state is
    /// owned here; the configuration is consumed as an immutable value.
    pub fn new(config: ClientConfig, sender: Arc<dyn Sender>) -> OpampClient {
        let state = ClientState::from_config(&config);
        let recipes = Arc::new(RecipeManager::new());
        Self::observe_state(&state, &recipes);

        OpampClient {
            inner: Arc::new(ClientInner {
                state,
                recipes,
                service: RequestService::new(sender, config.request_delay, config.retry_delay),
                run_state: Mutex::new(RunState::NotStarted),
                assembly: Mutex::new(()),
                callback: RwLock::new(None),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Builds a client with the production HTTP transport.
    #[cfg(feature = "http")]
    pub fn with_http_sender(config: ClientConfig) -> OpampClient {
        let sender = Arc::new(crate::httpclient::HttpSender::from_config(&config));
        OpampClient::new(config, sender)
    }

    /// Every state cell marks its field for the next recipe when written,
    /// which is the entire delta-update mechanism: untouched fields simply
    /// never re-enter a recipe.
    fn observe_state(state: &ClientState, recipes: &Arc<RecipeManager>) {
        let r = Arc::clone(recipes);
        state
            .remote_config_status
            .on_change(move || r.add_field(FieldType::RemoteConfigStatus));
        let r = Arc::clone(recipes);
        state
            .agent_description
            .on_change(move || r.add_field(FieldType::AgentDescription));
        let r = Arc::clone(recipes);
        state
            .capabilities
            .on_change(move || r.add_field(FieldType::Capabilities));
        let r = Arc::clone(recipes);
        state
            .instance_uid
            .on_change(move || r.add_field(FieldType::InstanceUid));
        let r = Arc::clone(recipes);
        state
            .effective_config
            .on_change(move || r.add_field(FieldType::EffectiveConfig));
        let r = Arc::clone(recipes);
        state.flags.on_change(move || r.add_field(FieldType::Flags));
    }

    /// NotStarted → Running. Registers the embedder callback, queues the
    /// full-state recipe, and triggers an immediate first send. A second
    /// call while running is a no-op; a call after `stop()` is rejected.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, callback: Arc<dyn Callback>) {
        {
            let mut run_state = self.inner.lock_run_state();
            match *run_state {
                RunState::Running => {
                    log::debug!("client already started");
                    return;
                }
                RunState::Stopped => {
                    log::warn!("client is stopped and cannot be restarted");
                    return;
                }
                RunState::NotStarted => *run_state = RunState::Running,
            }
        }

        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
        self.inner.recipes.add_all_fields(&FULL_STATE_FIELDS);

        self.inner
            .service
            .start(Arc::clone(&self.inner) as Arc<dyn RequestHandler>);
        self.inner.service.send_request();
    }

    /// Running → Stopped, terminal. Queues the disconnect marker and lets
    /// the request loop flush exactly one final report before halting.
    pub fn stop(&self) {
        {
            let mut run_state = self.inner.lock_run_state();
            if *run_state != RunState::Running {
                log::debug!("client stop ignored, not running");
                return;
            }
            *run_state = RunState::Stopped;
        }

        self.inner.recipes.add_field(FieldType::AgentDisconnect);
        self.inner.service.stop();
    }

    /// Records the outcome of applying remote configuration. The status
    /// rides along on the next request even if nothing else changed.
    pub fn set_remote_config_status(&self, status: RemoteConfigStatus) {
        self.inner.state.remote_config_status.set(status);
    }

    /// Schedules an out-of-cadence poll, e.g. right after the host
    /// application comes back to the foreground.
    pub fn poll_now(&self) {
        self.inner.service.send_request();
    }
}

impl ClientInner {
    fn lock_run_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.run_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn callback(&self) -> Option<Arc<dyn Callback>> {
        self.callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-queues everything the failed attempt carried. Current values are
    /// re-derived at the next assembly, so this trades byte-identical
    /// retransmission for never losing a state change.
    fn merge_failed_fields(&self) {
        if let Some(previous) = self.recipes.previous() {
            self.recipes.merge(&previous);
        }
    }
}

impl RequestHandler for ClientInner {
    fn supply_next_message(&self) -> AgentToServer {
        let _assembly = self.assembly.lock().unwrap_or_else(|e| e.into_inner());
        let recipe = self.recipes.build();
        appenders::assemble(&self.state, &recipe)
    }

    fn on_request_success(&self, response: ServerToAgent) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            if let Some(cb) = self.callback() {
                cb.on_connect();
            }
        }

        if let Some(identification) = response.agent_identification {
            if identification.new_instance_uid.is_empty() {
                log::debug!("ignoring empty agent re-identification");
            } else {
                log::debug!("server re-identified this agent instance");
                self.state.instance_uid.set(identification.new_instance_uid);
            }
        }

        if response.flags & server_flags::REPORT_FULL_STATE != 0 {
            log::debug!("server requested a full state report");
            self.recipes.add_all_fields(&FULL_STATE_FIELDS);
        }

        if let Some(remote_config) = response.remote_config {
            if let Some(cb) = self.callback() {
                cb.on_message(MessageData {
                    remote_config: Some(remote_config),
                });
            }
        }
    }

    fn on_request_failed(&self, error: ClientError, retry_after: Option<Duration>) {
        self.merge_failed_fields();
        if let Some(cb) = self.callback() {
            cb.on_error_response(&error, retry_after);
        }
    }

    fn on_connection_failure(&self, error: ClientError, retry_after: Option<Duration>) {
        self.connected.store(false, Ordering::SeqCst);
        self.merge_failed_fields();
        if let Some(cb) = self.callback() {
            cb.on_connect_failed(&error, retry_after);
        }
    }
}
