//! Thread-safe observable state cells.
//!
//! Every mutable piece of client state lives in its own [`SharedState`]
//! cell with a private reader-writer lock. Locking is per field, not
//! global, so high-frequency reads from instrumentation call sites never
//! contend with writes to unrelated fields.

use std::sync::{Mutex, RwLock};

use crate::api::ClientConfig;
use crate::opamp::{defaults, AgentDescription, EffectiveConfig, RemoteConfigStatus};

type Observer = Box<dyn Fn() + Send + Sync>;

/// A `SharedState<T>` holds one value behind a reader-writer lock and
/// fires an optional post-commit hook after every write.
///
/// Guarantees: many concurrent readers never block each other; a writer
/// excludes readers and writers of this cell only; read-modify-write via
/// [`SharedState::update`] is atomic, so N concurrent updates accumulate
/// exactly N mutations. The observer runs after the write lock has been
/// released, which keeps lock ordering trivial for whoever listens.
pub struct SharedState<T> {
    value: RwLock<T>,
    observer: Mutex<Option<Observer>>,
}

impl<T> SharedState<T> {
    pub fn new(value: T) -> Self {
        SharedState {
            value: RwLock::new(value),
            observer: Mutex::new(None),
        }
    }

    /// Reads the current value under the shared lock.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replaces the value under the exclusive lock, then notifies.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
            *guard = value;
        }
        self.notify();
    }

    /// Mutates the value in place under the exclusive lock, then notifies.
    /// The closure's return value is handed back to the caller.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        };
        self.notify();
        result
    }

    /// Installs the post-commit hook. The last installed observer wins;
    /// the cell supports a single listener.
    pub fn on_change(&self, f: impl Fn() + Send + Sync + 'static) {
        *self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Box::new(f));
    }

    fn notify(&self) {
        let guard = self.observer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(observer) = guard.as_ref() {
            observer();
        }
    }
}

impl<T: PartialEq> PartialEq<T> for SharedState<T> {
    fn eq(&self, other: &T) -> bool {
        *self.value.read().unwrap_or_else(|e| e.into_inner()) == *other
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedState")
            .field(&*self.value.read().unwrap_or_else(|e| e.into_inner()))
            .finish()
    }
}

/// The aggregate of all per-field cells the protocol engine reads and
/// writes. Created with the client, mutated by response handling and by
/// `set_remote_config_status`, dropped with the client.
#[derive(Debug)]
pub struct ClientState {
    /// Monotonically increasing request counter; incremented by exactly
    /// one per send attempt whether or not the previous attempt succeeded.
    pub sequence_num: SharedState<u64>,
    pub remote_config_status: SharedState<RemoteConfigStatus>,
    pub agent_description: SharedState<AgentDescription>,
    pub capabilities: SharedState<u64>,
    pub instance_uid: SharedState<Vec<u8>>,
    pub effective_config: SharedState<EffectiveConfig>,
    pub flags: SharedState<u64>,
}

impl ClientState {
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut description =
            defaults::agent_description(&config.service_name, &config.service_version);
        for (key, value) in &config.attributes {
            description.identifying_attributes.push(crate::opamp::KeyValue {
                key: key.clone(),
                value: Some(crate::opamp::AnyValue {
                    value: Some(crate::opamp::any_value::Value::StringValue(value.clone())),
                }),
            });
        }

        ClientState {
            sequence_num: SharedState::new(0),
            remote_config_status: SharedState::new(defaults::remote_config_status()),
            agent_description: SharedState::new(description),
            capabilities: SharedState::new(config.capabilities),
            instance_uid: SharedState::new(config.instance_uid.to_vec()),
            effective_config: SharedState::new(EffectiveConfig {
                config_map: config.effective_config.clone(),
            }),
            flags: SharedState::new(config.flags),
        }
    }

    /// Bumps the sequence number and returns the new value. The first
    /// call yields 1.
    pub fn next_sequence_num(&self) -> u64 {
        self.sequence_num.update(|n| {
            *n += 1;
            *n
        })
    }
}
