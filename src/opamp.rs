//! Wire messages exchanged with the management server.
//!
//! The field set and tags follow the OpAMP protobuf specification. The
//! messages are written out with explicit `prost` attributes rather than
//! generated from the `.proto` at build time; only the fields this client
//! populates or reads are declared, and the decoder skips unknown fields
//! as usual.

use std::collections::HashMap;

/// The `AgentToServer` struct is the outgoing status report. Only the fields
/// selected by the current recipe are populated before a send; everything
/// else stays at its protobuf default and is omitted from the encoding.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentToServer {
    #[prost(bytes = "vec", tag = "1")]
    pub instance_uid: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub sequence_num: u64,
    #[prost(message, optional, tag = "3")]
    pub agent_description: ::core::option::Option<AgentDescription>,
    #[prost(uint64, tag = "4")]
    pub capabilities: u64,
    #[prost(message, optional, tag = "6")]
    pub effective_config: ::core::option::Option<EffectiveConfig>,
    #[prost(message, optional, tag = "7")]
    pub remote_config_status: ::core::option::Option<RemoteConfigStatus>,
    #[prost(message, optional, tag = "9")]
    pub agent_disconnect: ::core::option::Option<AgentDisconnect>,
    #[prost(uint64, tag = "10")]
    pub flags: u64,
}

/// The `ServerToAgent` struct is the decoded response body. All of the
/// interesting payloads are optional; a plain acknowledgement carries none
/// of them.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerToAgent {
    #[prost(bytes = "vec", tag = "1")]
    pub instance_uid: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub error_response: ::core::option::Option<ServerErrorResponse>,
    #[prost(message, optional, tag = "3")]
    pub remote_config: ::core::option::Option<AgentRemoteConfig>,
    #[prost(uint64, tag = "6")]
    pub flags: u64,
    #[prost(message, optional, tag = "8")]
    pub agent_identification: ::core::option::Option<AgentIdentification>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentDescription {
    #[prost(message, repeated, tag = "1")]
    pub identifying_attributes: ::prost::alloc::vec::Vec<KeyValue>,
    #[prost(message, repeated, tag = "2")]
    pub non_identifying_attributes: ::prost::alloc::vec::Vec<KeyValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub value: ::core::option::Option<AnyValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AnyValue {
    #[prost(oneof = "any_value::Value", tags = "1, 2, 3, 4")]
    pub value: ::core::option::Option<any_value::Value>,
}

pub mod any_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "1")]
        StringValue(::prost::alloc::string::String),
        #[prost(bool, tag = "2")]
        BoolValue(bool),
        #[prost(int64, tag = "3")]
        IntValue(i64),
        #[prost(double, tag = "4")]
        DoubleValue(f64),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EffectiveConfig {
    #[prost(message, optional, tag = "1")]
    pub config_map: ::core::option::Option<AgentConfigMap>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentConfigMap {
    #[prost(map = "string, message", tag = "1")]
    pub config_map: HashMap<::prost::alloc::string::String, AgentConfigFile>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentConfigFile {
    #[prost(bytes = "vec", tag = "1")]
    pub body: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "2")]
    pub content_type: ::prost::alloc::string::String,
}

/// Remote configuration delivered by the server: a map of named opaque
/// config blobs plus a content hash the agent echoes back in
/// [`RemoteConfigStatus`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentRemoteConfig {
    #[prost(message, optional, tag = "1")]
    pub config: ::core::option::Option<AgentConfigMap>,
    #[prost(bytes = "vec", tag = "2")]
    pub config_hash: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoteConfigStatus {
    #[prost(bytes = "vec", tag = "1")]
    pub last_remote_config_hash: ::prost::alloc::vec::Vec<u8>,
    #[prost(enumeration = "RemoteConfigStatuses", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub error_message: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RemoteConfigStatuses {
    Unset = 0,
    Applied = 1,
    Applying = 2,
    Failed = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentDisconnect {}

/// Server-assigned replacement identity; a non-empty `new_instance_uid`
/// re-identifies the running agent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentIdentification {
    #[prost(bytes = "vec", tag = "1")]
    pub new_instance_uid: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerErrorResponse {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub error_message: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub retry_info: ::core::option::Option<RetryInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RetryInfo {
    #[prost(uint64, tag = "1")]
    pub retry_after_nanoseconds: u64,
}

/// Capability bits reported in [`AgentToServer::capabilities`].
pub mod capabilities {
    pub const REPORTS_STATUS: u64 = 1;
    pub const ACCEPTS_REMOTE_CONFIG: u64 = 1 << 1;
    pub const REPORTS_EFFECTIVE_CONFIG: u64 = 1 << 2;
    pub const REPORTS_REMOTE_CONFIG: u64 = 1 << 3;
}

/// Behavior-flag bits on [`ServerToAgent::flags`].
pub mod server_flags {
    /// The server lost track of this agent and wants the full state again.
    pub const REPORT_FULL_STATE: u64 = 1;
}

pub mod util {
    use rand::RngCore;
    use ulid::Generator;

    /// Generates a fresh 16-byte instance uid. ULIDs give a sortable
    /// timestamp prefix with random entropy, the identity scheme the rest
    /// of the OpAMP ecosystem uses for agents.
    pub fn generate_instance_uid() -> [u8; 16] {
        let dt = std::time::SystemTime::now();
        let mut rng = rand::thread_rng();
        let mut entropy = [0; 10];
        rng.fill_bytes(&mut entropy[6..]);
        let mut gen = Generator::new();
        match gen.generate_from_datetime_with_source(dt, &mut rng) {
            Ok(ulid) => ulid.to_bytes(),
            Err(_) => {
                // Monotonicity overflow within the same millisecond; plain
                // randomness is still a valid uid.
                let mut raw = [0u8; 16];
                rng.fill_bytes(&mut raw);
                raw
            }
        }
    }
}

pub mod defaults {
    use super::*;
    use sysinfo::{System, SystemExt};

    fn string_attr(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    pub fn remote_config_status() -> RemoteConfigStatus {
        RemoteConfigStatus {
            last_remote_config_hash: vec![],
            status: RemoteConfigStatuses::Unset.into(),
            error_message: "".to_string(),
        }
    }

    /// Builds the agent description reported on the first request:
    /// service name/version as identifying attributes, host facts as
    /// non-identifying ones.
    pub fn agent_description(name: &str, version: &str) -> AgentDescription {
        let mut identifying_attributes = Vec::new();
        identifying_attributes.push(string_attr("service.name", name));
        identifying_attributes.push(string_attr("service.version", version));

        let sys = System::new_all();
        let mut non_identifying_attributes = Vec::new();
        non_identifying_attributes.push(string_attr("os.type", std::env::consts::OS));
        if let Some(kernel) = sys.kernel_version() {
            non_identifying_attributes.push(string_attr("os.version", &kernel));
        }
        if let Some(host) = sys.host_name() {
            non_identifying_attributes.push(string_attr("host.name", &host));
        }

        AgentDescription {
            identifying_attributes,
            non_identifying_attributes,
        }
    }
}
