//! Per-field appenders and outgoing-message assembly.
//!
//! Each [`FieldType`] maps to an appender that reads the relevant state
//! cell and writes the field into the message under construction. Assembly
//! walks only the fields of the current recipe: that is the whole
//! bandwidth story of this protocol. The sequence number is the one
//! exception, incremented and appended on every attempt regardless of the
//! recipe contents.

use crate::opamp::{AgentDisconnect, AgentToServer};
use crate::recipe::{FieldType, Recipe};
use crate::state::ClientState;

fn append_agent_description(state: &ClientState, message: &mut AgentToServer) {
    message.agent_description = Some(state.agent_description.get());
}

fn append_capabilities(state: &ClientState, message: &mut AgentToServer) {
    message.capabilities = state.capabilities.get();
}

fn append_effective_config(state: &ClientState, message: &mut AgentToServer) {
    message.effective_config = Some(state.effective_config.get());
}

fn append_remote_config_status(state: &ClientState, message: &mut AgentToServer) {
    message.remote_config_status = Some(state.remote_config_status.get());
}

fn append_instance_uid(state: &ClientState, message: &mut AgentToServer) {
    message.instance_uid = state.instance_uid.get();
}

fn append_flags(state: &ClientState, message: &mut AgentToServer) {
    message.flags = state.flags.get();
}

fn append_agent_disconnect(_state: &ClientState, message: &mut AgentToServer) {
    message.agent_disconnect = Some(AgentDisconnect {});
}

/// Builds the next outgoing message from the given recipe. Fields outside
/// the recipe stay unset and are omitted from the encoding.
pub fn assemble(state: &ClientState, recipe: &Recipe) -> AgentToServer {
    let mut message = AgentToServer::default();
    message.sequence_num = state.next_sequence_num();

    for field in recipe.fields() {
        match field {
            FieldType::AgentDescription => append_agent_description(state, &mut message),
            FieldType::Capabilities => append_capabilities(state, &mut message),
            FieldType::EffectiveConfig => append_effective_config(state, &mut message),
            FieldType::RemoteConfigStatus => append_remote_config_status(state, &mut message),
            // Already written above, outside recipe control.
            FieldType::SequenceNumber => {}
            FieldType::InstanceUid => append_instance_uid(state, &mut message),
            FieldType::Flags => append_flags(state, &mut message),
            FieldType::AgentDisconnect => append_agent_disconnect(state, &mut message),
        }
    }

    message
}
