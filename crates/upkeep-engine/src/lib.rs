//! ---
//! upkeep_section: "02-engine-protocol"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update engine wire protocol and command channel."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Everything that crosses the process boundary to the update engine: the
//! command and response wire shapes, the bindings that carry them, and the
//! [`CommandChannel`] correlating requests with replies.

pub mod binding;
pub mod channel;
pub mod memory;
pub mod process;
pub mod protocol;
pub mod response;

/// Shared result type for engine operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures surfaced by the command channel and engine bindings.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The engine binding failed to initialise; the channel is permanently invalid.
    #[error("update engine unavailable: {0}")]
    Unavailable(String),
    /// The binding could not hand the payload to the engine.
    #[error("engine transport failure: {0}")]
    Transport(#[from] std::io::Error),
    /// The command could not be serialized.
    #[error("failed to encode engine payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// The engine answered the request with an error.
    #[error("engine rejected request {request_id}: {fault}")]
    Rejected {
        /// Correlation id of the rejected request.
        request_id: protocol::RequestId,
        /// Error reported by the engine.
        fault: response::EngineFault,
    },
    /// The reply slot was dropped before the engine answered.
    #[error("request {0} dropped before the engine replied")]
    Dropped(protocol::RequestId),
    /// A reply did not match the expected wire shape.
    #[error("unexpected engine reply: {0}")]
    UnexpectedReply(String),
    /// The binding does not provide the requested capability.
    #[error("not supported by this engine binding: {0}")]
    Unsupported(String),
}

pub use binding::{EngineBinding, EngineLoader, EngineOptions, ResponseHandler, ShortcutOptions};
pub use channel::{CommandChannel, ProgressCallback, ResponseSink, MAX_PROGRESS_LISTENERS};
pub use memory::{InMemoryEngine, Responder};
pub use process::{ProcessBinding, ProcessLoader};
pub use protocol::{
    encode_command, CommandBody, ManifestKind, ProtocolVersion, RequestId,
    ARCHITECTURE_TRANSITION_MARKER,
};
pub use response::{
    decode_response, EngineFault, EngineReply, INCONSISTENT_INSTALLER_STATE,
};
