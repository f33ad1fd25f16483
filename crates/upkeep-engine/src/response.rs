//! ---
//! upkeep_section: "02-engine-protocol"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update engine wire protocol and command channel."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use upkeep_history::Progress;

use crate::protocol::RequestId;
use crate::{ChannelError, Result};

/// Error kind the engine reports when its on-disk state cannot be reconciled.
pub const INCONSISTENT_INSTALLER_STATE: &str = "InconsistentInstallerState";

/// Error payload carried by an engine `Error` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFault {
    /// Machine-readable error kind.
    pub kind: String,
    /// Free-form details.
    #[serde(default)]
    pub details: Value,
    /// Engine-assigned severity.
    #[serde(default)]
    pub severity: Value,
}

impl EngineFault {
    /// Whether the engine reports an unrecoverable installer state.
    pub fn is_inconsistent_installer_state(&self) -> bool {
        self.kind == INCONSISTENT_INSTALLER_STATE
    }
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Value::Null => write!(f, "{}", self.kind),
            Value::String(details) => write!(f, "{}: {}", self.kind, details),
            other => write!(f, "{}: {}", self.kind, other),
        }
    }
}

/// Decoded reply detail.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    /// Command accepted and completed.
    Ok,
    /// Command failed.
    Error(EngineFault),
    /// Answer to a version query.
    VersionInfo(Value),
    /// Answer carrying a manifest.
    ManifestInfo(Value),
    /// Progress for a task started by the request. Never completes a request.
    TaskProgress(Progress),
    /// Detail this build does not recognise.
    Unknown(Value),
}

impl EngineReply {
    /// Whether the reply completes the request it answers.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TaskProgress(_) | Self::Unknown(_))
    }

    fn from_detail(detail: Value) -> Result<Self> {
        if detail.as_str() == Some("Ok") {
            return Ok(Self::Ok);
        }
        let Value::Object(mut map) = detail else {
            return Ok(Self::Unknown(detail));
        };
        if map.len() != 1 {
            return Ok(Self::Unknown(Value::Object(map)));
        }

        if let Some(raw) = map.remove("Error") {
            let fault = serde_json::from_value(raw)
                .map_err(|err| ChannelError::UnexpectedReply(format!("error payload: {err}")))?;
            return Ok(Self::Error(fault));
        }
        if let Some(versions) = map.remove("VersionInfo") {
            return Ok(Self::VersionInfo(versions));
        }
        if let Some(manifest) = map.remove("ManifestInfo") {
            return Ok(Self::ManifestInfo(manifest));
        }
        if let Some(raw) = map.remove("TaskProgress") {
            let progress = Progress::from_wire(&raw)
                .map_err(|err| ChannelError::UnexpectedReply(err.to_string()))?;
            return Ok(Self::TaskProgress(progress));
        }
        Ok(Self::Unknown(Value::Object(map)))
    }
}

/// Decode a raw `[request_id, detail]` response line.
pub fn decode_response(raw: &str) -> Result<(RequestId, EngineReply)> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ChannelError::UnexpectedReply(format!("invalid json: {err}")))?;
    let Value::Array(mut items) = value else {
        return Err(ChannelError::UnexpectedReply(
            "response is not an array".into(),
        ));
    };
    if items.len() != 2 {
        return Err(ChannelError::UnexpectedReply(format!(
            "response has {} elements, expected 2",
            items.len()
        )));
    }
    let detail = items.pop().unwrap_or(Value::Null);
    let request_id = items
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| ChannelError::UnexpectedReply("missing request id".into()))?;
    Ok((request_id, EngineReply::from_detail(detail)?))
}
