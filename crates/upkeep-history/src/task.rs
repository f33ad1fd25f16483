//! ---
//! upkeep_section: "03-history-logging"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Task classification and update history."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::{HistoryError, Result};

/// Pseudo-module name used for host-level tasks.
pub const HOST_MODULE_NAME: &str = "host";

/// A module name paired with the version a task targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleVersion {
    /// Logical module name.
    pub name: String,
    /// Target module version.
    pub version: u64,
}

impl ModuleVersion {
    /// Construct a module version reference.
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    fn to_value(&self) -> Value {
        json!({ "module": { "name": self.name }, "version": self.version })
    }

    fn from_value(value: &Value) -> Result<Self> {
        let name = value
            .pointer("/module/name")
            .and_then(Value::as_str)
            .ok_or_else(|| HistoryError::MalformedProgress("module task without name".into()))?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                HistoryError::MalformedProgress(format!("module {name} without numeric version"))
            })?;
        Ok(Self::new(name, version))
    }
}

/// Update task reported by the engine.
///
/// Task kinds the engine may introduce later decode to [`Task::Unknown`]
/// and are ignored by classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Download of a new host package.
    HostDownload,
    /// Installation of a host package; `from_version` marks a delta install.
    HostInstall {
        /// Version the install upgrades from, when the engine reports one.
        from_version: Option<Value>,
    },
    /// Download of a module artifact.
    ModuleDownload {
        /// Module being downloaded.
        module: ModuleVersion,
    },
    /// Installation of a module artifact.
    ModuleInstall {
        /// Module being installed.
        module: ModuleVersion,
        /// Version the install upgrades from, when the engine reports one.
        from_version: Option<Value>,
    },
    /// Task kind this build does not know about.
    Unknown {
        /// Tag the engine used for the task.
        kind: String,
    },
}

impl Task {
    /// Decode a task from its externally tagged wire representation.
    pub fn from_value(value: &Value) -> Result<Self> {
        let (kind, body) = match value {
            Value::Object(map) if map.len() == 1 => {
                let (kind, body) = map
                    .iter()
                    .next()
                    .ok_or_else(|| HistoryError::MalformedProgress("empty task object".into()))?;
                (kind.as_str(), body)
            }
            Value::String(kind) => (kind.as_str(), &Value::Null),
            other => {
                return Err(HistoryError::MalformedProgress(format!(
                    "task must be a tagged object, found {other}"
                )))
            }
        };

        let task = match kind {
            "HostDownload" => Task::HostDownload,
            "HostInstall" => Task::HostInstall {
                from_version: non_null(body.get("from_version")),
            },
            "ModuleDownload" => Task::ModuleDownload {
                module: ModuleVersion::from_value(body.get("version").unwrap_or(&Value::Null))?,
            },
            "ModuleInstall" => Task::ModuleInstall {
                module: ModuleVersion::from_value(body.get("version").unwrap_or(&Value::Null))?,
                from_version: non_null(body.get("from_version")),
            },
            other => Task::Unknown {
                kind: other.to_owned(),
            },
        };
        Ok(task)
    }

    /// Encode the task in the engine's wire representation.
    pub fn to_value(&self) -> Value {
        match self {
            Task::HostDownload => json!({ "HostDownload": {} }),
            Task::HostInstall { from_version } => {
                json!({ "HostInstall": { "from_version": from_version } })
            }
            Task::ModuleDownload { module } => {
                json!({ "ModuleDownload": { "version": module.to_value() } })
            }
            Task::ModuleInstall {
                module,
                from_version,
            } => json!({
                "ModuleInstall": { "version": module.to_value(), "from_version": from_version }
            }),
            Task::Unknown { kind } => {
                let mut map = Map::new();
                map.insert(kind.clone(), Value::Object(Map::new()));
                Value::Object(map)
            }
        }
    }

    /// Logical module name the task concerns (`host` for host tasks).
    pub fn module_name(&self) -> Option<&str> {
        match self {
            Task::HostDownload | Task::HostInstall { .. } => Some(HOST_MODULE_NAME),
            Task::ModuleDownload { module } | Task::ModuleInstall { module, .. } => {
                Some(module.name.as_str())
            }
            Task::Unknown { .. } => None,
        }
    }

    /// Whether the task is an install that upgrades an existing version.
    pub fn is_delta(&self) -> bool {
        matches!(
            self,
            Task::HostInstall {
                from_version: Some(_)
            } | Task::ModuleInstall {
                from_version: Some(_),
                ..
            }
        )
    }
}

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Task::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a task instance: `Waiting -> Working -> Complete | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Queued by the engine.
    Waiting,
    /// In progress.
    Working,
    /// Finished successfully. Terminal.
    Complete,
    /// Finished unsuccessfully. Terminal.
    Failed,
}

impl TaskState {
    /// Whether no further transitions follow this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }
}

/// Single progress observation for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Task the observation concerns.
    pub task: Task,
    /// Reported state.
    pub state: TaskState,
    /// Completion percentage, when the engine reports one.
    pub percent: Option<f64>,
    /// Bytes downloaded or installed so far.
    pub bytes_processed: u64,
}

impl Progress {
    /// Construct an observation without percentage information.
    pub fn new(task: Task, state: TaskState, bytes_processed: u64) -> Self {
        Self {
            task,
            state,
            percent: None,
            bytes_processed,
        }
    }

    /// Decode the `[task, state, percent, bytesProcessed]` tuple sent by the engine.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| HistoryError::MalformedProgress("expected array".into()))?;
        let task = items
            .first()
            .ok_or_else(|| HistoryError::MalformedProgress("missing task".into()))
            .and_then(Task::from_value)?;
        let state = items
            .get(1)
            .cloned()
            .ok_or_else(|| HistoryError::MalformedProgress("missing state".into()))
            .and_then(|raw| serde_json::from_value(raw).map_err(HistoryError::from))?;
        let percent = items.get(2).and_then(Value::as_f64);
        let bytes_processed = items.get(3).and_then(Value::as_u64).unwrap_or_default();
        Ok(Self {
            task,
            state,
            percent,
            bytes_processed,
        })
    }

    /// Encode the observation in the engine's tuple form.
    pub fn to_wire(&self) -> Value {
        json!([
            self.task.to_value(),
            self.state,
            self.percent,
            self.bytes_processed
        ])
    }
}
