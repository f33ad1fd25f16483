//! ---
//! upkeep_section: "02-engine-protocol"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update engine wire protocol and command channel."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::binding::{EngineBinding, EngineLoader, EngineOptions, ResponseHandler, ShortcutOptions};
use crate::protocol::RequestId;
use crate::{ChannelError, Result};

/// Scripted engine behaviour: reply details for a `(request_id, body)` pair.
pub type Responder = Arc<dyn Fn(RequestId, &Value) -> Vec<Value> + Send + Sync>;

#[derive(Default)]
struct Inner {
    options: Mutex<Option<EngineOptions>>,
    handler: Mutex<Option<ResponseHandler>>,
    responder: Mutex<Option<Responder>>,
    sent: Mutex<Vec<String>>,
    blocking: Mutex<Vec<String>>,
    flushes: Mutex<usize>,
    folders: Mutex<HashMap<String, PathBuf>>,
    shortcuts: Mutex<Vec<ShortcutOptions>>,
}

/// In-memory engine recording transmitted payloads, primarily for tests.
///
/// Acts as its own [`EngineLoader`]; clones share state. Replies produced by
/// the responder are delivered synchronously from within `command`.
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    inner: Arc<Inner>,
}

impl InMemoryEngine {
    /// Create an engine that accepts every command and never replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a responder producing reply details for each command.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(RequestId, &Value) -> Vec<Value> + Send + Sync + 'static,
    {
        *self.inner.responder.lock() = Some(Arc::new(responder));
        self
    }

    /// Register a folder returned by `known_folder`.
    pub fn with_folder(self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.inner.folders.lock().insert(name.into(), path.into());
        self
    }

    /// Deliver a raw response line to the registered handler.
    pub fn emit(&self, raw: impl Into<String>) {
        let handler = self.inner.handler.lock().clone();
        if let Some(handler) = handler {
            handler(raw.into());
        }
    }

    /// Deliver `[request_id, detail]` to the registered handler.
    pub fn reply(&self, request_id: RequestId, detail: Value) {
        self.emit(json!([request_id, detail]).to_string());
    }

    /// Payloads handed to the non-blocking primitive, in order.
    pub fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().clone()
    }

    /// Non-blocking payloads decoded as JSON.
    pub fn sent_values(&self) -> Vec<Value> {
        decode_all(&self.inner.sent.lock())
    }

    /// Payloads handed to the blocking primitive, decoded as JSON.
    pub fn blocking_values(&self) -> Vec<Value> {
        decode_all(&self.inner.blocking.lock())
    }

    /// Number of flush barriers requested through the binding.
    pub fn flush_count(&self) -> usize {
        *self.inner.flushes.lock()
    }

    /// Options the engine was loaded with.
    pub fn options(&self) -> Option<EngineOptions> {
        self.inner.options.lock().clone()
    }

    /// Shortcuts requested through the binding.
    pub fn shortcuts(&self) -> Vec<ShortcutOptions> {
        self.inner.shortcuts.lock().clone()
    }

    fn respond(&self, payload: &str) {
        let responder = self.inner.responder.lock().clone();
        let Some(responder) = responder else {
            return;
        };
        let Ok(Value::Array(envelope)) = serde_json::from_str::<Value>(payload) else {
            return;
        };
        let (Some(request_id), Some(body)) =
            (envelope.first().and_then(Value::as_u64), envelope.get(1))
        else {
            return;
        };
        for detail in responder(request_id, body) {
            self.reply(request_id, detail);
        }
    }
}

fn decode_all(payloads: &[String]) -> Vec<Value> {
    payloads
        .iter()
        .filter_map(|payload| serde_json::from_str(payload).ok())
        .collect()
}

impl EngineLoader for InMemoryEngine {
    fn load(
        &self,
        options: &EngineOptions,
        handler: ResponseHandler,
    ) -> Result<Box<dyn EngineBinding>> {
        *self.inner.options.lock() = Some(options.clone());
        *self.inner.handler.lock() = Some(handler);
        Ok(Box::new(self.clone()))
    }
}

impl EngineBinding for InMemoryEngine {
    fn command(&self, payload: String) -> Result<()> {
        self.inner.sent.lock().push(payload.clone());
        self.respond(&payload);
        Ok(())
    }

    fn command_blocking(&self, payload: String) -> Result<()> {
        self.inner.blocking.lock().push(payload);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        *self.inner.flushes.lock() += 1;
        Ok(())
    }

    fn known_folder(&self, name: &str) -> Result<PathBuf> {
        self.inner
            .folders
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::Unsupported(format!("unknown folder {name}")))
    }

    fn create_shortcut(&self, options: &ShortcutOptions) -> Result<bool> {
        self.inner.shortcuts.lock().push(options.clone());
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_replies_through_handler() {
        let engine = InMemoryEngine::new().with_responder(|_, body| {
            if body == "CollectGarbage" {
                vec![json!("Ok")]
            } else {
                Vec::new()
            }
        });
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: ResponseHandler = Arc::new(move |raw: String| sink.lock().push(raw));

        let options = EngineOptions {
            release_channel: "stable".into(),
            platform: "linux".into(),
            repository_url: String::new(),
            root_path: PathBuf::from("/opt/app"),
            user_data_path: None,
            current_os_arch: None,
            extra: Default::default(),
        };
        let binding = engine.load(&options, handler).unwrap();
        binding.command(r#"[9,"CollectGarbage"]"#.into()).unwrap();
        binding.command(r#"[10,"Other"]"#.into()).unwrap();

        assert_eq!(*received.lock(), vec![r#"[9,"Ok"]"#.to_owned()]);
        assert_eq!(engine.sent().len(), 2);
        assert_eq!(engine.options(), Some(options));
    }
}
