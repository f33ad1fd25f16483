//! ---
//! upkeep_section: "02-engine-protocol"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Update engine wire protocol and command channel."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use upkeep_history::Progress;

use crate::binding::{EngineBinding, EngineLoader, EngineOptions, ResponseHandler, ShortcutOptions};
use crate::protocol::{encode_command, CommandBody, RequestId};
use crate::response::{decode_response, EngineReply};
use crate::{ChannelError, Result};

/// Per-request progress callback. Invoked from the engine's callback thread.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Receives every decoded engine response before per-request routing.
pub trait ResponseSink: Send + Sync {
    /// Progress for any request.
    fn on_progress(&self, request_id: RequestId, progress: &Progress);
    /// Terminal reply for any request.
    fn on_reply(&self, _request_id: RequestId, _reply: &EngineReply) {}
    /// Response that could not be decoded or carried an unknown detail.
    fn on_unhandled(&self, _raw: &str) {}
}

type Waiter = oneshot::Sender<Result<EngineReply>>;

/// Progress callbacks kept for commands without a terminal reply yet.
///
/// Fire-and-forget commands the engine never answers would otherwise keep
/// their callbacks forever; past this bound the oldest one is dropped.
pub const MAX_PROGRESS_LISTENERS: usize = 256;

struct Correlator {
    waiters: Mutex<HashMap<RequestId, Waiter>>,
    listeners: Mutex<BTreeMap<RequestId, ProgressCallback>>,
    sink: Arc<dyn ResponseSink>,
}

impl Correlator {
    fn new(sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            listeners: Mutex::new(BTreeMap::new()),
            sink,
        }
    }

    fn listen(&self, request_id: RequestId, progress: Option<ProgressCallback>) {
        let Some(callback) = progress else {
            return;
        };
        let mut listeners = self.listeners.lock();
        while listeners.len() >= MAX_PROGRESS_LISTENERS {
            if let Some((stale, _)) = listeners.pop_first() {
                warn!(request_id = stale, "dropping progress listener of unanswered command");
            }
        }
        listeners.insert(request_id, callback);
    }

    fn forget(&self, request_id: RequestId) {
        self.waiters.lock().remove(&request_id);
        self.listeners.lock().remove(&request_id);
    }

    fn dispatch(&self, raw: &str) {
        let (request_id, reply) = match decode_response(raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "discarding undecodable engine response");
                self.sink.on_unhandled(raw);
                return;
            }
        };

        match reply {
            EngineReply::TaskProgress(progress) => {
                self.sink.on_progress(request_id, &progress);
                let listener = self.listeners.lock().get(&request_id).cloned();
                if let Some(callback) = listener {
                    callback(&progress);
                }
            }
            EngineReply::Unknown(detail) => {
                warn!(request_id, detail = %detail, "unhandled engine response");
                self.sink.on_unhandled(raw);
            }
            reply => {
                trace!(request_id, "engine reply received");
                self.sink.on_reply(request_id, &reply);
                self.listeners.lock().remove(&request_id);
                let waiter = self.waiters.lock().remove(&request_id);
                if let Some(waiter) = waiter {
                    let outcome = match reply {
                        EngineReply::Error(fault) => {
                            Err(ChannelError::Rejected { request_id, fault })
                        }
                        reply => Ok(reply),
                    };
                    let _ = waiter.send(outcome);
                }
            }
        }
    }
}

/// Removes a waiter whose request future is dropped before the reply arrives.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.forget(self.request_id);
    }
}

/// Correlates outgoing engine commands with their responses.
///
/// Two tiers are offered. [`CommandChannel::send`] is fire-and-forget and
/// returns once the binding accepted the payload. [`CommandChannel::request`]
/// additionally waits for the engine's terminal reply.
pub struct CommandChannel {
    binding: Option<Box<dyn EngineBinding>>,
    next_id: AtomicU64,
    correlator: Arc<Correlator>,
}

impl CommandChannel {
    /// Load a binding and route its responses through `sink`.
    ///
    /// A loader failure yields an invalid channel rather than an error.
    pub fn connect(
        loader: &dyn EngineLoader,
        options: &EngineOptions,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        let correlator = Arc::new(Correlator::new(sink));
        let dispatcher = Arc::clone(&correlator);
        let handler: ResponseHandler = Arc::new(move |raw: String| dispatcher.dispatch(&raw));

        let binding = match loader.load(options, handler) {
            Ok(binding) => {
                info!(binding = binding.name(), "update engine binding ready");
                Some(binding)
            }
            Err(err) => {
                warn!(error = %err, "update engine binding unavailable; updater disabled");
                None
            }
        };

        Self {
            binding,
            next_id: AtomicU64::new(0),
            correlator,
        }
    }

    /// Channel with no binding; every operation fails with `Unavailable`.
    pub fn disconnected(sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            binding: None,
            next_id: AtomicU64::new(0),
            correlator: Arc::new(Correlator::new(sink)),
        }
    }

    /// Whether the engine binding initialised.
    pub fn is_valid(&self) -> bool {
        self.binding.is_some()
    }

    fn binding(&self) -> Result<&dyn EngineBinding> {
        self.binding
            .as_deref()
            .ok_or_else(|| ChannelError::Unavailable("engine binding not initialised".into()))
    }

    fn allocate(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Transmit `[id, body]` over the non-blocking primitive.
    ///
    /// Resolves once the binding accepted the payload; says nothing about
    /// whether the engine acted on it. Progress for the request is forwarded to
    /// `progress` until the engine's terminal reply arrives.
    pub fn send(&self, body: &CommandBody, progress: Option<ProgressCallback>) -> Result<RequestId> {
        let binding = self.binding()?;
        let request_id = self.allocate();
        let payload = encode_command(request_id, body)?;
        self.correlator.listen(request_id, progress);
        if let Err(err) = binding.command(payload) {
            self.correlator.forget(request_id);
            return Err(err);
        }
        debug!(request_id, command = body.name(), "command handed to engine");
        Ok(request_id)
    }

    /// Transmit over the blocking primitive; returns when the transport call returns.
    pub fn send_blocking(&self, body: &CommandBody) -> Result<RequestId> {
        let binding = self.binding()?;
        let request_id = self.allocate();
        let payload = encode_command(request_id, body)?;
        binding.command_blocking(payload)?;
        debug!(request_id, command = body.name(), "command delivered to engine");
        Ok(request_id)
    }

    /// Wait until every command handed to [`CommandChannel::send`] reached the engine.
    pub fn flush(&self) -> Result<()> {
        self.binding()?.flush()
    }

    /// Transmit and wait for the engine's terminal reply.
    ///
    /// An engine `Error` reply resolves to [`ChannelError::Rejected`].
    pub async fn request(
        &self,
        body: &CommandBody,
        progress: Option<ProgressCallback>,
    ) -> Result<EngineReply> {
        let binding = self.binding()?;
        let request_id = self.allocate();
        let payload = encode_command(request_id, body)?;

        let (tx, rx) = oneshot::channel();
        self.correlator.waiters.lock().insert(request_id, tx);
        self.correlator.listen(request_id, progress);
        let _guard = PendingGuard {
            correlator: &self.correlator,
            request_id,
        };

        binding.command(payload)?;
        debug!(request_id, command = body.name(), "awaiting engine reply");
        rx.await.map_err(|_| ChannelError::Dropped(request_id))?
    }

    /// Resolve a well-known folder through the binding.
    pub fn known_folder(&self, name: &str) -> Result<PathBuf> {
        self.binding()?.known_folder(name)
    }

    /// Create a shortcut through the binding.
    pub fn create_shortcut(&self, options: &ShortcutOptions) -> Result<bool> {
        self.binding()?.create_shortcut(options)
    }

    /// Requests still awaiting a terminal reply.
    pub fn pending_requests(&self) -> usize {
        self.correlator.waiters.lock().len()
    }

    /// Commands whose progress callback is still registered.
    pub fn progress_listeners(&self) -> usize {
        self.correlator.listeners.lock().len()
    }

    /// Feed a raw response line through the dispatcher.
    pub fn dispatch(&self, raw: &str) {
        self.correlator.dispatch(raw);
    }
}
