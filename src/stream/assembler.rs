//! # Streaming Response Assembler
//!
//! Turns the data of a matched route chain into one ordered stream of
//! [`StreamChunk`]s:
//!
//! ```text
//! Building ──► ShellReady ──► Streaming ──► Completed
//!                                 │             ▲
//!                                 └─► Aborted ──┘
//! ```
//!
//! - **Building**: promises that already settled are folded in (resolved ones
//!   inline, rejected ones keep their placeholder and are emitted right after
//!   the shell). Every other pending field becomes a placeholder and gets a
//!   watcher coroutine that forwards its settlement to the per-request event
//!   channel.
//! - **ShellReady**: the renderer runs on its own coroutine. Settlements that
//!   arrive meanwhile are queued. Once the shell is back the head and the
//!   shell chunk go out; from here on status and headers are fixed.
//! - **Streaming**: one chunk per settlement in arrival order.
//! - **Aborted**: every field still open is closed with an `aborted` rejection.
//!
//! A shell failure (or an abort while the shell is rendering) returns
//! [`AssembleError::Shell`] before a single byte reaches the sink.

use super::chunk::{FieldAddress, ResponseHead, StreamChunk};
use super::governor::{AbortGovernor, AbortHandle, AbortReason, AbortSignal};
use super::render::{ShellContext, ShellRenderer};
use super::sink::ChunkSink;
use crate::deferred::{
    critical_value, DeferredData, DeferredError, DeferredParts, ErrorDescriptor, Promise,
    Settlement,
};
use crate::error::{AssembleError, ShellRenderError};
use crate::ids::RequestId;
use crate::runtime_config::{RuntimeConfig, ServerMode};
use may::sync::mpsc;
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Building,
    ShellReady,
    Streaming,
    Aborted,
    Completed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamState::Building => "building",
            StreamState::ShellReady => "shell_ready",
            StreamState::Streaming => "streaming",
            StreamState::Aborted => "aborted",
            StreamState::Completed => "completed",
        })
    }
}

/// Data one route contributed to the document.
#[derive(Debug)]
pub enum RouteData {
    Plain(Value),
    Deferred(DeferredData),
}

impl From<Value> for RouteData {
    fn from(value: Value) -> Self {
        RouteData::Plain(value)
    }
}

impl From<DeferredData> for RouteData {
    fn from(data: DeferredData) -> Self {
        RouteData::Deferred(data)
    }
}

/// Everything the assembler needs for one response.
#[derive(Debug)]
pub struct StreamDocument {
    /// Route chain data, root first.
    pub routes: Vec<(String, RouteData)>,
    pub head: ResponseHead,
}

impl StreamDocument {
    #[must_use]
    pub fn new(head: ResponseHead) -> Self {
        Self {
            routes: Vec::new(),
            head,
        }
    }

    #[must_use]
    pub fn route(mut self, route_id: impl Into<String>, data: impl Into<RouteData>) -> Self {
        self.routes.push((route_id.into(), data.into()));
        self
    }
}

/// Assembler settings taken from [`RuntimeConfig`].
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub abort_delay: Duration,
    pub server_mode: ServerMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for StreamConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            abort_delay: config.abort_delay,
            server_mode: config.server_mode,
        }
    }
}

/// Messages consumed by the assembler, in arrival order.
#[derive(Debug)]
pub enum StreamEvent {
    ShellRendered(Result<String, ShellRenderError>),
    /// Slot index across the whole document, and its settlement.
    Settled(usize, Settlement),
    Abort(AbortReason),
}

/// Summary of a finished stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub state: StreamState,
    /// Promises that were already resolved and went out inside the shell.
    pub inlined: usize,
    pub resolved: usize,
    pub rejected: usize,
    pub aborted: Option<AbortReason>,
}

struct OpenSlot {
    address: FieldAddress,
    open: bool,
}

/// One stream's worth of state. Build one per request.
pub struct StreamAssembler {
    request_id: RequestId,
    config: StreamConfig,
    state: StreamState,
    events_tx: mpsc::Sender<StreamEvent>,
    events_rx: mpsc::Receiver<StreamEvent>,
    handle: AbortHandle,
}

impl StreamAssembler {
    #[must_use]
    pub fn new(request_id: RequestId, config: StreamConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let handle = AbortHandle::new(AbortSignal::new(), events_tx.clone());
        Self {
            request_id,
            config,
            state: StreamState::Building,
            events_tx,
            events_rx,
            handle,
        }
    }

    /// Share an existing signal, typically the one handed to the loaders that
    /// produced the document.
    #[must_use]
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.handle = AbortHandle::new(signal, self.events_tx.clone());
        self
    }

    /// Handle for cancelling the stream from outside.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, next: StreamState) {
        debug!(
            request_id = %self.request_id,
            from = %self.state,
            to = %next,
            "Stream state transition"
        );
        self.state = next;
    }

    /// Drive the stream to completion.
    pub fn run(
        &mut self,
        document: StreamDocument,
        renderer: Arc<dyn ShellRenderer>,
        sink: &mut dyn ChunkSink,
    ) -> Result<StreamOutcome, AssembleError> {
        let started = Instant::now();
        let StreamDocument { routes, head } = document;

        let mut slots: Vec<OpenSlot> = Vec::new();
        let mut early_rejections: Vec<(usize, DeferredError)> = Vec::new();
        let mut critical = Map::new();
        let mut inlined = 0usize;

        for (route_id, data) in routes {
            let value = match data {
                RouteData::Plain(value) => value,
                RouteData::Deferred(data) => {
                    let DeferredParts {
                        fields,
                        slots: route_slots,
                        ..
                    } = data.into_parts();
                    let base = slots.len();
                    let mut inline: Vec<Option<Value>> = Vec::with_capacity(route_slots.len());
                    for mut slot in route_slots {
                        let index = slots.len();
                        let address = FieldAddress::new(route_id.clone(), slot.path.clone());
                        match slot.promise.poll_settled() {
                            Some(Settlement::Resolved(value)) => {
                                inline.push(Some(value.clone()));
                                inlined += 1;
                                slots.push(OpenSlot {
                                    address,
                                    open: false,
                                });
                            }
                            Some(Settlement::Rejected(err)) => {
                                inline.push(None);
                                early_rejections.push((index, err.clone()));
                                slots.push(OpenSlot {
                                    address,
                                    open: true,
                                });
                            }
                            None => {
                                inline.push(None);
                                slots.push(OpenSlot {
                                    address,
                                    open: true,
                                });
                                self.watch(index, slot.promise);
                            }
                        }
                    }
                    critical_value(&fields, &mut |id| {
                        match inline.get(id.0).cloned().flatten() {
                            Some(value) => value,
                            None => slots
                                .get(base + id.0)
                                .map(|s| Value::String(s.address.path.placeholder()))
                                .unwrap_or(Value::Null),
                        }
                    })
                }
            };
            critical.insert(route_id, value);
        }

        let mut remaining = slots.iter().filter(|s| s.open).count();
        debug!(
            request_id = %self.request_id,
            pending = remaining,
            inlined,
            "Critical data collected"
        );

        let governor = AbortGovernor::arm(
            self.config.abort_delay,
            self.handle.clone(),
            self.request_id,
        );

        let critical = Value::Object(critical);
        let ctx = ShellContext {
            request_id: self.request_id,
            critical: critical.clone(),
            pending: slots
                .iter()
                .filter(|s| s.open)
                .map(|s| s.address.clone())
                .collect(),
        };
        self.render_shell(ctx, Arc::clone(&renderer));

        // Wait for the shell, queueing anything that settles first.
        let mut queued: Vec<(usize, Settlement)> = Vec::new();
        let html = loop {
            match self.events_rx.recv() {
                Ok(StreamEvent::ShellRendered(Ok(html))) => break html,
                Ok(StreamEvent::ShellRendered(Err(err))) => {
                    governor.disarm();
                    self.handle.abort(AbortReason::Cancelled);
                    error!(request_id = %self.request_id, error = %err, "Shell render failed");
                    return Err(AssembleError::Shell(err));
                }
                Ok(StreamEvent::Settled(index, settlement)) => queued.push((index, settlement)),
                Ok(StreamEvent::Abort(reason)) => {
                    governor.disarm();
                    warn!(
                        request_id = %self.request_id,
                        reason = %reason,
                        "Stream aborted before the shell was ready"
                    );
                    return Err(AssembleError::Shell(ShellRenderError::Aborted));
                }
                Err(_) => {
                    governor.disarm();
                    return Err(AssembleError::Shell(ShellRenderError::Aborted));
                }
            }
        };

        self.transition(StreamState::ShellReady);
        let mut emitter = Emitter {
            request_id: self.request_id,
            server_mode: self.config.server_mode,
            renderer,
            sink,
            resolved: 0,
            rejected: 0,
        };
        if let Err(source) = emitter.sink.start(&head) {
            governor.disarm();
            self.handle.abort(AbortReason::Disconnected);
            return Err(AssembleError::Transport {
                flushed: false,
                source,
            });
        }
        let shell = StreamChunk::InitialShell { html, critical };
        if let Err(source) = emitter.sink.send(&shell) {
            return Err(self.transport_failed(&governor, source));
        }
        info!(
            request_id = %self.request_id,
            status = head.status,
            pending = remaining,
            shell_ms = started.elapsed().as_millis() as u64,
            "Shell flushed"
        );

        self.transition(StreamState::Streaming);
        let pending_events = early_rejections
            .into_iter()
            .map(|(index, err)| (index, Settlement::Rejected(err)))
            .chain(queued);
        for (index, settlement) in pending_events {
            if let Err(source) = emitter.settle(&mut slots, index, settlement, &mut remaining) {
                return Err(self.transport_failed(&governor, source));
            }
        }

        let mut aborted = None;
        while remaining > 0 {
            let event = match self.events_rx.recv() {
                Ok(event) => event,
                Err(_) => StreamEvent::Abort(AbortReason::Disconnected),
            };
            match event {
                StreamEvent::Settled(index, settlement) => {
                    if let Err(source) =
                        emitter.settle(&mut slots, index, settlement, &mut remaining)
                    {
                        return Err(self.transport_failed(&governor, source));
                    }
                }
                StreamEvent::Abort(reason) => {
                    self.transition(StreamState::Aborted);
                    aborted = Some(reason);
                    for slot in slots.iter_mut().filter(|s| s.open) {
                        slot.open = false;
                        let chunk = StreamChunk::RejectedValue {
                            route: slot.address.route.clone(),
                            path: slot.address.path.clone(),
                            error: ErrorDescriptor::aborted(),
                        };
                        emitter.rejected += 1;
                        if let Err(source) = emitter.sink.send(&chunk) {
                            return Err(self.transport_failed(&governor, source));
                        }
                    }
                    warn!(
                        request_id = %self.request_id,
                        reason = %reason,
                        aborted_fields = remaining,
                        "Deferred fields aborted"
                    );
                    remaining = 0;
                }
                StreamEvent::ShellRendered(_) => {}
            }
        }

        governor.disarm();
        if let Err(source) = emitter.sink.finish() {
            return Err(self.transport_failed(&governor, source));
        }
        self.transition(StreamState::Completed);
        info!(
            request_id = %self.request_id,
            resolved = emitter.resolved,
            rejected = emitter.rejected,
            inlined,
            aborted = aborted.is_some(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Stream completed"
        );
        Ok(StreamOutcome {
            state: StreamState::Completed,
            inlined,
            resolved: emitter.resolved,
            rejected: emitter.rejected,
            aborted,
        })
    }

    fn watch(&self, index: usize, promise: Promise) {
        let tx = self.events_tx.clone();
        let _ = may::go!(move || {
            let settlement = promise.wait();
            // The stream may have finished (aborted) already.
            let _ = tx.send(StreamEvent::Settled(index, settlement));
        });
    }

    fn render_shell(&self, ctx: ShellContext, renderer: Arc<dyn ShellRenderer>) {
        let tx = self.events_tx.clone();
        let _ = may::go!(move || {
            let result = match catch_unwind(AssertUnwindSafe(|| renderer.render_shell(&ctx))) {
                Ok(result) => result,
                Err(panic) => Err(ShellRenderError::Panicked(panic_message(panic.as_ref()))),
            };
            let _ = tx.send(StreamEvent::ShellRendered(result));
        });
    }

    fn transport_failed(&mut self, governor: &AbortGovernor, source: std::io::Error) -> AssembleError {
        governor.disarm();
        self.handle.abort(AbortReason::Disconnected);
        self.transition(StreamState::Aborted);
        warn!(request_id = %self.request_id, error = %source, "Stream transport failed");
        AssembleError::Transport {
            flushed: true,
            source,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "renderer panicked".to_string())
}

/// Post-shell output: turns settlements into chunks.
struct Emitter<'a> {
    request_id: RequestId,
    server_mode: ServerMode,
    renderer: Arc<dyn ShellRenderer>,
    sink: &'a mut dyn ChunkSink,
    resolved: usize,
    rejected: usize,
}

impl Emitter<'_> {
    fn settle(
        &mut self,
        slots: &mut [OpenSlot],
        index: usize,
        settlement: Settlement,
        remaining: &mut usize,
    ) -> std::io::Result<()> {
        let Some(slot) = slots.get_mut(index).filter(|s| s.open) else {
            return Ok(());
        };
        slot.open = false;
        *remaining = remaining.saturating_sub(1);
        let address = slot.address.clone();
        let chunk = match settlement {
            Settlement::Resolved(value) => self.resolved_chunk(address, value),
            Settlement::Rejected(err) => self.rejected_chunk(address, &err),
        };
        debug!(
            request_id = %self.request_id,
            route = %slot.address.route,
            path = %slot.address.path,
            resolved = matches!(chunk, StreamChunk::ResolvedValue { .. }),
            "Deferred chunk emitted"
        );
        self.sink.send(&chunk)
    }

    fn resolved_chunk(&mut self, address: FieldAddress, value: Value) -> StreamChunk {
        let fragment = catch_unwind(AssertUnwindSafe(|| {
            self.renderer.render_fragment(&address, &value)
        }))
        .unwrap_or_else(|panic| Err(ShellRenderError::Panicked(panic_message(panic.as_ref()))));
        match fragment {
            Ok(html) => {
                self.resolved += 1;
                StreamChunk::ResolvedValue {
                    route: address.route,
                    path: address.path,
                    value,
                    html,
                }
            }
            Err(err) => {
                warn!(
                    request_id = %self.request_id,
                    field = %address,
                    error = %err,
                    "Fragment render failed after flush"
                );
                self.rejected_chunk(address, &DeferredError::error(err.to_string()))
            }
        }
    }

    fn rejected_chunk(&mut self, address: FieldAddress, err: &DeferredError) -> StreamChunk {
        self.rejected += 1;
        StreamChunk::RejectedValue {
            route: address.route,
            path: address.path,
            error: err.describe(self.server_mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::{defer, promise};
    use crate::response::HeaderVec;
    use crate::stream::sink::CollectSink;
    use crate::stream::PageShell;
    use serde_json::json;

    fn config(ms: u64) -> StreamConfig {
        StreamConfig {
            abort_delay: Duration::from_millis(ms),
            server_mode: ServerMode::Production,
        }
    }

    fn head() -> ResponseHead {
        ResponseHead::new(200, HeaderVec::new())
    }

    struct FailingShell;

    impl ShellRenderer for FailingShell {
        fn render_shell(&self, _ctx: &ShellContext) -> Result<String, ShellRenderError> {
            Err(ShellRenderError::render("template exploded"))
        }
    }

    #[test]
    fn plain_routes_produce_only_the_shell() {
        let doc = StreamDocument::new(head()).route("root", json!({"a": 1}));
        let mut sink = CollectSink::new();
        let outcome = StreamAssembler::new(RequestId::new(), config(1000))
            .run(doc, Arc::new(PageShell::default()), &mut sink)
            .unwrap();
        assert_eq!(outcome.state, StreamState::Completed);
        assert_eq!(sink.chunks.len(), 1);
        assert!(sink.finished);
        match sink.shell() {
            Some(StreamChunk::InitialShell { critical, .. }) => {
                assert_eq!(critical, &json!({"root": {"a": 1}}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shell_failure_writes_nothing() {
        let (resolver, p) = promise();
        let data = defer().pending("slow", p).build().unwrap();
        let doc = StreamDocument::new(head()).route("root", data);
        let mut sink = CollectSink::new();
        let mut assembler = StreamAssembler::new(RequestId::new(), config(1000));
        let signal = assembler.abort_handle().signal().clone();
        let err = assembler
            .run(doc, Arc::new(FailingShell), &mut sink)
            .unwrap_err();
        assert!(matches!(err, AssembleError::Shell(ShellRenderError::Render(_))));
        assert!(sink.head.is_none());
        assert!(sink.chunks.is_empty());
        assert!(signal.is_aborted());
        drop(resolver);
    }

    #[test]
    fn pre_rejected_field_keeps_placeholder_and_follows_shell() {
        let data = defer()
            .pending("bad", Promise::rejected(DeferredError::error("secret")))
            .build()
            .unwrap();
        let doc = StreamDocument::new(head()).route("root", data);
        let mut sink = CollectSink::new();
        let outcome = StreamAssembler::new(RequestId::new(), config(1000))
            .run(doc, Arc::new(PageShell::default()), &mut sink)
            .unwrap();
        assert_eq!(outcome.rejected, 1);
        match sink.shell() {
            Some(StreamChunk::InitialShell { critical, .. }) => {
                assert_eq!(critical, &json!({"root": {"bad": "__deferred_promise:bad"}}));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &sink.settled()[0] {
            StreamChunk::RejectedValue { error, .. } => {
                assert_eq!(error.message, crate::deferred::REDACTED_MESSAGE);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn explicit_cancel_aborts_open_fields() {
        let (_keep, p) = promise();
        let data = defer().pending("never", p).build().unwrap();
        let doc = StreamDocument::new(head()).route("root", data);
        let mut sink = CollectSink::new();
        let mut assembler = StreamAssembler::new(RequestId::new(), config(60_000));
        let handle = assembler.abort_handle();
        let _ = may::go!(move || {
            may::coroutine::sleep(Duration::from_millis(20));
            handle.abort(AbortReason::Cancelled);
        });
        let outcome = assembler
            .run(doc, Arc::new(PageShell::default()), &mut sink)
            .unwrap();
        assert_eq!(outcome.aborted, Some(AbortReason::Cancelled));
        assert_eq!(sink.settled().len(), 1);
        match &sink.settled()[0] {
            StreamChunk::RejectedValue { error, .. } => assert!(error.is_aborted()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
