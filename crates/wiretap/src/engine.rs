//! Replay/record engine: the spy/mock state machine over intercepted traffic.
//!
//! Spy mode lets calls reach the real network and records the exchanges.
//! Mock mode answers every call from the loaded fixture, validating each one
//! against the entry at its submission position. Lifecycle bookkeeping is
//! identity-indexed, so completions may arrive in any order.

use crate::comparator::{MethodUrlComparator, RequestComparator};
use crate::context::Context;
use crate::error::Error;
use crate::fixture::{self, FixtureOptions, FsStore};
use crate::interceptor::{
    CallBody, InterceptEvent, InterceptOptions, InterceptedCall, Interceptor,
};
use crate::session::RecordingSession;
use crate::snapshot::{self, Record, SerializedRequest};
use crate::view::{FilteredView, RecordFilter, Redactor};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Engine operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Traffic passes through to the real network and is recorded.
    #[default]
    Spy,
    /// Traffic is answered from the loaded fixture; the network is never hit.
    Mock,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Spy => write!(f, "spy"),
            Mode::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Error> {
        match value.to_ascii_lowercase().as_str() {
            "spy" => Ok(Mode::Spy),
            "mock" => Ok(Mode::Mock),
            other => Err(Error::Configuration(format!(
                "invalid mode `{other}`; expected one of: spy, mock"
            ))),
        }
    }
}

struct EngineInner {
    context: Arc<Context>,
    interceptor: Arc<Interceptor>,
    mode: RwLock<Mode>,
    comparator: RwLock<Arc<dyn RequestComparator>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<InterceptEvent>>>,
}

/// Orchestrates interception, bookkeeping, and replay for one capture scope.
///
/// Cheap to clone; clones share the same context. Independent engines created
/// with [`ReplayEngine::new`] share nothing.
#[derive(Clone)]
pub struct ReplayEngine {
    inner: Arc<EngineInner>,
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayEngine {
    pub fn new() -> Self {
        let context = Arc::new(Context::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let interceptor = Arc::new(Interceptor::new(Arc::clone(&context), events_tx));
        Self {
            inner: Arc::new(EngineInner {
                context,
                interceptor,
                mode: RwLock::new(Mode::Spy),
                comparator: RwLock::new(Arc::new(MethodUrlComparator)),
                events: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Handle the interception facility submits calls through.
    pub fn interceptor(&self) -> Arc<Interceptor> {
        Arc::clone(&self.inner.interceptor)
    }

    pub fn context(&self) -> Arc<Context> {
        Arc::clone(&self.inner.context)
    }

    pub fn mode(&self) -> Mode {
        *self.inner.mode.read()
    }

    /// Enable interception with pass-through: traffic is recorded, not replaced.
    pub fn spy(&self, options: InterceptOptions) {
        self.activate(Mode::Spy, options);
    }

    /// Enable interception without pass-through and answer calls from `records`.
    pub fn mock(&self, records: Vec<Record>, options: InterceptOptions) {
        self.inner.context.load_mocks(records);
        self.activate(Mode::Mock, options);
    }

    fn activate(&self, mode: Mode, options: InterceptOptions) {
        if let Some(comparator) = options.comparator {
            *self.inner.comparator.write() = comparator;
        }
        self.inner.interceptor.enable(options.exclude_ports);
        self.inner.interceptor.set_pass_through(mode == Mode::Spy);
        *self.inner.mode.write() = mode;
        info!(%mode, "interception active");
    }

    /// Wipe all bookkeeping and reset the identity counter.
    pub fn clear(&self) {
        self.inner.context.clear();
    }

    /// Disable interception and clear all state.
    pub fn restore(&self) {
        self.inner.interceptor.disable();
        self.inner.context.clear();
        info!("interception disabled and state cleared");
    }

    /// Drain and dispatch facility events until the channel closes.
    ///
    /// Runs at most once per engine; subsequent calls return immediately.
    pub async fn run(&self) {
        let receiver = self.inner.events.lock().take();
        let Some(mut receiver) = receiver else {
            warn!("event dispatcher already running");
            return;
        };
        while let Some(event) = receiver.recv().await {
            self.handle_event(event);
        }
    }

    /// Spawn the event dispatcher onto the current runtime.
    pub fn spawn_dispatcher(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run().await })
    }

    /// Dispatch one facility event. Exposed for deterministic testing.
    pub fn handle_event(&self, event: InterceptEvent) {
        match event {
            InterceptEvent::Submitted {
                identity,
                head,
                call,
            } => {
                self.inner.context.begin_call(identity, head);
                let Some(call) = call else { return };
                match self.mode() {
                    Mode::Mock => {
                        let engine = self.clone();
                        tokio::spawn(async move {
                            engine.answer_from_mock(identity, call).await;
                        });
                    }
                    Mode::Spy => {
                        // A held call can only reach a spy engine during a mode
                        // switch with traffic still arriving.
                        warn!(identity, "held call while in spy mode; rejecting");
                        let _ = call.reply.send(Err(Error::Configuration(
                            "pass-through is disabled while the engine is in spy mode".to_string(),
                        )));
                    }
                }
            }
            InterceptEvent::Proxied {
                identity,
                request,
                response,
            } => {
                if let Err(error) = self
                    .inner
                    .context
                    .complete_call(identity, Some(request), response)
                {
                    error!(identity, %error, "failed to record proxied completion");
                }
            }
        }
    }

    /// Answer a held call from the fixture entry at its position.
    ///
    /// Every failure is delivered on the call's own reply channel; other
    /// in-flight calls are unaffected.
    async fn answer_from_mock(&self, identity: u64, call: InterceptedCall) {
        let InterceptedCall { request, reply } = call;
        match self.mock_exchange(identity, request).await {
            Ok((actual, mock, response)) => {
                // Completion is recorded before the reply is released so the
                // record set is consistent the moment the caller resumes.
                if let Err(error) =
                    self.inner
                        .context
                        .complete_call(identity, Some(actual), mock.response)
                {
                    error!(identity, %error, "failed to record mock completion");
                }
                let _ = reply.send(Ok(response));
            }
            Err(error) => {
                warn!(identity, %error, "mock answer failed");
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn mock_exchange(
        &self,
        identity: u64,
        request: Request<CallBody>,
    ) -> Result<(SerializedRequest, Record, Response<Full<Bytes>>), Error> {
        let actual = snapshot::serialize_request(request).await?;
        let mock = self
            .inner
            .context
            .mock_at(identity)
            .ok_or(Error::NoMockForIdentity(identity))?;

        let comparator = Arc::clone(&*self.inner.comparator.read());
        comparator
            .compare(&actual, &mock.request, identity)
            .map_err(|reason| Error::ComparatorMismatch {
                identity,
                reason: reason.to_string(),
            })?;

        let response = mock.response.to_http()?;
        Ok((actual, mock, response))
    }

    /// Completed records in identity order, refusing to export a partial capture.
    pub fn export(&self) -> Result<Vec<Record>, Error> {
        let pending = self.inner.context.pending_calls();
        if !pending.is_empty() {
            return Err(Error::IncompleteCapture { pending });
        }
        Ok(self
            .inner
            .context
            .completed_records()
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Export and persist the capture as a fixture, returning the written path.
    pub fn save(&self, options: &FixtureOptions) -> Result<PathBuf, Error> {
        let records = self.export()?;
        fixture::save(&FsStore, options, &records)
    }

    /// Load and validate a fixture without changing the engine's mode.
    pub fn load(&self, options: &FixtureOptions) -> Result<Vec<Record>, Error> {
        fixture::load(&FsStore, options)
    }

    /// Start a recording session bound to one fixture.
    pub fn recording(&self, options: FixtureOptions) -> Result<RecordingSession, Error> {
        RecordingSession::begin(self.clone(), options)
    }

    /// A filtered, redactable view over the captured records.
    pub fn matching(&self, filter: impl Into<RecordFilter>) -> FilteredView {
        FilteredView::new(self.context(), filter.into())
    }

    /// All completed records, in identity order.
    pub fn intercepted(&self) -> Vec<Record> {
        self.matching(RecordFilter::All).intercepted()
    }

    /// All loaded fixture records, in position order.
    pub fn mocks(&self) -> Vec<Record> {
        self.matching(RecordFilter::All).mocks()
    }

    /// Redact a field across every captured record and loaded mock.
    pub fn redact(&self, path: &str, redactor: Option<Redactor>) {
        self.matching(RecordFilter::All).redact(path, redactor);
    }
}
