//! Adapter between the external interception facility and the replay engine.
//!
//! The facility delivers parsed outbound calls without knowing anything about
//! identities or modes. This adapter assigns a monotonically increasing
//! identity to each accepted call and turns the facility's observations into
//! the internal event stream the engine consumes.

use crate::comparator::RequestComparator;
use crate::context::Context;
use crate::error::{BoxError, Error};
use crate::snapshot::{SerializedRequest, SerializedResponse};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::Full;
use hyper::{Request, Response};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Streaming request body as delivered by the interception facility.
pub type CallBody = BoxBody<Bytes, BoxError>;

/// Outcome delivered to the intercepted caller's reply channel.
pub type CallResult = Result<Response<Full<Bytes>>, Error>;

/// One outbound call observed by the interception facility: the parsed request
/// with its streaming body, and the channel the caller's response travels on.
pub struct InterceptedCall {
    pub request: Request<CallBody>,
    pub reply: oneshot::Sender<CallResult>,
}

/// Verdict handed back to the facility for a submitted call.
pub enum Submission {
    /// Interception is off or the port is excluded; the facility handles the
    /// call on its own and no identity is spent.
    Disabled(InterceptedCall),
    /// Forward the call to the real network, then report the finished exchange
    /// via [`Interceptor::complete`].
    PassThrough { identity: u64, call: InterceptedCall },
    /// The engine owns the call and will answer it through the reply channel.
    Held { identity: u64 },
}

/// Internal event stream consumed by the engine.
pub enum InterceptEvent {
    /// A call was submitted and assigned an identity. `call` is present when
    /// the engine is expected to answer it.
    Submitted {
        identity: u64,
        head: SerializedRequest,
        call: Option<InterceptedCall>,
    },
    /// A pass-through call completed over the real network.
    Proxied {
        identity: u64,
        request: SerializedRequest,
        response: SerializedResponse,
    },
}

/// Options accepted when enabling interception.
#[derive(Clone, Default)]
pub struct InterceptOptions {
    /// Comparator override for replay validation.
    pub comparator: Option<Arc<dyn RequestComparator>>,
    /// Ports whose traffic bypasses interception entirely.
    pub exclude_ports: HashSet<u16>,
}

impl InterceptOptions {
    pub fn with_comparator(mut self, comparator: Arc<dyn RequestComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn exclude_port(mut self, port: u16) -> Self {
        self.exclude_ports.insert(port);
        self
    }
}

impl std::fmt::Debug for InterceptOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptOptions")
            .field("comparator", &self.comparator.as_ref().map(|_| ".."))
            .field("exclude_ports", &self.exclude_ports)
            .finish()
    }
}

/// Facility-facing handle. Assigns identities and emits [`InterceptEvent`]s.
pub struct Interceptor {
    context: Arc<Context>,
    events: mpsc::UnboundedSender<InterceptEvent>,
    enabled: AtomicBool,
    pass_through: AtomicBool,
    excluded_ports: RwLock<HashSet<u16>>,
}

impl Interceptor {
    pub(crate) fn new(context: Arc<Context>, events: mpsc::UnboundedSender<InterceptEvent>) -> Self {
        Self {
            context,
            events,
            enabled: AtomicBool::new(false),
            pass_through: AtomicBool::new(false),
            excluded_ports: RwLock::new(HashSet::new()),
        }
    }

    /// Activate interception. Submissions before this point are not tracked.
    pub fn enable(&self, excluded_ports: HashSet<u16>) {
        *self.excluded_ports.write() = excluded_ports;
        self.enabled.store(true, Ordering::SeqCst);
        debug!("interception enabled");
    }

    /// Deactivate interception and stop identity issuance.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        debug!("interception disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Toggle whether submitted calls may additionally reach the real network.
    pub fn set_pass_through(&self, allow: bool) {
        self.pass_through.store(allow, Ordering::SeqCst);
    }

    pub fn pass_through(&self) -> bool {
        self.pass_through.load(Ordering::SeqCst)
    }

    /// Submit an observed outbound call.
    ///
    /// Increments the identity counter exactly once per accepted call,
    /// regardless of mode.
    pub fn submit(&self, call: InterceptedCall) -> Submission {
        if !self.is_enabled() || self.events.is_closed() {
            return Submission::Disabled(call);
        }

        let port = call_port(&call.request);
        if self.excluded_ports.read().contains(&port) {
            debug!(port, "port excluded from interception");
            return Submission::Disabled(call);
        }

        let identity = self.context.allocate_identity();
        let head = SerializedRequest::from_parts(
            call.request.method(),
            call.request.uri(),
            call.request.headers(),
        );

        if self.pass_through() {
            let _ = self.events.send(InterceptEvent::Submitted {
                identity,
                head,
                call: None,
            });
            Submission::PassThrough { identity, call }
        } else {
            let _ = self.events.send(InterceptEvent::Submitted {
                identity,
                head,
                call: Some(call),
            });
            Submission::Held { identity }
        }
    }

    /// Report that a pass-through call finished over the real network.
    pub fn complete(
        &self,
        identity: u64,
        request: SerializedRequest,
        response: SerializedResponse,
    ) {
        let event = InterceptEvent::Proxied {
            identity,
            request,
            response,
        };
        if self.events.send(event).is_err() {
            warn!(identity, "engine dispatcher gone; dropping proxied completion");
        }
    }
}

fn call_port<B>(request: &Request<B>) -> u16 {
    request.uri().port_u16().unwrap_or_else(|| {
        if request.uri().scheme_str() == Some("https") {
            443
        } else {
            80
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::convert::Infallible;

    fn empty_body() -> CallBody {
        Full::new(Bytes::new())
            .map_err(|never: Infallible| match never {})
            .boxed()
    }

    fn call(uri: &str) -> (InterceptedCall, oneshot::Receiver<CallResult>) {
        let (reply, rx) = oneshot::channel();
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(empty_body())
            .unwrap();
        (InterceptedCall { request, reply }, rx)
    }

    fn interceptor() -> (Interceptor, mpsc::UnboundedReceiver<InterceptEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Interceptor::new(Arc::new(Context::new()), tx), rx)
    }

    #[test]
    fn test_disabled_interceptor_returns_call() {
        let (interceptor, _rx) = interceptor();
        let (submitted, _reply) = call("http://example.com/a");
        assert!(matches!(
            interceptor.submit(submitted),
            Submission::Disabled(_)
        ));
    }

    #[test]
    fn test_held_submissions_assign_increasing_identities() {
        let (interceptor, mut rx) = interceptor();
        interceptor.enable(HashSet::new());

        for expected in 0..3u64 {
            let (submitted, _reply) = call("http://example.com/a");
            let Submission::Held { identity } = interceptor.submit(submitted) else {
                panic!("expected held submission");
            };
            assert_eq!(identity, expected);

            let Some(InterceptEvent::Submitted { identity, call, .. }) = rx.try_recv().ok() else {
                panic!("expected submitted event");
            };
            assert_eq!(identity, expected);
            assert!(call.is_some());
        }
    }

    #[test]
    fn test_pass_through_returns_call_and_emits_head_only_event() {
        let (interceptor, mut rx) = interceptor();
        interceptor.enable(HashSet::new());
        interceptor.set_pass_through(true);

        let (submitted, _reply) = call("http://example.com/users/1?a=1");
        let Submission::PassThrough { identity, .. } = interceptor.submit(submitted) else {
            panic!("expected pass-through submission");
        };
        assert_eq!(identity, 0);

        let Some(InterceptEvent::Submitted { head, call, .. }) = rx.try_recv().ok() else {
            panic!("expected submitted event");
        };
        assert!(call.is_none());
        assert_eq!(head.url(), "http://example.com/users/1?a=1");
    }

    #[test]
    fn test_excluded_port_bypasses_interception() {
        let (interceptor, mut rx) = interceptor();
        interceptor.enable([9200u16].into_iter().collect());

        let (submitted, _reply) = call("http://example.com:9200/_search");
        assert!(matches!(
            interceptor.submit(submitted),
            Submission::Disabled(_)
        ));
        assert!(rx.try_recv().is_err());

        // Default ports resolve from the scheme.
        let (submitted, _reply) = call("http://example.com/a");
        assert!(matches!(
            interceptor.submit(submitted),
            Submission::Held { identity: 0 }
        ));
    }

    #[test]
    fn test_disable_stops_identity_issuance() {
        let (interceptor, _rx) = interceptor();
        interceptor.enable(HashSet::new());

        let (submitted, _reply) = call("http://example.com/a");
        assert!(matches!(
            interceptor.submit(submitted),
            Submission::Held { identity: 0 }
        ));

        interceptor.disable();
        let (submitted, _reply) = call("http://example.com/b");
        assert!(matches!(
            interceptor.submit(submitted),
            Submission::Disabled(_)
        ));
    }
}
