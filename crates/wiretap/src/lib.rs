//! Wiretap: deterministic capture and replay of outbound HTTP traffic for
//! test suites.
//!
//! Capture real traffic once in spy mode, persist it as a JSON fixture, then
//! replay it in mock mode with no network access. Each submitted call gets a
//! strictly increasing identity; fixture position `i` answers the `i`-th call,
//! so replay stays correct however completions interleave.

// ===== Core engine modules =====
pub mod comparator;
pub mod context;
pub mod engine;
pub mod error;
pub mod fixture;
pub mod interceptor;
pub mod session;
pub mod snapshot;
pub mod view;

pub use comparator::{comparator_fn, MethodUrlComparator, RequestComparator};
pub use context::Context;
pub use engine::{Mode, ReplayEngine};
pub use error::{BoxError, Error, PendingCall};
pub use fixture::{FixtureOptions, FixtureStore, FsStore};
pub use interceptor::{
    CallBody, CallResult, InterceptEvent, InterceptOptions, InterceptedCall, Interceptor,
    Submission,
};
pub use session::{RecordingSession, MODE_ENV};
pub use snapshot::{Body, Record, SerializedRequest, SerializedResponse};
pub use view::{FilteredView, RecordFilter, Redactor};
