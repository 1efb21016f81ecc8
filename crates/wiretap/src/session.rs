//! Recording sessions: one fixture per session, effective mode chosen by an
//! environment override.
//!
//! A spy session records traffic and persists it on completion. A mock
//! session loads the fixture up front and writes nothing. Sessions do not
//! nest; each `begin` is paired with exactly one `complete`.

use crate::engine::{Mode, ReplayEngine};
use crate::error::Error;
use crate::fixture::{self, FixtureOptions, FixtureStore, FsStore};
use crate::interceptor::InterceptOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Environment variable selecting the effective mode for a session.
/// `spy` records against the live network, `mock` replays; unset means mock.
pub const MODE_ENV: &str = "WIRETAP_MODE";

/// Short-lived handle bound to one fixture file.
pub struct RecordingSession {
    engine: ReplayEngine,
    options: FixtureOptions,
    store: Arc<dyn FixtureStore>,
    mode: Mode,
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("options", &self.options)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RecordingSession {
    /// Start a session against the filesystem-backed store.
    pub fn begin(engine: ReplayEngine, options: FixtureOptions) -> Result<Self, Error> {
        Self::begin_with_store(engine, options, Arc::new(FsStore))
    }

    /// Start a session with a custom fixture store.
    ///
    /// Mock sessions fail here if the fixture is missing or malformed, before
    /// any call is intercepted.
    pub fn begin_with_store(
        engine: ReplayEngine,
        options: FixtureOptions,
        store: Arc<dyn FixtureStore>,
    ) -> Result<Self, Error> {
        let mode = effective_mode()?;
        match mode {
            Mode::Mock => {
                let records = fixture::load(store.as_ref(), &options)?;
                engine.mock(records, InterceptOptions::default());
            }
            Mode::Spy => engine.spy(InterceptOptions::default()),
        }
        info!(fixture = %options.path().display(), %mode, "recording session started");
        Ok(Self {
            engine,
            options,
            store,
            mode,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Finish the session.
    ///
    /// Spy sessions persist the captured records and return the fixture path;
    /// the export guard applies, so completion fails while calls are still in
    /// flight. Mock sessions write nothing.
    pub fn complete(self) -> Result<Option<PathBuf>, Error> {
        match self.mode {
            Mode::Spy => {
                let records = self.engine.export()?;
                let path = fixture::save(self.store.as_ref(), &self.options, &records)?;
                Ok(Some(path))
            }
            Mode::Mock => Ok(None),
        }
    }
}

fn effective_mode() -> Result<Mode, Error> {
    match std::env::var(MODE_ENV) {
        Ok(value) => value.parse().map_err(|_| {
            Error::Configuration(format!(
                "{MODE_ENV} must be one of: spy, mock (got `{value}`)"
            ))
        }),
        Err(std::env::VarError::NotPresent) => Ok(Mode::Mock),
        Err(error) => Err(Error::Configuration(format!("{MODE_ENV}: {error}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Body, Record, SerializedRequest, SerializedResponse};
    use serial_test::serial;
    use std::collections::HashMap;

    fn record(path: &str, status: u16) -> Record {
        Record {
            request: SerializedRequest {
                method: "GET".to_string(),
                scheme: "http".to_string(),
                host: "example.com".to_string(),
                path: path.to_string(),
                query: None,
                headers: HashMap::new(),
                body: Body::Empty,
            },
            response: SerializedResponse {
                status,
                headers: HashMap::new(),
                body: Body::Empty,
            },
            duration_ms: 3,
        }
    }

    #[test]
    #[serial]
    fn test_defaults_to_mock_when_unset() {
        std::env::remove_var(MODE_ENV);
        let dir = tempfile::tempdir().unwrap();
        let options = FixtureOptions::new("api").in_dir(dir.path());
        fixture::save(&FsStore, &options, &[record("/a", 200)]).unwrap();

        let engine = ReplayEngine::new();
        let session = RecordingSession::begin(engine.clone(), options).unwrap();
        assert_eq!(session.mode(), Mode::Mock);
        assert_eq!(engine.mocks().len(), 1);
        assert_eq!(session.complete().unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_mock_session_fails_without_fixture() {
        std::env::remove_var(MODE_ENV);
        let dir = tempfile::tempdir().unwrap();
        let options = FixtureOptions::new("absent").in_dir(dir.path());

        let engine = ReplayEngine::new();
        let error = RecordingSession::begin(engine, options).unwrap_err();
        assert!(matches!(error, Error::FixtureLoad { .. }));
    }

    #[test]
    #[serial]
    fn test_spy_session_persists_capture() {
        std::env::set_var(MODE_ENV, "spy");
        let dir = tempfile::tempdir().unwrap();
        let options = FixtureOptions::new("captured").in_dir(dir.path());

        let engine = ReplayEngine::new();
        let session = RecordingSession::begin(engine.clone(), options.clone()).unwrap();
        assert_eq!(session.mode(), Mode::Spy);

        let context = engine.context();
        context.begin_call(0, record("/a", 200).request);
        context
            .complete_call(0, None, record("/a", 200).response)
            .unwrap();

        let path = session.complete().unwrap().expect("spy session writes");
        assert_eq!(path, options.path());
        let loaded = fixture::load(&FsStore, &options).unwrap();
        assert_eq!(loaded.len(), 1);
        std::env::remove_var(MODE_ENV);
    }

    #[test]
    #[serial]
    fn test_invalid_mode_value_is_a_configuration_error() {
        std::env::set_var(MODE_ENV, "record");
        let dir = tempfile::tempdir().unwrap();
        let options = FixtureOptions::new("api").in_dir(dir.path());

        let error = RecordingSession::begin(ReplayEngine::new(), options).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
        assert!(error.to_string().contains("spy, mock"));
        std::env::remove_var(MODE_ENV);
    }
}
