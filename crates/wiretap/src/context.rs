//! Engine-owned bookkeeping: in-flight calls, completed records, loaded mocks.
//!
//! All three collections are keyed by the identity counter held here. There is
//! no ambient static state; independent engines own independent contexts and
//! never interfere with each other.

use crate::error::{Error, PendingCall};
use crate::snapshot::{Record, SerializedRequest, SerializedResponse};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

/// A submitted call awaiting completion.
#[derive(Debug, Clone)]
pub struct InFlightCall {
    pub request: SerializedRequest,
    pub started_at: Instant,
}

/// Shared state behind one engine instance.
///
/// An identity is in exactly one of `in_flight` / `completed` once submitted.
/// Completion order is arbitrary; storage is positional by identity so
/// correctness never depends on it.
#[derive(Debug, Default)]
pub struct Context {
    next_identity: AtomicU64,
    in_flight: RwLock<HashMap<u64, InFlightCall>>,
    completed: RwLock<BTreeMap<u64, Record>>,
    loaded_mocks: RwLock<Vec<Record>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next identity, strictly increasing in submission order.
    pub fn allocate_identity(&self) -> u64 {
        self.next_identity.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a submitted call. Start time is taken here.
    pub fn begin_call(&self, identity: u64, request: SerializedRequest) {
        let previous = self.in_flight.write().insert(
            identity,
            InFlightCall {
                request,
                started_at: Instant::now(),
            },
        );
        debug_assert!(previous.is_none(), "identity {identity} submitted twice");
        debug!(identity, "call submitted");
    }

    /// Move a call from in-flight to completed, measuring its duration.
    ///
    /// `request` replaces the head-only snapshot taken at submission when the
    /// finished request (with a drained body) is available.
    pub fn complete_call(
        &self,
        identity: u64,
        request: Option<SerializedRequest>,
        response: SerializedResponse,
    ) -> Result<(), Error> {
        let entry = self
            .in_flight
            .write()
            .remove(&identity)
            .ok_or(Error::MissingInFlight(identity))?;
        let duration_ms = entry.started_at.elapsed().as_millis() as u64;
        let record = Record {
            request: request.unwrap_or(entry.request),
            response,
            duration_ms,
        };
        self.completed.write().insert(identity, record);
        debug!(identity, duration_ms, "call completed");
        Ok(())
    }

    pub fn load_mocks(&self, records: Vec<Record>) {
        *self.loaded_mocks.write() = records;
    }

    /// The fixture entry expected to answer the call at this position.
    pub fn mock_at(&self, identity: u64) -> Option<Record> {
        self.loaded_mocks.read().get(identity as usize).cloned()
    }

    /// Completed records with their identities, in identity order.
    pub fn completed_records(&self) -> Vec<(u64, Record)> {
        self.completed
            .read()
            .iter()
            .map(|(identity, record)| (*identity, record.clone()))
            .collect()
    }

    pub fn loaded_mocks(&self) -> Vec<Record> {
        self.loaded_mocks.read().clone()
    }

    /// Swap the completed record at `identity` for a rebuilt one (redaction).
    pub fn replace_completed(&self, identity: u64, record: Record) {
        if let Some(slot) = self.completed.write().get_mut(&identity) {
            *slot = record;
        }
    }

    /// Swap the loaded mock at `position` for a rebuilt one (redaction).
    pub fn replace_mock(&self, position: usize, record: Record) {
        if let Some(slot) = self.loaded_mocks.write().get_mut(position) {
            *slot = record;
        }
    }

    /// Calls submitted but not yet completed, in identity order.
    pub fn pending_calls(&self) -> Vec<PendingCall> {
        let mut pending: Vec<PendingCall> = self
            .in_flight
            .read()
            .iter()
            .map(|(identity, call)| PendingCall {
                identity: *identity,
                method: call.request.method.clone(),
                url: call.request.url(),
            })
            .collect();
        pending.sort_by_key(|call| call.identity);
        pending
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.read().len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.read().len()
    }

    pub fn mocks_len(&self) -> usize {
        self.loaded_mocks.read().len()
    }

    /// Wipe all collections and reset the identity counter to zero.
    ///
    /// Run between independent test cases to prevent cross-test leakage.
    pub fn clear(&self) {
        self.in_flight.write().clear();
        self.completed.write().clear();
        self.loaded_mocks.write().clear();
        self.next_identity.store(0, Ordering::SeqCst);
        debug!("context cleared");
    }
}
