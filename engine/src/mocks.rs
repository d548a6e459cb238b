//! Scripted test doubles for the ledger boundary.

use crate::ledger::Ledger;
use async_trait::async_trait;
use gridstake_client::{Error as ClientError, Result as ClientResult};
use gridstake_types::SessionRecord;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// In-memory [`Ledger`] that serves a queue of session responses, counts
/// every call, and can gate individual calls so tests control resolution
/// order.
#[derive(Clone, Default)]
pub struct MockLedger {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    current: SessionRecord,
    responses: VecDeque<SessionRecord>,
    session_gates: VecDeque<oneshot::Receiver<()>>,
    move_gates: VecDeque<oneshot::Receiver<()>>,
    move_results: VecDeque<Result<(), String>>,
    session_calls: usize,
    start_calls: usize,
    move_calls: usize,
    claim_calls: usize,
    withdraw_calls: usize,
    last_move: Option<(u8, u64)>,
}

impl MockLedger {
    pub fn new(record: SessionRecord) -> Self {
        let mock = Self::default();
        mock.inner.lock().unwrap().current = record;
        mock
    }

    /// Queue the record served by the next session fetch. The most recently
    /// served record repeats once the queue drains.
    pub fn push_response(&self, record: SessionRecord) {
        self.inner.lock().unwrap().responses.push_back(record);
    }

    /// Gate the next session fetch: it resolves only once the returned
    /// sender fires (or is dropped).
    pub fn gate_next_session(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().session_gates.push_back(rx);
        tx
    }

    /// Gate the next move submission the same way.
    pub fn gate_next_move(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().move_gates.push_back(rx);
        tx
    }

    /// Script the next move submission to be refused with `reason`.
    pub fn fail_next_move(&self, reason: &str) {
        self.inner
            .lock()
            .unwrap()
            .move_results
            .push_back(Err(reason.to_string()));
    }

    pub fn session_calls(&self) -> usize {
        self.inner.lock().unwrap().session_calls
    }

    pub fn start_calls(&self) -> usize {
        self.inner.lock().unwrap().start_calls
    }

    pub fn move_calls(&self) -> usize {
        self.inner.lock().unwrap().move_calls
    }

    pub fn claim_calls(&self) -> usize {
        self.inner.lock().unwrap().claim_calls
    }

    pub fn withdraw_calls(&self) -> usize {
        self.inner.lock().unwrap().withdraw_calls
    }

    /// Cell and budget of the most recent move submission.
    pub fn last_move(&self) -> Option<(u8, u64)> {
        self.inner.lock().unwrap().last_move
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn session(&self) -> ClientResult<Option<SessionRecord>> {
        let (gate, record) = {
            let mut inner = self.inner.lock().unwrap();
            inner.session_calls += 1;
            let record = inner.responses.pop_front().unwrap_or(inner.current);
            inner.current = record;
            (inner.session_gates.pop_front(), record)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(Some(record))
    }

    async fn start_match(&self, _stake: u64) -> ClientResult<()> {
        self.inner.lock().unwrap().start_calls += 1;
        Ok(())
    }

    async fn submit_move(&self, cell: u8, budget: u64) -> ClientResult<()> {
        let (gate, result) = {
            let mut inner = self.inner.lock().unwrap();
            inner.move_calls += 1;
            inner.last_move = Some((cell, budget));
            (
                inner.move_gates.pop_front(),
                inner.move_results.pop_front().unwrap_or(Ok(())),
            )
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result.map_err(ClientError::Rejected)
    }

    async fn claim_prize(&self) -> ClientResult<()> {
        self.inner.lock().unwrap().claim_calls += 1;
        Ok(())
    }

    async fn withdraw(&self) -> ClientResult<()> {
        self.inner.lock().unwrap().withdraw_calls += 1;
        Ok(())
    }
}
