//! Pending-call bookkeeping: request id → waiting caller.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{trace, warn};

use super::codec::Response;
use crate::error::ClientError;

type Outcome = Result<serde_json::Value, ClientError>;

/// Maps outstanding request ids to the callers suspended on them.
///
/// Ids are allocated here rather than by callers so that allocation and
/// registration happen under one lock: an id is never handed out while a
/// call with the same id is still pending, including after the counter
/// wraps around.
pub struct CorrelationTable {
    state: Arc<Mutex<TableState>>,
}

struct TableState {
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<Outcome>>,
    /// Set by [`CorrelationTable::reject_all`]; no further calls are accepted.
    closed: bool,
}

impl TableState {
    fn allocate_id(&mut self) -> u64 {
        loop {
            let id = self.next_id;
            self.next_id = if id == u64::MAX { 1 } else { id + 1 };
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn register(&mut self, table: &Arc<Mutex<TableState>>) -> PendingCall {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        PendingCall {
            id,
            rx,
            table: Arc::downgrade(table),
            settled: false,
        }
    }
}

/// The caller's side of one outstanding request.
///
/// Dropping a call before its outcome arrives (an external timeout firing,
/// a sibling failing in `try_join_all`) evicts its id from the table, so an
/// abandoned call never lingers as pending.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    table: Weak<Mutex<TableState>>,
    settled: bool,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspend until the matching response arrives or the connection is
    /// torn down.
    pub async fn wait(mut self) -> Outcome {
        let outcome = match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::ConnectionClosed),
        };
        self.settled = true;
        outcome
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Some(table) = self.table.upgrade() else {
            return;
        };
        // An empty, open receiver means our sender is still in the map under
        // this id; a delivered or dropped one means the id may already be reused.
        let mut state = table.lock();
        if matches!(self.rx.try_recv(), Err(TryRecvError::Empty)) && state.pending.remove(&self.id).is_some() {
            trace!(rpc.id = self.id, "evicted abandoned call");
        }
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(next_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                next_id: next_id.max(1),
                pending: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Allocate an id and register a pending call for it.
    pub fn register(&self) -> Result<PendingCall, ClientError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(state.register(&self.state))
    }

    /// Allocate `count` ids in order and register a pending call for each.
    pub fn register_batch(&self, count: usize) -> Result<Vec<PendingCall>, ClientError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::ConnectionClosed);
        }
        Ok((0..count).map(|_| state.register(&self.state)).collect())
    }

    /// Complete the call matching `response.id`. Unknown ids are dropped.
    ///
    /// Returns whether a pending call was found.
    pub fn resolve(&self, response: Response) -> bool {
        let mut state = self.state.lock();
        let Some(completion) = state.pending.remove(&response.id) else {
            drop(state);
            warn!(rpc.id = response.id, "dropping response with no pending call");
            return false;
        };

        // Sent under the lock: an id that has left the map never has an
        // empty, open receiver.
        if completion.send(response.outcome.map_err(ClientError::Rpc)).is_err() {
            trace!(rpc.id = response.id, "caller stopped waiting before response arrived");
        }
        true
    }

    /// Fail every outstanding call with [`ClientError::ConnectionClosed`] and
    /// refuse new registrations. Returns how many calls were rejected.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, completion) in drained {
            let _ = completion.send(Err(ClientError::ConnectionClosed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
