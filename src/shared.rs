//! Thread-safe handle over a [`BallotLedger`].

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::identity::Identity;
use crate::ledger::{BallotLedger, Candidate, CandidateIndex, LedgerError, LedgerSnapshot, Voted};

#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<Inner>,
}

struct Inner {
    ledger: RwLock<BallotLedger>,
    subscribers: Mutex<Vec<Sender<Voted>>>,
}

impl SharedLedger {
    pub fn new(ledger: BallotLedger) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: RwLock::new(ledger),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn vote(&self, index: CandidateIndex, voter: Identity) -> Result<Voted, LedgerError> {
        let mut ledger = self.write();
        let event = ledger.vote(index, voter)?;
        self.notify(event);
        drop(ledger);
        Ok(event)
    }

    pub fn candidate(&self, index: CandidateIndex) -> Result<Candidate, LedgerError> {
        self.read().candidate(index)
    }

    pub fn candidate_count(&self) -> usize {
        self.read().candidate_count()
    }

    pub fn has_voted(&self, voter: &Identity) -> bool {
        self.read().has_voted(voter)
    }

    pub fn events_since(&self, cursor: usize) -> Vec<Voted> {
        self.read().events_since(cursor).to_vec()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read().snapshot()
    }

    pub fn with_ledger<R>(&self, f: impl FnOnce(&BallotLedger) -> R) -> R {
        let ledger = self.read();
        f(&*ledger)
    }

    /// Receive every vote accepted after this call.
    pub fn subscribe(&self) -> Receiver<Voted> {
        let (tx, rx) = mpsc::channel();
        self.subscribers().push(tx);
        rx
    }

    fn notify(&self, event: Voted) {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event).is_ok());
        if subscribers.len() != before {
            debug!(dropped = before - subscribers.len(), "pruned closed subscribers");
        }
    }

    // `BallotLedger::vote` commits only after every check passes, so a
    // poisoned lock still guards a consistent ledger.
    fn read(&self) -> RwLockReadGuard<'_, BallotLedger> {
        self.inner.ledger.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BallotLedger> {
        self.inner.ledger.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Voted>>> {
        self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
