//! Append-only ballot ledger: a fixed candidate list, one vote per identity,
//! and a journal of accepted votes.

pub mod config;
pub mod envelope;
pub mod identity;
pub mod ledger;
pub mod report;
pub mod shared;
pub mod store;

pub use identity::Identity;
pub use ledger::{BallotLedger, Candidate, CandidateIndex, LedgerError, VoteCount, Voted};
