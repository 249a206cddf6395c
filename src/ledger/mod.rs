use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::identity::Identity;

pub type CandidateIndex = u32;
pub type VoteCount = u64;

const BALLOT_ID_TAG: &[u8] = b"ballot-ledger/id/v1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("candidate list is empty")]
    NoCandidates,
    #[error("candidate name at index {index} is empty")]
    EmptyName { index: usize },
    #[error("duplicate candidate name {name:?}")]
    DuplicateName { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid candidate list: {0}")]
    Initialization(#[from] InitError),
    #[error("You have already voted")]
    AlreadyVoted { voter: Identity },
    #[error("invalid candidate index {index} (ballot has {count} candidates)")]
    InvalidCandidate { index: CandidateIndex, count: usize },
    #[error("ledger snapshot is inconsistent: {0}")]
    Corrupt(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub name: String,
    pub vote_count: VoteCount,
}

/// Emitted once per accepted vote. Its position in the journal is its sequence number.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Voted {
    pub candidate_index: CandidateIndex,
    pub voter: Identity,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub candidates: Vec<Candidate>,
    pub voters: Vec<Identity>,
    pub events: Vec<Voted>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BallotLedger {
    candidates: Vec<Candidate>,
    voters: BTreeSet<Identity>,
    events: Vec<Voted>,
}

impl BallotLedger {
    /// Names are trimmed; empty and duplicate names are rejected.
    pub fn new<I, S>(names: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = validate_names(names.into_iter().map(|name| -> String { name.into() }))?;
        let candidates = names
            .into_iter()
            .map(|name| Candidate {
                name,
                vote_count: 0,
            })
            .collect::<Vec<_>>();
        debug!(candidates = candidates.len(), "ballot ledger initialized");
        Ok(Self {
            candidates,
            voters: BTreeSet::new(),
            events: Vec::new(),
        })
    }

    /// `AlreadyVoted` wins over an out-of-range index.
    pub fn vote(&mut self, index: CandidateIndex, voter: Identity) -> Result<Voted, LedgerError> {
        if self.voters.contains(&voter) {
            debug!(voter = %voter.short(), "rejected repeat vote");
            return Err(LedgerError::AlreadyVoted { voter });
        }
        let count = self.candidates.len();
        let candidate = self
            .candidates
            .get_mut(index as usize)
            .ok_or_else(|| {
                debug!(index, count, "rejected vote for unknown candidate");
                LedgerError::InvalidCandidate { index, count }
            })?;

        candidate.vote_count += 1;
        self.voters.insert(voter);
        let event = Voted {
            candidate_index: index,
            voter,
        };
        self.events.push(event);
        info!(
            candidate = index,
            voter = %voter.short(),
            seq = self.events.len() - 1,
            "vote accepted"
        );
        Ok(event)
    }

    pub fn candidate(&self, index: CandidateIndex) -> Result<Candidate, LedgerError> {
        self.candidates
            .get(index as usize)
            .cloned()
            .ok_or(LedgerError::InvalidCandidate {
                index,
                count: self.candidates.len(),
            })
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn has_voted(&self, voter: &Identity) -> bool {
        self.voters.contains(voter)
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    pub fn total_votes(&self) -> VoteCount {
        self.candidates.iter().map(|c| c.vote_count).sum()
    }

    pub fn events(&self) -> &[Voted] {
        &self.events
    }

    pub fn events_since(&self, cursor: usize) -> &[Voted] {
        self.events.get(cursor..).unwrap_or(&[])
    }

    /// Stable handle of this ballot: a digest of its ordered candidate names.
    pub fn ballot_id(&self) -> [u8; 32] {
        ballot_id_for(self.candidates.iter().map(|c| c.name.as_str()))
    }

    pub fn ballot_id_hex(&self) -> String {
        hex::encode(self.ballot_id())
    }

    pub fn tally_root(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(self.candidates.len() + self.voters.len());
        for (index, candidate) in self.candidates.iter().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(b"cand");
            hasher.update((index as u64).to_le_bytes());
            hasher.update((candidate.name.len() as u64).to_le_bytes());
            hasher.update(candidate.name.as_bytes());
            hasher.update(candidate.vote_count.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for voter in &self.voters {
            let mut hasher = Sha256::new();
            hasher.update(b"voter");
            hasher.update(voter.as_bytes());
            leaves.push(hasher.finalize().into());
        }
        build_merkle(leaves)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            candidates: self.candidates.clone(),
            voters: self.voters.iter().copied().collect(),
            events: self.events.clone(),
        }
    }

    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let LedgerSnapshot {
            candidates,
            voters,
            events,
        } = snapshot;

        let names = validate_names(candidates.iter().map(|c| c.name.clone()))
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        if names.iter().zip(&candidates).any(|(n, c)| *n != c.name) {
            return Err(LedgerError::Corrupt("candidate names are not normalized".into()));
        }

        let mut tallies: BTreeMap<usize, VoteCount> = BTreeMap::new();
        let mut journal_voters = BTreeSet::new();
        for (seq, event) in events.iter().enumerate() {
            let index = event.candidate_index as usize;
            if index >= candidates.len() {
                return Err(LedgerError::Corrupt(format!(
                    "event {seq} references unknown candidate {index}"
                )));
            }
            if !journal_voters.insert(event.voter) {
                return Err(LedgerError::Corrupt(format!(
                    "event {seq} repeats voter {}",
                    event.voter
                )));
            }
            *tallies.entry(index).or_default() += 1;
        }

        let voter_set: BTreeSet<Identity> = voters.iter().copied().collect();
        if voter_set.len() != voters.len() {
            return Err(LedgerError::Corrupt("voter record has duplicates".into()));
        }
        if voter_set != journal_voters {
            return Err(LedgerError::Corrupt(
                "voter record does not match event journal".into(),
            ));
        }
        for (index, candidate) in candidates.iter().enumerate() {
            let expected = tallies.get(&index).copied().unwrap_or(0);
            if candidate.vote_count != expected {
                return Err(LedgerError::Corrupt(format!(
                    "candidate {index} tally {} does not match {expected} journaled votes",
                    candidate.vote_count
                )));
            }
        }

        Ok(Self {
            candidates,
            voters: voter_set,
            events,
        })
    }
}

/// Ballot id for an ordered list of (already normalized) candidate names.
pub fn ballot_id_for<'a>(names: impl IntoIterator<Item = &'a str>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(BALLOT_ID_TAG);
    for name in names {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
    }
    hasher.finalize().into()
}

fn validate_names(names: impl Iterator<Item = String>) -> Result<Vec<String>, InitError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for (index, raw) in names.enumerate() {
        let name = raw.trim().to_string();
        if name.is_empty() {
            return Err(InitError::EmptyName { index });
        }
        if !seen.insert(name.clone()) {
            return Err(InitError::DuplicateName { name });
        }
        out.push(name);
    }
    if out.is_empty() {
        return Err(InitError::NoCandidates);
    }
    Ok(out)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"ballot-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
