//! Signed vote requests.

use ed25519_dalek::{Signature, Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::Identity;
use crate::ledger::CandidateIndex;

const VOTE_DIGEST_TAG: &[u8] = b"ballot-ledger/vote/v1";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed signing key: {0}")]
    MalformedKey(String),
    #[error("malformed public key for voter {0}")]
    MalformedPublicKey(Identity),
    #[error("malformed signature from voter {0}")]
    MalformedSignature(Identity),
    #[error("invalid signature from voter {0}")]
    InvalidSignature(Identity),
    #[error("vote was signed for ballot {actual}, expected {expected}")]
    BallotMismatch { expected: String, actual: String },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[serde(with = "hex32")]
    pub ballot_id: [u8; 32],
    pub candidate_index: CandidateIndex,
}

impl VoteRequest {
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(VOTE_DIGEST_TAG);
        hasher.update(self.ballot_id);
        hasher.update(self.candidate_index.to_le_bytes());
        hasher.finalize().into()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedVote {
    pub request: VoteRequest,
    pub voter: Identity,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl SignedVote {
    pub fn sign(key: &SigningKey, request: VoteRequest) -> Self {
        let signature = key.sign(&request.digest());
        Self {
            request,
            voter: Identity::from(key.verifying_key()),
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Check the signature and return the authenticated voter.
    pub fn verify(&self) -> Result<Identity, EnvelopeError> {
        let key = self
            .voter
            .verifying_key()
            .map_err(|_| EnvelopeError::MalformedPublicKey(self.voter))?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| EnvelopeError::MalformedSignature(self.voter))?;
        key.verify_strict(&self.request.digest(), &signature)
            .map_err(|_| EnvelopeError::InvalidSignature(self.voter))?;
        Ok(self.voter)
    }

    pub fn verify_for(&self, ballot_id: &[u8; 32]) -> Result<Identity, EnvelopeError> {
        if &self.request.ballot_id != ballot_id {
            return Err(EnvelopeError::BallotMismatch {
                expected: hex::encode(ballot_id),
                actual: hex::encode(self.request.ballot_id),
            });
        }
        self.verify()
    }
}

pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Parse a 32-byte Ed25519 secret key given as 64 hex characters.
pub fn parse_signing_key(sk_hex: &str) -> Result<SigningKey, EnvelopeError> {
    let bytes = hex::decode(sk_hex.trim()).map_err(|e| EnvelopeError::MalformedKey(e.to_string()))?;
    let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        EnvelopeError::MalformedKey(format!("expected 32 bytes (64 hex chars), got {}", bytes.len()))
    })?;
    Ok(SigningKey::from_bytes(&arr))
}

mod hex32 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}

mod b64 {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)
    }
}
