use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::{BallotLedger, LedgerError, LedgerSnapshot};

pub const RECORD_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed deployment record {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "ballot {} is locked by another process; if no other `ballot` process is running, remove {}",
        .path.display(),
        .lock.display()
    )]
    Busy { path: PathBuf, lock: PathBuf },
    #[error("refusing to overwrite existing ballot {}", .0.display())]
    AlreadyDeployed(PathBuf),
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
    #[error("recorded ballot id {recorded} does not match candidates (computed {computed})")]
    BallotIdMismatch { recorded: String, computed: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct DeploymentRecord {
    version: u8,
    ballot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(rename = "deployed_at")]
    deployed_unix_ms: u64,
    ledger: LedgerSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub title: Option<String>,
    pub deployed_unix_ms: u64,
    pub ledger: BallotLedger,
}

impl Deployment {
    pub fn ballot_id_hex(&self) -> String {
        self.ledger.ballot_id_hex()
    }

    fn to_record(&self) -> DeploymentRecord {
        DeploymentRecord {
            version: RECORD_VERSION,
            ballot_id: self.ballot_id_hex(),
            title: self.title.clone(),
            deployed_unix_ms: self.deployed_unix_ms,
            ledger: self.ledger.snapshot(),
        }
    }

    fn from_record(record: DeploymentRecord) -> Result<Self, StoreError> {
        if record.version != RECORD_VERSION {
            return Err(StoreError::UnsupportedVersion(record.version));
        }
        let ledger = BallotLedger::restore(record.ledger)?;
        let computed = ledger.ballot_id_hex();
        if computed != record.ballot_id {
            return Err(StoreError::BallotIdMismatch {
                recorded: record.ballot_id,
                computed,
            });
        }
        Ok(Self {
            title: record.title,
            deployed_unix_ms: record.deployed_unix_ms,
            ledger,
        })
    }
}

/// Persist a freshly initialized ledger. Fails if `path` already exists.
pub fn deploy(path: &Path, ledger: BallotLedger, title: Option<String>) -> Result<Deployment, StoreError> {
    let _lock = LockFile::acquire(path)?;
    if path.exists() {
        return Err(StoreError::AlreadyDeployed(path.to_path_buf()));
    }
    let deployment = Deployment {
        title,
        deployed_unix_ms: now_ms(),
        ledger,
    };
    save(path, &deployment)?;
    info!(
        path = %path.display(),
        ballot = %deployment.ballot_id_hex(),
        candidates = deployment.ledger.candidate_count(),
        "ballot deployed"
    );
    Ok(deployment)
}

pub fn load(path: &Path) -> Result<Deployment, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let record: DeploymentRecord = serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let deployment = Deployment::from_record(record)?;
    debug!(path = %path.display(), votes = deployment.ledger.total_votes(), "ballot loaded");
    Ok(deployment)
}

/// Load, apply `f`, and save only if `f` succeeds.
pub fn update<R, E>(path: &Path, f: impl FnOnce(&mut Deployment) -> Result<R, E>) -> Result<R, E>
where
    E: From<StoreError>,
{
    let _lock = LockFile::acquire(path)?;
    let mut deployment = load(path)?;
    let out = f(&mut deployment)?;
    save(path, &deployment)?;
    Ok(out)
}

fn save(path: &Path, deployment: &Deployment) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(&deployment.to_record()).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = sibling(path, "tmp");
    let io_err = |source: std::io::Error| StoreError::Io {
        path: tmp.clone(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut f = fs::File::create(&tmp).map_err(io_err)?;
    f.write_all(&json).map_err(io_err)?;
    f.sync_all().map_err(io_err)?;
    drop(f);
    fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Exclusive `<file>.lock`, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(target: &Path) -> Result<Self, StoreError> {
        let path = sibling(target, "lock");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(lock = %path.display(), "ballot is locked");
                Err(StoreError::Busy {
                    path: target.to_path_buf(),
                    lock: path,
                })
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
