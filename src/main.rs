use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use ballot_ledger::{
    config::{self, DeployManifest},
    envelope::{self, SignedVote, VoteRequest},
    identity::Identity,
    ledger::{BallotLedger, CandidateIndex, Voted},
    report::Results,
    store,
};

#[derive(Parser)]
#[command(name = "ballot", version, about = "Append-only ballot ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct BallotFile {
    /// Deployment record written by `ballot deploy`
    #[arg(long, short = 'b', value_name = "FILE")]
    ballot: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Create a ballot from a fixed, ordered candidate list
    Deploy {
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        /// TOML manifest with `candidates = [...]` and optional `title`
        #[arg(long, value_name = "TOML", conflicts_with = "candidate")]
        manifest: Option<PathBuf>,
        /// Candidate name, repeated in ballot order
        #[arg(long, value_name = "NAME")]
        candidate: Vec<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Generate a voter keypair (sk.hex / pk.hex)
    Keygen {
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,
    },
    /// Sign a vote request without submitting it
    SignVote {
        #[command(flatten)]
        target: BallotFile,
        #[arg(long)]
        candidate: CandidateIndex,
        /// 32-byte Ed25519 secret key as 64 hex chars
        #[arg(long, value_name = "HEX")]
        sk_hex: String,
        /// Write the request here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Submit a vote, either a pre-signed request or signed on the spot
    Vote {
        #[command(flatten)]
        target: BallotFile,
        #[arg(long, value_name = "FILE", conflicts_with_all = ["candidate", "sk_hex"])]
        request: Option<PathBuf>,
        #[arg(long, requires = "sk_hex")]
        candidate: Option<CandidateIndex>,
        #[arg(long, value_name = "HEX", requires = "candidate")]
        sk_hex: Option<String>,
    },
    /// Show one candidate as {name, voteCount}
    Candidate {
        #[command(flatten)]
        target: BallotFile,
        index: CandidateIndex,
    },
    /// Print whether an identity has voted
    HasVoted {
        #[command(flatten)]
        target: BallotFile,
        identity: Identity,
    },
    /// Print the number of candidates
    Count {
        #[command(flatten)]
        target: BallotFile,
    },
    /// Totals and percentages
    Results {
        #[command(flatten)]
        target: BallotFile,
        #[arg(long)]
        json: bool,
    },
    /// Print the vote journal as JSON lines
    Events {
        #[command(flatten)]
        target: BallotFile,
        /// First sequence number to print
        #[arg(long, default_value_t = 0)]
        since: usize,
    },
    /// Re-check ballot id, journal and tallies of a deployment record
    Verify {
        #[command(flatten)]
        target: BallotFile,
    },
}

#[derive(Serialize)]
struct JournalLine<'a> {
    seq: usize,
    #[serde(flatten)]
    event: &'a Voted,
}

//==================== deploy / keygen ====================//

fn deploy_cmd(
    out: &Path,
    manifest: Option<&Path>,
    candidates: Vec<String>,
    title: Option<String>,
) -> Result<()> {
    let (names, manifest_title) = match manifest {
        Some(path) => {
            let m: DeployManifest = config::from_toml_path(path)?;
            (m.candidates, m.title)
        }
        None => (candidates, None),
    };
    let ledger = BallotLedger::new(names).context("cannot initialize ballot")?;
    let deployment = store::deploy(out, ledger, title.or(manifest_title))?;

    println!("ballot {}", deployment.ballot_id_hex());
    println!("Deployed → {}", out.display());
    Ok(())
}

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("mkdir {}", out_dir.display()))?;

    let sk = envelope::generate_signing_key();
    let identity = Identity::from(sk.verifying_key());

    write_file(&out_dir.join("sk.hex"), hex::encode(sk.to_bytes()).as_bytes())?;
    write_file(&out_dir.join("pk.hex"), identity.to_string().as_bytes())?;
    println!("identity {identity}");
    println!("keypair written → {}", out_dir.display());
    Ok(())
}

//==================== voting ====================//

fn sign_vote_cmd(ballot: &Path, candidate: CandidateIndex, sk_hex: &str, out: Option<&Path>) -> Result<()> {
    let deployment = store::load(ballot)?;
    let sk = envelope::parse_signing_key(sk_hex)?;
    let signed = SignedVote::sign(
        &sk,
        VoteRequest {
            ballot_id: deployment.ledger.ballot_id(),
            candidate_index: candidate,
        },
    );
    let json = serde_json::to_vec_pretty(&signed)?;
    match out {
        Some(path) => {
            write_file(path, &json)?;
            println!("signed vote → {}", path.display());
        }
        None => {
            io::stdout().write_all(&json)?;
            println!();
        }
    }
    Ok(())
}

fn vote_cmd(
    ballot: &Path,
    request: Option<&Path>,
    candidate: Option<CandidateIndex>,
    sk_hex: Option<&str>,
) -> Result<()> {
    let signed = match (request, candidate, sk_hex) {
        (Some(path), _, _) => {
            let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            serde_json::from_slice::<SignedVote>(&bytes)
                .with_context(|| format!("parse vote request {}", path.display()))?
        }
        (None, Some(index), Some(sk_hex)) => {
            let sk = envelope::parse_signing_key(sk_hex)?;
            let ballot_id = store::load(ballot)?.ledger.ballot_id();
            SignedVote::sign(
                &sk,
                VoteRequest {
                    ballot_id,
                    candidate_index: index,
                },
            )
        }
        _ => bail!("either --request or both --candidate and --sk-hex are required"),
    };

    let event = store::update(ballot, |deployment| -> Result<Voted> {
        let voter = signed.verify_for(&deployment.ledger.ballot_id())?;
        Ok(deployment.ledger.vote(signed.request.candidate_index, voter)?)
    })?;

    info!(ballot = %ballot.display(), "vote recorded");
    println!("{}", serde_json::to_string(&event)?);
    Ok(())
}

//==================== queries ====================//

fn candidate_cmd(ballot: &Path, index: CandidateIndex) -> Result<()> {
    let candidate = store::load(ballot)?.ledger.candidate(index)?;
    println!("{}", serde_json::to_string(&candidate)?);
    Ok(())
}

fn has_voted_cmd(ballot: &Path, identity: &Identity) -> Result<()> {
    println!("{}", store::load(ballot)?.ledger.has_voted(identity));
    Ok(())
}

fn count_cmd(ballot: &Path) -> Result<()> {
    println!("{}", store::load(ballot)?.ledger.candidate_count());
    Ok(())
}

fn results_cmd(ballot: &Path, json: bool) -> Result<()> {
    let deployment = store::load(ballot)?;
    let results = Results::from_ledger(&deployment.ledger, deployment.title.clone());
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("{results}");
    }
    Ok(())
}

fn events_cmd(ballot: &Path, since: usize) -> Result<()> {
    let deployment = store::load(ballot)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (offset, event) in deployment.ledger.events_since(since).iter().enumerate() {
        let line = JournalLine {
            seq: since + offset,
            event,
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    }
    Ok(())
}

fn verify_cmd(ballot: &Path) -> Result<()> {
    let deployment = store::load(ballot)?;
    let ledger = &deployment.ledger;
    println!(
        "verify: OK (ballot id, journal & tallies match; {} votes from {} voters)",
        ledger.total_votes(),
        ledger.voter_count()
    );
    println!("tally root {}", hex::encode(ledger.tally_root()));
    Ok(())
}

//==================== helpers ====================//

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();
}

//==================== main ====================//

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Deploy {
            out,
            manifest,
            candidate,
            title,
        } => deploy_cmd(&out, manifest.as_deref(), candidate, title),
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::SignVote {
            target,
            candidate,
            sk_hex,
            out,
        } => sign_vote_cmd(&target.ballot, candidate, &sk_hex, out.as_deref()),
        Command::Vote {
            target,
            request,
            candidate,
            sk_hex,
        } => vote_cmd(&target.ballot, request.as_deref(), candidate, sk_hex.as_deref()),
        Command::Candidate { target, index } => candidate_cmd(&target.ballot, index),
        Command::HasVoted { target, identity } => has_voted_cmd(&target.ballot, &identity),
        Command::Count { target } => count_cmd(&target.ballot),
        Command::Results { target, json } => results_cmd(&target.ballot, json),
        Command::Events { target, since } => events_cmd(&target.ballot, since),
        Command::Verify { target } => verify_cmd(&target.ballot),
    }
}
