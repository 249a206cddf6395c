use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use ballot_ledger::Identity;
use ed25519_dalek::SigningKey;
use serde_json::{json, Value};

fn ballot(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ballot"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout_of(out: &Output) -> String {
    assert!(
        out.status.success(),
        "exit {:?}, stderr: {}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout.clone()).unwrap()
}

fn key(seed: u8) -> (String, Identity) {
    let sk = SigningKey::from_bytes(&[seed; 32]);
    (hex::encode(sk.to_bytes()), Identity::from(sk.verifying_key()))
}

fn deploy_three(cwd: &Path) {
    stdout_of(&ballot(
        &[
            "deploy", "--out", "b.json", "--candidate", "Alice", "--candidate", "Bob", "--candidate", "Charlie",
        ],
        cwd,
    ));
}

#[test]
fn deploy_vote_repeat_events_results() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    deploy_three(cwd);
    let (sk, voter) = key(1);

    let out = stdout_of(&ballot(
        &["vote", "-b", "b.json", "--candidate", "1", "--sk-hex", sk.as_str()],
        cwd,
    ));
    let event: Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(event, json!({ "candidateIndex": 1, "voter": voter.to_string() }));

    let repeat = ballot(&["vote", "-b", "b.json", "--candidate", "0", "--sk-hex", sk.as_str()], cwd);
    assert!(!repeat.status.success());
    assert!(String::from_utf8_lossy(&repeat.stderr).contains("You have already voted"));

    let out = stdout_of(&ballot(&["events", "-b", "b.json", "--since", "0"], cwd));
    let lines: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(
        lines,
        vec![json!({ "seq": 0, "candidateIndex": 1, "voter": voter.to_string() })]
    );
    let out = stdout_of(&ballot(&["events", "-b", "b.json", "--since", "1"], cwd));
    assert!(out.trim().is_empty());

    let out = stdout_of(&ballot(&["results", "-b", "b.json", "--json"], cwd));
    let results: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(results["total_votes"], json!(1));
    assert_eq!(results["leaders"], json!([1]));
    assert_eq!(results["rows"][1]["votes"], json!(1));
    assert_eq!(results["rows"][1]["percent"], json!(100.0));
    assert_eq!(results["rows"][0]["votes"], json!(0));

    let out = stdout_of(&ballot(&["candidate", "-b", "b.json", "1"], cwd));
    let candidate: Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(candidate, json!({ "name": "Bob", "voteCount": 1 }));

    let out = stdout_of(&ballot(&["has-voted", "-b", "b.json", voter.to_string().as_str()], cwd));
    assert_eq!(out.trim(), "true");
    let (_, stranger) = key(2);
    let out = stdout_of(&ballot(&["has-voted", "-b", "b.json", stranger.to_string().as_str()], cwd));
    assert_eq!(out.trim(), "false");

    let out = stdout_of(&ballot(&["count", "-b", "b.json"], cwd));
    assert_eq!(out.trim(), "3");
    stdout_of(&ballot(&["verify", "-b", "b.json"], cwd));
}

#[test]
fn presigned_request_is_accepted_once() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    deploy_three(cwd);
    let (sk, voter) = key(3);

    stdout_of(&ballot(
        &["sign-vote", "-b", "b.json", "--candidate", "2", "--sk-hex", sk.as_str(), "--out", "v.json"],
        cwd,
    ));
    let out = stdout_of(&ballot(&["vote", "-b", "b.json", "--request", "v.json"], cwd));
    let event: Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(event, json!({ "candidateIndex": 2, "voter": voter.to_string() }));

    let replay = ballot(&["vote", "-b", "b.json", "--request", "v.json"], cwd);
    assert!(!replay.status.success());
    assert!(String::from_utf8_lossy(&replay.stderr).contains("You have already voted"));
}

#[test]
fn request_for_another_ballot_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    deploy_three(cwd);
    stdout_of(&ballot(
        &["deploy", "--out", "other.json", "--candidate", "Dave", "--candidate", "Eve"],
        cwd,
    ));
    let (sk, _) = key(4);

    stdout_of(&ballot(
        &["sign-vote", "-b", "other.json", "--candidate", "0", "--sk-hex", sk.as_str(), "--out", "v.json"],
        cwd,
    ));
    let out = ballot(&["vote", "-b", "b.json", "--request", "v.json"], cwd);
    assert!(!out.status.success());
    let out = stdout_of(&ballot(&["events", "-b", "b.json"], cwd));
    assert!(out.trim().is_empty());
}

#[test]
fn out_of_range_vote_fails_and_leaves_voter_unmarked() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    deploy_three(cwd);
    let (sk, voter) = key(5);

    let out = ballot(&["vote", "-b", "b.json", "--candidate", "3", "--sk-hex", sk.as_str()], cwd);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid candidate index"));

    let out = stdout_of(&ballot(&["has-voted", "-b", "b.json", voter.to_string().as_str()], cwd));
    assert_eq!(out.trim(), "false");
}

#[test]
fn manifest_deploy_and_title_override() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    fs::write(
        cwd.join("m.toml"),
        "title = \"Board 2024\"\ncandidates = [\"Alice\", \"Bob\"]\n",
    )
    .unwrap();

    stdout_of(&ballot(&["deploy", "--out", "a.json", "--manifest", "m.toml"], cwd));
    let out = stdout_of(&ballot(&["results", "-b", "a.json", "--json"], cwd));
    let results: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(results["title"], json!("Board 2024"));
    assert_eq!(results["rows"][1]["name"], json!("Bob"));

    stdout_of(&ballot(
        &["deploy", "--out", "b.json", "--manifest", "m.toml", "--title", "Override"],
        cwd,
    ));
    let out = stdout_of(&ballot(&["results", "-b", "b.json", "--json"], cwd));
    let results: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(results["title"], json!("Override"));
}

#[test]
fn deploy_refuses_existing_file_and_bad_lists() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    deploy_three(cwd);
    let again = ballot(&["deploy", "--out", "b.json", "--candidate", "Mallory"], cwd);
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("refusing to overwrite"));

    let dup = ballot(
        &["deploy", "--out", "c.json", "--candidate", "Alice", "--candidate", "Alice"],
        cwd,
    );
    assert!(!dup.status.success());
    assert!(!cwd.join("c.json").exists());
}

#[test]
fn keygen_writes_a_usable_keypair() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    deploy_three(cwd);
    stdout_of(&ballot(&["keygen", "--out-dir", "keys"], cwd));
    let sk = fs::read_to_string(cwd.join("keys/sk.hex")).unwrap();
    let pk = fs::read_to_string(cwd.join("keys/pk.hex")).unwrap();
    assert_eq!(sk.trim().len(), 64);
    assert!(pk.trim().parse::<Identity>().is_ok());

    stdout_of(&ballot(
        &["vote", "-b", "b.json", "--candidate", "0", "--sk-hex", sk.trim()],
        cwd,
    ));
    let out = stdout_of(&ballot(&["has-voted", "-b", "b.json", pk.trim()], cwd));
    assert_eq!(out.trim(), "true");
}

#[test]
fn stale_lock_is_reported_with_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path();
    deploy_three(cwd);
    fs::write(cwd.join("b.json.lock"), b"").unwrap();
    let (sk, _) = key(6);

    let out = ballot(&["vote", "-b", "b.json", "--candidate", "0", "--sk-hex", sk.as_str()], cwd);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("b.json.lock"), "{stderr}");

    fs::remove_file(cwd.join("b.json.lock")).unwrap();
    stdout_of(&ballot(&["vote", "-b", "b.json", "--candidate", "0", "--sk-hex", sk.as_str()], cwd));
}
