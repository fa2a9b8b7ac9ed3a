use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::tempdir;

fn harvest_cmd(workdir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chat-harvest");
    cmd.current_dir(workdir)
        .env_remove("RUST_LOG")
        .env("HARVEST_CONFIG_PATH", workdir.join("missing-config.toml"))
        .env("HARVEST_LOG_FILE", workdir.join("harvest.log"))
        .env("HARVEST_POLL_INTERVAL_MS", "20");
    cmd
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .expect("open csv");
    reader
        .records()
        .map(|record| {
            record
                .expect("record")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect()
}

const STREAM_FIXTURE: &str = r#"{
  "duration": "0:01",
  "frames": [
    {"position": "0:00", "entries": [
      {"author": "ana", "timestamp": "1:00", "body": "hi"},
      {"author": "bo", "timestamp": "1:00", "body": "yo, \"there\""}
    ]},
    {"position": null, "entries": [
      {"author": "zed", "timestamp": "9:99", "body": "never seen"}
    ]},
    {"position": "0:01", "entries": [
      {"author": "bo", "timestamp": "1:00", "body": "yo, \"there\""},
      {"author": "cy", "timestamp": null, "body": "half rendered"},
      {"author": "cy", "timestamp": "1:01", "body": "line one\nline two"}
    ]},
    {"position": "0:01", "connection_lost": true},
    {"position": "0:02", "entries": [
      {"author": "cy", "timestamp": "1:01", "body": "line one\nline two"},
      {"author": "dee", "timestamp": "1:02", "body": "হ্যালো সবাই"}
    ]}
  ]
}"#;

#[test]
fn replay_writes_each_message_once_with_first_seen_position() {
    let tmp = tempdir().expect("tempdir");
    let fixture = tmp.path().join("stream.json");
    fs::write(&fixture, STREAM_FIXTURE).expect("write fixture");
    let output = tmp.path().join("chat.csv");

    harvest_cmd(tmp.path())
        .arg("replay")
        .arg(&fixture)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("[0:00] ana (1:00): hi"))
        .stdout(predicate::str::contains("replay: ok"))
        .stdout(predicate::str::contains("messages.accepted=4"))
        .stdout(predicate::str::contains("end_reason=duration-reached"));

    let rows = read_rows(&output);
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0], ["Video Time", "Commenter", "Time", "Comment"]);
    assert_eq!(rows[1], ["0:00", "ana", "1:00", "hi"]);
    assert_eq!(rows[2], ["0:00", "bo", "1:00", "yo, \"there\""]);
    assert_eq!(rows[3], ["0:01", "cy", "1:01", "line one\nline two"]);
    assert_eq!(rows[4], ["0:02", "dee", "1:02", "হ্যালো সবাই"]);
    assert!(!rows.iter().any(|row| row[1] == "zed"));

    assert!(!tmp.path().join("chat.csv.lock").exists());
    let log = fs::read_to_string(tmp.path().join("harvest.log")).expect("log file");
    assert!(log.contains("reattach"));
}

#[test]
fn small_batches_append_without_repeating_header() {
    let tmp = tempdir().expect("tempdir");
    let fixture = tmp.path().join("stream.json");
    fs::write(&fixture, STREAM_FIXTURE).expect("write fixture");
    let output = tmp.path().join("chat.csv");

    harvest_cmd(tmp.path())
        .env("HARVEST_BATCH_SIZE", "1")
        .arg("--json")
        .arg("replay")
        .arg(&fixture)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ok\": true"))
        .stdout(predicate::str::contains("flushes=4"));

    let raw = fs::read_to_string(&output).expect("read output");
    assert_eq!(raw.matches("Video Time,Commenter,Time,Comment").count(), 1);
    assert_eq!(read_rows(&output).len(), 5);
}

#[test]
fn missing_chat_view_is_a_setup_failure() {
    let tmp = tempdir().expect("tempdir");
    let fixture = tmp.path().join("no-chat.json");
    fs::write(&fixture, r#"{"duration": "0:05", "chat_missing": true}"#).expect("write fixture");
    let output = tmp.path().join("chat.csv");

    harvest_cmd(tmp.path())
        .arg("replay")
        .arg(&fixture)
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E001_SETUP"))
        .stderr(predicate::str::contains("could not locate messages"));

    assert!(!output.exists());
    assert!(!tmp.path().join("chat.csv.lock").exists());
}

#[test]
fn unknown_duration_falls_back_to_configured_default() {
    let tmp = tempdir().expect("tempdir");
    let fixture = tmp.path().join("no-duration.json");
    fs::write(
        &fixture,
        r#"{"frames": [{"position": "0:00", "entries": [{"author": "ana", "timestamp": "1:00", "body": "hi"}]}]}"#,
    )
    .expect("write fixture");
    let output = tmp.path().join("chat.csv");

    harvest_cmd(tmp.path())
        .env("HARVEST_DEFAULT_DURATION_SECS", "1")
        .arg("replay")
        .arg(&fixture)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("duration=0:00:01 (default)"))
        .stdout(predicate::str::contains("messages.accepted=1"));
}

#[test]
fn nothing_accepted_writes_no_file() {
    let tmp = tempdir().expect("tempdir");
    let fixture = tmp.path().join("empty.json");
    fs::write(&fixture, r#"{"duration": "0:01", "frames": []}"#).expect("write fixture");
    let output = tmp.path().join("chat.csv");

    harvest_cmd(tmp.path())
        .arg("replay")
        .arg(&fixture)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("no messages accepted"));

    assert!(!output.exists());
}

#[test]
fn held_output_lock_refuses_second_harvester() {
    let tmp = tempdir().expect("tempdir");
    let fixture = tmp.path().join("stream.json");
    fs::write(&fixture, STREAM_FIXTURE).expect("write fixture");
    let output = tmp.path().join("chat.csv");
    let lock_path = tmp.path().join("chat.csv.lock");
    let lock_file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&lock_path)
        .expect("open lock");
    fs::write(&lock_path, r#"{"pid": 4242, "build_uuid": "x", "started_at": "now"}"#)
        .expect("write lock payload");
    fs2::FileExt::lock_exclusive(&lock_file).expect("hold lock");

    harvest_cmd(tmp.path())
        .arg("replay")
        .arg(&fixture)
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("locked by another harvester (pid 4242)"));

    assert!(!output.exists());
}

#[test]
fn closed_stdout_does_not_abort_the_harvest() {
    let tmp = tempdir().expect("tempdir");
    let frames: Vec<_> = (0..3)
        .map(|frame| {
            let entries: Vec<_> = (0..50)
                .map(|i| {
                    serde_json::json!({
                        "author": format!("user{frame}-{i}"),
                        "timestamp": "1:00",
                        "body": "spam",
                    })
                })
                .collect();
            serde_json::json!({"position": format!("0:0{frame}"), "entries": entries})
        })
        .collect();
    let fixture = tmp.path().join("busy.json");
    fs::write(
        &fixture,
        serde_json::json!({"duration": "0:01", "frames": frames}).to_string(),
    )
    .expect("write fixture");
    let output = tmp.path().join("chat.csv");

    let mut child = Command::new(env!("CARGO_BIN_EXE_chat-harvest"))
        .current_dir(tmp.path())
        .env_remove("RUST_LOG")
        .env("HARVEST_CONFIG_PATH", tmp.path().join("missing-config.toml"))
        .env("HARVEST_LOG_FILE", tmp.path().join("harvest.log"))
        .env("HARVEST_POLL_INTERVAL_MS", "20")
        .arg("replay")
        .arg(&fixture)
        .arg(&output)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    drop(child.stdout.take());
    let finished = child.wait_with_output().expect("wait");

    assert_eq!(
        finished.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&finished.stderr)
    );
    assert_eq!(read_rows(&output).len(), 151);
    assert!(!tmp.path().join("chat.csv.lock").exists());
}
