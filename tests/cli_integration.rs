// CLI integration tests for the distgen subcommands.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_distgen");
    let mut command = Command::new(exe);
    command
        .env_remove("DISTGEN_BLOCK_SIZE")
        .env_remove("DISTGEN_QUEUE_DIR")
        .env_remove("DISTGEN_SINK_DIR")
        .env_remove("DISTGEN_SINK_URL")
        .env("RUST_LOG", "warn");
    command
}

fn run(args: &[&str]) -> Output {
    cmd().args(args).output().expect("spawn distgen")
}

fn parse_json(output: &[u8]) -> Value {
    let text = std::str::from_utf8(output).expect("utf8");
    serde_json::from_str(text.trim()).expect("valid json")
}

fn read_lines(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .expect("read output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn encode_and_decode_round_trip() {
    let encode = run(&["encode", "42", "-c", "01"]);
    assert!(encode.status.success());
    let encoded = parse_json(&encode.stdout);
    assert_eq!(encoded["value"], "101010");
    assert_eq!(encoded["keyspace_length"], 64);

    let decode = run(&["decode", "101010", "-c", "01"]);
    assert!(decode.status.success());
    assert_eq!(parse_json(&decode.stdout)["ordinal"], 42);

    let big = run(&["encode", "123456789012345678901234567890", "-c", "0123456789"]);
    let value = parse_json(&big.stdout);
    assert_eq!(value["value"], "123456789012345678901234567890");
    assert_eq!(value["ordinal"].to_string(), "123456789012345678901234567890");
}

#[test]
fn decode_rejects_foreign_symbols() {
    let decode = run(&["decode", "10201", "-c", "01"]);
    assert_eq!(decode.status.code(), Some(3));
    let err = parse_json(&decode.stderr);
    assert_eq!(err["error"]["kind"], "InvalidSymbol");
}

#[test]
fn keyspace_reports_range_and_blocks() {
    let output = run(&["keyspace", "-k", "2", "-c", "01", "-a", "md5"]);
    assert!(output.status.success());
    let summary = parse_json(&output.stdout);
    assert_eq!(summary["start"], 3);
    assert_eq!(summary["end"], 4);
    assert_eq!(summary["entries"], 1);
    assert_eq!(summary["block_size"], 1);
    assert_eq!(summary["algorithms"][0], "md5");

    let inclusive = parse_json(&run(&["keyspace", "-k", "2", "-c", "01", "-a", "md5", "-i"]).stdout);
    assert_eq!(inclusive["start"], 0);
    assert_eq!(inclusive["entries"], 4);
}

#[test]
fn configuration_errors_exit_before_work() {
    let too_long = run(&["keyspace", "-k", "9", "-a", "md5"]);
    assert_eq!(too_long.status.code(), Some(2));
    assert_eq!(parse_json(&too_long.stderr)["error"]["kind"], "Usage");

    let unknown = run(&["keyspace", "-k", "2", "-a", "nope"]);
    assert_eq!(unknown.status.code(), Some(2));
    let err = parse_json(&unknown.stderr);
    assert!(err["error"]["hint"].as_str().unwrap().contains("md5"));

    let zero_block = run(&["keyspace", "-k", "2", "-a", "md5", "-B", "0"]);
    assert_eq!(zero_block.status.code(), Some(6));

    let missing = run(&["keyspace", "-k", "2"]);
    assert_eq!(missing.status.code(), Some(2));
    assert!(parse_json(&missing.stderr)["error"]["hint"]
        .as_str()
        .unwrap()
        .contains("distgen keyspace --help"));
}

#[test]
fn local_writes_one_file_per_worker() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = temp.path().join("out");
    let output = run(&[
        "local",
        "-k",
        "3",
        "-c",
        "abc",
        "-i",
        "-s",
        "9",
        "-a",
        "md5,sha1",
        "-B",
        "9",
        "-o",
        out.to_str().unwrap(),
        "--workers",
        "2",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = parse_json(&output.stdout);
    assert_eq!(report["local"]["blocks"], 2);
    assert_eq!(report["local"]["interrupted"], false);

    let mut preimages = Vec::new();
    for worker in 0..2 {
        let path = out.join(format!("generated_keyspace_3_{worker}.json"));
        for record in read_lines(&path) {
            assert_eq!(record["md5"].as_str().unwrap().len(), 8);
            assert!(record.get("sha1").is_some());
            preimages.push(record["preimage"].as_str().unwrap().to_string());
        }
    }
    preimages.sort();
    assert_eq!(preimages.first().map(String::as_str), Some("baa"));
    assert_eq!(preimages.last().map(String::as_str), Some("ccc"));
}

#[test]
fn fill_then_work_drains_the_spool() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spool = temp.path().join("spool");
    let bucket = temp.path().join("bucket");
    let scratch = temp.path().join("scratch");

    let fill = cmd()
        .args(["fill", "-k", "4", "-c", "01", "-a", "md5", "-i", "-B", "8"])
        .env("DISTGEN_QUEUE_DIR", &spool)
        .output()
        .expect("fill");
    assert!(fill.status.success(), "{}", String::from_utf8_lossy(&fill.stderr));
    let filled = parse_json(&fill.stdout);
    assert_eq!(filled["fill"]["blocks"], 2);
    assert_eq!(filled["keyspace"]["block_size"], 8);
    assert_eq!(filled["queue_dir"], spool.display().to_string());

    let work = cmd()
        .args([
            "work",
            "-c",
            "01",
            "-a",
            "md5",
            "--sink-dir",
            bucket.to_str().unwrap(),
            "--work-dir",
            scratch.to_str().unwrap(),
            "--workers",
            "2",
            "--drain",
            "--poll-interval-ms",
            "10",
        ])
        .env("DISTGEN_QUEUE_DIR", &spool)
        .output()
        .expect("work");
    assert!(work.status.success(), "{}", String::from_utf8_lossy(&work.stderr));
    let worked = parse_json(&work.stdout);
    assert_eq!(worked["blocks_completed"], 2);
    assert_eq!(worked["blocks_failed"], 0);
    assert_eq!(worked["blocks_rejected"], 0);
    assert_eq!(worked["poll_errors"], 0);

    // encode(0) = "0" and encode(8) = "1000": the first block runs "0".."1".
    let first = read_lines(&bucket.join("generated_keyspace_0_8.json"));
    let first: Vec<&str> = first.iter().map(|r| r["preimage"].as_str().unwrap()).collect();
    assert_eq!(first, vec!["0", "1"]);
    let second = read_lines(&bucket.join("generated_keyspace_8_16.json"));
    assert_eq!(second.first().unwrap()["preimage"], "1000");
    assert_eq!(second.last().unwrap()["preimage"], "1111");
    assert_eq!(second.len(), 8);

    let leftovers = std::fs::read_dir(spool.join("ready")).unwrap().count()
        + std::fs::read_dir(spool.join("inflight")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn work_without_a_sink_is_a_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = run(&[
        "work",
        "-a",
        "md5",
        "--queue-dir",
        temp.path().to_str().unwrap(),
        "--drain",
    ]);
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert!(err["error"]["hint"].as_str().unwrap().contains("--sink-dir"));
}

#[test]
fn index_skips_undecodable_lines() {
    let temp = tempfile::tempdir().expect("tempdir");
    let wordlist = temp.path().join("words.txt");
    let index = temp.path().join("words.idx");
    std::fs::write(&wordlist, b"password\n\xff\xfe\nletmein\n").unwrap();

    let output = run(&[
        "index",
        "-w",
        wordlist.to_str().unwrap(),
        "-a",
        "md5",
        "-o",
        index.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = parse_json(&output.stdout);
    assert_eq!(report["index"]["records"], 2);
    assert_eq!(report["index"]["skipped"], 1);

    let records = read_lines(&index);
    assert_eq!(records[0]["preimage"], "password");
    assert_eq!(records[0]["md5"], "X03MO1qnZdYdgyfeuILPmQ==");

    let again = run(&[
        "index",
        "-w",
        wordlist.to_str().unwrap(),
        "-a",
        "md5",
        "-o",
        index.to_str().unwrap(),
    ]);
    assert_eq!(again.status.code(), Some(2));
}

#[test]
fn lookup_finds_preimages_in_an_index() {
    let temp = tempfile::tempdir().expect("tempdir");
    let wordlist = temp.path().join("words.txt");
    let index = temp.path().join("words.idx");
    let hashes = temp.path().join("hashes.txt");
    std::fs::write(&wordlist, "letmein\npassword\nhunter2\n").unwrap();
    let indexed = run(&[
        "index",
        "-w",
        wordlist.to_str().unwrap(),
        "-a",
        "md5,sha1",
        "-o",
        index.to_str().unwrap(),
    ]);
    assert!(indexed.status.success(), "{}", String::from_utf8_lossy(&indexed.stderr));

    // md5("password") in hex; the result carries it in base64.
    let output = run(&[
        "lookup",
        "-a",
        "md5",
        "-e",
        "hex",
        "5f4dcc3b5aa765d61d8327deb882cf99",
        "--index",
        index.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let found = parse_json(&output.stdout);
    assert_eq!(found["algorithm"], "md5");
    assert_eq!(found["results"].as_array().unwrap().len(), 1);
    assert_eq!(found["results"][0]["preimage"], "password");
    assert_eq!(found["results"][0]["hash"], "X03MO1qnZdYdgyfeuILPmQ==");
    assert_eq!(found["stats"]["rows"], 3);

    // Truncated base64 prefixes from a file; duplicates and blanks collapse.
    std::fs::write(&hashes, "X03MO1qn\n\nX03MO1qn\nAAAAAAAA\n").unwrap();
    let output = run(&[
        "lookup",
        "-a",
        "md5",
        "-f",
        hashes.to_str().unwrap(),
        "--index",
        index.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let found = parse_json(&output.stdout);
    assert_eq!(found["stats"]["queried"], 2);
    assert_eq!(found["stats"]["found"], 1);
    assert_eq!(found["results"][0]["hash"], "X03MO1qn");

    let unknown = run(&["lookup", "-a", "rot13", "AAAA", "--index", index.to_str().unwrap()]);
    assert_eq!(unknown.status.code(), Some(2));
}

#[test]
fn completion_prints_a_script() {
    let output = run(&["completion", "bash"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("distgen"));
}
