use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

fn text_of(v: &serde_json::Value) -> &str {
    v.get("result")
        .and_then(|r| r.get("content"))
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|x| x.get("text"))
        .and_then(|x| x.as_str())
        .expect("tool text")
}

#[test]
fn mcp_stdio_smoke() {
    // `cargo test` sets this for integration tests.
    let bin = env!("CARGO_BIN_EXE_repo-eater");

    let tmp = tempfile::TempDir::new().expect("tempdir");
    let fixture = tmp.path().join("fixture");
    std::fs::create_dir_all(fixture.join("src")).unwrap();
    std::fs::write(fixture.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    std::fs::write(fixture.join("README.md"), "# fixture\n").unwrap();
    let out_root = tmp.path().join("out");

    let mut child = Command::new(bin)
        .arg("mcp")
        .current_dir(tmp.path())
        .env("REPO_EATER_OUTPUT_DIR", &out_root)
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn repo-eater mcp");

    let fixture_str = fixture.to_string_lossy().to_string();
    let messages = vec![
        serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": { "protocolVersion": "2024-11-05" }
        }),
        // Notification: must not produce a reply.
        serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        serde_json::json!({ "jsonrpc": "2.0", "id": 3, "method": "nodes/list" }),
        serde_json::json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": { "name": "ingest_repo", "arguments": { "repo_url": fixture_str, "include_tree": true } }
        }),
        serde_json::json!({
            "jsonrpc": "2.0", "id": 5, "method": "nodes/execute",
            "params": { "class_type": "RepoEaterNode", "inputs": { "repo_url": fixture_str } }
        }),
        serde_json::json!({
            "jsonrpc": "2.0", "id": 6, "method": "nodes/isChanged",
            "params": { "class_type": "RepoEaterNode", "inputs": { "repo_url": "https://github.com/a/b" } }
        }),
        serde_json::json!({
            "jsonrpc": "2.0", "id": 7, "method": "nodes/execute",
            "params": { "class_type": "RepoEaterNode", "inputs": { "repo_url": "not a url at all" } }
        }),
    ];

    {
        let stdin = child.stdin.as_mut().expect("child stdin");
        // Keep each JSON-RPC message on one line (server reads by lines()).
        for m in &messages {
            writeln!(stdin, "{}", m).unwrap();
        }
    }

    // Close stdin so the server loop can exit.
    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let reader = BufReader::new(stdout);

    let mut replies_by_id: HashMap<i64, serde_json::Value> = HashMap::new();
    for line in reader.lines() {
        let line = line.expect("read stdout line");
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line).expect("stdout is json");
        let id = v
            .get("id")
            .and_then(|x| x.as_i64())
            .expect("json-rpc response id");
        replies_by_id.insert(id, v);
    }

    let status = child.wait().expect("wait child");
    assert!(status.success(), "mcp process should exit cleanly");
    assert_eq!(replies_by_id.len(), 7, "one reply per request, none for notifications");

    // initialize
    {
        let v = replies_by_id.get(&1).expect("initialize reply");
        assert_eq!(v.get("jsonrpc").and_then(|x| x.as_str()), Some("2.0"));
        assert!(v["result"].get("capabilities").is_some());
    }

    // tools/list
    {
        let tools = replies_by_id[&2]["result"]["tools"].as_array().expect("tools array");
        let names: std::collections::HashSet<&str> =
            tools.iter().filter_map(|t| t["name"].as_str()).collect();
        for required in ["ingest_repo", "count_tokens"] {
            assert!(names.contains(required), "missing tool: {required}");
        }
    }

    // nodes/list
    {
        let v = &replies_by_id[&3]["result"];
        assert_eq!(v["display_names"]["RepoEaterNode"], "GitHub Repo Eater");
        assert_eq!(v["nodes"][0]["output_name"][1], "token_count");
    }

    // tools/call ingest_repo
    {
        let v = &replies_by_id[&4];
        assert_eq!(v["result"]["isError"], false);
        let text = text_of(v);
        assert!(text.contains("Directory structure:"));
        assert!(text.contains("FILE: src/lib.rs"));
        assert!(text.contains("pub fn answer()"));
    }

    // nodes/execute: (content, token_count)
    {
        let outputs = replies_by_id[&5]["result"]["outputs"].as_array().expect("outputs");
        assert_eq!(outputs.len(), 2);
        let content = outputs[0].as_str().unwrap();
        assert!(content.contains("FILE: README.md"));
        let count = outputs[1].as_str().unwrap();
        assert!(count.chars().all(|c| c.is_ascii_digit() || c == ','));
        assert_ne!(count, "0");
    }

    // nodes/isChanged
    assert_eq!(replies_by_id[&6]["result"]["key"], "https://github.com/a/b");

    // Failed ingestion is content, not an RPC error.
    {
        let outputs = replies_by_id[&7]["result"]["outputs"].as_array().expect("outputs");
        assert!(outputs[0]
            .as_str()
            .unwrap()
            .starts_with("Error ingesting repository: "));
        assert_eq!(outputs[1], "0");
    }

    // Digests landed in <out>/repo_eater/ named after the last path segment.
    let written: Vec<String> = std::fs::read_dir(out_root.join("repo_eater"))
        .expect("output dir")
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert!(!written.is_empty());
    assert!(written.iter().all(|n| n.ends_with("_fixture.txt")), "{written:?}");
}
