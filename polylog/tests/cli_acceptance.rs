use serde_json::{json, Value};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const CODEX_ID: &str = "019ab86e-1e83-75b0-b2d7-d335492e7026";

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        seed_claude_fixture(&home);
        seed_codex_fixture(&home);

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }
}

fn write_jsonl(path: &Path, records: &[Value]) {
    fs::create_dir_all(path.parent().expect("missing fixture parent"))
        .expect("failed to create fixture directories");
    let lines: Vec<String> = records.iter().map(Value::to_string).collect();
    fs::write(path, lines.join("\n")).expect("failed to write fixture");
}

fn seed_claude_fixture(home: &Path) {
    let project = home.join(".claude/projects/-w-site");
    write_jsonl(
        &project.join("sess-1.jsonl"),
        &[
            json!({"type": "user", "uuid": "u1", "timestamp": "2025-11-24T10:00:00Z", "cwd": "/w/site", "slug": "amber-lynx", "message": {"role": "user", "content": "tidy the footer"}}),
            json!({"type": "assistant", "uuid": "a1", "timestamp": "2025-11-24T10:00:03Z", "cwd": "/w/site", "message": {"id": "msg_1", "model": "claude-sonnet-4", "content": [
                {"type": "thinking", "thinking": "find it"},
                {"type": "tool_use", "id": "toolu_1", "name": "Task", "input": {"prompt": "find footer"}},
                {"type": "text", "text": "Found it."}
            ]}}),
            json!({"type": "user", "uuid": "u2", "timestamp": "2025-11-24T10:00:09Z", "cwd": "/w/site", "toolUseResult": {"agentId": "f00d"}, "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "footer.html"}
            ]}}),
        ],
    );
    write_jsonl(
        &project.join("sess-1/subagents/agent-f00d.jsonl"),
        &[json!({"type": "user", "uuid": "s1", "isSidechain": true, "timestamp": "2025-11-24T10:00:04Z", "message": {"role": "user", "content": "find footer"}})],
    );
}

fn seed_codex_fixture(home: &Path) {
    let target = home
        .join(".codex/sessions/2025/11/25")
        .join(format!("rollout-2025-11-25T00-33-35-{}.jsonl", CODEX_ID));
    write_jsonl(
        &target,
        &[
            json!({"timestamp": "2025-11-25T00:33:35Z", "type": "session_meta", "payload": {"id": CODEX_ID, "timestamp": "2025-11-25T00:33:35Z", "cwd": "/w/site", "model_provider": "openai"}}),
            json!({"timestamp": "2025-11-25T00:33:36Z", "type": "event_msg", "payload": {"type": "user_message", "message": "run lint"}}),
            json!({"timestamp": "2025-11-25T00:33:40Z", "type": "response_item", "payload": {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "Lint is clean."}]}}),
        ],
    );
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("polylog"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute polylog: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "polylog {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_json(env: &CliTestEnv, args: &[&str]) -> Value {
    let output = run_bin(env, args);
    assert_success(args, &output);
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn projects_are_merged_across_sources() {
    let env = CliTestEnv::new();

    let projects = run_json(&env, &["projects"]);
    let projects = projects.as_array().expect("projects array");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["encodedPath"], "-w-site");
    assert_eq!(projects[0]["displayName"], "site");
    assert_eq!(projects[0]["sessionCount"], 2);
    assert_eq!(projects[0]["sources"].as_array().unwrap().len(), 2);

    assert!(
        env.xdg_state.join("polylog").exists(),
        "log directory should be created under XDG_STATE_HOME"
    );
}

#[test]
fn sessions_carry_composite_ids_and_resume_commands() {
    let env = CliTestEnv::new();

    let sessions = run_json(&env, &["sessions", "-w-site"]);
    let sessions = sessions.as_array().expect("sessions array");
    assert_eq!(sessions.len(), 2);

    assert_eq!(sessions[0]["sessionId"], format!("codex::{}", CODEX_ID));
    assert_eq!(sessions[0]["firstMessage"], "run lint");
    assert_eq!(sessions[0]["resumeCommand"], format!("codex resume {}", CODEX_ID));
    assert_eq!(sessions[0]["badges"][0]["label"], "openai");

    assert_eq!(sessions[1]["sessionId"], "claude-code::sess-1");
    assert_eq!(sessions[1]["pluginId"], "claude-code");
    assert_eq!(sessions[1]["resumeCommand"], "claude --resume sess-1");
}

#[test]
fn show_groups_assistant_blocks_and_links_subagents() {
    let env = CliTestEnv::new();

    let args = ["show", "-w-site", "claude-code::sess-1", "--grouped"];
    let shown = run_json(&env, &args);
    let turns = shown["session"]["turns"].as_array().expect("turns array");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1]["type"], "assistant");

    let call = &turns[1]["contentBlocks"][1]["call"];
    assert_eq!(call["result"], "footer.html");
    assert_eq!(call["subAgentId"], "f00d");

    let steps = shown["steps"]["a1"].as_array().expect("steps for a1");
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].as_array().unwrap().len(), 2);

    let agent = run_json(&env, &["subagent", "-w-site", "sess-1", "f00d"]);
    assert_eq!(agent["sessionId"], "f00d");
    assert_eq!(agent["turns"][0]["text"], "find footer");
}

#[test]
fn unknown_project_fails() {
    let env = CliTestEnv::new();

    let output = run_bin(&env, &["sessions", "-nowhere"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("project not found"), "stderr was:\n{stderr}");
}
