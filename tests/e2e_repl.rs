#![cfg(unix)]

use expectrl::{Eof, Error as ExpectError, Session};
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path as path_matcher};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXPECT_TIMEOUT: Duration = Duration::from_secs(4);
const EXPECT_RETRIES: usize = 3;

const REPORT_ROUTES: [(&str, &str, &str); 3] = [
    ("September 2024", "/reports/psla0924.txt", "T1"),
    ("August 2024", "/reports/psla0824.txt", "T2"),
    ("September 2023", "/reports/psla0923.txt", "T3"),
];

#[test]
#[serial]
fn streamed_answer_is_rendered_recorded_and_traced() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        mount_reports(&server).await;
        Mock::given(method("POST"))
            .and(path_matcher("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(sse_response(&["Prices ", "rose ", "3%."]))
            .expect(1)
            .mount(&server)
            .await;
    });

    let (mut session, dirs) = spawn_app(&server);
    expect_text(&mut session, "loaded 3 USDA reports");
    expect_text(&mut session, "ask> ");

    submit_line(&mut session, "What is the price trend?");
    expect_text(&mut session, "Prices rose 3%.");
    expect_text(&mut session, "ask> ");

    submit_line(&mut session, "/history");
    expect_text(&mut session, "you: What is the price trend?");
    expect_text(&mut session, "assistant: Prices rose 3%.");

    submit_line(&mut session, "/sources");
    expect_text(&mut session, "3. September 2023: http://");

    exit_repl(&mut session);
    let content = dirs.read_trace_file();
    assert!(
        content.contains("What is the price trend?"),
        "trace content:\n{content}"
    );
    assert!(
        content.contains("Prices rose 3%."),
        "trace content:\n{content}"
    );
}

#[test]
#[serial]
fn provider_failure_is_shown_then_next_question_recovers() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        mount_reports(&server).await;
        Mock::given(method("POST"))
            .and(path_matcher("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("provider down"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_matcher("/v1/chat/completions"))
            .respond_with(sse_response(&["Recovered ", "answer"]))
            .expect(1)
            .mount(&server)
            .await;
    });

    let (mut session, dirs) = spawn_app(&server);
    expect_text(&mut session, "ask> ");

    submit_line(&mut session, "first question");
    expect_text(
        &mut session,
        "An error occurred while generating the response: provider request failed with status 500",
    );
    expect_text(&mut session, "ask> ");

    submit_line(&mut session, "second question");
    expect_text(&mut session, "Recovered answer");
    expect_text(&mut session, "ask> ");

    submit_line(&mut session, "/history");
    expect_text(
        &mut session,
        "assistant: An error occurred while generating the response",
    );

    exit_repl(&mut session);
    let content = dirs.read_trace_file();
    assert!(
        content.contains("provider request failed with status 500"),
        "trace content:\n{content}"
    );
    assert!(
        content.contains("Recovered answer"),
        "trace content:\n{content}"
    );
}

#[test]
#[serial]
fn unknown_commands_and_blank_lines_do_not_reach_the_model() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let server = rt.block_on(MockServer::start());
    rt.block_on(async {
        mount_reports(&server).await;
        Mock::given(method("POST"))
            .and(path_matcher("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
    });

    let (mut session, _dirs) = spawn_app(&server);
    expect_text(&mut session, "ask> ");

    submit_line(&mut session, "   ");
    submit_line(&mut session, "/bogus");
    expect_text(&mut session, "unknown command '/bogus'. Try /help");

    submit_line(&mut session, "/help");
    expect_text(&mut session, "/history [n]");

    submit_line(&mut session, "/trace");
    expect_text(&mut session, "session-");

    exit_repl(&mut session);
}

fn sse_response(fragments: &[&str]) -> ResponseTemplate {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = serde_json::json!({"choices": [{"delta": {"content": fragment}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

async fn mount_reports(server: &MockServer) {
    for (_, route, body) in REPORT_ROUTES {
        Mock::given(method("GET"))
            .and(path_matcher(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(server)
            .await;
    }
}

struct TestDirs {
    _config_home: TempDir,
    state_home: TempDir,
    _work_dir: TempDir,
}

impl TestDirs {
    fn read_trace_file(&self) -> String {
        let trace_dir = self.state_home.path().join("alphanode").join("traces");
        let entries = fs::read_dir(&trace_dir)
            .unwrap_or_else(|err| panic!("failed to read {}: {err}", trace_dir.display()))
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|err| panic!("failed to iterate {}: {err}", trace_dir.display()));
        assert_eq!(
            entries.len(),
            1,
            "expected exactly one trace file in {}",
            trace_dir.display()
        );
        let path = entries[0].path();
        fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()))
    }
}

fn spawn_app(server: &MockServer) -> (Session, TestDirs) {
    let config_home = tempfile::tempdir().expect("create XDG_CONFIG_HOME tempdir");
    let state_home = tempfile::tempdir().expect("create XDG_STATE_HOME tempdir");
    let work_dir = tempfile::tempdir().expect("work tempdir");
    let cfg_path = write_test_config(work_dir.path(), &server.uri());

    let mut command = Command::new(binary_path());
    command
        .arg("--config")
        .arg(&cfg_path)
        .current_dir(work_dir.path())
        .env("XDG_CONFIG_HOME", config_home.path())
        .env("XDG_STATE_HOME", state_home.path())
        .env("OPENAI_API_KEY", "test-key")
        .env("OPENAI_MODEL", "gpt-test")
        .env("OPENAI_BASE_URL", server.uri());

    let mut session = Session::spawn(command).expect("spawn alphanode in PTY");
    session.set_expect_timeout(Some(EXPECT_TIMEOUT));

    (
        session,
        TestDirs {
            _config_home: config_home,
            state_home,
            _work_dir: work_dir,
        },
    )
}

fn write_test_config(dir: &Path, base_url: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let mut content = String::new();
    for (label, route, _) in REPORT_ROUTES {
        content.push_str(&format!(
            "[[reports]]\nlabel = \"{label}\"\nurl = \"{base_url}{route}\"\n\n"
        ));
    }
    fs::write(&path, content).expect("write test config");
    path
}

fn binary_path() -> String {
    std::env::var("CARGO_BIN_EXE_alphanode")
        .unwrap_or_else(|_| "target/debug/alphanode".to_string())
}

fn submit_line(session: &mut Session, line: &str) {
    session.send(line).expect("send line text");
    session.send([b'\r']).expect("send Enter");
}

fn exit_repl(session: &mut Session) {
    submit_line(session, "quit");
    let _ = session.expect(Eof);
    thread::sleep(Duration::from_millis(25));
}

fn expect_text(session: &mut Session, text: &str) {
    for attempt in 1..=EXPECT_RETRIES {
        match session.expect(text) {
            Ok(_) => return,
            Err(ExpectError::ExpectTimeout) if attempt < EXPECT_RETRIES => continue,
            Err(err) => panic!(
                "failed to match text {:?} on attempt {}: {}",
                text, attempt, err
            ),
        }
    }

    panic!("unreachable: retries exhausted without returning");
}
