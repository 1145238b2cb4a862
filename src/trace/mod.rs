use anyhow::{Context, Result, anyhow, bail};
use reqwest::header::HeaderMap;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

const TRACE_DIR_NAME: &str = "alphanode/traces";

/// Category column of a trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Session,
    Report,
    UserIn,
    AiOut,
    AiErr,
    HttpIn,
    HttpOut,
    HttpErr,
}

impl TraceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Report => "report",
            Self::UserIn => "user.in",
            Self::AiOut => "ai.out",
            Self::AiErr => "ai.err",
            Self::HttpIn => "http.in",
            Self::HttpOut => "http.out",
            Self::HttpErr => "http.err",
        }
    }
}

/// Append-only log of everything a session sends and receives, one file per
/// run. Unlike `--verbose` output nothing here is redacted, so the file is
/// created owner-readable only.
///
/// Clones share the same file. Write failures are reported once on stderr and
/// never interrupt the conversation.
#[derive(Clone)]
pub struct SessionTrace {
    path: Arc<PathBuf>,
    sink: Arc<Mutex<TraceSink>>,
}

struct TraceSink {
    out: BufWriter<File>,
    warned: bool,
}

impl SessionTrace {
    pub fn create(session_id: &str) -> Result<Self> {
        let trace_dir = resolve_trace_dir_from_env()?;
        Self::open(session_id, &trace_dir)
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn create_in_temp_dir(session_id: &str, trace_dir: &Path) -> Result<Self> {
        Self::open(session_id, trace_dir)
    }

    fn open(session_id: &str, trace_dir: &Path) -> Result<Self> {
        fs::create_dir_all(trace_dir).with_context(|| {
            format!("Failed to create trace directory {}", trace_dir.display())
        })?;

        let started = OffsetDateTime::now_utc().unix_timestamp();
        let path = trace_dir.join(format!("session-{session_id}-{started}.log"));
        let file = open_private(&path)
            .with_context(|| format!("Failed to create trace file {}", path.display()))?;

        let trace = Self {
            path: Arc::new(path),
            sink: Arc::new(Mutex::new(TraceSink {
                out: BufWriter::new(file),
                warned: false,
            })),
        };
        trace.record(TraceKind::Session, &format!("alphanode session {session_id}"));
        Ok(trace)
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Writes `text` under `kind`, one trace line per text line.
    pub fn record(&self, kind: TraceKind, text: &str) {
        if text.is_empty() {
            self.write_line(kind, "<empty>");
            return;
        }
        for line in text.lines() {
            self.write_line(kind, line);
        }
    }

    pub fn log_report(&self, label: &str, url: &str, bytes: usize) {
        self.write_line(
            TraceKind::Report,
            &format!("{label}: {bytes} bytes from {url}"),
        );
    }

    pub fn log_user_input(&self, text: &str) {
        self.record(TraceKind::UserIn, text);
    }

    pub fn log_assistant_output(&self, text: &str) {
        self.record(TraceKind::AiOut, text);
    }

    pub fn log_assistant_error(&self, text: &str) {
        self.record(TraceKind::AiErr, text);
    }

    pub fn log_http_request(&self, method: &str, url: &str, headers: &HeaderMap, body: &str) {
        self.write_line(TraceKind::HttpIn, &format!("{method} {url}"));
        self.write_headers(TraceKind::HttpIn, headers);
        self.record(TraceKind::HttpIn, body);
    }

    pub fn log_http_response(&self, status: u16, headers: &HeaderMap, body: &str) {
        self.write_line(TraceKind::HttpOut, &format!("HTTP {status}"));
        self.write_headers(TraceKind::HttpOut, headers);
        self.record(TraceKind::HttpOut, body);
    }

    pub fn log_http_error(&self, message: &str) {
        self.record(TraceKind::HttpErr, message);
    }

    fn write_headers(&self, kind: TraceKind, headers: &HeaderMap) {
        for (name, value) in headers {
            let value = value.to_str().unwrap_or("<non-utf8>");
            self.write_line(kind, &format!("{name}: {value}"));
        }
    }

    fn write_line(&self, kind: TraceKind, text: &str) {
        let line = format!("[{}] [{:<11}] {text}\n", timestamp(), kind.as_str());

        let Ok(mut sink) = self.sink.lock() else {
            eprintln!("AlphaNode trace warning: trace writer lock poisoned");
            return;
        };
        let failed = sink.out.write_all(line.as_bytes()).is_err() || sink.out.flush().is_err();
        if failed && !sink.warned {
            sink.warned = true;
            eprintln!(
                "AlphaNode trace warning: failed to write to {}",
                self.path.display()
            );
        }
    }
}

fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}

pub fn resolve_trace_dir_from_env() -> Result<PathBuf> {
    let xdg_state = env::var("XDG_STATE_HOME").ok();
    resolve_trace_dir(xdg_state.as_deref(), dirs::home_dir().as_deref())
}

fn resolve_trace_dir(xdg_state_home: Option<&str>, home_dir: Option<&Path>) -> Result<PathBuf> {
    match xdg_state_home.map(str::trim) {
        Some("") => bail!("Failed to resolve trace path: XDG_STATE_HOME is set but empty"),
        Some(xdg) => Ok(PathBuf::from(xdg).join(TRACE_DIR_NAME)),
        None => home_dir
            .map(|home| home.join(".local/state").join(TRACE_DIR_NAME))
            .ok_or_else(|| anyhow!("Failed to resolve trace path: HOME directory is unavailable")),
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionTrace, TraceKind, resolve_trace_dir};
    use std::fs;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    fn body_lines(trace: &SessionTrace) -> Vec<String> {
        fs::read_to_string(trace.file_path())
            .expect("read trace")
            .lines()
            .skip(1)
            .map(ToOwned::to_owned)
            .collect()
    }

    #[test]
    fn resolve_trace_dir_prefers_xdg_state_then_home() {
        let dir = resolve_trace_dir(Some("/tmp/state"), Some(Path::new("/home/fallback")))
            .expect("trace path");
        assert_eq!(dir, Path::new("/tmp/state/alphanode/traces"));

        let dir = resolve_trace_dir(None, Some(Path::new("/home/alice"))).expect("trace path");
        assert_eq!(dir, Path::new("/home/alice/.local/state/alphanode/traces"));
    }

    #[test]
    fn resolve_trace_dir_rejects_empty_xdg_state() {
        let err = resolve_trace_dir(Some("   "), Some(Path::new("/home/alice")))
            .expect_err("empty xdg state should fail");
        assert!(
            err.to_string()
                .contains("Failed to resolve trace path: XDG_STATE_HOME is set but empty")
        );
    }

    #[test]
    fn resolve_trace_dir_fails_without_home_and_xdg_state() {
        let err = resolve_trace_dir(None, None).expect_err("missing home should fail");
        assert!(
            err.to_string()
                .contains("Failed to resolve trace path: HOME directory is unavailable")
        );
    }

    #[test]
    fn new_trace_starts_with_session_line() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_temp_dir("abc", dir.path()).expect("trace");

        let name = trace
            .file_path()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name");
        assert!(name.starts_with("session-abc-"));
        assert!(name.ends_with(".log"));

        let content = fs::read_to_string(trace.file_path()).expect("read trace");
        let first_line = content.lines().next().expect("line");
        assert!(first_line.starts_with("[20"));
        assert!(first_line.ends_with("Z] [session    ] alphanode session abc"));
    }

    #[test]
    fn multi_line_text_is_logged_line_by_line() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_temp_dir("abc", dir.path()).expect("trace");
        trace.log_user_input("first\nsecond");
        trace.log_report("August 2024", "https://example.com/a.txt", 42);
        trace.record(TraceKind::AiOut, "");

        let lines = body_lines(&trace);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("[user.in    ] first"));
        assert!(lines[1].ends_with("[user.in    ] second"));
        assert!(lines[2].ends_with(
            "[report     ] August 2024: 42 bytes from https://example.com/a.txt"
        ));
        assert!(lines[3].ends_with("[ai.out     ] <empty>"));
    }

    #[test]
    fn clones_append_to_the_same_file() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_temp_dir("abc", dir.path()).expect("trace");
        let clone = trace.clone();

        trace.log_assistant_output("from original");
        clone.log_assistant_error("from clone");

        let lines = body_lines(&trace);
        assert!(lines[0].ends_with("[ai.out     ] from original"));
        assert!(lines[1].ends_with("[ai.err     ] from clone"));
    }

    #[cfg(unix)]
    #[test]
    fn trace_file_permissions_are_owner_only() {
        let dir = tempdir().expect("tempdir");
        let trace = SessionTrace::create_in_temp_dir("abc", dir.path()).expect("trace");
        let metadata = fs::metadata(trace.file_path()).expect("metadata");
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
