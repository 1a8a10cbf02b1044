//! Isolated query execution.
//!
//! A query runs in its own process group with a wall-clock timeout and, on
//! unix, a virtual memory ceiling. The deadline covers reading the worker's
//! output too, and the whole group is killed when the handle is dropped. The
//! request travels through a temporary file that is removed at the same time.

use crate::error::QueryFailure;
use crate::state::config::QueryConfig;
use crate::state::paths::StatePaths;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

pub const BUILTIN_WORKER_ARG: &str = "scan-knowledge";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_EXCERPT_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub description: String,
    pub keywords: Vec<String>,
}

impl QueryRequest {
    pub fn new(description: impl Into<String>, keywords: &[String]) -> Self {
        Self {
            description: description.into(),
            keywords: keywords.to_vec(),
        }
    }
}

pub trait QueryRunner {
    fn run(&self, request: &QueryRequest) -> Result<Value, QueryFailure>;
}

/// Stops a running query from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessQueryRunner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    memory_limit_mb: u64,
    scratch_dir: PathBuf,
}

impl ProcessQueryRunner {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        timeout: Duration,
        memory_limit_mb: u64,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            memory_limit_mb,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Configured worker command, or this binary's built-in knowledge scanner.
    pub fn from_config(paths: &StatePaths, cfg: &QueryConfig) -> Result<Self, QueryFailure> {
        let timeout = Duration::from_secs(cfg.timeout_secs);
        match cfg.command.as_deref() {
            Some(command) => {
                let program = resolve_program(command)?;
                Ok(Self::new(
                    program,
                    cfg.args.clone(),
                    timeout,
                    cfg.memory_limit_mb,
                    &paths.scratch_dir,
                ))
            }
            None => {
                let program = env::current_exe().map_err(|err| {
                    QueryFailure::Unavailable(format!("cannot locate own executable: {err}"))
                })?;
                let args = vec![
                    BUILTIN_WORKER_ARG.to_string(),
                    "--docs-dir".to_string(),
                    paths.docs_dir.display().to_string(),
                ];
                Ok(Self::new(
                    program,
                    args,
                    timeout,
                    cfg.memory_limit_mb,
                    &paths.scratch_dir,
                ))
            }
        }
    }

    pub fn spawn(&self, request: &QueryRequest) -> Result<QueryHandle, QueryFailure> {
        let request_file = self.write_request(request)?;
        let mut cmd = self.command_for(request_file.path());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(|err| {
            QueryFailure::Spawn(format!("failed to run `{}`: {err}", self.program.display()))
        })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        Ok(QueryHandle {
            child,
            stdout,
            stderr,
            timeout: self.timeout,
            started: Instant::now(),
            cancel: CancelToken::default(),
            _request_file: request_file,
        })
    }

    fn write_request(&self, request: &QueryRequest) -> Result<NamedTempFile, QueryFailure> {
        let setup = |err: String| QueryFailure::Spawn(format!("failed to stage request: {err}"));
        fs::create_dir_all(&self.scratch_dir).map_err(|err| setup(err.to_string()))?;
        let mut file = NamedTempFile::new_in(&self.scratch_dir).map_err(|e| setup(e.to_string()))?;
        let body = serde_json::to_vec(request).map_err(|err| setup(err.to_string()))?;
        file.write_all(&body).map_err(|err| setup(err.to_string()))?;
        file.flush().map_err(|err| setup(err.to_string()))?;
        Ok(file)
    }

    #[cfg(unix)]
    fn command_for(&self, request_path: &Path) -> Command {
        if self.memory_limit_mb == 0 {
            return self.direct_command(request_path);
        }
        let limit_kb = self.memory_limit_mb.saturating_mul(1024);
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(r#"ulimit -v "$1" 2>/dev/null; shift; exec "$@""#)
            .arg("waypoint-query")
            .arg(limit_kb.to_string())
            .arg(&self.program)
            .args(&self.args)
            .arg(request_path);
        cmd
    }

    #[cfg(not(unix))]
    fn command_for(&self, request_path: &Path) -> Command {
        self.direct_command(request_path)
    }

    fn direct_command(&self, request_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(request_path);
        cmd
    }
}

impl QueryRunner for ProcessQueryRunner {
    fn run(&self, request: &QueryRequest) -> Result<Value, QueryFailure> {
        self.spawn(request)?.wait()
    }
}

fn resolve_program(command: &str) -> Result<PathBuf, QueryFailure> {
    let path = Path::new(command);
    if path.components().count() > 1 {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(QueryFailure::Unavailable(format!(
            "query worker not found at {}",
            path.display()
        )));
    }
    which::which(command).map_err(|err| {
        QueryFailure::Unavailable(format!("query worker `{command}` not on PATH: {err}"))
    })
}

fn drain<R: Read + Send + 'static>(mut source: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

/// A running query. Dropping it kills the worker's process group.
pub struct QueryHandle {
    child: Child,
    stdout: Option<Receiver<Vec<u8>>>,
    stderr: Option<Receiver<Vec<u8>>>,
    timeout: Duration,
    started: Instant,
    cancel: CancelToken,
    _request_file: NamedTempFile,
}

impl QueryHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn wait(mut self) -> Result<Value, QueryFailure> {
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    self.terminate();
                    return Err(QueryFailure::Spawn(format!("failed to poll worker: {err}")));
                }
            }
            if self.cancel.is_cancelled() {
                self.terminate();
                return Err(QueryFailure::Cancelled);
            }
            if self.started.elapsed() >= self.timeout {
                self.terminate();
                return Err(self.timed_out());
            }
            thread::sleep(POLL_INTERVAL);
        };

        // Background processes left by the worker can hold the pipes open.
        let deadline = self.started + self.timeout;
        let stdout = self.stdout.take();
        let stdout = self.collect_output(stdout, deadline)?;
        let stderr = self.stderr.take();
        let stderr = self.collect_output(stderr, deadline)?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(QueryFailure::Exit {
                code: status.code(),
                stderr: excerpt(stderr.trim()),
            });
        }
        parse_single_line(&String::from_utf8_lossy(&stdout))
    }

    fn collect_output(
        &mut self,
        pipe: Option<Receiver<Vec<u8>>>,
        deadline: Instant,
    ) -> Result<Vec<u8>, QueryFailure> {
        let Some(pipe) = pipe else {
            return Ok(Vec::new());
        };
        match pipe.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(buf) => Ok(buf),
            Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
            Err(RecvTimeoutError::Timeout) => {
                self.terminate();
                Err(self.timed_out())
            }
        }
    }

    fn timed_out(&self) -> QueryFailure {
        QueryFailure::Timeout {
            timeout_secs: self.timeout.as_secs(),
        }
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        kill_process_group(self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// The worker leads its own group, so its id is the group id.
#[cfg(unix)]
fn kill_process_group(leader: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(leader) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

fn excerpt(raw: &str) -> String {
    crate::state::util::truncate_with_ellipsis(raw, STDERR_EXCERPT_CHARS)
}

/// Success output must be exactly one non-empty line of JSON.
pub fn parse_single_line(stdout: &str) -> Result<Value, QueryFailure> {
    let mut lines = stdout.lines().map(str::trim).filter(|line| !line.is_empty());
    let Some(line) = lines.next() else {
        return Err(QueryFailure::Output("worker produced no output".to_string()));
    };
    if lines.next().is_some() {
        return Err(QueryFailure::Output(
            "worker produced more than one output line".to_string(),
        ));
    }
    serde_json::from_str(line)
        .map_err(|err| QueryFailure::Output(format!("worker output is not JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{ProcessQueryRunner, QueryRequest, QueryRunner, parse_single_line};
    use crate::error::QueryFailure;
    use serde_json::json;

    #[test]
    fn single_json_line_is_accepted() {
        let value = parse_single_line("\n{\"status\":\"success\"}\n\n").expect("parse");
        assert_eq!(value, json!({"status": "success"}));
    }

    #[test]
    fn extra_or_missing_lines_are_rejected() {
        assert!(matches!(
            parse_single_line(""),
            Err(QueryFailure::Output(_))
        ));
        assert!(matches!(
            parse_single_line("{}\n{}\n"),
            Err(QueryFailure::Output(_))
        ));
        assert!(matches!(
            parse_single_line("not json"),
            Err(QueryFailure::Output(_))
        ));
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let runner = ProcessQueryRunner::new(
            tmp.path().join("no-such-worker"),
            Vec::new(),
            std::time::Duration::from_secs(5),
            0,
            tmp.path().join("tmp"),
        );
        let err = runner
            .run(&QueryRequest::new("x", &[]))
            .expect_err("must fail");
        assert!(matches!(err, QueryFailure::Spawn(_)));
    }

    #[cfg(unix)]
    mod unix {
        use super::super::{ProcessQueryRunner, QueryRequest, QueryRunner};
        use crate::error::QueryFailure;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};
        use std::time::{Duration, Instant};
        use tempfile::tempdir;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("worker.sh");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut perms = fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        fn runner(program: PathBuf, scratch: &Path, timeout: Duration) -> ProcessQueryRunner {
            ProcessQueryRunner::new(program, Vec::new(), timeout, 256, scratch)
        }

        fn request() -> QueryRequest {
            QueryRequest::new("map the auth flow", &["auth".to_string()])
        }

        #[test]
        fn worker_reads_request_file_and_answers() {
            let tmp = tempdir().expect("tempdir");
            let program = script(
                tmp.path(),
                r#"grep -q "map the auth flow" "$1" || exit 3
echo '{"status":"success","hits":2}'"#,
            );
            let scratch = tmp.path().join("scratch");
            let value = runner(program, &scratch, Duration::from_secs(10))
                .run(&request())
                .expect("run");
            assert_eq!(value["hits"], 2);
            let leftovers = fs::read_dir(&scratch).expect("scratch").count();
            assert_eq!(leftovers, 0, "request file must be removed");
        }

        #[test]
        fn non_zero_exit_carries_stderr() {
            let tmp = tempdir().expect("tempdir");
            let program = script(tmp.path(), "echo 'index missing' >&2\nexit 4");
            let err = runner(program, &tmp.path().join("scratch"), Duration::from_secs(10))
                .run(&request())
                .expect_err("must fail");
            match err {
                QueryFailure::Exit { code, stderr } => {
                    assert_eq!(code, Some(4));
                    assert!(stderr.contains("index missing"));
                }
                other => panic!("unexpected failure: {other:?}"),
            }
        }

        #[test]
        fn slow_worker_is_killed_at_timeout() {
            let tmp = tempdir().expect("tempdir");
            let program = script(tmp.path(), "sleep 30\necho '{}'");
            let started = Instant::now();
            let err = runner(program, &tmp.path().join("scratch"), Duration::from_secs(1))
                .run(&request())
                .expect_err("must time out");
            assert!(matches!(err, QueryFailure::Timeout { timeout_secs: 1 }));
            assert!(started.elapsed() < Duration::from_secs(20));
        }

        #[test]
        fn cancelled_handle_stops_worker() {
            let tmp = tempdir().expect("tempdir");
            let program = script(tmp.path(), "sleep 30\necho '{}'");
            let handle = runner(program, &tmp.path().join("scratch"), Duration::from_secs(60))
                .spawn(&request())
                .expect("spawn");
            handle.cancel_token().cancel();
            assert!(matches!(handle.wait(), Err(QueryFailure::Cancelled)));
        }

        #[test]
        fn background_child_holding_stdout_cannot_outlast_timeout() {
            let tmp = tempdir().expect("tempdir");
            let program = script(tmp.path(), "sleep 8 &\necho '{\"ok\":1}'\nexit 0");
            let started = Instant::now();
            let err = runner(program, &tmp.path().join("scratch"), Duration::from_secs(1))
                .run(&request())
                .expect_err("must time out");
            assert!(matches!(err, QueryFailure::Timeout { timeout_secs: 1 }));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn timeout_kills_the_whole_process_group() {
            let tmp = tempdir().expect("tempdir");
            let pid_file = tmp.path().join("bg.pid");
            let program = script(
                tmp.path(),
                &format!("sleep 30 &\necho $! > '{}'\nsleep 30", pid_file.display()),
            );
            let err = runner(program, &tmp.path().join("scratch"), Duration::from_secs(1))
                .run(&request())
                .expect_err("must time out");
            assert!(matches!(err, QueryFailure::Timeout { .. }));

            let pid = fs::read_to_string(&pid_file).expect("pid file");
            let pid = pid.trim();
            let deadline = Instant::now() + Duration::from_secs(3);
            let mut alive = true;
            while alive && Instant::now() < deadline {
                let state = fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
                alive = !state.is_empty() && !state.contains(") Z ");
                if alive {
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
            assert!(!alive, "background worker process {pid} survived the timeout");
        }
    }
}
