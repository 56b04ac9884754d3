//! Subprocess-backed execution engine.
//!
//! Each phase of a job is one invocation of the configured command with the
//! phase and node id appended as the last two arguments:
//!
//! ```text
//! <program> <args...> setup    <nodeid>
//! <program> <args...> call     <nodeid>
//! <program> <args...> teardown <nodeid>
//! ```
//!
//! Exit code 0 passes the phase. A failing setup skips the call phase;
//! teardown always runs. The node id, phase and lookahead are also exported
//! as `HILDIST_NODEID`, `HILDIST_PHASE` and `HILDIST_NEXT_NODEID`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use hildist_core::engine::{EngineError, ExecutionEngine, JobAssignment, ReportSink};
use hildist_core::report::{Outcome, PhaseReport};
use hildist_core::types::Phase;

/// Maximum stdout or stderr size captured per stream (1 MiB).
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default wall-clock limit for a single phase.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs job phases as child processes.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
    worker_id: Option<String>,
}

/// What one phase invocation produced.
struct PhaseRun {
    outcome: Outcome,
    duration_ms: u64,
    output: String,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_PHASE_TIMEOUT,
            working_dir: None,
            worker_id: None,
        }
    }

    /// Split a whitespace-separated command line, e.g. `./run-case.sh --rig`.
    pub fn from_command_line(line: &str) -> Result<Self, EngineError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| EngineError::Launch {
            node_id: String::new(),
            message: "Empty run command".to_string(),
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Stamp every emitted report with this worker id.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    async fn run_phase(&self, job: &JobAssignment, phase: Phase) -> Result<PhaseRun, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(phase.as_str())
            .arg(&job.node_id)
            .env("HILDIST_NODEID", &job.node_id)
            .env("HILDIST_PHASE", phase.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(next) = &job.next {
            cmd.env("HILDIST_NEXT_NODEID", next);
        }
        if let Some(dir) = job.working_dir.as_ref().or(self.working_dir.as_ref()) {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| EngineError::Launch {
            node_id: job.node_id.clone(),
            message: format!("{}: {e}", self.program),
        })?;

        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        // On timeout `child` is dropped, which kills it.
        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(EngineError::Launch {
                    node_id: job.node_id.clone(),
                    message: e.to_string(),
                })
            }
            Err(_elapsed) => {
                tracing::warn!(
                    node_id = %job.node_id,
                    phase = %phase,
                    timeout_secs = self.timeout.as_secs(),
                    "Phase timed out"
                );
                return Ok(PhaseRun {
                    outcome: Outcome::Error,
                    duration_ms,
                    output: format!("Timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr));

        let outcome = if status.success() {
            Outcome::Passed
        } else if phase == Phase::Call {
            Outcome::Failed
        } else {
            Outcome::Error
        };

        Ok(PhaseRun {
            outcome,
            duration_ms,
            output,
        })
    }

    fn report(&self, job: &JobAssignment, phase: Phase, run: PhaseRun) -> PhaseReport {
        let mut report = PhaseReport::new(job.node_id.clone(), phase, run.outcome);
        report.duration_ms = run.duration_ms;
        report.worker_id = self.worker_id.clone();
        if run.outcome.is_failure() && !run.output.is_empty() {
            report.longrepr = Some(run.output);
        }
        report
    }
}

#[async_trait]
impl ExecutionEngine for CommandEngine {
    async fn run_job(&self, job: &JobAssignment, sink: &dyn ReportSink) -> Result<(), EngineError> {
        let setup = self.run_phase(job, Phase::Setup).await?;
        let setup_ok = setup.outcome == Outcome::Passed;
        sink.emit(
            &job.node_id,
            Phase::Setup,
            self.report(job, Phase::Setup, setup).encode(),
        );

        let call = if setup_ok {
            self.run_phase(job, Phase::Call).await?
        } else {
            PhaseRun {
                outcome: Outcome::Skipped,
                duration_ms: 0,
                output: String::new(),
            }
        };
        sink.emit(
            &job.node_id,
            Phase::Call,
            self.report(job, Phase::Call, call).encode(),
        );

        let teardown = self.run_phase(job, Phase::Teardown).await?;
        sink.emit(
            &job.node_id,
            Phase::Teardown,
            self.report(job, Phase::Teardown, teardown).encode(),
        );

        tracing::debug!(node_id = %job.node_id, "Job finished");
        Ok(())
    }
}

/// Read an output stream to EOF, keeping at most [`MAX_OUTPUT_BYTES`].
///
/// The rest is drained and discarded: closing the pipe early would kill a
/// chatty child with SIGPIPE and turn a passing phase into a failure.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
        let _ = tokio::io::copy(&mut h, &mut tokio::io::sink()).await;
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<PhaseReport>>);

    impl ReportSink for Collect {
        fn emit(&self, _node_id: &str, _phase: Phase, report: String) {
            self.0.lock().unwrap().push(PhaseReport::decode(&report).unwrap());
        }
    }

    /// `sh -c <script> sh <phase> <nodeid>`: the script sees `$1` and `$2`.
    fn shell(script: &str) -> CommandEngine {
        CommandEngine::new("sh", vec!["-c".into(), script.into(), "sh".into()])
    }

    fn job(node_id: &str) -> JobAssignment {
        JobAssignment {
            node_id: node_id.to_string(),
            next: None,
            working_dir: None,
        }
    }

    fn outcomes(sink: &Collect) -> Vec<(Phase, Outcome)> {
        sink.0
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.phase, r.outcome))
            .collect()
    }

    #[tokio::test]
    async fn passing_job_reports_three_phases() {
        let sink = Collect::default();
        shell("exit 0")
            .with_worker_id("bench-7")
            .run_job(&job("t::a"), &sink)
            .await
            .unwrap();

        assert_eq!(
            outcomes(&sink),
            vec![
                (Phase::Setup, Outcome::Passed),
                (Phase::Call, Outcome::Passed),
                (Phase::Teardown, Outcome::Passed),
            ]
        );
        let reports = sink.0.lock().unwrap();
        assert!(reports.iter().all(|r| r.node_id == "t::a"));
        assert_eq!(reports[0].worker_id.as_deref(), Some("bench-7"));
    }

    #[tokio::test]
    async fn failing_call_keeps_output() {
        let sink = Collect::default();
        shell(r#"if [ "$1" = call ]; then echo "boom $2"; exit 1; fi"#)
            .run_job(&job("t::b"), &sink)
            .await
            .unwrap();

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports[1].outcome, Outcome::Failed);
        assert_eq!(reports[1].longrepr.as_deref(), Some("boom t::b\n"));
        assert_eq!(reports[2].outcome, Outcome::Passed);
    }

    #[tokio::test]
    async fn failing_setup_skips_call() {
        let sink = Collect::default();
        shell(r#"[ "$1" != setup ]"#)
            .run_job(&job("t::c"), &sink)
            .await
            .unwrap();

        assert_eq!(
            outcomes(&sink),
            vec![
                (Phase::Setup, Outcome::Error),
                (Phase::Call, Outcome::Skipped),
                (Phase::Teardown, Outcome::Passed),
            ]
        );
    }

    #[tokio::test]
    async fn lookahead_is_exported() {
        let sink = Collect::default();
        let assignment = JobAssignment {
            node_id: "t::a".into(),
            next: Some("t::b".into()),
            working_dir: None,
        };
        shell(r#"[ "$HILDIST_NEXT_NODEID" = t::b ]"#)
            .run_job(&assignment, &sink)
            .await
            .unwrap();

        assert!(outcomes(&sink).iter().all(|(_, o)| *o == Outcome::Passed));
    }

    #[tokio::test]
    async fn job_working_dir_overrides_engine_default() {
        let engine_dir = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        std::fs::write(job_dir.path().join("fixture.txt"), "rig1").unwrap();

        let engine = shell(r#"if [ "$1" = call ]; then [ -f fixture.txt ]; fi"#).with_working_dir(engine_dir.path());

        let sink = Collect::default();
        engine.run_job(&job("t::a"), &sink).await.unwrap();
        assert_eq!(outcomes(&sink)[1], (Phase::Call, Outcome::Failed));

        let sink = Collect::default();
        let assignment = JobAssignment {
            working_dir: Some(job_dir.path().to_path_buf()),
            ..job("t::a")
        };
        engine.run_job(&assignment, &sink).await.unwrap();
        assert!(outcomes(&sink).iter().all(|(_, o)| *o == Outcome::Passed));
    }

    #[tokio::test]
    async fn slow_phase_times_out_as_error() {
        let sink = Collect::default();
        shell(r#"if [ "$1" = call ]; then sleep 5; fi"#)
            .with_timeout(Duration::from_millis(200))
            .run_job(&job("t::slow"), &sink)
            .await
            .unwrap();

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports[1].outcome, Outcome::Error);
        assert!(reports[1].longrepr.as_deref().unwrap().starts_with("Timed out"));
    }

    /// Writes 3 MB to stdout in the call phase, then exits with `code`.
    fn loud(code: u8) -> CommandEngine {
        shell(&format!(
            r#"if [ "$1" = call ]; then head -c 3000000 /dev/zero | tr '\0' x; exit {code}; fi"#
        ))
    }

    #[tokio::test]
    async fn verbose_phase_still_passes() {
        let sink = Collect::default();
        loud(0).run_job(&job("t::loud"), &sink).await.unwrap();

        assert!(outcomes(&sink).iter().all(|(_, o)| *o == Outcome::Passed));
    }

    #[tokio::test]
    async fn captured_output_is_capped() {
        let sink = Collect::default();
        loud(1).run_job(&job("t::loud"), &sink).await.unwrap();

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports[1].outcome, Outcome::Failed);
        assert_eq!(reports[1].longrepr.as_ref().unwrap().len(), MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let sink = Collect::default();
        let result = CommandEngine::new("/nonexistent/hildist-runner", Vec::new())
            .run_job(&job("t::a"), &sink)
            .await;

        assert_matches!(result, Err(EngineError::Launch { node_id, .. }) if node_id == "t::a");
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn command_line_is_split() {
        let engine = CommandEngine::from_command_line("./run-case.sh --rig 1").unwrap();
        assert_eq!(engine.program, "./run-case.sh");
        assert_eq!(engine.args, vec!["--rig", "1"]);
        assert!(CommandEngine::from_command_line("   ").is_err());
    }
}
