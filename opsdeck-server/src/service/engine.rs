//! Pipeline Execution Engine
//!
//! Runs one deploy script for one pipeline record:
//! - `pending -> running`, persisted and published
//! - the script's stdout and stderr are read line by line, merged as they
//!   arrive, accumulated and published to the log hub
//! - `running -> success | failed` with `finished_at`, duration and the full
//!   log written in a single update, then the terminal status is published
//!
//! Failures of the script never propagate to the caller. They end up in the
//! record's status and log, and in the hub's event stream.

use chrono::Utc;
use opsdeck_core::domain::pipeline::{PipelineRecord, PipelineStatus};
use opsdeck_core::dto::pipeline::InFlightRun;
use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::DeployRepository;
use crate::service::hub::LogHub;

/// Interpreter used to run deploy scripts
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Why a run ended in `failed`
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to start script: {0}")]
    LaunchFailure(#[source] io::Error),

    #[error("Command failed: {0}")]
    ExecutionFailure(String),
}

/// Executions currently running, keyed by pipeline id
#[derive(Default)]
pub struct InFlightRegistry {
    runs: Mutex<HashMap<Uuid, InFlightRun>>,
}

impl InFlightRegistry {
    fn runs(&self) -> MutexGuard<'_, HashMap<Uuid, InFlightRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, run: InFlightRun) {
        self.runs().insert(run.pipeline_id, run);
    }

    fn remove(&self, pipeline_id: Uuid) {
        self.runs().remove(&pipeline_id);
    }

    pub fn contains(&self, pipeline_id: Uuid) -> bool {
        self.runs().contains_key(&pipeline_id)
    }

    /// Oldest run first
    pub fn snapshot(&self) -> Vec<InFlightRun> {
        let mut runs: Vec<InFlightRun> = self.runs().values().cloned().collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }
}

/// Output of one script run
struct ScriptOutcome {
    log: String,
    failure: Option<ExecutionError>,
}

type OutputLine = io::Result<String>;

/// Executes deploy scripts and drives pipeline records through their states
pub struct PipelineExecutor {
    repo: Arc<dyn DeployRepository>,
    hub: LogHub,
    shell: String,
    in_flight: InFlightRegistry,
}

impl PipelineExecutor {
    pub fn new(repo: Arc<dyn DeployRepository>, hub: LogHub, shell: impl Into<String>) -> Self {
        Self {
            repo,
            hub,
            shell: shell.into(),
            in_flight: InFlightRegistry::default(),
        }
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Runs the record on its own task and returns immediately
    ///
    /// The handle may be dropped; the run continues detached.
    pub fn dispatch(
        self: &Arc<Self>,
        record: PipelineRecord,
        script: String,
    ) -> JoinHandle<PipelineRecord> {
        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.execute(record, &script).await })
    }

    /// Runs the script to completion and returns the terminal record
    pub async fn execute(&self, mut record: PipelineRecord, script: &str) -> PipelineRecord {
        let pipeline_id = record.id;
        let started_at = Utc::now();

        if let Err(e) = record.start(started_at) {
            error!("Pipeline {} cannot start: {}", pipeline_id, e);
            return record;
        }

        self.in_flight.insert(InFlightRun {
            pipeline_id,
            repo_name: record.repo_name.clone(),
            started_at,
        });
        self.persist(&record).await;
        self.hub.publish_status(pipeline_id, PipelineStatus::Running);

        info!(
            "Pipeline {} ({}) running script {}",
            pipeline_id, record.repo_name, script
        );

        let outcome = self.run_script(pipeline_id, script).await;
        let status = match &outcome.failure {
            None => PipelineStatus::Success,
            Some(e) => {
                warn!("Pipeline {} failed: {}", pipeline_id, e);
                PipelineStatus::Failed
            }
        };

        if let Err(e) = record.finish(status, Utc::now(), outcome.log) {
            error!("Pipeline {} cannot finish: {}", pipeline_id, e);
        }

        self.persist(&record).await;
        self.in_flight.remove(pipeline_id);
        self.hub.publish_status(pipeline_id, status);

        info!(
            "Pipeline {} finished with status {} in {}s",
            pipeline_id,
            status,
            record.duration.unwrap_or_default()
        );

        record
    }

    async fn run_script(&self, pipeline_id: Uuid, script: &str) -> ScriptOutcome {
        let mut child = match Command::new(&self.shell)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let failure = ExecutionError::LaunchFailure(e);
                let message = failure.to_string();
                self.hub.publish_log(pipeline_id, message.clone());
                return ScriptOutcome {
                    log: message,
                    failure: Some(failure),
                };
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_forwarder(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_forwarder(stderr, tx.clone());
        }
        drop(tx);

        let mut log = String::new();
        let mut capture_error: Option<io::Error> = None;

        while let Some(line) = rx.recv().await {
            match line {
                Ok(line) => {
                    log.push_str(&line);
                    self.hub.publish_log(pipeline_id, line);
                }
                Err(e) => {
                    warn!("Pipeline {} output stream error: {}", pipeline_id, e);
                    capture_error.get_or_insert(e);
                }
            }
        }

        let failure = match child.wait().await {
            Ok(exit) if exit.success() => capture_error.map(|e| {
                ExecutionError::ExecutionFailure(format!("failed to read output: {}", e))
            }),
            Ok(exit) => Some(ExecutionError::ExecutionFailure(exit.to_string())),
            Err(e) => Some(ExecutionError::ExecutionFailure(e.to_string())),
        };

        if let Some(failure) = &failure {
            let summary = format!("\n{}\n", failure);
            log.push_str(&summary);
            self.hub.publish_log(pipeline_id, summary);
        }

        ScriptOutcome { log, failure }
    }

    /// Persistence failures are logged; the run itself carries on
    async fn persist(&self, record: &PipelineRecord) {
        match self.repo.update_pipeline(record).await {
            Ok(true) => debug!("Pipeline {} persisted as {}", record.id, record.status),
            Ok(false) => warn!(
                "Pipeline {} no longer exists, status {} not persisted",
                record.id, record.status
            ),
            Err(e) => error!(
                "Failed to persist pipeline {} as {}: {}",
                record.id, record.status, e
            ),
        }
    }
}

/// Reads `stream` line by line into `tx`, newline included
fn spawn_line_forwarder<R>(stream: R, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::service::hub::{DEFAULT_SUBSCRIBER_BUFFER, Subscription};
    use opsdeck_core::domain::event::LogEvent;
    use opsdeck_core::domain::pipeline::Trigger;
    use opsdeck_core::domain::repo_config::RepoConfig;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        hub: LogHub,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                repo: Arc::new(InMemoryRepository::new()),
                hub: LogHub::spawn(DEFAULT_SUBSCRIBER_BUFFER),
                dir: TempDir::new().unwrap(),
            }
        }

        fn executor(&self, shell: &str) -> Arc<PipelineExecutor> {
            Arc::new(PipelineExecutor::new(
                self.repo.clone(),
                self.hub.clone(),
                shell,
            ))
        }

        fn script(&self, body: &str) -> String {
            let path: PathBuf = self.dir.path().join(format!("{}.sh", Uuid::new_v4()));
            std::fs::write(&path, body).unwrap();
            path.to_string_lossy().into_owned()
        }

        async fn pending_record(&self) -> PipelineRecord {
            let now = Utc::now();
            let config = RepoConfig {
                id: Uuid::new_v4(),
                name: "web".to_string(),
                repo_url: "https://git.example.com/web.git".to_string(),
                deploy_script: String::new(),
                log_path: None,
                created_at: now,
                updated_at: now,
            };
            let record = PipelineRecord::pending(&config, Trigger::manual());
            self.repo.create_pipeline(&record).await.unwrap();
            record
        }
    }

    async fn events_until_terminal(sub: &mut Subscription, pipeline_id: Uuid) -> Vec<LogEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), sub.recv())
                .await
                .expect("timed out waiting for events")
                .expect("subscription closed");
            if event.pipeline_id() != pipeline_id {
                continue;
            }
            let done = matches!(
                &event,
                LogEvent::Status { status, .. } if status.is_terminal()
            );
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_successful_script() {
        let fx = Fixture::new();
        let executor = fx.executor(DEFAULT_SHELL);
        let record = fx.pending_record().await;
        let script = fx.script("echo ok\n");

        let finished = executor.execute(record.clone(), &script).await;

        assert_eq!(finished.status, PipelineStatus::Success);
        assert_eq!(finished.log.as_deref(), Some("ok\n"));
        assert!(finished.started_at.is_some());
        assert!(finished.finished_at.is_some());
        assert!(finished.duration.unwrap() >= 0);

        let stored = fx.repo.find_pipeline(record.id).await.unwrap().unwrap();
        assert_eq!(stored, finished);
    }

    #[tokio::test]
    async fn test_failing_script_appends_summary_after_output() {
        let fx = Fixture::new();
        let executor = fx.executor(DEFAULT_SHELL);
        let record = fx.pending_record().await;
        let script = fx.script("echo boom\nexit 1\n");

        let finished = executor.execute(record, &script).await;

        assert_eq!(finished.status, PipelineStatus::Failed);
        assert!(finished.finished_at.is_some());
        let log = finished.log.unwrap();
        assert!(log.starts_with("boom\n"));
        let summary = log.find("Command failed").expect("missing failure summary");
        assert!(summary > log.find("boom").unwrap());
    }

    #[tokio::test]
    async fn test_launch_failure_is_terminal() {
        let fx = Fixture::new();
        let executor = fx.executor("/nonexistent/opsdeck-shell");
        let record = fx.pending_record().await;
        let mut sub = fx.hub.register();

        let finished = executor.execute(record.clone(), "deploy.sh").await;

        assert_eq!(finished.status, PipelineStatus::Failed);
        assert!(finished.finished_at.is_some());
        let log = finished.log.clone().unwrap();
        assert!(log.starts_with("Failed to start script"));

        let events = events_until_terminal(&mut sub, record.id).await;
        assert_eq!(
            events,
            vec![
                LogEvent::status(record.id, PipelineStatus::Running),
                LogEvent::log(record.id, log),
                LogEvent::status(record.id, PipelineStatus::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_events_follow_running_lines_terminal_order() {
        let fx = Fixture::new();
        let executor = fx.executor(DEFAULT_SHELL);
        let record = fx.pending_record().await;
        let script = fx.script("echo one\necho two\necho three\n");
        let mut sub = fx.hub.register();

        executor.execute(record.clone(), &script).await;

        let events = events_until_terminal(&mut sub, record.id).await;
        assert_eq!(
            events,
            vec![
                LogEvent::status(record.id, PipelineStatus::Running),
                LogEvent::log(record.id, "one\n"),
                LogEvent::log(record.id, "two\n"),
                LogEvent::log(record.id, "three\n"),
                LogEvent::status(record.id, PipelineStatus::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let fx = Fixture::new();
        let executor = fx.executor(DEFAULT_SHELL);
        let record = fx.pending_record().await;
        let script = fx.script("echo out\necho err >&2\n");

        let finished = executor.execute(record, &script).await;

        let log = finished.log.unwrap();
        assert!(log.contains("out\n"));
        assert!(log.contains("err\n"));
    }

    #[tokio::test]
    async fn test_dispatch_tracks_in_flight_run() {
        let fx = Fixture::new();
        let executor = fx.executor(DEFAULT_SHELL);
        let record = fx.pending_record().await;
        let script = fx.script("sleep 0.3\necho done\n");
        let mut sub = fx.hub.register();

        let handle = executor.dispatch(record.clone(), script);

        let first = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, LogEvent::status(record.id, PipelineStatus::Running));
        assert!(executor.in_flight().contains(record.id));
        assert_eq!(executor.in_flight().snapshot()[0].repo_name, "web");

        let finished = handle.await.unwrap();
        assert_eq!(finished.status, PipelineStatus::Success);
        assert!(executor.in_flight().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_still_runs() {
        let fx = Fixture::new();
        let executor = fx.executor(DEFAULT_SHELL);
        let record = fx.pending_record().await;
        let orphan = PipelineRecord {
            id: Uuid::new_v4(),
            ..record
        };
        let script = fx.script("echo ok\n");

        let finished = executor.execute(orphan.clone(), &script).await;

        assert_eq!(finished.status, PipelineStatus::Success);
        assert!(fx.repo.find_pipeline(orphan.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_script_outlives_dropped_run() {
        let fx = Fixture::new();
        let executor = fx.executor(DEFAULT_SHELL);
        let record = fx.pending_record().await;
        let marker = fx.dir.path().join("deployed");
        let script = fx.script(&format!("sleep 0.3\ntouch '{}'\n", marker.display()));
        let mut sub = fx.hub.register();

        let handle = executor.dispatch(record.clone(), script);
        let first = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, LogEvent::status(record.id, PipelineStatus::Running));

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !marker.exists() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "script was killed with its task"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
