use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use roster_core::config;
use roster_sync::{pipeline, PassSummary};

use crate::error::{io_err, DaemonError};
use crate::paths::{roster_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Runs one pass on the blocking pool. The argument is `dry_run`.
type PassRunner = Arc<dyn Fn(bool) -> Result<PassSummary, DaemonError> + Send + Sync>;

struct PassJob {
    dry_run: bool,
    source: &'static str,
    respond_to: oneshot::Sender<Result<PassSummary, String>>,
}

/// Operation counts of a finished pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassCounts {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
}

impl From<&PassSummary> for PassCounts {
    fn from(summary: &PassSummary) -> Self {
        Self {
            added: summary.added.len(),
            removed: summary.removed.len(),
            updated: summary.updated.len(),
            skipped: summary.skipped.len(),
            failed: summary.failed.len(),
            dry_run: summary.dry_run,
        }
    }
}

/// What the daemon remembers between passes; reported by `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonState {
    pub passes: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_summary: Option<PassCounts>,
    pub last_error: Option<String>,
}

impl DaemonState {
    fn record(&mut self, outcome: &Result<PassSummary, String>) {
        self.passes += 1;
        match outcome {
            Ok(summary) => {
                self.last_pass_at = Some(summary.finished_at);
                self.last_summary = Some(PassCounts::from(summary));
                self.last_error = None;
            }
            Err(err) => {
                self.last_pass_at = Some(Utc::now());
                self.last_error = Some(err.clone());
            }
        }
    }
}

/// Everything a socket client handler needs.
#[derive(Clone)]
struct SocketContext {
    home: PathBuf,
    facility: String,
    interval: Duration,
    started_at: DateTime<Utc>,
    state: Arc<RwLock<DaemonState>>,
    pass_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing("info");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
///
/// The config is read once here for the facility and interval, then again
/// before every pass so feed and removal edits apply without a restart.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    ensure_runtime_dirs(&home)?;

    let interval = config.interval();
    tracing::info!(
        facility = %config.facility,
        interval_minutes = interval.as_secs() / 60,
        removal = %config.removal,
        "roster daemon starting",
    );

    let state = Arc::new(RwLock::new(DaemonState::default()));
    let (pass_tx, pass_rx) = mpsc::channel::<PassJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let timer_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let pass_tx = pass_tx.clone();
        tokio::spawn(async move {
            let result = timer_task(interval, pass_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let runner = pass_runner(home.clone());
        let state = state.clone();
        tokio::spawn(async move {
            let result = processor_task(runner, state, pass_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let context = SocketContext {
            home: home.clone(),
            facility: config.facility.clone(),
            interval,
            started_at: Utc::now(),
            state: state.clone(),
            pass_tx,
            shutdown_tx: shutdown.clone(),
        };
        tokio::spawn(async move {
            let result = socket_server_task(context, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (timer_result, processor_result, socket_result, signal_result) =
        tokio::join!(timer_handle, processor_handle, socket_handle, signal_handle);

    handle_join("timer", timer_result)?;
    handle_join("pass_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("roster daemon stopped");
    Ok(())
}

fn pass_runner(home: PathBuf) -> PassRunner {
    Arc::new(move |dry_run: bool| -> Result<PassSummary, DaemonError> {
        let config = config::load_at(&home)?;
        Ok(pipeline::run(&home, &config, dry_run)?)
    })
}

/// Enqueue a pass on every tick, waiting for it to finish before the next
/// tick is polled. Ticks missed during a long pass are skipped.
async fn timer_task(
    period: Duration,
    pass_tx: mpsc::Sender<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match enqueue_pass(&pass_tx, false, "timer").await {
                    Ok(summary) => {
                        tracing::info!(
                            added = summary.added.len(),
                            removed = summary.removed.len(),
                            updated = summary.updated.len(),
                            skipped = summary.skipped.len(),
                            failed = summary.failed.len(),
                            "scheduled pass completed",
                        );
                    }
                    Err(DaemonError::ChannelClosed(channel)) => {
                        tracing::debug!(channel, "pass queue closed, stopping timer");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "scheduled pass failed");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Single consumer of the pass queue; passes run strictly one at a time.
async fn processor_task(
    runner: PassRunner,
    state: Arc<RwLock<DaemonState>>,
    mut pass_rx: mpsc::Receiver<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = pass_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let dry_run = job.dry_run;
                let runner = runner.clone();

                let outcome = tokio::task::spawn_blocking(move || runner(dry_run))
                    .await
                    .map_err(|err| DaemonError::Protocol(format!("pass task join error: {err}")))?
                    .map_err(|err| err.to_string());

                match &outcome {
                    Ok(_) => tracing::info!(
                        source = job.source,
                        dry_run,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "pass finished",
                    ),
                    Err(err) => tracing::warn!(
                        source = job.source,
                        dry_run,
                        error = %err,
                        "pass aborted",
                    ),
                }

                state.write().await.record(&outcome);
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    context: SocketContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&context.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "listening for control requests");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, context: SocketContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&context).await),
            "sync" => {
                let dry_run = request.dry_run.unwrap_or(false);
                match enqueue_pass(&context.pass_tx, dry_run, "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => {
                let _ = context.shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(context: &SocketContext) -> Value {
    let state = context.state.read().await.clone();
    json!({
        "running": true,
        "facility": context.facility,
        "started_at": context.started_at,
        "interval_minutes": context.interval.as_secs() / 60,
        "passes": state.passes,
        "last_pass_at": state.last_pass_at,
        "last_summary": state.last_summary,
        "last_error": state.last_error,
        "socket": socket_path(&context.home).display().to_string(),
    })
}

async fn enqueue_pass(
    pass_tx: &mpsc::Sender<PassJob>,
    dry_run: bool,
    source: &'static str,
) -> Result<PassSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    pass_tx
        .send(PassJob {
            dry_run,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = roster_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `default_directive`.
///
/// Records emitted through the `log` facade are forwarded as well.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tempfile::TempDir;
    use tokio::task::JoinHandle;

    use crate::protocol::{request_status, request_stop};

    fn summary(dry_run: bool) -> PassSummary {
        let now = Utc::now();
        PassSummary {
            started_at: now,
            finished_at: now,
            dry_run,
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    type PassLog = Arc<Mutex<Vec<(Instant, Instant)>>>;

    /// Stand-in processor whose passes take `pass_time` of (virtual) time.
    fn fake_processor(
        mut pass_rx: mpsc::Receiver<PassJob>,
        pass_time: Duration,
        log: PassLog,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = pass_rx.recv().await {
                let start = Instant::now();
                tokio::time::sleep(pass_time).await;
                log.lock().expect("log lock").push((start, Instant::now()));
                let _ = job.respond_to.send(Ok(summary(job.dry_run)));
            }
        })
    }

    fn test_context(home: &Path) -> (SocketContext, mpsc::Receiver<PassJob>) {
        let (pass_tx, pass_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(4);
        let context = SocketContext {
            home: home.to_path_buf(),
            facility: "ZAB".to_string(),
            interval: Duration::from_secs(30 * 60),
            started_at: Utc::now(),
            state: Arc::new(RwLock::new(DaemonState::default())),
            pass_tx,
            shutdown_tx,
        };
        (context, pass_rx)
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn timer_runs_one_pass_per_interval() {
        let (pass_tx, pass_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(4);
        let log = PassLog::default();
        let processor = fake_processor(pass_rx, Duration::ZERO, log.clone());

        let timer = tokio::spawn(timer_task(
            Duration::from_secs(10 * 60),
            pass_tx,
            shutdown_tx.subscribe(),
        ));
        tokio::time::sleep(Duration::from_secs(35 * 60)).await;
        let _ = shutdown_tx.send(());

        timer.await.expect("join timer").expect("timer result");
        processor.await.expect("join processor");
        assert_eq!(log.lock().expect("log lock").len(), 4, "ticks at 0, 10, 20, 30 minutes");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn slow_passes_never_overlap() {
        let (pass_tx, pass_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(4);
        let log = PassLog::default();
        let processor = fake_processor(pass_rx, Duration::from_secs(25 * 60), log.clone());

        let timer = tokio::spawn(timer_task(
            Duration::from_secs(10 * 60),
            pass_tx,
            shutdown_tx.subscribe(),
        ));
        tokio::time::sleep(Duration::from_secs(80 * 60)).await;
        let _ = shutdown_tx.send(());

        timer.await.expect("join timer").expect("timer result");
        processor.await.expect("join processor");

        let log = log.lock().expect("log lock");
        assert!(log.len() >= 3, "expected back-to-back passes, got {}", log.len());
        for pair in log.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "pass started before the previous one finished");
        }
    }

    #[test]
    fn enqueue_fails_once_processor_is_gone() {
        let (pass_tx, pass_rx) = mpsc::channel(1);
        drop(pass_rx);
        let err = tokio_test::block_on(enqueue_pass(&pass_tx, false, "test")).unwrap_err();
        assert!(matches!(err, DaemonError::ChannelClosed("pass queue")));
    }

    #[test]
    fn dropped_responder_reports_closed_response() {
        let (pass_tx, mut pass_rx) = mpsc::channel(1);
        let err = tokio_test::block_on(async {
            let pending = enqueue_pass(&pass_tx, false, "test");
            let drop_job = async {
                drop(pass_rx.recv().await);
            };
            let (outcome, ()) = tokio::join!(pending, drop_job);
            outcome
        })
        .unwrap_err();
        assert!(matches!(err, DaemonError::ChannelClosed("pass response")));
    }

    #[tokio::test]
    async fn processor_records_outcomes_in_state() {
        let runner: PassRunner = Arc::new(|dry_run| {
            if dry_run {
                Ok(summary(true))
            } else {
                Err(DaemonError::Protocol("feed down".to_string()))
            }
        });
        let state = Arc::new(RwLock::new(DaemonState::default()));
        let (pass_tx, pass_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(4);
        let processor = tokio::spawn(processor_task(
            runner,
            state.clone(),
            pass_rx,
            shutdown_tx.subscribe(),
        ));

        let err = enqueue_pass(&pass_tx, false, "test").await.unwrap_err();
        assert!(err.to_string().contains("feed down"), "got {err}");
        assert!(state.read().await.last_error.is_some());

        let ok = enqueue_pass(&pass_tx, true, "test").await.expect("dry run");
        assert!(ok.dry_run);
        {
            let state = state.read().await;
            assert_eq!(state.passes, 2);
            assert!(state.last_error.is_none());
            assert_eq!(state.last_summary.map(|c| c.dry_run), Some(true));
        }

        let _ = shutdown_tx.send(());
        processor.await.expect("join").expect("processor result");
    }

    #[tokio::test]
    async fn status_payload_before_first_pass() {
        let home = TempDir::new().expect("home");
        let (context, _pass_rx) = test_context(home.path());

        let payload = build_status_payload(&context).await;
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["facility"], json!("ZAB"));
        assert_eq!(payload["interval_minutes"], json!(30));
        assert_eq!(payload["passes"], json!(0));
        assert_eq!(payload["last_pass_at"], Value::Null);
        assert_eq!(payload["last_summary"], Value::Null);
    }

    #[tokio::test]
    async fn status_payload_reports_last_summary() {
        let home = TempDir::new().expect("home");
        let (context, _pass_rx) = test_context(home.path());
        context.state.write().await.record(&Ok(summary(false)));

        let payload = build_status_payload(&context).await;
        assert_eq!(payload["passes"], json!(1));
        assert_eq!(payload["last_summary"]["added"], json!(0));
        assert_eq!(payload["last_summary"]["dry_run"], json!(false));
        assert!(payload["last_pass_at"].is_string());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_serves_status_then_stops() {
        let home = TempDir::new().expect("home");
        fs::create_dir_all(roster_root(home.path())).expect("roster dir");
        let (context, _pass_rx) = test_context(home.path());
        let shutdown_rx = context.shutdown_tx.subscribe();
        let server = tokio::spawn(socket_server_task(context, shutdown_rx));

        let home_path = home.path().to_path_buf();
        let status = tokio::task::spawn_blocking(move || {
            let status = request_status(&home_path)?;
            request_stop(&home_path)?;
            Ok::<_, DaemonError>(status)
        })
        .await
        .expect("join client")
        .expect("client");

        assert_eq!(status["running"], json!(true));
        server.await.expect("join server").expect("server result");
        assert!(!socket_path(home.path()).exists(), "socket removed on shutdown");
    }
}
