//! Per-session state and the tasks that serve one live container: the
//! log pump, the stdin writer and the exit monitor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use manman_core::bus::messages::{LogBatchMessage, SessionStatusUpdate};
use manman_core::bus::{topics, Broker};
use manman_core::model::{LogSource, SessionStatus};

use crate::engine::Engine;
use crate::logstream::{LineSplitter, LogBatcher};

/// Shared state for one supervised session. All mutable state sits behind
/// one lock; the registry map holds an `Arc` per entry.
pub struct SessionHandle {
    pub session_id: i64,
    pub sgc_id: i64,
    pub container_name: String,
    pub status: Mutex<SessionStatus>,
    pub stop_requested: AtomicBool,
    pub stdin_tx: mpsc::Sender<Vec<u8>>,
    pub cancel: CancellationToken,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }
}

/// Publish one session status update; failures are logged, not fatal —
/// the catalog converges via recovery.
pub async fn publish_status(
    broker: &Broker,
    session_id: i64,
    status: SessionStatus,
    exit_code: Option<i32>,
    error_message: Option<String>,
) {
    let update = SessionStatusUpdate {
        session_id,
        status,
        timestamp: Utc::now(),
        exit_code,
        error_message,
    };
    if let Err(e) = broker
        .publish_json(&topics::session_status(session_id), &update)
        .await
    {
        tracing::warn!(
            target: "manman::supervisor",
            session_id,
            status = status.as_str(),
            error = %e,
            "status publish failed"
        );
    }
}

/// Pump demuxed container output into gzipped batches on `logs.batched`.
///
/// Reads stay in stream order; the pump never blocks on the broker — a
/// batch that cannot be published after bounded retries is dropped and
/// counted.
pub fn spawn_log_pump(
    engine: Engine,
    broker: Arc<Broker>,
    handle: Arc<SessionHandle>,
    dropped_lines: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = engine.logs(&handle.container_name, true);
        let mut batcher = LogBatcher::new(handle.session_id);
        let mut stdout_split = LineSplitter::default();
        let mut stderr_split = LineSplitter::default();
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(250));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = handle.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if batcher.is_stale(Utc::now()) {
                        cut_and_publish(&broker, &mut batcher, &dropped_lines).await;
                    }
                }
                item = stream.next() => {
                    use bollard::container::LogOutput;
                    match item {
                        Some(Ok(LogOutput::StdOut { message })) => {
                            for line in stdout_split.feed(&message) {
                                push_line(&broker, &mut batcher, LogSource::Stdout, line, &dropped_lines).await;
                            }
                        }
                        Some(Ok(LogOutput::StdErr { message })) => {
                            for line in stderr_split.feed(&message) {
                                push_line(&broker, &mut batcher, LogSource::Stderr, line, &dropped_lines).await;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(
                                target: "manman::supervisor",
                                session_id = handle.session_id,
                                error = %e,
                                "log stream error"
                            );
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // Container exited or the stream broke: drain partial lines and
        // flush whatever is buffered.
        for (source, split) in [
            (LogSource::Stdout, &mut stdout_split),
            (LogSource::Stderr, &mut stderr_split),
        ] {
            if let Some(line) = split.finish() {
                push_line(&broker, &mut batcher, source, line, &dropped_lines).await;
            }
        }
        cut_and_publish(&broker, &mut batcher, &dropped_lines).await;
        tracing::debug!(
            target: "manman::supervisor",
            session_id = handle.session_id,
            "log pump finished"
        );
    })
}

async fn push_line(
    broker: &Broker,
    batcher: &mut LogBatcher,
    source: LogSource,
    line: String,
    dropped: &AtomicU64,
) {
    match batcher.push(source, line, Utc::now()) {
        Ok(Some(batch)) => publish_batch(broker, batch, dropped).await,
        Ok(None) => {}
        Err(e) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(target: "manman::supervisor", error = %e, "log line dropped");
        }
    }
}

async fn cut_and_publish(broker: &Broker, batcher: &mut LogBatcher, dropped: &AtomicU64) {
    match batcher.flush(Utc::now()) {
        Ok(Some(batch)) => publish_batch(broker, batch, dropped).await,
        Ok(None) => {}
        Err(e) => tracing::warn!(target: "manman::supervisor", error = %e, "batch flush failed"),
    }
}

/// Bounded-retry publish; on sustained back-pressure the batch is dropped
/// and its lines counted, never blocking the container's output.
async fn publish_batch(broker: &Broker, batch: LogBatchMessage, dropped: &AtomicU64) {
    let mut delay = std::time::Duration::from_millis(100);
    for attempt in 0..3 {
        match broker.publish_json(topics::LOGS_BATCHED, &batch).await {
            Ok(()) => return,
            Err(e) if attempt < 2 => {
                tracing::debug!(target: "manman::supervisor", error = %e, "batch publish retry");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                dropped.fetch_add(batch.line_count as u64, Ordering::Relaxed);
                tracing::warn!(
                    target: "manman::supervisor",
                    session_id = batch.session_id,
                    lines = batch.line_count,
                    error = %e,
                    "log batch dropped after retries"
                );
            }
        }
    }
}

/// Feed queued stdin payloads into the container's input pipe.
pub fn spawn_stdin_writer(
    engine: Engine,
    handle: Arc<SessionHandle>,
    mut stdin_rx: mpsc::Receiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attach = match engine.attach_stdin(&handle.container_name).await {
            Ok(attach) => attach,
            Err(e) => {
                tracing::warn!(
                    target: "manman::supervisor",
                    session_id = handle.session_id,
                    error = %e,
                    "stdin attach failed"
                );
                return;
            }
        };
        loop {
            let payload = tokio::select! {
                _ = handle.cancel.cancelled() => break,
                payload = stdin_rx.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };
            if let Err(e) = attach.input.write_all(&payload).await {
                tracing::warn!(
                    target: "manman::supervisor",
                    session_id = handle.session_id,
                    error = %e,
                    "stdin write failed"
                );
                break;
            }
            let _ = attach.input.flush().await;
        }
    })
}

/// Wait for container exit, settle the final status, clean up.
///
/// `stopped` wins when a stop was requested or the exit was clean; an
/// unrequested non-zero exit is `crashed`.
pub fn spawn_exit_monitor(
    engine: Engine,
    broker: Arc<Broker>,
    handle: Arc<SessionHandle>,
    sessions: Arc<dashmap::DashMap<i64, Arc<SessionHandle>>>,
    log_pump: JoinHandle<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let exit = engine.wait_exit(&handle.container_name).await;

        // Let the log pump drain the tail of the stream before the
        // container is removed out from under it.
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), log_pump).await;

        let (status, exit_code, error) = match exit {
            Ok(code) => {
                let stopped = handle.stop_requested.load(Ordering::SeqCst);
                if stopped || code == 0 {
                    (SessionStatus::Stopped, Some(code as i32), None)
                } else {
                    (
                        SessionStatus::Crashed,
                        Some(code as i32),
                        Some(format!("container exited with code {code}")),
                    )
                }
            }
            Err(_) => (
                SessionStatus::Crashed,
                None,
                Some("container_missing".to_string()),
            ),
        };

        handle.set_status(status);
        publish_status(&broker, handle.session_id, status, exit_code, error).await;
        if let Err(e) = engine.remove(&handle.container_name).await {
            tracing::warn!(
                target: "manman::supervisor",
                session_id = handle.session_id,
                error = %e,
                "container remove failed"
            );
        }
        handle.cancel.cancel();
        sessions.remove(&handle.session_id);
        tracing::info!(
            target: "manman::supervisor",
            session_id = handle.session_id,
            status = status.as_str(),
            "session finished"
        );
    })
}
